use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bridgewarden_cli::{server, signals, tools::Gateway};

#[derive(Parser)]
#[command(name = "bridgewarden")]
#[command(about = "Security gateway between an AI coding agent and untrusted content")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the bw_* tools over line-oriented JSON-RPC on stdin/stdout.
    Serve {
        /// State directory (quarantine, audit log, approvals, repos).
        #[arg(long, default_value = ".bridgewarden")]
        data_dir: PathBuf,

        /// Base directory that bw_read_file paths resolve against.
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// JSON config file; missing file means defaults.
        #[arg(short, long, default_value = "bridgewarden.json")]
        config: PathBuf,
    },

    /// Run one local file through the pipeline and print the result.
    Scan {
        input: PathBuf,

        #[arg(short, long, default_value = "bridgewarden.json")]
        config: PathBuf,

        /// Override the configured profile.
        #[arg(short, long)]
        profile: Option<String>,

        /// Emit the raw GuardResult JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Print the tool list as JSON.
    Tools,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Serve {
            data_dir,
            base_dir,
            config,
        } => run_serve(data_dir, base_dir, config),
        Commands::Scan {
            input,
            config,
            profile,
            json,
        } => run_scan(input, config, profile, json),
        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&server::list_tools())?);
            Ok(())
        }
    }
}

fn run_serve(data_dir: PathBuf, base_dir: PathBuf, config_path: PathBuf) -> Result<()> {
    let config = bridgewarden_guard::GuardConfig::load(&config_path)?;
    let gateway = Gateway::new(config, data_dir, base_dir)?.with_config_path(config_path);

    signals::install_sighup();
    tracing::info!(version = %gateway.policy_version(), "bridgewarden serving on stdio");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    server::serve(
        &gateway,
        &signals::RELOAD_REQUESTED,
        stdin.lock(),
        stdout.lock(),
    )?;
    Ok(())
}

fn run_scan(
    input: PathBuf,
    config_path: PathBuf,
    profile: Option<String>,
    json: bool,
) -> Result<()> {
    use colored::Colorize;

    use bridgewarden_guard::{
        Decision, GuardConfig, GuardPipeline, PolicySnapshot, Profile, SourceDescriptor,
    };

    let mut config = GuardConfig::load(&config_path)?;
    if let Some(name) = profile {
        config.profile = Profile::parse(&name)?;
    }
    let snapshot = PolicySnapshot::load(config)?;
    let pipeline = GuardPipeline::new(snapshot);

    let bytes = std::fs::read(&input)?;
    let source = SourceDescriptor::file(input.display().to_string(), "cli-scan");
    let result = pipeline.scan(bytes, source);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let decision = match result.decision {
        Decision::Allow => "ALLOW".green().bold(),
        Decision::Warn => "WARN".yellow().bold(),
        Decision::Block => "BLOCK".red().bold(),
    };
    println!("{decision}  risk={:.4}  {}", result.risk_score, input.display());
    if !result.reasons.is_empty() {
        println!("  reasons: {}", result.reasons.join(", "));
    }
    for redaction in &result.redactions {
        println!("  redacted: {} ×{}", redaction.kind, redaction.count);
    }
    if let Some(id) = &result.quarantine_id {
        println!("  quarantine: {id}");
    }
    Ok(())
}
