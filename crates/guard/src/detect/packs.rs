//! Rule-pack loading and compilation.
//!
//! Packs are declarative JSON compiled once when a policy snapshot is
//! built; nothing is compiled at request time. The built-in pack is
//! embedded in the binary so the gateway has sane detection with no
//! external files, and its raw bytes feed the policy-version hash.

use serde::Deserialize;

use crate::detect::rule::{compile_rule, CompiledRule, RuleDef};
use crate::error::Result;

pub const BUILTIN_RULE_PACK: &str = include_str!("data/rules.json");

#[derive(Debug, Deserialize)]
pub struct RulePackData {
    pub version: String,
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub language_packs: Vec<LanguagePackData>,
}

#[derive(Debug, Deserialize)]
pub struct LanguagePackData {
    pub language: String,
    pub script: String,
    pub rules: Vec<RuleDef>,
}

pub struct CompiledRulePack {
    pub version: String,
    /// Always-on rules (core English phrases, regexes, structural
    /// predicates) in declaration order.
    pub core: Vec<CompiledRule>,
    pub languages: Vec<CompiledLanguagePack>,
}

pub struct CompiledLanguagePack {
    pub language: String,
    pub script: String,
    pub rules: Vec<CompiledRule>,
}

pub fn compile(json: &str) -> Result<CompiledRulePack> {
    let data: RulePackData = serde_json::from_str(json)?;

    let core = data
        .rules
        .iter()
        .map(compile_rule)
        .collect::<Result<Vec<_>>>()?;

    let languages = data
        .language_packs
        .iter()
        .map(|pack| {
            let rules = pack
                .rules
                .iter()
                .map(compile_rule)
                .collect::<Result<Vec<_>>>()?;
            Ok(CompiledLanguagePack {
                language: pack.language.clone(),
                script: pack.script.clone(),
                rules,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        version = %data.version,
        core_rules = core.len(),
        language_packs = languages.len(),
        "compiled rule pack"
    );

    Ok(CompiledRulePack {
        version: data.version,
        core,
        languages,
    })
}

pub fn load_builtin() -> Result<CompiledRulePack> {
    compile(BUILTIN_RULE_PACK)
}
