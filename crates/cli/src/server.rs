//! Line-oriented JSON-RPC 2.0 server over stdin/stdout.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`. Tool results are
//! returned MCP-style as a single text content block holding the JSON
//! payload. Bad input maps to application error codes in
//! `[-32099, -32000]`; policy outcomes are normal results.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bridgewarden_guard::{GuardError, RepoScanRequest};

use crate::tools::Gateway;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn list_tools() -> Vec<ToolSpec> {
    let tool = |name: &str, description: &str, schema: Value| ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    };
    vec![
        tool(
            "bw_read_file",
            "Read a local file through the inspection pipeline.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "repo_id": {"type": "string"},
                    "mode": {"type": "string", "enum": ["safe", "raw"], "default": "safe"}
                },
                "required": ["path"]
            }),
        ),
        tool(
            "bw_web_fetch",
            "Fetch a web page through SSRF checks, allowlists, and the inspection pipeline.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "mode": {"type": "string", "enum": ["readable_text", "raw_text"], "default": "readable_text"},
                    "max_bytes": {"type": "integer"}
                },
                "required": ["url"]
            }),
        ),
        tool(
            "bw_fetch_repo",
            "Fetch a repository archive and scan every file through the pipeline.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "ref": {"type": "string"},
                    "depth": {"type": "integer"},
                    "include_paths": {"type": "array", "items": {"type": "string"}},
                    "exclude_paths": {"type": "array", "items": {"type": "string"}},
                    "baseline_revision": {"type": "string"}
                },
                "required": ["url"]
            }),
        ),
        tool(
            "bw_quarantine_get",
            "Inspect a quarantined original safely (redacted excerpt only).",
            json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
        ),
        tool(
            "bw_request_source_approval",
            "Request human approval for a new source.",
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "object",
                        "properties": {
                            "kind": {"type": "string", "enum": ["web_domain", "repo_url", "upstream_mcp_server"]},
                            "target": {"type": "string"}
                        },
                        "required": ["kind", "target"]
                    }
                },
                "required": ["request"]
            }),
        ),
        tool(
            "bw_get_source_approval",
            "Fetch one source approval record.",
            json!({
                "type": "object",
                "properties": {"approval_id": {"type": "string"}},
                "required": ["approval_id"]
            }),
        ),
        tool(
            "bw_list_source_approvals",
            "List source approvals, newest first.",
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["PENDING", "APPROVED", "DENIED"]},
                    "kind": {"type": "string", "enum": ["web_domain", "repo_url", "upstream_mcp_server"]},
                    "limit": {"type": "integer", "default": 100}
                }
            }),
        ),
        tool(
            "bw_decide_source_approval",
            "Approve or deny a pending source approval.",
            json!({
                "type": "object",
                "properties": {
                    "approval_id": {"type": "string"},
                    "decision": {"type": "string", "enum": ["APPROVED", "DENIED"]},
                    "notes": {"type": "string"}
                },
                "required": ["approval_id", "decision"]
            }),
        ),
    ]
}

/// Run the serve loop until stdin closes. `reload` is checked between
/// requests; when set, the policy snapshot is swapped before the next
/// dispatch.
pub fn serve(
    gateway: &Gateway,
    reload: &AtomicBool,
    input: impl BufRead,
    mut output: impl Write,
) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if reload.swap(false, Ordering::SeqCst) {
            if let Err(err) = gateway.reload_policy() {
                tracing::warn!(error = %err, "policy reload failed, keeping old snapshot");
            }
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => process_request(gateway, &request),
            Err(err) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Value::Null,
                result: None,
                error: Some(JsonRpcError {
                    code: -32700,
                    message: format!("parse error: {err}"),
                }),
            },
        };

        let serialized = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        writeln!(output, "{serialized}")?;
        output.flush()?;
    }
    Ok(())
}

pub fn process_request(gateway: &Gateway, request: &JsonRpcRequest) -> JsonRpcResponse {
    let respond = |result: Value| JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request.id.clone(),
        result: Some(result),
        error: None,
    };
    let fail = |code: i64, message: String| JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request.id.clone(),
        result: None,
        error: Some(JsonRpcError { code, message }),
    };

    match request.method.as_str() {
        "initialize" => respond(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {
                "name": "bridgewarden",
                "version": env!("CARGO_PKG_VERSION"),
                "policy_version": gateway.policy_version(),
            }
        })),
        "tools/list" => respond(json!({ "tools": list_tools() })),
        "tools/call" => {
            let name = request.params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            match dispatch_tool(gateway, name, &arguments) {
                Ok(result) => respond(json!({
                    "content": [{
                        "type": "text",
                        "text": serde_json::to_string(&result).unwrap_or_default()
                    }]
                })),
                Err(err) => fail(error_code(&err), err.to_string()),
            }
        }
        other => fail(-32601, format!("method not found: {other}")),
    }
}

fn dispatch_tool(gateway: &Gateway, name: &str, args: &Value) -> Result<Value, GuardError> {
    match name {
        "bw_read_file" => {
            let path = required_str(args, "path")?;
            let repo_id = args.get("repo_id").and_then(Value::as_str);
            let mode = args.get("mode").and_then(Value::as_str);
            to_value(gateway.read_file(path, repo_id, mode)?)
        }
        "bw_web_fetch" => {
            let url = required_str(args, "url")?;
            let mode = args.get("mode").and_then(Value::as_str);
            let max_bytes = args.get("max_bytes").and_then(Value::as_u64);
            to_value(gateway.web_fetch(url, mode, max_bytes)?)
        }
        "bw_fetch_repo" => {
            let request = RepoScanRequest {
                url: required_str(args, "url")?.to_string(),
                git_ref: args.get("ref").and_then(Value::as_str).map(str::to_string),
                include_paths: string_list(args, "include_paths"),
                exclude_paths: string_list(args, "exclude_paths"),
                baseline_revision: args
                    .get("baseline_revision")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            to_value(gateway.fetch_repo(request)?)
        }
        "bw_quarantine_get" => {
            let id = required_str(args, "id")?;
            to_value(gateway.quarantine_get(id)?)
        }
        "bw_request_source_approval" => {
            let request = args
                .get("request")
                .ok_or_else(|| GuardError::InvalidArgument("missing request".to_string()))?;
            let kind = required_str(request, "kind")?;
            let target = required_str(request, "target")?;
            to_value(gateway.request_approval(kind, target)?)
        }
        "bw_get_source_approval" => {
            let id = required_str(args, "approval_id")?;
            to_value(gateway.get_approval(id)?)
        }
        "bw_list_source_approvals" => {
            let status = args.get("status").and_then(Value::as_str);
            let kind = args.get("kind").and_then(Value::as_str);
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
            let approvals = gateway.list_approvals(status, kind, limit)?;
            Ok(json!({ "approvals": approvals }))
        }
        "bw_decide_source_approval" => {
            let id = required_str(args, "approval_id")?;
            let decision = required_str(args, "decision")?;
            let notes = args.get("notes").and_then(Value::as_str);
            to_value(gateway.decide_approval(id, decision, notes)?)
        }
        other => Err(GuardError::InvalidArgument(format!("unknown tool {other:?}"))),
    }
}

fn error_code(err: &GuardError) -> i64 {
    match err {
        GuardError::InvalidArgument(_) | GuardError::PathEscape(_) => -32001,
        GuardError::NotFound(_) => -32002,
        GuardError::Config(_) => -32003,
        _ => -32000,
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, GuardError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GuardError::InvalidArgument(format!("missing {key}")))
}

fn string_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn to_value(value: impl Serialize) -> Result<Value, GuardError> {
    serde_json::to_value(value).map_err(GuardError::from)
}
