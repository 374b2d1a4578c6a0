//! SpecImpact MCP - impact queries as Model Context Protocol tools
//!
//! Speaks line-delimited JSON-RPC over stdio. Stdout carries protocol
//! messages only; everything else is logged to stderr.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use specimpact_graph::{GraphError, GraphHandle, ImpactSet, ImpactedNode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Debug)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

pub struct McpServer {
    graph: GraphHandle,
}

impl McpServer {
    pub fn new(graph: GraphHandle) -> Self {
        Self { graph }
    }

    pub async fn run_stdio(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if let Some(json) = self.handle_line(&line)? {
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
        debug!("stdin closed, MCP server exiting");
        Ok(())
    }

    /// Handles one input line, returning the serialized response if any.
    pub fn handle_line(&self, line: &str) -> Result<Option<String>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to parse input: {}", e);
                return Ok(None);
            }
        };

        match self.handle_request(req) {
            Some(response) => Ok(Some(serde_json::to_string(&response)?)),
            None => Ok(None),
        }
    }

    fn handle_request(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("MCP request: {}", req.method);

        // Notifications get no response
        if req.id.is_none() && req.method.starts_with("notifications/") {
            return None;
        }

        let result = match req.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "specimpact-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(req.params.unwrap_or(Value::Null)),
            method => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", method),
                data: None,
            }),
        };

        Some(match result {
            Ok(val) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(val),
                error: None,
                id: req.id,
            },
            Err(err) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(err),
                id: req.id,
            },
        })
    }

    fn list_tools(&self) -> Value {
        let changed = json!({
            "type": "array",
            "items": { "type": "string" },
            "description": "Ids of the changed specs, files or tests"
        });

        json!({
            "tools": [
                {
                    "name": "query_impact",
                    "description": "Lists the specs, code and tests affected by a set of changed ids, ranked by confidence.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "changed": changed,
                            "depth": { "type": "integer", "description": "Maximum hops from a changed id" },
                            "include_suggested": { "type": "boolean", "description": "Also follow low-confidence links" }
                        },
                        "required": ["changed"]
                    }
                },
                {
                    "name": "specs_for_code",
                    "description": "Finds the specifications a code file implements.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "file": { "type": "string", "description": "Code file id" },
                            "transitive": { "type": "boolean", "description": "Follow dependency chains" }
                        },
                        "required": ["file"]
                    }
                },
                {
                    "name": "code_for_spec",
                    "description": "Finds the code files that implement a specification.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "spec": { "type": "string", "description": "Spec id" }
                        },
                        "required": ["spec"]
                    }
                },
                {
                    "name": "tests_for_change",
                    "description": "Selects the tests to run for a set of changed ids.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "changed": changed
                        },
                        "required": ["changed"]
                    }
                }
            ]
        })
    }

    fn call_tool(&self, params: Value) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| JsonRpcError::invalid_params("Missing 'name' parameter"))?;

        let arguments = params.get("arguments").unwrap_or(&Value::Null);

        match name {
            "query_impact" => {
                let changed = string_list(arguments, "changed")?;
                let config = self.graph.read().config().clone();
                let depth = arguments
                    .get("depth")
                    .and_then(|v| v.as_u64())
                    .map_or(config.default_depth, |d| d as usize);
                let include_suggested = arguments
                    .get("include_suggested")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(config.include_suggested);

                let impact = self.graph.query_impact(&changed, depth, include_suggested);
                Ok(text_content(impact_brief(&changed, depth, &impact), false))
            }
            "specs_for_code" => {
                let file = string_arg(arguments, "file")?;
                let transitive = arguments
                    .get("transitive")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                Ok(match self.graph.query_specs_for_code(file, transitive) {
                    Ok(specs) => text_content(
                        nodes_brief(&format!("Specs for `{}`", file), &specs),
                        false,
                    ),
                    Err(e) => tool_error(&e),
                })
            }
            "code_for_spec" => {
                let spec = string_arg(arguments, "spec")?;
                Ok(match self.graph.query_code_for_spec(spec) {
                    Ok(code) => {
                        text_content(nodes_brief(&format!("Code for `{}`", spec), &code), false)
                    }
                    Err(e) => tool_error(&e),
                })
            }
            "tests_for_change" => {
                let changed = string_list(arguments, "changed")?;
                let tests = self.graph.query_tests_for_change(&changed);
                Ok(text_content(
                    nodes_brief(&format!("Tests for {}", id_list(&changed)), &tests),
                    false,
                ))
            }
            _ => Err(JsonRpcError {
                code: -32601,
                message: format!("Tool not found: {}", name),
                data: None,
            }),
        }
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, JsonRpcError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| JsonRpcError::invalid_params(format!("Missing '{}' argument", key)))
}

fn string_list(arguments: &Value, key: &str) -> Result<Vec<String>, JsonRpcError> {
    let items = arguments
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| JsonRpcError::invalid_params(format!("Missing '{}' argument", key)))?;
    Ok(items
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect())
}

fn text_content(text: String, is_error: bool) -> Value {
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "isError": is_error
    })
}

fn tool_error(err: &GraphError) -> Value {
    text_content(format!("Error: {}", err), true)
}

fn id_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("`{}`", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn impact_brief(changed: &[String], depth: usize, impact: &ImpactSet) -> String {
    let mut brief = String::new();

    brief.push_str(&format!("# Impact Brief: {}\n\n", id_list(changed)));
    brief.push_str("| Property | Value |\n");
    brief.push_str("|----------|-------|\n");
    brief.push_str(&format!("| **Depth** | {} |\n", depth));
    brief.push_str(&format!("| **Specs** | {} |\n", impact.specs.len()));
    brief.push_str(&format!("| **Code** | {} |\n", impact.code.len()));
    brief.push_str(&format!("| **Tests** | {} |\n", impact.tests.len()));

    for (title, nodes) in [
        ("Specs", &impact.specs),
        ("Code", &impact.code),
        ("Tests", &impact.tests),
    ] {
        brief.push_str(&format!("\n## {}\n\n", title));
        push_table(&mut brief, nodes);
    }
    brief
}

fn nodes_brief(title: &str, nodes: &[ImpactedNode]) -> String {
    let mut brief = format!("# {}\n\n", title);
    push_table(&mut brief, nodes);
    brief
}

fn push_table(brief: &mut String, nodes: &[ImpactedNode]) {
    if nodes.is_empty() {
        brief.push_str("*None.*\n");
        return;
    }
    brief.push_str("| Id | Confidence | Hops | Via | Suggested |\n");
    brief.push_str("|----|------------|------|-----|-----------|\n");
    for node in nodes {
        brief.push_str(&format!(
            "| `{}` | {:.2} | {} | {} | {} |\n",
            node.id,
            node.confidence,
            node.hops,
            node.via,
            if node.suggested { "yes" } else { "no" }
        ));
    }
}
