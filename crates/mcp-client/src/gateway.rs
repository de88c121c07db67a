//! Tool gateway — holds tool subprocess connections and exposes the typed
//! catalog plus name-dispatched invocation.
//!
//! Degradation rules: a server that fails to initialize is skipped (the
//! catalog just shrinks, possibly to empty), and an invocation failure is an
//! `Err` value scoped to that one call. Nothing in here aborts an enclosing
//! request.

use serde_json::Value;

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, StdioTransport, TransportError};
use lq_domain::config::{McpConfig, McpServerConfig};
use lq_domain::tool::ToolDescriptor;

/// Errors specific to tool discovery and invocation.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("tool transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("tool protocol error: {0}")]
    Protocol(String),

    #[error("no such tool: {0}")]
    ToolNotFound(String),

    #[error("tool server is down: {0}")]
    ServerDown(String),
}

impl From<McpError> for lq_domain::Error {
    fn from(e: McpError) -> Self {
        lq_domain::Error::Other(e.to_string())
    }
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Concatenated text content returned by the tool.
    pub text: String,
    /// The tool ran but reported failure (distinct from a transport error).
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection — one subprocess
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Connection {
    id: String,
    tools: Vec<McpToolDef>,
    transport: Box<dyn McpTransport>,
}

impl Connection {
    /// Perform the MCP handshake and discover tools over an established
    /// transport.
    async fn handshake(
        id: String,
        transport: Box<dyn McpTransport>,
    ) -> Result<Self, McpError> {
        let init_params = protocol::initialize_params();
        let params_value = serde_json::to_value(&init_params)
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;

        let resp = transport.send_request("initialize", Some(params_value)).await?;
        if let Err(err) = resp.into_result() {
            return Err(McpError::Protocol(format!("initialize failed: {err}")));
        }

        transport.send_notification("notifications/initialized").await?;

        let tools_resp = transport.send_request("tools/list", None).await?;
        let tools = match tools_resp.into_result() {
            Ok(value) => match serde_json::from_value::<ToolsListResult>(value) {
                Ok(r) => r.tools,
                Err(e) => {
                    tracing::warn!(server_id = %id, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(server_id = %id, error = %err, "tools/list returned error, server will have no tools");
                Vec::new()
            }
        };

        tracing::info!(server_id = %id, tool_count = tools.len(), "tool server initialized");

        Ok(Self {
            id,
            tools,
            transport,
        })
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let resp = self.transport.send_request("tools/call", Some(params)).await?;
        let value = resp
            .into_result()
            .map_err(|err| McpError::Protocol(format!("tools/call failed: {err}")))?;
        serde_json::from_value::<ToolCallResult>(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolGateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All connected tool servers, exposed as one flat catalog.
pub struct ToolGateway {
    connections: Vec<Connection>,
}

impl ToolGateway {
    /// An empty gateway (no tool servers configured or reachable).
    pub fn empty() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    /// Connect to every configured server. Servers that fail to spawn or
    /// handshake are logged and skipped — never fatal.
    pub async fn connect(config: &McpConfig) -> Self {
        let mut connections = Vec::new();

        for server in &config.servers {
            match Self::connect_one(server).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    tracing::warn!(
                        server_id = %server.id,
                        error = %e,
                        "failed to initialize tool server, skipping"
                    );
                }
            }
        }

        Self { connections }
    }

    async fn connect_one(config: &McpServerConfig) -> Result<Connection, McpError> {
        let transport = StdioTransport::spawn(config)?;
        Connection::handshake(config.id.clone(), Box::new(transport)).await
    }

    /// The flattened catalog across all alive servers.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.connections
            .iter()
            .filter(|c| c.transport.is_alive())
            .flat_map(|c| c.tools.iter())
            .map(|tool| ToolDescriptor {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect()
    }

    /// Invoke a tool by name on whichever server advertises it.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome, McpError> {
        let conn = self
            .connections
            .iter()
            .find(|c| c.tools.iter().any(|t| t.name == name))
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        let result = conn.call(name, arguments).await?;
        Ok(ToolOutcome {
            text: result.text(),
            is_error: result.is_error,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.transport.is_alive())
            .map(|c| c.tools.len())
            .sum()
    }

    /// Gracefully shut down all servers concurrently.
    pub async fn shutdown(&self) {
        let futs: Vec<_> = self
            .connections
            .iter()
            .map(|c| c.transport.shutdown())
            .collect();
        futures_util::future::join_all(futs).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Mutex;

    /// Scripted transport: answers requests from a queue keyed by arrival
    /// order, mirroring how the stdio transport pairs ids.
    struct ScriptedTransport {
        results: Mutex<VecDeque<Result<Value, TransportError>>>,
        next_id: AtomicU64,
        alive: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Result<Value, TransportError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                next_id: AtomicU64::new(1),
                alive: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn send_request(
            &self,
            _method: &str,
            _params: Option<Value>,
        ) -> Result<JsonRpcResponse, TransportError> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let value = self
                .results
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(Value::Null))?;
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: Some(value),
                error: None,
            })
        }

        async fn send_notification(&self, _method: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn shutdown(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    fn catalog_json() -> Value {
        serde_json::json!({
            "tools": [
                {
                    "name": "get_project",
                    "description": "Resolve a project path",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "project_path": { "type": "string" } }
                    }
                },
                { "name": "repository_overview" }
            ]
        })
    }

    async fn gateway_with_script(
        results: Vec<Result<Value, TransportError>>,
    ) -> ToolGateway {
        let transport = ScriptedTransport::new(results);
        let conn = Connection::handshake("test".into(), Box::new(transport))
            .await
            .unwrap();
        ToolGateway {
            connections: vec![conn],
        }
    }

    #[tokio::test]
    async fn handshake_discovers_tools() {
        let gateway = gateway_with_script(vec![
            Ok(serde_json::json!({ "capabilities": {} })), // initialize
            Ok(catalog_json()),                            // tools/list
        ])
        .await;

        let tools = gateway.list_tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_project");
        assert_eq!(tools[0].parameter_names(), vec!["project_path"]);
        assert_eq!(gateway.tool_count(), 2);
    }

    #[tokio::test]
    async fn invoke_dispatches_by_name() {
        let gateway = gateway_with_script(vec![
            Ok(serde_json::json!({})),
            Ok(catalog_json()),
            Ok(serde_json::json!({
                "content": [{ "type": "text", "text": "acme/widgets" }]
            })),
        ])
        .await;

        let outcome = gateway
            .invoke("get_project", serde_json::json!({ "project_path": "acme/widgets" }))
            .await
            .unwrap();
        assert_eq!(outcome.text, "acme/widgets");
        assert!(!outcome.is_error);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_an_err_value() {
        let gateway = gateway_with_script(vec![
            Ok(serde_json::json!({})),
            Ok(catalog_json()),
        ])
        .await;

        let err = gateway.invoke("no_such_tool", Value::Null).await.unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn invoke_surfaces_tool_reported_failure() {
        let gateway = gateway_with_script(vec![
            Ok(serde_json::json!({})),
            Ok(catalog_json()),
            Ok(serde_json::json!({
                "content": [{ "type": "text", "text": "project not found" }],
                "isError": true
            })),
        ])
        .await;

        let outcome = gateway
            .invoke("get_project", serde_json::json!({}))
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert_eq!(outcome.text, "project not found");
    }

    #[tokio::test]
    async fn empty_gateway_has_empty_catalog() {
        let gateway = ToolGateway::empty();
        assert!(gateway.is_empty());
        assert!(gateway.list_tools().is_empty());
        assert_eq!(gateway.tool_count(), 0);
    }

    #[tokio::test]
    async fn dead_server_disappears_from_catalog() {
        let gateway = gateway_with_script(vec![
            Ok(serde_json::json!({})),
            Ok(catalog_json()),
        ])
        .await;
        assert_eq!(gateway.tool_count(), 2);

        gateway.shutdown().await;
        assert_eq!(gateway.tool_count(), 0);
        assert!(gateway.list_tools().is_empty());
    }
}
