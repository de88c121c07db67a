//! Tool access seam for the engine.
//!
//! The facade, prefetcher, and step loop all talk to tools through this
//! trait so they can be exercised with scripted doubles; production wires in
//! the MCP [`ToolGateway`].

use async_trait::async_trait;
use serde_json::Value;

use lq_domain::error::Result;
use lq_domain::tool::ToolDescriptor;
use lq_mcp_client::{ToolGateway, ToolOutcome};

#[async_trait]
pub trait Tools: Send + Sync {
    /// The discovered tool catalog (possibly empty).
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool by name. Failure is a value the caller branches on.
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome>;
}

#[async_trait]
impl Tools for ToolGateway {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        ToolGateway::list_tools(self)
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        ToolGateway::invoke(self, name, arguments)
            .await
            .map_err(Into::into)
    }
}

/// A permanently empty tool source, for running without any tool subprocess.
pub struct NoTools;

#[async_trait]
impl Tools for NoTools {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    async fn invoke(&self, name: &str, _arguments: Value) -> Result<ToolOutcome> {
        Err(lq_domain::Error::Other(format!(
            "no tool source configured (tried '{name}')"
        )))
    }
}
