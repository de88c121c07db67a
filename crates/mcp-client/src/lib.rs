//! MCP client: discovery and invocation of externally provided tools.
//!
//! The engine never authors tools; it connects to one or more tool
//! subprocesses over a JSON-RPC 2.0 stdio protocol, discovers what they
//! offer, and invokes tools by name. Discovery and invocation degrade
//! independently: a dead subprocess means an empty catalog, and a failed
//! invocation is an `Err` value the caller branches on — never a panic and
//! never a request abort.

pub mod gateway;
pub mod protocol;
pub mod transport;

pub use gateway::{McpError, ToolGateway, ToolOutcome};
