//! Shared domain types for the loquat orchestration engine.
//!
//! Everything that crosses a crate boundary lives here: chat messages and
//! threads, the provider-agnostic stream event contract, tool value types,
//! the error taxonomy, and the engine configuration.

pub mod chat;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;

pub use chat::{ModelSpecifier, PromptMessage, Role, StoredMessage, Summary, Thread};
pub use error::{Error, Result};
pub use stream::{BoxStream, FinishReason, StreamEvent, Usage};
pub use tool::{ToolCall, ToolDescriptor};
