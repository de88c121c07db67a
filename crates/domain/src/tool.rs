use serde::{Deserialize, Serialize};

/// A discovered tool the model may invoke (advisory catalog entry).
///
/// Never authored by the engine — descriptors come from the tool subprocess
/// and are injected into a system message; the orchestrator enforces nothing
/// beyond name matching at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    /// Names of the top-level parameters, extracted from the schema's
    /// `properties` map. Used to render the advisory tool-hint message.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A tool invocation requested by the model (backend-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}
