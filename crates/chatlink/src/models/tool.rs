use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool declaration sent to a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the arguments the tool accepts
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name, description and argument schema
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation requested by a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Vendor-assigned id linking the call to its result
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// The keyword arguments for the execution
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<I: Into<String>, S: Into<String>>(
        id: I,
        name: S,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Policy controlling whether, and which, tool a model may invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call a tool
    Auto,
    /// The model must call some tool
    Any,
    /// The model must not call a tool
    None,
    /// The model must call the named tool
    Tool(String),
}

impl ToolChoice {
    /// Whether this choice obliges the model to run a tool
    pub fn requires_tool(&self) -> bool {
        matches!(self, ToolChoice::Any | ToolChoice::Tool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requires_tool() {
        assert!(!ToolChoice::Auto.requires_tool());
        assert!(!ToolChoice::None.requires_tool());
        assert!(ToolChoice::Any.requires_tool());
        assert!(ToolChoice::Tool("calculator".into()).requires_tool());
    }

    #[test]
    fn test_tool_choice_serialization() {
        assert_eq!(
            serde_json::to_value(ToolChoice::Auto).unwrap(),
            json!({"type": "auto"})
        );
        assert_eq!(
            serde_json::to_value(ToolChoice::Tool("add".into())).unwrap(),
            json!({"type": "tool", "name": "add"})
        );
    }
}
