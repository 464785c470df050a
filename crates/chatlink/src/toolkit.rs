use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

/// A tool a model can ask to run
///
/// The toolkit only knows tools through this trait: a declaration to send to the vendor
/// and a call taking the keyword arguments the model produced.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// The declaration sent to the model
    fn tool(&self) -> &Tool;

    /// Run the tool with the keyword arguments the model supplied
    async fn call(&self, arguments: Map<String, Value>) -> ToolResult<Value>;
}

/// Named registry of invocable tools
///
/// Iteration is in name order so the schemas sent to a vendor are stable between calls.
#[derive(Clone, Default)]
pub struct Toolkit {
    tools: BTreeMap<String, Arc<dyn Invocable>>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn add_tool<T: Invocable + 'static>(&mut self, tool: T) -> &mut Self {
        self.add_shared(Arc::new(tool))
    }

    pub fn add_shared(&mut self, tool: Arc<dyn Invocable>) -> &mut Self {
        self.tools.insert(tool.tool().name.clone(), tool);
        self
    }

    pub fn with_tool<T: Invocable + 'static>(mut self, tool: T) -> Self {
        self.add_tool(tool);
        self
    }

    pub fn remove_tool(&mut self, name: &str) -> Option<Arc<dyn Invocable>> {
        self.tools.remove(name)
    }

    pub fn get_tool_by_name(&self, name: &str) -> ToolResult<Arc<dyn Invocable>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declarations of every registered tool
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.tool().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Render a tool result as the text appended to a conversation
///
/// Strings are used verbatim, anything else as compact JSON.
pub fn render_tool_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
