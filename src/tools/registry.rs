use std::collections::BTreeMap;
use std::sync::Arc;

use crate::providers::types::{ToolCall, ToolDefinition, ToolResult};

use super::types::Tool;

/// Tools keyed by name. Ordered so declarations go out in a stable order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let def = tool.definition();
        self.tools.insert(def.name, tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            Some(tool) => {
                tracing::debug!("Executing tool {} ({})", call.name, call.id);
                tool.execute(call).await
            }
            None => {
                tracing::warn!("Model requested unknown tool {}", call.name);
                ToolResult::error(call, format!("Unknown tool: {}", call.name))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin;

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "c1".into(),
            name: "launch_rockets".into(),
            arguments: serde_json::json!({}),
        };
        let result = registry.execute(&call).await;
        assert!(result.is_error);
        assert_eq!(result.call_id, "c1");
    }

    #[tokio::test]
    async fn test_builtins_registered_in_name_order() {
        let mut registry = ToolRegistry::new();
        builtin::register_all(&mut registry);
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "current_time"]);

        let call = ToolCall {
            id: "c2".into(),
            name: "calculator".into(),
            arguments: serde_json::json!({ "expression": "2 * (3 + 4)" }),
        };
        assert_eq!(registry.execute(&call).await.content, "14");
    }
}
