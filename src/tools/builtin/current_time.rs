use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use crate::providers::types::{ToolCall, ToolDefinition, ToolResult};
use crate::tools::types::Tool;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "current_time".to_string(),
            description: "Get the current date and time in UTC (RFC 3339).".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        ToolResult::ok(call, Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_parseable_utc_timestamp() {
        let call = ToolCall {
            id: "t".into(),
            name: "current_time".into(),
            arguments: serde_json::json!({}),
        };
        let result = CurrentTimeTool.execute(&call).await;
        assert!(!result.is_error);
        assert!(result.content.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&result.content).is_ok());
    }
}
