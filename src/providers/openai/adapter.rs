use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;

use super::models::*;
use crate::providers::traits::{BackendId, TextBackend};
use crate::providers::types::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, MessageContent, ModelInfo, ProviderError,
    StopReason, StreamEvent, ToolCall, ToolChoice,
};
use crate::providers::util::{ensure_success, with_bearer};

/// Speaks the OpenAI chat-completions dialect. Used for the remote service and
/// for the local engine in offline mode; only the base URL differs.
pub struct OpenAiCompatibleBackend {
    client: Client,
    id: BackendId,
    base_url: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(id: BackendId, base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            id,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
        messages.iter().flat_map(wire_message).collect()
    }

    fn build_request(request: &ChatRequest, stream: bool) -> CompletionRequest<'_> {
        let tools: Vec<WireTool<'_>> = request
            .tools
            .iter()
            .map(|t| WireTool {
                kind: FunctionKind::Function,
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();
        let tool_choice = request
            .tool_choice
            .as_ref()
            .filter(|_| !tools.is_empty())
            .map(ToolChoice::as_str);
        CompletionRequest {
            model: &request.model,
            messages: Self::wire_messages(&request.messages),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools,
            tool_choice,
        }
    }

    async fn post_completion(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = Self::build_request(request, stream);
        let req = self
            .client
            .post(self.url("chat/completions"))
            .header("content-type", "application/json")
            .json(&body);

        let response = with_bearer(req, &request.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        ensure_success(response).await
    }
}

/// Tool results fan out into one `tool` message per call; everything else
/// maps one to one.
fn wire_message(msg: &ChatMessage) -> Vec<WireMessage<'_>> {
    if !msg.tool_results.is_empty() {
        return msg
            .tool_results
            .iter()
            .map(|result| WireMessage {
                role: WireRole::Tool,
                content: Some(WireContent::Text(&result.content)),
                tool_calls: Vec::new(),
                tool_call_id: Some(&result.call_id),
            })
            .collect();
    }

    let role = match msg.role {
        ChatRole::System => WireRole::System,
        ChatRole::User => WireRole::User,
        ChatRole::Assistant => WireRole::Assistant,
    };
    let tool_calls: Vec<WireToolCall<'_>> = msg
        .tool_calls
        .iter()
        .map(|call| WireToolCall {
            id: &call.id,
            kind: FunctionKind::Function,
            function: WireCallFunction {
                name: &call.name,
                arguments: call.arguments.to_string(),
            },
        })
        .collect();
    // An assistant turn that only requests tools carries no content at all.
    let content = match &msg.content {
        MessageContent::Text(text) if text.is_empty() && !tool_calls.is_empty() => None,
        other => Some(WireContent::Borrowed(other)),
    };
    vec![WireMessage {
        role,
        content,
        tool_calls,
        tool_call_id: None,
    }]
}

/// Calls whose arguments are not valid JSON are dropped.
fn reply_tool_calls(calls: Vec<ReplyToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .filter_map(|call| match serde_json::from_str(&call.function.arguments) {
            Ok(arguments) => Some(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }),
            Err(e) => {
                tracing::warn!("Dropping tool call {} with bad arguments: {}", call.function.name, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl TextBackend for OpenAiCompatibleBackend {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, ProviderError> {
        let req = self.client.get(self.url("models"));
        let response = with_bearer(req, api_key).send().await.map_err(|e| {
            ProviderError::NetworkError(format!("Failed to connect to {}: {}", self.base_url, e))
        })?;
        let response = ensure_success(response).await?;

        let model_list: ModelList = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse model list: {}", e))
        })?;

        Ok(model_list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
            })
            .collect())
    }

    async fn send_chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self.post_completion(&request, false).await?;

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let (message, finish_reason) = match completion.choices.into_iter().next() {
            Some(choice) => (Some(choice.message), choice.finish_reason),
            None => (None, None),
        };
        let (content, calls) = match message {
            Some(m) => (m.content.and_then(|c| c.as_text().map(str::to_string)), m.tool_calls),
            None => (None, Vec::new()),
        };
        let content = content.or(completion.text).unwrap_or_default();
        let tool_calls = reply_tool_calls(calls);

        let stop_reason = match finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ if !tool_calls.is_empty() => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };

        if content.is_empty() && tool_calls.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "No content in response".to_string(),
            ));
        }

        let usage = completion.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            model: completion.model.unwrap_or(request.model),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            tool_calls,
            stop_reason: Some(stop_reason),
        })
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        use super::stream::parse_sse_stream;

        let response = self.post_completion(&request, true).await?;
        parse_sse_stream(response.bytes_stream(), tx).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::types::{ToolDefinition, ToolResult};

    fn request(api_key: &str) -> ChatRequest {
        ChatRequest {
            api_key: api_key.to_string(),
            model: "openai".to_string(),
            messages: vec![
                ChatMessage::text(ChatRole::System, "be brief"),
                ChatMessage::text(ChatRole::User, "hi"),
            ],
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    fn backend(server: &MockServer) -> OpenAiCompatibleBackend {
        OpenAiCompatibleBackend::new(BackendId::Remote, server.uri(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stream_chat_forwards_tokens() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"there\"}}]}\n\n\
                    data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer tier-key"))
            .and(body_partial_json(serde_json::json!({"stream": true, "model": "openai"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(16);
        backend(&server)
            .stream_chat(request("tier-key"), tx)
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Token(t) = event {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn test_send_chat_accepts_bare_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "plain"})),
            )
            .mount(&server)
            .await;

        let response = backend(&server).send_chat(request("")).await.unwrap();
        assert_eq!(response.content, "plain");
        assert_eq!(response.model, "openai");
    }

    #[tokio::test]
    async fn test_send_chat_reads_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "openai-fast",
                "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let response = backend(&server).send_chat(request("k")).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "openai-fast");
        assert_eq!(response.tokens_out, Some(1));
    }

    #[tokio::test]
    async fn test_status_codes_map_to_categories() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(serde_json::json!({"error": {"message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let (tx, _rx) = mpsc::channel(4);
        let err = backend(&server)
            .stream_chat(request("k"), tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
    }

    #[test]
    fn test_tools_and_tool_messages_on_the_wire() {
        let mut req = request("k");
        req.tools = vec![ToolDefinition {
            name: "calculator".to_string(),
            description: "math".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        req.tool_choice = Some(ToolChoice::Auto);
        req.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: MessageContent::Text(String::new()),
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "calculator".to_string(),
                arguments: serde_json::json!({"expression": "2*3"}),
            }],
            tool_results: Vec::new(),
        });
        req.messages.push(ChatMessage {
            role: ChatRole::User,
            content: MessageContent::Text(String::new()),
            tool_calls: Vec::new(),
            tool_results: vec![
                ToolResult {
                    call_id: "c1".to_string(),
                    content: "6".to_string(),
                    is_error: false,
                },
                ToolResult {
                    call_id: "c2".to_string(),
                    content: "unknown tool".to_string(),
                    is_error: true,
                },
            ],
        });

        let body = serde_json::to_value(OpenAiCompatibleBackend::build_request(&req, true)).unwrap();
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][2].get("content").is_none());
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"expression\":\"2*3\"}"
        );
        assert_eq!(body["messages"].as_array().unwrap().len(), 5);
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
        assert_eq!(body["messages"][3]["content"], "6");
        assert_eq!(body["messages"][4]["tool_call_id"], "c2");
    }

    #[test]
    fn test_tool_choice_dropped_without_tools() {
        let mut req = request("k");
        req.tool_choice = Some(ToolChoice::Auto);
        let body = serde_json::to_value(OpenAiCompatibleBackend::build_request(&req, false)).unwrap();
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"][1]["content"], "hi");
    }
}
