use std::collections::BTreeMap;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::models::StreamChunk;
use crate::providers::types::{StopReason, StreamEvent, ToolCall};

struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct StreamState {
    tool_accumulators: BTreeMap<u32, ToolCallAccumulator>,
    tokens_in: Option<i64>,
    tokens_out: Option<i64>,
    finish_reason: Option<String>,
}

impl StreamState {
    fn stop_reason(&self) -> StopReason {
        match self.finish_reason.as_deref() {
            _ if !self.tool_accumulators.is_empty() => StopReason::ToolUse,
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }

    /// Emits accumulated tool calls (in index order) followed by `Done`.
    async fn finish(mut self, tx: &mpsc::Sender<StreamEvent>) {
        let stop_reason = self.stop_reason();
        for (_, acc) in std::mem::take(&mut self.tool_accumulators) {
            let arguments: serde_json::Value = serde_json::from_str(&acc.arguments)
                .unwrap_or(serde_json::Value::Object(Default::default()));
            let _ = tx
                .send(StreamEvent::ToolCallComplete {
                    call: ToolCall {
                        id: acc.id,
                        name: acc.name,
                        arguments,
                    },
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                tokens_in: self.tokens_in,
                tokens_out: self.tokens_out,
                stop_reason: Some(stop_reason),
            })
            .await;
    }
}

/// Decode an OpenAI-style server-sent event body into [`StreamEvent`]s.
///
/// Text tokens are forwarded in arrival order. The stream ends on a
/// `data: [DONE]` frame, or on end-of-body, and always finishes with `Done`
/// unless a transport error occurs first.
pub async fn parse_sse_stream<S, E>(mut stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();
    let mut state = StreamState::default();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("Stream error: {}", e)))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);

        // Decode as much valid UTF-8 as possible, keeping a split code point
        // for the next chunk.
        let decoded = match std::str::from_utf8(&byte_buf) {
            Ok(s) => {
                let decoded = s.to_string();
                byte_buf.clear();
                decoded
            }
            Err(e) if e.error_len().is_some() => {
                let decoded = String::from_utf8_lossy(&byte_buf).into_owned();
                byte_buf.clear();
                decoded
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to == 0 {
                    continue;
                }
                let decoded = String::from_utf8_lossy(&byte_buf[..valid_up_to]).into_owned();
                byte_buf.drain(..valid_up_to);
                decoded
            }
        };

        buffer.push_str(&decoded.replace("\r\n", "\n"));

        // Frames are newline delimited; keep the trailing partial line.
        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].trim().to_string();
            buffer.drain(..line_end + 1);

            match handle_line(&line, &mut state, &tx).await {
                LineOutcome::Continue => {}
                LineOutcome::Finished => {
                    state.finish(&tx).await;
                    return;
                }
                LineOutcome::ReceiverGone => return,
            }
        }
    }

    // Body ended without [DONE]; flush a trailing unterminated line first.
    let line = buffer.trim().to_string();
    if !line.is_empty() {
        match handle_line(&line, &mut state, &tx).await {
            LineOutcome::ReceiverGone => return,
            LineOutcome::Continue | LineOutcome::Finished => {}
        }
    }
    state.finish(&tx).await;
}

enum LineOutcome {
    Continue,
    Finished,
    ReceiverGone,
}

async fn handle_line(
    line: &str,
    state: &mut StreamState,
    tx: &mpsc::Sender<StreamEvent>,
) -> LineOutcome {
    let payload = match line.strip_prefix("data:") {
        Some(p) => p.trim(),
        None => return LineOutcome::Continue,
    };
    if payload.is_empty() {
        return LineOutcome::Continue;
    }
    if payload == "[DONE]" {
        return LineOutcome::Finished;
    }

    let chunk = match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Failed to parse SSE data: {}", e);
            return LineOutcome::Continue;
        }
    };

    if let Some(usage) = chunk.usage {
        state.tokens_in = usage.prompt_tokens.or(state.tokens_in);
        state.tokens_out = usage.completion_tokens.or(state.tokens_out);
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return LineOutcome::Continue;
    };

    if let Some(reason) = choice.finish_reason {
        state.finish_reason = Some(reason);
    }

    if let Some(content) = choice.delta.content {
        if !content.is_empty() && tx.send(StreamEvent::Token(content)).await.is_err() {
            return LineOutcome::ReceiverGone;
        }
    }

    for tc in choice.delta.tool_calls {
        let acc = state
            .tool_accumulators
            .entry(tc.index)
            .or_insert_with(|| ToolCallAccumulator {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
        if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
            acc.id = id;
        }
        if let Some(func) = tc.function {
            if let Some(name) = func.name.filter(|n| !n.is_empty()) {
                acc.name = name;
            }
            if let Some(args) = func.arguments {
                acc.arguments.push_str(&args);
            }
        }
    }

    LineOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: &[&'static [u8]]) -> Vec<StreamEvent> {
        let stream = futures::stream::iter(
            chunks
                .iter()
                .copied()
                .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from_static(c))),
        );
        let (tx, mut rx) = mpsc::channel(64);
        parse_sse_stream(stream, tx).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn tokens(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_tokens_in_order_until_done() {
        let events = collect(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\r\ndata: [DONE]\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ])
        .await;

        assert_eq!(tokens(&events), vec!["Hel", "lo"]);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done {
                stop_reason: Some(StopReason::EndTurn),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks_and_utf8_boundary() {
        // "é" is 0xC3 0xA9, split between two network chunks.
        let events = collect(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3",
            b"\xA9\"}}]}\n",
            b"data: [DONE]\n",
        ])
        .await;
        assert_eq!(tokens(&events), vec!["café"]);
    }

    #[tokio::test]
    async fn test_done_emitted_without_terminator() {
        let events = collect(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"]).await;
        assert_eq!(tokens(&events), vec!["x"]);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_tool_call_accumulation() {
        let events = collect(&[
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"calculator\",\"arguments\":\"{\\\"expr\"}}]}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"ession\\\":\\\"1+1\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n",
            b"data: [DONE]\n",
        ])
        .await;

        let call = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallComplete { call } => Some(call.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "calculator");
        assert_eq!(call.arguments["expression"], "1+1");
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done {
                stop_reason: Some(StopReason::ToolUse),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err(std::io::Error::other("reset")),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        parse_sse_stream(stream, tx).await;

        assert!(matches!(rx.recv().await, Some(StreamEvent::Token(_))));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error(_))));
        assert!(rx.recv().await.is_none());
    }
}
