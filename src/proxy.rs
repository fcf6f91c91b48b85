use crate::clients::{ChatCompletionsOutcome, CopilotApi, SseFrameStream};
use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::{MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::StreamTranslator;

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// Anthropic events for one streamed response. An `Err` item is always the last one.
pub type AnthropicEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Outcome of forwarding a translated Messages request.
pub enum MessagesOutcome {
    Complete(MessagesResponse),
    Stream(AnthropicEventStream),
}

/// Send a translated request to Copilot and translate whatever comes back.
pub async fn forward_messages(
    copilot: &dyn CopilotApi,
    payload: &ChatCompletionRequest,
) -> Result<MessagesOutcome> {
    tracing::debug!(
        model = %payload.model,
        streaming = payload.stream.unwrap_or(false),
        messages = payload.messages.len(),
        "Forwarding chat completion"
    );

    match copilot
        .create_chat_completions(serde_json::to_value(payload)?)
        .await?
    {
        ChatCompletionsOutcome::Complete(body) => {
            let response: ChatCompletionResponse = serde_json::from_value(body)
                .map_err(|e| GatewayError::protocol(format!("unreadable completion response: {e}")))?;
            let translated = openai_to_anthropic(&response);
            tracing::debug!(
                input_tokens = translated.usage.input_tokens,
                output_tokens = translated.usage.output_tokens,
                "Completed"
            );
            Ok(MessagesOutcome::Complete(translated))
        }
        ChatCompletionsOutcome::Stream(frames) => {
            Ok(MessagesOutcome::Stream(Box::pin(translate_sse_stream(frames))))
        }
    }
}

/// Drive a [`StreamTranslator`] over upstream SSE frames.
///
/// `[DONE]` ends consumption; empty frames are skipped. A frame that fails to
/// parse, a translator error, or an upstream that stops without a finish
/// reason yields one final `Err`. Dropping the returned stream drops the
/// upstream connection with it.
pub fn translate_sse_stream(
    frames: SseFrameStream,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static {
    async_stream::stream! {
        let mut translator = StreamTranslator::new();
        let mut frames = frames;

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            tracing::debug!(data = %frame.data, "Copilot raw stream event");

            if frame.data == "[DONE]" {
                break;
            }
            if frame.data.is_empty() {
                continue;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&frame.data) {
                Ok(c) => c,
                Err(e) => {
                    yield Err(GatewayError::protocol(format!("unparseable stream chunk: {e}")));
                    return;
                }
            };

            match translator.on_chunk(&chunk) {
                Ok(events) => {
                    for event in events {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if let Err(e) = translator.finish() {
            yield Err(e);
        }
        tracing::debug!("Stream completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::SseFrame;
    use futures::stream;

    fn frames(data: &[&str]) -> SseFrameStream {
        let items: Vec<Result<SseFrame>> = data
            .iter()
            .map(|d| {
                Ok(SseFrame {
                    event: "message".to_string(),
                    data: (*d).to_string(),
                })
            })
            .collect();
        Box::pin(stream::iter(items))
    }

    async fn collect(data: &[&str]) -> Vec<Result<StreamEvent>> {
        translate_sse_stream(frames(data)).collect().await
    }

    const HELLO: &str = r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
    const WORLD_STOP: &str = r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":" world"},"finish_reason":"stop"}]}"#;

    #[tokio::test]
    async fn test_stream_translates_until_done() {
        let items = collect(&[HELLO, "", WORLD_STOP, "[DONE]", HELLO]).await;
        let names: Vec<&str> = items
            .iter()
            .map(|i| i.as_ref().unwrap().event_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_chunk_ends_stream_with_error() {
        let items = collect(&[HELLO, "{not json", WORLD_STOP]).await;
        let last = items.last().unwrap();
        assert!(matches!(last, Err(GatewayError::UpstreamProtocol { .. })));
        assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
        assert!(!items
            .iter()
            .any(|i| matches!(i, Ok(StreamEvent::MessageStop))));
    }

    #[tokio::test]
    async fn test_missing_finish_reason_is_reported() {
        let items = collect(&[HELLO, "[DONE]"]).await;
        assert!(matches!(
            items.last().unwrap(),
            Err(GatewayError::UpstreamProtocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_upstream_read_error_is_forwarded() {
        let items: Vec<Result<SseFrame>> = vec![Err(GatewayError::protocol("connection reset"))];
        let out: Vec<_> = translate_sse_stream(Box::pin(stream::iter(items)))
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
    }

    #[tokio::test]
    async fn test_dropping_events_releases_upstream() {
        let upstream_alive = std::sync::Arc::new(());
        let held = std::sync::Arc::clone(&upstream_alive);
        let upstream = frames(&[HELLO])
            .chain(stream::pending())
            .map(move |frame| {
                assert!(std::sync::Arc::strong_count(&held) > 1);
                frame
            });

        let mut events = Box::pin(translate_sse_stream(Box::pin(upstream)));
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.event_name(), "message_start");
        assert_eq!(std::sync::Arc::strong_count(&upstream_alive), 2);

        drop(events);
        assert_eq!(std::sync::Arc::strong_count(&upstream_alive), 1);
    }
}
