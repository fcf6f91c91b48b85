//! State machine for translating Chat Completions streaming chunks into Anthropic SSE events.
//!
//! A [`StreamTranslator`] lives for exactly one streamed response. It tracks which
//! content block is open (at most one at a time), hands out monotonically
//! increasing block indices, and turns each upstream chunk into the Anthropic
//! events it implies.

use std::collections::HashMap;

use super::anthropic_types::{
    Delta, MessageDeltaBody, MessageStartBody, ResponseContentBlock, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChatUsage, ChunkToolCall};
use super::response::{map_finish_reason, merged_finish_reason, translate_usage};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text(usize),
    Tool(usize),
}

/// Per-request translator from upstream chunks to Anthropic stream events.
///
/// ```ignore
/// let mut translator = StreamTranslator::new();
/// for chunk in chunks {
///     for event in translator.on_chunk(&chunk)? {
///         // send each event as SSE
///     }
/// }
/// translator.finish()?;
/// ```
#[derive(Debug)]
pub struct StreamTranslator {
    started: bool,
    finished: bool,
    next_index: usize,
    open: OpenBlock,
    /// Upstream tool-call index → Anthropic content block index.
    tool_blocks: HashMap<u64, usize>,
    usage: Option<ChatUsage>,
}

impl Default for StreamTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self {
            started: false,
            finished: false,
            next_index: 0,
            open: OpenBlock::None,
            tool_blocks: HashMap::new(),
            usage: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one upstream chunk, returning the events it produces in order.
    pub fn on_chunk(&mut self, chunk: &ChatCompletionChunk) -> Result<Vec<StreamEvent>> {
        if self.finished {
            tracing::debug!(id = %chunk.id, "Ignoring chunk received after finish");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(message_start(chunk));
        }

        if let Some(ref usage) = chunk.usage {
            self.usage = Some(usage.clone());
        }

        for choice in &chunk.choices {
            if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                self.push_text(text, &mut events);
            }

            if let Some(ref calls) = choice.delta.tool_calls {
                for call in calls {
                    self.push_tool_call(call, &mut events)?;
                }
            }
        }

        let reported = chunk
            .choices
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .map(Some);
        if let Some(reason) = merged_finish_reason(reported) {
            self.push_finish(reason, &mut events);
        }

        Ok(events)
    }

    /// Called once the upstream stream has ended.
    ///
    /// A stream that never carried a finish_reason was cut short; that is an
    /// error rather than a cleanly closed message.
    pub fn finish(&self) -> Result<()> {
        if self.finished {
            Ok(())
        } else {
            Err(GatewayError::protocol(
                "upstream stream ended without a finish_reason",
            ))
        }
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.open {
            OpenBlock::Text(index) => index,
            _ => {
                let index = self.open_block(events);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
                self.open = OpenBlock::Text(index);
                index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn push_tool_call(&mut self, call: &ChunkToolCall, events: &mut Vec<StreamEvent>) -> Result<()> {
        let function = call.function.as_ref();
        let name = function.and_then(|f| f.name.as_deref());

        if !self.tool_blocks.contains_key(&call.index) && (call.id.is_some() || name.is_some()) {
            let index = self.open_block(events);
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse {
                    id: call.id.clone().unwrap_or_default(),
                    name: name.unwrap_or_default().to_string(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
            });
            self.open = OpenBlock::Tool(index);
            self.tool_blocks.insert(call.index, index);
        }

        let Some(arguments) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty())
        else {
            return Ok(());
        };

        match self.tool_blocks.get(&call.index) {
            Some(&index) if self.open == OpenBlock::Tool(index) => {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: arguments.to_string(),
                    },
                });
                Ok(())
            }
            Some(&index) => Err(GatewayError::protocol(format!(
                "arguments for tool call {} arrived after its block {index} was closed",
                call.index
            ))),
            None => Err(GatewayError::protocol(format!(
                "arguments for tool call {} arrived before the call was opened",
                call.index
            ))),
        }
    }

    fn push_finish(&mut self, reason: &str, events: &mut Vec<StreamEvent>) {
        self.close_open_block(events);

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: map_finish_reason(reason),
                stop_sequence: None,
            },
            usage: self
                .usage
                .as_ref()
                .map_or_else(Usage::default, translate_usage),
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;
    }

    /// Close whatever is open and reserve the next block index.
    fn open_block(&mut self, events: &mut Vec<StreamEvent>) -> usize {
        self.close_open_block(events);
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        match self.open {
            OpenBlock::Text(index) | OpenBlock::Tool(index) => {
                events.push(StreamEvent::ContentBlockStop { index });
            }
            OpenBlock::None => {}
        }
        self.open = OpenBlock::None;
    }
}

fn message_start(chunk: &ChatCompletionChunk) -> StreamEvent {
    StreamEvent::MessageStart {
        message: MessageStartBody {
            id: chunk.id.clone(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: Vec::new(),
            model: chunk.model.clone(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        },
    }
}
