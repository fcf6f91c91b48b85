use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, ChatContent, ChatToolCall, ChatUsage, ContentPart};

/// Translate a Chat Completions response into an Anthropic Messages response.
///
/// Every choice contributes to the single output message: all text blocks first,
/// then all tool calls, each in choice order.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse) -> MessagesResponse {
    let mut text_blocks = Vec::new();
    let mut tool_blocks = Vec::new();

    for choice in &resp.choices {
        text_blocks.extend(text_blocks_of(choice.message.content.as_ref()));
        if let Some(ref calls) = choice.message.tool_calls {
            tool_blocks.extend(calls.iter().map(tool_use_block));
        }
    }

    let finish_reason = merged_finish_reason(
        resp.choices
            .iter()
            .map(|c| c.finish_reason.as_deref()),
    );

    let mut content = text_blocks;
    content.append(&mut tool_blocks);

    MessagesResponse {
        id: resp.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp.model.clone(),
        stop_reason: finish_reason.and_then(map_finish_reason),
        stop_sequence: None,
        usage: resp.usage.as_ref().map_or_else(Usage::default, translate_usage),
    }
}

/// Pick one finish reason across choices: the first choice's reason, replaced
/// by a later choice that reports `tool_calls`, or by any later reason while the
/// current one is still `stop`.
pub(crate) fn merged_finish_reason<'a>(reasons: impl Iterator<Item = Option<&'a str>>) -> Option<&'a str> {
    let mut merged: Option<&str> = None;
    for (i, reason) in reasons.enumerate() {
        if i == 0 {
            merged = reason;
        } else if reason == Some("tool_calls") || (merged == Some("stop") && reason.is_some()) {
            merged = reason;
        }
    }
    merged
}

/// Map an upstream finish_reason onto an Anthropic stop_reason.
pub fn map_finish_reason(reason: &str) -> Option<String> {
    let mapped = match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "content_filter",
        _ => return None,
    };
    Some(mapped.to_string())
}

/// `input_tokens` excludes cached prompt tokens and never goes negative.
pub fn translate_usage(usage: &ChatUsage) -> Usage {
    let cached = usage.cached_tokens();
    Usage {
        input_tokens: usage
            .prompt_tokens
            .saturating_sub(cached.unwrap_or(0)),
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: cached,
    }
}

fn text_blocks_of(content: Option<&ChatContent>) -> Vec<ResponseContentBlock> {
    match content {
        Some(ChatContent::Text(text)) => vec![ResponseContentBlock::Text { text: text.clone() }],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(ResponseContentBlock::Text { text: text.clone() }),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect(),
        None => Vec::new(),
    }
}

fn tool_use_block(call: &ChatToolCall) -> ResponseContentBlock {
    let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
        tracing::warn!(
            tool = %call.function.name,
            "Tool call arguments are not valid JSON ({e}); using an empty object"
        );
        serde_json::Value::Object(serde_json::Map::new())
    });

    ResponseContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.function.name.clone(),
        input,
    }
}
