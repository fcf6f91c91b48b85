//! Translate Anthropic Messages API requests into Copilot Chat Completions requests.
//!
//! A single Anthropic message can expand into several chat messages: a user turn
//! carrying `tool_result` blocks becomes one `tool`-role message per result,
//! placed ahead of whatever user content remains in that turn.

use std::collections::HashSet;

use super::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
    ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail,
};
use crate::models::{resolve_model, ModelFallbackConfig};

/// Translate an Anthropic Messages request into a Chat Completions request.
/// Pure function: model aliases are resolved against `known_ids` and `fallbacks`.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    known_ids: Option<&HashSet<String>>,
    fallbacks: &ModelFallbackConfig,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::new(
            "system",
            Some(ChatContent::Text(system.as_text())),
        ));
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
    }

    ChatCompletionRequest {
        model: resolve_model(&req.model, known_ids, fallbacks),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools: req.tools.as_deref().map(translate_tools),
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
        stop: req.stop_sequences.clone(),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    }
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    match (&msg.content, msg.role) {
        (MessageContent::Text(text), Role::User) => {
            vec![ChatMessage::new("user", Some(ChatContent::Text(text.clone())))]
        }
        (MessageContent::Text(text), Role::Assistant) => {
            vec![ChatMessage::new(
                "assistant",
                Some(ChatContent::Text(text.clone())),
            )]
        }
        (MessageContent::Blocks(blocks), Role::User) => translate_user_blocks(blocks),
        (MessageContent::Blocks(blocks), Role::Assistant) => translate_assistant_blocks(blocks),
    }
}

fn translate_user_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let (results, rest): (Vec<&ContentBlock>, Vec<&ContentBlock>) = blocks
        .iter()
        .partition(|b| matches!(b, ContentBlock::ToolResult { .. }));

    let mut messages: Vec<ChatMessage> = results
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => Some(ChatMessage {
                role: "tool".to_string(),
                content: Some(tool_result_content(content.as_ref())),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            }),
            _ => None,
        })
        .collect();

    if !rest.is_empty() {
        messages.push(ChatMessage::new("user", Some(map_content(&rest))));
    }

    messages
}

fn translate_assistant_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let tool_calls: Vec<ChatToolCall> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            _ => None,
        })
        .collect();

    if tool_calls.is_empty() {
        let all: Vec<&ContentBlock> = blocks.iter().collect();
        return vec![ChatMessage::new("assistant", Some(map_content(&all)))];
    }

    let text = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .chain(blocks.iter().filter_map(|block| match block {
            ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
            _ => None,
        }))
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(ChatContent::Text(text)),
        tool_calls: Some(tool_calls),
        tool_call_id: None,
    }]
}

/// Flatten text/thinking into one string unless an image forces structured parts.
fn map_content(blocks: &[&ContentBlock]) -> ChatContent {
    let has_image = blocks
        .iter()
        .any(|b| matches!(b, ContentBlock::Image { .. }));

    if !has_image {
        let text = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        return ChatContent::Text(text);
    }

    let parts = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
            ContentBlock::Thinking { thinking, .. } => Some(ContentPart::Text {
                text: thinking.clone(),
            }),
            ContentBlock::Image { source } => Some(ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: format!("data:{};base64,{}", source.media_type, source.data),
                    detail: None,
                },
            }),
            _ => None,
        })
        .collect();
    ChatContent::Parts(parts)
}

fn tool_result_content(content: Option<&ToolResultContent>) -> ChatContent {
    match content {
        Some(ToolResultContent::Text(t)) => ChatContent::Text(t.clone()),
        Some(ToolResultContent::Blocks(blocks)) => {
            let refs: Vec<&ContentBlock> = blocks.iter().collect();
            map_content(&refs)
        }
        None => ChatContent::Text(String::new()),
    }
}

fn translate_tools(tools: &[Tool]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn translate_tool_choice(tc: &ToolChoice) -> Option<ChatToolChoice> {
    match tc.choice_type.as_str() {
        "auto" => Some(ChatToolChoice::String("auto".to_string())),
        "any" => Some(ChatToolChoice::String("required".to_string())),
        "none" => Some(ChatToolChoice::String("none".to_string())),
        "tool" => tc.name.as_ref().map(|name| {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }),
        _ => None,
    }
}
