//! Shape checks applied to inbound bodies before anything is forwarded.
//!
//! Each check looks only at the fields the gateway depends on; everything else
//! in the body is left alone. Any failure becomes a 400 with the generic
//! "Invalid request payload" message, with the concrete issue logged.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::openai_types::EmbeddingRequest;

/// Parse and check a `/v1/messages` (or `count_tokens`) body.
pub fn parse_anthropic_messages_payload(body: &[u8]) -> Result<MessagesRequest> {
    const CONTEXT: &str = "anthropic.messages";
    let value = parse_json(CONTEXT, body)?;
    let obj = as_object(CONTEXT, &value)?;

    require_string(CONTEXT, obj, "model")?;
    if !obj.get("max_tokens").is_some_and(Value::is_number) {
        return Err(invalid(CONTEXT, "max_tokens must be a number"));
    }

    let messages = require_messages(CONTEXT, obj)?;
    for (i, message) in messages.iter().enumerate() {
        let role = message.get("role").and_then(Value::as_str);
        if !matches!(role, Some("user" | "assistant")) {
            return Err(invalid(
                CONTEXT,
                format!("messages[{i}].role must be \"user\" or \"assistant\""),
            ));
        }
        match message.get("content") {
            Some(Value::String(_) | Value::Array(_)) => {}
            _ => {
                return Err(invalid(
                    CONTEXT,
                    format!("messages[{i}].content must be a string or an array"),
                ))
            }
        }
    }

    typed(CONTEXT, value)
}

/// Check a `/v1/chat/completions` body. The body is forwarded untouched, so
/// the parsed JSON is returned as-is.
pub fn parse_openai_chat_payload(body: &[u8]) -> Result<Value> {
    const CONTEXT: &str = "openai.chat";
    let value = parse_json(CONTEXT, body)?;
    let obj = as_object(CONTEXT, &value)?;

    require_string(CONTEXT, obj, "model")?;
    let messages = require_messages(CONTEXT, obj)?;
    for (i, message) in messages.iter().enumerate() {
        if !message.get("role").is_some_and(Value::is_string) {
            return Err(invalid(CONTEXT, format!("messages[{i}].role must be a string")));
        }
        match message.get("content") {
            Some(Value::String(_) | Value::Array(_) | Value::Null) => {}
            _ => {
                return Err(invalid(
                    CONTEXT,
                    format!("messages[{i}].content must be a string, an array or null"),
                ))
            }
        }
    }

    Ok(value)
}

/// Parse and check a `/v1/embeddings` body.
pub fn parse_embedding_request(body: &[u8]) -> Result<EmbeddingRequest> {
    const CONTEXT: &str = "openai.embeddings";
    let value = parse_json(CONTEXT, body)?;
    let obj = as_object(CONTEXT, &value)?;

    require_string(CONTEXT, obj, "model")?;
    let input_ok = match obj.get("input") {
        Some(Value::String(_)) => true,
        Some(Value::Array(items)) => items.iter().all(Value::is_string),
        _ => false,
    };
    if !input_ok {
        return Err(invalid(CONTEXT, "input must be a string or an array of strings"));
    }

    typed(CONTEXT, value)
}

fn parse_json(context: &str, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| invalid(context, format!("body is not JSON: {e}")))
}

fn as_object<'a>(context: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(context, "body must be a JSON object"))
}

fn require_string(context: &str, obj: &Map<String, Value>, field: &str) -> Result<()> {
    if obj.get(field).is_some_and(Value::is_string) {
        Ok(())
    } else {
        Err(invalid(context, format!("{field} must be a string")))
    }
}

fn require_messages<'a>(context: &str, obj: &'a Map<String, Value>) -> Result<&'a Vec<Value>> {
    match obj.get("messages").and_then(Value::as_array) {
        Some(messages) if !messages.is_empty() => Ok(messages),
        _ => Err(invalid(context, "messages must be a non-empty array")),
    }
}

fn typed<T: DeserializeOwned>(context: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| invalid(context, e.to_string()))
}

fn invalid(context: &str, issue: impl Into<String>) -> GatewayError {
    let issue = issue.into();
    tracing::warn!(context, issue = %issue, "Invalid request payload");
    GatewayError::validation(issue)
}
