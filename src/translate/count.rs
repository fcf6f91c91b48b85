//! Rough input-token estimate for `/v1/messages/count_tokens`.
//!
//! The upstream has no tokenizer endpoint, so the estimate is computed from the
//! translated request: about four characters per token, plus a small fixed
//! overhead per message for role and framing.

use super::openai_types::ChatCompletionRequest;

const CHARS_PER_TOKEN: usize = 4;
const TOKENS_PER_MESSAGE: u64 = 3;

pub fn estimate_input_tokens(req: &ChatCompletionRequest) -> u64 {
    let mut chars = 0usize;
    for message in &req.messages {
        chars += serde_json::to_string(message).map_or(0, |s| s.chars().count());
    }
    if let Some(ref tools) = req.tools {
        chars += serde_json::to_string(tools).map_or(0, |s| s.chars().count());
    }

    chars.div_ceil(CHARS_PER_TOKEN) as u64 + TOKENS_PER_MESSAGE * req.messages.len() as u64
}
