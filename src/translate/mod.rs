//! API translation between the Anthropic Messages and Chat Completions formats.
//!
//! The core of the gateway: converts requests, responses, and streaming events
//! between the two API formats. All translation functions are pure (no I/O).

pub mod anthropic_types;
pub mod count;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

pub use count::estimate_input_tokens;
pub use request::anthropic_to_openai;
pub use response::openai_to_anthropic;
pub use streaming::StreamTranslator;
