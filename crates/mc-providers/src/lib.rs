//! mc-providers: LLM provider implementations for mcpchat
//!
//! The built-in agent drives an Anthropic Messages API model over SSE.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
