//! `maestro-providers` — LLM adapters for maestro.
//!
//! One [`LlmProvider`] trait, implemented by wire-format adapters
//! (OpenAI-compatible, Anthropic Messages). Adapters translate between the
//! canonical message/tool-call types in `maestro-domain` and each
//! provider's HTTP API, and are registered by tag in [`ProviderRegistry`].

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
mod sse;
pub mod traits;

pub use registry::{ProviderInitError, ProviderRegistry};
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
