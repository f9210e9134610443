//! `maestro-domain` — shared value types for the maestro host runtime.
//!
//! Every other crate in the workspace depends on this one. It holds:
//! - The shared [`error::Error`] taxonomy and `Result` alias.
//! - Conversation types: messages, content parts, tool calls and results.
//! - Stream event types for LLM adapters and agent runs.
//! - The cooperative [`cancel::CancelToken`].
//! - Configuration value objects (sessions, agents, LLM configs, workflows).
//!
//! This crate contains no I/O. Configuration structs are already-parsed
//! value objects; reading config files is the embedding application's job.

pub mod cancel;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;

pub use cancel::CancelToken;
pub use error::{Error, Result};
