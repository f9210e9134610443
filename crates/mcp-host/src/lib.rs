//! `maestro-mcp` — MCP (Model Context Protocol) host for maestro.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for talking to MCP servers.
//! - Stdio and HTTP-stream transports with id-correlated, out-of-order-safe
//!   request dispatch.
//! - A per-session actor that owns its transport; teardown only ever
//!   happens inside the owning task.
//! - A routing table mapping components to providing sessions with
//!   deterministic weight ordering.
//! - Registration- and request-time filtering, resource root validation.
//! - [`McpHost`], which supervises the whole session fleet.
//!
//! # Usage
//!
//! ```rust,ignore
//! use maestro_mcp::McpHost;
//!
//! let host = McpHost::new(host_config);
//! let report = host.start(session_specs).await;
//! for (id, err) in &report.failed {
//!     eprintln!("session {id} failed: {err}");
//! }
//!
//! let result = host.call_tool(&tool_call, &agent_cfg, false, &cancel).await?;
//! host.shutdown().await;
//! ```

pub mod filter;
pub mod host;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod roots;
pub mod router;
pub mod session;
pub mod tools;
pub mod transport;

// Re-exports for convenience.
pub use filter::FilteringManager;
pub use host::{McpError, McpHost, ShutdownReport, StartReport};
pub use protocol::{McpToolDef, PromptDef, ResourceDef};
pub use router::{ComponentKind, MessageRouter};
pub use session::{SessionHandle, SessionState};
pub use transport::{McpTransport, TransportError};
