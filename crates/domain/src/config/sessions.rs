//! MCP session specifications.
//!
//! A `SessionSpec` describes one connection to an MCP server: how to reach
//! it (stdio subprocess or HTTP stream), what it claims to offer, and the
//! routing/filtering attributes the host applies to it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for a single MCP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Unique session identifier.
    pub id: String,

    /// Transport kind (`"stdio"` or `"http_stream"`).
    #[serde(default)]
    pub transport: TransportKind,

    /// The command to spawn (stdio transport).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the spawned process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Endpoint URL (http_stream transport).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-request deadline, milliseconds.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,

    /// Routing weight; providers of the same component are ordered by
    /// weight descending, ties by registration order.
    #[serde(default = "d_weight")]
    pub routing_weight: f64,

    /// Declared capability set. Empty = all of tools/prompts/resources.
    #[serde(default)]
    pub capabilities: Vec<CapabilityKind>,

    /// Component names this session may never register (deny list).
    #[serde(default)]
    pub deny_components: Vec<String>,

    /// Permitted URI root prefixes for resource reads.
    /// Empty = resource access is unrestricted for this session.
    #[serde(default)]
    pub roots: Vec<String>,
}

impl SessionSpec {
    /// The capabilities to discover for this session.
    pub fn effective_capabilities(&self) -> Vec<CapabilityKind> {
        if self.capabilities.is_empty() {
            vec![
                CapabilityKind::Tools,
                CapabilityKind::Prompts,
                CapabilityKind::Resources,
            ]
        } else {
            self.capabilities.clone()
        }
    }

    pub fn has_capability(&self, kind: CapabilityKind) -> bool {
        self.capabilities.is_empty() || self.capabilities.contains(&kind)
    }
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Stdio,
    HttpStream,
}

/// The component families an MCP session can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tools,
    Prompts,
    Resources,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_30000() -> u64 {
    30_000
}
fn d_weight() -> f64 {
    1.0
}
