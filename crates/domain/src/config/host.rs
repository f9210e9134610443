use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// MCP host settings. Injected at construction; there is no process-wide
/// mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Bounded wait for session teardown during shutdown, milliseconds.
    #[serde(default = "d_5000")]
    pub shutdown_grace_ms: u64,

    /// Whether sessions may be registered after host start.
    #[serde(default = "d_true")]
    pub allow_dynamic_registration: bool,

    /// Root directory custom workflow modules must resolve under.
    #[serde(default = "d_dot")]
    pub project_root: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5_000,
            allow_dynamic_registration: true,
            project_root: PathBuf::from("."),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5000() -> u64 {
    5_000
}
fn d_true() -> bool {
    true
}
fn d_dot() -> PathBuf {
    PathBuf::from(".")
}
