use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A workflow definition. The executor set is closed: either an ordered
/// agent chain or a registered custom implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowConfig {
    /// Run the named agents in order, piping each final text forward.
    Sequential { name: String, steps: Vec<String> },

    /// User-supplied code, registered under `class_name` and anchored to a
    /// module file that must live under the project root.
    Custom {
        name: String,
        module_path: PathBuf,
        class_name: String,
    },
}

impl WorkflowConfig {
    pub fn name(&self) -> &str {
        match self {
            WorkflowConfig::Sequential { name, .. } => name,
            WorkflowConfig::Custom { name, .. } => name,
        }
    }
}
