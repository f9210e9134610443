//! Custom workflows: user code composed over the facade.
//!
//! Implementations register in a [`WorkflowRegistry`] at process init,
//! keyed by class name. A workflow config additionally names a module
//! file; that path must resolve under the configured project root, and
//! the check runs before any registry lookup. The loaded code runs
//! in-process with the host's trust level.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use maestro_domain::cancel::CancelToken;
use maestro_domain::error::{Error, Result};

use crate::facade::ExecutionFacade;

/// User-supplied workflow code. Receives the facade for composing agents
/// and other workflows.
#[async_trait]
pub trait CustomWorkflow: Send + Sync + std::fmt::Debug {
    async fn run(
        &self,
        input: Value,
        facade: &ExecutionFacade,
        session_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Value>;
}

/// Process-time registry of custom workflow implementations.
pub struct WorkflowRegistry {
    project_root: PathBuf,
    implementations: RwLock<HashMap<String, Arc<dyn CustomWorkflow>>>,
}

impl WorkflowRegistry {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            implementations: RwLock::new(HashMap::new()),
        }
    }

    /// Register an implementation under its class name.
    pub fn register(&self, class_name: &str, implementation: Arc<dyn CustomWorkflow>) {
        tracing::info!(class_name, "registered custom workflow");
        self.implementations
            .write()
            .insert(class_name.to_owned(), implementation);
    }

    /// Resolve a workflow config to its implementation. The module path
    /// policy check happens first; nothing is looked up for an
    /// out-of-root reference.
    pub fn load(&self, module_path: &Path, class_name: &str) -> Result<Arc<dyn CustomWorkflow>> {
        ensure_under_root(&self.project_root, module_path)?;
        self.implementations
            .read()
            .get(class_name)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("custom workflow class '{class_name}' is not registered"))
            })
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.implementations.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Lexically resolve `module` against `root` and require containment.
/// No filesystem access.
fn ensure_under_root(root: &Path, module: &Path) -> Result<()> {
    let violation = || {
        Error::PolicyViolation(format!(
            "module path '{}' resolves outside the project root",
            module.display()
        ))
    };

    let root = lexical_normalize(root).ok_or_else(violation)?;
    let combined = if module.is_absolute() {
        module.to_path_buf()
    } else {
        root.join(module)
    };
    let resolved = lexical_normalize(&combined).ok_or_else(violation)?;

    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(violation())
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb above the path's start.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_inside_root_is_allowed() {
        assert!(ensure_under_root(Path::new("/proj"), Path::new("workflows/x.rs")).is_ok());
    }

    #[test]
    fn parent_escape_is_rejected() {
        let err =
            ensure_under_root(Path::new("/proj"), Path::new("../outside.rs")).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn deep_escape_is_rejected() {
        let err = ensure_under_root(
            Path::new("/proj"),
            Path::new("workflows/../../etc/passwd"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn dotdot_that_stays_inside_is_allowed() {
        assert!(
            ensure_under_root(Path::new("/proj"), Path::new("a/../workflows/x.rs")).is_ok()
        );
    }

    #[test]
    fn absolute_path_inside_root_is_allowed() {
        assert!(ensure_under_root(Path::new("/proj"), Path::new("/proj/wf.rs")).is_ok());
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let err = ensure_under_root(Path::new("/proj"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn registry_rejects_before_lookup() {
        // The class is registered, but the module path escapes: policy
        // wins and the lookup never happens.
        #[derive(Debug)]
        struct Noop;
        #[async_trait]
        impl CustomWorkflow for Noop {
            async fn run(
                &self,
                input: Value,
                _facade: &ExecutionFacade,
                _session_key: Option<&str>,
                _cancel: &CancelToken,
            ) -> Result<Value> {
                Ok(input)
            }
        }

        let registry = WorkflowRegistry::new("/proj");
        registry.register("Noop", Arc::new(Noop));

        let err = registry
            .load(Path::new("../evil.rs"), "Noop")
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));

        assert!(registry.load(Path::new("ok.rs"), "Noop").is_ok());
        assert!(matches!(
            registry.load(Path::new("ok.rs"), "Ghost").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn class_names_sorted() {
        #[derive(Debug)]
        struct Noop;
        #[async_trait]
        impl CustomWorkflow for Noop {
            async fn run(
                &self,
                input: Value,
                _facade: &ExecutionFacade,
                _session_key: Option<&str>,
                _cancel: &CancelToken,
            ) -> Result<Value> {
                Ok(input)
            }
        }
        let registry = WorkflowRegistry::new("/proj");
        registry.register("Zeta", Arc::new(Noop));
        registry.register("Alpha", Arc::new(Noop));
        assert_eq!(registry.class_names(), vec!["Alpha".to_string(), "Zeta".to_string()]);
    }
}
