//! The execution facade — the single dispatch surface.
//!
//! Every run starts here: look up the named config, pick the executor
//! (agent, sequential workflow, or custom workflow), inject the shared
//! dependencies, and map failures into the typed error taxonomy. The
//! facade hands itself to workflows so they can compose further runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use maestro_domain::cancel::CancelToken;
use maestro_domain::config::{AgentConfig, Config, WorkflowConfig};
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::StreamEvent;
use maestro_mcp::McpHost;
use maestro_providers::ProviderRegistry;
use maestro_storage::{HistoryLocks, StorageProvider};

use crate::agent::{self, AgentDeps, AgentResult};
use crate::cancel::CancelMap;
use crate::custom::WorkflowRegistry;
use crate::sequential::{self, WorkflowResult};

/// Single entry point for running agents and workflows.
pub struct ExecutionFacade {
    deps: AgentDeps,
    agents: HashMap<String, AgentConfig>,
    workflows: HashMap<String, WorkflowConfig>,
    custom: Arc<WorkflowRegistry>,
    cancels: CancelMap,
}

impl ExecutionFacade {
    pub fn new(
        config: &Config,
        host: Arc<McpHost>,
        providers: Arc<ProviderRegistry>,
        storage: Option<Arc<dyn StorageProvider>>,
        custom: Arc<WorkflowRegistry>,
    ) -> Self {
        let llm_configs = config
            .llm_configs
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        let agents = config
            .agents
            .iter()
            .map(|a| (a.name.clone(), a.clone()))
            .collect();
        let workflows = config
            .workflows
            .iter()
            .map(|w| (w.name().to_owned(), w.clone()))
            .collect();

        Self {
            deps: AgentDeps {
                host,
                providers,
                llm_configs: Arc::new(llm_configs),
                storage,
                history_locks: Arc::new(HistoryLocks::new()),
            },
            agents,
            workflows,
            custom,
            cancels: CancelMap::new(),
        }
    }

    // ── Agents ─────────────────────────────────────────────────────

    /// Run an agent to completion.
    pub async fn run_agent(
        &self,
        name: &str,
        user_message: &str,
        session_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<AgentResult> {
        let cfg = self.agent_config(name)?;
        validate_message(user_message)?;

        let run_cancel = cancel.child();
        if let Some(key) = session_key {
            self.cancels.insert(key, run_cancel.clone());
        }
        let result = agent::run_agent(&self.deps, cfg, user_message, session_key, &run_cancel).await;
        if let Some(key) = session_key {
            self.cancels.remove(key);
        }
        Ok(result)
    }

    /// Run an agent, streaming events as they happen. The receiver closes
    /// after the terminal `final` or `error` event.
    pub fn stream_agent(
        &self,
        name: &str,
        user_message: &str,
        session_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let cfg = self.agent_config(name)?;
        validate_message(user_message)?;
        Ok(agent::stream_agent(
            &self.deps,
            cfg,
            user_message,
            session_key,
            cancel,
        ))
    }

    // ── Workflows ──────────────────────────────────────────────────

    /// Run a sequential workflow.
    pub async fn run_workflow(
        &self,
        name: &str,
        initial_input: &str,
        session_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<WorkflowResult> {
        match self.workflows.get(name) {
            None => Err(Error::NotFound(format!("workflow '{name}'"))),
            Some(WorkflowConfig::Sequential { steps, .. }) => Ok(sequential::run_sequential(
                self,
                name,
                steps,
                initial_input,
                session_key,
                cancel,
            )
            .await),
            Some(WorkflowConfig::Custom { .. }) => Err(Error::Validation(format!(
                "'{name}' is a custom workflow, use run_custom"
            ))),
        }
    }

    /// Run a custom workflow. Its errors propagate unchanged.
    pub async fn run_custom(
        &self,
        name: &str,
        input: Value,
        session_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Value> {
        match self.workflows.get(name) {
            None => Err(Error::NotFound(format!("workflow '{name}'"))),
            Some(WorkflowConfig::Custom {
                module_path,
                class_name,
                ..
            }) => {
                let implementation = self.custom.load(module_path, class_name)?;
                implementation.run(input, self, session_key, cancel).await
            }
            Some(WorkflowConfig::Sequential { .. }) => Err(Error::Validation(format!(
                "'{name}' is a sequential workflow, use run_workflow"
            ))),
        }
    }

    // ── Control / introspection ────────────────────────────────────

    /// Cancel the keyed run currently in flight, if any.
    pub fn cancel_session(&self, session_key: &str) -> bool {
        self.cancels.cancel(session_key)
    }

    pub fn host(&self) -> &Arc<McpHost> {
        &self.deps.host
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }

    fn agent_config(&self, name: &str) -> Result<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("agent '{name}'")))
    }
}

fn validate_message(user_message: &str) -> Result<()> {
    if user_message.trim().is_empty() {
        return Err(Error::Validation("user message is empty".into()));
    }
    Ok(())
}
