//! Sequential workflows: an ordered list of agents, each step fed the
//! previous step's final text.

use serde::Serialize;

use maestro_domain::cancel::CancelToken;
use maestro_domain::error::Error;

use crate::agent::AgentStatus;
use crate::facade::ExecutionFacade;

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Success,
    Error,
}

/// What one step produced.
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub agent: String,
    pub status: AgentStatus,
    pub final_text: Option<String>,
}

/// The outcome of a workflow run. On failure, summaries of the steps that
/// did complete are preserved.
#[derive(Debug)]
pub struct WorkflowResult {
    pub name: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepSummary>,
    pub final_text: Option<String>,
    /// The failing step's error, when it carried one.
    pub error: Option<Error>,
}

/// Run the steps in order, piping each final text forward. The first
/// failing step fails the workflow immediately.
pub(crate) async fn run_sequential(
    facade: &ExecutionFacade,
    name: &str,
    steps: &[String],
    initial_input: &str,
    session_key: Option<&str>,
    cancel: &CancelToken,
) -> WorkflowResult {
    let mut summaries: Vec<StepSummary> = Vec::new();
    let mut current = initial_input.to_owned();

    for step in steps {
        tracing::debug!(workflow = name, step = %step, "running workflow step");
        let outcome = facade
            .run_agent(step, &current, session_key, &cancel.child())
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                return WorkflowResult {
                    name: name.to_owned(),
                    status: WorkflowStatus::Error,
                    steps: summaries,
                    final_text: None,
                    error: Some(e),
                };
            }
        };

        summaries.push(StepSummary {
            agent: step.clone(),
            status: result.status,
            final_text: result.final_text.clone(),
        });

        if result.status != AgentStatus::Success {
            tracing::warn!(
                workflow = name,
                step = %step,
                status = result.status.as_str(),
                "workflow step did not succeed"
            );
            return WorkflowResult {
                name: name.to_owned(),
                status: WorkflowStatus::Error,
                steps: summaries,
                final_text: None,
                error: result.error,
            };
        }

        match result.final_text {
            Some(text) => current = text,
            None => {
                return WorkflowResult {
                    name: name.to_owned(),
                    status: WorkflowStatus::Error,
                    steps: summaries,
                    final_text: None,
                    error: Some(Error::Validation(format!(
                        "step '{step}' produced no final text"
                    ))),
                };
            }
        }
    }

    WorkflowResult {
        name: name.to_owned(),
        status: WorkflowStatus::Success,
        steps: summaries,
        final_text: Some(current),
        error: None,
    }
}
