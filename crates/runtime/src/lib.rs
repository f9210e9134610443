//! `maestro-runtime` — agent execution and workflow orchestration.
//!
//! The [`agent`] module runs the bounded tool-use loop against an LLM
//! adapter and the MCP host. [`sequential`] chains agents, [`custom`]
//! hosts registered user workflows, and [`facade::ExecutionFacade`] is the
//! single dispatch surface embedding applications call into.

pub mod agent;
pub mod cancel;
pub mod custom;
pub mod facade;
pub mod sequential;

pub use agent::{AgentDeps, AgentResult, AgentStatus};
pub use cancel::CancelMap;
pub use custom::{CustomWorkflow, WorkflowRegistry};
pub use facade::ExecutionFacade;
pub use sequential::{StepSummary, WorkflowResult, WorkflowStatus};
