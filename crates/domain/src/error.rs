/// Shared error type used across all maestro crates.
///
/// Lower layers define their own error enums (e.g. the transport errors in
/// the MCP host crate) and convert into this taxonomy at the boundary, so
/// callers of the execution facade see one coherent set of kinds.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ── Lookup / input ─────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    // ── Session / transport ────────────────────────────────────────
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("protocol: {0}")]
    Protocol(String),

    /// An in-flight operation was aborted by session teardown.
    #[error("session {session_id}: {message}")]
    SessionTransport { session_id: String, message: String },

    // ── Dispatch ───────────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool '{tool}' is ambiguous, provided by sessions {providers:?}")]
    ToolAmbiguous {
        tool: String,
        providers: Vec<String>,
    },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    // ── LLM / agent ────────────────────────────────────────────────
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("response schema validation failed: {0}")]
    SchemaValidation(String),

    // ── Deadlines / aborts ─────────────────────────────────────────
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    // ── Ambient ────────────────────────────────────────────────────
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind tag, carried on facade results.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation_error",
            Error::PolicyViolation(_) => "policy_violation",
            Error::TransportUnavailable(_) => "transport_unavailable",
            Error::TransportClosed => "transport_closed",
            Error::Protocol(_) => "protocol_error",
            Error::SessionTransport { .. } => "session_transport_error",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolAmbiguous { .. } => "tool_ambiguous",
            Error::AccessDenied(_) => "access_denied",
            Error::ToolExecution(_) => "tool_execution_error",
            Error::Provider { .. } => "llm_provider_error",
            Error::SchemaValidation(_) => "schema_validation_failed",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
        }
    }
}
