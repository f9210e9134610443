//! Session lifecycle and ownership.
//!
//! Each session is an actor: one owning task holds the transport and serves
//! request/shutdown commands sent over an mpsc channel. Teardown happens
//! only inside that task; no other component ever calls `close()` on a
//! transport it did not open. Everyone else holds a cloneable
//! [`SessionHandle`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use maestro_domain::cancel::CancelToken;

use crate::protocol::JsonRpcResponse;
use crate::transport::{McpTransport, TransportError};

/// Observable lifecycle of a session. Transitions are one-way; any error
/// during `Initializing` goes straight to `Terminated`, never `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Proposed,
    Initializing,
    Ready,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Proposed => "proposed",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::ShuttingDown => "shutting_down",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

pub(crate) enum SessionCommand {
    Request {
        method: String,
        params: Option<Value>,
        cancel: CancelToken,
        reply: oneshot::Sender<Result<JsonRpcResponse, TransportError>>,
    },
    Notify {
        method: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A cheap, cloneable handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Issue a request through the owning task.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Request {
                method: method.to_owned(),
                params,
                cancel: cancel.clone(),
                reply: tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Send a notification through the owning task.
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Notify {
                method: method.to_owned(),
                reply: tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Ask the owning task to close the transport, and wait for it.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Spawn the owning task for a session and hand back its handle.
pub(crate) fn spawn_session(
    session_id: String,
    transport: Box<dyn McpTransport>,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(32);
    let transport: Arc<dyn McpTransport> = Arc::from(transport);
    tokio::spawn(session_task(session_id.clone(), transport, rx));
    SessionHandle {
        session_id,
        commands: tx,
    }
}

/// The owning task. Requests run concurrently (the transport correlates
/// them by id); `close()` is only ever called from here.
async fn session_task(
    session_id: String,
    transport: Arc<dyn McpTransport>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            SessionCommand::Request {
                method,
                params,
                cancel,
                reply,
            } => {
                let transport = transport.clone();
                tokio::spawn(async move {
                    let result = transport.request(&method, params, &cancel).await;
                    let _ = reply.send(result);
                });
            }
            SessionCommand::Notify { method, reply } => {
                let transport = transport.clone();
                tokio::spawn(async move {
                    let _ = reply.send(transport.notify(&method).await);
                });
            }
            SessionCommand::Shutdown { reply } => {
                transport.close().await;
                let _ = reply.send(());
                break;
            }
        }
    }
    // All handles dropped without an explicit shutdown: still our job to
    // close the transport we own.
    if transport.is_open() {
        transport.close().await;
    }
    tracing::debug!(session_id = %session_id, "session task exited");
}
