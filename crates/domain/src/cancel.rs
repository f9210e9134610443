//! Cooperative cancellation.
//!
//! Every external operation in the runtime accepts a [`CancelToken`].
//! Cancellation is observed at suspension points: transports, LLM adapters,
//! and the agent loop `select!` on the token and unwind with
//! `Error::Cancelled`. Child tokens give the facade -> agent -> tool call ->
//! transport cascade: cancelling a parent cancels every child, while a
//! child can be cancelled alone.

use tokio_util::sync::CancellationToken;

/// A cloneable cancellation token.
///
/// Clones share state; [`CancelToken::child`] creates a token that is
/// cancelled when its parent is, but not vice versa.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// A token cancelled together with (or independently of) this one.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}
