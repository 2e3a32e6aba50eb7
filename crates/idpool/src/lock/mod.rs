//! Named mutual exclusion across cluster members.

mod local;

pub use local::*;

use crate::Result;
use core::time::Duration;
use std::sync::Arc;

/// Proof of holding a named lock.
///
/// The fencing number increases with every successful acquisition, so a
/// stale holder can be told apart from the current one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken {
    name: String,
    fence: u64,
}

impl LockToken {
    pub fn new(name: impl Into<String>, fence: u64) -> Self {
        Self {
            name: name.into(),
            fence,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn fence(&self) -> u64 {
        self.fence
    }
}

pub trait LockService: Send + Sync {
    /// Blocks until `name` is acquired, failing with
    /// [`Error::LockTimeout`](crate::Error::LockTimeout) once `timeout`
    /// elapses.
    fn lock(&self, name: &str, timeout: Duration)
    -> impl Future<Output = Result<LockToken>> + Send;

    fn unlock(&self, token: LockToken) -> impl Future<Output = Result<()>> + Send;
}

/// Locks taken by one critical section, released in reverse order.
///
/// [`HeldLocks::release`] is the normal exit. If the guard is dropped
/// while still holding tokens (the owning future was cancelled), the unlocks
/// are spawned on the current Tokio runtime instead.
pub(crate) struct HeldLocks<L: LockService + 'static> {
    locks: Arc<L>,
    tokens: Vec<LockToken>,
}

impl<L: LockService + 'static> HeldLocks<L> {
    pub(crate) const fn new(locks: Arc<L>) -> Self {
        Self {
            locks,
            tokens: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, token: LockToken) {
        self.tokens.push(token);
    }

    pub(crate) async fn release(mut self) {
        let tokens = core::mem::take(&mut self.tokens);
        unlock_all(&self.locks, tokens).await;
    }
}

impl<L: LockService + 'static> Drop for HeldLocks<L> {
    fn drop(&mut self) {
        if self.tokens.is_empty() {
            return;
        }
        let tokens = core::mem::take(&mut self.tokens);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let locks = Arc::clone(&self.locks);
                handle.spawn(async move { unlock_all(&locks, tokens).await });
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(?tokens, "dropped held locks outside a runtime: {_e}");
            }
        }
    }
}

async fn unlock_all<L: LockService>(locks: &L, tokens: Vec<LockToken>) {
    for token in tokens.into_iter().rev() {
        if let Err(_e) = locks.unlock(token).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("failed to unlock: {_e}");
        }
    }
}

impl<L: LockService + ?Sized> LockService for Arc<L> {
    fn lock(
        &self,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<LockToken>> + Send {
        (**self).lock(name, timeout)
    }

    fn unlock(&self, token: LockToken) -> impl Future<Output = Result<()>> + Send {
        (**self).unlock(token)
    }
}
