use crate::{
    Error, Result,
    lock::{LockService, LockToken},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::{sync::Notify, time::Instant};

#[derive(Default)]
struct Held {
    by_name: HashMap<String, u64>,
    last_fence: u64,
}

/// An in-process [`LockService`] for single-node deployments and tests.
///
/// Waiters park on a shared [`Notify`] and re-check on every release, giving
/// up once their deadline passes.
#[derive(Default)]
pub struct LocalLockService {
    held: Mutex<Held>,
    released: Notify,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.held.lock().by_name.contains_key(name)
    }

    fn try_lock(&self, name: &str) -> Option<LockToken> {
        let mut held = self.held.lock();
        if held.by_name.contains_key(name) {
            return None;
        }
        held.last_fence += 1;
        let fence = held.last_fence;
        held.by_name.insert(name.to_owned(), fence);
        Some(LockToken::new(name, fence))
    }
}

impl LockService for LocalLockService {
    async fn lock(&self, name: &str, timeout: Duration) -> Result<LockToken> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a release between the
            // check and the wait is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = self.try_lock(name) {
                return Ok(token);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!(lock = name, ?timeout, "lock wait timed out");
                return Err(Error::LockTimeout {
                    lock: name.to_owned(),
                });
            }
        }
    }

    async fn unlock(&self, token: LockToken) -> Result<()> {
        {
            let mut held = self.held.lock();
            match held.by_name.get(token.name()) {
                Some(fence) if *fence == token.fence() => {
                    held.by_name.remove(token.name());
                }
                _ => {
                    return Err(Error::Lock {
                        context: format!(
                            "'{}' is not held with fence {}",
                            token.name(),
                            token.fence()
                        ),
                    });
                }
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn fences_increase_per_acquisition() {
        let locks = LocalLockService::new();
        let a = locks.lock("p", WAIT).await.unwrap();
        locks.unlock(a.clone()).await.unwrap();
        let b = locks.lock("p", WAIT).await.unwrap();
        assert!(b.fence() > a.fence());
    }

    #[tokio::test]
    async fn held_lock_times_out() {
        let locks = LocalLockService::new();
        let _held = locks.lock("p", WAIT).await.unwrap();

        let err = locks.lock("p", WAIT).await.unwrap_err();
        assert_eq!(err, Error::LockTimeout { lock: "p".into() });
        // Unrelated names are independent.
        assert!(locks.lock("q", WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let locks = Arc::new(LocalLockService::new());
        let held = locks.lock("p", WAIT).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock("p", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        locks.unlock(held).await.unwrap();

        let token = waiter.await.unwrap().unwrap();
        assert_eq!(token.name(), "p");
        assert!(locks.is_locked("p"));
    }

    #[tokio::test]
    async fn stale_token_cannot_unlock() {
        let locks = LocalLockService::new();
        let first = locks.lock("p", WAIT).await.unwrap();
        locks.unlock(first.clone()).await.unwrap();
        let _second = locks.lock("p", WAIT).await.unwrap();

        assert!(matches!(locks.unlock(first).await, Err(Error::Lock { .. })));
        assert!(locks.is_locked("p"));
    }
}
