use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// OperationContext carries the interrupt flag and the optional deadline of one client operation.
/// Clones share the same flag, so a handle held elsewhere can kill an operation blocked in a wait.
#[derive(Clone)]
pub struct OperationContext {
    inner: Arc<Inner>,
}

struct Inner {
    killed: AtomicBool,
    kill_notifier: watch::Sender<bool>,
    kill_listener: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InterruptError {
    #[error("operation was interrupted")]
    Interrupted,
    #[error("operation exceeded time limit")]
    ExceededTimeLimit,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::create(None)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::create(Some(deadline))
    }

    fn create(deadline: Option<Instant>) -> Self {
        let (kill_notifier, kill_listener) = watch::channel(false);
        OperationContext {
            inner: Arc::new(Inner {
                killed: AtomicBool::new(false),
                kill_notifier,
                kill_listener,
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn interrupt(&self) {
        self.inner.killed.store(true, Ordering::Release);
        let _ = self.inner.kill_notifier.send(true);
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }

    pub fn check_for_interrupt(&self) -> Result<(), InterruptError> {
        if self.is_killed() {
            return Err(InterruptError::Interrupted);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(InterruptError::ExceededTimeLimit);
            }
        }

        Ok(())
    }

    /// Resolves once `interrupt()` has been called on any clone.
    pub async fn killed(&self) {
        let mut listener = self.inner.kill_listener.clone();
        loop {
            if *listener.borrow() {
                return;
            }
            if listener.changed().await.is_err() {
                // Sender lives in `inner`, which we're borrowing; this can't happen.
                return;
            }
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn interrupt_wakes_waiter_on_clone() {
        let ctx = OperationContext::new();
        let waiter = ctx.clone();
        let task = tokio::spawn(async move { waiter.killed().await });

        assert_eq!(ctx.check_for_interrupt(), Ok(()));
        ctx.interrupt();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("killed() should resolve")
            .unwrap();
        assert_eq!(ctx.check_for_interrupt(), Err(InterruptError::Interrupted));
    }

    #[test]
    fn deadline_in_the_past_is_exceeded() {
        let ctx = OperationContext::with_deadline(Instant::now());

        assert_eq!(ctx.check_for_interrupt(), Err(InterruptError::ExceededTimeLimit));
    }
}
