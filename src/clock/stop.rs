use tokio::sync::watch;

/// Hands out a guard and a token. Background tasks hold the token and exit once the guard is
/// dropped or `stop` is called.
pub(crate) fn stop_pair() -> (StopGuard, StopToken) {
    let (tx, rx) = watch::channel(false);

    (StopGuard { tx }, StopToken { rx })
}

pub(crate) struct StopGuard {
    tx: watch::Sender<bool>,
}

impl StopGuard {
    pub(crate) fn stop(self) {}

    pub(crate) fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub(crate) struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the guard is gone.
    pub(crate) async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn every_token_sees_the_stop() {
        let (guard, mut first) = stop_pair();
        let mut second = guard.token();
        assert!(!first.is_stopped());

        guard.stop();

        assert!(first.is_stopped());
        timeout(Duration::from_secs(1), first.stopped()).await.unwrap();
        timeout(Duration::from_secs(1), second.stopped()).await.unwrap();
    }

    #[tokio::test]
    async fn held_guard_keeps_tokens_waiting() {
        let (_guard, mut token) = stop_pair();

        assert!(timeout(Duration::from_millis(20), token.stopped()).await.is_err());
    }
}
