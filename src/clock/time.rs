use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// Every deadline in the crate is computed from and awaited on a Clock, so tests can swap in a
/// MockClock and step time by hand.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Tokio's clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

struct MockTime {
    now: Mutex<Instant>,
    moved: Notify,
}

#[allow(dead_code)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let started_at = Instant::now();
    let time = Arc::new(MockTime {
        now: Mutex::new(started_at),
        moved: Notify::new(),
    });

    (MockClock { time: time.clone() }, MockClockController { time, started_at })
}

/// MockClock reads a shared instant that only its controller moves. Sleepers whose controller
/// is gone never wake.
#[allow(dead_code)]
#[derive(Clone)]
pub(crate) struct MockClock {
    time: Arc<MockTime>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.time.now.lock()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            // Register before reading the time so an advance in between still wakes us.
            let moved = self.time.moved.notified();
            if self.now() >= deadline {
                return;
            }
            moved.await;
        }
    }
}

#[allow(dead_code)]
pub(crate) struct MockClockController {
    time: Arc<MockTime>,
    started_at: Instant,
}

#[allow(dead_code)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.time.now.lock()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.started_at
    }

    /// Jumps straight to `now + duration`. A sleeper whose deadline falls inside the jump wakes
    /// at the end of it, so step in increments finer than what the test observes.
    pub(crate) fn advance(&mut self, duration: Duration) {
        *self.time.now.lock() += duration;
        self.time.moved.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn past_deadline_returns_without_advancing() {
        let (mut clock, controller) = mocked_clock();
        let start = controller.current_time();

        tokio::time::timeout(Duration::from_secs(1), clock.sleep_until(start))
            .await
            .expect("deadline already reached");
        assert_eq!(controller.elapsed_time(), Duration::from_secs(0));
    }

    #[tokio::test]
    async fn deadline_fires_only_once_reached() {
        // -- setup --
        let (mut clock, mut controller) = mocked_clock();
        let deadline = controller.current_time() + Duration::from_secs(20);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            tx.send(clock.now()).expect("receiver shouldn't drop");
        });

        // -- execute --
        controller.advance(Duration::from_secs(19));
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("Expected timeout");
        controller.advance(Duration::from_secs(1));

        // -- verify --
        assert_eq!(rx.recv().await, Some(deadline));
    }

    #[tokio::test]
    async fn clones_share_one_timeline() {
        let (clock, mut controller) = mocked_clock();
        let other = clock.clone();

        controller.advance(Duration::from_millis(1500));

        assert_eq!(clock.now(), other.now());
        assert_eq!(controller.elapsed_time(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn dropped_controller_freezes_sleepers() {
        let (mut clock, controller) = mocked_clock();
        let deadline = controller.current_time() + Duration::from_secs(1);
        drop(controller);

        let result = tokio::time::timeout(Duration::from_millis(20), clock.sleep_until(deadline)).await;

        assert!(result.is_err());
    }
}
