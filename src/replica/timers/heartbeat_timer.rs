use crate::actor::WeakCoordinatorClient;
use crate::clock::{Clock, RealClock, SharedOption};
use crate::replica::HeartbeatTick;
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};

/// HeartbeatTimerHandle paces the heartbeats this node sends one member. Dropping it stops them.
pub(crate) struct HeartbeatTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_interval: Duration,
    next_heartbeat_time: SharedOption<Instant>,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    next_heartbeat_time: SharedOption<Instant>,
    actor_client: WeakCoordinatorClient,
    event: HeartbeatTick,
    clock: C,
}

impl<C: Clock> HeartbeatTimerHandle<C> {
    pub(crate) fn spawn_timer_task(
        heartbeat_interval: Duration,
        actor_client: WeakCoordinatorClient,
        member_id: i64,
        clock: C,
    ) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_interval, actor_client, member_id, clock);
        tokio::task::spawn(task.run());

        handle
    }

    /// Pushes the next tick a full interval out, e.g. after an out-of-band heartbeat.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.shared.reset_heartbeat_timer();
    }
}

impl<C: Clock> Shared<C> {
    fn reset_heartbeat_timer(&self) {
        let new_timeout = self.clock.now() + self.heartbeat_interval;
        self.next_heartbeat_time.replace(new_timeout);
    }
}

impl<C: Clock> HeartbeatTimerTask<C> {
    fn new(
        heartbeat_interval: Duration,
        actor_client: WeakCoordinatorClient,
        member_id: i64,
        clock: C,
    ) -> (Self, HeartbeatTimerHandle<C>) {
        let shared_opt = SharedOption::new();
        let shared = Arc::new(Shared {
            heartbeat_interval,
            next_heartbeat_time: shared_opt.clone(),
            clock: clock.clone(),
        });

        let task = HeartbeatTimerTask {
            weak_shared: Arc::downgrade(&shared),
            next_heartbeat_time: shared_opt,
            actor_client,
            event: HeartbeatTick { member_id },
            clock,
        };
        let handle = HeartbeatTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        // The slot starts empty, so the first tick goes out immediately. A new config or a new
        // member should learn about us without waiting a whole interval.
        loop {
            match self.next_heartbeat_time.take() {
                Some(wake_time) => {
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    if let Some(shared) = self.weak_shared.upgrade() {
                        // Reset after the await so a slow actor doesn't get a burst of ticks.
                        if self.actor_client.heartbeat_tick(self.event.clone()).await.is_err() {
                            return;
                        }
                        shared.reset_heartbeat_timer();
                    } else {
                        // Member left the config or the coordinator shut down.
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::test_utils::TestUtilActor;
    use crate::actor::CoordinatorClient;
    use crate::clock::mocked_clock;

    #[tokio::test]
    async fn heartbeat_timer_handle_lifecycle() {
        // -- setup --
        let interval = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let actor_client = strong_actor_client.weak();
        let mut actor = TestUtilActor::new(rx);
        let expected = HeartbeatTick { member_id: 3 };

        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        // -- execute & verify --

        // 1. Spawn task, the first tick is immediate.
        let (timer_task, timer_handle) = HeartbeatTimerTask::new(interval, actor_client, 3, mock_clock);
        let task_join_handle = tokio::task::spawn(timer_task.run());

        actor.assert_heartbeat_tick_event(expected.clone()).await;
        actor.assert_no_event().await;

        // 2. One tick per interval.
        for _ in 0..5 {
            mock_clock_controller.advance(interval);
            actor.assert_heartbeat_tick_event(expected.clone()).await;
            actor.assert_no_event().await;
        }

        // 3. A big leap still produces a single tick.
        mock_clock_controller.advance(interval * 5);
        actor.assert_heartbeat_tick_event(expected.clone()).await;
        actor.assert_no_event().await;

        // 4. Dropping the handle stops the task.
        drop(timer_handle);
        mock_clock_controller.advance(interval);
        task_join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn heartbeat_timer_handle_reset() {
        // -- setup --
        let interval = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let expected = HeartbeatTick { member_id: 1 };

        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        let (timer_task, timer_handle) =
            HeartbeatTimerTask::new(interval, strong_actor_client.weak(), 1, mock_clock);
        tokio::task::spawn(timer_task.run());
        actor.assert_heartbeat_tick_event(expected.clone()).await;

        // -- execute & verify --
        for _ in 0..5 {
            mock_clock_controller.advance(interval / 2);
            timer_handle.reset_heartbeat_timer();
        }
        actor.assert_no_event().await;

        // Last reset at T=2.5, so nothing at T=3 and a tick at T=3.5.
        mock_clock_controller.advance(interval / 2);
        actor.assert_no_event().await;

        mock_clock_controller.advance(interval / 2);
        actor.assert_heartbeat_tick_event(expected).await;
        assert_eq!(mock_clock_controller.elapsed_time(), interval * 7 / 2);
    }
}
