use crate::actor::{ActorExited, WeakCoordinatorClient};
use crate::clock::{stop_pair, Clock, RealClock, SharedOption, StopGuard, StopToken};
use rand::Rng;
use std::ops::RangeInclusive;
use tokio::time::{Duration, Instant};

/// What a TimeoutTimer reports when nobody reset it in time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TimeoutKind {
    /// No word from a primary in this term; maybe it's time to stand for election.
    Election,
    /// A member hasn't answered a heartbeat or sent a position update; mark it DOWN.
    Liveness(i64),
}

impl TimeoutKind {
    async fn notify(self, actor_client: &WeakCoordinatorClient) -> Result<(), ActorExited> {
        match self {
            TimeoutKind::Election => actor_client.election_timeout().await,
            TimeoutKind::Liveness(member_id) => actor_client.liveness_timeout(member_id).await,
        }
    }
}

pub(crate) struct TimeoutTimerHandle<C: Clock = RealClock> {
    next_wake_time: SharedOption<Instant>,
    timeout_range: RangeInclusive<Duration>,
    clock: C,
    _to_drop: StopGuard,
}

struct TimeoutTimerTask<C: Clock> {
    next_wake_time: SharedOption<Instant>,
    actor_client: WeakCoordinatorClient,
    kind: TimeoutKind,
    clock: C,
    stop: StopToken,
    // Static amount of time this task waits between repeated timeouts while nobody resets it.
    timeout_backoff: Duration,
}

impl<C: Clock> TimeoutTimerHandle<C> {
    pub(crate) fn spawn_timer_task(
        kind: TimeoutKind,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakCoordinatorClient,
        clock: C,
    ) -> Self {
        let (task, handle) = TimeoutTimerTask::new(kind, min_timeout, max_timeout, actor_client, clock);
        tokio::task::spawn(task.run());

        handle
    }

    pub(crate) fn reset_timeout(&self) {
        self.next_wake_time.replace(self.random_wake_time());
    }

    fn random_wake_time(&self) -> Instant {
        let rand_timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        self.clock.now() + rand_timeout
    }
}

impl<C: Clock> TimeoutTimerTask<C> {
    fn new(
        kind: TimeoutKind,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakCoordinatorClient,
        clock: C,
    ) -> (Self, TimeoutTimerHandle<C>) {
        let shared_opt = SharedOption::new();
        let (stop_guard, stop) = stop_pair();

        let task = TimeoutTimerTask {
            next_wake_time: shared_opt.clone(),
            actor_client,
            kind,
            clock: clock.clone(),
            stop,
            timeout_backoff: min_timeout,
        };
        let handle = TimeoutTimerHandle {
            next_wake_time: shared_opt,
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            clock,
            _to_drop: stop_guard,
        };

        // The task must start with a deadline, otherwise it fires right away.
        handle.reset_timeout();

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.next_wake_time.take() {
                Some(wake_time) => {
                    // Someone reset us, sleep until the new deadline.
                    tokio::select! {
                        _ = self.clock.sleep_until(wake_time) => {}
                        _ = self.stop.stopped() => return,
                    }
                }
                None => {
                    // We slept until the deadline and nobody reset it. Keep firing every backoff
                    // until the handle drops, since the coordinator may have ignored the event.
                    if self.stop.is_stopped() || self.kind.notify(&self.actor_client).await.is_err() {
                        return;
                    }
                    tokio::select! {
                        _ = self.clock.sleep(self.timeout_backoff) => {}
                        _ = self.stop.stopped() => return,
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
    async fn timeout_timer_handle_reset_and_timeout() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let actor_client = strong_actor_client.weak();
        let mut actor = TestUtilActor::new(rx);

        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        // -- execute & verify --

        // 1. Spawn task, assert there is no event in the queue.
        let (timer_task, timer_handle) = TimeoutTimerTask::new(
            TimeoutKind::Election,
            // No jitter under test.
            /* min */ timeout,
            /* max */ timeout,
            actor_client,
            mock_clock,
        );
        tokio::task::spawn(timer_task.run());

        actor.assert_no_event().await;

        // 2. Advance time and reset timeout many times, assert no event
        for _ in 0..5 {
            mock_clock_controller.advance(timeout / 2);
            timer_handle.reset_timeout();
        }
        actor.assert_no_event().await;

        // Sanity check T=2.5
        assert_eq!(mock_clock_controller.elapsed_time(), timeout * 5 / 2);

        // 3. No timeout at T < 3.5
        let one_ns = Duration::from_nanos(1);
        mock_clock_controller.advance(timeout - one_ns);
        actor.assert_no_event().await;

        // 4. Timeout at exactly T = 3.5, since the last reset was at T = 2.5.
        mock_clock_controller.advance(one_ns);
        actor.assert_election_timeout_event().await;
    }

    #[tokio::test]
    async fn liveness_timer_keeps_firing_until_reset() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        let (timer_task, timer_handle) = TimeoutTimerTask::new(
            TimeoutKind::Liveness(2),
            timeout,
            timeout,
            strong_actor_client.weak(),
            mock_clock,
        );
        tokio::task::spawn(timer_task.run());

        // -- execute & verify --
        mock_clock_controller.advance(timeout);
        actor.assert_liveness_timeout_event(2).await;
        actor.assert_no_event().await;

        mock_clock_controller.advance(timeout);
        actor.assert_liveness_timeout_event(2).await;

        timer_handle.reset_timeout();
        mock_clock_controller.advance(timeout / 2);
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn timeout_timer_handle_drop() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let actor_client = strong_actor_client.weak();
        let mut actor = TestUtilActor::new(rx);

        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        // -- execute --
        let (timer_task, timer_handle) =
            TimeoutTimerTask::new(TimeoutKind::Election, timeout, timeout, actor_client, mock_clock);
        let task_join_handle = tokio::task::spawn(timer_task.run());
        drop(timer_handle);

        // -- verify --
        // The task would have fired by now. It must exit without sending anything.
        mock_clock_controller.advance(timeout * 2);
        task_join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn timeout_timer_handle_reset_timeout_after_firing() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = CoordinatorClient::new(10);
        let actor_client = strong_actor_client.weak();
        let mut actor = TestUtilActor::new(rx);

        let (mock_clock, mut mock_clock_controller) = mocked_clock();

        let (timer_task, timer_handle) =
            TimeoutTimerTask::new(TimeoutKind::Election, timeout, timeout, actor_client, mock_clock);
        tokio::task::spawn(timer_task.run());
        actor.assert_no_event().await;

        // -- execute --
        // A heartbeat from the primary can already be queued behind the timeout we just fired.
        mock_clock_controller.advance(timeout);
        actor.assert_election_timeout_event().await;
        timer_handle.reset_timeout();

        // -- verify --
        // The task is still running and honours the reset.
        for _ in 0..5 {
            mock_clock_controller.advance(timeout / 2);
            timer_handle.reset_timeout();
        }
        actor.assert_no_event().await;
    }
}
