use crate::actor::Event;
use crate::replica::HeartbeatTick;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;

struct TestUtilReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Debug> TestUtilReceiver<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        TestUtilReceiver { rx }
    }

    async fn recv(&mut self) -> T {
        self.recv_with_sanity_timeout().await.expect("Expected value")
    }

    async fn recv_with_sanity_timeout(&mut self) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
    }

    async fn recv_assert_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}

/// TestUtilActor stands in for the coordinator's event loop so timer tests can watch its queue.
pub(crate) struct TestUtilActor {
    receiver: TestUtilReceiver<Event>,
    timeout: Duration,
}

impl TestUtilActor {
    pub(crate) fn new(actor_queue_rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            receiver: TestUtilReceiver::new(actor_queue_rx),
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) async fn assert_heartbeat_tick_event(&mut self, expected: HeartbeatTick) {
        match self.receiver.recv().await {
            Event::HeartbeatTick(event) => assert_eq!(event, expected),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(crate) async fn assert_election_timeout_event(&mut self) {
        match self.receiver.recv().await {
            Event::ElectionTimeout => {}
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(crate) async fn assert_liveness_timeout_event(&mut self, expected_member: i64) {
        match self.receiver.recv().await {
            Event::LivenessTimeout(member_id) => assert_eq!(member_id, expected_member),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(crate) async fn assert_step_down_deadline_event(&mut self) -> u64 {
        match self.receiver.recv().await {
            Event::StepDownDeadline(waiter_id) => waiter_id,
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(crate) async fn assert_no_event(&mut self) {
        self.receiver.recv_assert_timeout(self.timeout).await;
    }
}
