use crate::clock::Clock;
use crate::replica::{
    AwaitReplicationError, AwaitReplicationInput, Coordinator, CoordinatorStatus, FinishRollbackInput, FreezeError,
    HeartbeatError, HeartbeatInput, HeartbeatOutput, HeartbeatResponseFromPeer, HeartbeatTick, InitiateError,
    InitiateInput, MaintenanceModeError, MemberState, MemberStateError, PrepareWriteError, ReadConcernError,
    ReplSetMetadata, RequestVotesError, RequestVotesInput, RequestVotesOutput, SnapshotName, StateChangeListener,
    StepDownError, StepDownInput, UpdatePositionError, UpdatePositionInput, UpdateTermError, VoteResponseFromPeer,
    WaitUntilOpTimeInput,
};
use crate::types::{OpTime, OperationContext, Term};
use std::error::Error;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[cfg(test)]
pub(crate) mod test_utils;

const ACTOR_DEAD: &str = "Coordinator event loop actor is dead. WTF!!";
const CALLBACK_DROPPED: &str = "Coordinator event loop actor dropped our channel. WTF!";

// Design choice: every piece of coordinator state is owned by one task. Anything slow (RPCs,
// sleeps, waits for replication) happens elsewhere and reports back as an event.
#[derive(Debug)]
pub(crate) enum Event {
    // Client requests.
    LoadLocalConfig(Callback<(), InitiateError>),
    Initiate(InitiateInput, Callback<(), InitiateError>),
    SetFollowerMode(MemberState, Callback<(), MemberStateError>),
    InitialSyncComplete(Callback<(), MemberStateError>),
    DrainComplete(Reply<()>),
    Status(Reply<CoordinatorStatus>),
    StateListener(Reply<StateChangeListener>),
    UpdateTerm(Term, Callback<(), UpdateTermError>),
    StepDown(StepDownInput, Callback<(), StepDownError>),
    Freeze(Duration, Callback<(), FreezeError>),
    SetMaintenanceMode(bool, Callback<(), MaintenanceModeError>),
    SetMyLastApplied(OpTime, Reply<()>),
    SetMyLastDurable(OpTime, Reply<()>),
    PrepareWrite(Callback<OpTime, PrepareWriteError>),
    AwaitReplication(AwaitReplicationInput, Callback<(), AwaitReplicationError>),
    WaitUntilOpTime(WaitUntilOpTimeInput, Callback<(), ReadConcernError>),
    ReserveSnapshotName(Reply<SnapshotName>),
    CreateSnapshot(OpTime, SnapshotName, Reply<()>),
    DropAllSnapshots(Reply<()>),
    BeginRollback(Callback<(), MemberStateError>),
    FinishRollback(FinishRollbackInput, Callback<(), MemberStateError>),
    Shutdown(Reply<()>),

    // Peer requests.
    Heartbeat(HeartbeatInput, Callback<HeartbeatOutput, HeartbeatError>),
    RequestVotes(RequestVotesInput, Callback<RequestVotesOutput, RequestVotesError>),
    UpdatePosition(UpdatePositionInput, Callback<(), UpdatePositionError>),
    ProcessMetadata(ReplSetMetadata),
    Metadata(Reply<ReplSetMetadata>),

    // Replies from peers to requests we sent.
    HeartbeatResponse(HeartbeatResponseFromPeer),
    VoteResponse(VoteResponseFromPeer),

    // Timers.
    ElectionTimeout,
    HeartbeatTick(HeartbeatTick),
    LivenessTimeout(i64),
    StepDownDeadline(u64),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }

    /// The requester gave up waiting, e.g. on timeout or interrupt.
    pub(crate) fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug)]
pub(crate) struct Reply<O: Debug>(oneshot::Sender<O>);

impl<O: Debug> Reply<O> {
    pub(crate) fn send(self, message: O) {
        let _ = self.0.send(message);
    }
}

/// CoordinatorClient is the handle every other component uses to talk to the coordinator.
#[derive(Clone)]
pub struct CoordinatorClient {
    sender: Arc<mpsc::Sender<Event>>,
}

/// WeakCoordinatorClient doesn't keep the coordinator alive. Timers and in-flight RPC tasks hold
/// one so they stop once every strong client is gone.
#[derive(Clone)]
pub struct WeakCoordinatorClient {
    sender: Weak<mpsc::Sender<Event>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("coordinator has exited")]
pub struct ActorExited;

impl CoordinatorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (CoordinatorClient { sender: Arc::new(tx) }, rx)
    }

    pub fn weak(&self) -> WeakCoordinatorClient {
        WeakCoordinatorClient {
            sender: Arc::downgrade(&self.sender),
        }
    }

    pub async fn load_local_config(&self) -> Result<(), InitiateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::LoadLocalConfig(Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn initiate(&self, input: InitiateInput) -> Result<(), InitiateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Initiate(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn set_follower_mode(&self, state: MemberState) -> Result<(), MemberStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::SetFollowerMode(state, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn signal_initial_sync_complete(&self) -> Result<(), MemberStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::InitialSyncComplete(Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn signal_drain_complete(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::DrainComplete(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Status(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn state_listener(&self) -> StateChangeListener {
        let (tx, rx) = oneshot::channel();
        self.send(Event::StateListener(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    /// Resolves once the node reports `state`, or None after `timeout`.
    pub async fn wait_for_member_state(&self, state: MemberState, timeout: Duration) -> Option<MemberState> {
        let mut listener = self.state_listener().await;
        tokio::time::timeout(timeout, listener.wait_for(|s| s.state == state))
            .await
            .ok()
            .flatten()
            .map(|s| s.state)
    }

    /// Resolves once the node is a primary that accepts writes, or false after `timeout`.
    pub async fn wait_for_drain_finish(&self, timeout: Duration) -> bool {
        let mut listener = self.state_listener().await;
        tokio::time::timeout(
            timeout,
            listener.wait_for(|s| s.state == MemberState::Primary && !s.is_draining),
        )
        .await
        .ok()
        .flatten()
        .is_some()
    }

    pub async fn update_term(&self, term: Term) -> Result<(), UpdateTermError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::UpdateTerm(term, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn step_down(&self, input: StepDownInput) -> Result<(), StepDownError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::StepDown(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn freeze(&self, duration: Duration) -> Result<(), FreezeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Freeze(duration, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn set_maintenance_mode(&self, activate: bool) -> Result<(), MaintenanceModeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::SetMaintenanceMode(activate, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    /// Only ever moves the node's applied optime forward.
    pub async fn set_my_last_applied_forward(&self, op_time: OpTime) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::SetMyLastApplied(op_time, Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn set_my_last_durable_forward(&self, op_time: OpTime) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::SetMyLastDurable(op_time, Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    /// Reserves the optime of the next write. Fails unless this node is a primary that has
    /// finished draining.
    pub async fn prepare_write(&self) -> Result<OpTime, PrepareWriteError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::PrepareWrite(Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    /// Blocks until the write concern is satisfied for `input.op_time`. The wait is abandoned
    /// when `ctx` is interrupted or reaches its deadline, or when `wtimeout` elapses.
    pub async fn await_replication(
        &self,
        ctx: &OperationContext,
        input: AwaitReplicationInput,
    ) -> Result<(), AwaitReplicationError> {
        ctx.check_for_interrupt().map_err(AwaitReplicationError::from)?;
        let w_timeout = input.write_concern.w_timeout;
        let (tx, rx) = oneshot::channel();
        self.send(Event::AwaitReplication(input, Callback(tx))).await;

        tokio::select! {
            result = rx => result.expect(CALLBACK_DROPPED),
            _ = ctx.killed() => Err(AwaitReplicationError::Interrupted),
            _ = sleep_for(w_timeout) => Err(AwaitReplicationError::WriteConcernFailed),
            _ = sleep_until(ctx.deadline()) => Err(AwaitReplicationError::ExceededTimeLimit),
        }
    }

    /// Blocks until a read at `input.level` would observe `input.op_time`.
    pub async fn wait_until_op_time(
        &self,
        ctx: &OperationContext,
        input: WaitUntilOpTimeInput,
    ) -> Result<(), ReadConcernError> {
        ctx.check_for_interrupt().map_err(ReadConcernError::from)?;
        let (tx, rx) = oneshot::channel();
        self.send(Event::WaitUntilOpTime(input, Callback(tx))).await;

        tokio::select! {
            result = rx => result.expect(CALLBACK_DROPPED),
            _ = ctx.killed() => Err(ReadConcernError::Interrupted),
            _ = sleep_until(ctx.deadline()) => Err(ReadConcernError::ExceededTimeLimit),
        }
    }

    pub async fn reserve_snapshot_name(&self) -> SnapshotName {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ReserveSnapshotName(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn create_snapshot(&self, op_time: OpTime, name: SnapshotName) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::CreateSnapshot(op_time, name, Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn drop_all_snapshots(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::DropAllSnapshots(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn begin_rollback(&self) -> Result<(), MemberStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::BeginRollback(Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn finish_rollback(&self, input: FinishRollbackInput) -> Result<(), MemberStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::FinishRollback(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Shutdown(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn heartbeat(&self, input: HeartbeatInput) -> Result<HeartbeatOutput, HeartbeatError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Heartbeat(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn request_votes(&self, input: RequestVotesInput) -> Result<RequestVotesOutput, RequestVotesError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RequestVotes(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn update_position(&self, input: UpdatePositionInput) -> Result<(), UpdatePositionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::UpdatePosition(input, Callback(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    pub async fn process_metadata(&self, metadata: ReplSetMetadata) {
        self.send(Event::ProcessMetadata(metadata)).await;
    }

    pub async fn metadata(&self) -> ReplSetMetadata {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Metadata(Reply(tx))).await;
        rx.await.expect(CALLBACK_DROPPED)
    }

    async fn send(&self, event: Event) {
        self.sender.send(event).await.expect(ACTOR_DEAD);
    }
}

impl WeakCoordinatorClient {
    pub fn upgrade(&self) -> Option<CoordinatorClient> {
        self.sender.upgrade().map(|sender| CoordinatorClient { sender })
    }

    pub(crate) async fn election_timeout(&self) -> Result<(), ActorExited> {
        self.send(Event::ElectionTimeout).await
    }

    pub(crate) async fn heartbeat_tick(&self, tick: HeartbeatTick) -> Result<(), ActorExited> {
        self.send(Event::HeartbeatTick(tick)).await
    }

    pub(crate) async fn liveness_timeout(&self, member_id: i64) -> Result<(), ActorExited> {
        self.send(Event::LivenessTimeout(member_id)).await
    }

    pub(crate) async fn step_down_deadline(&self, waiter_id: u64) -> Result<(), ActorExited> {
        self.send(Event::StepDownDeadline(waiter_id)).await
    }

    pub(crate) async fn heartbeat_response(&self, response: HeartbeatResponseFromPeer) -> Result<(), ActorExited> {
        self.send(Event::HeartbeatResponse(response)).await
    }

    pub(crate) async fn vote_response(&self, response: VoteResponseFromPeer) -> Result<(), ActorExited> {
        self.send(Event::VoteResponse(response)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        // Clone the sender out of the Arc so a strong client isn't kept alive across the await.
        let sender = match self.sender.upgrade() {
            Some(sender) => mpsc::Sender::clone(&sender),
            None => return Err(ActorExited),
        };
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// CoordinatorActor is the coordinator in actor model.
pub struct CoordinatorActor<C: Clock> {
    receiver: mpsc::Receiver<Event>,
    coordinator: Coordinator<C>,
}

impl<C: Clock> CoordinatorActor<C> {
    pub(crate) fn new(receiver: mpsc::Receiver<Event>, coordinator: Coordinator<C>) -> Self {
        CoordinatorActor { receiver, coordinator }
    }

    pub async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
            self.coordinator.publish_state();
        }
    }

    // This must NOT be async. Any long running work must be spawned on another task and come
    // back as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        let c = &mut self.coordinator;
        match event {
            Event::LoadLocalConfig(callback) => callback.send(c.handle_load_local_config()),
            Event::Initiate(input, callback) => callback.send(c.handle_initiate(input)),
            Event::SetFollowerMode(state, callback) => callback.send(c.handle_set_follower_mode(state)),
            Event::InitialSyncComplete(callback) => callback.send(c.handle_initial_sync_complete()),
            Event::DrainComplete(reply) => reply.send(c.handle_drain_complete()),
            Event::Status(reply) => reply.send(c.status()),
            Event::StateListener(reply) => reply.send(c.state_listener()),
            Event::UpdateTerm(term, callback) => callback.send(c.handle_update_term(term)),
            Event::StepDown(input, callback) => c.handle_step_down(input, callback),
            Event::Freeze(duration, callback) => callback.send(c.handle_freeze(duration)),
            Event::SetMaintenanceMode(activate, callback) => callback.send(c.handle_set_maintenance_mode(activate)),
            Event::SetMyLastApplied(op_time, reply) => reply.send(c.handle_set_my_last_applied(op_time)),
            Event::SetMyLastDurable(op_time, reply) => reply.send(c.handle_set_my_last_durable(op_time)),
            Event::PrepareWrite(callback) => callback.send(c.handle_prepare_write()),
            Event::AwaitReplication(input, callback) => c.handle_await_replication(input, callback),
            Event::WaitUntilOpTime(input, callback) => c.handle_wait_until_op_time(input, callback),
            Event::ReserveSnapshotName(reply) => reply.send(c.handle_reserve_snapshot_name()),
            Event::CreateSnapshot(op_time, name, reply) => reply.send(c.handle_create_snapshot(op_time, name)),
            Event::DropAllSnapshots(reply) => reply.send(c.handle_drop_all_snapshots()),
            Event::BeginRollback(callback) => callback.send(c.handle_begin_rollback()),
            Event::FinishRollback(input, callback) => callback.send(c.handle_finish_rollback(input)),
            Event::Shutdown(reply) => reply.send(c.handle_shutdown()),
            Event::Heartbeat(input, callback) => callback.send(c.handle_heartbeat(input)),
            Event::RequestVotes(input, callback) => callback.send(c.handle_request_votes(input)),
            Event::UpdatePosition(input, callback) => callback.send(c.handle_update_position(input)),
            Event::ProcessMetadata(metadata) => c.handle_process_metadata(metadata),
            Event::Metadata(reply) => reply.send(c.metadata()),
            Event::HeartbeatResponse(response) => c.handle_heartbeat_response(response),
            Event::VoteResponse(response) => c.handle_vote_response(response),
            Event::ElectionTimeout => c.handle_election_timeout(),
            Event::HeartbeatTick(tick) => c.handle_heartbeat_tick(tick),
            Event::LivenessTimeout(member_id) => c.handle_liveness_timeout(member_id),
            Event::StepDownDeadline(waiter_id) => c.handle_step_down_deadline(waiter_id),
        }
    }
}
