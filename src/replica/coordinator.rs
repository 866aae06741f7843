use crate::actor::{Callback, WeakCoordinatorClient};
use crate::clock::{Clock, RealClock};
use crate::replica::config::{MemberConfig, ReplicaSetConfig};
use crate::replica::local_state::{LastVote, PersistentLocalState};
use crate::replica::member_state::{next_state, IllegalTransition, StateEvent, TransitionContext};
use crate::replica::metadata::ReplSetMetadata;
use crate::replica::network::ReplicationNetwork;
use crate::replica::progress::ProgressMap;
use crate::replica::replica_api::{
    AwaitReplicationError, AwaitReplicationInput, CoordinatorStatus, FinishRollbackInput, FreezeError,
    HeartbeatError, HeartbeatInput, HeartbeatOutput, HeartbeatResponseFromPeer, HeartbeatTick, InitiateError,
    InitiateInput, MaintenanceModeError, MemberStateError, NetworkError, PrepareWriteError, ReadConcernError,
    ReadConcernLevel, RequestVotesError, RequestVotesInput, RequestVotesOutput, StepDownError, StepDownInput,
    UpdatePositionEntry, UpdatePositionError, UpdatePositionInput, UpdateTermError, VoteResponseFromPeer,
    WaitUntilOpTimeInput,
};
use crate::replica::snapshots::{SnapshotManager, SnapshotName};
use crate::replica::state_change_listener::{self, StateChangeListener, StateChangeNotifier, StateSnapshot};
use crate::replica::timers::{HeartbeatTimerHandle, TimeoutKind, TimeoutTimerHandle};
use crate::replica::write_concern::WriteMode;
use crate::replica::MemberState;
use crate::types::{HostAndPort, OpTime, Term, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) struct CoordinatorConfig<C: Clock = RealClock> {
    pub logger: slog::Logger,
    pub self_host: HostAndPort,
    /// The set this node was started for. None accepts whichever set initiates it.
    pub set_name: Option<String>,
    pub local_state: Arc<dyn PersistentLocalState>,
    pub network: Arc<dyn ReplicationNetwork>,
    pub actor_client: WeakCoordinatorClient,
    /// Used when the config doesn't set its own.
    pub default_election_timeout: Duration,
    pub default_heartbeat_interval: Duration,
    /// Upper bound of the random extra election delay, as a fraction of the timeout.
    pub election_timeout_offset_limit: f64,
    pub rpc_timeout: Duration,
    pub clock: C,
}

struct Election {
    id: u64,
    term: Term,
    dry_run: bool,
    granted: HashSet<i64>,
    responded: HashSet<i64>,
}

impl Election {
    fn new(id: u64, term: Term, dry_run: bool, self_id: i64) -> Self {
        let mut granted = HashSet::new();
        granted.insert(self_id);
        let responded = granted.clone();
        Election {
            id,
            term,
            dry_run,
            granted,
            responded,
        }
    }
}

struct ReplicationWaiter {
    input: AwaitReplicationInput,
    callback: Callback<(), AwaitReplicationError>,
}

struct OpTimeWaiter {
    input: WaitUntilOpTimeInput,
    callback: Callback<(), ReadConcernError>,
}

struct StepDownWaiter {
    id: u64,
    force: bool,
    step_down_duration: Duration,
    callback: Callback<(), StepDownError>,
}

/// Coordinator owns the replica set state of this node: its member state, term, config, the
/// progress of every member and the commit point. It is driven one event at a time by
/// `CoordinatorActor`.
pub(crate) struct Coordinator<C: Clock = RealClock> {
    logger: slog::Logger,
    self_host: HostAndPort,
    set_name: Option<String>,
    local_state: Arc<dyn PersistentLocalState>,
    network: Arc<dyn ReplicationNetwork>,
    actor_client: WeakCoordinatorClient,
    clock: C,
    default_election_timeout: Duration,
    default_heartbeat_interval: Duration,
    election_timeout_offset_limit: f64,
    rpc_timeout: Duration,

    config: Option<ReplicaSetConfig>,
    self_id: Option<i64>,
    state: MemberState,
    is_draining: bool,
    maintenance_count: u32,
    term: Term,
    last_vote: LastVote,
    primary_id: Option<i64>,

    my_last_applied: OpTime,
    my_last_durable: OpTime,
    last_write_ts: Timestamp,
    commit_point: OpTime,
    // Newest commit point heard from a primary. Secondaries only adopt it up to their own
    // last applied optime.
    last_known_commit: OpTime,
    min_valid: OpTime,
    awaiting_min_valid: bool,
    progress: ProgressMap,
    snapshots: SnapshotManager,

    // Elections are off until these pass.
    step_down_until: Option<Instant>,
    election_sleep_until: Option<Instant>,
    election: Option<Election>,
    next_election_id: u64,

    election_timer: Option<TimeoutTimerHandle<C>>,
    heartbeat_timers: HashMap<i64, HeartbeatTimerHandle<C>>,
    liveness_timers: HashMap<i64, TimeoutTimerHandle<C>>,

    replication_waiters: Vec<ReplicationWaiter>,
    op_time_waiters: Vec<OpTimeWaiter>,
    step_down_waiters: Vec<StepDownWaiter>,
    next_waiter_id: u64,

    notifier: StateChangeNotifier,
    listener: StateChangeListener,
    in_shutdown: bool,
}

impl<C: Clock> Coordinator<C> {
    pub(crate) fn new(config: CoordinatorConfig<C>) -> Self {
        let (notifier, listener) = state_change_listener::new(StateSnapshot {
            state: MemberState::Startup,
            term: Term::default(),
            is_draining: false,
            primary_id: None,
        });

        Coordinator {
            logger: config.logger,
            self_host: config.self_host,
            set_name: config.set_name,
            local_state: config.local_state,
            network: config.network,
            actor_client: config.actor_client,
            clock: config.clock,
            default_election_timeout: config.default_election_timeout,
            default_heartbeat_interval: config.default_heartbeat_interval,
            election_timeout_offset_limit: config.election_timeout_offset_limit,
            rpc_timeout: config.rpc_timeout,
            config: None,
            self_id: None,
            state: MemberState::Startup,
            is_draining: false,
            maintenance_count: 0,
            term: Term::default(),
            last_vote: LastVote::default(),
            primary_id: None,
            my_last_applied: OpTime::null(),
            my_last_durable: OpTime::null(),
            last_write_ts: Timestamp::default(),
            commit_point: OpTime::null(),
            last_known_commit: OpTime::null(),
            min_valid: OpTime::null(),
            awaiting_min_valid: false,
            progress: ProgressMap::new(),
            snapshots: SnapshotManager::new(),
            step_down_until: None,
            election_sleep_until: None,
            election: None,
            next_election_id: 0,
            election_timer: None,
            heartbeat_timers: HashMap::new(),
            liveness_timers: HashMap::new(),
            replication_waiters: Vec::new(),
            op_time_waiters: Vec::new(),
            step_down_waiters: Vec::new(),
            next_waiter_id: 0,
            notifier,
            listener,
            in_shutdown: false,
        }
    }

    // -- configuration and member state --

    pub(crate) fn handle_load_local_config(&mut self) -> Result<(), InitiateError> {
        if self.in_shutdown {
            return Err(InitiateError::ShutdownInProgress);
        }

        self.last_vote = self.local_state.load_last_vote()?;
        if self.last_vote.term > self.term {
            self.term = self.last_vote.term;
        }
        self.min_valid = self.local_state.load_min_valid()?.op_time;

        match self.local_state.load_config()? {
            Some(doc) => {
                let config = ReplicaSetConfig::parse(&doc)?;
                self.install_config(config);
            }
            None => slog::info!(
                self.logger,
                "No local replica set config. Waiting for replSetInitiate or a heartbeat."
            ),
        }
        Ok(())
    }

    pub(crate) fn handle_initiate(&mut self, input: InitiateInput) -> Result<(), InitiateError> {
        if self.in_shutdown {
            return Err(InitiateError::ShutdownInProgress);
        }
        if self.config.is_some() {
            return Err(InitiateError::AlreadyInitialized);
        }

        let config = ReplicaSetConfig::parse(&input.config)?;
        if let Some(ours) = &self.set_name {
            if ours != config.set_name() {
                return Err(InitiateError::SetNameMismatch {
                    ours: ours.clone(),
                    theirs: config.set_name().to_string(),
                });
            }
        }
        if config.member_by_host(&self.self_host).is_none() {
            return Err(InitiateError::NodeNotFound(self.self_host.clone()));
        }

        self.local_state.store_config(&config.to_document())?;
        slog::info!(self.logger, "Initiated replica set {}", config.set_name());
        self.install_config(config);
        Ok(())
    }

    fn install_config(&mut self, config: ReplicaSetConfig) {
        let self_member = config.member_by_host(&self.self_host).cloned();
        let name_mismatch = self.set_name.as_ref().map_or(false, |ours| ours != config.set_name());
        let event = if name_mismatch {
            StateEvent::ConfigSetNameMismatch
        } else {
            match &self_member {
                Some(m) if m.arbiter_only => StateEvent::ConfigSelfArbiter,
                Some(_) => StateEvent::ConfigSelfPresent,
                None => StateEvent::ConfigSelfAbsent,
            }
        };
        slog::info!(
            self.logger,
            "Installing config version {} of set {}",
            config.version(),
            config.set_name()
        );

        self.self_id = match (&self_member, name_mismatch) {
            (Some(m), false) => Some(m.id),
            _ => None,
        };
        self.progress.reset_for_config(&config, self.self_id);
        self.config = Some(config);
        self.update_self_progress();

        // Timeouts and membership may both have changed.
        self.election_timer = None;
        self.restart_member_timers();

        if let Err(e) = self.transition(event) {
            slog::debug!(self.logger, "New config leaves member state at {}: {}", self.state, e);
        }
        self.reschedule_election_timeout();
        self.after_progress_change();
    }

    fn restart_member_timers(&mut self) {
        self.heartbeat_timers.clear();
        self.liveness_timers.clear();
        let config = match &self.config {
            Some(config) => config,
            None => return,
        };
        let heartbeat_interval = config
            .heartbeat_interval_setting()
            .unwrap_or(self.default_heartbeat_interval);
        let liveness_timeout = config
            .election_timeout_setting()
            .unwrap_or(self.default_election_timeout);

        let self_host = self.self_host.clone();
        for member in config.members().iter().filter(|m| m.host != self_host) {
            self.heartbeat_timers.insert(
                member.id,
                HeartbeatTimerHandle::spawn_timer_task(
                    heartbeat_interval,
                    self.actor_client.clone(),
                    member.id,
                    self.clock.clone(),
                ),
            );
            self.liveness_timers.insert(
                member.id,
                TimeoutTimerHandle::spawn_timer_task(
                    TimeoutKind::Liveness(member.id),
                    liveness_timeout,
                    liveness_timeout,
                    self.actor_client.clone(),
                    self.clock.clone(),
                ),
            );
        }
    }

    pub(crate) fn handle_set_follower_mode(&mut self, target: MemberState) -> Result<(), MemberStateError> {
        self.check_initialized()?;
        let event = match target {
            MemberState::Secondary => StateEvent::FollowerSecondary,
            MemberState::Recovering => StateEvent::FollowerRecovering,
            MemberState::Rollback => StateEvent::DivergenceDetected,
            other => return Err(MemberStateError::BadValue(other)),
        };
        self.transition(event)?;
        Ok(())
    }

    pub(crate) fn handle_initial_sync_complete(&mut self) -> Result<(), MemberStateError> {
        self.check_initialized()?;
        self.transition(StateEvent::InitialSyncComplete)?;
        Ok(())
    }

    pub(crate) fn handle_drain_complete(&mut self) {
        if self.state == MemberState::Primary && self.is_draining {
            self.is_draining = false;
            slog::info!(
                self.logger,
                "Transition to primary complete; database writes are now permitted"
            );
        }
    }

    fn check_initialized(&self) -> Result<(), MemberStateError> {
        if self.in_shutdown {
            return Err(MemberStateError::ShutdownInProgress);
        }
        if self.config.is_none() {
            return Err(MemberStateError::NotYetInitialized);
        }
        Ok(())
    }

    fn transition(&mut self, event: StateEvent) -> Result<MemberState, IllegalTransition> {
        let ctx = TransitionContext {
            maintenance_count: self.maintenance_count,
            electing: self.election.is_some(),
        };
        let next = next_state(self.state, event, &ctx)?;
        self.set_state(next);
        Ok(next)
    }

    fn set_state(&mut self, new_state: MemberState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        slog::info!(self.logger, "Transition to {} from {}", new_state, old_state);
        self.state = new_state;
        if let Some(p) = self.self_id.and_then(|id| self.progress.get_mut(id)) {
            p.state = new_state;
        }

        if old_state == MemberState::Primary {
            self.is_draining = false;
            if self.primary_id == self.self_id {
                self.primary_id = None;
            }
            for waiter in self.replication_waiters.drain(..) {
                waiter.callback.send(Err(AwaitReplicationError::NotMaster));
            }
            for waiter in self.step_down_waiters.drain(..) {
                waiter.callback.send(Err(StepDownError::NotMaster));
            }
        }
        if new_state == MemberState::Primary {
            self.primary_id = self.self_id;
            self.is_draining = true;
        }
        if new_state != MemberState::Secondary {
            self.election = None;
        }

        self.reschedule_election_timeout();
        if new_state == MemberState::Secondary {
            self.maybe_start_single_node_election();
        }
    }

    pub(crate) fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            set_name: self.current_set_name(),
            self_id: self.self_id,
            state: self.state,
            is_draining: self.is_draining,
            election_in_progress: self.election.is_some(),
            maintenance_count: self.maintenance_count,
            term: self.term,
            config_version: self.config_version(),
            primary_id: self.primary_id,
            commit_point: self.commit_point,
            my_last_applied: self.my_last_applied,
            my_last_durable: self.my_last_durable,
            committed_snapshot_op_time: self.snapshots.current_committed_snapshot_op_time(),
            step_down_until: self.step_down_until,
            members: self.progress.iter().cloned().collect(),
        }
    }

    pub(crate) fn state_listener(&self) -> StateChangeListener {
        self.listener.clone()
    }

    pub(crate) fn publish_state(&mut self) {
        self.notifier.notify_new_state(StateSnapshot {
            state: self.state,
            term: self.term,
            is_draining: self.is_draining,
            primary_id: self.primary_id,
        });
    }

    fn current_set_name(&self) -> Option<String> {
        self.config
            .as_ref()
            .map(|c| c.set_name().to_string())
            .or_else(|| self.set_name.clone())
    }

    fn config_version(&self) -> i64 {
        // -2 tells peers we have no config at all.
        self.config.as_ref().map_or(-2, |c| c.version())
    }

    fn self_member(&self) -> Option<&MemberConfig> {
        let id = self.self_id?;
        self.config.as_ref()?.member_by_id(id)
    }

    fn election_timeout(&self) -> Duration {
        self.config
            .as_ref()
            .and_then(|c| c.election_timeout_setting())
            .unwrap_or(self.default_election_timeout)
    }

    // -- terms, stepdown and freeze --

    pub(crate) fn handle_update_term(&mut self, term: Term) -> Result<(), UpdateTermError> {
        if self.in_shutdown {
            return Err(UpdateTermError::ShutdownInProgress);
        }
        if term.as_i64() < 0 {
            return Err(UpdateTermError::BadValue(term));
        }
        if term <= self.term {
            return Ok(());
        }

        if self.state == MemberState::Primary {
            // Step down first and only take the new term once we're a follower, so the caller
            // retries against a node that no longer accepts writes.
            slog::info!(
                self.logger,
                "Stepping down: saw term {:?}, newer than mine {:?}",
                term,
                self.term
            );
            self.election_sleep_until = Some(self.clock.now() + self.election_timeout());
            self.step_down_now();
            return Err(UpdateTermError::StaleTerm);
        }

        self.set_term(term);
        Err(UpdateTermError::StaleTerm)
    }

    /// Adopts a newer term learned from a peer, stepping down first if needed.
    fn update_term_internal(&mut self, term: Term) {
        if term <= self.term {
            return;
        }
        if self.state == MemberState::Primary {
            slog::info!(self.logger, "Stepping down: peer is at term {:?}", term);
            self.step_down_now();
        }
        self.set_term(term);
    }

    fn set_term(&mut self, term: Term) {
        slog::info!(self.logger, "Updating term from {:?} to {:?}", self.term, term);
        self.term = term;
        self.election = None;
        // Don't stand for election right after learning about a new term.
        self.election_sleep_until = Some(self.clock.now() + self.election_timeout());
        self.reschedule_election_timeout();
    }

    fn step_down_now(&mut self) {
        if let Err(e) = self.transition(StateEvent::StepDown) {
            slog::warn!(self.logger, "Could not step down: {}", e);
        }
    }

    pub(crate) fn handle_step_down(&mut self, input: StepDownInput, callback: Callback<(), StepDownError>) {
        if self.in_shutdown {
            return callback.send(Err(StepDownError::ShutdownInProgress));
        }
        if self.state != MemberState::Primary {
            return callback.send(Err(StepDownError::NotMaster));
        }
        if input.step_down_duration < input.wait_time {
            return callback.send(Err(StepDownError::BadValue));
        }

        if self.caught_up_electable_secondary() {
            self.complete_step_down(input.step_down_duration);
            return callback.send(Ok(()));
        }
        if input.wait_time == Duration::from_secs(0) {
            if input.force {
                self.complete_step_down(input.step_down_duration);
                return callback.send(Ok(()));
            }
            return callback.send(Err(StepDownError::ExceededTimeLimit));
        }

        slog::info!(
            self.logger,
            "Waiting up to {:?} for an electable secondary to catch up before stepping down",
            input.wait_time
        );
        self.next_waiter_id += 1;
        let id = self.next_waiter_id;
        let actor_client = self.actor_client.clone();
        let mut clock = self.clock.clone();
        let deadline = clock.now() + input.wait_time;
        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            let _ = actor_client.step_down_deadline(id).await;
        });
        self.step_down_waiters.push(StepDownWaiter {
            id,
            force: input.force,
            step_down_duration: input.step_down_duration,
            callback,
        });
    }

    pub(crate) fn handle_step_down_deadline(&mut self, waiter_id: u64) {
        let position = match self.step_down_waiters.iter().position(|w| w.id == waiter_id) {
            Some(position) => position,
            None => return,
        };
        let waiter = self.step_down_waiters.remove(position);
        if waiter.force {
            slog::info!(self.logger, "No secondary caught up in time, stepping down anyway");
            self.step_down_until = Some(self.clock.now() + waiter.step_down_duration);
            waiter.callback.send(Ok(()));
            self.step_down_now();
        } else {
            waiter.callback.send(Err(StepDownError::ExceededTimeLimit));
        }
    }

    fn check_step_down_waiters(&mut self) {
        self.step_down_waiters.retain(|w| !w.callback.is_closed());
        if self.step_down_waiters.is_empty() || !self.caught_up_electable_secondary() {
            return;
        }
        let duration = self
            .step_down_waiters
            .iter()
            .map(|w| w.step_down_duration)
            .max()
            .unwrap_or_default();
        self.complete_step_down(duration);
    }

    fn complete_step_down(&mut self, step_down_duration: Duration) {
        self.step_down_until = Some(self.clock.now() + step_down_duration);
        for waiter in self.step_down_waiters.drain(..) {
            waiter.callback.send(Ok(()));
        }
        self.step_down_now();
    }

    fn caught_up_electable_secondary(&self) -> bool {
        let config = match &self.config {
            Some(config) => config,
            None => return false,
        };
        self.progress.iter().any(|p| {
            Some(p.member_id) != self.self_id
                && p.up
                && p.state == MemberState::Secondary
                && p.last_applied >= self.my_last_applied
                && config.member_by_id(p.member_id).map_or(false, |m| m.is_electable())
        })
    }

    pub(crate) fn handle_freeze(&mut self, duration: Duration) -> Result<(), FreezeError> {
        if self.in_shutdown {
            return Err(FreezeError::ShutdownInProgress);
        }
        if self.state == MemberState::Primary {
            return Err(FreezeError::NotSecondary);
        }

        if duration == Duration::from_secs(0) {
            slog::info!(self.logger, "Unfreezing");
            self.step_down_until = None;
            self.maybe_start_single_node_election();
        } else {
            slog::info!(self.logger, "Freezing for {:?}", duration);
            self.step_down_until = Some(self.clock.now() + duration);
        }
        Ok(())
    }

    pub(crate) fn handle_set_maintenance_mode(&mut self, activate: bool) -> Result<(), MaintenanceModeError> {
        if self.in_shutdown {
            return Err(MaintenanceModeError::ShutdownInProgress);
        }
        if self.config.is_none() {
            return Err(MaintenanceModeError::NotYetInitialized);
        }
        if self.state == MemberState::Primary {
            return Err(MaintenanceModeError::NotSecondary);
        }
        if self.election.is_some() {
            return Err(MaintenanceModeError::ElectionInProgress);
        }

        let event = if activate {
            self.maintenance_count += 1;
            StateEvent::MaintenanceOn
        } else {
            if self.maintenance_count == 0 {
                return Err(MaintenanceModeError::OperationFailed);
            }
            self.maintenance_count -= 1;
            StateEvent::MaintenanceOff
        };
        slog::info!(self.logger, "Maintenance mode count is now {}", self.maintenance_count);

        // States outside the follower states keep the count but don't change.
        if let Err(e) = self.transition(event) {
            slog::debug!(self.logger, "{}", e);
        }
        Ok(())
    }

    // -- heartbeats --

    pub(crate) fn handle_heartbeat(&mut self, input: HeartbeatInput) -> Result<HeartbeatOutput, HeartbeatError> {
        if self.in_shutdown {
            return Err(HeartbeatError::ShutdownInProgress);
        }
        let ours = match self.current_set_name() {
            Some(ours) => ours,
            None => return Err(HeartbeatError::NotYetInitialized),
        };
        if ours != input.set_name {
            return Err(HeartbeatError::InconsistentReplicaSetNames {
                ours,
                theirs: input.set_name,
            });
        }

        self.update_term_internal(input.term);

        let my_version = self.config_version();
        if input.config_version > my_version {
            // The sender has a newer config. Its reply to our heartbeat will carry it.
            let member_id = self
                .config
                .as_ref()
                .and_then(|c| c.member_by_host(&input.sender_host))
                .map(|m| m.id);
            self.send_heartbeat(input.sender_host.clone(), member_id);
        }

        let config = match &self.config {
            Some(c) if c.version() > input.config_version => Some(c.to_document()),
            _ => None,
        };
        Ok(HeartbeatOutput {
            set_name: ours,
            state: self.state,
            term: self.term,
            config_version: my_version,
            applied_op_time: self.my_last_applied,
            durable_op_time: self.my_last_durable,
            electable: self.state == MemberState::Secondary && self.can_stand_for_election(),
            config,
            metadata: self.metadata(),
        })
    }

    pub(crate) fn handle_heartbeat_tick(&mut self, tick: HeartbeatTick) {
        if self.in_shutdown {
            return;
        }
        let target = match self.config.as_ref().and_then(|c| c.member_by_id(tick.member_id)) {
            Some(member) => member.host.clone(),
            None => return,
        };
        self.send_heartbeat(target, Some(tick.member_id));
    }

    fn send_heartbeat(&self, target: HostAndPort, member_id: Option<i64>) {
        let input = HeartbeatInput {
            set_name: self.current_set_name().unwrap_or_default(),
            config_version: self.config_version(),
            term: self.term,
            sender_host: self.self_host.clone(),
            sender_id: self.self_id.unwrap_or(-1),
        };
        let network = self.network.clone();
        let actor_client = self.actor_client.clone();
        let rpc_timeout = self.rpc_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(rpc_timeout, network.heartbeat(&target, input)).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::Timeout),
            };
            let _ = actor_client
                .heartbeat_response(HeartbeatResponseFromPeer {
                    target,
                    member_id,
                    result,
                })
                .await;
        });
    }

    pub(crate) fn handle_heartbeat_response(&mut self, response: HeartbeatResponseFromPeer) {
        if self.in_shutdown {
            return;
        }
        let HeartbeatResponseFromPeer { target, result, .. } = response;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                slog::debug!(self.logger, "Heartbeat to {} failed: {}", target, e);
                return;
            }
        };

        self.update_term_internal(output.term);
        if let Some(doc) = &output.config {
            if output.config_version > self.config_version() {
                match ReplicaSetConfig::parse(doc) {
                    Ok(config) => match self.local_state.store_config(doc) {
                        Ok(()) => self.install_config(config),
                        Err(e) => slog::error!(self.logger, "Failed to persist config from {}: {}", target, e),
                    },
                    Err(e) => slog::warn!(self.logger, "Ignoring invalid config from {}: {}", target, e),
                }
            }
        }

        let member_id = match self.config.as_ref().and_then(|c| c.member_by_host(&target)) {
            Some(member) => member.id,
            None => return,
        };
        if Some(member_id) == self.self_id {
            return;
        }

        let now = self.clock.now();
        if let Some(p) = self.progress.get_mut(member_id) {
            if !p.up || p.state != output.state {
                slog::info!(self.logger, "Member {} is now in state {}", target, output.state);
            }
            p.up = true;
            p.state = output.state;
            p.last_heartbeat = Some(now);
        }
        self.progress.advance_applied(member_id, output.applied_op_time);
        self.progress.advance_durable(member_id, output.durable_op_time);
        if let Some(timer) = self.liveness_timers.get(&member_id) {
            timer.reset_timeout();
        }

        if output.state == MemberState::Primary && output.term == self.term {
            if self.primary_id != Some(member_id) {
                slog::info!(self.logger, "Member {} is primary in term {:?}", target, self.term);
            }
            self.primary_id = Some(member_id);
            // The primary of our own term is alive, hold off on elections.
            if let Some(timer) = &self.election_timer {
                timer.reset_timeout();
            }
        } else if self.primary_id == Some(member_id) {
            self.primary_id = None;
        }

        self.handle_process_metadata(output.metadata);
    }

    pub(crate) fn handle_liveness_timeout(&mut self, member_id: i64) {
        if self.in_shutdown || Some(member_id) == self.self_id {
            return;
        }
        match self.progress.get_mut(member_id) {
            Some(p) => {
                if p.up {
                    slog::info!(self.logger, "Member {} is now DOWN", p.host);
                }
                p.up = false;
                p.state = MemberState::Down;
            }
            None => return,
        }
        if self.primary_id == Some(member_id) {
            self.primary_id = None;
        }

        if self.state == MemberState::Primary {
            if let Some(config) = &self.config {
                if self.progress.num_voters_up(config) < config.majority_vote_count() {
                    slog::warn!(
                        self.logger,
                        "Can't see a majority of the set, relinquishing primary"
                    );
                    self.step_down_now();
                }
            }
        }
    }

    // -- elections --

    pub(crate) fn handle_request_votes(
        &mut self,
        input: RequestVotesInput,
    ) -> Result<RequestVotesOutput, RequestVotesError> {
        if self.in_shutdown {
            return Err(RequestVotesError::ShutdownInProgress);
        }
        let (version, set_name) = match &self.config {
            Some(config) => (config.version(), config.set_name().to_string()),
            None => return Err(RequestVotesError::NotYetInitialized),
        };
        if !input.dry_run {
            self.update_term_internal(input.term);
        }

        let reason = if input.term < self.term {
            Some(format!(
                "candidate's term ({:?}) is lower than mine ({:?})",
                input.term, self.term
            ))
        } else if input.config_version != version {
            Some(format!(
                "candidate's config version ({}) differs from mine ({})",
                input.config_version, version
            ))
        } else if input.set_name != set_name {
            Some(format!(
                "candidate's set name ({}) differs from mine ({})",
                input.set_name, set_name
            ))
        } else if input.last_committed_op < self.my_last_applied {
            Some(format!(
                "candidate's data is staler than mine ({:?} < {:?})",
                input.last_committed_op, self.my_last_applied
            ))
        } else if !self.state.can_vote_affirmatively() {
            Some(format!("can't vote while in {}", self.state))
        } else if !input.dry_run
            && self.last_vote.term == input.term
            && self.last_vote.candidate_index != input.candidate_index
        {
            Some(format!(
                "already voted for member {} in term {:?}",
                self.last_vote.candidate_index, self.last_vote.term
            ))
        } else {
            None
        };

        let vote_granted = reason.is_none();
        if vote_granted && !input.dry_run {
            let vote = LastVote::new(input.term, input.candidate_index);
            self.local_state.store_last_vote(vote)?;
            self.last_vote = vote;
        }
        match &reason {
            Some(reason) => slog::info!(
                self.logger,
                "Not granting vote to member {}: {}",
                input.candidate_index,
                reason
            ),
            None => slog::info!(
                self.logger,
                "Voting for member {} in {}term {:?}",
                input.candidate_index,
                if input.dry_run { "dry-run " } else { "" },
                input.term
            ),
        }

        Ok(RequestVotesOutput {
            term: self.term,
            vote_granted,
            reason: reason.unwrap_or_default(),
        })
    }

    pub(crate) fn handle_election_timeout(&mut self) {
        if self.can_stand_for_election() {
            slog::info!(self.logger, "Election timeout; no primary heard from in term {:?}", self.term);
            self.start_election();
        }
    }

    fn can_stand_for_election(&self) -> bool {
        let now = self.clock.now();
        let blocked = self
            .step_down_until
            .iter()
            .chain(self.election_sleep_until.iter())
            .any(|until| *until > now);

        !self.in_shutdown
            && !blocked
            && self.state == MemberState::Secondary
            && self.config.as_ref().map_or(false, |c| c.protocol_version() == 1)
            && self.self_member().map_or(false, |m| m.is_electable())
    }

    fn maybe_start_single_node_election(&mut self) {
        let only_voter = match &self.config {
            Some(config) => {
                let voters: Vec<i64> = config.voters().map(|m| m.id).collect();
                voters.len() == 1 && Some(voters[0]) == self.self_id
            }
            None => false,
        };
        if only_voter {
            self.start_election();
        }
    }

    fn start_election(&mut self) {
        if self.election.is_some() || !self.can_stand_for_election() {
            return;
        }
        let self_id = match self.self_id {
            Some(id) => id,
            None => return,
        };

        self.next_election_id += 1;
        let term = self.term.next();
        slog::info!(self.logger, "Starting dry-run election for term {:?}", term);
        self.election = Some(Election::new(self.next_election_id, term, true, self_id));
        self.send_vote_requests();
        self.tally_votes();
    }

    fn start_real_election(&mut self) {
        let (term, self_id) = match (&self.election, self.self_id) {
            (Some(election), Some(self_id)) => (election.term, self_id),
            _ => return,
        };

        // Our own vote must be durable before anyone else is asked for theirs.
        let vote = LastVote::new(term, self_id);
        if let Err(e) = self.local_state.store_last_vote(vote) {
            slog::error!(self.logger, "Failed to persist own vote, abandoning election: {}", e);
            self.election = None;
            return;
        }
        self.last_vote = vote;
        self.term = term;
        slog::info!(self.logger, "Dry run succeeded, starting election for term {:?}", term);

        self.next_election_id += 1;
        self.election = Some(Election::new(self.next_election_id, term, false, self_id));
        self.send_vote_requests();
        self.tally_votes();
    }

    fn send_vote_requests(&self) {
        let (config, election, self_id) = match (&self.config, &self.election, self.self_id) {
            (Some(config), Some(election), Some(self_id)) => (config, election, self_id),
            _ => return,
        };

        for member in config.voters().filter(|m| m.id != self_id) {
            let input = RequestVotesInput {
                set_name: config.set_name().to_string(),
                term: election.term,
                candidate_index: self_id,
                config_version: config.version(),
                dry_run: election.dry_run,
                last_committed_op: self.my_last_applied,
            };
            let target = member.host.clone();
            let member_id = member.id;
            let election_id = election.id;
            let dry_run = election.dry_run;
            let network = self.network.clone();
            let actor_client = self.actor_client.clone();
            let rpc_timeout = self.rpc_timeout;

            tokio::spawn(async move {
                let result = match tokio::time::timeout(rpc_timeout, network.request_votes(&target, input)).await {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::Timeout),
                };
                let _ = actor_client
                    .vote_response(VoteResponseFromPeer {
                        election_id,
                        member_id,
                        dry_run,
                        result,
                    })
                    .await;
            });
        }
    }

    pub(crate) fn handle_vote_response(&mut self, response: VoteResponseFromPeer) {
        let election = match &mut self.election {
            Some(e) if e.id == response.election_id && e.dry_run == response.dry_run => e,
            _ => return,
        };

        election.responded.insert(response.member_id);
        let mut newer_term = None;
        match response.result {
            Ok(output) => {
                if output.vote_granted {
                    election.granted.insert(response.member_id);
                } else {
                    slog::info!(
                        self.logger,
                        "Member {} denied its vote: {}",
                        response.member_id,
                        output.reason
                    );
                }
                if output.term > self.term && (!election.dry_run || output.term >= election.term) {
                    newer_term = Some(output.term);
                }
            }
            Err(e) => slog::debug!(self.logger, "Vote request to member {} failed: {}", response.member_id, e),
        }

        if let Some(term) = newer_term {
            slog::info!(self.logger, "Abandoning election, member {} is at term {:?}", response.member_id, term);
            self.election = None;
            self.update_term_internal(term);
            return;
        }
        self.tally_votes();
    }

    fn tally_votes(&mut self) {
        let (needed, voters) = match &self.config {
            Some(config) => (config.majority_vote_count(), config.voters().count()),
            None => return,
        };
        let (granted, responded, dry_run, term) = match &self.election {
            Some(e) => (e.granted.len(), e.responded.len(), e.dry_run, e.term),
            None => return,
        };

        if granted >= needed {
            if dry_run {
                self.start_real_election();
            } else {
                slog::info!(self.logger, "Won election for term {:?} with {} votes", term, granted);
                self.election = None;
                if let Err(e) = self.transition(StateEvent::ElectionWon) {
                    slog::warn!(self.logger, "Won election but can't become primary: {}", e);
                }
            }
        } else if responded >= voters {
            slog::info!(
                self.logger,
                "Lost {}election for term {:?} with {} of {} needed votes",
                if dry_run { "dry-run " } else { "" },
                term,
                granted,
                needed
            );
            self.election = None;
            self.reschedule_election_timeout();
        }
    }

    fn reschedule_election_timeout(&mut self) {
        let wanted = !self.in_shutdown
            && self.state == MemberState::Secondary
            && self.config.as_ref().map_or(false, |c| c.protocol_version() == 1)
            && self.self_member().map_or(false, |m| m.is_electable());
        if !wanted {
            self.election_timer = None;
            return;
        }

        match &self.election_timer {
            Some(timer) => timer.reset_timeout(),
            None => {
                let timeout = self.election_timeout();
                let max_timeout = timeout + timeout.mul_f64(self.election_timeout_offset_limit);
                self.election_timer = Some(TimeoutTimerHandle::spawn_timer_task(
                    TimeoutKind::Election,
                    timeout,
                    max_timeout,
                    self.actor_client.clone(),
                    self.clock.clone(),
                ));
            }
        }
    }

    // -- progress and the commit point --

    pub(crate) fn handle_update_position(&mut self, input: UpdatePositionInput) -> Result<(), UpdatePositionError> {
        if self.in_shutdown {
            return Err(UpdatePositionError::ShutdownInProgress);
        }
        let config = match &self.config {
            Some(config) if self.state == MemberState::Primary || self.state == MemberState::Secondary => config,
            _ => return Err(UpdatePositionError::NotMasterOrSecondary),
        };

        let entries: Vec<UpdatePositionEntry> = match input {
            UpdatePositionInput::Modern(entries) => entries,
            UpdatePositionInput::Legacy(entries) => entries
                .into_iter()
                .map(|e| UpdatePositionEntry {
                    member_id: e.member_id,
                    config_version: e.config_version,
                    applied_op_time: OpTime::new(e.op_time, Term::UNINITIALIZED),
                    durable_op_time: OpTime::new(e.op_time, Term::UNINITIALIZED),
                })
                .collect(),
        };

        // One bad entry rejects the whole batch.
        for entry in &entries {
            if entry.config_version != config.version() {
                return Err(UpdatePositionError::InvalidReplicaSetConfig {
                    ours: config.version(),
                    theirs: entry.config_version,
                });
            }
            if config.member_by_id(entry.member_id).is_none() {
                return Err(UpdatePositionError::NodeNotFound(entry.member_id));
            }
        }

        for entry in entries {
            if Some(entry.member_id) == self.self_id {
                continue;
            }
            self.progress.advance_applied(entry.member_id, entry.applied_op_time);
            self.progress.advance_durable(entry.member_id, entry.durable_op_time);
            if let Some(p) = self.progress.get_mut(entry.member_id) {
                p.up = true;
            }
            if let Some(timer) = self.liveness_timers.get(&entry.member_id) {
                timer.reset_timeout();
            }
        }

        self.after_progress_change();
        Ok(())
    }

    pub(crate) fn handle_process_metadata(&mut self, metadata: ReplSetMetadata) {
        if self.in_shutdown || Some(metadata.config_version) != self.config.as_ref().map(|c| c.version()) {
            return;
        }

        self.update_term_internal(metadata.term);
        if metadata.term == self.term {
            if metadata.primary_index >= 0 && Some(metadata.primary_index) != self.self_id {
                self.primary_id = Some(metadata.primary_index);
            }
            self.learn_commit_point(metadata.last_op_committed);
        }
        self.after_progress_change();
    }

    pub(crate) fn metadata(&self) -> ReplSetMetadata {
        ReplSetMetadata {
            last_op_committed: self.commit_point,
            last_op_visible: self.my_last_applied,
            config_version: self.config_version(),
            primary_index: self.primary_id.unwrap_or(-1),
            term: self.term,
            sync_source_index: -1,
        }
    }

    pub(crate) fn handle_set_my_last_applied(&mut self, op_time: OpTime) {
        if op_time <= self.my_last_applied {
            return;
        }
        self.my_last_applied = op_time;
        self.update_self_progress();

        if self.awaiting_min_valid && self.state == MemberState::Recovering && op_time >= self.min_valid {
            if self.transition(StateEvent::MinValidReached).is_ok() {
                self.awaiting_min_valid = false;
            }
        }
        if self.state != MemberState::Primary {
            self.learn_commit_point(self.last_known_commit);
            self.forward_progress();
        }
        self.after_progress_change();
    }

    pub(crate) fn handle_set_my_last_durable(&mut self, op_time: OpTime) {
        if op_time <= self.my_last_durable {
            return;
        }
        self.my_last_durable = op_time;
        self.update_self_progress();
        if self.state != MemberState::Primary {
            self.forward_progress();
        }
        self.after_progress_change();
    }

    fn update_self_progress(&mut self) {
        if let Some(self_id) = self.self_id {
            self.progress.set_self(self_id, self.my_last_applied, self.my_last_durable);
            if let Some(p) = self.progress.get_mut(self_id) {
                p.state = self.state;
            }
        }
    }

    /// Reports our progress to the primary so it can advance the commit point.
    fn forward_progress(&self) {
        let (config, self_id, primary_id) = match (&self.config, self.self_id, self.primary_id) {
            (Some(config), Some(self_id), Some(primary_id)) if primary_id != self_id => (config, self_id, primary_id),
            _ => return,
        };
        let target = match config.member_by_id(primary_id) {
            Some(member) => member.host.clone(),
            None => return,
        };
        let input = UpdatePositionInput::Modern(vec![UpdatePositionEntry {
            member_id: self_id,
            config_version: config.version(),
            applied_op_time: self.my_last_applied,
            durable_op_time: self.my_last_durable,
        }]);
        let network = self.network.clone();
        let logger = self.logger.clone();
        let rpc_timeout = self.rpc_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(rpc_timeout, network.update_position(&target, input)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => slog::debug!(logger, "Position update to {} failed: {}", target, e),
                Err(_) => slog::debug!(logger, "Position update to {} timed out", target),
            }
        });
    }

    /// Primaries compute the commit point; everyone else learns it.
    fn update_commit_point(&mut self) {
        if self.state != MemberState::Primary {
            return;
        }
        let majority_applied = match &self.config {
            Some(config) => self.progress.majority_applied(config),
            None => None,
        };
        if let Some(op_time) = majority_applied {
            let op_time = op_time.min(self.my_last_applied);
            // Only entries of our own term commit by counting replicas.
            if op_time.term() == self.term {
                self.set_commit_point(op_time);
            }
        }
    }

    fn learn_commit_point(&mut self, committed: OpTime) {
        if self.state == MemberState::Primary {
            return;
        }
        if committed > self.last_known_commit {
            self.last_known_commit = committed;
        }
        let op_time = self.last_known_commit.min(self.my_last_applied);
        self.set_commit_point(op_time);
    }

    fn set_commit_point(&mut self, op_time: OpTime) {
        if op_time > self.commit_point {
            slog::debug!(self.logger, "Commit point advanced to {:?}", op_time);
            self.commit_point = op_time;
            self.snapshots.update_committed_snapshot(op_time);
        }
    }

    fn after_progress_change(&mut self) {
        self.update_commit_point();
        self.check_replication_waiters();
        self.check_op_time_waiters();
        self.check_step_down_waiters();
    }

    // -- writes and waits --

    pub(crate) fn handle_prepare_write(&mut self) -> Result<OpTime, PrepareWriteError> {
        if self.in_shutdown {
            return Err(PrepareWriteError::ShutdownInProgress);
        }
        if self.state != MemberState::Primary || self.is_draining {
            return Err(PrepareWriteError::NotMaster);
        }

        let wall_secs = chrono::Utc::now().timestamp().max(0) as u32;
        let last = self.last_write_ts.max(self.my_last_applied.timestamp());
        let ts = if wall_secs > last.secs() {
            Timestamp::new(wall_secs, 1)
        } else {
            Timestamp::new(last.secs(), last.inc() + 1)
        };
        self.last_write_ts = ts;
        Ok(OpTime::new(ts, self.term))
    }

    pub(crate) fn handle_await_replication(
        &mut self,
        mut input: AwaitReplicationInput,
        callback: Callback<(), AwaitReplicationError>,
    ) {
        if self.in_shutdown {
            return callback.send(Err(AwaitReplicationError::ShutdownInProgress));
        }

        {
            let config = match &self.config {
                Some(config) => config,
                None => {
                    // Not a replica set: only a local acknowledgement can be given.
                    let result = match input.write_concern.w {
                        WriteMode::Nodes(n) if n <= 1 => Ok(()),
                        _ => Err(AwaitReplicationError::NotMaster),
                    };
                    return callback.send(result);
                }
            };
            input.write_concern = input
                .write_concern
                .clone()
                .resolved(config.write_concern_majority_journal_default());

            match &input.write_concern.w {
                WriteMode::Nodes(0) => return callback.send(Ok(())),
                WriteMode::Nodes(n) => {
                    let data_bearing = config.members().iter().filter(|m| m.is_data_bearing()).count();
                    if *n > data_bearing {
                        return callback.send(Err(AwaitReplicationError::CannotSatisfyWriteConcern));
                    }
                }
                WriteMode::Tagged(mode) => {
                    if config.custom_write_mode(mode).is_none() {
                        return callback.send(Err(AwaitReplicationError::UnknownReplWriteConcern(mode.clone())));
                    }
                }
                WriteMode::Majority => {}
            }
        }

        let local_only = input.write_concern.w == WriteMode::Nodes(1);
        if !local_only && self.state != MemberState::Primary {
            return callback.send(Err(AwaitReplicationError::NotMaster));
        }
        if self.replication_satisfied(&input) {
            return callback.send(Ok(()));
        }
        self.replication_waiters.push(ReplicationWaiter { input, callback });
    }

    fn replication_satisfied(&self, input: &AwaitReplicationInput) -> bool {
        let config = match &self.config {
            Some(config) => config,
            None => return false,
        };
        let wc = &input.write_concern;
        let durable = wc.is_journaled();
        let mine = if durable { self.my_last_durable } else { self.my_last_applied };
        if mine < input.op_time {
            return false;
        }

        match &wc.w {
            WriteMode::Nodes(n) => *n <= 1 || self.progress.num_reached(config, input.op_time, durable) >= *n,
            WriteMode::Majority => {
                if self.progress.num_voters_reached(config, input.op_time, durable) < config.write_majority() {
                    return false;
                }
                match input.min_snapshot {
                    Some(name) => self
                        .snapshots
                        .current_committed_snapshot()
                        .map_or(false, |s| s.name >= name),
                    None => true,
                }
            }
            WriteMode::Tagged(mode) => config.custom_write_mode(mode).map_or(false, |pattern| {
                self.progress
                    .tag_pattern_satisfied(config, pattern, input.op_time, durable)
            }),
        }
    }

    fn check_replication_waiters(&mut self) {
        let waiters = std::mem::take(&mut self.replication_waiters);
        for waiter in waiters {
            if waiter.callback.is_closed() {
                continue;
            }
            if self.replication_satisfied(&waiter.input) {
                waiter.callback.send(Ok(()));
            } else {
                self.replication_waiters.push(waiter);
            }
        }
    }

    pub(crate) fn handle_wait_until_op_time(
        &mut self,
        input: WaitUntilOpTimeInput,
        callback: Callback<(), ReadConcernError>,
    ) {
        if self.in_shutdown {
            return callback.send(Err(ReadConcernError::ShutdownInProgress));
        }
        if self.config.is_none() {
            return callback.send(Err(ReadConcernError::NotYetInitialized));
        }
        if self.op_time_visible(&input) {
            return callback.send(Ok(()));
        }
        self.op_time_waiters.push(OpTimeWaiter { input, callback });
    }

    fn op_time_visible(&self, input: &WaitUntilOpTimeInput) -> bool {
        match input.level {
            ReadConcernLevel::Local => self.my_last_applied >= input.op_time,
            ReadConcernLevel::Majority => self.snapshots.current_committed_snapshot_op_time() >= input.op_time,
        }
    }

    fn check_op_time_waiters(&mut self) {
        let waiters = std::mem::take(&mut self.op_time_waiters);
        for waiter in waiters {
            if waiter.callback.is_closed() {
                continue;
            }
            if self.op_time_visible(&waiter.input) {
                waiter.callback.send(Ok(()));
            } else {
                self.op_time_waiters.push(waiter);
            }
        }
    }

    // -- snapshots --

    pub(crate) fn handle_reserve_snapshot_name(&mut self) -> SnapshotName {
        self.snapshots.reserve_snapshot_name()
    }

    pub(crate) fn handle_create_snapshot(&mut self, op_time: OpTime, name: SnapshotName) {
        self.snapshots.create_snapshot(op_time, name, self.commit_point);
        self.after_progress_change();
    }

    pub(crate) fn handle_drop_all_snapshots(&mut self) {
        self.snapshots.drop_all_snapshots();
    }

    // -- rollback --

    pub(crate) fn handle_begin_rollback(&mut self) -> Result<(), MemberStateError> {
        self.check_initialized()?;
        self.transition(StateEvent::DivergenceDetected)?;
        Ok(())
    }

    pub(crate) fn handle_finish_rollback(&mut self, input: FinishRollbackInput) -> Result<(), MemberStateError> {
        self.check_initialized()?;
        let event = if input.succeeded {
            StateEvent::RollbackComplete
        } else {
            StateEvent::RollbackFailed
        };
        self.transition(event)?;

        // The oplog was truncated, our optimes go backwards with it.
        self.my_last_applied = input.last_applied;
        self.my_last_durable = input.last_applied;
        self.last_write_ts = Timestamp::default();
        if self.commit_point > input.last_applied {
            self.commit_point = input.last_applied;
        }
        self.update_self_progress();
        self.snapshots.drop_all_snapshots();

        match self.local_state.load_min_valid() {
            Ok(min_valid) => self.min_valid = min_valid.op_time,
            Err(e) => slog::warn!(self.logger, "Failed to read minValid after rollback: {}", e),
        }
        self.awaiting_min_valid = input.succeeded;
        if input.succeeded && self.my_last_applied >= self.min_valid && self.maintenance_count == 0 {
            if self.transition(StateEvent::MinValidReached).is_ok() {
                self.awaiting_min_valid = false;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_shutdown(&mut self) {
        if self.in_shutdown {
            return;
        }
        slog::info!(self.logger, "Shutting down the replication coordinator");
        self.in_shutdown = true;
        self.election = None;
        self.election_timer = None;
        self.heartbeat_timers.clear();
        self.liveness_timers.clear();

        for waiter in self.replication_waiters.drain(..) {
            waiter.callback.send(Err(AwaitReplicationError::ShutdownInProgress));
        }
        for waiter in self.op_time_waiters.drain(..) {
            waiter.callback.send(Err(ReadConcernError::ShutdownInProgress));
        }
        for waiter in self.step_down_waiters.drain(..) {
            waiter.callback.send(Err(StepDownError::ShutdownInProgress));
        }
    }
}
