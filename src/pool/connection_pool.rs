use crate::clock::{Clock, RealClock};
use crate::pool::connection::{ReturnConnection, ReturnedConnection};
use crate::pool::{ConnectionFactory, ConnectionHandle, ConnectionPoolOptionsValidated, PoolError, PooledConnection};
use crate::types::HostAndPort;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{self, AtomicU64};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

const SHUTDOWN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

type HandleResult<Conn> = Result<ConnectionHandle<Conn>, PoolError>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HostPoolState {
    Running,
    Idle,
    InShutdown,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct HostStats {
    pub in_use: usize,
    pub available: usize,
    pub created: usize,
    pub refreshing: usize,
}

impl HostStats {
    fn add(&mut self, other: &HostStats) {
        self.in_use += other.in_use;
        self.available += other.available;
        self.created += other.created;
        self.refreshing += other.refreshing;
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub hosts: HashMap<HostAndPort, HostStats>,
    pub total: HostStats,
}

struct Request<Conn: PooledConnection> {
    deadline: Instant,
    seq: u64,
    tx: oneshot::Sender<HandleResult<Conn>>,
}

impl<Conn: PooledConnection> PartialEq for Request<Conn> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<Conn: PooledConnection> Eq for Request<Conn> {}

impl<Conn: PooledConnection> PartialOrd for Request<Conn> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Conn: PooledConnection> Ord for Request<Conn> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct ReadyConnection<Conn> {
    conn: Conn,
    ready_seq: u64,
}

/// Everything the pool knows about one host. Lives under the pool-wide mutex.
struct HostPool<Conn: PooledConnection> {
    logger: slog::Logger,
    state: HostPoolState,
    generation: u64,
    ready: HashMap<u64, ReadyConnection<Conn>>,
    processing: HashSet<u64>,
    dropped_processing: HashSet<u64>,
    checked_out: HashSet<u64>,
    // Earliest deadline first.
    requests: BinaryHeap<Reverse<Request<Conn>>>,
    created: usize,
    active_clients: usize,
    armed_deadline: Option<Instant>,
    timer_seq: u64,
    ready_seq: u64,
    request_seq: u64,
    // Set while the outermost call runs; nested calls return at once.
    fulfilling: bool,
    spawning: bool,
}

impl<Conn: PooledConnection> HostPool<Conn> {
    fn new(logger: slog::Logger) -> Self {
        HostPool {
            logger,
            state: HostPoolState::Running,
            generation: 0,
            ready: HashMap::new(),
            processing: HashSet::new(),
            dropped_processing: HashSet::new(),
            checked_out: HashSet::new(),
            requests: BinaryHeap::new(),
            created: 0,
            active_clients: 0,
            armed_deadline: None,
            timer_seq: 0,
            ready_seq: 0,
            request_seq: 0,
            fulfilling: false,
            spawning: false,
        }
    }

    fn open_connections(&self) -> usize {
        self.ready.len() + self.processing.len() + self.checked_out.len()
    }

    fn cancel_timer(&mut self) {
        self.timer_seq += 1;
        self.armed_deadline = None;
    }

    fn fail_requests(&mut self, error: &PoolError, completions: &mut Completions<Conn>) {
        while let Some(Reverse(request)) = self.requests.pop() {
            completions.push(request.tx, Err(error.clone()));
        }
    }

    fn stats(&self) -> HostStats {
        HostStats {
            in_use: self.checked_out.len(),
            available: self.ready.len(),
            created: self.created,
            refreshing: self.processing.len(),
        }
    }
}

struct PoolState<Conn: PooledConnection> {
    hosts: HashMap<HostAndPort, HostPool<Conn>>,
    shutting_down: bool,
}

/// Request completions gathered under the mutex and delivered after it is released.
struct Completions<Conn: PooledConnection> {
    items: Vec<(oneshot::Sender<HandleResult<Conn>>, HandleResult<Conn>)>,
}

impl<Conn: PooledConnection> Completions<Conn> {
    fn new() -> Self {
        Completions { items: Vec::new() }
    }

    fn push(&mut self, tx: oneshot::Sender<HandleResult<Conn>>, result: HandleResult<Conn>) {
        self.items.push((tx, result));
    }
}

/// ConnectionPool keeps, per host, a set of ready connections and hands them out in request
/// deadline order.
pub struct ConnectionPool<F: ConnectionFactory, C: Clock = RealClock> {
    inner: Arc<PoolInner<F, C>>,
}

impl<F: ConnectionFactory, C: Clock> Clone for ConnectionPool<F, C> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: self.inner.clone(),
        }
    }
}

struct PoolInner<F: ConnectionFactory, C: Clock> {
    logger: slog::Logger,
    factory: F,
    options: ConnectionPoolOptionsValidated,
    clock: C,
    runtime: tokio::runtime::Handle,
    state: Mutex<PoolState<F::Connection>>,
    next_connection_id: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionPool<F, RealClock> {
    /// Must be called within a tokio runtime.
    pub fn new(logger: slog::Logger, factory: F, options: ConnectionPoolOptionsValidated) -> Self {
        Self::with_clock(logger, factory, options, RealClock)
    }
}

impl<F: ConnectionFactory, C: Clock> ConnectionPool<F, C> {
    pub fn with_clock(logger: slog::Logger, factory: F, options: ConnectionPoolOptionsValidated, clock: C) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                logger,
                factory,
                options,
                clock,
                runtime: tokio::runtime::Handle::current(),
                state: Mutex::new(PoolState {
                    hosts: HashMap::new(),
                    shutting_down: false,
                }),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Waits for a connection to `host`. The wait is bounded by the smaller of `timeout` and the
    /// refresh timeout.
    pub async fn get(
        &self,
        host: &HostAndPort,
        timeout: Duration,
    ) -> Result<ConnectionHandle<F::Connection>, PoolError> {
        let rx = self.inner.enqueue_request(host, timeout)?;
        rx.await.unwrap_or(Err(PoolError::ShutdownInProgress))
    }

    /// Fails every pending request for `host` and discards its connections.
    pub fn drop_connections(&self, host: &HostAndPort) {
        self.inner.drop_connections(host);
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let mut stats = PoolStats::default();
        for (host, pool) in state.hosts.iter() {
            let host_stats = pool.stats();
            stats.total.add(&host_stats);
            stats.hosts.insert(host.clone(), host_stats);
        }
        stats
    }

    pub fn host_state(&self, host: &HostAndPort) -> Option<HostPoolState> {
        self.inner.lock().hosts.get(host).map(|pool| pool.state)
    }

    /// The generation a connection must carry to be accepted back for `host`.
    pub fn generation(&self, host: &HostAndPort) -> Option<u64> {
        self.inner.lock().hosts.get(host).map(|pool| pool.generation)
    }
}

impl<F: ConnectionFactory, C: Clock> PoolInner<F, C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().expect("ConnectionPool mutex guard poison")
    }

    fn returner(self: &Arc<Self>) -> Weak<dyn ReturnConnection<F::Connection>> {
        let as_dyn: Arc<dyn ReturnConnection<F::Connection>> = self.clone();
        Arc::downgrade(&as_dyn)
    }

    fn enqueue_request(
        self: &Arc<Self>,
        host: &HostAndPort,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<HandleResult<F::Connection>>, PoolError> {
        let (tx, rx) = oneshot::channel();
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            if state.shutting_down {
                return Err(PoolError::ShutdownInProgress);
            }
            let logger = &self.logger;
            let pool = state
                .hosts
                .entry(host.clone())
                .or_insert_with(|| HostPool::new(logger.new(slog::o!("Host" => host.to_string()))));

            let timeout = timeout.min(self.options.refresh_timeout);
            pool.request_seq += 1;
            pool.requests.push(Reverse(Request {
                deadline: self.clock.now() + timeout,
                seq: pool.request_seq,
                tx,
            }));

            self.make_progress(host, pool, &mut completions);
        }
        self.deliver(host, completions);

        Ok(rx)
    }

    fn make_progress(
        self: &Arc<Self>,
        host: &HostAndPort,
        pool: &mut HostPool<F::Connection>,
        completions: &mut Completions<F::Connection>,
    ) {
        self.spawn_connections(host, pool);
        if self.fulfill_requests(host, pool, completions) {
            // Unhealthy connections were discarded while fulfilling.
            self.spawn_connections(host, pool);
        }
        self.update_state(host, pool);
    }

    fn spawn_connections(self: &Arc<Self>, host: &HostAndPort, pool: &mut HostPool<F::Connection>) {
        if pool.spawning {
            return;
        }
        pool.spawning = true;
        let wanted = (pool.requests.len() + pool.checked_out.len()).min(self.options.max_connections);
        let target = self.options.min_connections.max(wanted);

        while pool.open_connections() < target && pool.processing.len() < self.options.max_connecting {
            let id = self.next_connection_id.fetch_add(1, atomic::Ordering::Relaxed);
            let conn = self.factory.make_connection(host, pool.generation);
            pool.processing.insert(id);
            pool.created += 1;
            slog::debug!(pool.logger, "Spawning connection {}", id; "Generation" => pool.generation);
            self.spawn_setup(host.clone(), id, pool.generation, conn);
        }
        pool.spawning = false;
    }

    fn spawn_setup(self: &Arc<Self>, host: HostAndPort, id: u64, generation: u64, mut conn: F::Connection) {
        let weak = Arc::downgrade(self);
        let timeout = self.options.refresh_timeout;
        self.runtime.spawn(async move {
            let result = conn.setup(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_processed(host, id, generation, conn, result);
            }
        });
    }

    fn spawn_refresh(self: &Arc<Self>, host: HostAndPort, id: u64, generation: u64, mut conn: F::Connection) {
        let weak = Arc::downgrade(self);
        let timeout = self.options.refresh_timeout;
        self.runtime.spawn(async move {
            let result = conn.refresh(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_processed(host, id, generation, conn, result);
            }
        });
    }

    /// Completion of a setup or refresh.
    fn on_connection_processed(
        self: &Arc<Self>,
        host: HostAndPort,
        id: u64,
        generation: u64,
        conn: F::Connection,
        result: Result<(), PoolError>,
    ) {
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            let pool = match state.hosts.get_mut(&host) {
                Some(pool) => pool,
                None => return,
            };

            pool.processing.remove(&id);
            if pool.dropped_processing.remove(&id) || generation != pool.generation {
                slog::debug!(pool.logger, "Discarding connection {} from an older generation", id);
                return;
            }

            match result {
                Ok(()) => {
                    self.add_to_ready(&host, pool, id, conn);
                    self.make_progress(&host, pool, &mut completions);
                }
                Err(PoolError::ExceededTimeLimit) => {
                    // The requester's own deadline is independent, so just try another connection.
                    slog::warn!(pool.logger, "Connection {} timed out during setup or refresh", id);
                    drop(conn);
                    self.make_progress(&host, pool, &mut completions);
                }
                Err(error) => {
                    drop(conn);
                    self.process_failure(&host, pool, error, &mut completions);
                }
            }
        }
        self.deliver(&host, completions);
    }

    fn add_to_ready(self: &Arc<Self>, host: &HostAndPort, pool: &mut HostPool<F::Connection>, id: u64, conn: F::Connection) {
        pool.ready_seq += 1;
        let ready_seq = pool.ready_seq;
        pool.ready.insert(id, ReadyConnection { conn, ready_seq });
        self.spawn_refresh_timer(host.clone(), id, ready_seq);
    }

    fn spawn_refresh_timer(self: &Arc<Self>, host: HostAndPort, id: u64, ready_seq: u64) {
        let weak = Arc::downgrade(self);
        let mut clock = self.clock.clone();
        let delay = self.options.refresh_requirement;
        self.runtime.spawn(async move {
            clock.sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_refresh_timer(host, id, ready_seq);
            }
        });
    }

    fn on_refresh_timer(self: &Arc<Self>, host: HostAndPort, id: u64, ready_seq: u64) {
        let mut state = self.lock();
        let pool = match state.hosts.get_mut(&host) {
            Some(pool) => pool,
            None => return,
        };
        // The connection may have been checked out (or dropped) since the timer was armed.
        let still_idle = matches!(pool.ready.get(&id), Some(ready) if ready.ready_seq == ready_seq);
        if !still_idle {
            return;
        }
        if let Some(ready) = pool.ready.remove(&id) {
            pool.processing.insert(id);
            slog::debug!(pool.logger, "Refreshing idle connection {}", id);
            self.spawn_refresh(host.clone(), id, pool.generation, ready.conn);
        }
    }

    /// Returns true when an unhealthy connection was discarded.
    fn fulfill_requests(
        self: &Arc<Self>,
        host: &HostAndPort,
        pool: &mut HostPool<F::Connection>,
        completions: &mut Completions<F::Connection>,
    ) -> bool {
        if pool.fulfilling {
            return false;
        }
        pool.fulfilling = true;
        let mut discarded = false;
        loop {
            // Callers that stopped waiting do not get a connection.
            while matches!(pool.requests.peek(), Some(Reverse(request)) if request.tx.is_closed()) {
                pool.requests.pop();
            }
            if pool.requests.is_empty() {
                break;
            }

            let id = match pool.ready.keys().next().copied() {
                Some(id) => id,
                None => break,
            };
            let ready = match pool.ready.remove(&id) {
                Some(ready) => ready,
                None => break,
            };
            if !ready.conn.is_healthy() {
                slog::debug!(pool.logger, "Discarding unhealthy connection {}", id);
                discarded = true;
                continue;
            }

            let request = match pool.requests.pop() {
                Some(Reverse(request)) => request,
                None => break,
            };
            pool.checked_out.insert(id);
            let handle = ConnectionHandle::new(
                ready.conn,
                id,
                pool.generation,
                host.clone(),
                self.clock.now(),
                self.returner(),
            );
            completions.push(request.tx, Ok(handle));
        }
        pool.fulfilling = false;
        discarded
    }

    fn update_state(self: &Arc<Self>, host: &HostAndPort, pool: &mut HostPool<F::Connection>) {
        if let Some(Reverse(request)) = pool.requests.peek() {
            let deadline = request.deadline;
            if pool.state != HostPoolState::Running {
                slog::debug!(pool.logger, "Host pool is running again");
                pool.state = HostPoolState::Running;
            }
            self.arm_timer(host, pool, deadline);
        } else if !pool.checked_out.is_empty() {
            pool.state = HostPoolState::Running;
            pool.cancel_timer();
        } else if pool.state == HostPoolState::Running {
            slog::debug!(pool.logger, "Host pool is idle");
            pool.state = HostPoolState::Idle;
            let deadline = self.clock.now() + self.options.host_timeout;
            self.arm_timer(host, pool, deadline);
        }
    }

    fn arm_timer(self: &Arc<Self>, host: &HostAndPort, pool: &mut HostPool<F::Connection>, deadline: Instant) {
        if pool.armed_deadline == Some(deadline) {
            return;
        }
        pool.timer_seq += 1;
        pool.armed_deadline = Some(deadline);

        let timer_seq = pool.timer_seq;
        let host = host.clone();
        let weak = Arc::downgrade(self);
        let mut clock = self.clock.clone();
        self.runtime.spawn(async move {
            clock.sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_host_timer(host, timer_seq);
            }
        });
    }

    fn on_host_timer(self: &Arc<Self>, host: HostAndPort, timer_seq: u64) {
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            let pool = match state.hosts.get_mut(&host) {
                Some(pool) => pool,
                None => return,
            };
            if pool.timer_seq != timer_seq {
                return;
            }
            pool.armed_deadline = None;

            let shutdown = match pool.state {
                HostPoolState::Running => {
                    let now = self.clock.now();
                    while matches!(pool.requests.peek(), Some(Reverse(request)) if request.deadline <= now) {
                        if let Some(Reverse(request)) = pool.requests.pop() {
                            completions.push(request.tx, Err(PoolError::ExceededTimeLimit));
                        }
                    }
                    self.update_state(&host, pool);
                    false
                }
                HostPoolState::Idle => {
                    slog::info!(pool.logger, "Host pool timed out while idle, shutting down");
                    pool.state = HostPoolState::InShutdown;
                    true
                }
                HostPoolState::InShutdown => true,
            };

            if shutdown {
                self.try_shutdown_host(&mut state.hosts, &host);
            }
        }
        self.deliver(&host, completions);
    }

    fn try_shutdown_host(self: &Arc<Self>, hosts: &mut HashMap<HostAndPort, HostPool<F::Connection>>, host: &HostAndPort) {
        let can_destroy = match hosts.get_mut(host) {
            Some(pool) if pool.processing.is_empty() && pool.active_clients == 0 => true,
            Some(pool) => {
                let retry_at = self.clock.now() + SHUTDOWN_RETRY_INTERVAL;
                self.arm_timer(host, pool, retry_at);
                false
            }
            None => false,
        };
        if can_destroy {
            if let Some(pool) = hosts.remove(host) {
                slog::info!(pool.logger, "Destroyed host pool"; "Created" => pool.created);
            }
        }
    }

    fn process_failure(
        self: &Arc<Self>,
        host: &HostAndPort,
        pool: &mut HostPool<F::Connection>,
        error: PoolError,
        completions: &mut Completions<F::Connection>,
    ) {
        pool.generation += 1;
        pool.ready.clear();
        let processing: Vec<u64> = pool.processing.drain().collect();
        pool.dropped_processing.extend(processing);
        pool.fail_requests(&error, completions);

        slog::info!(
            pool.logger,
            "Dropping all pooled connections: {}", error;
            "Generation" => pool.generation
        );
        self.update_state(host, pool);
    }

    fn drop_connections(self: &Arc<Self>, host: &HostAndPort) {
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            if let Some(pool) = state.hosts.get_mut(host) {
                self.process_failure(host, pool, PoolError::PooledConnectionsDropped, &mut completions);
            }
        }
        self.deliver(host, completions);
    }

    fn shutdown(self: &Arc<Self>) {
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            state.shutting_down = true;
            for (_, mut pool) in state.hosts.drain() {
                pool.fail_requests(&PoolError::ShutdownInProgress, &mut completions);
            }
        }
        slog::info!(self.logger, "Connection pool shut down");
        for (tx, result) in completions.items {
            let _ = tx.send(result);
        }
    }

    /// Sends completions with the mutex released. A send that finds its receiver gone drops the
    /// handle, which re-enters the pool through `return_connection`.
    fn deliver(self: &Arc<Self>, host: &HostAndPort, completions: Completions<F::Connection>) {
        if completions.items.is_empty() {
            return;
        }

        if let Some(pool) = self.lock().hosts.get_mut(host) {
            pool.active_clients += 1;
        }
        for (tx, result) in completions.items {
            let _ = tx.send(result);
        }
        if let Some(pool) = self.lock().hosts.get_mut(host) {
            pool.active_clients = pool.active_clients.saturating_sub(1);
        }
    }
}

impl<F: ConnectionFactory, C: Clock> ReturnConnection<F::Connection> for PoolInner<F, C> {
    fn return_connection(self: Arc<Self>, returned: ReturnedConnection<F::Connection>) {
        let host = returned.host.clone();
        let mut completions = Completions::new();
        {
            let mut state = self.lock();
            let pool = match state.hosts.get_mut(&host) {
                Some(pool) => pool,
                None => return,
            };
            pool.checked_out.remove(&returned.id);

            if returned.generation != pool.generation {
                slog::debug!(pool.logger, "Discarding returned connection {} from an older generation", returned.id);
            } else if let Some(Err(error)) = &returned.outcome {
                slog::debug!(pool.logger, "Discarding failed connection {}: {}", returned.id, error);
            } else {
                // A connection returned with an outcome was in use until now.
                let now = self.clock.now();
                let last_used = if returned.outcome.is_some() {
                    now
                } else {
                    returned.checked_out_at
                };
                let idle = now.saturating_duration_since(last_used);
                if idle >= self.options.refresh_requirement {
                    pool.processing.insert(returned.id);
                    self.spawn_refresh(host.clone(), returned.id, returned.generation, returned.conn);
                } else {
                    self.add_to_ready(&host, pool, returned.id, returned.conn);
                }
            }

            self.make_progress(&host, pool, &mut completions);
        }
        self.deliver(&host, completions);
    }
}
