use crate::pool::{ConnectionFactory, PoolError, PooledConnection};
use crate::types::HostAndPort;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::Duration;

/// MockConnectionFactory hands out connections whose setup and refresh outcomes are scripted.
/// A gated factory holds every setup until the test opens the gate.
#[derive(Clone)]
pub(crate) struct MockConnectionFactory {
    shared: Arc<MockShared>,
}

struct MockShared {
    gated: AtomicBool,
    gate: Semaphore,
    setup_results: Mutex<VecDeque<Result<(), PoolError>>>,
    refresh_results: Mutex<VecDeque<Result<(), PoolError>>>,
    unhealthy: Mutex<HashSet<usize>>,
    made: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MockConnectionFactory {
    pub(crate) fn new() -> Self {
        MockConnectionFactory {
            shared: Arc::new(MockShared {
                gated: AtomicBool::new(false),
                gate: Semaphore::new(0),
                setup_results: Mutex::new(VecDeque::new()),
                refresh_results: Mutex::new(VecDeque::new()),
                unhealthy: Mutex::new(HashSet::new()),
                made: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn gated() -> Self {
        let factory = Self::new();
        factory.shared.gated.store(true, Ordering::Release);
        factory
    }

    /// Lets `n` pending or future setups proceed.
    pub(crate) fn open_gate(&self, n: usize) {
        self.shared.gate.add_permits(n);
    }

    /// Queues the outcome of the next setup to pass the gate. Unscripted setups succeed.
    pub(crate) fn push_setup_result(&self, result: Result<(), PoolError>) {
        self.shared.setup_results.lock().unwrap().push_back(result);
    }

    #[allow(dead_code)]
    pub(crate) fn push_refresh_result(&self, result: Result<(), PoolError>) {
        self.shared.refresh_results.lock().unwrap().push_back(result);
    }

    /// Marks the `index`-th connection made (zero based) as unhealthy.
    pub(crate) fn mark_unhealthy(&self, index: usize) {
        self.shared.unhealthy.lock().unwrap().insert(index);
    }

    pub(crate) fn connections_made(&self) -> usize {
        self.shared.made.load(Ordering::Acquire)
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.shared.refreshes.load(Ordering::Acquire)
    }
}

impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    fn make_connection(&self, _host: &HostAndPort, _generation: u64) -> MockConnection {
        let index = self.shared.made.fetch_add(1, Ordering::AcqRel);
        MockConnection {
            shared: self.shared.clone(),
            index,
        }
    }
}

pub(crate) struct MockConnection {
    shared: Arc<MockShared>,
    index: usize,
}

#[async_trait::async_trait]
impl PooledConnection for MockConnection {
    async fn setup(&mut self, _timeout: Duration) -> Result<(), PoolError> {
        if self.shared.gated.load(Ordering::Acquire) {
            self.shared
                .gate
                .acquire()
                .await
                .map_err(|_| PoolError::NetworkError("gate closed".to_string()))?
                .forget();
        }
        self.shared.setup_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn refresh(&mut self, _timeout: Duration) -> Result<(), PoolError> {
        self.shared.refreshes.fetch_add(1, Ordering::AcqRel);
        self.shared.refresh_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn is_healthy(&self) -> bool {
        !self.shared.unhealthy.lock().unwrap().contains(&self.index)
    }
}
