use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use replset::{
    AwaitReplicationError, AwaitReplicationInput, ConnectionFactory, ConnectionPool, ConnectionPoolOptions,
    ConnectionPoolOptionsValidated, Document, HostAndPort, InMemoryRollbackSource, InitiateError, MemberState,
    NodeTransport, OpTime,
    OpType, OperationContext, OplogEntry, PoolError, PooledConnection, Record, RecordStoreOptions, RecoveryUnit,
    ReplSetNode, ReplSetNodeConfig, ReplicationOptions, RollbackSource, StorageCatalog, SyncPass, Term, Timestamp,
    UpdatePositionEntry, UpdatePositionInput, UpdateTermError, Value, VolatileLocalState, WriteConcernOptions,
    WriteError,
};
use slog::Drain;
use std::convert::TryFrom;
use std::fs::OpenOptions;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn single_node_election_and_write_visibility() {
    // -- setup --
    let node = loopback_node("a:1", &replset::LoopbackNetwork::new()).await;

    // -- execute --
    node.initiate(config_doc(&["a:1"])).await.unwrap();

    // -- verify --
    assert!(node.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);
    let status = node.coordinator().status().await;
    assert_eq!(status.state, MemberState::Primary);
    assert_eq!(status.term, Term::new(1));

    let ctx = OperationContext::new();
    let doc = Document::new().with("_id", 1i64).with("a", 1i64);
    let op_time = node.insert(&ctx, "t.c", doc.clone(), None).await.unwrap();
    assert_eq!(op_time.term(), Term::new(1));

    node.catalog()
        .oplog()
        .wait_for_all_earlier_oplog_writes_to_be_visible(&ctx)
        .await
        .unwrap();
    let mut cursor = node.catalog().oplog().cursor(replset::CursorDirection::Forward);
    let record = cursor.next().expect("insert is visible to a forward cursor");
    let entry = OplogEntry::decode(&record.data).unwrap();
    assert_eq!(entry.op_time(), op_time);
    assert_eq!(entry.op, OpType::Insert);
    assert_eq!(node.find_one("t.c", &Value::from(1i64)).unwrap(), Some(doc));

    node.shutdown().await;
}

#[tokio::test]
async fn three_node_election_over_loopback() {
    // -- setup --
    let network = replset::LoopbackNetwork::new();
    let hosts = ["a:1", "b:1", "c:1"];
    let mut nodes = Vec::new();
    for host in hosts.iter() {
        nodes.push(loopback_node(host, &network).await);
    }

    // -- execute --
    initiate_all(&nodes, &hosts).await;

    // -- verify --
    let primary = wait_for_single_primary(&nodes, Duration::from_secs(15)).await;
    let term = nodes[primary].coordinator().status().await.term;
    for (i, node) in nodes.iter().enumerate() {
        if i == primary {
            continue;
        }
        let follower = node
            .coordinator()
            .wait_for_member_state(MemberState::Secondary, Duration::from_secs(5))
            .await;
        assert_eq!(follower, Some(MemberState::Secondary));
        assert!(node.coordinator().status().await.term >= term);
    }

    for node in nodes.iter() {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn write_concern_waits_for_a_second_member() {
    // -- setup --
    let network = replset::LoopbackNetwork::new();
    let hosts = ["a:2", "b:2", "c:2"];
    let mut nodes = Vec::new();
    for host in hosts.iter() {
        nodes.push(loopback_node(host, &network).await);
    }
    initiate_all(&nodes, &hosts).await;
    let primary_index = wait_for_single_primary(&nodes, Duration::from_secs(15)).await;
    let primary = &nodes[primary_index];
    assert!(primary.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);
    let secondary_id = nodes[(primary_index + 1) % nodes.len()]
        .coordinator()
        .status()
        .await
        .self_id
        .unwrap();

    let ctx = OperationContext::new();
    let mut w2 = WriteConcernOptions::nodes(2);
    w2.w_timeout = Some(Duration::from_millis(300));

    // -- execute --
    // Background sync is off, so nobody else reaches the write on their own.
    let result = primary
        .insert(&ctx, "t.c", Document::new().with("_id", 1i64), Some(w2.clone()))
        .await;
    let op_time = primary.coordinator().status().await.my_last_applied;

    // -- verify --
    assert!(matches!(
        result,
        Err(WriteError::WriteConcern(AwaitReplicationError::WriteConcernFailed))
    ));

    primary
        .coordinator()
        .update_position(UpdatePositionInput::Modern(vec![UpdatePositionEntry {
            member_id: secondary_id,
            config_version: 1,
            applied_op_time: op_time,
            durable_op_time: op_time,
        }]))
        .await
        .unwrap();
    let satisfied = primary
        .coordinator()
        .await_replication(
            &ctx,
            AwaitReplicationInput {
                op_time,
                write_concern: w2,
                min_snapshot: None,
            },
        )
        .await;
    assert_eq!(satisfied, Ok(()));

    for node in nodes.iter() {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn secondaries_pull_the_primary_oplog_and_acknowledge() {
    // -- setup --
    let network = replset::LoopbackNetwork::new();
    let hosts = ["a:5", "b:5", "c:5"];
    let mut nodes = Vec::new();
    for host in hosts.iter() {
        nodes.push(loopback_node_with(host, &network, syncing_options()).await);
    }
    initiate_all(&nodes, &hosts).await;
    let primary_index = wait_for_single_primary(&nodes, Duration::from_secs(15)).await;
    let primary = &nodes[primary_index];
    assert!(primary.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);

    let ctx = OperationContext::new();
    let mut w3 = WriteConcernOptions::nodes(3);
    w3.w_timeout = Some(Duration::from_secs(10));
    let doc = Document::new().with("_id", 1i64).with("a", 1i64);

    // -- execute --
    let op_time = primary.insert(&ctx, "t.c", doc.clone(), Some(w3)).await.unwrap();

    // -- verify --
    for node in nodes.iter() {
        assert_eq!(node.find_one("t.c", &Value::from(1i64)).unwrap(), Some(doc.clone()));
        let last = node.catalog().local_oplog().last_entry().unwrap().unwrap();
        assert_eq!(last.op_time(), op_time);
        assert!(node.coordinator().status().await.my_last_applied >= op_time);
    }
    wait_until_commit_point(primary, op_time, Duration::from_secs(5)).await;

    for node in nodes.iter() {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn sync_pass_outside_secondary_does_nothing() {
    // -- setup --
    let node = loopback_node("a:6", &replset::LoopbackNetwork::new()).await;
    node.initiate(config_doc(&["a:6"])).await.unwrap();
    assert!(node.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);

    // -- execute --
    let pass = node.sync_once(&OperationContext::new()).await.unwrap();

    // -- verify --
    assert_eq!(pass, SyncPass::NotSecondary(MemberState::Primary));
    assert_eq!(node.choose_sync_source().await, None);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_writes_land_in_timestamp_order() {
    // -- setup --
    let node = Arc::new(loopback_node("a:7", &replset::LoopbackNetwork::new()).await);
    node.initiate(config_doc(&["a:7"])).await.unwrap();
    assert!(node.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);
    let writers = 8i64;
    let writes_per_writer = 50i64;

    // -- execute --
    let mut handles = Vec::new();
    for writer in 0..writers {
        let node = node.clone();
        handles.push(tokio::spawn(async move {
            let ctx = OperationContext::new();
            for i in 0..writes_per_writer {
                let doc = Document::new().with("_id", writer * 1000 + i);
                node.insert(&ctx, "t.c", doc, None).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // -- verify --
    let ctx = OperationContext::new();
    node.catalog()
        .oplog()
        .wait_for_all_earlier_oplog_writes_to_be_visible(&ctx)
        .await
        .unwrap();
    let mut cursor = node.catalog().oplog().cursor(replset::CursorDirection::Forward);
    let mut inserts = Vec::new();
    while let Some(record) = cursor.next() {
        let entry = OplogEntry::decode(&record.data).unwrap();
        if entry.op == OpType::Insert {
            inserts.push(entry.op_time());
        }
    }
    assert_eq!(inserts.len() as i64, writers * writes_per_writer);
    assert!(inserts.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(node.catalog().get_collection("t.c").unwrap().num_records(), writers * writes_per_writer);

    node.shutdown().await;
}

#[tokio::test]
async fn update_term_steps_primary_down_first() {
    // -- setup --
    let node = loopback_node("a:3", &replset::LoopbackNetwork::new()).await;
    node.initiate(config_doc(&["a:3"])).await.unwrap();
    assert!(node.coordinator().wait_for_drain_finish(Duration::from_secs(5)).await);

    // -- execute --
    let first = node.coordinator().update_term(Term::new(2)).await;

    // -- verify --
    assert_eq!(first, Err(UpdateTermError::StaleTerm));
    let status = node.coordinator().status().await;
    assert_eq!(status.term, Term::new(1));
    assert_eq!(status.state, MemberState::Secondary);

    let second = node.coordinator().update_term(Term::new(2)).await;
    assert_eq!(second, Err(UpdateTermError::StaleTerm));
    assert_eq!(node.coordinator().status().await.term, Term::new(2));

    node.shutdown().await;
}

#[tokio::test]
async fn rollback_of_a_delete_against_a_source_catalog() {
    // -- setup --
    // The second member never starts, so the node stays a secondary.
    let node = loopback_node("a:4", &replset::LoopbackNetwork::new()).await;
    node.initiate(config_doc(&["a:4", "b:4"])).await.unwrap();
    let state = node
        .coordinator()
        .wait_for_member_state(MemberState::Secondary, Duration::from_secs(5))
        .await;
    assert_eq!(state, Some(MemberState::Secondary));

    append(node.catalog(), &[noop(1), delete_of_id_0(2)]);

    let source_catalog = Arc::new(StorageCatalog::new(logger(), 1 << 20, Arc::new(replset::NoopJournal)).unwrap());
    append(&source_catalog, &[noop(1)]);
    insert(&source_catalog, "t.c", Document::new().with("_id", 0i64).with("a", 1i64));
    let source = InMemoryRollbackSource::new(source_catalog, Arc::new(VolatileLocalState::new()));

    // -- execute --
    let ctx = OperationContext::new();
    let result = node.rollback(&ctx, &source).await;

    // -- verify --
    assert_eq!(result.unwrap(), op_time(1));
    let collection = node.catalog().get_collection("t.c").unwrap();
    assert_eq!(collection.num_records(), 1);
    assert_eq!(
        node.find_one("t.c", &Value::from(0i64)).unwrap(),
        Some(Document::new().with("_id", 0i64).with("a", 1i64))
    );
    assert_eq!(node.catalog().oplog().num_records(), 1);
    assert_eq!(node.rollback_source().get_rollback_id().await.unwrap(), 2);
    assert_ne!(node.coordinator().status().await.state, MemberState::Rollback);

    node.shutdown().await;
}

#[tokio::test]
async fn rollback_of_a_delete_over_grpc() {
    // -- setup --
    let local_port = 47311;
    let source_port = 47312;
    let local = grpc_node(local_port).await;
    let source = grpc_node(source_port).await;
    let local_host = HostAndPort::new("localhost", local_port);
    let source_host = HostAndPort::new("localhost", source_port);

    // The source is never initiated; it only serves its oplog and documents.
    let hosts = [local_host.to_string(), source_host.to_string()];
    local
        .initiate(config_doc(&[hosts[0].as_str(), hosts[1].as_str()]))
        .await
        .unwrap();
    let state = local
        .coordinator()
        .wait_for_member_state(MemberState::Secondary, Duration::from_secs(5))
        .await;
    assert_eq!(state, Some(MemberState::Secondary));

    append(local.catalog(), &[noop(1), delete_of_id_0(2)]);
    append(source.catalog(), &[noop(1)]);
    insert(source.catalog(), "t.c", Document::new().with("_id", 0i64).with("a", 1i64));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // -- execute --
    let ctx = OperationContext::new();
    let result = local.rollback_from(&ctx, &source_host).await;

    // -- verify --
    assert_eq!(result.unwrap(), op_time(1));
    assert_eq!(
        local.find_one("t.c", &Value::from(0i64)).unwrap(),
        Some(Document::new().with("_id", 0i64).with("a", 1i64))
    );
    assert_eq!(local.catalog().oplog().num_records(), 1);
    assert_eq!(local.rollback_source().get_rollback_id().await.unwrap(), 2);

    local.shutdown().await;
    source.shutdown().await;
}

#[tokio::test]
async fn oplog_stones_reclaim_the_oldest_stone() {
    // -- setup --
    let options = RecordStoreOptions {
        min_bytes_per_stone: Some(1 << 20),
        num_stones_to_keep: Some(10),
        ..RecordStoreOptions::oplog(10 << 20)
    };
    let catalog = StorageCatalog::with_oplog_options(logger(), options, Arc::new(replset::NoopJournal)).unwrap();
    let oplog = catalog.oplog();
    let stones = oplog.oplog_stones().unwrap();
    let payload = Value::from(Bytes::from(vec![7u8; 64 << 10]));

    // -- execute --
    // Inserts run without yielding, so the reclaim worker only runs once we await below.
    let mut secs = 0;
    while stones.num_stones() <= 10 {
        secs += 1;
        let entry = OplogEntry::new(
            Timestamp::new(secs, 1),
            Term::new(1),
            secs as i64,
            OpType::Insert,
            "t.c",
            Document::new().with("_id", secs as i64).with("payload", payload.clone()),
        );
        append(&catalog, &[entry]);
    }
    let first_stone = stones.stones()[0].clone();
    let records_before = oplog.num_records();

    // -- verify --
    wait_until(|| stones.num_stones() == 10, Duration::from_secs(5)).await;
    assert_eq!(oplog.num_records(), records_before - first_stone.records);
    assert_eq!(stones.first_record(), first_stone.last_record);
}

#[tokio::test]
async fn pool_setup_failure_fails_every_pending_request() {
    // -- setup --
    let factory = FlakyFactory::default();
    factory.failing.store(true, Ordering::SeqCst);
    let options = ConnectionPoolOptionsValidated::try_from(ConnectionPoolOptions::default()).unwrap();
    let pool = ConnectionPool::new(logger(), factory.clone(), options);
    let host: HostAndPort = "h:1".parse().unwrap();
    let timeout = Duration::from_secs(1);

    // -- execute --
    let (r1, r2, r3) = tokio::join!(pool.get(&host, timeout), pool.get(&host, timeout), pool.get(&host, timeout));

    // -- verify --
    for result in vec![r1, r2, r3] {
        assert!(matches!(result, Err(PoolError::NetworkError(_))));
    }

    factory.failing.store(false, Ordering::SeqCst);
    let setups_before = factory.setups.load(Ordering::SeqCst);
    let handle = pool.get(&host, timeout).await.unwrap();
    assert!(handle.is_healthy());
    assert!(factory.setups.load(Ordering::SeqCst) > setups_before);

    pool.shutdown();
}

// --------- helpers ---------

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn config_doc(hosts: &[&str]) -> Document {
    let members = hosts
        .iter()
        .enumerate()
        .map(|(id, host)| Value::from(Document::new().with("_id", id as i64).with("host", *host)))
        .collect::<Vec<_>>();

    Document::new()
        .with("_id", "s")
        .with("version", 1)
        .with("protocolVersion", 1)
        .with("members", members)
}

/// Background sync is off so tests can shape each oplog by hand.
fn fast_options() -> ReplicationOptions {
    ReplicationOptions {
        election_timeout: Some(Duration::from_millis(1000)),
        heartbeat_interval: Some(Duration::from_millis(200)),
        rpc_timeout: Some(Duration::from_millis(500)),
        db_path: Some(std::env::temp_dir().join(format!("replset-it-{}", std::process::id()))),
        sync_interval: Some(Duration::from_secs(0)),
        ..Default::default()
    }
}

fn syncing_options() -> ReplicationOptions {
    ReplicationOptions {
        sync_interval: Some(Duration::from_millis(50)),
        ..fast_options()
    }
}

async fn loopback_node(host: &str, network: &replset::LoopbackNetwork) -> ReplSetNode {
    loopback_node_with(host, network, fast_options()).await
}

async fn loopback_node_with(host: &str, network: &replset::LoopbackNetwork, options: ReplicationOptions) -> ReplSetNode {
    replset::try_create_node(ReplSetNodeConfig {
        self_host: host.parse().unwrap(),
        set_name: Some("s".to_string()),
        transport: NodeTransport::Loopback(network.clone()),
        info_logger: logger(),
        options,
    })
    .await
    .unwrap()
}

/// Heartbeats may hand a node the config before its own initiate call gets there.
async fn initiate_all(nodes: &[ReplSetNode], hosts: &[&str]) {
    for node in nodes {
        match node.initiate(config_doc(hosts)).await {
            Ok(()) | Err(InitiateError::AlreadyInitialized) => {}
            Err(e) => panic!("initiate failed: {}", e),
        }
    }
}

async fn wait_until_commit_point(node: &ReplSetNode, op_time: OpTime, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while node.coordinator().status().await.commit_point < op_time {
        assert!(Instant::now() < deadline, "commit point never reached {:?}", op_time);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn grpc_node(port: u16) -> ReplSetNode {
    replset::try_create_node(ReplSetNodeConfig {
        self_host: HostAndPort::new("localhost", port),
        set_name: Some("s".to_string()),
        transport: NodeTransport::Grpc {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
        },
        info_logger: logger(),
        options: fast_options(),
    })
    .await
    .unwrap()
}

async fn wait_for_single_primary(nodes: &[ReplSetNode], timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    loop {
        let mut primaries = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            if node.coordinator().status().await.state == MemberState::Primary {
                primaries.push(i);
            }
        }
        if primaries.len() == 1 {
            return primaries[0];
        }
        assert!(Instant::now() < deadline, "no single primary after {:?}: {:?}", timeout, primaries);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met after {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn op_time(secs: u32) -> OpTime {
    OpTime::new(Timestamp::new(secs, 1), Term::new(1))
}

fn noop(secs: u32) -> OplogEntry {
    OplogEntry::noop(Timestamp::new(secs, 1), Term::new(1), 1)
}

fn delete_of_id_0(secs: u32) -> OplogEntry {
    OplogEntry::new(
        Timestamp::new(secs, 1),
        Term::new(1),
        1,
        OpType::Delete,
        "t.c",
        Document::new().with("_id", 0i64),
    )
}

fn append(catalog: &StorageCatalog, entries: &[OplogEntry]) {
    let mut ru = RecoveryUnit::new();
    let mut records: Vec<Record> = entries.iter().map(|e| Record::new(e.encode().unwrap())).collect();
    catalog.oplog().insert_records(&mut ru, &mut records).unwrap();
    ru.commit();
}

fn insert(catalog: &StorageCatalog, ns: &str, doc: Document) {
    let collection = catalog.get_or_create_collection(ns).unwrap();
    let mut ru = RecoveryUnit::new();
    collection.insert_document(&mut ru, &doc).unwrap();
    ru.commit();
}

/// Connections whose setup fails while `failing` is set.
#[derive(Clone, Default)]
struct FlakyFactory {
    failing: Arc<AtomicBool>,
    setups: Arc<AtomicUsize>,
}

struct FlakyConnection {
    failing: Arc<AtomicBool>,
    setups: Arc<AtomicUsize>,
    healthy: bool,
}

#[async_trait]
impl PooledConnection for FlakyConnection {
    async fn setup(&mut self, _timeout: Duration) -> Result<(), PoolError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            self.healthy = false;
            return Err(PoolError::NetworkError("connection refused".to_string()));
        }
        self.healthy = true;
        Ok(())
    }

    async fn refresh(&mut self, timeout: Duration) -> Result<(), PoolError> {
        self.setup(timeout).await
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

impl ConnectionFactory for FlakyFactory {
    type Connection = FlakyConnection;

    fn make_connection(&self, _host: &HostAndPort, _generation: u64) -> FlakyConnection {
        FlakyConnection {
            failing: self.failing.clone(),
            setups: self.setups.clone(),
            healthy: false,
        }
    }
}

#[allow(dead_code)]
fn create_root_logger_for_file(directory_prefix: String, host: String) -> slog::Logger {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let log_path = format!("{}/info_log_{}/{}_info.log", directory_prefix, host, now);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)
        .unwrap();

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
