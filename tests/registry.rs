mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use dagflow::context::Stopper;
use dagflow::registry::{
    DeadServerOp, HeartbeatWriter, MemoryRegistry, NodeEvent, NodeMonitor, RegistryCenter,
    RegistryClient, ResInfo, build_heartbeat, parse_heartbeat,
};
use dagflow::types::NodeType;
use dagflow_test_utils::fakes::{FlakyRegistry, ReadFailure, RecordingFailoverHandler};
use dagflow_test_utils::with_timeout;

const NS: &str = "/dagflow";

fn heartbeat(host: &str, port: u16) -> String {
    let t = NaiveDateTime::parse_from_str("2023-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    build_heartbeat(
        host,
        port,
        ResInfo {
            cpu_usage: 0.5,
            memory_usage: 0.25,
            load_average: 1.0,
        },
        t,
        t,
    )
}

/// Client on its own session of a shared tree.
fn client_on(center: &MemoryRegistry) -> Arc<RegistryClient> {
    Arc::new(RegistryClient::new(Arc::new(center.new_session()), NS))
}

#[test]
fn registered_nodes_are_listed_with_heartbeats() {
    let center = MemoryRegistry::new();
    let client = client_on(&center);
    client.init_system_node().unwrap();
    client.init_system_node().unwrap();

    client
        .register(NodeType::Master, None, "10.0.0.2:5678", &heartbeat("10.0.0.2", 5678))
        .unwrap();
    client
        .register(NodeType::Master, None, "10.0.0.1:5678", &heartbeat("10.0.0.1", 5678))
        .unwrap();
    client
        .register(NodeType::Worker, Some("etl"), "10.0.0.3:1234", &heartbeat("10.0.0.3", 1234))
        .unwrap();
    client
        .register(NodeType::Worker, Some("default"), "10.0.0.4:1234", "garbage")
        .unwrap();

    assert_eq!(client.get_active_master_num(), 2);
    assert_eq!(
        client.get_server_node_list(NodeType::Master, true),
        vec!["10.0.0.1:5678", "10.0.0.2:5678"]
    );
    assert_eq!(
        client.get_server_node_list(NodeType::Worker, false),
        vec!["default/10.0.0.4:1234", "etl/10.0.0.3:1234"]
    );
    assert_eq!(client.get_worker_groups(), vec!["default", "etl"]);

    let workers = client.get_server_list(NodeType::Worker);
    assert_eq!(workers.len(), 1, "malformed heartbeat is skipped");
    assert_eq!(workers[0].host, "10.0.0.3");
    assert_eq!(workers[0].registry_path, "/dagflow/nodes/worker/etl/10.0.0.3:1234");

    assert!(client.check_node_exists("10.0.0.3", NodeType::Worker));
    assert!(!client.check_node_exists("10.0.0.9", NodeType::Worker));
}

#[test]
fn closed_session_degrades_to_empty_results() {
    let center = MemoryRegistry::new();
    let client = client_on(&center);
    client
        .register(NodeType::Master, None, "10.0.0.1:5678", &heartbeat("10.0.0.1", 5678))
        .unwrap();

    client.close();

    assert_eq!(client.get_active_master_num(), 0);
    assert!(client.get_server_list(NodeType::Master).is_empty());
    assert!(client.get_dead_servers().is_empty());
    assert!(!client.check_node_exists("10.0.0.1", NodeType::Master));
    assert!(client.init_system_node().is_err());
}

#[test]
fn dead_server_entries_are_added_once_and_removed() {
    let center = MemoryRegistry::new();
    let client = client_on(&center);

    client
        .handle_dead_server("/dagflow/nodes/worker/default/10.0.0.3:1234", NodeType::Worker, DeadServerOp::Add)
        .unwrap();
    client
        .handle_dead_server("10.0.0.3:1234", NodeType::Worker, DeadServerOp::Add)
        .unwrap();
    assert_eq!(client.get_dead_servers(), vec!["worker_10.0.0.3:1234"]);

    client
        .handle_dead_server("10.0.0.3:1234", NodeType::Worker, DeadServerOp::Delete)
        .unwrap();
    client
        .handle_dead_server("10.0.0.3:1234", NodeType::Worker, DeadServerOp::Delete)
        .unwrap();
    assert!(client.get_dead_servers().is_empty());
}

#[test]
fn locks_release_on_drop_and_tolerate_double_release() {
    let center = MemoryRegistry::new();
    let first = client_on(&center);
    let second = client_on(&center);
    let path = first.failover_lock_path(NodeType::Worker);

    {
        let lock = first.acquire_lock(&path).unwrap();
        assert_eq!(lock.path(), "/dagflow/lock/failover/workers");
    }
    // Never held by `second`: logged, not raised.
    second.release_lock(&path);

    let _held = second.acquire_lock(&path).unwrap();
    assert_eq!(second.startup_lock_path(), "/dagflow/lock/failover/startup-masters");
}

#[test]
fn monitor_fails_over_nodes_whose_session_ended() {
    common::init_tracing();
    let center = MemoryRegistry::new();
    let observer = client_on(&center);

    let worker_session = center.new_session();
    let worker = RegistryClient::new(Arc::new(worker_session), NS);
    worker
        .register(NodeType::Worker, Some("default"), "10.0.0.7:1234", &heartbeat("10.0.0.7", 1234))
        .unwrap();

    let handler = RecordingFailoverHandler::new();
    let monitor = NodeMonitor::new(Arc::clone(&observer), handler.clone());

    let joined = monitor.poll();
    assert_eq!(
        joined,
        vec![NodeEvent::Added {
            node_type: NodeType::Worker,
            host: "10.0.0.7:1234".into()
        }]
    );
    assert!(monitor.poll().is_empty());

    worker.close();
    let left = monitor.poll();
    assert_eq!(
        left,
        vec![NodeEvent::Removed {
            node_type: NodeType::Worker,
            host: "10.0.0.7:1234".into()
        }]
    );
    assert_eq!(handler.calls(), vec![(NodeType::Worker, "10.0.0.7:1234".to_string())]);
    assert_eq!(observer.get_dead_servers(), vec!["worker_10.0.0.7:1234"]);

    // Coming back clears the dead-server entry.
    let revived = RegistryClient::new(Arc::new(center.new_session()), NS);
    revived
        .register(NodeType::Worker, Some("default"), "10.0.0.7:1234", &heartbeat("10.0.0.7", 1234))
        .unwrap();
    monitor.poll();
    assert!(observer.get_dead_servers().is_empty());
}

/// Worker registered on its own session, plus a monitor whose reads can fail.
fn flaky_monitor(
    center: &MemoryRegistry,
) -> (
    RegistryClient,
    Arc<FlakyRegistry>,
    NodeMonitor,
    Arc<RecordingFailoverHandler>,
) {
    let worker = RegistryClient::new(Arc::new(center.new_session()), NS);
    worker
        .register(NodeType::Worker, Some("default"), "10.0.0.2:1234", &heartbeat("10.0.0.2", 1234))
        .unwrap();

    let flaky = FlakyRegistry::new(center.new_session());
    let observer = Arc::new(RegistryClient::new(flaky.clone(), NS));
    let handler = RecordingFailoverHandler::new();
    let monitor = NodeMonitor::new(observer, handler.clone());
    assert_eq!(monitor.poll().len(), 1);
    (worker, flaky, monitor, handler)
}

#[test]
fn unreadable_snapshot_does_not_fail_over_live_nodes() {
    common::init_tracing();
    let center = MemoryRegistry::new();
    let (_worker, flaky, monitor, handler) = flaky_monitor(&center);
    let healthy = client_on(&center);

    flaky.set_reads(ReadFailure::Always);
    assert!(monitor.poll().is_empty());
    assert!(monitor.poll().is_empty());
    assert!(handler.calls().is_empty());
    assert!(healthy.get_dead_servers().is_empty());
    assert!(healthy.try_get_server_node_list(NodeType::Worker, true).is_ok());

    flaky.set_reads(ReadFailure::Never);
    assert!(monitor.poll().is_empty(), "node was never seen leaving");
    assert!(handler.calls().is_empty());
}

#[test]
fn failover_waits_until_the_registry_confirms_the_node_is_gone() {
    common::init_tracing();
    let center = MemoryRegistry::new();
    let (worker, flaky, monitor, handler) = flaky_monitor(&center);

    flaky.set_reads(ReadFailure::WhileLocked);
    worker.close();
    assert_eq!(
        monitor.poll(),
        vec![NodeEvent::Removed {
            node_type: NodeType::Worker,
            host: "10.0.0.2:1234".into()
        }]
    );
    assert!(handler.calls().is_empty(), "recheck failed, so no failover");

    flaky.set_reads(ReadFailure::Never);
    assert!(monitor.poll().is_empty());
    assert_eq!(handler.calls(), vec![(NodeType::Worker, "10.0.0.2:1234".to_string())]);

    monitor.poll();
    assert_eq!(handler.calls().len(), 1, "settled failovers are not repeated");
}

#[test]
fn aborted_failover_is_dropped_when_the_node_returns() {
    common::init_tracing();
    let center = MemoryRegistry::new();
    let (worker, flaky, monitor, handler) = flaky_monitor(&center);

    flaky.set_reads(ReadFailure::WhileLocked);
    worker.close();
    monitor.poll();

    let revived = RegistryClient::new(Arc::new(center.new_session()), NS);
    revived
        .register(NodeType::Worker, Some("default"), "10.0.0.2:1234", &heartbeat("10.0.0.2", 1234))
        .unwrap();
    flaky.set_reads(ReadFailure::Never);

    assert_eq!(
        monitor.poll(),
        vec![NodeEvent::Added {
            node_type: NodeType::Worker,
            host: "10.0.0.2:1234".into()
        }]
    );
    assert!(handler.calls().is_empty());
    assert!(client_on(&center).get_dead_servers().is_empty());
}

#[tokio::test]
async fn heartbeat_writer_refreshes_payload_until_stopped() {
    let center = MemoryRegistry::new();
    let observer = center.new_session();
    let client = client_on(&center);
    let path = client
        .register(NodeType::Worker, Some("default"), "127.0.0.1:1234", "stale")
        .unwrap();

    let writer = HeartbeatWriter::new(Arc::clone(&client), path.clone(), "127.0.0.1".into(), 1234);
    let stopper = Stopper::new();
    let handle = writer.spawn(Duration::from_millis(20), stopper.clone());

    with_timeout(async {
        loop {
            if let Some(payload) = observer.get(&path).unwrap() {
                if payload != "stale" {
                    let server = parse_heartbeat(&payload).unwrap();
                    assert_eq!(server.host, "127.0.0.1");
                    assert_eq!(server.port, 1234);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    stopper.stop();
    with_timeout(handle).await.unwrap();
}
