//! Integration tests for the orchestrator run loop
//!
//! Discovery is mocked; node processes are either mocked or scripted so that
//! they still talk to the real ingestion server over TCP.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use orchestrator::services::RealFileSystem;
use orchestrator::sinks::JsonStoreSink;
use orchestrator::traits::MockSpecCatalog;
use orchestrator::{FileSystem, NodeStatus, OrchestratorError};
use shared::exit_codes;

mod common;
use common::{NodeBehavior, OrchestratorBuilder, ScriptedProcessManager, TestFixtures};

/// Sample, OneNodeFailed, Skipped and BadConfig in one run
#[tokio::test]
async fn test_sample_assembly_scenario() {
    // Arrange
    let builder = OrchestratorBuilder::new(TestFixtures::sample_report());
    let sink = builder.sink();
    let manager = ScriptedProcessManager::new(|node| {
        if node.spec.method_name == "OneNodeFailed" && node.index == 2 {
            NodeBehavior::Fail
        } else {
            NodeBehavior::Pass
        }
    });
    let launched = manager.launched();
    let (orchestrator, output) = builder.build(manager);

    // Act
    let report = orchestrator.run().await.unwrap();

    // Assert
    assert_eq!(report.exit_code, exit_codes::FAILED);
    assert_eq!(report.tree.facts.len(), 4);
    assert_eq!(report.tree.passed_count(), 1);
    assert_eq!(report.tree.failed_count(), 1);
    assert_eq!(report.tree.skipped_count(), 2);

    let sample = &report.tree.facts[0];
    assert!(sample.passed);
    assert!(sample.nodes.values().all(|n| n.status == NodeStatus::Passed));

    let one_failed = &report.tree.facts[1];
    assert!(!one_failed.passed);
    assert_eq!(one_failed.nodes[&1].status, NodeStatus::Passed);
    assert_eq!(one_failed.nodes[&2].status, NodeStatus::Failed);
    assert_eq!(one_failed.nodes[&2].failures.len(), 1);
    assert_eq!(one_failed.nodes[&2].failures[0].message, "node 2 gave up");

    let skipped = &report.tree.facts[2];
    assert!(skipped.nodes.values().all(|n| n.status == NodeStatus::Skipped));
    let errored = &report.tree.facts[3];
    assert_eq!(errored.skip_reason.as_deref(), Some("ERRORED"));
    assert!(errored.nodes.is_empty());

    // Only the two executed specs spawned nodes, with 0-based indices on the wire
    let launched = launched.lock().unwrap().clone();
    assert_eq!(launched.len(), 4);
    let indices: BTreeSet<u32> = launched.iter().map(|args| args.node_index).collect();
    assert_eq!(indices, BTreeSet::from([0, 1]));
    assert!(launched.iter().all(|args| args.listen_port != 0 && args.node_count == 2));

    // Sinks saw each slot change exactly once
    let events = sink.events();
    assert_eq!(events.first().map(String::as_str), Some("open 4"));
    assert_eq!(events.last().map(String::as_str), Some("close"));
    assert_eq!(sink.count("node "), 6);
    assert!(events.contains(&"node SampleTests.OneNodeFailed 2 Failed".to_string()));
    assert!(events.contains(&"node SampleTests.Skipped 1 Skipped".to_string()));
    assert!(events.iter().any(|e| e.starts_with("runner ERROR discovery BadConfigTests.BadConfig")));

    // Logs persisted per spec, failed spec copied aside
    let sample_dir = output.path().join("SampleTests.Sample");
    assert!(sample_dir.join("aggregated.txt").exists());
    assert!(sample_dir
        .join(format!("node1__first__{}.txt", std::env::consts::OS))
        .exists());
    let failed_dir = output.path().join("FAILED_SPECS_LOGS");
    assert!(failed_dir.join("SampleTests.OneNodeFailed").join("aggregated.txt").exists());
    assert!(!failed_dir.join("SampleTests.Sample").exists());
}

#[tokio::test]
async fn test_filter_runs_matching_specs_only() {
    let builder = OrchestratorBuilder::new(TestFixtures::sample_report())
        .with_config(|config| config.with_filter(Some("Tests.Sample".to_string())));
    let sink = builder.sink();
    let (orchestrator, _output) = builder.build(ScriptedProcessManager::new(|_| NodeBehavior::Pass));

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.exit_code, exit_codes::PASSED);
    assert_eq!(report.tree.facts.len(), 1);
    assert_eq!(report.tree.facts[0].spec.method_name, "Sample");
    assert_eq!(sink.events().first().map(String::as_str), Some("open 1"));
}

/// A FAIL line that only arrives over TCP still fails the spec
#[tokio::test]
async fn test_tcp_failure_outranks_clean_exit() {
    let builder = OrchestratorBuilder::new(TestFixtures::report(vec![TestFixtures::spec("Sample")]));
    let manager = ScriptedProcessManager::new(|node| {
        if node.index == 2 {
            NodeBehavior::FailOverTcpOnly
        } else {
            NodeBehavior::Pass
        }
    });
    let (orchestrator, _output) = builder.build(manager);

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.exit_code, exit_codes::FAILED);
    let fact = &report.tree.facts[0];
    assert_eq!(fact.nodes[&2].status, NodeStatus::Failed);
    assert_eq!(fact.nodes[&2].failures[0].exception_type, "Error");
}

#[tokio::test]
async fn test_spawn_failure_fails_the_spec() {
    let builder = OrchestratorBuilder::new(TestFixtures::report(vec![TestFixtures::spec("Sample")]));
    let (orchestrator, _output) = builder.build_with_mock(|process_manager| {
        process_manager
            .expect_run_node()
            .times(2)
            .returning(|node, _, _, _| {
                Err(OrchestratorError::NodeSpawnFailed {
                    node: node.node_info().to_string(),
                    message: "no such file".to_string(),
                })
            });
    });

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.exit_code, exit_codes::FAILED);
    let fact = &report.tree.facts[0];
    assert_eq!(fact.failed_nodes().count(), 2);
    assert_eq!(fact.nodes[&1].failures[0].exception_type, "NodeSpawnFailed");
}

#[tokio::test]
async fn test_skipped_and_errored_specs_spawn_nothing() {
    let report = TestFixtures::report(vec![TestFixtures::skipped_spec(), TestFixtures::errored_spec()]);
    let builder = OrchestratorBuilder::new(report);
    let sink = builder.sink();
    let (orchestrator, _output) = builder.build_with_mock(|process_manager| {
        process_manager.expect_run_node().times(0);
    });

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.exit_code, exit_codes::PASSED);
    assert_eq!(report.tree.skipped_count(), 2);
    assert_eq!(sink.count("node SampleTests.Skipped"), 2);
    assert_eq!(sink.count("node BadConfigTests.BadConfig"), 0);
    assert!(sink.events().contains(&"end BadConfigTests.BadConfig passed=false".to_string()));
}

#[tokio::test]
async fn test_discovery_failure_aborts_before_sinks_open() {
    let mut catalog = MockSpecCatalog::new();
    catalog.expect_discover().times(1).returning(|assembly| {
        Err(OrchestratorError::DiscoveryFailed {
            assembly: assembly.to_string(),
            message: "not executable".to_string(),
        })
    });
    let builder = OrchestratorBuilder::new(TestFixtures::report(vec![])).with_catalog(catalog);
    let sink = builder.sink();
    let (orchestrator, _output) = builder.build_with_mock(|_| {});

    let result = orchestrator.run().await;

    assert!(matches!(result, Err(OrchestratorError::DiscoveryFailed { .. })));
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_listener_bind_failure_is_fatal_and_closes_sinks() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap().to_string();
    let builder = OrchestratorBuilder::new(TestFixtures::report(vec![TestFixtures::spec("Sample")]))
        .with_config(move |config| config.with_listen_address(address));
    let sink = builder.sink();
    let (orchestrator, _output) = builder.build_with_mock(|process_manager| {
        process_manager.expect_run_node().times(0);
    });

    let result = orchestrator.run().await;

    assert!(matches!(result, Err(OrchestratorError::IngestionError { .. })));
    assert_eq!(sink.events(), vec!["open 1".to_string(), "close".to_string()]);
}

#[tokio::test]
async fn test_cancellation_ends_active_spec_and_closes_sinks() {
    let specs = vec![TestFixtures::spec("Sample"), TestFixtures::spec("OneNodeFailed")];
    let builder = OrchestratorBuilder::new(TestFixtures::report(specs));
    let sink = builder.sink();
    let manager = ScriptedProcessManager::new(|_| NodeBehavior::Hang);
    let launched = manager.launched();
    let (orchestrator, _output) = builder.build(manager);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(30), orchestrator.run())
        .await
        .expect("run should stop after cancellation")
        .unwrap();

    assert_eq!(report.exit_code, exit_codes::FAILED);
    assert_eq!(report.tree.facts.len(), 1);
    assert_eq!(launched.lock().unwrap().len(), 2);
    assert!(sink.events().contains(&"end SampleTests.Sample passed=false".to_string()));
    assert_eq!(sink.events().last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_json_store_reloads_run_tree() {
    let builder = OrchestratorBuilder::new(TestFixtures::report(vec![TestFixtures::spec("Sample")]));
    let (orchestrator, output) = builder.build(ScriptedProcessManager::new(|_| NodeBehavior::Pass));
    let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let orchestrator = orchestrator.with_sink(Box::new(JsonStoreSink::new(file_system.clone())));

    let report = orchestrator.run().await.unwrap();

    let stored = JsonStoreSink::load(file_system.as_ref(), &JsonStoreSink::store_path(output.path()))
        .await
        .unwrap();
    assert_eq!(stored.run_id, report.tree.run_id);
    assert_eq!(stored.facts.len(), 1);
    assert_eq!(stored.facts[0].log.entry_count(), report.tree.facts[0].log.entry_count());
    assert_eq!(stored.facts[0].log.nodes.len(), 2);
}
