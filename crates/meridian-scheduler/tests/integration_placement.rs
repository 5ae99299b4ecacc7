//! Integration tests for end-to-end placement and rank-table assembly.

mod common;

use common::fixtures::{create_nodes, JobBuilder, NodeBuilder};
use common::TestScheduler;
use meridian_ranktable::{keys, ChipType, RankTableDocument, RankTableStatus};
use meridian_scheduler::{ErrorKind, InventorySnapshot, SchedulerError};

fn snapshot(nodes: usize) -> InventorySnapshot {
    InventorySnapshot {
        nodes: create_nodes("node", nodes),
        ..InventorySnapshot::default()
    }
}

#[test]
fn job_placement_through_to_rank_table() {
    let scheduler = TestScheduler::new();
    let mut snapshot = snapshot(2);
    let job = JobBuilder::new("train")
        .with_policy("chip8-node8")
        .with_workers("Worker", 2, 8)
        .build();

    let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
    assert_eq!(placement.bindings[0].node, "node-00");
    assert_eq!(placement.bindings[1].node, "node-01");

    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    assert_eq!(table.status(), RankTableStatus::Completed);
    assert_eq!(table.pod_num(), 16);

    let document = table.document();
    assert_eq!(document.version, "1.0");
    assert_eq!(document.server_count, "2");
    assert!(document.super_pod_list.is_none());

    let ranks: Vec<String> = document
        .rank_assignment()
        .into_iter()
        .map(|(_, _, rank)| rank)
        .collect();
    let expected: Vec<String> = (0..16).map(|r: i32| r.to_string()).collect();
    assert_eq!(ranks, expected);

    let json = table.to_json().unwrap();
    assert!(json.contains(
        r#""server_id":"10.0.0.0","device":[{"device_id":"0","device_ip":"192.168.0.0","rank_id":"0"}"#
    ));
}

#[test]
fn placement_is_deterministic() {
    let scheduler = TestScheduler::new();
    let snapshot = snapshot(4);
    let job = JobBuilder::new("train")
        .with_policy("chip4-node8")
        .with_workers("Master", 1, 4)
        .with_workers("Worker", 5, 4)
        .build();

    let first = scheduler.engine.place_job(&job, &snapshot).unwrap();
    for _ in 0..5 {
        assert_eq!(scheduler.engine.place_job(&job, &snapshot).unwrap(), first);
    }
}

#[test]
fn tasks_avoid_fragmented_nodes() {
    let scheduler = TestScheduler::new();
    let snapshot = InventorySnapshot {
        nodes: vec![
            NodeBuilder::new("a").with_used(&[0, 1, 4, 5]).build(),
            NodeBuilder::new("b").with_used(&[0, 1, 2, 3]).build(),
        ],
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("train")
        .with_policy("chip4-node8")
        .with_workers("Worker", 1, 4)
        .build();

    let placement = scheduler.engine.place_job(&job, &snapshot).unwrap();
    assert_eq!(placement.bindings[0].node, "b");
    assert_eq!(placement.bindings[0].chips, vec![4, 5, 6, 7]);
}

#[test]
fn unschedulable_job_leaves_others_placeable() {
    let scheduler = TestScheduler::new();
    let mut snapshot = snapshot(1);

    let bad = JobBuilder::new("bad")
        .with_policy("chip3-node3")
        .with_workers("Worker", 1, 8)
        .build();
    let err = scheduler.engine.bind_job(&bad, &mut snapshot).unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownPolicy(_)));
    assert_eq!(err.kind(), ErrorKind::Policy);

    let too_big = JobBuilder::new("big")
        .with_policy("chip8-node8")
        .with_workers("Worker", 2, 8)
        .build();
    let err = scheduler.engine.bind_job(&too_big, &mut snapshot).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    let good = JobBuilder::new("good")
        .with_policy("chip8-node8")
        .with_workers("Worker", 1, 8)
        .build();
    assert!(scheduler.engine.bind_job(&good, &mut snapshot).is_ok());
    assert_eq!(snapshot.nodes[0].used.len(), 8);
}

#[test]
fn disabled_policy_is_rejected() {
    let mut config = meridian_scheduler::SchedulerConfig::default();
    config.placement.enabled_policies = vec!["chip8-node8".to_owned()];
    let scheduler = TestScheduler::with_config(&config);
    let job = JobBuilder::new("train")
        .with_policy("chip4-node8")
        .with_workers("Worker", 1, 4)
        .build();
    assert!(matches!(
        scheduler.engine.place_job(&job, &snapshot(1)),
        Err(SchedulerError::UnknownPolicy(_))
    ));
}

#[test]
fn super_pod_job_groups_by_node_super_pod() {
    let scheduler = TestScheduler::new();
    let mut snapshot = InventorySnapshot {
        nodes: vec![
            NodeBuilder::new("sp-a")
                .with_address("10.2.0.1")
                .with_chip_type(ChipType::TrainX16)
                .with_super_pod("1")
                .build(),
            NodeBuilder::new("sp-b")
                .with_address("10.2.0.2")
                .with_chip_type(ChipType::TrainX16)
                .with_super_pod("0")
                .build(),
        ],
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("sp")
        .with_policy(keys::SUPER_POD_POLICY)
        .with_workers("Worker", 2, 16)
        .build();

    let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    let document = table.document();
    assert_eq!(document.version, "1.2");

    let super_pods = document.super_pod_list.unwrap();
    assert_eq!(super_pods.len(), 2);
    assert_eq!(super_pods[0].super_pod_id, "0");
    assert_eq!(super_pods[0].server_list[0].server_id, "10.2.0.2");
    assert_eq!(super_pods[1].server_list[0].server_id, "10.2.0.1");
}

#[test]
fn sp_block_splits_super_pods_by_rank() {
    let scheduler = TestScheduler::new();
    let mut snapshot = InventorySnapshot {
        nodes: (0..2)
            .map(|i| {
                NodeBuilder::new(&format!("sp-{i}"))
                    .with_address(&format!("10.3.0.{i}"))
                    .with_chip_type(ChipType::TrainX16)
                    .build()
            })
            .collect(),
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("sp")
        .with_policy(keys::SUPER_POD_POLICY)
        .with_annotation(keys::SUPER_POD_BLOCK, "16")
        .with_workers("Worker", 2, 16)
        .build();

    let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    let super_pods = table.document().super_pod_list.unwrap();
    let ids: Vec<&str> = super_pods.iter().map(|p| p.super_pod_id.as_str()).collect();
    assert_eq!(ids, vec!["0", "1"]);
}

#[test]
fn version_annotation_selects_v2() {
    let scheduler = TestScheduler::new();
    let snapshot = snapshot(1);
    let job = JobBuilder::new("train")
        .with_policy("chip8-node8")
        .with_annotation(keys::RANKTABLE_VERSION, "2.0")
        .with_workers("Worker", 1, 8)
        .build();

    let placement = scheduler.engine.place_job(&job, &snapshot).unwrap();
    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    assert_eq!(table.document().version, "2.0");
}

#[test]
fn jobs_keep_separate_rank_tables() {
    let scheduler = TestScheduler::new();
    let mut snapshot = snapshot(2);
    for name in ["one", "two"] {
        let job = JobBuilder::new(name)
            .with_policy("chip8-node8")
            .with_workers("Worker", 1, 8)
            .build();
        let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
        scheduler
            .engine
            .assemble_rank_table(&job, &placement, &snapshot)
            .unwrap();
    }
    assert_eq!(scheduler.tables.job_ids(), vec!["uid-one", "uid-two"]);
    for uid in ["uid-one", "uid-two"] {
        let table = scheduler.tables.get(uid).unwrap();
        assert_eq!(table.server_count(), 1);
        assert_eq!(table.document().server_list[0].device_list[0].rank_id, "0");
    }
}

#[test]
fn rank_table_json_round_trips() {
    let mut snapshot = InventorySnapshot {
        nodes: (0..2)
            .map(|i| {
                NodeBuilder::new(&format!("sp-{i}"))
                    .with_address(&format!("10.5.0.{i}"))
                    .with_chip_type(ChipType::TrainX16)
                    .build()
            })
            .collect(),
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("sp")
        .with_policy(keys::SUPER_POD_POLICY)
        .with_annotation(keys::SUPER_POD_BLOCK, "16")
        .with_workers("Worker", 2, 16)
        .build();
    let placement = TestScheduler::new()
        .engine
        .bind_job(&job, &mut snapshot)
        .unwrap();

    let assemble = || {
        TestScheduler::new()
            .engine
            .assemble_rank_table(&job, &placement, &snapshot)
            .unwrap()
            .to_json()
            .unwrap()
    };
    let json = assemble();
    assert_eq!(assemble(), json);

    let table = TestScheduler::new()
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    let parsed = RankTableDocument::from_json(&json).unwrap();
    assert_eq!(parsed.rank_assignment(), table.document().rank_assignment());
    assert_eq!(parsed.super_pod_list, table.document().super_pod_list);
    assert_eq!(parsed.to_json().unwrap(), json);
    assert_eq!(parsed.rank_assignment().len(), 32);
}

#[test]
fn roles_with_uneven_chip_counts_are_rejected() {
    let scheduler = TestScheduler::new();
    let snapshot = snapshot(3);
    let job = JobBuilder::new("train")
        .with_policy("chip4-node8")
        .with_workers("Master", 1, 8)
        .with_workers("Worker", 2, 4)
        .build();

    let err = scheduler.engine.place_job(&job, &snapshot).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJob(_)));
    assert_eq!(err.kind(), ErrorKind::Policy);
}
