//! Integration tests for rank-table publication.

mod common;

use common::fixtures::{create_nodes, JobBuilder};
use common::TestScheduler;
use meridian_ranktable::{keys, ChipType, RankTableDocument};
use meridian_scheduler::{InventorySnapshot, RankTableChange};

use common::fixtures::NodeBuilder;

#[tokio::test]
async fn placement_through_to_published_rank_table() {
    let scheduler = TestScheduler::new();
    let mut rx = scheduler.store.subscribe();
    let mut snapshot = InventorySnapshot {
        nodes: create_nodes("node", 2),
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("train")
        .with_policy("chip8-node8")
        .with_workers("Worker", 2, 8)
        .build();

    let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    scheduler.store.publish(&job.uid, table.document()).await.unwrap();

    let change = rx.recv().await.unwrap();
    assert_eq!(
        change,
        RankTableChange::Published {
            job_uid: job.uid.clone(),
            version: "1.0".to_owned(),
        }
    );

    let published = scheduler.store.get(&job.uid).await.unwrap().unwrap();
    assert_eq!(published, table.document());

    // Consumers parse the same JSON the store holds
    let parsed = RankTableDocument::from_json(&published.to_json().unwrap()).unwrap();
    assert_eq!(parsed.server_count, "2");
}

#[tokio::test]
async fn released_job_is_unpublished() {
    let scheduler = TestScheduler::new();
    let mut snapshot = InventorySnapshot {
        nodes: vec![NodeBuilder::new("sp-0")
            .with_chip_type(ChipType::TrainX16)
            .with_super_pod("0")
            .build()],
        ..InventorySnapshot::default()
    };
    let job = JobBuilder::new("sp")
        .with_policy(keys::SUPER_POD_POLICY)
        .with_workers("Worker", 1, 16)
        .build();

    let placement = scheduler.engine.bind_job(&job, &mut snapshot).unwrap();
    let table = scheduler
        .engine
        .assemble_rank_table(&job, &placement, &snapshot)
        .unwrap();
    scheduler.store.publish(&job.uid, table.document()).await.unwrap();

    let mut rx = scheduler.store.subscribe();
    assert!(scheduler.engine.release_job(&job.uid));
    scheduler.store.remove(&job.uid).await.unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        RankTableChange::Removed {
            job_uid: job.uid.clone(),
        }
    );
    assert!(scheduler.store.get(&job.uid).await.unwrap().is_none());
    assert!(scheduler.tables.is_empty());
}
