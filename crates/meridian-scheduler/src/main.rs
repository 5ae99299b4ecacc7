//! Meridian scheduler binary.
//!
//! Places every job in an inventory snapshot, assembles its rank table and
//! prints the published tables as JSON.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meridian_ranktable::RankTableRegistry;
use meridian_scheduler::{
    InMemoryRankTableStore, InventorySnapshot, PlacementEngine, PolicyRegistry, RankTableStore,
    SchedulerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only rank tables
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("meridian_scheduler=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    info!("Meridian scheduler starting");

    let config: SchedulerConfig = Figment::new()
        .merge(Toml::file("meridian.toml"))
        .merge(Env::prefixed("MERIDIAN_").split("__"))
        .extract()?;

    info!(
        snapshot = %config.snapshot.path.display(),
        policies = config.placement.enabled_policies.len(),
        vnpu_mode = ?config.vnpu.mode,
        "Configuration loaded"
    );

    let raw = tokio::fs::read_to_string(&config.snapshot.path).await?;
    let mut snapshot = InventorySnapshot::from_json(&raw)?;
    info!(
        nodes = snapshot.nodes.len(),
        tors = snapshot.tors.len(),
        jobs = snapshot.jobs.len(),
        "Inventory snapshot loaded"
    );

    let policies = Arc::new(PolicyRegistry::from_config(&config.placement)?);
    let engine = PlacementEngine::new(policies, Arc::new(RankTableRegistry::new()), &config);
    let store: Arc<dyn RankTableStore> = Arc::new(InMemoryRankTableStore::new());

    let jobs = snapshot.jobs.clone();
    for job in &jobs {
        let placement = match engine.bind_job(job, &mut snapshot) {
            Ok(placement) => placement,
            Err(e) => {
                warn!(job = %job.uid, kind = ?e.kind(), error = %e, "Job unschedulable");
                continue;
            }
        };
        let table = engine.assemble_rank_table(job, &placement, &snapshot)?;
        store.publish(&job.uid, table.document()).await?;
    }

    let tables = engine.tables();
    for job_uid in tables.job_ids() {
        if let Some(document) = store.get(&job_uid).await? {
            println!("{}", document.to_json()?);
        }
    }

    info!(published = tables.len(), "Meridian scheduler finished");
    Ok(())
}
