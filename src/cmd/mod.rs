pub mod file;
pub mod history;
pub mod layer;
pub mod none;
mod output;
pub mod relation;

use std::sync::Arc;

use anyhow::{Context, Result};

use strata::config::AppConfig;
use strata::daemon::cli::DockerCli;
use strata::layerdb::LayerDb;
use strata::progress::Spinner;
use strata::relation::RelationEngine;
use strata::snapshot::{Snapshot, SnapshotCache};

/// Build the image snapshot, reporting progress on stderr.
fn load_snapshot(cfg: &AppConfig) -> Result<Arc<Snapshot>> {
    let spinner = Spinner::new("Listing images...");
    let mut cache = SnapshotCache::new(
        DockerCli::new(cfg.docker_bin.as_str()),
        LayerDb::new(cfg.layerdb_root()),
    );
    cache.set_progress_bar(spinner.clone_bar());
    let snapshot = cache.get().with_context(|| {
        format!(
            "Failed to build image snapshot from {}",
            cfg.docker_root.display()
        )
    })?;
    spinner.finish(format!("Resolved {} image records", snapshot.len()));
    Ok(snapshot)
}

fn engine(cfg: &AppConfig) -> Result<RelationEngine> {
    Ok(RelationEngine::new(load_snapshot(cfg)?, cfg.storage_root()))
}
