use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use super::output::{Table, emit_json};
use strata::config::AppConfig;
use strata::digest::short_id;
use strata::locate::Locator;
use strata::progress::Spinner;

/// Images holding a file with the same content as `file`.
pub fn run(cfg: &AppConfig, file: &Path) -> Result<()> {
    let snapshot = super::load_snapshot(cfg)?;
    let locator = Locator::new(cfg.storage_root()).with_workers(cfg.workers);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let spinner = Spinner::new(format!("Searching {} ...", cfg.storage_root().display()));
    let cancel = CancellationToken::new();
    let located = runtime.block_on(async {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        locator.locate(file, snapshot, cancel).await
    });
    let located =
        located.with_context(|| format!("Failed to search for {}", file.display()))?;
    spinner.finish(format!(
        "Checked {} candidate files, {} matches",
        located.candidates,
        located.hits.len()
    ));

    if let Some(dest) = &cfg.json {
        return emit_json(&located.hits, dest);
    }

    let mut table = Table::new(&["REPOSITORY", "TAG", "IMAGE ID", "FILE PATH"])
        .min_width(0, located.widths.name)
        .min_width(1, located.widths.tag);
    for hit in &located.hits {
        table.push(vec![
            hit.name.clone(),
            hit.tag.clone(),
            short_id(&hit.image_id).to_string(),
            hit.path.display().to_string(),
        ]);
    }
    table.print()
}
