use anyhow::{Context, Result};

use super::output::{Table, emit_json};
use strata::config::AppConfig;
use strata::digest::short_id;
use strata::human::human_size;

/// What every layer of an image contains.
pub fn run(cfg: &AppConfig, image: &str) -> Result<()> {
    let rows = super::engine(cfg)?
        .layer_contents(image)
        .with_context(|| format!("Failed to list layers of {image}"))?;

    if let Some(dest) = &cfg.json {
        return emit_json(&rows, dest);
    }

    let mut table = Table::new(&["DIFF ID", "CHAIN ID", "CACHE ID", "SIZE", "CONTENT"]);
    for c in &rows {
        table.push(vec![
            short_id(c.layer.diff_id.hex()).to_string(),
            short_id(c.layer.chain_id.hex()).to_string(),
            short_id(&c.layer.storage_id).to_string(),
            human_size(c.size),
            c.entries.join(" "),
        ]);
    }
    table.print()
}
