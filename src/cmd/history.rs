use anyhow::Result;
use chrono::Utc;

use super::output::{Table, emit_json};
use strata::config::AppConfig;
use strata::daemon::MISSING;
use strata::digest::short_id;
use strata::human::{created_since, human_size};

/// Storage directory of each build instruction of an image.
pub fn run(cfg: &AppConfig, image: &str) -> Result<()> {
    let rows = super::engine(cfg)?.storage_history(image);

    if let Some(dest) = &cfg.json {
        return emit_json(&rows, dest);
    }

    let now = Utc::now();
    let mut table = Table::new(&["IMAGE", "CREATED", "LAYER", "SIZE", "CREATED BY", "STORAGE"]);
    for row in &rows {
        let storage = match (&row.storage_path, row.inferred) {
            (Some(path), true) => format!("{} (inferred)", path.display()),
            (Some(path), false) => path.display().to_string(),
            (None, _) => String::new(),
        };
        table.push(vec![
            row.instruction.as_deref().map_or(MISSING, short_id).to_string(),
            created_since(&row.created_at, now),
            row.kind.to_string(),
            human_size(row.size),
            row.created_by.clone(),
            storage,
        ]);
    }
    table.print()
}
