use anyhow::Result;

use super::output::{Table, emit_json};
use strata::config::AppConfig;
use strata::digest::short_id;

/// Images that contain a layer, given any of its ids.
pub fn run(cfg: &AppConfig, layer_id: &str) -> Result<()> {
    let rows = super::engine(cfg)?.layer_relations(layer_id);

    if let Some(dest) = &cfg.json {
        return emit_json(&rows, dest);
    }

    let mut table = Table::new(&["REPOSITORY", "TAG", "IMAGE ID"]);
    for r in &rows {
        table.push(vec![r.name.clone(), r.tag.clone(), short_id(&r.image_id).to_string()]);
    }
    table.print()
}
