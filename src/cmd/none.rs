use anyhow::Result;

use super::output::{Table, emit_json};
use strata::config::AppConfig;
use strata::digest::short_id;

/// Tagged images closest to an untagged one by shared layers.
pub fn run(cfg: &AppConfig, image_id: &str) -> Result<()> {
    let rows = super::engine(cfg)?.none_matches(image_id);

    if let Some(dest) = &cfg.json {
        return emit_json(&rows, dest);
    }

    let mut table = Table::new(&["REPOSITORY", "TAG", "IMAGE ID", "ROOTFS LAYERS"]);
    for m in &rows {
        table.push(vec![
            m.image.name.clone(),
            m.image.tag.clone(),
            short_id(&m.image.image_id).to_string(),
            m.shared_layers.to_string(),
        ]);
    }
    table.print()
}
