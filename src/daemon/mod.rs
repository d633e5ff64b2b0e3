pub mod cli;

use serde::Serialize;

use crate::error::Result;

/// History instruction id Docker reports for steps without their own image.
pub const MISSING: &str = "<missing>";

/// One image as listed by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSummary {
    /// Full image id, e.g. `sha256:...`.
    pub id: String,
    /// `name:tag` pairs.
    pub repo_tags: Vec<String>,
    /// `name@digest` pairs.
    pub repo_digests: Vec<String>,
}

/// The parts of `docker image inspect` the engine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInspect {
    /// Root filesystem diff ids, root layer first.
    pub diff_ids: Vec<String>,
}

/// One row of `docker image history`, which is newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Image id of the step, or `None` for a `<missing>` step.
    pub instruction: Option<String>,
    /// RFC 3339 creation time as reported by the daemon.
    pub created_at: String,
    pub created_by: String,
    /// Layer size in bytes.
    pub size: u64,
}

/// The daemon-side view of the image store.
pub trait Daemon {
    fn list_images(&self) -> Result<Vec<ImageSummary>>;

    fn inspect_image(&self, id: &str) -> Result<ImageInspect>;

    /// History of `id`, newest first.
    fn image_history(&self, id: &str) -> Result<Vec<HistoryEntry>>;
}
