//! Relational queries over a built snapshot.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::address::LayerIdentity;
use crate::daemon::HistoryEntry;
use crate::error::{Error, Result};
use crate::snapshot::{ImageRecord, Snapshot};

/// An image, by name, tag and id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
    pub image_id: String,
}

impl From<&ImageRecord> for ImageRef {
    fn from(r: &ImageRecord) -> Self {
        Self {
            name: r.name.clone(),
            tag: r.tag.clone(),
            image_id: r.image_id.clone(),
        }
    }
}

/// A tagged image ranked against an untagged one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoneMatch {
    #[serde(flatten)]
    pub image: ImageRef,
    /// Number of distinct diff ids both images contain.
    pub shared_layers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Image,
    Empty,
}

impl LayerKind {
    fn from_size(size: u64) -> Self {
        if size == 0 { LayerKind::Empty } else { LayerKind::Image }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Image => f.write_str("image layer"),
            LayerKind::Empty => f.write_str("empty layer"),
        }
    }
}

/// One build instruction and the storage directory holding its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    /// Image id of the step, `None` for `<missing>`.
    pub instruction: Option<String>,
    pub created_at: String,
    pub created_by: String,
    pub size: u64,
    pub kind: LayerKind,
    pub storage_path: Option<PathBuf>,
    /// The path was assigned by position rather than looked up directly.
    pub inferred: bool,
}

impl HistoryRow {
    fn new(entry: &HistoryEntry, kind: LayerKind, storage_path: Option<PathBuf>) -> Self {
        Self {
            instruction: entry.instruction.clone(),
            created_at: entry.created_at.clone(),
            created_by: entry.created_by.clone(),
            size: entry.size,
            kind,
            storage_path,
            inferred: false,
        }
    }
}

/// What one layer's `diff/` directory holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerContent {
    #[serde(flatten)]
    pub layer: LayerIdentity,
    /// Top-level entry names, sorted.
    pub entries: Vec<String>,
    /// Bytes in regular files beneath the directory.
    pub size: u64,
}

/// Number of distinct diff ids present in both `a` and `b`.
pub fn shared_diff_ids<'a>(
    a: impl IntoIterator<Item = &'a str>,
    b: impl IntoIterator<Item = &'a str>,
) -> usize {
    let a: HashSet<&str> = a.into_iter().collect();
    let b: HashSet<&str> = b.into_iter().collect();
    a.intersection(&b).count()
}

/// Sum of regular file sizes under `dir`.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            let meta = entry.metadata()?;
            total += meta.len();
        }
    }
    Ok(total)
}

/// Query context: a snapshot plus the storage root its layers live under.
pub struct RelationEngine {
    snapshot: Arc<Snapshot>,
    storage_root: PathBuf,
}

impl RelationEngine {
    pub fn new(snapshot: Arc<Snapshot>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            snapshot,
            storage_root: storage_root.into(),
        }
    }

    /// Images that contain the layer `layer_id` in any address space.
    pub fn layer_relations(&self, layer_id: &str) -> Vec<ImageRef> {
        self.snapshot
            .by_layer(layer_id)
            .into_iter()
            .map(ImageRef::from)
            .collect()
    }

    /// Tagged images sharing the most diff ids with the untagged image
    /// matching `fragment`. Ties are all reported.
    pub fn none_matches(&self, fragment: &str) -> Vec<NoneMatch> {
        let Some(target) = self.snapshot.by_none_image(fragment) else {
            return Vec::new();
        };
        debug!(image = %target.image_id, "matching untagged image");

        let scored: Vec<NoneMatch> = self
            .snapshot
            .records()
            .iter()
            .filter(|r| !r.is_untagged())
            .map(|r| NoneMatch {
                image: ImageRef::from(r),
                shared_layers: shared_diff_ids(r.diff_ids(), target.diff_ids()),
            })
            .collect();

        let Some(best) = scored.iter().map(|m| m.shared_layers).max() else {
            return Vec::new();
        };
        scored
            .into_iter()
            .filter(|m| m.shared_layers == best)
            .collect()
    }

    /// Storage directory of every build instruction of `image`, oldest first.
    ///
    /// Steps reported as `<missing>` have no image of their own. Their paths
    /// are backfilled from the leading layers of the newest step's image,
    /// assuming the non-empty missing steps map one-to-one and in order onto
    /// those layers. Such rows are marked `inferred`.
    pub fn storage_history(&self, image: &str) -> Vec<HistoryRow> {
        let Some(record) = self.snapshot.by_image(image) else {
            return Vec::new();
        };

        let mut rows = Vec::with_capacity(record.history.len());
        let mut pending = 0usize;

        for (idx, entry) in record.history.iter().enumerate().rev() {
            let kind = LayerKind::from_size(entry.size);

            let Some(id) = entry.instruction.as_deref() else {
                if kind == LayerKind::Image {
                    pending += 1;
                }
                rows.push(HistoryRow::new(entry, kind, None));
                continue;
            };
            if !id.contains(':') {
                debug!(id, "skipping history step without a qualified id");
                continue;
            }

            let step = self.snapshot.by_image(id);
            if step.is_none() {
                warn!(id, "history step does not resolve to a known image");
            }
            let storage_path = match kind {
                LayerKind::Empty => None,
                LayerKind::Image => step
                    .and_then(|s| s.layers.last())
                    .map(|l| self.storage_root.join(&l.storage_id)),
            };

            if idx == 0 {
                match step {
                    Some(top) => self.backfill(&mut rows, top, pending),
                    None if pending > 0 => {
                        warn!(pending, "cannot place <missing> layers without the final image")
                    }
                    None => {}
                }
            }

            rows.push(HistoryRow::new(entry, kind, storage_path));
        }

        rows
    }

    fn backfill(&self, rows: &mut [HistoryRow], top: &ImageRecord, pending: usize) {
        let non_empty = top.history.iter().filter(|e| e.size > 0).count();
        if non_empty != top.layers.len() {
            warn!(
                image = %top.image_id,
                history = non_empty,
                layers = top.layers.len(),
                "history and layer counts differ; <missing> storage paths may be mislabelled"
            );
        }
        if pending > top.layers.len() {
            warn!(
                pending,
                layers = top.layers.len(),
                "more <missing> layers than image layers; some rows stay unplaced"
            );
        }

        let mut layers = top.layers.iter();
        let missing = rows
            .iter_mut()
            .filter(|r| r.instruction.is_none() && r.kind == LayerKind::Image);
        for row in missing {
            let Some(layer) = layers.next() else { break };
            row.storage_path = Some(self.storage_root.join(&layer.storage_id));
            row.inferred = true;
        }
    }

    /// Entries and size of every layer of `image`.
    pub fn layer_contents(&self, image: &str) -> Result<Vec<LayerContent>> {
        let Some(record) = self.snapshot.by_image(image) else {
            return Ok(Vec::new());
        };

        record
            .layers
            .iter()
            .map(|layer| {
                let dir = self.storage_root.join(&layer.storage_id).join("diff");
                if !dir.is_dir() {
                    return Err(Error::MissingDirectory(dir));
                }
                let mut entries = std::fs::read_dir(&dir)
                    .map_err(|e| Error::io(&dir, e))?
                    .map(|entry| {
                        entry
                            .map(|e| e.file_name().to_string_lossy().into_owned())
                            .map_err(|e| Error::io(&dir, e))
                    })
                    .collect::<Result<Vec<_>>>()?;
                entries.sort();
                let size = dir_size(&dir)?;
                Ok(LayerContent {
                    layer: layer.clone(),
                    entries,
                    size,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::chain_ids;
    use crate::layerdb::LayerDb;
    use crate::snapshot::{self, NONE};
    use crate::test::{FakeDaemon, FakeImage, Fixture, digest_of, history, image_id};

    fn engine(fx: &Fixture, daemon: &FakeDaemon) -> RelationEngine {
        let snap = snapshot::build(daemon, &LayerDb::new(fx.layerdb()), None).unwrap();
        RelationEngine::new(Arc::new(snap), fx.storage())
    }

    fn app_store(fx: &Fixture) -> FakeDaemon {
        let v1 = vec![digest_of("L1"), digest_of("L2")];
        let v2 = vec![digest_of("L1"), digest_of("L2"), digest_of("L3")];
        fx.register_chain(&v2);
        FakeDaemon::new(vec![
            FakeImage::new("v1", &["app:v1"], &v1),
            FakeImage::new("v2", &["app:v2"], &v2),
            FakeImage::new("dangling", &[], &v1),
            FakeImage::new("other", &["other:1"], &[digest_of("O1")]),
        ])
    }

    #[test]
    fn test_layer_relations() {
        let fx = Fixture::new();
        fx.register_chain(&[digest_of("O1")]);
        let daemon = app_store(&fx);
        let engine = engine(&fx, &daemon);

        let refs = engine.layer_relations(&digest_of("L1").to_string());
        let names: Vec<String> = refs.iter().map(|r| format!("{}:{}", r.name, r.tag)).collect();
        assert_eq!(names, vec!["app:v1", "app:v2", "<none>:<none>"]);
        assert!(engine.layer_relations("unknown").is_empty());
    }

    #[test]
    fn test_none_match_reports_ties() {
        let fx = Fixture::new();
        fx.register_chain(&[digest_of("O1")]);
        let daemon = app_store(&fx);
        let engine = engine(&fx, &daemon);

        let id = image_id("dangling");
        let matches = engine.none_matches(&id[7..19]);
        let found: Vec<(String, usize)> = matches
            .iter()
            .map(|m| (m.image.tag.clone(), m.shared_layers))
            .collect();
        assert_eq!(found, vec![("v1".to_string(), 2), ("v2".to_string(), 2)]);
        assert!(matches.iter().all(|m| m.image.name != NONE));

        assert!(engine.none_matches(&image_id("v1")).is_empty());
        assert!(engine.none_matches("").is_empty());
    }

    #[test]
    fn test_shared_count_symmetric() {
        let a = ["x", "y", "z", "y"];
        let b = ["y", "z", "w"];
        assert_eq!(shared_diff_ids(a, b), 2);
        assert_eq!(shared_diff_ids(b, a), 2);
        assert_eq!(shared_diff_ids(a, Vec::<&str>::new()), 0);
    }

    #[test]
    fn test_history_backfills_missing_layers() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("Sa"), digest_of("Sb")];
        fx.register_chain(&diffs);
        let chains = chain_ids(&diffs);
        let top = image_id("built");
        let image = FakeImage::new("built", &["built:1"], &diffs).with_history(vec![
            history(Some(&top), "COPY app /app", 42),
            history(None, "ENV A=1", 0),
            history(None, "ADD rootfs.tar /", 1000),
        ]);
        let daemon = FakeDaemon::new(vec![image]);
        let engine = engine(&fx, &daemon);

        let rows = engine.storage_history("built:1");
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].created_by, "ADD rootfs.tar /");
        assert_eq!(rows[0].kind, LayerKind::Image);
        assert_eq!(rows[0].storage_path, Some(fx.storage().join(fx.storage_id_for(&chains[0]))));
        assert!(rows[0].inferred);

        assert_eq!(rows[1].kind, LayerKind::Empty);
        assert_eq!(rows[1].storage_path, None);

        assert_eq!(rows[2].instruction.as_deref(), Some(top.as_str()));
        assert_eq!(rows[2].storage_path, Some(fx.storage().join(fx.storage_id_for(&chains[1]))));
        assert!(!rows[2].inferred);
    }

    #[test]
    fn test_history_skips_unqualified_ids_and_short_chains() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("only")];
        fx.register_chain(&diffs);
        let top = image_id("short");
        let image = FakeImage::new("short", &["short:1"], &diffs).with_history(vec![
            history(Some(&top), "CMD [\"sh\"]", 0),
            history(Some("deadbeef"), "RUN odd", 5),
            history(None, "RUN b", 10),
            history(None, "RUN a", 10),
        ]);
        let daemon = FakeDaemon::new(vec![image]);
        let engine = engine(&fx, &daemon);

        let rows = engine.storage_history(&top);
        assert_eq!(rows.len(), 3);
        // One chain layer for two pending rows: only the oldest gets a path.
        assert!(rows[0].storage_path.is_some());
        assert!(rows[1].storage_path.is_none());
        assert!(!rows[1].inferred);
        assert_eq!(rows[2].kind, LayerKind::Empty);
        assert_eq!(rows[2].storage_path, None);
    }

    #[test]
    fn test_history_unknown_image_is_empty() {
        let fx = Fixture::new();
        let daemon = FakeDaemon::new(Vec::new());
        let engine = engine(&fx, &daemon);
        assert!(engine.storage_history("nope:1").is_empty());
    }

    #[test]
    fn test_layer_contents() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("c1"), digest_of("c2")];
        fx.register_chain(&diffs);
        fx.write_file(&diffs[..1], "etc/hosts", b"127.0.0.1 localhost\n");
        fx.write_file(&diffs[..1], "bin/sh", &[0u8; 100]);
        fx.write_file(&diffs, "app/main", &[1u8; 7]);
        let daemon = FakeDaemon::new(vec![FakeImage::new("c", &["c:1"], &diffs)]);
        let engine = engine(&fx, &daemon);

        let contents = engine.layer_contents("c:1").unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].entries, vec!["bin", "etc"]);
        assert_eq!(contents[0].size, 120);
        assert_eq!(contents[1].entries, vec!["app"]);
        assert_eq!(contents[1].size, 7);
        assert!(engine.layer_contents("missing:1").unwrap().is_empty());
    }

    #[test]
    fn test_layer_contents_missing_diff_dir() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("gone")];
        fx.register_chain(&diffs);
        let chain = &chain_ids(&diffs)[0];
        std::fs::remove_dir_all(fx.storage().join(fx.storage_id_for(chain))).unwrap();
        let daemon = FakeDaemon::new(vec![FakeImage::new("g", &["g:1"], &diffs)]);
        let engine = engine(&fx, &daemon);

        let err = engine.layer_contents("g:1").unwrap_err();
        assert!(err.is_structural());
    }
}
