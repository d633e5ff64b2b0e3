//! In-memory snapshot of every image in the store.
//!
//! The snapshot is built once from the daemon and the layer database, then
//! published behind an `Arc` and never mutated. Readers see either no snapshot
//! or a complete one.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info};

use crate::address::{self, LayerIdentity};
use crate::daemon::{Daemon, HistoryEntry, ImageSummary};
use crate::digest::strip_algorithm;
use crate::error::Result;
use crate::layerdb::LayerLookup;

/// Name and tag given to images without one.
pub const NONE: &str = "<none>";

/// One `name:tag` view of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub name: String,
    pub tag: String,
    pub image_id: String,
    /// Root layer first.
    pub layers: Vec<LayerIdentity>,
    /// Newest entry first, as the daemon reports it.
    pub history: Vec<HistoryEntry>,
}

impl ImageRecord {
    pub fn is_untagged(&self) -> bool {
        self.name == NONE || self.tag == NONE
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    pub fn diff_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.diff_id.hex())
    }
}

/// Split `name:tag` on the last colon. A "tag" holding a `/` belongs to a
/// registry host with a port, so `localhost:5000/app` has no tag.
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    let (name, tag) = reference.rsplit_once(':')?;
    if name.is_empty() || tag.is_empty() || tag.contains('/') {
        return None;
    }
    Some((name, tag))
}

/// Expand one daemon image into a record per `name:tag`.
fn expand(
    summary: &ImageSummary,
    layers: Vec<LayerIdentity>,
    history: Vec<HistoryEntry>,
) -> Vec<ImageRecord> {
    let record = |name: &str, tag: &str| ImageRecord {
        name: name.to_string(),
        tag: tag.to_string(),
        image_id: summary.id.clone(),
        layers: layers.clone(),
        history: history.clone(),
    };

    if summary.repo_tags.is_empty() {
        let name = summary
            .repo_digests
            .first()
            .map(|d| d.split('@').next().unwrap_or(NONE))
            .unwrap_or(NONE);
        return vec![record(name, NONE)];
    }

    summary
        .repo_tags
        .iter()
        .filter_map(|t| parse_reference(t))
        .map(|(name, tag)| record(name, tag))
        .collect()
}

/// Pull every image from the daemon and resolve its layer chain.
///
/// Any failure aborts the build; a snapshot with some images missing would
/// silently answer queries wrong.
pub fn build(
    daemon: &dyn Daemon,
    lookup: &dyn LayerLookup,
    progress: Option<&ProgressBar>,
) -> Result<Snapshot> {
    let images = daemon.list_images()?;
    let total = images.len();
    let mut records = Vec::with_capacity(total);

    for (i, image) in images.iter().enumerate() {
        if let Some(bar) = progress {
            bar.set_message(format!("Resolving image {}/{} ...", i + 1, total));
        }
        let inspect = daemon.inspect_image(&image.id)?;
        let history = daemon.image_history(&image.id)?;
        let diff_ids = address::parse_diff_ids(&inspect.diff_ids)?;
        let layers = address::resolve_chain(&diff_ids, lookup)?;
        debug!(image = %image.id, layers = layers.len(), "resolved image");
        records.extend(expand(image, layers, history));
    }

    info!(images = total, records = records.len(), "built image snapshot");
    Ok(Snapshot { records })
}

/// Immutable collection of image records.
#[derive(Debug, Default)]
pub struct Snapshot {
    records: Vec<ImageRecord>,
}

impl Snapshot {
    pub fn new(records: Vec<ImageRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn filter_layers(&self, pred: impl Fn(&LayerIdentity) -> bool) -> Vec<&ImageRecord> {
        self.records
            .iter()
            .filter(|r| r.layers.iter().any(&pred))
            .collect()
    }

    /// Records owning a layer whose diff id, chain id or storage id is `id`.
    pub fn by_layer(&self, id: &str) -> Vec<&ImageRecord> {
        let id = strip_algorithm(id.trim());
        self.filter_layers(|l| l.matches(id))
    }

    pub fn by_diff_id(&self, id: &str) -> Vec<&ImageRecord> {
        let id = strip_algorithm(id.trim());
        self.filter_layers(|l| l.diff_id.hex() == id)
    }

    pub fn by_chain_id(&self, id: &str) -> Vec<&ImageRecord> {
        let id = strip_algorithm(id.trim());
        self.filter_layers(|l| l.chain_id.hex() == id)
    }

    pub fn by_storage_id(&self, id: &str) -> Vec<&ImageRecord> {
        let id = id.trim();
        self.filter_layers(|l| l.storage_id == id)
    }

    /// Look up by `name:tag`, or else by image id fragment (first match).
    pub fn by_image(&self, identifier: &str) -> Option<&ImageRecord> {
        let identifier = strip_algorithm(identifier.trim());
        if identifier.is_empty() {
            return None;
        }
        match parse_reference(identifier) {
            Some((name, tag)) => self
                .records
                .iter()
                .find(|r| r.name == name && r.tag == tag),
            None => self.records.iter().find(|r| r.image_id.contains(identifier)),
        }
    }

    /// Untagged record whose image id contains `fragment`; the last match wins.
    pub fn by_none_image(&self, fragment: &str) -> Option<&ImageRecord> {
        let fragment = strip_algorithm(fragment.trim());
        if fragment.is_empty() {
            return None;
        }
        self.records
            .iter()
            .rev()
            .find(|r| r.is_untagged() && r.image_id.contains(fragment))
    }
}

/// Lazily built, atomically published snapshot.
pub struct SnapshotCache<D, L> {
    daemon: D,
    lookup: L,
    current: RwLock<Option<Arc<Snapshot>>>,
    build_lock: Mutex<()>,
    progress: Option<ProgressBar>,
}

impl<D: Daemon, L: LayerLookup> SnapshotCache<D, L> {
    pub fn new(daemon: D, lookup: L) -> Self {
        Self {
            daemon,
            lookup,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
            progress: None,
        }
    }

    /// Attach a progress bar (clone of a Spinner's inner bar) for status updates.
    pub fn set_progress_bar(&mut self, bar: ProgressBar) {
        self.progress = Some(bar);
    }

    fn published(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        snapshot
    }

    /// The current snapshot, building it on first use. Concurrent callers
    /// wait for a single build.
    pub fn get(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.published() {
            return Ok(snapshot);
        }
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = self.published() {
            return Ok(snapshot);
        }
        let snapshot = build(&self.daemon, &self.lookup, self.progress.as_ref())?;
        Ok(self.publish(snapshot))
    }

    /// Build a fresh snapshot and swap it in. The old one stays visible
    /// until the new one is complete, and stays in place if the build fails.
    pub fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = build(&self.daemon, &self.lookup, self.progress.as_ref())?;
        Ok(self.publish(snapshot))
    }
}
