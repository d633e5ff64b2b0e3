//! Find every copy of a file's content under the storage root and the
//! images that own it.
//!
//! Top-level layer directories are handed out to a fixed pool of walkers
//! which forward files of the right size. Each candidate is then re-hashed
//! in its own blocking task, bounded by a semaphore, and true matches are
//! attributed to images through the snapshot.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Walker pool size when none is configured.
pub const DEFAULT_WORKERS: usize = 10;

/// overlay2 keeps its short-name symlinks here.
const LINK_DIR: &str = "l";

/// Length and SHA-256 of the file being searched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub len: u64,
    pub digest: String,
}

impl Target {
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            len: data.len() as u64,
            digest: format!("{:x}", Sha256::digest(&data)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BinaryHit {
    pub path: PathBuf,
    pub name: String,
    pub tag: String,
    pub image_id: String,
}

/// Longest name and tag among the hits, for column layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Widths {
    pub name: usize,
    pub tag: usize,
}

#[derive(Debug, Default)]
pub struct Located {
    /// Sorted by path, then name, tag and image id.
    pub hits: Vec<BinaryHit>,
    pub widths: Widths,
    /// Files whose size matched the target.
    pub candidates: usize,
}

#[derive(Default)]
struct Shared {
    hits: Mutex<Vec<BinaryHit>>,
    widths: Mutex<Widths>,
}

pub struct Locator {
    storage_root: PathBuf,
    workers: usize,
    verify_limit: usize,
}

impl Locator {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        let verify_limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            storage_root: storage_root.into(),
            workers: DEFAULT_WORKERS,
            verify_limit,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_verify_limit(mut self, limit: usize) -> Self {
        self.verify_limit = limit.max(1);
        self
    }

    /// Layer directories directly under the storage root, sorted.
    fn layer_dirs(&self) -> Result<Vec<PathBuf>> {
        let root = &self.storage_root;
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root).map_err(|e| Error::io(root, e))? {
            let entry = entry.map_err(|e| Error::io(root, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            if file_type.is_dir() && entry.file_name() != LINK_DIR {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Search the storage root for files identical to `target`.
    ///
    /// Returns only once every walker and verifier has finished. Cancelling
    /// `cancel` stops the walk and yields [`Error::Cancelled`]. The first walk
    /// error stops every walker and is returned.
    pub async fn locate(
        &self,
        target: &Path,
        snapshot: Arc<Snapshot>,
        cancel: CancellationToken,
    ) -> Result<Located> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let target_path = target.to_path_buf();
        let target = tokio::task::spawn_blocking(move || Target::read(&target_path)).await??;
        let dirs = self.layer_dirs()?;
        debug!(dirs = dirs.len(), len = target.len, "scanning storage root");
        self.scan(dirs, Arc::new(target), snapshot, cancel).await
    }

    async fn scan(
        &self,
        dirs: Vec<PathBuf>,
        target: Arc<Target>,
        snapshot: Arc<Snapshot>,
        cancel: CancellationToken,
    ) -> Result<Located> {
        // Cancelled by the caller or by the first failing walker.
        let abort = cancel.child_token();
        let queue = Arc::new(Mutex::new(VecDeque::from(dirs)));
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut walkers = JoinSet::new();
        for _ in 0..self.workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let abort = abort.clone();
            let len = target.len;
            walkers.spawn_blocking(move || run_walker(&queue, len, &tx, &abort));
        }
        drop(tx);

        let shared = Arc::new(Shared::default());
        let permits = Arc::new(Semaphore::new(self.verify_limit));
        let mut verifiers = JoinSet::new();
        let mut candidates = 0usize;

        while let Some(path) = rx.recv().await {
            candidates += 1;
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            let target = Arc::clone(&target);
            let snapshot = Arc::clone(&snapshot);
            let shared = Arc::clone(&shared);
            let root = self.storage_root.clone();
            let abort = abort.clone();
            verifiers.spawn_blocking(move || {
                let _permit = permit;
                if !abort.is_cancelled() {
                    verify(&path, &target, &snapshot, &root, &shared);
                }
            });
        }

        let mut failure = None;
        while let Some(walked) = walkers.join_next().await {
            match walked? {
                Ok(()) | Err(Error::Cancelled) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        while let Some(verified) = verifiers.join_next().await {
            verified?;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let mut hits =
            std::mem::take(&mut *shared.hits.lock().unwrap_or_else(PoisonError::into_inner));
        hits.sort();
        let widths = *shared.widths.lock().unwrap_or_else(PoisonError::into_inner);
        info!(candidates, hits = hits.len(), "file search finished");

        Ok(Located {
            hits,
            widths,
            candidates,
        })
    }
}

/// One walker of the pool. A walk error cancels `abort` so the other walkers
/// stop at their next entry.
fn run_walker(
    queue: &Mutex<VecDeque<PathBuf>>,
    len: u64,
    tx: &mpsc::UnboundedSender<PathBuf>,
    abort: &CancellationToken,
) -> Result<()> {
    let result = walk_dirs(queue, len, tx, abort);
    match &result {
        Ok(()) | Err(Error::Cancelled) => {}
        Err(e) => {
            warn!(error = %e, "walk failed, stopping search");
            abort.cancel();
        }
    }
    result
}

/// Pull directories off the shared queue until it is empty, sending every
/// regular file of length `len`.
fn walk_dirs(
    queue: &Mutex<VecDeque<PathBuf>>,
    len: u64,
    tx: &mpsc::UnboundedSender<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(dir) = next else {
            return Ok(());
        };
        for entry in WalkDir::new(&dir).follow_links(false) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata()?.len() == len && tx.send(entry.into_path()).is_err() {
                return Ok(());
            }
        }
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// The layer directory name of a file at `<root>/<storage-id>/<sub>/...`.
fn storage_segment(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components = rel.components();
    let first = components.next()?;
    if components.count() < 2 {
        return None;
    }
    first.as_os_str().to_str().map(str::to_string)
}

fn verify(path: &Path, target: &Target, snapshot: &Snapshot, root: &Path, shared: &Shared) {
    match hash_file(path) {
        Ok(digest) if digest == target.digest => {}
        Ok(_) => return,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable candidate");
            return;
        }
    }
    let Some(storage_id) = storage_segment(root, path) else {
        return;
    };

    let owners = snapshot.by_layer(&storage_id);
    if owners.is_empty() {
        debug!(path = %path.display(), "match in a directory no image owns");
        return;
    }

    {
        let mut widths = shared.widths.lock().unwrap_or_else(PoisonError::into_inner);
        for owner in &owners {
            widths.name = widths.name.max(owner.name.len());
            widths.tag = widths.tag.max(owner.tag.len());
        }
    }

    let mut hits = shared.hits.lock().unwrap_or_else(PoisonError::into_inner);
    hits.extend(owners.into_iter().map(|owner| BinaryHit {
        path: path.to_path_buf(),
        name: owner.name.clone(),
        tag: owner.tag.clone(),
        image_id: owner.image_id.clone(),
    }));
}
