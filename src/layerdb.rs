use std::path::PathBuf;

use tracing::trace;

use crate::digest::Digest;
use crate::error::{Error, Result};

/// Resolves a chain id to the storage id of the directory holding the layer.
pub trait LayerLookup {
    fn storage_id(&self, chain_id: &Digest) -> Result<String>;
}

/// Reads Docker's layer database (`image/overlay2/layerdb`).
///
/// Each layer lives at `<root>/<algorithm>/<chain-hex>/` and its storage id is
/// the content of the `cache-id` file there. Nothing is cached.
#[derive(Debug, Clone)]
pub struct LayerDb {
    root: PathBuf,
}

impl LayerDb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cache_id_path(&self, chain_id: &Digest) -> PathBuf {
        self.root
            .join(chain_id.algorithm().as_str())
            .join(chain_id.hex())
            .join("cache-id")
    }
}

impl LayerLookup for LayerDb {
    fn storage_id(&self, chain_id: &Digest) -> Result<String> {
        let path = self.cache_id_path(chain_id);
        let content = std::fs::read_to_string(&path).map_err(|source| Error::MissingLayer {
            chain_id: chain_id.to_string(),
            path: path.clone(),
            source,
        })?;
        let id = content.trim();
        if id.is_empty() {
            return Err(Error::EmptyStorageId(chain_id.to_string()));
        }
        trace!(chain = %chain_id, storage = id, "resolved layer");
        Ok(id.to_string())
    }
}
