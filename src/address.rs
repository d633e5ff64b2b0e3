//! Content addressing of an image's layer stack.
//!
//! Docker stores each layer under its *chain id*, the digest of the ordered
//! diff ids from the root layer up to and including that layer. The root
//! layer's chain id is its diff id; every later one is
//! `H("<parent chain id> <diff id>")`. The storage directory holding a layer's
//! files is only reachable through that chain id, so the whole chain must be
//! rebuilt before any layer can be located on disk.

use serde::Serialize;
use tracing::debug;

use crate::digest::Digest;
use crate::error::Result;
use crate::layerdb::LayerLookup;

/// One fully resolved layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerIdentity {
    pub diff_id: Digest,
    pub chain_id: Digest,
    /// Directory name under the storage root.
    pub storage_id: String,
}

impl LayerIdentity {
    /// True if `id` (hex, without algorithm) names this layer in any of the
    /// three address spaces.
    pub fn matches(&self, id: &str) -> bool {
        self.diff_id.hex() == id || self.chain_id.hex() == id || self.storage_id == id
    }
}

/// Parse raw diff id strings as reported by the daemon.
pub fn parse_diff_ids<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Digest>> {
    raw.iter().map(|s| s.as_ref().parse()).collect()
}

/// Chain ids for `diff_ids`, root first. Pure, no layer database access.
pub fn chain_ids(diff_ids: &[Digest]) -> Vec<Digest> {
    let mut chain: Option<Digest> = None;
    diff_ids
        .iter()
        .map(|diff_id| {
            let next = match &chain {
                None => diff_id.clone(),
                Some(parent) => parent.chain(diff_id),
            };
            chain = Some(next.clone());
            next
        })
        .collect()
}

/// Resolve every layer of a stack to its storage id.
///
/// Fails as a whole if any layer is absent from the layer database: a chain
/// with a hole cannot be used to locate the layers above it.
pub fn resolve_chain(diff_ids: &[Digest], lookup: &dyn LayerLookup) -> Result<Vec<LayerIdentity>> {
    let mut layers = Vec::with_capacity(diff_ids.len());
    for (diff_id, chain_id) in diff_ids.iter().zip(chain_ids(diff_ids)) {
        let storage_id = lookup.storage_id(&chain_id)?;
        layers.push(LayerIdentity {
            diff_id: diff_id.clone(),
            chain_id,
            storage_id,
        });
    }
    debug!(layers = layers.len(), "resolved layer chain");
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::layerdb::LayerDb;
    use crate::test::{Fixture, digest_of};

    #[test]
    fn test_root_layer_chain_is_diff_id() {
        let d0 = digest_of("root");
        let chains = chain_ids(std::slice::from_ref(&d0));
        assert_eq!(chains, vec![d0]);
    }

    #[test]
    fn test_chain_links_to_parent() {
        let diffs = vec![digest_of("a"), digest_of("b"), digest_of("c")];
        let chains = chain_ids(&diffs);
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0], diffs[0]);
        assert_eq!(chains[1], diffs[0].chain(&diffs[1]));
        assert_eq!(chains[2], chains[1].chain(&diffs[2]));
    }

    #[test]
    fn test_shared_prefix_shares_chain_ids() {
        let short = chain_ids(&[digest_of("a"), digest_of("b")]);
        let long = chain_ids(&[digest_of("a"), digest_of("b"), digest_of("c")]);
        assert_eq!(short[..], long[..2]);
        // Same diff id on a different parent yields a different chain id.
        let other = chain_ids(&[digest_of("x"), digest_of("b")]);
        assert_ne!(other[1], short[1]);
    }

    #[test]
    fn test_resolve_chain_is_deterministic() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("l1"), digest_of("l2"), digest_of("l3")];
        fx.register_chain(&diffs);
        let db = LayerDb::new(fx.layerdb());

        let first = resolve_chain(&diffs, &db).unwrap();
        let second = resolve_chain(&diffs, &db).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].chain_id, diffs[0]);
        for (layer, diff) in first.iter().zip(&diffs) {
            assert_eq!(&layer.diff_id, diff);
            assert_eq!(layer.storage_id, fx.storage_id_for(&layer.chain_id));
        }
    }

    #[test]
    fn test_resolve_chain_fails_on_hole() {
        let fx = Fixture::new();
        let diffs = vec![digest_of("l1"), digest_of("l2")];
        // Register only the root layer.
        fx.register_chain(&diffs[..1]);
        let db = LayerDb::new(fx.layerdb());

        let err = resolve_chain(&diffs, &db).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_parse_diff_ids_rejects_garbage() {
        let err = parse_diff_ids(&["sha256:nothex"]).unwrap_err();
        assert!(matches!(err, Error::InvalidDigest(_)));
    }

    #[test]
    fn test_identity_matches_each_space() {
        let layer = LayerIdentity {
            diff_id: digest_of("d"),
            chain_id: digest_of("c"),
            storage_id: "s123".into(),
        };
        assert!(layer.matches(digest_of("d").hex()));
        assert!(layer.matches(digest_of("c").hex()));
        assert!(layer.matches("s123"));
        assert!(!layer.matches("s12"));
    }
}
