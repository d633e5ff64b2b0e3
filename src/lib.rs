//! Relational queries over the layers of a local Docker image store.
//!
//! The engine rebuilds each image's layer chain ids from its diff ids,
//! resolves them to overlay2 storage directories through the layer database,
//! and answers questions over the resulting [`snapshot::Snapshot`]:
//!
//! - which images contain a layer ([`relation::RelationEngine::layer_relations`])
//! - which tagged image an untagged one is closest to ([`relation::RelationEngine::none_matches`])
//! - where each build instruction's files live ([`relation::RelationEngine::storage_history`])
//! - what each layer holds ([`relation::RelationEngine::layer_contents`])
//! - which images contain a given file ([`locate::Locator::locate`])
//!
//! The daemon is reached through the `docker` CLI; the layer database and
//! storage root are read directly and never written.

pub mod address;
pub mod config;
pub mod daemon;
pub mod digest;
pub mod error;
pub mod human;
pub mod layerdb;
pub mod locate;
pub mod progress;
pub mod relation;
pub mod snapshot;


pub use error::{Error, Result};
