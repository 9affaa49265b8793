//! In-memory driver for bucketlayer.
//!
//! [`InMemoryCluster`] implements the core driver traits against plain maps,
//! with fault injection hooks for exercising the retry and error paths. It
//! exists for development and testing; nothing is persisted.

#[allow(unused_extern_crates)]
extern crate self as bucketlayer_memory;

pub mod cluster;

pub use cluster::{InMemoryCluster, InMemoryClusterBuilder};
