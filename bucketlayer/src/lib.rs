//! Resilient access layer for clustered JSON document stores.
//!
//! This crate is the primary entry point. It re-exports the core client,
//! driver traits, and helpers from the sub-crates and provides convenient
//! access to the bundled drivers.
//!
//! # Quick Start
//!
//! ```ignore
//! use bucketlayer::{memory::InMemoryCluster, prelude::*};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let config = ClusterConfig::builder()
//!         .endpoint("mem://local")
//!         .credentials("dev", "dev")
//!         .bucket("content")
//!         .build();
//!
//!     // Nothing connects until the first operation.
//!     let client = ClusterClient::new(InMemoryCluster::new(), config);
//!     let cancel = CancellationToken::new();
//!
//!     let key = generate_id(&[KeyPart::scalar("blog"), KeyPart::scalar(42)])?;
//!     client
//!         .create_item(&key, json!({"title": "hello"}), &cancel)
//!         .await?;
//!
//!     let mut rows = client.query_async(
//!         QueryDescriptor::new("SELECT c.* FROM content AS c"),
//!         &cancel,
//!     );
//!     while let Some(row) = rows.advance().await? {
//!         println!("{row}");
//!     }
//!
//!     client.dispose().await
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - Map-backed driver for development and testing (requires the
//!   default `memory` feature)

pub mod prelude;

pub use bucketlayer_core::{client, config, document, driver, error, executor, keys, query, rows};

/// In-memory driver implementations.
///
/// This module is only available when the `memory` feature is enabled.
#[cfg(feature = "memory")]
pub mod memory {
    pub use bucketlayer_memory::{InMemoryCluster, InMemoryClusterBuilder};
}
