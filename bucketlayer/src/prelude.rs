//! Convenient re-exports of commonly used types from bucketlayer.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use bucketlayer::prelude::*;
//! ```

pub use bucketlayer_core::{
    client::ClusterClient,
    config::{ClusterConfig, ClusterConfigBuilder},
    driver::{BucketDriver, ClusterDriver, ClusterDriverBuilder, ClusterSession, RowStream},
    error::{StoreError, StoreResult},
    executor::{ExecutionStrategy, RetryPolicy},
    keys::{KeyPart, generate_id},
    query::QueryDescriptor,
    rows::{BlockingDocumentRows, DocumentRows},
};
