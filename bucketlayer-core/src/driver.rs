//! Driver abstraction over the underlying document-store client.
//!
//! The transport and wire protocol live in a lower-level driver; this module
//! defines the seam the access layer calls into. A [`ClusterDriver`] opens
//! authenticated sessions, a [`ClusterSession`] opens named buckets, and a
//! [`BucketDriver`] exposes the store's native key-value primitives plus a
//! streamed query request.
//!
//! # Contract
//!
//! - `connect` and `open_bucket` report failure as
//!   [`StoreError::Connection`](crate::error::StoreError::Connection); they
//!   are never retried at this layer.
//! - Key-value primitives report the store's acknowledgement as a plain
//!   `bool`: a non-acknowledged response (key already present on insert, key
//!   missing on replace or remove) is a normal `false` result, not an error.
//! - `query` hands back the raw response bytes as a forward-only
//!   [`RowStream`]; decoding is the enumerators' job. Dropping the stream
//!   releases the underlying response resources.

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::{config::ClusterConfig, error::StoreResult, query::QueryDescriptor};

/// Entry point into a concrete lower-level driver.
#[async_trait]
pub trait ClusterDriver: Send + Sync + Debug {
    /// The session type produced by a successful connect.
    type Session: ClusterSession;

    /// Establishes and authenticates a cluster session.
    async fn connect(&self, config: &ClusterConfig) -> StoreResult<Self::Session>;
}

/// An authenticated cluster session.
#[async_trait]
pub trait ClusterSession: Send + Sync + Debug {
    /// The bucket handle type produced by `open_bucket`.
    type Bucket: BucketDriver;

    /// Opens the named bucket.
    async fn open_bucket(&self, name: &str) -> StoreResult<Self::Bucket>;

    /// Creates the named bucket if it does not already exist.
    ///
    /// Returns `true` when the bucket was created, `false` when it already
    /// existed.
    async fn create_bucket(&self, name: &str) -> StoreResult<bool>;

    /// Drops the named bucket and all documents it holds.
    ///
    /// Returns `true` when the bucket existed and was removed, `false` when
    /// there was nothing to remove.
    async fn drop_bucket(&self, name: &str) -> StoreResult<bool>;

    /// Releases the session. Idempotent.
    async fn close(&self) -> StoreResult<()>;
}

/// Native key-value and query primitives of one opened bucket.
#[async_trait]
pub trait BucketDriver: Send + Sync + Debug {
    /// Inserts a new document under `key`.
    async fn insert(&self, key: &str, document: Value) -> StoreResult<bool>;

    /// Replaces the document stored under `key`.
    async fn replace(&self, key: &str, document: Value) -> StoreResult<bool>;

    /// Removes the document stored under `key`.
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Submits a streaming query request and returns the response stream.
    async fn query(&self, query: &QueryDescriptor) -> StoreResult<Box<dyn RowStream>>;
}

/// Forward-only chunks of a streamed query response.
///
/// `Ok(None)` signals end of stream. Implementations release their response
/// resources on drop.
#[async_trait]
pub trait RowStream: Send {
    /// Fetches the next chunk of response bytes.
    async fn next_chunk(&mut self) -> StoreResult<Option<Vec<u8>>>;
}

/// Factory trait for constructing driver instances.
#[async_trait]
pub trait ClusterDriverBuilder {
    /// The driver type this builder produces.
    type Driver: ClusterDriver;

    /// Builds and returns the driver.
    async fn build(self) -> StoreResult<Self::Driver>;
}
