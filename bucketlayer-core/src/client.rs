//! Resilient cluster client.
//!
//! [`ClusterClient`] is the long-lived entry point of the access layer. It
//! owns one lazily established cluster session and one lazily opened bucket
//! handle, memoized for the lifetime of the client, and funnels every store
//! operation through its [`ExecutionStrategy`] so transient faults are
//! retried uniformly.
//!
//! Construction never touches the network; the first operation that needs the
//! bucket pays the connection cost. Concurrent first callers race on one
//! mutex-guarded slot and converge on a single session.

use std::sync::Arc;

use mea::mutex::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClusterConfig,
    document::normalize_payload,
    driver::{BucketDriver, ClusterDriver, ClusterSession},
    error::{StoreError, StoreResult},
    executor::ExecutionStrategy,
    query::QueryDescriptor,
    rows::{BlockingDocumentRows, DocumentRows},
};

type SessionOf<D> = <D as ClusterDriver>::Session;
type BucketOf<D> = <<D as ClusterDriver>::Session as ClusterSession>::Bucket;

enum ConnState<D: ClusterDriver> {
    Unopened,
    Connected {
        session: Arc<SessionOf<D>>,
    },
    Open {
        session: Arc<SessionOf<D>>,
        bucket: Arc<BucketOf<D>>,
    },
    Disposed,
}

/// Client over one cluster and one bucket, generic over the driver.
pub struct ClusterClient<D: ClusterDriver> {
    driver: D,
    config: ClusterConfig,
    executor: ExecutionStrategy,
    state: Mutex<ConnState<D>>,
}

impl<D: ClusterDriver> ClusterClient<D> {
    /// Creates a client with the default retry policy. No connection is
    /// established yet.
    pub fn new(driver: D, config: ClusterConfig) -> Self {
        Self::with_strategy(driver, config, ExecutionStrategy::default())
    }

    /// Creates a client with a custom execution strategy.
    pub fn with_strategy(driver: D, config: ClusterConfig, executor: ExecutionStrategy) -> Self {
        Self {
            driver,
            config,
            executor,
            state: Mutex::new(ConnState::Unopened),
        }
    }

    /// The cluster configuration this client was built with.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The strategy applied to every operation.
    pub fn executor(&self) -> &ExecutionStrategy {
        &self.executor
    }

    /// Returns the memoized session, connecting on first use.
    async fn session(&self) -> StoreResult<Arc<SessionOf<D>>> {
        let mut state = self.state.lock().await;
        match &*state {
            ConnState::Disposed => Err(StoreError::Disposed),
            ConnState::Connected { session } | ConnState::Open { session, .. } => {
                Ok(session.clone())
            }
            ConnState::Unopened => {
                tracing::debug!(bucket = %self.config.bucket, "connecting to cluster");
                let session = Arc::new(self.driver.connect(&self.config).await?);
                *state = ConnState::Connected {
                    session: session.clone(),
                };
                Ok(session)
            }
        }
    }

    /// Returns the memoized bucket handle, connecting and opening on first
    /// use.
    async fn bucket(&self) -> StoreResult<Arc<BucketOf<D>>> {
        let mut state = self.state.lock().await;
        match &*state {
            ConnState::Disposed => return Err(StoreError::Disposed),
            ConnState::Open { bucket, .. } => return Ok(bucket.clone()),
            ConnState::Connected { .. } | ConnState::Unopened => {}
        }

        let session = match std::mem::replace(&mut *state, ConnState::Unopened) {
            ConnState::Connected { session } => session,
            _ => {
                tracing::debug!(bucket = %self.config.bucket, "connecting to cluster");
                Arc::new(self.driver.connect(&self.config).await?)
            }
        };

        tracing::debug!(bucket = %self.config.bucket, "opening bucket");
        match session.open_bucket(&self.config.bucket).await {
            Ok(bucket) => {
                let bucket = Arc::new(bucket);
                *state = ConnState::Open {
                    session,
                    bucket: bucket.clone(),
                };
                Ok(bucket)
            }
            Err(err) => {
                // Keep the session; only the bucket open failed.
                *state = ConnState::Connected { session };
                Err(err)
            }
        }
    }

    /// Inserts a new document under `key`.
    ///
    /// The reserved identity field is stripped from the payload before it is
    /// sent. Returns `false` when the store declines the write because the
    /// key already exists.
    pub async fn create_item(
        &self,
        key: &str,
        document: Value,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        let document = normalize_payload(document);
        self.executor
            .execute_async(
                "create_item",
                document,
                |document| async move {
                    let bucket = self.bucket().await?;
                    bucket.insert(key, document).await
                },
                cancel,
            )
            .await
    }

    /// Replaces the document stored under `key`.
    ///
    /// Returns `false` when there is no document to replace.
    pub async fn replace_item(
        &self,
        key: &str,
        document: Value,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        let document = normalize_payload(document);
        self.executor
            .execute_async(
                "replace_item",
                document,
                |document| async move {
                    let bucket = self.bucket().await?;
                    bucket.replace(key, document).await
                },
                cancel,
            )
            .await
    }

    /// Removes the document stored under `key`.
    ///
    /// Returns `false` when there is no document to remove.
    pub async fn delete_item(&self, key: &str, cancel: &CancellationToken) -> StoreResult<bool> {
        self.executor
            .execute_async(
                "delete_item",
                (),
                |()| async move {
                    let bucket = self.bucket().await?;
                    bucket.remove(key).await
                },
                cancel,
            )
            .await
    }

    /// Creates the configured bucket if it does not already exist.
    pub async fn ensure_bucket(&self, cancel: &CancellationToken) -> StoreResult<bool> {
        self.executor
            .execute_async(
                "ensure_bucket",
                (),
                |()| async move {
                    let session = self.session().await?;
                    session.create_bucket(&self.config.bucket).await
                },
                cancel,
            )
            .await
    }

    /// Drops the configured bucket and everything in it.
    pub async fn drop_bucket(&self, cancel: &CancellationToken) -> StoreResult<bool> {
        self.executor
            .execute_async(
                "drop_bucket",
                (),
                |()| async move {
                    let session = self.session().await?;
                    session.drop_bucket(&self.config.bucket).await
                },
                cancel,
            )
            .await
    }

    /// Blocking form of [`create_item`](ClusterClient::create_item).
    pub fn create_item_blocking(&self, key: &str, document: Value) -> StoreResult<bool> {
        let document = normalize_payload(document);
        self.executor
            .execute("create_item", document, |document| async move {
                let bucket = self.bucket().await?;
                bucket.insert(key, document).await
            })
    }

    /// Blocking form of [`replace_item`](ClusterClient::replace_item).
    pub fn replace_item_blocking(&self, key: &str, document: Value) -> StoreResult<bool> {
        let document = normalize_payload(document);
        self.executor
            .execute("replace_item", document, |document| async move {
                let bucket = self.bucket().await?;
                bucket.replace(key, document).await
            })
    }

    /// Blocking form of [`delete_item`](ClusterClient::delete_item).
    pub fn delete_item_blocking(&self, key: &str) -> StoreResult<bool> {
        self.executor.execute("delete_item", (), |()| async move {
            let bucket = self.bucket().await?;
            bucket.remove(key).await
        })
    }

    /// Blocking form of [`ensure_bucket`](ClusterClient::ensure_bucket).
    pub fn ensure_bucket_blocking(&self) -> StoreResult<bool> {
        self.executor.execute("ensure_bucket", (), |()| async move {
            let session = self.session().await?;
            session.create_bucket(&self.config.bucket).await
        })
    }

    /// Blocking form of [`drop_bucket`](ClusterClient::drop_bucket).
    pub fn drop_bucket_blocking(&self) -> StoreResult<bool> {
        self.executor.execute("drop_bucket", (), |()| async move {
            let session = self.session().await?;
            session.drop_bucket(&self.config.bucket).await
        })
    }

    /// Starts a streaming query. Nothing is sent until the returned
    /// enumerator is first advanced.
    pub fn query_async(
        &self,
        query: QueryDescriptor,
        cancel: &CancellationToken,
    ) -> DocumentRows<'_> {
        let cancel = cancel.clone();
        let opener = Box::pin(async move {
            tracing::debug!(statement = query.statement(), "executing query");
            let bucket = self.bucket().await?;
            bucket.query(&query).await
        });
        DocumentRows::new(opener, cancel)
    }

    /// Blocking form of [`query_async`](ClusterClient::query_async).
    pub fn query(&self, query: QueryDescriptor) -> StoreResult<BlockingDocumentRows<'_>> {
        let runtime = self.executor.runtime_handle()?;
        let rows = self.query_async(query, &CancellationToken::new());
        Ok(BlockingDocumentRows::new(rows, runtime))
    }

    /// Closes the session and marks the client disposed.
    ///
    /// Idempotent; every operation after disposal fails with
    /// [`StoreError::Disposed`]. The underlying session is closed at most
    /// once.
    pub async fn dispose(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ConnState::Disposed) {
            ConnState::Connected { session } | ConnState::Open { session, .. } => {
                tracing::debug!(bucket = %self.config.bucket, "closing cluster session");
                session.close().await
            }
            ConnState::Unopened | ConnState::Disposed => Ok(()),
        }
    }
}

impl<D: ClusterDriver> std::fmt::Debug for ClusterClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
