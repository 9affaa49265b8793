//! Map-backed implementation of the cluster driver traits.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bucketlayer_core::{
    config::ClusterConfig,
    driver::{BucketDriver, ClusterDriver, ClusterDriverBuilder, ClusterSession, RowStream},
    error::{StoreError, StoreResult},
    query::QueryDescriptor,
};
use mea::{mutex::Mutex, rwlock::RwLock};
use serde_json::{Value, json};

/// Response bytes are served in small chunks so enumerators always exercise
/// their incremental decoding path.
const CHUNK_SIZE: usize = 48;

struct Shared {
    buckets: RwLock<HashMap<String, HashMap<String, Value>>>,
    /// Errors to return from upcoming bucket operations, one per call.
    faults: Mutex<VecDeque<StoreError>>,
    connect_count: AtomicU32,
    close_count: AtomicU32,
    request_counter: AtomicU64,
}

impl Shared {
    async fn take_fault(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock().await;
        match faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// In-memory cluster driver.
///
/// Cloning yields another handle to the same cluster state, so a test can
/// hold one handle for assertions while the client owns another.
#[derive(Clone)]
pub struct InMemoryCluster {
    shared: Arc<Shared>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                buckets: RwLock::new(HashMap::new()),
                faults: Mutex::new(VecDeque::new()),
                connect_count: AtomicU32::new(0),
                close_count: AtomicU32::new(0),
                request_counter: AtomicU64::new(1),
            }),
        }
    }

    pub fn builder() -> InMemoryClusterBuilder {
        InMemoryClusterBuilder::default()
    }

    /// Queues an error to be returned by the next bucket operation. Multiple
    /// queued faults are consumed one per call, in order.
    pub async fn inject_fault(&self, err: StoreError) {
        self.shared.faults.lock().await.push_back(err);
    }

    /// How many sessions have been established so far.
    pub fn connect_count(&self) -> u32 {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// How many sessions have been closed so far.
    pub fn session_close_count(&self) -> u32 {
        self.shared.close_count.load(Ordering::SeqCst)
    }

    /// Direct read of a stored document, bypassing the driver surface.
    pub async fn document(&self, bucket: &str, key: &str) -> Option<Value> {
        let buckets = self.shared.buckets.read().await;
        buckets.get(bucket)?.get(key).cloned()
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCluster").finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterDriver for InMemoryCluster {
    type Session = InMemorySession;

    async fn connect(&self, config: &ClusterConfig) -> StoreResult<InMemorySession> {
        if config.endpoints.is_empty() {
            return Err(StoreError::Connection("no endpoints configured".into()));
        }
        if config.username.is_empty() || config.password.is_empty() {
            return Err(StoreError::Connection("missing credentials".into()));
        }

        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(bucket = %config.bucket, "in-memory session established");
        Ok(InMemorySession {
            shared: self.shared.clone(),
        })
    }
}

/// Session handle over the shared cluster state.
pub struct InMemorySession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession").finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterSession for InMemorySession {
    type Bucket = InMemoryBucket;

    async fn open_bucket(&self, name: &str) -> StoreResult<InMemoryBucket> {
        // Opening creates the bucket when absent; a real store would require
        // it to exist, but for tests that strictness buys nothing.
        let mut buckets = self.shared.buckets.write().await;
        buckets.entry(name.to_string()).or_default();
        Ok(InMemoryBucket {
            name: name.to_string(),
            shared: self.shared.clone(),
        })
    }

    async fn create_bucket(&self, name: &str) -> StoreResult<bool> {
        let mut buckets = self.shared.buckets.write().await;
        if buckets.contains_key(name) {
            return Ok(false);
        }
        buckets.insert(name.to_string(), HashMap::new());
        Ok(true)
    }

    async fn drop_bucket(&self, name: &str) -> StoreResult<bool> {
        let mut buckets = self.shared.buckets.write().await;
        Ok(buckets.remove(name).is_some())
    }

    async fn close(&self) -> StoreResult<()> {
        self.shared.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Bucket handle over the shared cluster state.
pub struct InMemoryBucket {
    name: String,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemoryBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBucket")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BucketDriver for InMemoryBucket {
    async fn insert(&self, key: &str, document: Value) -> StoreResult<bool> {
        self.shared.take_fault().await?;
        let mut buckets = self.shared.buckets.write().await;
        let bucket = buckets.entry(self.name.clone()).or_default();
        if bucket.contains_key(key) {
            return Ok(false);
        }
        bucket.insert(key.to_string(), document);
        Ok(true)
    }

    async fn replace(&self, key: &str, document: Value) -> StoreResult<bool> {
        self.shared.take_fault().await?;
        let mut buckets = self.shared.buckets.write().await;
        let bucket = buckets.entry(self.name.clone()).or_default();
        if !bucket.contains_key(key) {
            return Ok(false);
        }
        bucket.insert(key.to_string(), document);
        Ok(true)
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        self.shared.take_fault().await?;
        let mut buckets = self.shared.buckets.write().await;
        let bucket = buckets.entry(self.name.clone()).or_default();
        Ok(bucket.remove(key).is_some())
    }

    async fn query(&self, query: &QueryDescriptor) -> StoreResult<Box<dyn RowStream>> {
        self.shared.take_fault().await?;
        let request_id = format!("mem-{}", self.shared.next_request_id());

        let is_select = query
            .statement()
            .trim_start()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("select"));

        let envelope = if is_select {
            let buckets = self.shared.buckets.read().await;
            let bucket = buckets.get(&self.name).cloned().unwrap_or_default();
            let mut entries: Vec<(String, Value)> = bucket.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let key_filter = query.param("key").and_then(Value::as_str);
            let rows: Vec<Value> = entries
                .into_iter()
                .filter(|(key, _)| key_filter.is_none_or(|wanted| wanted == key))
                .map(|(_, document)| document)
                .collect();

            json!({
                "requestID": request_id,
                "results": rows,
                "status": "success",
            })
        } else {
            json!({
                "requestID": request_id,
                "results": [],
                "errors": [{
                    "code": 3000,
                    "msg": format!("syntax error in statement: {}", query.statement()),
                }],
                "status": "fatal",
            })
        };

        let body = serde_json::to_vec(&envelope)?;
        let chunks = body.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
        Ok(Box::new(MemoryRowStream { chunks }))
    }
}

struct MemoryRowStream {
    chunks: VecDeque<Vec<u8>>,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    async fn next_chunk(&mut self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}

/// Builder for [`InMemoryCluster`], optionally pre-creating buckets.
#[derive(Debug, Default)]
pub struct InMemoryClusterBuilder {
    buckets: Vec<String>,
}

impl InMemoryClusterBuilder {
    /// Pre-creates the named bucket.
    pub fn bucket(mut self, name: impl Into<String>) -> Self {
        self.buckets.push(name.into());
        self
    }
}

#[async_trait]
impl ClusterDriverBuilder for InMemoryClusterBuilder {
    type Driver = InMemoryCluster;

    async fn build(self) -> StoreResult<InMemoryCluster> {
        let cluster = InMemoryCluster::new();
        {
            let mut buckets = cluster.shared.buckets.write().await;
            for name in self.buckets {
                buckets.entry(name).or_default();
            }
        }
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        ClusterConfig::builder()
            .endpoint("mem://local")
            .credentials("dev", "dev")
            .bucket("content")
            .build()
    }

    async fn open_bucket(cluster: &InMemoryCluster) -> InMemoryBucket {
        let session = cluster.connect(&config()).await.unwrap();
        session.open_bucket("content").await.unwrap()
    }

    #[tokio::test]
    async fn insert_is_first_writer_wins() {
        let cluster = InMemoryCluster::new();
        let bucket = open_bucket(&cluster).await;

        assert!(bucket.insert("k", json!({"v": 1})).await.unwrap());
        assert!(!bucket.insert("k", json!({"v": 2})).await.unwrap());
        assert_eq!(cluster.document("content", "k").await, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn replace_and_remove_require_an_existing_document() {
        let cluster = InMemoryCluster::new();
        let bucket = open_bucket(&cluster).await;

        assert!(!bucket.replace("k", json!({"v": 1})).await.unwrap());
        assert!(!bucket.remove("k").await.unwrap());

        bucket.insert("k", json!({"v": 1})).await.unwrap();
        assert!(bucket.replace("k", json!({"v": 2})).await.unwrap());
        assert_eq!(cluster.document("content", "k").await, Some(json!({"v": 2})));
        assert!(bucket.remove("k").await.unwrap());
        assert!(!bucket.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn query_envelope_reports_rows_and_status() {
        let cluster = InMemoryCluster::new();
        let bucket = open_bucket(&cluster).await;
        bucket.insert("b", json!({"n": 2})).await.unwrap();
        bucket.insert("a", json!({"n": 1})).await.unwrap();

        let mut stream = bucket
            .query(&QueryDescriptor::new("SELECT * FROM content"))
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }

        let envelope: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["status"], json!("success"));
        assert_eq!(envelope["results"], json!([{"n": 1}, {"n": 2}]));
    }

    #[tokio::test]
    async fn non_select_statement_yields_error_envelope() {
        let cluster = InMemoryCluster::new();
        let bucket = open_bucket(&cluster).await;

        let mut stream = bucket
            .query(&QueryDescriptor::new("DROP everything"))
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }

        let envelope: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["status"], json!("fatal"));
        assert_eq!(envelope["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let cluster = InMemoryCluster::new();
        let bucket = open_bucket(&cluster).await;
        cluster
            .inject_fault(StoreError::Transient("first".into()))
            .await;
        cluster
            .inject_fault(StoreError::Transient("second".into()))
            .await;

        assert!(matches!(
            bucket.insert("k", json!(1)).await.unwrap_err(),
            StoreError::Transient(msg) if msg == "first"
        ));
        assert!(matches!(
            bucket.insert("k", json!(1)).await.unwrap_err(),
            StoreError::Transient(msg) if msg == "second"
        ));
        assert!(bucket.insert("k", json!(1)).await.unwrap());
    }

    #[tokio::test]
    async fn connect_rejects_missing_credentials() {
        let cluster = InMemoryCluster::new();
        let config = ClusterConfig::builder()
            .endpoint("mem://local")
            .bucket("content")
            .build();

        assert!(matches!(
            cluster.connect(&config).await.unwrap_err(),
            StoreError::Connection(_)
        ));
        assert_eq!(cluster.connect_count(), 0);
    }

    #[tokio::test]
    async fn builder_precreates_buckets() {
        let cluster = InMemoryCluster::builder()
            .bucket("content")
            .build()
            .await
            .unwrap();
        let session = cluster.connect(&config()).await.unwrap();

        assert!(!session.create_bucket("content").await.unwrap());
        assert!(session.drop_bucket("content").await.unwrap());
        assert!(!session.drop_bucket("content").await.unwrap());
    }
}
