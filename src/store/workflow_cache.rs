use crate::model::{Id, WorkflowSession};
use crate::store::traits::WorkflowStore;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry for a workflow session
#[derive(Clone, Debug)]
struct CacheEntry {
    session: WorkflowSession,
    last_accessed: Instant,
}

/// In-memory cache for workflow sessions with TTL
#[derive(Debug)]
pub struct WorkflowCache {
    /// Cache entries keyed by session uuid
    entries: Arc<RwLock<HashMap<Id, CacheEntry>>>,
    ttl: Duration,
}

impl WorkflowCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Get a session from cache if present and not expired
    pub async fn get(&self, uuid: &Id) -> Option<WorkflowSession> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(uuid) {
            if entry.last_accessed.elapsed() > self.ttl {
                entries.remove(uuid);
                return None;
            }

            entry.last_accessed = Instant::now();
            Some(entry.session.clone())
        } else {
            None
        }
    }

    pub async fn put(&self, session: WorkflowSession) {
        let mut entries = self.entries.write().await;
        entries.insert(
            session.uuid.clone(),
            CacheEntry {
                session,
                last_accessed: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, uuid: &Id) {
        self.entries.write().await.remove(uuid);
    }

    /// Clear all expired entries from cache
    pub async fn clear_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.last_accessed.elapsed() <= ttl);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for WorkflowCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

/// Read-through, write-through cache in front of a persistent workflow store
pub struct CachedWorkflowStore<S> {
    inner: S,
    cache: WorkflowCache,
}

impl<S: WorkflowStore> CachedWorkflowStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: WorkflowCache::new(ttl),
        }
    }

    pub fn cache(&self) -> &WorkflowCache {
        &self.cache
    }
}

#[async_trait::async_trait]
impl<S: WorkflowStore> WorkflowStore for CachedWorkflowStore<S> {
    async fn create(&self, workflow_name: &str) -> Result<WorkflowSession> {
        let session = self.inner.create(workflow_name).await?;
        self.cache.put(session.clone()).await;
        Ok(session)
    }

    async fn load(&self, workflow_name: &str, uuid: &Id) -> Result<Option<WorkflowSession>> {
        if let Some(session) = self.cache.get(uuid).await {
            if session.workflow_name == workflow_name {
                return Ok(Some(session));
            }
            return Ok(None);
        }

        let session = self.inner.load(workflow_name, uuid).await?;
        if let Some(session) = &session {
            self.cache.put(session.clone()).await;
        }
        Ok(session)
    }

    async fn save(&self, session: &mut WorkflowSession) -> Result<()> {
        match self.inner.save(session).await {
            Ok(()) => {
                self.cache.put(session.clone()).await;
                Ok(())
            }
            Err(e) => {
                // the cached copy may be the stale one
                self.cache.remove(&session.uuid).await;
                Err(e)
            }
        }
    }

    async fn purge_expired(&self, ttl: chrono::Duration) -> Result<usize> {
        let purged = self.inner.purge_expired(ttl).await?;
        if purged > 0 {
            self.cache.clear().await;
        } else {
            self.cache.clear_expired().await;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StepArgs, WorkflowError};
    use crate::store::MemoryWorkflowStore;

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = WorkflowCache::new(Duration::from_secs(60));
        let session = WorkflowSession::new("reindex");

        cache.put(session.clone()).await;
        let cached = cache.get(&session.uuid).await;
        assert_eq!(cached.map(|s| s.uuid), Some(session.uuid.clone()));

        cache.remove(&session.uuid).await;
        assert!(cache.get(&session.uuid).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = WorkflowCache::new(Duration::from_millis(0));
        let session = WorkflowSession::new("reindex");
        cache.put(session.clone()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&session.uuid).await.is_none());

        cache.put(session).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.clear_expired().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_cached_store_write_through() {
        let store = CachedWorkflowStore::new(MemoryWorkflowStore::new(), Duration::from_secs(60));
        let mut session = store.create("reindex").await.unwrap();

        let record = session.working_record("one", StepArgs::new());
        session.record_step(record).unwrap();
        store.save(&mut session).await.unwrap();

        let loaded = store.load("reindex", &session.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.step_names(), vec!["one"]);
        assert!(store.load("pooling", &session.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_store_evicts_on_conflict() {
        let store = CachedWorkflowStore::new(MemoryWorkflowStore::new(), Duration::from_secs(60));
        let session = store.create("reindex").await.unwrap();

        let mut stale = session.clone();
        let mut fresh = session.clone();
        store.save(&mut fresh).await.unwrap();

        let err = store.save(&mut stale).await.unwrap_err();
        assert!(err.downcast_ref::<WorkflowError>().is_some());
        assert_eq!(store.cache().len().await, 0);

        let reloaded = store.load("reindex", &session.uuid).await.unwrap().unwrap();
        assert_eq!(reloaded.revision, 1);
    }
}
