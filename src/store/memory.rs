use anyhow::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{ApiToken, EntityId, Id, Library, User, WorkflowError, WorkflowSession};
use crate::store::traits::{Database, DbError, UnitOfWork, WorkflowStore};

#[derive(Debug, Default)]
struct MemoryData {
    users: HashMap<EntityId, User>,
    api_tokens: HashMap<String, ApiToken>,
    libraries: BTreeMap<EntityId, Library>,
}

/// Counters describing how unit-of-work scopes were closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

/// In-process LIMS database used for development, seeding and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    data: Arc<RwLock<MemoryData>>,
    stats: Arc<Mutex<SessionStats>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.data.write().users.insert(user.id, user);
    }

    pub fn insert_api_token(&self, token: ApiToken) {
        self.data.write().api_tokens.insert(token.token.clone(), token);
    }

    pub fn insert_library(&self, library: Library) {
        self.data.write().libraries.insert(library.id, library);
    }

    pub fn remove_library(&self, id: EntityId) -> Option<Library> {
        self.data.write().libraries.remove(&id)
    }

    pub fn library(&self, id: EntityId) -> Option<Library> {
        self.data.read().libraries.get(&id).cloned()
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.lock()
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn open_session(&self) -> Result<Arc<dyn UnitOfWork>> {
        self.stats.lock().opened += 1;
        Ok(Arc::new(MemoryUnitOfWork {
            data: self.data.clone(),
            stats: self.stats.clone(),
            pending: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Buffers writes until `close` and applies them atomically on commit
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    data: Arc<RwLock<MemoryData>>,
    stats: Arc<Mutex<SessionStats>>,
    pending: Mutex<BTreeMap<EntityId, Library>>,
    closed: AtomicBool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Generic("session is already closed".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn get_user(&self, id: EntityId) -> Result<Option<User>> {
        self.ensure_open()?;
        Ok(self.data.read().users.get(&id).cloned())
    }

    async fn get_api_token(&self, token: &str) -> Result<Option<ApiToken>> {
        self.ensure_open()?;
        Ok(self.data.read().api_tokens.get(token).cloned())
    }

    async fn get_library(&self, id: EntityId) -> Result<Option<Library>> {
        self.ensure_open()?;
        if let Some(staged) = self.pending.lock().get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.data.read().libraries.get(&id).cloned())
    }

    async fn list_libraries(&self, seq_request_id: Option<EntityId>) -> Result<Vec<Library>> {
        self.ensure_open()?;
        let pending = self.pending.lock();
        let data = self.data.read();
        Ok(data
            .libraries
            .values()
            .map(|library| pending.get(&library.id).unwrap_or(library).clone())
            .filter(|library| seq_request_id.is_none() || library.seq_request_id == seq_request_id)
            .collect())
    }

    async fn update_library(&self, library: Library) -> Result<()> {
        self.ensure_open()?;
        if !self.data.read().libraries.contains_key(&library.id) {
            return Err(DbError::ElementDoesNotExist(format!(
                "Library with id {} does not exist",
                library.id
            ))
            .into());
        }
        self.pending.lock().insert(library.id, library);
        Ok(())
    }

    fn needs_commit(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    async fn close(&self, commit: bool, rollback: bool) -> Result<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut stats = self.stats.lock();

        if rollback || !commit {
            stats.rolled_back += 1;
            return Ok(false);
        }

        stats.committed += 1;
        if pending.is_empty() {
            return Ok(false);
        }
        let mut data = self.data.write();
        for (id, library) in pending {
            data.libraries.insert(id, library);
        }
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    sessions: RwLock<HashMap<Id, WorkflowSession>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create(&self, workflow_name: &str) -> Result<WorkflowSession> {
        let session = WorkflowSession::new(workflow_name);
        self.sessions
            .write()
            .insert(session.uuid.clone(), session.clone());
        Ok(session)
    }

    async fn load(&self, workflow_name: &str, uuid: &Id) -> Result<Option<WorkflowSession>> {
        Ok(self
            .sessions
            .read()
            .get(uuid)
            .filter(|s| s.workflow_name == workflow_name)
            .cloned())
    }

    async fn save(&self, session: &mut WorkflowSession) -> Result<()> {
        let mut sessions = self.sessions.write();
        let stored = sessions
            .get(&session.uuid)
            .ok_or_else(|| WorkflowError::NotFound {
                workflow: session.workflow_name.clone(),
                uuid: session.uuid.clone(),
            })?;
        if stored.revision != session.revision {
            return Err(WorkflowError::Conflict {
                uuid: session.uuid.clone(),
                expected: session.revision,
                found: stored.revision,
            }
            .into());
        }
        session.revision += 1;
        sessions.insert(session.uuid.clone(), session.clone());
        Ok(())
    }

    async fn purge_expired(&self, ttl: chrono::Duration) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, ttl));
        Ok(before - sessions.len())
    }
}
