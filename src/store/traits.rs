use crate::model::{
    ApiToken, EntityId, Id, Library, StepRecord, User, WorkflowError, WorkflowSession,
};
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;

/// Error kinds reported by the persistence layer
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DbError {
    #[error("{0}")]
    ElementDoesNotExist(String),
    #[error("{0}")]
    LinkDoesNotExist(String),
    #[error("{0}")]
    LinkAlreadyExists(String),
    #[error("{0}")]
    Generic(String),
}

/// Transactional scope bracketing one request's persistence operations
#[async_trait::async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn get_user(&self, id: EntityId) -> Result<Option<User>>;
    async fn get_api_token(&self, token: &str) -> Result<Option<ApiToken>>;
    async fn get_library(&self, id: EntityId) -> Result<Option<Library>>;
    /// Libraries ordered by id, optionally restricted to one sequencing request
    async fn list_libraries(&self, seq_request_id: Option<EntityId>) -> Result<Vec<Library>>;
    async fn update_library(&self, library: Library) -> Result<()>;
    /// True while writes are pending that have not been committed
    fn needs_commit(&self) -> bool;
    /// Commit pending writes unless `rollback` is set.
    /// Returns true when committed writes require cache invalidation.
    async fn close(&self, commit: bool, rollback: bool) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn open_session(&self) -> Result<Arc<dyn UnitOfWork>>;
}

/// Persistence contract for resumable wizard state
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Create and persist an empty session; returns it with its minted uuid
    async fn create(&self, workflow_name: &str) -> Result<WorkflowSession>;
    async fn load(&self, workflow_name: &str, uuid: &Id) -> Result<Option<WorkflowSession>>;
    /// Persist `session` if its revision matches the stored one.
    /// The revision is incremented on success.
    async fn save(&self, session: &mut WorkflowSession) -> Result<()>;
    /// Delete sessions not updated within `ttl`; returns how many were removed
    async fn purge_expired(&self, ttl: chrono::Duration) -> Result<usize>;

    /// Remove and return the most recent step record
    async fn pop_last_step(&self, workflow_name: &str, uuid: &Id) -> Result<Option<(String, StepRecord)>> {
        let Some(mut session) = self.load(workflow_name, uuid).await? else {
            return Ok(None);
        };
        let Some(record) = session.pop_last_step()? else {
            return Ok(None);
        };
        session.touch();
        self.save(&mut session).await?;
        Ok(Some((record.step_name.clone(), record)))
    }

    /// Mark the session completed; later transitions fail
    async fn complete(&self, workflow_name: &str, uuid: &Id) -> Result<()> {
        let mut session = self
            .load(workflow_name, uuid)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                workflow: workflow_name.to_string(),
                uuid: uuid.clone(),
            })?;
        session.mark_completed()?;
        session.touch();
        self.save(&mut session).await
    }
}
