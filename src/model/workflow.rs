use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{generate_id, Id, Table, TableError};

pub type Metadata = BTreeMap<String, serde_json::Value>;
pub type StepArgs = BTreeMap<String, serde_json::Value>;
pub type Tables = BTreeMap<String, Table>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow session '{uuid}' of '{workflow}' does not exist")]
    NotFound { workflow: String, uuid: Id },
    #[error("workflow session '{0}' is already completed")]
    Completed(Id),
    #[error("workflow session '{uuid}' was modified concurrently (expected revision {expected}, found {found})")]
    Conflict { uuid: Id, expected: u64, found: u64 },
    #[error("table '{0}' does not exist")]
    MissingTable(String),
    #[error("workflow refers to {0}, which no longer exists")]
    MissingReference(String),
    #[error("workflow session '{0}' has no steps")]
    NoSteps(Id),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Snapshot of a workflow as it was after one step was submitted.
///
/// `tables` and `metadata` hold the complete state at that point, not a delta,
/// so popping a record restores exactly the state of the record before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_name: String,
    /// URL context needed to rebuild the step's form
    pub args: StepArgs,
    pub tables: Tables,
    pub metadata: Metadata,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(step_name: impl Into<String>, args: StepArgs) -> Self {
        Self {
            step_name: step_name.into(),
            args,
            tables: Tables::new(),
            metadata: Metadata::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Start a new step from the state left behind by `previous`
    pub fn following(previous: &StepRecord, step_name: impl Into<String>, args: StepArgs) -> Self {
        Self {
            step_name: step_name.into(),
            args,
            tables: previous.tables.clone(),
            metadata: previous.metadata.clone(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
        }
    }
}

/// Resumable wizard state keyed by `uuid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub uuid: Id,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    /// Incremented on every successful save
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<StepRecord>,
}

impl WorkflowSession {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: generate_id(),
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Active,
            revision: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn ensure_active(&self) -> Result<(), WorkflowError> {
        if self.is_completed() {
            return Err(WorkflowError::Completed(self.uuid.clone()));
        }
        Ok(())
    }

    pub fn last_step(&self) -> Option<&StepRecord> {
        self.history.last()
    }

    pub fn step(&self, step_name: &str) -> Option<&StepRecord> {
        self.history.iter().find(|s| s.step_name == step_name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.history.iter().map(|s| s.step_name.as_str()).collect()
    }

    /// Tables as of the most recent step
    pub fn tables(&self) -> Tables {
        self.last_step().map(|s| s.tables.clone()).unwrap_or_default()
    }

    pub fn metadata(&self) -> Metadata {
        self.last_step().map(|s| s.metadata.clone()).unwrap_or_default()
    }

    /// Working copy for `step_name`: the step's own record when it is re-entered,
    /// otherwise a new record that starts from the latest state.
    pub fn working_record(&self, step_name: &str, args: StepArgs) -> StepRecord {
        // A re-entered step resumes from its own earlier record and keeps
        // what it contributed last time, not the later steps' state.
        if let Some(existing) = self.step(step_name) {
            let mut record = existing.clone();
            record.args = args;
            return record;
        }
        match self.last_step() {
            Some(previous) => StepRecord::following(previous, step_name, args),
            None => StepRecord::new(step_name, args),
        }
    }

    /// Append `record`. Re-entering an earlier step rewinds the history to it.
    pub fn record_step(&mut self, mut record: StepRecord) -> Result<(), WorkflowError> {
        self.ensure_active()?;
        if let Some(pos) = self.history.iter().position(|s| s.step_name == record.step_name) {
            self.history.truncate(pos);
        }
        record.recorded_at = Utc::now();
        self.history.push(record);
        Ok(())
    }

    /// Drop the latest step; everything it contributed disappears with it
    pub fn pop_last_step(&mut self) -> Result<Option<StepRecord>, WorkflowError> {
        self.ensure_active()?;
        Ok(self.history.pop())
    }

    pub fn mark_completed(&mut self) -> Result<(), WorkflowError> {
        self.ensure_active()?;
        self.status = WorkflowStatus::Completed;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.updated_at > ttl
    }
}
