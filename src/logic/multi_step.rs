use anyhow::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::model::{
    Column, ColumnType, Id, Metadata, StepArgs, StepRecord, Table, Tables, WorkflowError,
    WorkflowSession,
};
use crate::store::WorkflowStore;

pub const COMMENT_TABLE: &str = "comment_table";

/// One wizard instance while a single step is being processed.
///
/// Reads and writes go to a working copy of the step's record; nothing is
/// persisted until `update_data` or `complete` is called.
pub struct MultiStepForm {
    store: Arc<dyn WorkflowStore>,
    session: WorkflowSession,
    record: StepRecord,
}

impl MultiStepForm {
    /// Open `step_name` of `workflow`. Without a uuid a new session is minted
    /// and sessions idle for longer than `ttl` are purged first.
    pub async fn open(
        store: Arc<dyn WorkflowStore>,
        workflow: &str,
        uuid: Option<&Id>,
        step_name: &str,
        args: StepArgs,
        ttl: chrono::Duration,
    ) -> Result<Self> {
        let session = match uuid {
            None => {
                let purged = store.purge_expired(ttl).await?;
                if purged > 0 {
                    log::info!("Purged {} expired '{}' workflow session(s)", purged, workflow);
                }
                store.create(workflow).await?
            }
            Some(uuid) => {
                let session = store
                    .load(workflow, uuid)
                    .await?
                    .ok_or_else(|| WorkflowError::NotFound {
                        workflow: workflow.to_string(),
                        uuid: uuid.clone(),
                    })?;
                session.ensure_active()?;
                session
            }
        };

        let record = session.working_record(step_name, args);
        Ok(Self {
            store,
            session,
            record,
        })
    }

    pub fn uuid(&self) -> &Id {
        &self.session.uuid
    }

    pub fn workflow(&self) -> &str {
        &self.session.workflow_name
    }

    pub fn step_name(&self) -> &str {
        &self.record.step_name
    }

    pub fn args(&self) -> &StepArgs {
        &self.record.args
    }

    /// Names of the steps recorded before this one
    pub fn steps(&self) -> Vec<&str> {
        self.session.step_names()
    }

    pub fn tables(&self) -> &Tables {
        &self.record.tables
    }

    pub fn table(&self, label: &str) -> Option<&Table> {
        self.record.tables.get(label)
    }

    pub fn require_table(&self, label: &str) -> Result<&Table, WorkflowError> {
        self.table(label)
            .ok_or_else(|| WorkflowError::MissingTable(label.to_string()))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.record.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.record.metadata.insert(key.into(), value.into());
    }

    /// Add or replace a table; a later step's table replaces an earlier one
    pub fn add_table(&mut self, label: impl Into<String>, table: Table) {
        self.record.tables.insert(label.into(), table);
    }

    pub fn update_table(&mut self, label: &str, table: Table) -> Result<(), WorkflowError> {
        let slot = self
            .record
            .tables
            .get_mut(label)
            .ok_or_else(|| WorkflowError::MissingTable(label.to_string()))?;
        *slot = table;
        Ok(())
    }

    pub fn add_comment(&mut self, context: &str, text: &str) -> Result<(), WorkflowError> {
        let comments = self
            .record
            .tables
            .entry(COMMENT_TABLE.to_string())
            .or_insert_with(|| {
                Table::new(vec![
                    Column::new("context", ColumnType::Text),
                    Column::new("text", ColumnType::Text),
                ])
            });
        comments.push_row(vec![context.into(), text.into()])?;
        Ok(())
    }

    /// Record the working copy as this step and persist the session
    pub async fn update_data(&mut self) -> Result<()> {
        self.session.record_step(self.record.clone())?;
        self.session.touch();
        self.store.save(&mut self.session).await
    }

    /// Mark the wizard finished; later transitions on its uuid fail
    pub async fn complete(mut self) -> Result<()> {
        self.session.mark_completed()?;
        self.session.touch();
        self.store.save(&mut self.session).await?;
        log::info!(
            "Workflow '{}' {} completed after steps {:?}",
            self.session.workflow_name,
            self.session.uuid,
            self.session.step_names()
        );
        Ok(())
    }

    /// Remove the most recent step, returning its name and record
    pub async fn pop_last_step(
        store: &dyn WorkflowStore,
        workflow: &str,
        uuid: &Id,
    ) -> Result<Option<(String, StepRecord)>> {
        store.pop_last_step(workflow, uuid).await
    }

    /// Recorded steps in submission order, or None for an unknown uuid
    pub async fn get_traceback(
        store: &dyn WorkflowStore,
        workflow: &str,
        uuid: &Id,
    ) -> Result<Option<Vec<StepRecord>>> {
        Ok(store
            .load(workflow, uuid)
            .await?
            .map(|session| session.history))
    }
}

impl fmt::Debug for MultiStepForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStepForm")
            .field("workflow", &self.session.workflow_name)
            .field("step_name", &self.record.step_name)
            .field("uuid", &self.session.uuid)
            .field("tables", &self.record.tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validation messages of a submitted step form, keyed by field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormErrors(Vec<(String, String)>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push((field.into(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, m)| (f.as_str(), m.as_str()))
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(f, _)| f == field)
            .map(|(_, m)| m.as_str())
    }
}

/// A named step of a wizard
pub trait WorkflowStep: Send + Sync {
    fn step_name(&self) -> &'static str;

    /// Whether the step runs for the state left behind by the previous step
    fn is_applicable(&self, _previous: &MultiStepForm) -> bool {
        true
    }

    /// Arguments used to rebuild this step after its record was popped
    fn fill_previous_form(&self, record: &StepRecord) -> StepArgs {
        record.args.clone()
    }
}

/// Static, ordered registry of the steps of one workflow
pub struct Workflow {
    name: &'static str,
    steps: Vec<Arc<dyn WorkflowStep>>,
}

impl Workflow {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl WorkflowStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, step_name: &str) -> Option<&Arc<dyn WorkflowStep>> {
        self.steps.iter().find(|s| s.step_name() == step_name)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.step_name()).collect()
    }

    /// First step after `step_name` that applies to `form`
    pub fn next_after(&self, step_name: &str, form: &MultiStepForm) -> Option<&Arc<dyn WorkflowStep>> {
        self.steps
            .iter()
            .skip_while(|s| s.step_name() != step_name)
            .skip(1)
            .find(|s| s.is_applicable(form))
    }
}
