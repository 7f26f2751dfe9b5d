use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::api::error::{ErrorKind, ServerError};
use crate::api::log_buffer::LogBuffer;
use crate::api::params::ParamValue;
use crate::api::request::RequestData;
use crate::api::state::{DispatchSettings, SharedState};
use crate::model::{ApiToken, Flash, FlashCategory, User};
use crate::store::{UnitOfWork, WorkflowStore};

/// Flash messages raised while handling one request
#[derive(Debug, Clone, Default)]
pub struct FlashQueue(Arc<Mutex<Vec<Flash>>>);

impl FlashQueue {
    pub fn push(&self, flash: Flash) {
        self.0.lock().push(flash);
    }

    pub fn extend(&self, flashes: Vec<Flash>) {
        self.0.lock().extend(flashes);
    }

    pub fn drain(&self) -> Vec<Flash> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub type CommitHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// Work deferred until the request's unit-of-work has committed
#[derive(Clone, Default)]
pub struct CommitHooks(Arc<Mutex<Vec<CommitHook>>>);

impl CommitHooks {
    pub fn push(&self, hook: CommitHook) {
        self.0.lock().push(hook);
    }

    pub fn drain(&self) -> Vec<CommitHook> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Request-scoped handle passed to every dispatched handler
#[derive(Clone)]
pub struct RequestContext {
    pub(crate) state: SharedState,
    pub(crate) route: Arc<str>,
    pub(crate) uow: Option<Arc<dyn UnitOfWork>>,
    pub(crate) user: Option<User>,
    pub(crate) request: Arc<RequestData>,
    pub(crate) leftovers: Arc<BTreeMap<String, Value>>,
    pub(crate) api_token: Option<ApiToken>,
    pub(crate) flashes: FlashQueue,
    pub(crate) after_commit: CommitHooks,
    pub(crate) log: Arc<LogBuffer>,
}

impl RequestContext {
    pub(crate) fn new(
        state: SharedState,
        route: Arc<str>,
        request: Arc<RequestData>,
        log: Arc<LogBuffer>,
    ) -> Self {
        Self {
            state,
            route,
            uow: None,
            user: None,
            request,
            leftovers: Arc::new(BTreeMap::new()),
            api_token: None,
            flashes: FlashQueue::default(),
            after_commit: CommitHooks::default(),
            log,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.state.settings
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// The request's unit-of-work
    pub fn db(&self) -> Result<&Arc<dyn UnitOfWork>, ServerError> {
        self.uow.as_ref().ok_or_else(|| {
            ServerError::InternalServerError(format!(
                "route '{}' is not registered with a database",
                self.route
            ))
        })
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.state.workflows
    }

    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn require_user(&self) -> Result<&User, ServerError> {
        self.user
            .as_ref()
            .ok_or_else(|| ServerError::new(ErrorKind::Unauthorized))
    }

    /// The caller, provided they are facility staff
    pub fn require_insider(&self) -> Result<&User, ServerError> {
        let user = self.require_user()?;
        if !user.is_insider() {
            return Err(ServerError::no_permissions());
        }
        Ok(user)
    }

    pub fn request(&self) -> &RequestData {
        &self.request
    }

    /// Request fields that no declared parameter consumed
    pub fn leftovers(&self) -> &BTreeMap<String, Value> {
        &self.leftovers
    }

    pub fn leftover(&self, name: &str) -> Option<&Value> {
        self.leftovers.get(name)
    }

    /// Token validated for this request (json-api routes only)
    pub fn api_token(&self) -> Option<&ApiToken> {
        self.api_token.as_ref()
    }

    pub fn flash(&self, message: impl Into<String>, category: FlashCategory) {
        self.flashes.push(Flash::new(message, category));
    }

    pub fn flashes(&self) -> &FlashQueue {
        &self.flashes
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Run `hook` after the request succeeded and its writes were committed.
    /// Hooks are dropped when the request fails or the commit does.
    pub fn after_commit<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.after_commit.push(Box::new(move || Box::pin(hook())));
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("route", &self.route)
            .field("user", &self.user.as_ref().map(|u| u.id))
            .field("path", &self.request.path)
            .field("has_db", &self.uow.is_some())
            .finish()
    }
}

/// Coerced handler arguments keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs(BTreeMap<String, ParamValue>);

impl CallArgs {
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, ParamValue> {
        &self.0
    }

    fn expect(&self, name: &str) -> Result<&ParamValue, ServerError> {
        self.0.get(name).ok_or_else(|| {
            ServerError::InternalServerError(format!("argument '{}' is not declared", name))
        })
    }

    fn mismatch(name: &str, expected: &str) -> ServerError {
        ServerError::InternalServerError(format!("argument '{}' is not {}", name, expected))
    }

    pub fn int(&self, name: &str) -> Result<i64, ServerError> {
        match self.expect(name)? {
            ParamValue::Int(v) => Ok(*v),
            _ => Err(Self::mismatch(name, "an integer")),
        }
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>, ServerError> {
        match self.expect(name)? {
            ParamValue::None => Ok(None),
            ParamValue::Int(v) => Ok(Some(*v)),
            _ => Err(Self::mismatch(name, "an optional integer")),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, ServerError> {
        match self.expect(name)? {
            ParamValue::Str(v) => Ok(v.as_str()),
            _ => Err(Self::mismatch(name, "a string")),
        }
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>, ServerError> {
        match self.expect(name)? {
            ParamValue::None => Ok(None),
            ParamValue::Str(v) => Ok(Some(v.as_str())),
            _ => Err(Self::mismatch(name, "an optional string")),
        }
    }

    pub fn path(&self, name: &str) -> Result<&Path, ServerError> {
        match self.expect(name)? {
            ParamValue::Path(v) => Ok(v.as_path()),
            _ => Err(Self::mismatch(name, "a path")),
        }
    }

    pub fn dict(&self, name: &str) -> Result<Option<&serde_json::Map<String, Value>>, ServerError> {
        match self.expect(name)? {
            ParamValue::None => Ok(None),
            ParamValue::Dict(v) => Ok(Some(v)),
            _ => Err(Self::mismatch(name, "a JSON object")),
        }
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{}}}", rendered)
    }
}
