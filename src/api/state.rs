use anyhow::Result;
use std::sync::Arc;

use crate::api::cache::{FlashCache, RouteCache};
use crate::api::rate_limit::{RateLimit, RateLimiter};
use crate::config::AppConfig;
use crate::store::{Database, WorkflowStore};

/// Dispatcher-wide switches
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Disables caching and rate limiting, shows error details
    pub debug: bool,
    /// Limits applied to every non-exempt route unless overridden
    pub default_limits: Vec<RateLimit>,
    pub login_url: String,
    pub cache_max_entries: usize,
    /// Idle time after which an unfinished workflow session is purged
    pub session_ttl: chrono::Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            debug: false,
            default_limits: Vec::new(),
            login_url: "/auth/login".to_string(),
            cache_max_entries: 1024,
            session_ttl: chrono::Duration::hours(24),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let default_limits = match &config.dispatch.default_limit {
            Some(expr) => RateLimit::parse_many(expr).map_err(anyhow::Error::msg)?,
            None => Vec::new(),
        };
        Ok(Self {
            debug: config.is_debug(),
            default_limits,
            login_url: config.dispatch.login_url.clone(),
            cache_max_entries: config.dispatch.cache_max_entries,
            session_ttl: chrono::Duration::seconds(config.workflow.session_ttl_seconds as i64),
        })
    }
}

/// Process-wide state shared by every request
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub route_cache: RouteCache,
    pub flash_cache: FlashCache,
    pub limiter: RateLimiter,
    pub settings: DispatchSettings,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        db: Arc<dyn Database>,
        workflows: Arc<dyn WorkflowStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            db,
            workflows,
            route_cache: RouteCache::new(settings.cache_max_entries),
            flash_cache: FlashCache::new(),
            limiter: RateLimiter::new(),
            settings,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
