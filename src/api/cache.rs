use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::request::RequestData;
use crate::model::{Flash, User};

/// How response cache keys are partitioned between callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// One entry per caller
    User,
    /// All insiders share one entry; everybody else is keyed per caller
    Insider,
    /// One entry for everybody
    Global,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::User => "user",
            CacheType::Insider => "insider",
            CacheType::Global => "global",
        }
    }

    pub fn key(&self, request: &RequestData, user: Option<&User>, include_query: bool) -> String {
        let prefix = request.header("x-forwarded-prefix").unwrap_or("/");
        let query = if include_query {
            request.sorted_query_string()
        } else {
            String::new()
        };

        let scope = match self {
            CacheType::User => user_scope(user),
            CacheType::Insider => match user {
                Some(u) if u.is_insider() => "insider".to_string(),
                _ => user_scope(user),
            },
            CacheType::Global => String::new(),
        };

        format!(
            "{}view/{}{}:{}{}",
            prefix, scope, request.method, request.path, query
        )
    }
}

fn user_scope(user: Option<&User>) -> String {
    user.map(|u| u.id.to_string())
        .unwrap_or_else(|| "anon".to_string())
}

/// A fully buffered response that can be replayed
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Buffer `response`; the buffered copy replaces the original
    pub async fn capture(response: Response) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

#[derive(Debug)]
struct CacheEntry {
    response: Arc<CachedResponse>,
    sequence: u64,
    expires_at: Instant,
}

/// Process-wide response cache with per-entry timeouts
#[derive(Debug)]
pub struct RouteCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    sequence: AtomicU64,
}

impl RouteCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, response: CachedResponse, timeout: Duration) -> Arc<CachedResponse> {
        let now = Instant::now();
        let response = Arc::new(response);
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.sequence)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                expires_at: now + timeout,
            },
        );
        response
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Flash messages waiting for the next request of a browser session
#[derive(Debug, Default)]
pub struct FlashCache {
    pending: Mutex<HashMap<String, Vec<Flash>>>,
}

impl FlashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session_id: &str, messages: Vec<Flash>) {
        if messages.is_empty() {
            return;
        }
        self.pending
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .extend(messages);
    }

    pub fn take(&self, session_id: &str) -> Vec<Flash> {
        self.pending.lock().remove(session_id).unwrap_or_default()
    }
}
