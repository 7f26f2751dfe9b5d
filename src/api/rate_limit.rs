use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::model::User;

/// `amount` hits per `per`, e.g. `3/second` or `100 per day`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    pub amount: u32,
    pub per: Duration,
}

impl RateLimit {
    /// Parse one or more `;`-separated limit expressions
    pub fn parse_many(expr: &str) -> Result<Vec<RateLimit>, String> {
        expr.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (amount, unit) = match s.split_once('/') {
            Some(parts) => parts,
            None => s
                .split_once(" per ")
                .ok_or_else(|| format!("invalid rate limit '{}'", s))?,
        };
        let amount = amount
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid amount in rate limit '{}'", s))?;
        let seconds = match unit.trim().trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 60 * 60,
            "day" => 24 * 60 * 60,
            other => return Err(format!("unknown rate limit unit '{}'", other)),
        };
        Ok(RateLimit {
            amount,
            per: Duration::from_secs(seconds),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.per.as_secs() {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            _ => "day",
        };
        write!(f, "{}/{}", self.amount, unit)
    }
}

/// Callers excluded from a route's limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExempt {
    All,
    Insider,
    User,
    Never,
}

impl LimitExempt {
    pub fn is_exempt(&self, user: Option<&User>) -> bool {
        match self {
            LimitExempt::All => true,
            LimitExempt::Insider => user.map(User::is_insider).unwrap_or(false),
            LimitExempt::User => user.is_some(),
            LimitExempt::Never => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window hit counters shared by all requests
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, RateLimit), Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one hit for `key`; false when any of `limits` is exhausted
    pub fn hit(&self, key: &str, limits: &[RateLimit]) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        for limit in limits {
            let window = windows
                .entry((key.to_string(), *limit))
                .or_insert(Window { started: now, count: 0 });
            if now.duration_since(window.started) >= limit.per {
                *window = Window { started: now, count: 0 };
            }
            if window.count >= limit.amount {
                return false;
            }
        }

        for limit in limits {
            if let Some(window) = windows.get_mut(&(key.to_string(), *limit)) {
                window.count += 1;
            }
        }
        true
    }

    /// Forget every counter of `key`
    pub fn reset(&self, key: &str) {
        self.windows.lock().retain(|(k, _), _| k != key);
    }

    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .retain(|(_, limit), window| now.duration_since(window.started) < limit.per);
    }
}
