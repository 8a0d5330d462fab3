//! Cooldown gate guarding the list API against hammering a backend that is
//! rate limiting, erroring, or rejecting our credentials.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use crossbeam::atomic::AtomicCell;
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorKind};

/// Snapshot of whether fetching is currently allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    /// Credentials are known bad or missing. Never expires on its own;
    /// only a fresh credential capture clears it.
    AuthBlocked,
    /// Timed backoff after a retryable failure class.
    Cooling { until_ms: i64 },
}

impl Gate {
    pub fn is_open(&self) -> bool {
        matches!(self, Gate::Open)
    }
}

/// Per-failure-class backoff durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub rate_limited: Duration,
    pub server_error: Duration,
    pub bad_request: Duration,
    pub network_error: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limited: Duration::from_secs(30 * 60),
            server_error: Duration::from_secs(5 * 60),
            bad_request: Duration::from_secs(60 * 60),
            network_error: Duration::from_secs(2 * 60),
        }
    }
}

impl CooldownPolicy {
    fn duration_for(&self, kind: ErrorKind) -> Option<Duration> {
        match kind {
            ErrorKind::RateLimited => Some(self.rate_limited),
            ErrorKind::ServerError => Some(self.server_error),
            ErrorKind::BadRequest => Some(self.bad_request),
            ErrorKind::NetworkError => Some(self.network_error),
            // Auth is handled as a flag, everything else backs off nothing.
            ErrorKind::Auth | ErrorKind::ParseError | ErrorKind::Unknown => None,
        }
    }
}

/// Lock-free tracker shared by every fetch and scheduling path.
///
/// Two independent conditions gate fetching: a wall-clock cooldown deadline
/// and an auth-required flag. The flag wins when both are set.
pub struct CooldownTracker {
    policy: CooldownPolicy,
    cooldown_until_ms: AtomicI64,
    auth_required: AtomicBool,
    last_trigger: AtomicCell<Option<ErrorKind>>,
}

impl CooldownTracker {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            cooldown_until_ms: AtomicI64::new(0),
            auth_required: AtomicBool::new(false),
            last_trigger: AtomicCell::new(None),
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate_at(Utc::now().timestamp_millis())
    }

    pub fn gate_at(&self, now_ms: i64) -> Gate {
        if self.auth_required.load(Ordering::Acquire) {
            return Gate::AuthBlocked;
        }
        let until_ms = self.cooldown_until_ms.load(Ordering::Acquire);
        if now_ms < until_ms {
            return Gate::Cooling { until_ms };
        }
        Gate::Open
    }

    /// Apply the backoff the error's class demands. Parse and unknown
    /// failures deliberately leave the gate untouched.
    pub fn apply_error(&self, error: &ApiError) {
        self.apply_error_at(error, Utc::now().timestamp_millis());
    }

    pub fn apply_error_at(&self, error: &ApiError, now_ms: i64) {
        if error.kind.is_auth() {
            self.auth_required.store(true, Ordering::Release);
            self.last_trigger.store(Some(ErrorKind::Auth));
            warn!(status = error.status, "auth rejected, fetching blocked until new credentials arrive");
            return;
        }
        if let Some(duration) = self.policy.duration_for(error.kind) {
            let until_ms = now_ms + duration.as_millis() as i64;
            self.cooldown_until_ms.store(until_ms, Ordering::Release);
            self.last_trigger.store(Some(error.kind));
            warn!(
                kind = error.kind.as_str(),
                status = error.status,
                cooldown_secs = duration.as_secs(),
                "entering cooldown"
            );
        }
    }

    /// Session credential disappeared. Blocks fetching without touching any
    /// running cooldown deadline.
    pub fn block_auth(&self) {
        self.auth_required.store(true, Ordering::Release);
        self.last_trigger.store(Some(ErrorKind::Auth));
    }

    /// Fresh credentials were captured: both the auth flag and any pending
    /// cooldown are wiped so the next refresh can run immediately.
    pub fn credentials_refreshed(&self) {
        self.auth_required.store(false, Ordering::Release);
        self.cooldown_until_ms.store(0, Ordering::Release);
        self.last_trigger.store(None);
        debug!("cooldown cleared after credential capture");
    }

    pub fn is_auth_blocked(&self) -> bool {
        self.auth_required.load(Ordering::Acquire)
    }

    pub fn remaining_at(&self, now_ms: i64) -> Option<Duration> {
        let until_ms = self.cooldown_until_ms.load(Ordering::Acquire);
        if now_ms < until_ms {
            Some(Duration::from_millis((until_ms - now_ms) as u64))
        } else {
            None
        }
    }

    /// The error class that produced the current gate state, for logs.
    pub fn last_trigger(&self) -> Option<ErrorKind> {
        self.last_trigger.load()
    }
}
