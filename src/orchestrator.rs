//! Refresh orchestration: the in-flight lock, the gate checks, the
//! debounced scheduler, and the cycle that fetches both lists and
//! persists one coherent outcome.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commands::RefreshSummary;
use crate::config::FilterConfig;
use crate::cooldown::{CooldownTracker, Gate};
use crate::error::ApiError;
use crate::fetcher::{FetchOutcome, ListFetcher, SkipReason};
use crate::handles::ListKind;
use crate::import::{build_import_status, ImportFlow};
use crate::query_config::QueryConfigCache;
use crate::storage::{RefreshPayload, Storage, StorageError};

/// Shown whenever fetching is impossible without a fresh login.
pub const AUTH_REQUIRED_MESSAGE: &str = "Xにログインしてください。ログイン後に再取得します。";

const MISSING_BOTH_MESSAGE: &str = "ミュート/ブロック一覧に移動してAPI情報を取得してください。";
const MISSING_MUTED_MESSAGE: &str = "ミュート一覧に移動してAPI情報を取得してください。";
const MISSING_BLOCKED_MESSAGE: &str = "ブロック一覧に移動してAPI情報を取得してください。";
const PAUSED_AUTH_MESSAGE: &str = "認証情報が不足しているため、一時停止しています。取得後に再開します。";
const PAUSED_COOLDOWN_MESSAGE: &str = "API制限のため、一時停止しています。しばらく待ってから再開します。";

/// What prompted a scheduled refresh. Logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    AuthBearer,
    CsrfCookieChanged,
    ManualImport,
    QueryConfig,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::AuthBearer => "auth_bearer",
            RefreshReason::CsrfCookieChanged => "ct0_changed",
            RefreshReason::ManualImport => "manual_import",
            RefreshReason::QueryConfig => "query_config",
        }
    }
}

/// User-facing message for a cycle that completed with skips. Missing
/// query configs outrank credential pauses, which outrank cooldown
/// pauses; a muted gap outranks a blocked one.
fn skip_error_message(muted: &FetchOutcome, blocked: &FetchOutcome) -> Option<&'static str> {
    let muted = muted.skip_reason();
    let blocked = blocked.skip_reason();
    if muted == Some(SkipReason::MissingQuery) && blocked == Some(SkipReason::MissingQuery) {
        return Some(MISSING_BOTH_MESSAGE);
    }
    if muted == Some(SkipReason::MissingQuery) {
        return Some(MISSING_MUTED_MESSAGE);
    }
    if blocked == Some(SkipReason::MissingQuery) {
        return Some(MISSING_BLOCKED_MESSAGE);
    }
    if muted == Some(SkipReason::AuthRequired) || blocked == Some(SkipReason::AuthRequired) {
        return Some(PAUSED_AUTH_MESSAGE);
    }
    if muted == Some(SkipReason::Cooldown) || blocked == Some(SkipReason::Cooldown) {
        return Some(PAUSED_COOLDOWN_MESSAGE);
    }
    None
}

#[derive(Debug, Error)]
enum RefreshCycleError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct RefreshOrchestrator {
    config: Arc<FilterConfig>,
    storage: Arc<Storage>,
    fetcher: ListFetcher,
    cooldown: Arc<CooldownTracker>,
    query_cache: Arc<QueryConfigCache>,
    import: Arc<ImportFlow>,
    in_flight: AtomicBool,
    debounce_generation: AtomicU64,
}

impl RefreshOrchestrator {
    pub fn new(
        config: Arc<FilterConfig>,
        storage: Arc<Storage>,
        fetcher: ListFetcher,
        cooldown: Arc<CooldownTracker>,
        query_cache: Arc<QueryConfigCache>,
        import: Arc<ImportFlow>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            cooldown,
            query_cache,
            import,
            in_flight: AtomicBool::new(false),
            debounce_generation: AtomicU64::new(0),
        }
    }

    /// Run one refresh now. At most one cycle runs at a time; a second
    /// caller gets an `in_flight` denial instead of queueing.
    pub async fn refresh(&self) -> RefreshSummary {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in flight");
            return RefreshSummary::denied("in_flight");
        }
        // Release the lock on every exit path.
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.store(false, Ordering::Release);
        });

        match self.cooldown.gate() {
            Gate::AuthBlocked => {
                warn!("auth required, refresh skipped");
                if let Err(error) = self.storage.set_last_error(Some(AUTH_REQUIRED_MESSAGE)) {
                    warn!(%error, "failed to persist auth notice");
                }
                return RefreshSummary::denied("auth_required");
            }
            Gate::Cooling { until_ms } => {
                warn!(until_ms, "cooldown active, refresh skipped");
                return RefreshSummary::denied("cooldown");
            }
            Gate::Open => {}
        }

        match self.run_cycle().await {
            Ok(()) => RefreshSummary::success(),
            Err(error) => {
                if let RefreshCycleError::Api(api) = &error {
                    self.cooldown.apply_error(api);
                }
                let message = match &error {
                    RefreshCycleError::Api(api) if api.is_auth() => {
                        AUTH_REQUIRED_MESSAGE.to_string()
                    }
                    other => other.to_string(),
                };
                if let Err(persist_error) = self.storage.set_last_error(Some(&message)) {
                    warn!(%persist_error, "failed to persist refresh error");
                }
                warn!(error = %message, "refresh failed");
                RefreshSummary::denied(message)
            }
        }
    }

    async fn run_cycle(&self) -> Result<(), RefreshCycleError> {
        let cycle_id = Uuid::new_v4();
        let snapshot = self.query_cache.snapshot();
        let existing_muted = self.storage.muted()?;
        let existing_blocked = self.storage.blocked()?;

        let (muted_result, blocked_result) = futures::future::join(
            self.fetcher.fetch_all(ListKind::Muted, snapshot.muted.as_ref()),
            self.fetcher.fetch_all(ListKind::Blocked, snapshot.blocked.as_ref()),
        )
        .await;
        let muted_outcome = muted_result?;
        let blocked_outcome = blocked_result?;

        let error = skip_error_message(&muted_outcome, &blocked_outcome);
        let clean = !muted_outcome.is_skipped() && !blocked_outcome.is_skipped();

        // A skipped fetch keeps whatever was persisted before.
        let muted = match muted_outcome {
            FetchOutcome::Complete(handles) => handles.to_vec(),
            FetchOutcome::Skipped(reason) => {
                debug!(%cycle_id, reason = reason.as_str(), "muted fetch skipped, keeping stored list");
                existing_muted
            }
        };
        let blocked = match blocked_outcome {
            FetchOutcome::Complete(handles) => handles.to_vec(),
            FetchOutcome::Skipped(reason) => {
                debug!(%cycle_id, reason = reason.as_str(), "blocked fetch skipped, keeping stored list");
                existing_blocked
            }
        };

        let payload = RefreshPayload {
            muted,
            blocked,
            last_error: error.map(str::to_string),
        };
        self.storage.persist_refresh(&payload)?;
        info!(
            %cycle_id,
            muted = payload.muted.len(),
            blocked = payload.blocked.len(),
            last_error = ?payload.last_error,
            "lists refreshed"
        );

        if self.import.notification_armed() && payload.last_error.is_none() && clean {
            let status =
                build_import_status(payload.muted.len(), payload.blocked.len(), Local::now());
            if self.storage.popup_open()? {
                self.storage.set_import_status(Some(&status))?;
            }
            self.import.close_import_tabs().await;
            self.import.disarm_notification();
        }
        Ok(())
    }

    /// Debounced refresh trigger. Bursts of capture events collapse into
    /// one cycle; a newer schedule replaces a pending one.
    pub fn schedule_refresh(self: &Arc<Self>, reason: RefreshReason) {
        match self.cooldown.gate() {
            Gate::AuthBlocked => {
                debug!(reason = reason.as_str(), "not scheduling, auth required");
                return;
            }
            Gate::Cooling { until_ms } => {
                debug!(
                    reason = reason.as_str(),
                    until_ms, "not scheduling, cooldown active"
                );
                return;
            }
            Gate::Open => {}
        }

        let generation = self.debounce_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = self.config.refresh_debounce();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer schedule superseded this one.
            if orchestrator.debounce_generation.load(Ordering::Acquire) != generation {
                return;
            }
            debug!(reason = reason.as_str(), "scheduled refresh firing");
            orchestrator.refresh().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::Map;

    use crate::cooldown::CooldownTracker;
    use crate::credentials::CredentialStore;
    use crate::error::ErrorKind;
    use crate::handles::HandleSet;
    use crate::import::NullTabs;
    use crate::query_config::QueryConfig;

    struct Harness {
        orchestrator: Arc<RefreshOrchestrator>,
        storage: Arc<Storage>,
        cooldown: Arc<CooldownTracker>,
        query_cache: Arc<QueryConfigCache>,
    }

    fn harness() -> Harness {
        let config = Arc::new(FilterConfig::default());
        let storage = Arc::new(Storage::temporary().unwrap());
        let credentials = Arc::new(CredentialStore::new());
        let cooldown = Arc::new(CooldownTracker::new(config.cooldown_policy()));
        let query_cache = Arc::new(QueryConfigCache::new());
        let import = Arc::new(ImportFlow::new(Arc::new(NullTabs)));
        let fetcher =
            ListFetcher::new(Arc::clone(&config), credentials, Arc::clone(&cooldown)).unwrap();
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            config,
            Arc::clone(&storage),
            fetcher,
            Arc::clone(&cooldown),
            Arc::clone(&query_cache),
            import,
        ));
        Harness {
            orchestrator,
            storage,
            cooldown,
            query_cache,
        }
    }

    #[tokio::test]
    async fn test_refresh_denied_while_in_flight() {
        let h = harness();
        h.orchestrator.in_flight.store(true, Ordering::Release);

        let summary = h.orchestrator.refresh().await;
        assert_eq!(summary, RefreshSummary::denied("in_flight"));
        assert_eq!(h.storage.last_error().unwrap(), None);
    }

    #[tokio::test]
    async fn test_auth_gate_persists_login_notice() {
        let h = harness();
        h.cooldown.block_auth();

        let summary = h.orchestrator.refresh().await;
        assert_eq!(summary, RefreshSummary::denied("auth_required"));
        assert_eq!(
            h.storage.last_error().unwrap(),
            Some(AUTH_REQUIRED_MESSAGE.to_string())
        );
        assert!(h.storage.updated_at().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cooldown_gate_is_silent() {
        let h = harness();
        h.cooldown
            .apply_error(&ApiError::new(ErrorKind::RateLimited, 429, "x"));

        let summary = h.orchestrator.refresh().await;
        assert_eq!(summary, RefreshSummary::denied("cooldown"));
        // Unlike the auth gate, nothing is persisted.
        assert_eq!(h.storage.last_error().unwrap(), None);
        assert_eq!(h.storage.updated_at().unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_query_configs_keep_lists_and_explain() {
        let h = harness();
        h.storage
            .set_list(ListKind::Muted, &["alice".into()])
            .unwrap();

        let summary = h.orchestrator.refresh().await;
        assert!(summary.ok);
        assert_eq!(h.storage.muted().unwrap(), vec!["alice"]);
        assert!(h.storage.blocked().unwrap().is_empty());
        assert_eq!(
            h.storage.last_error().unwrap(),
            Some(MISSING_BOTH_MESSAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_in_flight_released_after_cycle() {
        let h = harness();
        assert!(h.orchestrator.refresh().await.ok);
        assert!(h.orchestrator.refresh().await.ok);
    }

    #[tokio::test]
    async fn test_auth_failure_blocks_and_persists_notice() {
        let h = harness();
        h.query_cache
            .store(ListKind::Muted, QueryConfig::new("qid", Map::new()));

        // No ct0 captured: the cycle dies with an auth error before any
        // request goes out.
        let summary = h.orchestrator.refresh().await;
        assert_eq!(summary, RefreshSummary::denied(AUTH_REQUIRED_MESSAGE));
        assert_eq!(
            h.storage.last_error().unwrap(),
            Some(AUTH_REQUIRED_MESSAGE.to_string())
        );
        assert!(h.cooldown.is_auth_blocked());
    }

    #[tokio::test]
    async fn test_import_completion_requires_clean_cycle() {
        let h = harness();
        h.orchestrator.import.arm_notification();

        let summary = h.orchestrator.refresh().await;
        assert!(summary.ok);
        // Both fetches skipped, so the notification stays armed.
        assert!(h.orchestrator.import.notification_armed());
        assert_eq!(h.storage.import_status().unwrap(), None);
    }

    #[test]
    fn test_skip_message_ladder() {
        use FetchOutcome::{Complete, Skipped};
        let complete = || Complete(HandleSet::new());

        assert_eq!(
            skip_error_message(
                &Skipped(SkipReason::MissingQuery),
                &Skipped(SkipReason::MissingQuery)
            ),
            Some(MISSING_BOTH_MESSAGE)
        );
        assert_eq!(
            skip_error_message(&Skipped(SkipReason::MissingQuery), &complete()),
            Some(MISSING_MUTED_MESSAGE)
        );
        assert_eq!(
            skip_error_message(&complete(), &Skipped(SkipReason::MissingQuery)),
            Some(MISSING_BLOCKED_MESSAGE)
        );
        assert_eq!(
            skip_error_message(&Skipped(SkipReason::AuthRequired), &complete()),
            Some(PAUSED_AUTH_MESSAGE)
        );
        assert_eq!(
            skip_error_message(&complete(), &Skipped(SkipReason::Cooldown)),
            Some(PAUSED_COOLDOWN_MESSAGE)
        );
        // One side missing its query outranks the other side's pause.
        assert_eq!(
            skip_error_message(
                &Skipped(SkipReason::MissingQuery),
                &Skipped(SkipReason::AuthRequired)
            ),
            Some(MISSING_MUTED_MESSAGE)
        );
        assert_eq!(skip_error_message(&complete(), &complete()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_collapses_bursts() {
        let h = harness();
        let mut rx = h.storage.subscribe();

        h.orchestrator.schedule_refresh(RefreshReason::AuthBearer);
        h.orchestrator.schedule_refresh(RefreshReason::QueryConfig);
        h.orchestrator.schedule_refresh(RefreshReason::ManualImport);

        tokio::time::sleep(h.orchestrator.config.refresh_debounce() * 4).await;

        let mut refreshes = 0;
        while let Ok(change) = rx.try_recv() {
            if change.touches_lists() {
                refreshes += 1;
            }
        }
        assert_eq!(refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_suppressed_by_gates() {
        let h = harness();
        let mut rx = h.storage.subscribe();
        h.cooldown.block_auth();

        h.orchestrator
            .schedule_refresh(RefreshReason::CsrfCookieChanged);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
    }
}
