//! Wires capture events and control commands into the sync subsystems.
//!
//! The coordinator owns one of everything: credentials, query-config
//! cache, cooldown tracker, import flow, and the refresh orchestrator.
//! Capture events mutate state and may schedule a refresh; commands are
//! request/response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::capture::CaptureEvent;
use crate::commands::{Command, CommandResponse};
use crate::config::FilterConfig;
use crate::cooldown::CooldownTracker;
use crate::credentials::CredentialStore;
use crate::fetcher::ListFetcher;
use crate::handles::{normalize_handle, HandleSet, ListAction, ListKind};
use crate::import::{ImportFlow, TabController};
use crate::orchestrator::{RefreshOrchestrator, RefreshReason, AUTH_REQUIRED_MESSAGE};
use crate::query_config::QueryConfigCache;
use crate::storage::{Storage, StorageError};

pub struct Coordinator {
    storage: Arc<Storage>,
    credentials: Arc<CredentialStore>,
    query_cache: Arc<QueryConfigCache>,
    cooldown: Arc<CooldownTracker>,
    orchestrator: Arc<RefreshOrchestrator>,
    import: Arc<ImportFlow>,
    hidden_count: AtomicU64,
}

impl Coordinator {
    pub fn new(
        config: Arc<FilterConfig>,
        storage: Arc<Storage>,
        tabs: Arc<dyn TabController>,
    ) -> anyhow::Result<Arc<Self>> {
        let credentials = Arc::new(CredentialStore::new());
        let cooldown = Arc::new(CooldownTracker::new(config.cooldown_policy()));
        let query_cache = Arc::new(QueryConfigCache::new());
        let import = Arc::new(ImportFlow::new(tabs));
        let fetcher = ListFetcher::new(
            Arc::clone(&config),
            Arc::clone(&credentials),
            Arc::clone(&cooldown),
        )?;
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            config,
            Arc::clone(&storage),
            fetcher,
            Arc::clone(&cooldown),
            Arc::clone(&query_cache),
            Arc::clone(&import),
        ));
        Ok(Arc::new(Self {
            storage,
            credentials,
            query_cache,
            cooldown,
            orchestrator,
            import,
            hidden_count: AtomicU64::new(0),
        }))
    }

    /// Restore persisted state. `initial_refresh` is for a first install,
    /// which refreshes immediately; an ordinary startup only reloads.
    pub async fn startup(&self, initial_refresh: bool) -> Result<(), StorageError> {
        self.query_cache.load(self.storage.query_config()?);
        self.credentials.load(&self.storage)?;
        if initial_refresh {
            let summary = self.orchestrator.refresh().await;
            debug!(ok = summary.ok, "startup refresh finished");
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> &Arc<RefreshOrchestrator> {
        &self.orchestrator
    }

    /// Most recent hidden-entry count reported by the filtering layer.
    pub fn hidden_count(&self) -> u64 {
        self.hidden_count.load(Ordering::Acquire)
    }

    /// Drive capture events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<CaptureEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("capture event channel closed");
    }

    pub async fn handle_event(&self, event: CaptureEvent) {
        match event {
            CaptureEvent::BearerCaptured(token) => {
                match self.credentials.capture_bearer(&token, &self.storage) {
                    Ok(true) => {
                        self.cooldown.credentials_refreshed();
                        self.orchestrator.schedule_refresh(RefreshReason::AuthBearer);
                    }
                    Ok(false) => {}
                    Err(error) => warn!(%error, "failed to persist captured bearer"),
                }
            }
            CaptureEvent::QueryConfigObserved { kind, config } => {
                let id = config.id.clone();
                if self.query_cache.store(kind, config) {
                    if let Err(error) = self.storage.set_query_config(&self.query_cache.snapshot())
                    {
                        warn!(%error, "failed to persist query config");
                    }
                    debug!(list = kind.as_str(), %id, "query config captured");
                    self.orchestrator
                        .schedule_refresh(RefreshReason::QueryConfig);
                }
            }
            CaptureEvent::ListMutation {
                kind,
                action,
                handle,
            } => match self.update_list(kind, action, &handle) {
                Ok(updated) => {
                    debug!(
                        list = kind.as_str(),
                        action = action.as_str(),
                        updated,
                        "list mutation observed"
                    );
                }
                Err(error) => warn!(%error, "failed to apply list mutation"),
            },
            CaptureEvent::TimelineFetched { name } => {
                debug!(name, "timeline fetch observed");
            }
            CaptureEvent::SessionCookieChanged { removed: true, .. } => {
                // Session ended. Block fetching until a new cookie shows up;
                // a running cooldown deadline is left as it was.
                self.cooldown.block_auth();
                self.credentials.set_csrf(None);
                if let Err(error) = self.storage.set_last_error(Some(AUTH_REQUIRED_MESSAGE)) {
                    warn!(%error, "failed to persist auth notice");
                }
            }
            CaptureEvent::SessionCookieChanged {
                removed: false,
                value,
            } => {
                self.credentials.set_csrf(value.as_deref());
                self.cooldown.credentials_refreshed();
                self.orchestrator
                    .schedule_refresh(RefreshReason::CsrfCookieChanged);
            }
        }
    }

    pub async fn handle_command(&self, command: Command) -> CommandResponse {
        match command {
            Command::RefreshLists => CommandResponse::Refresh(self.orchestrator.refresh().await),
            Command::HiddenUpdate { count } => {
                self.hidden_count.store(count, Ordering::Release);
                CommandResponse::ack()
            }
            Command::StartImport => {
                self.import.arm_notification();
                self.import.open_import_tabs().await;
                self.orchestrator
                    .schedule_refresh(RefreshReason::ManualImport);
                CommandResponse::ack()
            }
            Command::OpenImportTabs => {
                self.import.open_import_tabs().await;
                CommandResponse::ack()
            }
            Command::UpdateListFromAction {
                list,
                action,
                handle,
            } => match self.update_list(list, action, &handle) {
                Ok(updated) => CommandResponse::updated(updated),
                Err(error) => {
                    warn!(%error, "failed to apply list mutation");
                    CommandResponse::Updated {
                        ok: false,
                        updated: false,
                    }
                }
            },
        }
    }

    /// Apply one add/remove to the persisted list. Returns true when the
    /// stored list actually changed.
    fn update_list(
        &self,
        kind: ListKind,
        action: ListAction,
        handle: &str,
    ) -> Result<bool, StorageError> {
        if normalize_handle(handle).is_empty() {
            return Ok(false);
        }
        let stored = self.storage.list(kind)?;
        let mut set = HandleSet::from_stored(&stored);
        let changed = match action {
            ListAction::Add => set.insert(handle),
            ListAction::Remove => set.remove(handle),
        };
        if changed {
            self.storage.set_list(kind, &set.to_vec())?;
        }
        Ok(changed)
    }
}
