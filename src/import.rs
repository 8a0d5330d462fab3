//! Import flow: open the settings pages so the UI itself issues the list
//! requests we capture, then close those tabs once a clean refresh lands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::debug;

pub type TabId = u64;

pub const MUTED_SETTINGS_URL: &str = "https://x.com/settings/muted/all";
pub const BLOCKED_SETTINGS_URL: &str = "https://x.com/settings/blocked/all";

/// Host-side tab control. The flow only ever opens the two settings pages
/// and closes tabs it opened itself.
#[async_trait]
pub trait TabController: Send + Sync {
    /// Open a background tab. `None` when the host refused.
    async fn open_tab(&self, url: &str) -> Option<TabId>;

    /// Current URL of a tab. `None` when it no longer exists.
    async fn tab_url(&self, id: TabId) -> Option<String>;

    async fn close_tabs(&self, ids: &[TabId]);
}

/// Controller for embeddings without tab access; imports become manual.
pub struct NullTabs;

#[async_trait]
impl TabController for NullTabs {
    async fn open_tab(&self, _url: &str) -> Option<TabId> {
        None
    }

    async fn tab_url(&self, _id: TabId) -> Option<String> {
        None
    }

    async fn close_tabs(&self, _ids: &[TabId]) {}
}

pub struct ImportFlow {
    tabs: Arc<dyn TabController>,
    open_tabs: Mutex<Vec<TabId>>,
    notify_on_next_refresh: AtomicBool,
}

impl ImportFlow {
    pub fn new(tabs: Arc<dyn TabController>) -> Self {
        Self {
            tabs,
            open_tabs: Mutex::new(Vec::new()),
            notify_on_next_refresh: AtomicBool::new(false),
        }
    }

    /// The next clean refresh should surface a completion status and close
    /// the import tabs.
    pub fn arm_notification(&self) {
        self.notify_on_next_refresh.store(true, Ordering::Release);
    }

    pub fn disarm_notification(&self) {
        self.notify_on_next_refresh.store(false, Ordering::Release);
    }

    pub fn notification_armed(&self) -> bool {
        self.notify_on_next_refresh.load(Ordering::Acquire)
    }

    pub async fn open_import_tabs(&self) {
        let mut created = Vec::new();
        for url in [MUTED_SETTINGS_URL, BLOCKED_SETTINGS_URL] {
            if let Some(id) = self.tabs.open_tab(url).await {
                created.push(id);
            }
        }
        // If nothing opened, keep tracking whatever we opened before.
        if !created.is_empty() {
            *self.open_tabs.lock().await = created;
        }
        debug!("opened import tabs");
    }

    /// Close tracked import tabs, but only those still sitting on a
    /// settings page. Anything the user navigated elsewhere stays open.
    pub async fn close_import_tabs(&self) {
        let ids: Vec<TabId> = std::mem::take(&mut *self.open_tabs.lock().await);
        if ids.is_empty() {
            return;
        }

        let mut safe = Vec::new();
        for id in ids {
            if let Some(url) = self.tabs.tab_url(id).await {
                if url.starts_with(MUTED_SETTINGS_URL) || url.starts_with(BLOCKED_SETTINGS_URL) {
                    safe.push(id);
                }
            }
        }
        if safe.is_empty() {
            return;
        }
        self.tabs.close_tabs(&safe).await;
    }
}

/// Completion status line shown to the user, stamped with local time.
pub fn build_import_status(muted: usize, blocked: usize, at: DateTime<Local>) -> String {
    format!(
        "取得完了: ミュート{muted}件、ブロック{blocked}件 ({})",
        at.format("%H:%M")
    )
}
