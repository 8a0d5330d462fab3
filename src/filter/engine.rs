//! Filtering engine: converges the visible tree to the authoritative
//! mute/block sets as content streams in.
//!
//! Hiding happens at the nearest cell container and is idempotent. The
//! hidden registry tracks distinct hidden handles for the badge count and
//! is rebuilt from scratch whenever the authoritative sets change.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::handles::{normalize_handle, HandleSet};
use crate::storage::{Storage, StorageChange, StorageError};

use super::dom::{Document, ElementKind, Mutation, MutationKind, NodeId};
use super::scheduler::BatchScheduler;

/// Marker set on a hidden container.
pub const HIDDEN_ATTR: &str = "data-x-bmsf-hidden";
/// Handle that caused the container to be hidden.
pub const HANDLE_ATTR: &str = "data-x-bmsf-handle";

/// Timeline fetch that warrants a forced rescan; its results reach the
/// tree through paths that do not always raise mutations.
pub const SEARCH_TIMELINE_NAME: &str = "SearchTimeline";

#[derive(Debug, Default)]
pub struct FilterStats {
    pub scans: AtomicU64,
    pub hides: AtomicU64,
    pub restores: AtomicU64,
    pub retries: AtomicU64,
}

pub struct FilterEngine {
    dom: Arc<Document>,
    config: Arc<FilterConfig>,
    muted: RwLock<HandleSet>,
    blocked: RwLock<HandleSet>,
    /// Distinct handles currently hidden on this page.
    hidden: Mutex<HashSet<String>>,
    hidden_count: watch::Sender<usize>,
    retries: DashMap<NodeId, u32>,
    scheduler: Arc<BatchScheduler>,
    stats: FilterStats,
}

impl FilterEngine {
    pub fn new(dom: Arc<Document>, config: Arc<FilterConfig>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<FilterEngine>| {
            let engine = Weak::clone(weak);
            let scheduler = BatchScheduler::new(
                config.rescan_flush(),
                Arc::new(move |roots: Vec<NodeId>| {
                    // Upgrade fails only during teardown.
                    if let Some(engine) = engine.upgrade() {
                        engine.flush(roots);
                    }
                }),
            );
            let (hidden_count, _) = watch::channel(0);
            Self {
                dom,
                config,
                muted: RwLock::new(HandleSet::new()),
                blocked: RwLock::new(HandleSet::new()),
                hidden: Mutex::new(HashSet::new()),
                hidden_count,
                retries: DashMap::new(),
                scheduler,
                stats: FilterStats::default(),
            }
        })
    }

    /// Load the authoritative sets, filter the whole tree once, and spawn
    /// the mutation and storage listeners. Needs a running runtime.
    pub fn start(self: &Arc<Self>, storage: &Arc<Storage>) -> Result<(), StorageError> {
        let mut changes = storage.subscribe();
        self.load_lists(storage)?;
        self.scan(self.dom.root());

        let mut mutations = self.dom.observe();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(mutation) = mutations.recv().await {
                engine.on_mutation(mutation);
            }
        });

        let engine = Arc::clone(self);
        let storage = Arc::clone(storage);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => engine.apply_storage_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage events lagged, reloading lists");
                        if let Err(error) = engine.load_lists(&storage) {
                            warn!(%error, "failed to reload lists");
                            continue;
                        }
                        engine.scan(engine.dom.root());
                        engine.restore_visible(engine.dom.root());
                        engine.publish_hidden_count();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    fn load_lists(&self, storage: &Storage) -> Result<(), StorageError> {
        *self.muted.write() = HandleSet::from_stored(&storage.muted()?);
        *self.blocked.write() = HandleSet::from_stored(&storage.blocked()?);
        self.hidden.lock().clear();
        self.publish_hidden_count();
        debug!(
            muted = self.muted.read().len(),
            blocked = self.blocked.read().len(),
            "lists loaded"
        );
        Ok(())
    }

    /// Mirror a storage change. Only the lists present in the change are
    /// replaced; the other keeps its current contents.
    pub fn apply_storage_change(self: &Arc<Self>, change: &StorageChange) {
        if !change.touches_lists() {
            return;
        }
        if let Some(muted) = &change.muted {
            *self.muted.write() = HandleSet::from_stored(muted);
        }
        if let Some(blocked) = &change.blocked {
            *self.blocked.write() = HandleSet::from_stored(blocked);
        }
        self.hidden.lock().clear();
        self.scan(self.dom.root());
        self.restore_visible(self.dom.root());
        self.publish_hidden_count();
    }

    /// Queue a coalesced rescan for the card containing the node, or for
    /// the node itself when it sits outside any card.
    pub fn schedule_scan(self: &Arc<Self>, node: NodeId) {
        self.scheduler.schedule(self.normalize_scan_root(node));
    }

    fn normalize_scan_root(&self, node: NodeId) -> NodeId {
        if node == self.dom.root() {
            return node;
        }
        let mut current = Some(node);
        while let Some(id) = current {
            match self.dom.kind(id) {
                ElementKind::PostCard | ElementKind::UserCard => return id,
                _ => current = self.dom.parent(id),
            }
        }
        node
    }

    fn flush(self: &Arc<Self>, roots: Vec<NodeId>) {
        for root in roots {
            self.scan(root);
        }
    }

    /// Apply the filter to the root (when it is itself a card) and to
    /// every card beneath it.
    pub fn scan(self: &Arc<Self>, root: NodeId) {
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        if matches!(
            self.dom.kind(root),
            ElementKind::PostCard | ElementKind::UserCard
        ) {
            self.apply_filter(root);
        }
        for card in self.dom.descendants_of_kind(root, ElementKind::PostCard) {
            self.apply_filter(card);
        }
        for card in self.dom.descendants_of_kind(root, ElementKind::UserCard) {
            self.apply_filter(card);
        }
    }

    /// Hide the card if its handle is in either set. A card whose handle
    /// is not yet extractable gets a bounded retry; rendering is async and
    /// the profile link often arrives after the card.
    fn apply_filter(self: &Arc<Self>, card: NodeId) {
        let Some(handle) = self.extract_handle(card) else {
            self.schedule_pending_retry(card);
            return;
        };
        if self.muted.read().contains(&handle) || self.blocked.read().contains(&handle) {
            self.hide_node(card, &handle);
        }
    }

    fn schedule_pending_retry(self: &Arc<Self>, card: NodeId) {
        {
            let mut count = self.retries.entry(card).or_insert(0);
            if *count >= self.config.pending_retry_limit {
                return;
            }
            *count += 1;
        }
        self.stats.retries.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(self);
        let delay = self.config.pending_retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.schedule_scan(card);
        });
    }

    /// Handle owning a card: the first profile-shaped link, scoped to the
    /// name region for post cards. Returns None while the link has not
    /// rendered, or when the first link is not profile-shaped.
    fn extract_handle(&self, card: NodeId) -> Option<String> {
        let href = match self.dom.kind(card) {
            ElementKind::PostCard => self.first_slash_href(card, true)?,
            ElementKind::UserCard => self.first_slash_href(card, false)?,
            _ => return None,
        };
        handle_from_href(&href)
    }

    fn first_slash_href(&self, card: NodeId, name_region_only: bool) -> Option<String> {
        if name_region_only {
            for region in self.dom.descendants_of_kind(card, ElementKind::NameRegion) {
                if let Some(href) = self.first_slash_href(region, false) {
                    return Some(href);
                }
            }
            return None;
        }
        self.dom
            .descendants_of_kind(card, ElementKind::Link)
            .into_iter()
            .filter_map(|link| self.dom.href(link))
            .find(|href| href.starts_with('/'))
    }

    fn hide_node(&self, card: NodeId, handle: &str) {
        let container = self.dom.closest(card, ElementKind::Cell).unwrap_or(card);
        if self.dom.attr(container, HIDDEN_ATTR).as_deref() == Some("true") {
            // Already hidden (e.g. two cards in one cell); only the
            // registry needs the new handle.
            self.register_hidden(handle);
            return;
        }
        self.dom.set_attr(container, HIDDEN_ATTR, "true");
        self.dom.set_attr(container, HANDLE_ATTR, handle);
        self.dom.set_display_hidden(container, true);
        self.stats.hides.fetch_add(1, Ordering::Relaxed);
        self.register_hidden(handle);
    }

    fn show_node(&self, node: NodeId) {
        let container = self.dom.closest(node, ElementKind::Cell).unwrap_or(node);
        if self.dom.attr(container, HIDDEN_ATTR).as_deref() != Some("true") {
            return;
        }
        self.dom.set_attr(container, HIDDEN_ATTR, "false");
        self.dom.set_display_hidden(container, false);
        self.stats.restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Un-hide every container whose owning handle has dropped out of
    /// both sets. Containers hidden without a recorded handle stay put.
    pub fn restore_visible(&self, root: NodeId) {
        let muted = self.muted.read();
        let blocked = self.blocked.read();
        for node in self.dom.descendants(root) {
            if self.dom.attr(node, HIDDEN_ATTR).as_deref() != Some("true") {
                continue;
            }
            let Some(handle) = self.dom.attr(node, HANDLE_ATTR) else {
                continue;
            };
            if !muted.contains(&handle) && !blocked.contains(&handle) {
                self.show_node(node);
            }
        }
    }

    pub fn on_mutation(self: &Arc<Self>, mutation: Mutation) {
        match mutation.kind {
            MutationKind::ChildList => {
                self.schedule_scan(mutation.target);
                for node in mutation.added {
                    self.schedule_scan(node);
                }
            }
            MutationKind::Attributes => self.schedule_scan(mutation.target),
            MutationKind::CharacterData => {
                if let Some(parent) = self.dom.parent(mutation.target) {
                    self.schedule_scan(parent);
                }
            }
        }
    }

    /// A named timeline fetch was observed. Search results replace large
    /// subtrees at once, so rescan now and again after they settle.
    pub fn on_timeline_signal(self: &Arc<Self>, name: &str) {
        if name != SEARCH_TIMELINE_NAME {
            return;
        }
        self.schedule_scan(self.dom.root());
        let engine = Arc::clone(self);
        let settle = self.config.timeline_settle();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            engine.schedule_scan(engine.dom.root());
        });
    }

    fn register_hidden(&self, handle: &str) {
        let mut hidden = self.hidden.lock();
        if hidden.insert(handle.to_string()) {
            let count = hidden.len();
            drop(hidden);
            self.hidden_count.send_replace(count);
        }
    }

    fn publish_hidden_count(&self) {
        let count = self.hidden.lock().len();
        self.hidden_count.send_replace(count);
    }

    /// Distinct handles hidden on this page right now.
    pub fn hidden_count(&self) -> usize {
        self.hidden.lock().len()
    }

    pub fn hidden_count_watch(&self) -> watch::Receiver<usize> {
        self.hidden_count.subscribe()
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }
}

/// Normalized handle from a profile path: the first segment, unless it is
/// a non-profile route.
fn handle_from_href(href: &str) -> Option<String> {
    if !href.starts_with('/') {
        return None;
    }
    let mut parts = href.split('/');
    parts.next();
    let handle = parts.next()?;
    if handle.is_empty() || handle == "status" {
        return None;
    }
    Some(normalize_handle(handle))
}
