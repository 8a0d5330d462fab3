//! Persistent state shared by the sync coordinator and the filtering layer.
//!
//! Writes go through typed accessors that also publish a [`StorageChange`]
//! on a broadcast channel, so the filtering layer can mirror the
//! authoritative lists without polling.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::handles::ListKind;
use crate::query_config::QueryConfigSnapshot;

pub mod keys {
    pub const MUTED: &str = "mutedHandles";
    pub const BLOCKED: &str = "blockedHandles";
    pub const UPDATED_AT: &str = "listsUpdatedAt";
    pub const LAST_ERROR: &str = "lastError";
    pub const QUERY_CONFIG: &str = "queryConfig";
    pub const AUTH_BEARER: &str = "authBearer";
    pub const IMPORT_STATUS: &str = "importStatus";
    pub const POPUP_OPEN: &str = "popupOpen";
}

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("storage codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Change notification. A field is `Some` when that key was written;
/// for nullable keys the inner option is the new value.
#[derive(Debug, Clone, Default)]
pub struct StorageChange {
    pub muted: Option<Vec<String>>,
    pub blocked: Option<Vec<String>>,
    pub last_error: Option<Option<String>>,
    pub import_status: Option<Option<String>>,
}

impl StorageChange {
    pub fn touches_lists(&self) -> bool {
        self.muted.is_some() || self.blocked.is_some()
    }
}

/// Everything one refresh cycle persists, written as a single batch so
/// subscribers observe one coherent update.
#[derive(Debug, Clone)]
pub struct RefreshPayload {
    pub muted: Vec<String>,
    pub blocked: Vec<String>,
    pub last_error: Option<String>,
}

pub struct Storage {
    db: sled::Db,
    events: broadcast::Sender<StorageChange>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self::with_db(sled::open(path)?))
    }

    /// In-memory backend for tests; nothing touches disk.
    pub fn temporary() -> Result<Self, StorageError> {
        Ok(Self::with_db(sled::Config::new().temporary(true).open()?))
    }

    fn with_db(db: sled::Db) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { db, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.events.subscribe()
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.db.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.db.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn emit(&self, change: StorageChange) {
        // No subscribers is fine; the sync side works headless.
        let _ = self.events.send(change);
    }

    fn list_key(kind: ListKind) -> &'static str {
        match kind {
            ListKind::Muted => keys::MUTED,
            ListKind::Blocked => keys::BLOCKED,
        }
    }

    pub fn list(&self, kind: ListKind) -> Result<Vec<String>, StorageError> {
        Ok(self.get_json(Self::list_key(kind))?.unwrap_or_default())
    }

    pub fn muted(&self) -> Result<Vec<String>, StorageError> {
        self.list(ListKind::Muted)
    }

    pub fn blocked(&self) -> Result<Vec<String>, StorageError> {
        self.list(ListKind::Blocked)
    }

    /// Replace one list and stamp the update time.
    pub fn set_list(&self, kind: ListKind, handles: &[String]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        batch.insert(Self::list_key(kind), serde_json::to_vec(handles)?);
        batch.insert(keys::UPDATED_AT, serde_json::to_vec(&now_ms())?);
        self.db.apply_batch(batch)?;

        let mut change = StorageChange::default();
        match kind {
            ListKind::Muted => change.muted = Some(handles.to_vec()),
            ListKind::Blocked => change.blocked = Some(handles.to_vec()),
        }
        self.emit(change);
        Ok(())
    }

    /// Persist the outcome of a refresh cycle: both lists, the update
    /// stamp, and the user-facing error text (or its absence) together.
    pub fn persist_refresh(&self, payload: &RefreshPayload) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        batch.insert(keys::MUTED, serde_json::to_vec(&payload.muted)?);
        batch.insert(keys::BLOCKED, serde_json::to_vec(&payload.blocked)?);
        batch.insert(keys::UPDATED_AT, serde_json::to_vec(&now_ms())?);
        batch.insert(keys::LAST_ERROR, serde_json::to_vec(&payload.last_error)?);
        self.db.apply_batch(batch)?;

        self.emit(StorageChange {
            muted: Some(payload.muted.clone()),
            blocked: Some(payload.blocked.clone()),
            last_error: Some(payload.last_error.clone()),
            import_status: None,
        });
        Ok(())
    }

    pub fn last_error(&self) -> Result<Option<String>, StorageError> {
        Ok(self.get_json::<Option<String>>(keys::LAST_ERROR)?.flatten())
    }

    pub fn set_last_error(&self, message: Option<&str>) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        batch.insert(keys::LAST_ERROR, serde_json::to_vec(&message)?);
        batch.insert(keys::UPDATED_AT, serde_json::to_vec(&now_ms())?);
        self.db.apply_batch(batch)?;

        self.emit(StorageChange {
            last_error: Some(message.map(str::to_string)),
            ..StorageChange::default()
        });
        Ok(())
    }

    pub fn updated_at(&self) -> Result<Option<i64>, StorageError> {
        self.get_json(keys::UPDATED_AT)
    }

    pub fn query_config(&self) -> Result<QueryConfigSnapshot, StorageError> {
        Ok(self.get_json(keys::QUERY_CONFIG)?.unwrap_or_default())
    }

    pub fn set_query_config(&self, snapshot: &QueryConfigSnapshot) -> Result<(), StorageError> {
        self.put_json(keys::QUERY_CONFIG, snapshot)
    }

    pub fn bearer(&self) -> Result<Option<String>, StorageError> {
        self.get_json(keys::AUTH_BEARER)
    }

    pub fn set_bearer(&self, bearer: &str) -> Result<(), StorageError> {
        self.put_json(keys::AUTH_BEARER, bearer)
    }

    pub fn import_status(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .get_json::<Option<String>>(keys::IMPORT_STATUS)?
            .flatten())
    }

    pub fn set_import_status(&self, status: Option<&str>) -> Result<(), StorageError> {
        self.put_json(keys::IMPORT_STATUS, &status)?;
        self.emit(StorageChange {
            import_status: Some(status.map(str::to_string)),
            ..StorageChange::default()
        });
        Ok(())
    }

    pub fn popup_open(&self) -> Result<bool, StorageError> {
        Ok(self.get_json(keys::POPUP_OPEN)?.unwrap_or(false))
    }

    pub fn set_popup_open(&self, open: bool) -> Result<(), StorageError> {
        self.put_json(keys::POPUP_OPEN, &open)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        Storage::temporary().unwrap()
    }

    #[test]
    fn test_lists_default_empty() {
        let s = storage();
        assert!(s.muted().unwrap().is_empty());
        assert!(s.blocked().unwrap().is_empty());
        assert_eq!(s.updated_at().unwrap(), None);
    }

    #[test]
    fn test_set_list_round_trip_and_stamp() {
        let s = storage();
        s.set_list(ListKind::Muted, &["alice".into(), "bob".into()]).unwrap();
        assert_eq!(s.muted().unwrap(), vec!["alice", "bob"]);
        assert!(s.updated_at().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_list_notifies_subscribers() {
        let s = storage();
        let mut rx = s.subscribe();
        s.set_list(ListKind::Blocked, &["mallory".into()]).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.blocked.as_deref(), Some(&["mallory".to_string()][..]));
        assert!(change.muted.is_none());
        assert!(change.touches_lists());
    }

    #[tokio::test]
    async fn test_persist_refresh_is_one_event() {
        let s = storage();
        let mut rx = s.subscribe();
        s.persist_refresh(&RefreshPayload {
            muted: vec!["alice".into()],
            blocked: vec!["bob".into()],
            last_error: None,
        })
        .unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.muted.as_deref(), Some(&["alice".to_string()][..]));
        assert_eq!(change.blocked.as_deref(), Some(&["bob".to_string()][..]));
        assert_eq!(change.last_error, Some(None));
        // Nothing else queued.
        assert!(rx.try_recv().is_err());

        assert_eq!(s.muted().unwrap(), vec!["alice"]);
        assert_eq!(s.blocked().unwrap(), vec!["bob"]);
        assert_eq!(s.last_error().unwrap(), None);
    }

    #[test]
    fn test_last_error_nullable_round_trip() {
        let s = storage();
        assert_eq!(s.last_error().unwrap(), None);
        s.set_last_error(Some("boom")).unwrap();
        assert_eq!(s.last_error().unwrap(), Some("boom".to_string()));
        s.set_last_error(None).unwrap();
        assert_eq!(s.last_error().unwrap(), None);
    }

    #[test]
    fn test_bearer_and_popup_flags() {
        let s = storage();
        assert_eq!(s.bearer().unwrap(), None);
        s.set_bearer("AAAA-token").unwrap();
        assert_eq!(s.bearer().unwrap(), Some("AAAA-token".to_string()));

        assert!(!s.popup_open().unwrap());
        s.set_popup_open(true).unwrap();
        assert!(s.popup_open().unwrap());
    }

    #[tokio::test]
    async fn test_import_status_event() {
        let s = storage();
        let mut rx = s.subscribe();
        s.set_import_status(Some("done")).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.import_status, Some(Some("done".to_string())));
        assert!(!change.touches_lists());
        assert_eq!(s.import_status().unwrap(), Some("done".to_string()));
    }
}
