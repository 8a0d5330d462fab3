//! Captured session credentials: the API bearer token and the `ct0`
//! CSRF cookie value.
//!
//! Both arrive by observation of the host session's own traffic, never by
//! prompting. Values are wrapped in [`Zeroizing`] so replaced secrets are
//! wiped on drop, and logs only ever see masked forms.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::storage::{Storage, StorageError};

#[derive(Default)]
pub struct CredentialStore {
    bearer: ArcSwapOption<Zeroizing<String>>,
    csrf: Mutex<Option<Zeroizing<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the bearer persisted by a previous session. The CSRF value
    /// is session-scoped and always starts empty.
    pub fn load(&self, storage: &Storage) -> Result<(), StorageError> {
        if let Some(bearer) = storage.bearer()? {
            debug!(token = %mask_token(Some(&bearer)), "restored auth bearer");
            self.bearer.store(Some(Arc::new(Zeroizing::new(bearer))));
        }
        Ok(())
    }

    /// Record an observed bearer token. Returns true when it differs from
    /// the cached one; repeat observations of the same token are no-ops
    /// and must not re-trigger refreshes.
    pub fn capture_bearer(&self, token: &str, storage: &Storage) -> Result<bool, StorageError> {
        if token.is_empty() {
            return Ok(false);
        }
        let current = self.bearer.load();
        if current.as_deref().map(|t| t.as_str()) == Some(token) {
            return Ok(false);
        }
        self.bearer
            .store(Some(Arc::new(Zeroizing::new(token.to_string()))));
        storage.set_bearer(token)?;
        info!(token = %mask_token(Some(token)), "captured auth bearer");
        Ok(true)
    }

    pub fn bearer(&self) -> Option<Arc<Zeroizing<String>>> {
        self.bearer.load_full()
    }

    pub fn has_bearer(&self) -> bool {
        self.bearer.load().is_some()
    }

    pub fn set_csrf(&self, value: Option<&str>) {
        *self.csrf.lock() = value
            .filter(|v| !v.is_empty())
            .map(|v| Zeroizing::new(v.to_string()));
    }

    pub fn csrf(&self) -> Option<String> {
        self.csrf.lock().as_ref().map(|z| z.to_string())
    }

    pub fn has_csrf(&self) -> bool {
        self.csrf.lock().is_some()
    }
}

/// Masked rendering for logs: first and last four characters only.
pub fn mask_token(token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return "(missing)".to_string();
    };
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_detects_change() {
        let storage = Storage::temporary().unwrap();
        let creds = CredentialStore::new();

        assert!(creds.capture_bearer("token-one", &storage).unwrap());
        assert!(!creds.capture_bearer("token-one", &storage).unwrap());
        assert!(creds.capture_bearer("token-two", &storage).unwrap());

        assert_eq!(
            creds.bearer().map(|t| t.as_str().to_string()),
            Some("token-two".to_string())
        );
        assert_eq!(storage.bearer().unwrap(), Some("token-two".to_string()));
    }

    #[test]
    fn test_empty_token_ignored() {
        let storage = Storage::temporary().unwrap();
        let creds = CredentialStore::new();
        assert!(!creds.capture_bearer("", &storage).unwrap());
        assert!(!creds.has_bearer());
    }

    #[test]
    fn test_load_restores_persisted_bearer() {
        let storage = Storage::temporary().unwrap();
        storage.set_bearer("persisted").unwrap();

        let creds = CredentialStore::new();
        creds.load(&storage).unwrap();
        assert!(creds.has_bearer());
        // Same token observed again is not a change.
        assert!(!creds.capture_bearer("persisted", &storage).unwrap());
    }

    #[test]
    fn test_csrf_set_and_clear() {
        let creds = CredentialStore::new();
        assert!(!creds.has_csrf());

        creds.set_csrf(Some("ct0-value"));
        assert_eq!(creds.csrf(), Some("ct0-value".to_string()));

        creds.set_csrf(None);
        assert!(!creds.has_csrf());

        creds.set_csrf(Some(""));
        assert!(!creds.has_csrf());
    }

    #[test]
    fn test_mask_token_forms() {
        assert_eq!(mask_token(None), "(missing)");
        assert_eq!(mask_token(Some("")), "(missing)");
        assert_eq!(mask_token(Some("short")), "***");
        assert_eq!(mask_token(Some("12345678")), "***");
        assert_eq!(mask_token(Some("123456789")), "1234...6789");
        assert_eq!(mask_token(Some("AAAAxxxxxxxxxxZZZZ")), "AAAA...ZZZZ");
    }
}
