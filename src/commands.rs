//! Control messages exchanged with embedding surfaces (popup, badge,
//! content layer), in the same JSON shapes they put on the wire.

use serde::{Deserialize, Serialize};

use crate::handles::{ListAction, ListKind};

/// Inbound command for the coordinator.
///
/// The per-page hidden count query is answered by the filtering layer
/// directly ([`crate::filter::FilterEngine::hidden_count`]); it never
/// reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Run a refresh cycle now.
    RefreshLists,
    /// The filtering layer reports how many entries it currently hides.
    HiddenUpdate { count: u64 },
    /// Open the settings pages so list requests get observed, then refresh.
    StartImport,
    /// Open the settings pages without arming completion notification.
    OpenImportTabs,
    /// Apply one observed add/remove to the persisted list.
    UpdateListFromAction {
        list: ListKind,
        action: ListAction,
        handle: String,
    },
}

/// Outcome of a refresh request, also the `refreshLists` wire response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshSummary {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn denied(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Refresh(RefreshSummary),
    Updated { ok: bool, updated: bool },
    Ack { ok: bool },
}

impl CommandResponse {
    pub fn ack() -> Self {
        CommandResponse::Ack { ok: true }
    }

    pub fn updated(updated: bool) -> Self {
        CommandResponse::Updated { ok: true, updated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shapes() {
        let cmd: Command = serde_json::from_value(json!({ "type": "refreshLists" })).unwrap();
        assert_eq!(cmd, Command::RefreshLists);

        let cmd: Command =
            serde_json::from_value(json!({ "type": "hiddenUpdate", "count": 4 })).unwrap();
        assert_eq!(cmd, Command::HiddenUpdate { count: 4 });

        let cmd: Command = serde_json::from_value(json!({
            "type": "updateListFromAction",
            "list": "muted",
            "action": "add",
            "handle": "@Alice"
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::UpdateListFromAction {
                list: ListKind::Muted,
                action: ListAction::Add,
                handle: "@Alice".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_value::<Command>(json!({ "type": "selfDestruct" })).is_err());
    }

    #[test]
    fn test_response_wire_shapes() {
        assert_eq!(
            serde_json::to_value(CommandResponse::ack()).unwrap(),
            json!({ "ok": true })
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::updated(false)).unwrap(),
            json!({ "ok": true, "updated": false })
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::Refresh(RefreshSummary::success())).unwrap(),
            json!({ "ok": true })
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::Refresh(RefreshSummary::denied("in_flight")))
                .unwrap(),
            json!({ "ok": false, "error": "in_flight" })
        );
    }
}
