//! Observation of the host session's own traffic.
//!
//! Nothing here issues requests. Embedding surfaces hand us what they see
//! (request headers, request URLs, response bodies, cookie changes) and we
//! turn the relevant ones into [`CaptureEvent`]s for the coordinator.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::handles::{ListAction, ListKind};
use crate::query_config::{default_feature_flags, QueryConfig};

/// Something worth telling the coordinator about.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// An authorization header carried this bearer token.
    BearerCaptured(String),
    /// The UI itself requested a list; its query id and feature flags are
    /// now known-good.
    QueryConfigObserved { kind: ListKind, config: QueryConfig },
    /// The user muted/unmuted/blocked/unblocked a single account.
    ListMutation {
        kind: ListKind,
        action: ListAction,
        handle: String,
    },
    /// A timeline response landed; freshly rendered entries may need
    /// filtering.
    TimelineFetched { name: &'static str },
    /// The session CSRF cookie was written or removed.
    SessionCookieChanged {
        removed: bool,
        value: Option<String>,
    },
}

/// URL filter for the two list operations, mirroring the request filter
/// the capture surface registers with its host.
static LIST_REQUEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://x\.com/i/api/graphql/[^/]+/(MutedAccounts|BlockedAccountsAll)")
        .expect("list request regex")
});

const ACTION_TARGETS: [(&str, ListKind, ListAction); 4] = [
    ("/i/api/1.1/mutes/users/create.json", ListKind::Muted, ListAction::Add),
    ("/i/api/1.1/mutes/users/destroy.json", ListKind::Muted, ListAction::Remove),
    ("/i/api/1.1/blocks/create.json", ListKind::Blocked, ListAction::Add),
    ("/i/api/1.1/blocks/destroy.json", ListKind::Blocked, ListAction::Remove),
];

const TIMELINE_TARGETS: [(&str, &str); 1] = [("/SearchTimeline", "SearchTimeline")];

pub const SESSION_COOKIE_NAME: &str = "ct0";
const SESSION_COOKIE_DOMAIN: &str = "x.com";

/// GraphQL request URL decomposed into the parts we persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGraphqlUrl {
    pub id: String,
    pub operation: String,
    /// The `features` query parameter, when present and well-formed.
    pub features: Option<Map<String, Value>>,
}

/// Split a GraphQL URL into query id, operation name, and feature flags.
/// The id and operation are the fourth and fifth path segments.
pub fn parse_graphql_url(url: &str) -> Option<ParsedGraphqlUrl> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let id = *segments.get(3)?;
    let operation = *segments.get(4)?;
    if id.is_empty() || operation.is_empty() {
        return None;
    }

    let features = parsed
        .query_pairs()
        .find(|(key, _)| key.as_ref() == "features")
        .and_then(|(_, raw)| serde_json::from_str::<Map<String, Value>>(&raw).ok());

    Some(ParsedGraphqlUrl {
        id: id.to_string(),
        operation: operation.to_string(),
        features,
    })
}

fn list_kind_for_operation(operation: &str) -> Option<ListKind> {
    if operation == ListKind::Muted.operation() {
        return Some(ListKind::Muted);
    }
    if operation == ListKind::Blocked.operation() {
        return Some(ListKind::Blocked);
    }
    None
}

/// Query-config capture: a list request made by the UI itself.
pub fn query_config_from_url(url: &str) -> Option<CaptureEvent> {
    if !LIST_REQUEST_RE.is_match(url) {
        return None;
    }
    let parsed = parse_graphql_url(url)?;
    let kind = list_kind_for_operation(&parsed.operation)?;
    let config = QueryConfig::new(
        parsed.id,
        parsed.features.unwrap_or_else(default_feature_flags),
    );
    Some(CaptureEvent::QueryConfigObserved { kind, config })
}

/// Bearer capture from outgoing request headers.
pub fn bearer_from_headers<'a, I>(headers: I) -> Option<CaptureEvent>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let value = headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value)?;
    let token = value.strip_prefix("Bearer ")?.trim_start();
    if token.is_empty() {
        return None;
    }
    Some(CaptureEvent::BearerCaptured(token.to_string()))
}

/// Single add/remove capture from a mutation endpoint response body.
pub fn mutation_from_response(url: &str, body: &str) -> Option<CaptureEvent> {
    let (_, kind, action) = ACTION_TARGETS
        .iter()
        .find(|(path, _, _)| url.contains(path))?;
    let json: Value = serde_json::from_str(body).ok()?;
    let handle = json.get("screen_name").and_then(Value::as_str)?;
    if handle.is_empty() {
        return None;
    }
    Some(CaptureEvent::ListMutation {
        kind: *kind,
        action: *action,
        handle: handle.to_string(),
    })
}

/// Timeline signal from a response URL.
pub fn timeline_from_url(url: &str) -> Option<CaptureEvent> {
    let &(_, name) = TIMELINE_TARGETS
        .iter()
        .find(|(path, _)| url.contains(path))?;
    Some(CaptureEvent::TimelineFetched { name })
}

/// Session cookie change, filtered down to `ct0` on the right domain.
pub fn cookie_change(
    name: &str,
    domain: &str,
    removed: bool,
    value: Option<&str>,
) -> Option<CaptureEvent> {
    if name != SESSION_COOKIE_NAME || !domain.contains(SESSION_COOKIE_DOMAIN) {
        return None;
    }
    Some(CaptureEvent::SessionCookieChanged {
        removed,
        value: value.map(str::to_string),
    })
}

/// Thin adapter the embedding surfaces call with raw observations. Parsing
/// happens here; delivery to the coordinator never blocks the observer.
#[derive(Clone)]
pub struct CaptureListener {
    tx: mpsc::Sender<CaptureEvent>,
}

impl CaptureListener {
    pub fn new(tx: mpsc::Sender<CaptureEvent>) -> Self {
        Self { tx }
    }

    fn emit(&self, event: CaptureEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(%err, "capture event dropped");
        }
    }

    pub fn observe_request_url(&self, url: &str) {
        if let Some(event) = query_config_from_url(url) {
            debug!(url, "captured query config");
            self.emit(event);
        }
    }

    pub fn observe_request_headers<'a, I>(&self, headers: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if let Some(event) = bearer_from_headers(headers) {
            self.emit(event);
        }
    }

    pub fn observe_response(&self, url: &str, body: &str) {
        if let Some(event) = timeline_from_url(url) {
            self.emit(event);
        }
        if let Some(event) = mutation_from_response(url, body) {
            self.emit(event);
        }
    }

    pub fn observe_cookie(&self, name: &str, domain: &str, removed: bool, value: Option<&str>) {
        if let Some(event) = cookie_change(name, domain, removed, value) {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MUTED_URL: &str = "https://x.com/i/api/graphql/qid123/MutedAccounts?variables=%7B%22count%22%3A200%7D&features=%7B%22flag%22%3Atrue%7D";

    #[test]
    fn test_parse_graphql_url() {
        let parsed = parse_graphql_url(MUTED_URL).unwrap();
        assert_eq!(parsed.id, "qid123");
        assert_eq!(parsed.operation, "MutedAccounts");
        assert_eq!(
            parsed.features,
            Some(json!({"flag": true}).as_object().cloned().unwrap())
        );
    }

    #[test]
    fn test_parse_graphql_url_bad_features_param() {
        let url = "https://x.com/i/api/graphql/qid/MutedAccounts?features=notjson";
        let parsed = parse_graphql_url(url).unwrap();
        assert_eq!(parsed.features, None);
    }

    #[test]
    fn test_parse_graphql_url_too_short() {
        assert_eq!(parse_graphql_url("https://x.com/i/api/graphql"), None);
        assert_eq!(parse_graphql_url("not a url"), None);
    }

    #[test]
    fn test_query_config_capture() {
        let Some(CaptureEvent::QueryConfigObserved { kind, config }) =
            query_config_from_url(MUTED_URL)
        else {
            panic!("expected query config event");
        };
        assert_eq!(kind, ListKind::Muted);
        assert_eq!(config.id, "qid123");
        assert_eq!(config.features.get("flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_query_config_defaults_features_when_absent() {
        let url = "https://x.com/i/api/graphql/qid456/BlockedAccountsAll?variables=%7B%7D";
        let Some(CaptureEvent::QueryConfigObserved { kind, config }) = query_config_from_url(url)
        else {
            panic!("expected query config event");
        };
        assert_eq!(kind, ListKind::Blocked);
        assert_eq!(config.features, default_feature_flags());
    }

    #[test]
    fn test_query_config_ignores_other_operations() {
        let url = "https://x.com/i/api/graphql/qid/UserByScreenName?variables=%7B%7D";
        assert_eq!(query_config_from_url(url), None);
        let offsite = "https://evil.example/i/api/graphql/qid/MutedAccounts";
        assert_eq!(query_config_from_url(offsite), None);
    }

    #[test]
    fn test_bearer_capture() {
        let headers = [
            ("accept", "*/*"),
            ("Authorization", "Bearer AAAA-secret-token"),
        ];
        assert_eq!(
            bearer_from_headers(headers),
            Some(CaptureEvent::BearerCaptured("AAAA-secret-token".to_string()))
        );
    }

    #[test]
    fn test_bearer_requires_exact_scheme_prefix() {
        assert_eq!(bearer_from_headers([("authorization", "bearer x")]), None);
        assert_eq!(bearer_from_headers([("authorization", "Basic dXNlcg==")]), None);
        assert_eq!(bearer_from_headers([("authorization", "Bearer ")]), None);
        assert_eq!(bearer_from_headers([("cookie", "ct0=x")]), None);
    }

    #[test]
    fn test_mutation_capture_table() {
        let cases = [
            ("https://x.com/i/api/1.1/mutes/users/create.json", ListKind::Muted, ListAction::Add),
            ("https://x.com/i/api/1.1/mutes/users/destroy.json", ListKind::Muted, ListAction::Remove),
            ("https://x.com/i/api/1.1/blocks/create.json", ListKind::Blocked, ListAction::Add),
            ("https://x.com/i/api/1.1/blocks/destroy.json", ListKind::Blocked, ListAction::Remove),
        ];
        for (url, kind, action) in cases {
            let event = mutation_from_response(url, r#"{"screen_name":"Alice"}"#);
            assert_eq!(
                event,
                Some(CaptureEvent::ListMutation {
                    kind,
                    action,
                    handle: "Alice".to_string(),
                })
            );
        }
    }

    #[test]
    fn test_mutation_capture_rejects_bad_bodies() {
        let url = "https://x.com/i/api/1.1/blocks/create.json";
        assert_eq!(mutation_from_response(url, ""), None);
        assert_eq!(mutation_from_response(url, "not json"), None);
        assert_eq!(mutation_from_response(url, r#"{"id": 7}"#), None);
        assert_eq!(mutation_from_response(url, r#"{"screen_name": ""}"#), None);
        assert_eq!(
            mutation_from_response("https://x.com/i/api/1.1/friends/create.json", "{}"),
            None
        );
    }

    #[test]
    fn test_timeline_signal() {
        let url = "https://x.com/i/api/graphql/abc/SearchTimeline?q=rust";
        assert_eq!(
            timeline_from_url(url),
            Some(CaptureEvent::TimelineFetched { name: "SearchTimeline" })
        );
        assert_eq!(timeline_from_url("https://x.com/i/api/graphql/abc/HomeTimeline"), None);
    }

    #[test]
    fn test_cookie_filter() {
        assert!(cookie_change("ct0", ".x.com", false, Some("v")).is_some());
        assert!(cookie_change("ct0", "x.com", true, None).is_some());
        assert_eq!(cookie_change("auth_token", ".x.com", false, Some("v")), None);
        assert_eq!(cookie_change("ct0", ".twitter.example", false, Some("v")), None);
    }

    #[tokio::test]
    async fn test_listener_delivers_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let listener = CaptureListener::new(tx);

        listener.observe_request_headers([("authorization", "Bearer tok-one")]);
        listener.observe_request_url(MUTED_URL);
        listener.observe_response(
            "https://x.com/i/api/graphql/abc/SearchTimeline",
            "",
        );
        listener.observe_cookie("ct0", ".x.com", false, Some("csrf"));
        listener.observe_request_url("https://x.com/home");

        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::BearerCaptured("tok-one".to_string())
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            CaptureEvent::QueryConfigObserved { kind: ListKind::Muted, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CaptureEvent::TimelineFetched { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CaptureEvent::SessionCookieChanged { removed: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }
}
