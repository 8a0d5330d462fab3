//! Paginated list fetching against the GraphQL API.
//!
//! A fetch only runs once every precondition holds: a captured query
//! config, an open cooldown gate, and both credentials. Anything missing
//! resolves to a skip so the previously persisted list stays authoritative.

use std::sync::Arc;

use anyhow::Context;
use itertools::Itertools;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::FilterConfig;
use crate::cooldown::{CooldownTracker, Gate};
use crate::credentials::CredentialStore;
use crate::error::{classify_message, classify_status, ApiError, ErrorKind};
use crate::handles::{HandleSet, ListKind};
use crate::parse;
use crate::query_config::{default_feature_flags, QueryConfig};

/// Why a fetch resolved without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No query id captured yet for this list.
    MissingQuery,
    /// Auth-required flag is set.
    AuthRequired,
    /// Cooldown deadline has not passed.
    Cooldown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingQuery => "missing_query",
            SkipReason::AuthRequired => "auth_required",
            SkipReason::Cooldown => "cooldown",
        }
    }
}

/// Outcome of one full list fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Every page was consumed; this is the complete current list.
    Complete(HandleSet),
    /// Preconditions failed before any request was made.
    Skipped(SkipReason),
}

impl FetchOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, FetchOutcome::Skipped(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            FetchOutcome::Skipped(reason) => Some(*reason),
            FetchOutcome::Complete(_) => None,
        }
    }
}

pub struct ListFetcher {
    client: reqwest::Client,
    config: Arc<FilterConfig>,
    credentials: Arc<CredentialStore>,
    cooldown: Arc<CooldownTracker>,
}

impl ListFetcher {
    pub fn new(
        config: Arc<FilterConfig>,
        credentials: Arc<CredentialStore>,
        cooldown: Arc<CooldownTracker>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            config,
            credentials,
            cooldown,
        })
    }

    /// Fetch the complete list, following bottom cursors until the backend
    /// stops returning new ones, the cursor repeats, or the page bound hits.
    pub async fn fetch_all(
        &self,
        kind: ListKind,
        query: Option<&QueryConfig>,
    ) -> Result<FetchOutcome, ApiError> {
        let Some(query) = query.filter(|q| !q.id.is_empty()) else {
            return Ok(FetchOutcome::Skipped(SkipReason::MissingQuery));
        };
        match self.cooldown.gate() {
            Gate::AuthBlocked => return Ok(FetchOutcome::Skipped(SkipReason::AuthRequired)),
            Gate::Cooling { .. } => return Ok(FetchOutcome::Skipped(SkipReason::Cooldown)),
            Gate::Open => {}
        }
        let Some(csrf) = self.credentials.csrf() else {
            return Err(ApiError::auth("ct0 cookie not found"));
        };

        let features = if query.features.is_empty() {
            default_feature_flags()
        } else {
            query.features.clone()
        };
        let url = format!("{}/{}/{}", self.config.api_base, query.id, kind.operation());

        let mut cursor: Option<String> = None;
        let mut handles = HandleSet::new();

        for page in 0..self.config.max_pages {
            let mut variables = Map::new();
            variables.insert("count".to_string(), Value::from(self.config.page_size));
            variables.insert("includePromotedContent".to_string(), Value::Bool(false));
            if let Some(cursor) = &cursor {
                variables.insert("cursor".to_string(), Value::String(cursor.clone()));
            }

            let json = self
                .fetch_json(&url, &Value::Object(variables), &features, &csrf)
                .await?;
            let Some(json) = json else {
                break;
            };

            let extract = parse::extract_page(&json);
            debug!(
                list = kind.as_str(),
                page,
                handles = extract.handles.len(),
                has_cursor = extract.next_cursor.is_some(),
                "page fetched"
            );
            handles.extend(extract.handles);

            match extract.next_cursor {
                None => break,
                // A cursor that stopped advancing means the backend is done
                // with us, bound or not.
                Some(next) if Some(&next) == cursor.as_ref() => break,
                Some(next) => cursor = Some(next),
            }
        }

        Ok(FetchOutcome::Complete(handles))
    }

    async fn fetch_json(
        &self,
        url: &str,
        variables: &Value,
        features: &Map<String, Value>,
        csrf: &str,
    ) -> Result<Option<Value>, ApiError> {
        let Some(bearer) = self.credentials.bearer() else {
            return Err(ApiError::auth("auth bearer not found"));
        };

        let response = self
            .client
            .get(url)
            .query(&[
                ("variables", variables.to_string()),
                ("features", Value::Object(features.clone()).to_string()),
            ])
            .header(ACCEPT, "*/*")
            .header(AUTHORIZATION, format!("Bearer {}", bearer.as_str()))
            .header(CONTENT_TYPE, "application/json")
            .header("x-csrf-token", csrf)
            .header("x-twitter-active-user", "yes")
            .header("x-twitter-auth-type", "OAuth2Session")
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Failed to fetch: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to fetch: {e}")))?;

        if !status.is_success() {
            let status = status.as_u16();
            let snippet: String = text.chars().take(200).collect();
            return Err(ApiError::new(
                classify_status(status),
                status,
                format!("API error {status}: {snippet}"),
            ));
        }

        if text.is_empty() {
            return Ok(None);
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|_| ApiError::new(ErrorKind::ParseError, status.as_u16(), "Invalid JSON response"))?;

        // GraphQL surfaces application errors inside a 200 body.
        if let Some(errors) = json
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty())
        {
            let message = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .join(" | ");
            return Err(ApiError::new(
                classify_message(&message),
                status.as_u16(),
                message,
            ));
        }

        Ok(Some(json))
    }
}
