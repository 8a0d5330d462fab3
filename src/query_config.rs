//! Captured GraphQL query identity (query id plus feature-flag map).
//!
//! The backend rotates its persisted-query ids, so fetching is impossible
//! until we have observed the UI make the same call. Each list keeps the
//! most recently observed id and feature set.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handles::ListKind;

/// Feature flags observed in production list requests, sent whenever a
/// captured config carried none. The backend rejects requests that omit
/// flags it considers mandatory, so an empty map is never usable.
static DEFAULT_FEATURE_FLAGS: Lazy<Map<String, Value>> = Lazy::new(|| {
    match serde_json::json!({
        "rweb_video_screen_enabled": false,
        "profile_label_improvements_pcf_label_in_post_enabled": true,
        "responsive_web_profile_redirect_enabled": false,
        "rweb_tipjar_consumption_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "premium_content_api_read_enabled": false,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "responsive_web_grok_analyze_button_fetch_trends_enabled": false,
        "responsive_web_grok_analyze_post_followups_enabled": true,
        "responsive_web_jetfuel_frame": true,
        "responsive_web_grok_share_attachment_enabled": true,
        "articles_preview_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "responsive_web_grok_show_grok_translated_post": false,
        "responsive_web_grok_analysis_button_from_backend": true,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_grok_image_annotation_enabled": true,
        "responsive_web_grok_imagine_annotation_enabled": true,
        "responsive_web_grok_community_note_auto_translation_is_enabled": false,
        "responsive_web_enhance_cards_enabled": false
    }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
});

pub fn default_feature_flags() -> Map<String, Value> {
    DEFAULT_FEATURE_FLAGS.clone()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub id: String,
    #[serde(default)]
    pub features: Map<String, Value>,
}

impl QueryConfig {
    pub fn new(id: impl Into<String>, features: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }

    /// Canonical serialization of the feature map, used for change
    /// detection so key order can never produce a spurious update.
    pub fn canonical_features(&self) -> String {
        canonical_json(&Value::Object(self.features.clone()))
    }
}

/// Serialize with object keys sorted recursively. Array order is
/// meaningful and preserved.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&normalize_value(value)).unwrap_or_default()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), normalize_value(&map[key]));
            }
            Value::Object(sorted)
        }
        other => other.clone(),
    }
}

/// Persisted form of the cache, one slot per list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfigSnapshot {
    pub muted: Option<QueryConfig>,
    pub blocked: Option<QueryConfig>,
}

/// In-memory cache of the per-list query identity.
#[derive(Debug, Default)]
pub struct QueryConfigCache {
    muted: RwLock<Option<QueryConfig>>,
    blocked: RwLock<Option<QueryConfig>>,
}

impl QueryConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: ListKind) -> &RwLock<Option<QueryConfig>> {
        match kind {
            ListKind::Muted => &self.muted,
            ListKind::Blocked => &self.blocked,
        }
    }

    pub fn get(&self, kind: ListKind) -> Option<QueryConfig> {
        self.slot(kind).read().clone()
    }

    /// Store an observed config. Returns false when it matches the cached
    /// one (same id, same canonical feature serialization), so callers can
    /// skip persistence and refresh scheduling for repeat observations.
    pub fn store(&self, kind: ListKind, config: QueryConfig) -> bool {
        let slot = self.slot(kind);
        {
            let current = slot.read();
            if let Some(current) = current.as_ref() {
                if current.id == config.id
                    && current.canonical_features() == config.canonical_features()
                {
                    return false;
                }
            }
        }
        *slot.write() = Some(config);
        true
    }

    pub fn load(&self, snapshot: QueryConfigSnapshot) {
        *self.muted.write() = snapshot.muted;
        *self.blocked.write() = snapshot.blocked;
    }

    pub fn snapshot(&self) -> QueryConfigSnapshot {
        QueryConfigSnapshot {
            muted: self.muted.read().clone(),
            blocked: self.blocked.read().clone(),
        }
    }
}
