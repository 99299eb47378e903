use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

pub const DEFAULT_FEED_URL: &str = "wss://pitpanda.rocks/api/newmystics";
pub const DEFAULT_REFERENCE_URL: &str = "https://pitpanda.rocks/pitreference";
pub const DEFAULT_PLAYER_API_URL: &str = "https://pitpanda.rocks/api/players";
pub const DEFAULT_IMAGE_API_URL: &str = "https://pitpanda.rocks/api/images/item";
pub const DEFAULT_PLAYER_PAGE_URL: &str = "https://pitpanda.rocks/players";

/// A filter as persisted: the query text doubles as the name; the compiled
/// predicate is always rebuilt from it on load and never written out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub name: String,
    #[serde(default)]
    pub alert: Option<String>,
}

/// Older settings files stored filters as bare query strings. Both shapes are
/// accepted on load and upgraded in memory before first use.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredFilter {
    Entry(FilterEntry),
    Legacy(String),
}

impl From<StoredFilter> for FilterEntry {
    fn from(stored: StoredFilter) -> Self {
        match stored {
            StoredFilter::Entry(entry) => entry,
            StoredFilter::Legacy(name) => FilterEntry { name, alert: None },
        }
    }
}

fn upgrade_filters<'de, D>(deserializer: D) -> Result<Vec<FilterEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let stored = Vec::<StoredFilter>::deserialize(deserializer)?;
    Ok(stored.into_iter().map(FilterEntry::from).collect())
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_reference_url() -> String {
    DEFAULT_REFERENCE_URL.to_string()
}

fn default_player_api_url() -> String {
    DEFAULT_PLAYER_API_URL.to_string()
}

fn default_image_api_url() -> String {
    DEFAULT_IMAGE_API_URL.to_string()
}

fn default_player_page_url() -> String {
    DEFAULT_PLAYER_PAGE_URL.to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_reconnect_secs() -> u64 {
    30
}

/// Process-wide configuration: the enabled flag, the ordered filter list, the
/// global alert template, delivery credentials, and endpoint tuning. Written
/// in full after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    #[serde(deserialize_with = "upgrade_filters")]
    pub filters: Vec<FilterEntry>,
    pub alert: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_reference_url")]
    pub reference_url: String,
    #[serde(default = "default_player_api_url")]
    pub player_api_url: String,
    #[serde(default = "default_image_api_url")]
    pub image_api_url: String,
    #[serde(default = "default_player_page_url")]
    pub player_page_url: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enabled: false,
            filters: vec![FilterEntry {
                name: "tokens0+".to_string(),
                alert: None,
            }],
            alert: "use `mystic-alerts --set-alert [alert]` to change this text".to_string(),
            webhook_url: None,
            feed_url: default_feed_url(),
            reference_url: default_reference_url(),
            player_api_url: default_player_api_url(),
            image_api_url: default_image_api_url(),
            player_page_url: default_player_page_url(),
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

impl Settings {
    /// Load from disk, or fall back to defaults when no file exists yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("malformed settings file {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        Ok(())
    }
}
