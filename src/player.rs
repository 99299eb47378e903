use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

lazy_static! {
    // Legacy chat formatting codes embedded in the formatted level string.
    static ref FORMAT_CODES: Regex = Regex::new("§.").unwrap();
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    success: bool,
    #[serde(default)]
    data: Option<PlayerData>,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    name: String,
    #[serde(rename = "formattedLevel")]
    formatted_level: String,
}

pub fn strip_format_codes(text: &str) -> String {
    FORMAT_CODES.replace_all(text, "").into_owned()
}

/// Best-effort lookup of a human-readable display label for an item owner.
/// Every failure mode degrades to "no enrichment available".
pub struct PlayerLookup {
    client: Client,
    base_url: String,
}

impl PlayerLookup {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("mystic-alerts/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve `"<level> <name>"` for an owner, or None when the lookup
    /// fails for any reason. Never an error: the caller falls back to the
    /// raw owner identifier.
    pub async fn display_label(&self, owner: &str) -> Option<String> {
        match self.try_lookup(owner).await {
            Ok(label) => Some(label),
            Err(e) => {
                log::debug!("player lookup failed for {owner}: {e:#}");
                None
            }
        }
    }

    async fn try_lookup(&self, owner: &str) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.base_url, owner);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("player endpoint returned {}", response.status());
        }
        let body: PlayerResponse = response.json().await?;
        if !body.success {
            anyhow::bail!("player lookup unsuccessful");
        }
        let data = body.data.context("player payload missing data")?;
        Ok(format!(
            "{} {}",
            strip_format_codes(&data.formatted_level),
            data.name
        ))
    }
}
