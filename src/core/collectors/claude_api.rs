//! Live window percentages from the Anthropic OAuth usage endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::core::auth::CredentialSource;
use crate::core::models::usage::RateLimit;

const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// Source of remotely reported rate-limit windows.
#[async_trait]
pub trait UsageApi: Send + Sync {
    async fn fetch_windows(&self) -> Result<Vec<RateLimit>>;
}

/// Used when remote usage is turned off in config.
pub struct DisabledUsageApi;

#[async_trait]
impl UsageApi for DisabledUsageApi {
    async fn fetch_windows(&self) -> Result<Vec<RateLimit>> {
        Ok(Vec::new())
    }
}

#[derive(Deserialize)]
struct WindowRaw {
    utilization: Option<f64>,
    resets_at: Option<String>,
}

#[derive(Deserialize)]
struct UsageResponse {
    five_hour: Option<WindowRaw>,
    seven_day: Option<WindowRaw>,
    seven_day_opus: Option<WindowRaw>,
    seven_day_sonnet: Option<WindowRaw>,
}

fn to_rate_limit(name: &str, window_minutes: u64, raw: WindowRaw) -> RateLimit {
    // Normalise to RFC 3339 UTC so remote and local resets compare equal.
    let resets_at = raw.resets_at.map(|s| {
        s.parse::<DateTime<Utc>>()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or(s)
    });
    RateLimit {
        name: name.to_string(),
        used_percent: raw.utilization.unwrap_or(0.0).clamp(0.0, 100.0),
        window_minutes,
        resets_at,
        ..Default::default()
    }
}

fn windows_from_response(data: UsageResponse) -> Vec<RateLimit> {
    let named = [
        ("5h window", 300, data.five_hour),
        ("7d window", 10080, data.seven_day),
        ("7d opus", 10080, data.seven_day_opus),
        ("7d sonnet", 10080, data.seven_day_sonnet),
    ];
    named
        .into_iter()
        .filter_map(|(name, minutes, raw)| raw.map(|w| to_rate_limit(name, minutes, w)))
        .collect()
}

/// Queries the usage endpoint with an OAuth token from `credentials`.
pub struct OAuthUsageApi {
    client: reqwest::Client,
    url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl OAuthUsageApi {
    pub fn new(credentials: Arc<dyn CredentialSource>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: USAGE_URL.to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl UsageApi for OAuthUsageApi {
    async fn fetch_windows(&self) -> Result<Vec<RateLimit>> {
        // Keychain lookups can block on an OS prompt.
        let credentials = Arc::clone(&self.credentials);
        let token = tokio::task::spawn_blocking(move || credentials.access_token())
            .await
            .context("Credential lookup task failed")?
            .context("Failed to read Claude credentials")?;

        let response = self
            .client
            .get(&self.url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .send()
            .await
            .context("Failed to send request to Claude usage API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Claude usage API returned HTTP {}", status.as_u16());
        }

        let data: UsageResponse = response
            .json()
            .await
            .context("Failed to parse Claude usage response")?;
        Ok(windows_from_response(data))
    }
}
