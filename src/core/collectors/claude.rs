use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::auth::CredentialChain;
use crate::core::collectors::claude_api::{DisabledUsageApi, OAuthUsageApi, UsageApi};
use crate::core::collectors::{collect_files, read_text_lossy, Collector, Service};
use crate::core::config::AppConfig;
use crate::core::models::usage::{merge_models, DailyUsage, ModelTokens, RateLimit, ServiceUsage};

// ── Stats cache structs ───────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StatsCache {
    daily_activity: Vec<Value>,
    daily_model_tokens: Vec<Value>,
    model_usage: BTreeMap<String, Value>,
    hour_counts: BTreeMap<String, Value>,
    total_messages: Option<Value>,
    total_sessions: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRaw {
    date: String,
    #[serde(default)]
    message_count: u64,
    #[serde(default)]
    session_count: u64,
    #[serde(default)]
    tool_call_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayTokensRaw {
    date: String,
    #[serde(default)]
    tokens_by_model: BTreeMap<String, u64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ModelUsageRaw {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: u64,
    cache_creation_input_tokens: u64,
}

// ── Transcript structs ────────────────────────────────────────────────

#[derive(Deserialize)]
struct TranscriptLine {
    #[serde(rename = "type")]
    line_type: Option<String>,
    message: Option<TranscriptMessage>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<TranscriptUsage>,
}

#[derive(Deserialize)]
struct TranscriptUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

/// One assistant turn with usage, as read from a session transcript.
#[derive(Debug, Clone)]
struct TranscriptEntry {
    timestamp: DateTime<Utc>,
    tokens: ModelTokens,
    dedup_key: Option<(String, String)>,
}

struct WindowSpec {
    name: &'static str,
    minutes: i64,
}

const WINDOWS: [WindowSpec; 2] = [
    WindowSpec {
        name: "5h window",
        minutes: 300,
    },
    WindowSpec {
        name: "7d window",
        minutes: 10080,
    },
];

#[derive(Debug, Clone)]
pub struct ClaudePaths {
    pub stats_file: PathBuf,
    pub projects_dir: PathBuf,
}

impl ClaudePaths {
    pub fn from_home(home: &Path) -> Self {
        Self {
            stats_file: home.join("stats-cache.json"),
            projects_dir: home.join("projects"),
        }
    }
}

pub struct ClaudeCollector {
    paths: ClaudePaths,
    api: Box<dyn UsageApi>,
}

impl ClaudeCollector {
    pub fn new(paths: ClaudePaths, api: Box<dyn UsageApi>) -> Self {
        Self { paths, api }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let home = config.claude_home();
        let api: Box<dyn UsageApi> = if config.claude.remote_usage {
            let credentials = Arc::new(CredentialChain::claude_default(home.clone()));
            let timeout = std::time::Duration::from_secs(config.claude.timeout_secs);
            match OAuthUsageApi::new(credentials, timeout) {
                Ok(api) => Box::new(api),
                Err(e) => {
                    tracing::warn!("remote Claude usage disabled: {:#}", e);
                    Box::new(DisabledUsageApi)
                }
            }
        } else {
            Box::new(DisabledUsageApi)
        };
        Self::new(ClaudePaths::from_home(&home), api)
    }
}

#[async_trait]
impl Collector for ClaudeCollector {
    fn service(&self) -> Service {
        Service::Claude
    }

    async fn collect(&self) -> ServiceUsage {
        let paths = self.paths.clone();
        let local = tokio::task::spawn_blocking(move || collect_local(&paths, Utc::now())).await;
        let mut usage = match local {
            Ok(Some(usage)) => usage,
            Ok(None) => return ServiceUsage::empty(Service::Claude.id()),
            Err(e) => {
                tracing::error!("claude scan aborted: {}", e);
                return ServiceUsage::empty(Service::Claude.id());
            }
        };

        match self.api.fetch_windows().await {
            Ok(remote) => {
                let local_windows = std::mem::take(&mut usage.rate_limits);
                usage.rate_limits = merge_windows(local_windows, remote);
            }
            Err(e) => tracing::debug!("remote Claude usage unavailable: {:#}", e),
        }
        usage
    }
}

/// Build the local record. `None` means the stats file is missing or
/// unreadable, i.e. there is no Claude data at all.
fn collect_local(paths: &ClaudePaths, now: DateTime<Utc>) -> Option<ServiceUsage> {
    if !paths.stats_file.exists() {
        tracing::debug!("no Claude stats at {}", paths.stats_file.display());
        return None;
    }
    let content = read_text_lossy(&paths.stats_file)?;
    let mut usage = match parse_stats(&content) {
        Ok(usage) => usage,
        Err(e) => {
            tracing::warn!("ignoring corrupt {}: {}", paths.stats_file.display(), e);
            return None;
        }
    };

    if paths.projects_dir.is_dir() {
        let entries = scan_transcripts(&paths.projects_dir);
        usage.rate_limits = compute_windows(&entries, now);
    }
    Some(usage)
}

fn is_iso_date(date: &str) -> bool {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

fn parse_activity(value: &Value) -> Option<DailyUsage> {
    let raw: ActivityRaw = serde_json::from_value(value.clone()).ok()?;
    if !is_iso_date(&raw.date) {
        return None;
    }
    Some(DailyUsage {
        message_count: raw.message_count,
        session_count: raw.session_count,
        tool_call_count: raw.tool_call_count,
        ..DailyUsage::new(raw.date)
    })
}

fn parse_day_tokens(value: &Value) -> Option<(String, u64)> {
    let raw: DayTokensRaw = serde_json::from_value(value.clone()).ok()?;
    Some((raw.date, raw.tokens_by_model.values().sum()))
}

fn parse_model_usage(model: &str, value: &Value) -> Option<ModelTokens> {
    let raw: ModelUsageRaw = serde_json::from_value(value.clone()).ok()?;
    Some(ModelTokens {
        model: model.to_string(),
        input_tokens: raw.input_tokens,
        output_tokens: raw.output_tokens,
        cache_read_tokens: raw.cache_read_input_tokens,
        cache_creation_tokens: raw.cache_creation_input_tokens,
    })
}

/// Normalize the stats cache. Individual malformed entries are dropped.
fn parse_stats(content: &str) -> serde_json::Result<ServiceUsage> {
    let stats: StatsCache = serde_json::from_str(content)?;

    let mut days: Vec<DailyUsage> = stats.daily_activity.iter().filter_map(parse_activity).collect();

    let mut tokens_by_date: HashMap<String, u64> = HashMap::new();
    for (date, total) in stats.daily_model_tokens.iter().filter_map(parse_day_tokens) {
        *tokens_by_date.entry(date).or_insert(0) += total;
    }
    // Token totals only land on dates that also have activity
    for day in &mut days {
        day.token_count = tokens_by_date.get(&day.date).copied().unwrap_or(0);
    }

    let models: Vec<ModelTokens> = stats
        .model_usage
        .iter()
        .filter_map(|(model, value)| parse_model_usage(model, value))
        .collect();

    let hour_counts: BTreeMap<String, u64> = stats
        .hour_counts
        .iter()
        .filter_map(|(hour, count)| count.as_u64().map(|c| (hour.clone(), c)))
        .collect();

    let mut usage = ServiceUsage::empty(Service::Claude.id());
    usage.set_daily(days);
    usage.set_models(models);
    usage.total_tokens = usage.model_tokens.iter().map(ModelTokens::billable).sum();
    usage.total_messages = stats.total_messages.as_ref().and_then(Value::as_u64).unwrap_or(0);
    usage.total_sessions = stats.total_sessions.as_ref().and_then(Value::as_u64).unwrap_or(0);
    usage.hour_counts = hour_counts;
    Ok(usage)
}

fn parse_transcript_line(line: &str) -> Option<TranscriptEntry> {
    // Cheap pre-filter before paying for a JSON parse
    if !line.contains("\"assistant\"") {
        return None;
    }
    let parsed: TranscriptLine = serde_json::from_str(line).ok()?;
    if parsed.line_type.as_deref() != Some("assistant") {
        return None;
    }
    let timestamp = parsed
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())?
        .with_timezone(&Utc);
    let message = parsed.message?;
    let usage = message.usage?;

    let dedup_key = match (&message.id, &parsed.request_id) {
        (None, None) => None,
        (id, req) => Some((id.clone().unwrap_or_default(), req.clone().unwrap_or_default())),
    };

    Some(TranscriptEntry {
        timestamp,
        tokens: ModelTokens {
            model: message.model.unwrap_or_else(|| "unknown".to_string()),
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
        },
        dedup_key,
    })
}

/// Parse one transcript. Streaming chunks of the same message repeat the
/// message id + request id; only the last chunk counts.
fn parse_transcript(content: &str) -> Vec<TranscriptEntry> {
    let mut entries: Vec<TranscriptEntry> = Vec::new();
    let mut seen: HashMap<(String, String), usize> = HashMap::new();

    for entry in content.lines().filter_map(parse_transcript_line) {
        match entry.dedup_key.clone() {
            Some(key) => match seen.get(&key) {
                Some(&idx) => entries[idx] = entry,
                None => {
                    seen.insert(key, entries.len());
                    entries.push(entry);
                }
            },
            None => entries.push(entry),
        }
    }
    entries
}

fn scan_transcripts(projects_dir: &Path) -> Vec<TranscriptEntry> {
    collect_files(projects_dir, "jsonl", 8)
        .into_iter()
        .filter(|path| !path.to_string_lossy().contains("tool-results"))
        .filter_map(|path| read_text_lossy(&path))
        .flat_map(|content| parse_transcript(&content))
        .collect()
}

/// Trailing-window token totals anchored at `now`.
fn compute_windows(entries: &[TranscriptEntry], now: DateTime<Utc>) -> Vec<RateLimit> {
    WINDOWS
        .iter()
        .map(|spec| {
            let length = Duration::minutes(spec.minutes);
            let start = now - length;
            let in_window: Vec<&TranscriptEntry> =
                entries.iter().filter(|e| e.timestamp >= start).collect();

            let resets_at = in_window
                .iter()
                .map(|e| e.timestamp)
                .min()
                .map(|oldest| (oldest + length).to_rfc3339_opts(SecondsFormat::Secs, true));
            let breakdown = merge_models(in_window.iter().map(|e| e.tokens.clone()));

            RateLimit {
                name: spec.name.to_string(),
                used_percent: 0.0,
                window_minutes: spec.minutes as u64,
                resets_at,
                used_tokens: breakdown.iter().map(ModelTokens::billable).sum(),
                model_breakdown: breakdown,
            }
        })
        .collect()
}

/// Overlay remote percentages onto local windows of the same name, keeping
/// local token counts; remote-only windows are appended.
pub fn merge_windows(local: Vec<RateLimit>, remote: Vec<RateLimit>) -> Vec<RateLimit> {
    let mut unmatched: Vec<Option<RateLimit>> = remote.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(local.len() + unmatched.len());

    for mut window in local {
        let matched = unmatched
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|r| r.name == window.name))
            .and_then(Option::take);
        if let Some(remote) = matched {
            window.used_percent = remote.used_percent;
            window.resets_at = remote.resets_at.or(window.resets_at);
        }
        merged.push(window);
    }

    merged.extend(unmatched.into_iter().flatten());
    merged
}
