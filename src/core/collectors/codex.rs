use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::core::collectors::{collect_files, run_blocking, Collector, Service};
use crate::core::models::usage::{DailyUsage, ModelTokens, RateLimit, ServiceUsage};

// ── Session JSONL structs ─────────────────────────────────────────────

#[derive(Deserialize)]
struct CodexLine {
    #[serde(rename = "type")]
    line_type: Option<String>,
    timestamp: Option<String>,
    payload: Option<CodexPayload>,
}

#[derive(Deserialize)]
struct CodexPayload {
    #[serde(rename = "type")]
    payload_type: Option<String>,
    timestamp: Option<String>,
    model: Option<String>,
    info: Option<CodexTokenInfo>,
    rate_limits: Option<Value>,
}

#[derive(Deserialize)]
struct CodexTokenInfo {
    last_token_usage: Option<CodexTokenUsage>,
}

#[derive(Deserialize)]
struct CodexTokenUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cached_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct CodexWindowRaw {
    used_percent: Option<f64>,
    window_minutes: Option<u64>,
    resets_at: Option<f64>,
}

/// Everything learned from one session file.
#[derive(Debug, Default)]
struct SessionStats {
    messages: u64,
    input_tokens: u64,
    output_tokens: u64,
    models: HashMap<String, ModelTokens>,
    hours: Vec<u32>,
    /// Latest `rate_limits` payload with the event timestamp it came from
    rate_limits: Option<(String, Value)>,
}

impl SessionStats {
    fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub struct CodexCollector {
    sessions_dir: PathBuf,
}

impl CodexCollector {
    pub fn new(home: PathBuf) -> Self {
        Self {
            sessions_dir: home.join("sessions"),
        }
    }
}

#[async_trait]
impl Collector for CodexCollector {
    fn service(&self) -> Service {
        Service::Codex
    }

    async fn collect(&self) -> ServiceUsage {
        let dir = self.sessions_dir.clone();
        run_blocking(Service::Codex, move || scan_sessions(&dir)).await
    }
}

/// Date from `sessions/YYYY/MM/DD/<file>.jsonl`. Anything else has no date.
fn date_from_path(sessions_dir: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(sessions_dir).ok()?;
    let dirs: Vec<&str> = relative
        .parent()?
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if dirs.len() < 3 {
        return None;
    }
    let date = format!("{}-{}-{}", dirs[0], dirs[1], dirs[2]);
    NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
    Some(date)
}

/// Hour of day from an ISO timestamp, read positionally.
fn hour_of(timestamp: &str) -> Option<u32> {
    timestamp.get(11..13)?.parse().ok()
}

/// Fast ASCII check before paying for a JSON parse.
fn is_candidate_line(line: &str) -> bool {
    line.contains("\"session_meta\"") || line.contains("\"turn_context\"") || line.contains("\"event_msg\"")
}

fn apply_line(stats: &mut SessionStats, current_model: &mut Option<String>, line: CodexLine) {
    let Some(payload) = line.payload else {
        return;
    };
    match line.line_type.as_deref() {
        Some("session_meta") => {
            if let Some(hour) = payload.timestamp.as_deref().and_then(hour_of) {
                stats.hours.push(hour);
            }
        }
        Some("turn_context") => {
            if let Some(model) = payload.model.filter(|m| !m.is_empty()) {
                *current_model = Some(model);
            }
        }
        Some("event_msg") => match payload.payload_type.as_deref() {
            Some("user_message") => stats.messages += 1,
            Some("token_count") => {
                let usage = payload.info.and_then(|i| i.last_token_usage);
                if let Some(usage) = usage {
                    let input = usage.input_tokens.unwrap_or(0);
                    let output = usage.output_tokens.unwrap_or(0);
                    stats.input_tokens += input;
                    stats.output_tokens += output;
                    if let Some(model) = current_model.as_deref() {
                        let entry = stats
                            .models
                            .entry(model.to_string())
                            .or_insert_with(|| ModelTokens::new(model));
                        entry.input_tokens += input;
                        entry.output_tokens += output;
                        entry.cache_read_tokens += usage.cached_input_tokens.unwrap_or(0);
                    }
                }

                let ts = line.timestamp.unwrap_or_default();
                let limits = payload
                    .rate_limits
                    .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
                    .filter(|_| !ts.is_empty());
                if let Some(limits) = limits {
                    let newer = stats
                        .rate_limits
                        .as_ref()
                        .map_or(true, |(seen, _)| ts > *seen);
                    if newer {
                        stats.rate_limits = Some((ts, limits));
                    }
                }
            }
            _ => {}
        },
        _ => {}
    }
}

/// Parse one session file. Lines that are not valid JSON are skipped.
fn parse_session<R: BufRead>(mut reader: R) -> std::io::Result<SessionStats> {
    let mut stats = SessionStats::default();
    let mut current_model: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let bytes_read = reader.read_until(b'\n', &mut buf)?;
        if bytes_read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() || !is_candidate_line(line) {
            continue;
        }
        let parsed: CodexLine = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(_) => continue,
        };
        apply_line(&mut stats, &mut current_model, parsed);
    }
    Ok(stats)
}

fn parse_session_file(path: &Path) -> std::io::Result<SessionStats> {
    let file = std::fs::File::open(path)?;
    parse_session(std::io::BufReader::new(file))
}

fn window_from_raw(name: &str, raw: &Value) -> Option<RateLimit> {
    let raw: CodexWindowRaw = serde_json::from_value(raw.clone()).ok()?;
    let resets_at = raw
        .resets_at
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true));
    Some(RateLimit {
        name: name.to_string(),
        used_percent: raw.used_percent.unwrap_or(0.0),
        window_minutes: raw.window_minutes.unwrap_or(0),
        resets_at,
        ..Default::default()
    })
}

fn rate_limits_from_payload(payload: &Value) -> Vec<RateLimit> {
    [("primary", "5h window"), ("secondary", "7d window")]
        .into_iter()
        .filter_map(|(key, name)| {
            payload
                .get(key)
                .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
                .and_then(|v| window_from_raw(name, v))
        })
        .collect()
}

fn scan_sessions(sessions_dir: &Path) -> ServiceUsage {
    if !sessions_dir.is_dir() {
        tracing::debug!("no Codex sessions at {}", sessions_dir.display());
        return ServiceUsage::empty(Service::Codex.id());
    }

    let mut days: BTreeMap<String, DailyUsage> = BTreeMap::new();
    let mut models: Vec<ModelTokens> = Vec::new();
    let mut hour_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut latest_limits: Option<(String, Value)> = None;
    let mut total_messages = 0;
    let mut total_sessions = 0;
    let mut total_tokens = 0;

    for path in collect_files(sessions_dir, "jsonl", 6) {
        let Some(date) = date_from_path(sessions_dir, &path) else {
            tracing::debug!("skipping undated session {}", path.display());
            continue;
        };
        let stats = match parse_session_file(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };

        let day = days
            .entry(date.clone())
            .or_insert_with(|| DailyUsage::new(date));
        day.message_count += stats.messages;
        day.session_count += 1;
        day.token_count += stats.tokens();

        total_messages += stats.messages;
        total_sessions += 1;
        total_tokens += stats.tokens();

        for hour in &stats.hours {
            *hour_counts.entry(hour.to_string()).or_insert(0) += 1;
        }
        models.extend(stats.models.into_values());

        if let Some((ts, limits)) = stats.rate_limits {
            let newer = latest_limits.as_ref().map_or(true, |(seen, _)| ts > *seen);
            if newer {
                latest_limits = Some((ts, limits));
            }
        }
    }

    let mut usage = ServiceUsage::empty(Service::Codex.id());
    usage.set_daily(days.into_values());
    usage.set_models(models);
    usage.total_messages = total_messages;
    usage.total_sessions = total_sessions;
    usage.total_tokens = total_tokens;
    usage.hour_counts = hour_counts;
    usage.rate_limits = latest_limits
        .map(|(_, limits)| rate_limits_from_payload(&limits))
        .unwrap_or_default();
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_lines(model: &str, ts: &str, input: u64, output: u64) -> Vec<String> {
        vec![
            format!(r#"{{"type":"session_meta","timestamp":"{ts}","payload":{{"id":"s1","timestamp":"{ts}"}}}}"#),
            format!(r#"{{"type":"turn_context","timestamp":"{ts}","payload":{{"model":"{model}"}}}}"#),
            format!(r#"{{"type":"event_msg","timestamp":"{ts}","payload":{{"type":"user_message","message":"hi"}}}}"#),
            format!(
                r#"{{"type":"event_msg","timestamp":"{ts}","payload":{{"type":"token_count","info":{{"last_token_usage":{{"input_tokens":{input},"output_tokens":{output},"cached_input_tokens":5}}}}}}}}"#
            ),
        ]
    }

    fn write_session(sessions: &Path, rel: &str, lines: &[String]) {
        let path = sessions.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn limits_line(ts: &str, primary_pct: f64) -> String {
        format!(
            r#"{{"type":"event_msg","timestamp":"{ts}","payload":{{"type":"token_count","info":null,"rate_limits":{{"primary":{{"used_percent":{primary_pct},"window_minutes":300,"resets_at":1735689600}},"secondary":{{"used_percent":7.0,"window_minutes":10080}}}}}}}}"#
        )
    }

    #[test]
    fn date_from_path_requires_three_date_segments() {
        let base = Path::new("/s");
        assert_eq!(
            date_from_path(base, Path::new("/s/2026/02/24/rollout.jsonl")).as_deref(),
            Some("2026-02-24")
        );
        assert_eq!(date_from_path(base, Path::new("/s/2026/02/rollout.jsonl")), None);
        assert_eq!(date_from_path(base, Path::new("/s/2026/13/40/rollout.jsonl")), None);
        assert_eq!(date_from_path(base, Path::new("/s/misc/a/b/rollout.jsonl")), None);
    }

    #[test]
    fn hour_of_reads_positionally() {
        assert_eq!(hour_of("2026-02-24T09:15:00Z"), Some(9));
        assert_eq!(hour_of("2026-02-24"), None);
    }

    #[test]
    fn parse_session_counts_messages_tokens_and_models() {
        let mut lines = session_lines("gpt-5-codex", "2026-02-24T14:00:00Z", 100, 20);
        lines.push(
            r#"{"type":"event_msg","timestamp":"2026-02-24T14:01:00Z","payload":{"type":"token_count","info":{"last_token_usage":{"input_tokens":50,"output_tokens":10}}}}"#
                .to_string(),
        );
        let stats = parse_session(lines.join("\n").as_bytes()).unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.tokens(), 180);
        assert_eq!(stats.hours, vec![14]);
        let model = &stats.models["gpt-5-codex"];
        assert_eq!(model.input_tokens, 150);
        assert_eq!(model.output_tokens, 30);
        assert_eq!(model.cache_read_tokens, 5);
    }

    #[test]
    fn tokens_before_turn_context_have_no_model() {
        let line = r#"{"type":"event_msg","timestamp":"t","payload":{"type":"token_count","info":{"last_token_usage":{"input_tokens":9,"output_tokens":1}}}}"#;
        let stats = parse_session(line.as_bytes()).unwrap();
        assert_eq!(stats.tokens(), 10);
        assert!(stats.models.is_empty());
    }

    #[test]
    fn corrupt_line_does_not_abort_session() {
        let mut lines = session_lines("gpt-5", "2026-02-24T10:00:00Z", 10, 10);
        lines.insert(2, r#"{"type":"event_msg", broken"#.to_string());
        lines.insert(3, "\u{fffd}\u{fffd} not json at all".to_string());
        let stats = parse_session(lines.join("\n").as_bytes()).unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.tokens(), 20);
    }

    #[test]
    fn rate_limits_map_primary_and_secondary() {
        let payload: Value = serde_json::from_str(
            r#"{"primary":{"used_percent":42.5,"window_minutes":300,"resets_at":1735689600},
                "secondary":{"used_percent":7.0,"window_minutes":10080}}"#,
        )
        .unwrap();
        let limits = rate_limits_from_payload(&payload);
        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].name, "5h window");
        assert!((limits[0].used_percent - 42.5).abs() < 1e-10);
        assert_eq!(limits[0].resets_at.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(limits[1].name, "7d window");
        assert_eq!(limits[1].window_minutes, 10080);
        assert!(limits[1].resets_at.is_none());
    }

    #[test]
    fn rate_limits_skip_missing_keys() {
        let payload: Value = serde_json::from_str(r#"{"primary":{},"secondary":null}"#).unwrap();
        assert!(rate_limits_from_payload(&payload).is_empty());
    }

    #[test]
    fn scan_missing_dir_is_empty() {
        let usage = scan_sessions(Path::new("/nonexistent/codex/sessions"));
        assert_eq!(usage, ServiceUsage::empty("codex"));
    }

    #[test]
    fn scan_aggregates_by_path_date() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path();
        write_session(
            sessions,
            "2026/02/24/a.jsonl",
            &session_lines("gpt-5", "2026-02-24T09:00:00Z", 100, 10),
        );
        write_session(
            sessions,
            "2026/02/24/b.jsonl",
            &session_lines("gpt-5-codex", "2026-02-24T09:30:00Z", 10, 1),
        );
        write_session(
            sessions,
            "2026/02/20/c.jsonl",
            &session_lines("gpt-5", "2026-02-19T23:00:00Z", 1, 1),
        );
        write_session(sessions, "loose.jsonl", &session_lines("gpt-5", "2026-02-24T09:00:00Z", 999, 999));

        let usage = scan_sessions(sessions);
        assert_eq!(usage.service, "codex");
        let dates: Vec<&str> = usage.daily_usage.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-02-20", "2026-02-24"]);
        assert_eq!(usage.first_date.as_deref(), Some("2026-02-20"));
        assert_eq!(usage.last_date.as_deref(), Some("2026-02-24"));

        let feb24 = &usage.daily_usage[1];
        assert_eq!(feb24.session_count, 2);
        assert_eq!(feb24.message_count, 2);
        assert_eq!(feb24.token_count, 121);

        assert_eq!(usage.total_sessions, 3);
        assert_eq!(usage.total_messages, 3);
        assert_eq!(usage.total_tokens, 123);
        assert_eq!(usage.hour_counts.get("9"), Some(&2));
        assert_eq!(usage.hour_counts.get("23"), Some(&1));

        let gpt5 = usage.model_tokens.iter().find(|m| m.model == "gpt-5").unwrap();
        assert_eq!(gpt5.input_tokens, 101);
        assert_eq!(usage.model_tokens.len(), 2);
        assert!(usage.rate_limits.is_empty());
    }

    #[test]
    fn scan_reports_latest_rate_limits_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path();
        write_session(sessions, "2026/02/24/a.jsonl", &[limits_line("2026-02-24T12:00:00Z", 90.0)]);
        write_session(
            sessions,
            "2026/02/25/b.jsonl",
            &[
                limits_line("2026-02-24T08:00:00Z", 10.0),
                limits_line("2026-02-24T09:00:00Z", 20.0),
            ],
        );

        let usage = scan_sessions(sessions);
        assert_eq!(usage.rate_limits.len(), 2);
        assert!((usage.rate_limits[0].used_percent - 90.0).abs() < 1e-10);
    }

    #[test]
    fn empty_or_unstamped_rate_limits_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path();
        write_session(
            sessions,
            "2026/02/24/a.jsonl",
            &[
                r#"{"type":"event_msg","payload":{"type":"token_count","rate_limits":{"primary":{"used_percent":99.0}}}}"#.to_string(),
                limits_line("2026-02-24T08:00:00Z", 40.0),
                r#"{"type":"event_msg","timestamp":"2026-02-24T09:00:00Z","payload":{"type":"token_count","rate_limits":{}}}"#.to_string(),
            ],
        );

        let usage = scan_sessions(sessions);
        assert_eq!(usage.rate_limits.len(), 2);
        assert!((usage.rate_limits[0].used_percent - 40.0).abs() < 1e-10);
    }
}
