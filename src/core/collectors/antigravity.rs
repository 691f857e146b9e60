//! Antigravity keeps no usage ledger, so activity is inferred from two
//! side channels: protobuf conversation artifacts on disk and the language
//! server daemon's glog output.
//!
//! Per-model figures are planner *request counts* stored in
//! `ModelTokens::input_tokens`; no real token counts are available.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::core::collectors::{collect_files, read_text_lossy, run_blocking, Collector, Service};
use crate::core::models::usage::{DailyUsage, ModelTokens, ServiceUsage};

const ARTIFACT_DIRS: [&str; 2] = ["conversations", "implicit"];
const ARTIFACT_EXTENSION: &str = "pb";

/// Model name announced on capacity / error lines.
const MODEL_PATTERN: &str = r#"(?i)(?:capacity|error).*?\bmodel\b["']?\s*[:=]\s*["']?([\w.\-/]+)"#;
/// glog prefix `Lmmdd hh:mm:ss.uuuuuu` followed by a planner request marker.
const PLANNER_PATTERN: &str =
    r"^[IWEF]([0-9]{4}) [0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]+\s.*(?i:planner[ _]?request)";

pub struct AntigravityCollector {
    base_dir: PathBuf,
}

impl AntigravityCollector {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

#[async_trait]
impl Collector for AntigravityCollector {
    fn service(&self) -> Service {
        Service::Antigravity
    }

    async fn collect(&self) -> ServiceUsage {
        let base = self.base_dir.clone();
        let year = Local::now().year();
        run_blocking(Service::Antigravity, move || scan_base(&base, year)).await
    }
}

/// One `.pb` artifact reduced to what we bucket on.
#[derive(Debug, Clone)]
struct Artifact {
    modified: DateTime<Local>,
    size: u64,
}

fn read_artifact(path: &Path) -> Option<Artifact> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("skipping {}: {}", path.display(), e);
            return None;
        }
    };
    let modified = meta.modified().ok()?;
    Some(Artifact {
        modified: DateTime::<Local>::from(modified),
        size: meta.len(),
    })
}

fn scan_artifacts(base: &Path) -> Vec<Artifact> {
    ARTIFACT_DIRS
        .iter()
        .map(|name| base.join(name))
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| collect_files(&dir, ARTIFACT_EXTENSION, 1))
        .filter_map(|path| read_artifact(&path))
        .collect()
}

struct LogPatterns {
    model: Regex,
    planner: Regex,
}

impl LogPatterns {
    fn new() -> Option<Self> {
        let model = Regex::new(MODEL_PATTERN).ok()?;
        let planner = Regex::new(PLANNER_PATTERN).ok()?;
        Some(Self { model, planner })
    }
}

/// Planner requests seen in the daemon logs.
#[derive(Debug, Default, PartialEq)]
struct LogActivity {
    requests_by_date: BTreeMap<String, u64>,
    requests_by_model: BTreeMap<String, u64>,
}

impl LogActivity {
    fn total(&self) -> u64 {
        self.requests_by_date.values().sum()
    }
}

/// `mmdd` from a glog prefix as `YYYY-MM-DD`, if it names a real day.
fn log_date(mmdd: &str, year: i32) -> Option<String> {
    let month: u32 = mmdd.get(..2)?.parse().ok()?;
    let day: u32 = mmdd.get(2..)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Scan one log. The active model carries forward within the file only.
fn scan_log(content: &str, patterns: &LogPatterns, year: i32, activity: &mut LogActivity) {
    let mut current_model: Option<String> = None;
    for line in content.lines() {
        if let Some(caps) = patterns.model.captures(line) {
            current_model = Some(caps[1].to_string());
        }
        let Some(caps) = patterns.planner.captures(line) else {
            continue;
        };
        let Some(date) = log_date(&caps[1], year) else {
            continue;
        };
        *activity.requests_by_date.entry(date).or_insert(0) += 1;
        if let Some(model) = &current_model {
            *activity.requests_by_model.entry(model.clone()).or_insert(0) += 1;
        }
    }
}

fn scan_logs(base: &Path, year: i32) -> LogActivity {
    let mut activity = LogActivity::default();
    let daemon_dir = base.join("daemon");
    if !daemon_dir.is_dir() {
        return activity;
    }
    let Some(patterns) = LogPatterns::new() else {
        tracing::warn!("antigravity log patterns failed to compile");
        return activity;
    };
    for path in collect_files(&daemon_dir, "log", 1) {
        if let Some(content) = read_text_lossy(&path) {
            scan_log(&content, &patterns, year, &mut activity);
        }
    }
    activity
}

/// Combine both signals. `year` dates the month-day log timestamps.
fn scan_base(base: &Path, year: i32) -> ServiceUsage {
    if !base.is_dir() {
        tracing::debug!("no Antigravity data at {}", base.display());
        return ServiceUsage::empty(Service::Antigravity.id());
    }

    let artifacts = scan_artifacts(base);
    let logs = scan_logs(base, year);

    let mut days: HashMap<String, DailyUsage> = HashMap::new();
    let mut hour_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_bytes = 0;

    for artifact in &artifacts {
        let date = artifact.modified.format("%Y-%m-%d").to_string();
        let day = days
            .entry(date.clone())
            .or_insert_with(|| DailyUsage::new(date));
        day.conversation_count += 1;
        day.session_count += 1;
        day.file_size_bytes += artifact.size;
        day.token_count += artifact.size;
        total_bytes += artifact.size;
        *hour_counts
            .entry(artifact.modified.hour().to_string())
            .or_insert(0) += 1;
    }

    for (date, requests) in &logs.requests_by_date {
        days.entry(date.clone())
            .or_insert_with(|| DailyUsage::new(date.clone()))
            .message_count += requests;
    }

    let models = logs.requests_by_model.iter().map(|(model, requests)| ModelTokens {
        input_tokens: *requests,
        ..ModelTokens::new(model.clone())
    });

    let mut usage = ServiceUsage::empty(Service::Antigravity.id());
    usage.set_daily(days.into_values());
    usage.set_models(models);
    usage.total_messages = logs.total();
    usage.total_sessions = artifacts.len() as u64;
    usage.total_tokens = total_bytes;
    usage.hour_counts = hour_counts;
    usage
}
