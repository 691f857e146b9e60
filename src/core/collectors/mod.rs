pub mod antigravity;
pub mod claude;
pub mod claude_api;
pub mod codex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::config::AppConfig;
use crate::core::models::usage::ServiceUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Claude,
    Codex,
    Antigravity,
}

impl Service {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "claude" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "antigravity" => Some(Self::Antigravity),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Antigravity => "antigravity",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Antigravity => "Antigravity",
        }
    }

    /// All services in display order.
    pub fn all() -> &'static [Service] {
        &[Service::Claude, Service::Codex, Service::Antigravity]
    }

    pub fn source_hint(&self) -> &'static str {
        match self {
            Self::Claude => "~/.claude/stats-cache.json + projects/*.jsonl",
            Self::Codex => "~/.codex/sessions/YYYY/MM/DD/*.jsonl",
            Self::Antigravity => "~/.gemini/antigravity/{conversations,implicit,daemon}",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// One independent parser unit: reads a tool's files and normalizes them.
///
/// `collect` never fails. Missing or unreadable sources produce
/// [`ServiceUsage::empty`].
#[async_trait]
pub trait Collector: Send + Sync {
    fn service(&self) -> Service;

    async fn collect(&self) -> ServiceUsage;
}

/// Build the collectors for every enabled service, in display order.
pub fn from_config(config: &AppConfig) -> Vec<Box<dyn Collector>> {
    config
        .enabled_services()
        .into_iter()
        .map(|service| -> Box<dyn Collector> {
            match service {
                Service::Claude => Box::new(claude::ClaudeCollector::from_config(config)),
                Service::Codex => Box::new(codex::CodexCollector::new(config.codex_home())),
                Service::Antigravity => Box::new(antigravity::AntigravityCollector::new(
                    config.antigravity_home(),
                )),
            }
        })
        .collect()
}

/// Run a blocking scan on the blocking pool. A panicking scan degrades to an
/// empty record for that service instead of taking the refresh down.
pub(crate) async fn run_blocking<F>(service: Service, scan: F) -> ServiceUsage
where
    F: FnOnce() -> ServiceUsage + Send + 'static,
{
    match tokio::task::spawn_blocking(scan).await {
        Ok(usage) => usage,
        Err(e) => {
            tracing::error!("{} scan aborted: {}", service, e);
            ServiceUsage::empty(service.id())
        }
    }
}

/// Recursively collect files with the given extension up to `max_depth`
/// directory levels deep. Unreadable directories are skipped.
pub(crate) fn collect_files(dir: &Path, extension: &str, max_depth: u32) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files_into(dir, extension, max_depth, &mut files);
    files.sort();
    files
}

fn collect_files_into(dir: &Path, extension: &str, max_depth: u32, files: &mut Vec<PathBuf>) {
    if max_depth == 0 {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("skipping {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        } else if path.is_dir() {
            collect_files_into(&path, extension, max_depth - 1, files);
        }
    }
}

/// Read a text file, replacing invalid UTF-8 instead of failing.
pub(crate) fn read_text_lossy(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::debug!("skipping unreadable {}: {}", path.display(), e);
            None
        }
    }
}
