use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::core::collectors::{Collector, Service};
use crate::core::models::usage::{ServiceUsage, UsageSummary};
use crate::core::store::{SnapshotStore, StoreError};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Unknown service: {0}")]
    UnknownService(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collectors plus the snapshot cache they refresh.
pub struct UsageMonitor {
    store: SnapshotStore,
    collectors: Vec<Box<dyn Collector>>,
}

impl UsageMonitor {
    pub fn new(store: SnapshotStore, collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { store, collectors }
    }

    pub fn services(&self) -> Vec<Service> {
        self.collectors.iter().map(|c| c.service()).collect()
    }

    fn collector(&self, name: &str) -> Option<&dyn Collector> {
        let service = Service::from_id(name)?;
        self.collectors
            .iter()
            .find(|c| c.service() == service)
            .map(|c| c.as_ref())
    }

    /// Run every collector in order and overwrite the cache. All rows share
    /// one `updated_at`.
    pub async fn refresh_all(&self) -> Result<UsageSummary, MonitorError> {
        let refreshed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut services = Vec::with_capacity(self.collectors.len());
        for collector in &self.collectors {
            let started = std::time::Instant::now();
            let usage = collector.collect().await;
            tracing::info!(
                "collected {} ({} days, {} tokens) in {:?}",
                collector.service(),
                usage.daily_usage.len(),
                usage.total_tokens,
                started.elapsed()
            );
            services.push(usage);
        }
        self.store.put_all(&services, &refreshed_at).await?;
        Ok(UsageSummary {
            services,
            last_refreshed: Some(refreshed_at),
        })
    }

    /// Cached summary, one record per configured service. Rows for services
    /// that are no longer configured are ignored; if any configured service
    /// has no row, every collector runs once.
    pub async fn summary(&self) -> Result<UsageSummary, MonitorError> {
        let order = self.services();
        let mut snapshots: Vec<_> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter_map(|s| {
                let service = Service::from_id(&s.usage.service)?;
                let rank = order.iter().position(|o| *o == service)?;
                Some((rank, s))
            })
            .collect();
        if snapshots.len() < order.len() {
            tracing::debug!(
                "cache holds {} of {} services, refreshing",
                snapshots.len(),
                order.len()
            );
            return self.refresh_all().await;
        }
        snapshots.sort_by_key(|(rank, _)| *rank);

        let last_refreshed = snapshots.iter().map(|(_, s)| s.updated_at.clone()).max();
        Ok(UsageSummary {
            services: snapshots.into_iter().map(|(_, s)| s.usage).collect(),
            last_refreshed,
        })
    }

    /// Cached record for one service. A known service with no cached row is
    /// collected on demand and not written back.
    pub async fn service_usage(&self, name: &str) -> Result<ServiceUsage, MonitorError> {
        let collector = self
            .collector(name)
            .ok_or_else(|| MonitorError::UnknownService(name.to_string()))?;
        let service = collector.service();

        if let Some(snapshot) = self.store.get(service.id()).await? {
            return Ok(snapshot.usage);
        }
        tracing::debug!("no cached {}, collecting", service);
        Ok(collector.collect().await)
    }

    pub fn close(self) -> Result<(), MonitorError> {
        self.store.close()?;
        Ok(())
    }
}
