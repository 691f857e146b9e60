use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Activity for one service on one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyUsage {
    /// ISO date, "YYYY-MM-DD"
    pub date: String,
    pub message_count: u64,
    pub session_count: u64,
    pub tool_call_count: u64,
    pub token_count: u64,
    pub conversation_count: u64,
    pub file_size_bytes: u64,
}

impl DailyUsage {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            ..Default::default()
        }
    }

    /// Fold another entry for the same date into this one.
    pub fn absorb(&mut self, other: &DailyUsage) {
        self.message_count += other.message_count;
        self.session_count += other.session_count;
        self.tool_call_count += other.tool_call_count;
        self.token_count += other.token_count;
        self.conversation_count += other.conversation_count;
        self.file_size_bytes += other.file_size_bytes;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTokens {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl ModelTokens {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, other: &ModelTokens) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }

    /// Input plus output, the figure every total in this crate is built from.
    pub fn billable(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A named usage window, e.g. "5h window" or "7d window".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub name: String,
    /// Percentage of the window consumed (0.0 - 100.0), 0 when unknown
    pub used_percent: f64,
    pub window_minutes: u64,
    /// ISO 8601 timestamp of the next reset
    pub resets_at: Option<String>,
    /// Raw token count observed locally inside the window
    pub used_tokens: u64,
    pub model_breakdown: Vec<ModelTokens>,
}

/// Normalized usage record for one monitored tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceUsage {
    pub service: String,
    pub daily_usage: Vec<DailyUsage>,
    pub model_tokens: Vec<ModelTokens>,
    pub total_messages: u64,
    pub total_sessions: u64,
    pub total_tokens: u64,
    /// Hour of day ("0".."23") -> activity count
    pub hour_counts: BTreeMap<String, u64>,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub rate_limits: Vec<RateLimit>,
}

impl ServiceUsage {
    /// A record with no data, used whenever a service's sources are absent.
    pub fn empty(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Replace the daily series, merging entries that share a date.
    ///
    /// Keeps `daily_usage` sorted ascending and unique per date, and derives
    /// `first_date` / `last_date` from it.
    pub fn set_daily<I>(&mut self, days: I)
    where
        I: IntoIterator<Item = DailyUsage>,
    {
        let mut by_date: BTreeMap<String, DailyUsage> = BTreeMap::new();
        for day in days {
            match by_date.get_mut(&day.date) {
                Some(existing) => existing.absorb(&day),
                None => {
                    by_date.insert(day.date.clone(), day);
                }
            }
        }
        self.daily_usage = by_date.into_values().collect();
        self.first_date = self.daily_usage.first().map(|d| d.date.clone());
        self.last_date = self.daily_usage.last().map(|d| d.date.clone());
    }

    /// Replace the per-model list, merging duplicates and ordering by name.
    pub fn set_models<I>(&mut self, models: I)
    where
        I: IntoIterator<Item = ModelTokens>,
    {
        self.model_tokens = merge_models(models);
    }
}

/// Merge model entries with the same name and sort them by name.
pub fn merge_models<I>(models: I) -> Vec<ModelTokens>
where
    I: IntoIterator<Item = ModelTokens>,
{
    let mut by_model: HashMap<String, ModelTokens> = HashMap::new();
    for m in models {
        by_model
            .entry(m.model.clone())
            .or_insert_with(|| ModelTokens::new(m.model.clone()))
            .add(&m);
    }
    let mut merged: Vec<ModelTokens> = by_model.into_values().collect();
    merged.sort_by(|a, b| a.model.cmp(&b.model));
    merged
}

/// Snapshot of every enabled service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSummary {
    pub services: Vec<ServiceUsage>,
    pub last_refreshed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date: &str, messages: u64) -> DailyUsage {
        DailyUsage {
            message_count: messages,
            ..DailyUsage::new(date)
        }
    }

    #[test]
    fn set_daily_sorts_and_sets_bounds() {
        let mut usage = ServiceUsage::empty("claude");
        usage.set_daily(vec![day("2024-03-02", 1), day("2024-01-15", 2), day("2024-02-01", 3)]);

        let dates: Vec<&str> = usage.daily_usage.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-01-15", "2024-02-01", "2024-03-02"]);
        assert_eq!(usage.first_date.as_deref(), Some("2024-01-15"));
        assert_eq!(usage.last_date.as_deref(), Some("2024-03-02"));
    }

    #[test]
    fn set_daily_merges_duplicate_dates() {
        let mut usage = ServiceUsage::empty("codex");
        usage.set_daily(vec![day("2024-01-01", 2), day("2024-01-01", 5)]);
        assert_eq!(usage.daily_usage.len(), 1);
        assert_eq!(usage.daily_usage[0].message_count, 7);
    }

    #[test]
    fn set_daily_empty_clears_bounds() {
        let mut usage = ServiceUsage::empty("codex");
        usage.first_date = Some("2024-01-01".into());
        usage.set_daily(Vec::new());
        assert!(usage.daily_usage.is_empty());
        assert!(usage.first_date.is_none());
        assert!(usage.last_date.is_none());
    }

    #[test]
    fn merge_models_sums_by_name() {
        let a = ModelTokens {
            input_tokens: 10,
            output_tokens: 1,
            ..ModelTokens::new("b-model")
        };
        let b = ModelTokens {
            input_tokens: 5,
            cache_read_tokens: 7,
            ..ModelTokens::new("a-model")
        };
        let c = ModelTokens {
            input_tokens: 3,
            ..ModelTokens::new("b-model")
        };
        let merged = merge_models(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].model, "a-model");
        assert_eq!(merged[1].input_tokens, 13);
        assert_eq!(merged[1].billable(), 14);
    }

    #[test]
    fn deserialize_tolerates_missing_fields() {
        let usage: ServiceUsage = serde_json::from_str(r#"{"service":"claude"}"#).unwrap();
        assert_eq!(usage, ServiceUsage::empty("claude"));
    }

    #[test]
    fn serialized_field_names_match_api_contract() {
        let mut usage = ServiceUsage::empty("codex");
        usage.rate_limits.push(RateLimit {
            name: "5h window".into(),
            window_minutes: 300,
            ..Default::default()
        });
        let json = serde_json::to_value(&usage).unwrap();
        for key in [
            "service",
            "daily_usage",
            "model_tokens",
            "total_messages",
            "total_sessions",
            "total_tokens",
            "hour_counts",
            "first_date",
            "last_date",
            "rate_limits",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        let rl = &json["rate_limits"][0];
        assert_eq!(rl["resets_at"], serde_json::Value::Null);
        assert_eq!(rl["model_breakdown"], serde_json::json!([]));
    }
}
