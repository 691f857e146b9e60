use chrono::{DateTime, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::collectors::Service;
use crate::core::formatter::{
    format_reset_str, format_tokens, format_usage_bar, format_used_percent,
};
use crate::core::models::usage::{RateLimit, ServiceUsage, UsageSummary};

const BAR_WIDTH: usize = 12;
const TOP_MODELS: usize = 5;
const RECENT_DAYS: usize = 7;

/// Render one service block as a colored (or plain) string.
///
/// Layout:
/// ```text
///  Claude
///   Messages  1204      Sessions 88      Tokens 12.3M
///   Range     2025-11-02 → 2026-03-01
///   5h window   28% used [███░░░░░░░░░]  1.2M tokens
///               Resets in 2h 15m
///   Models:
///     claude-opus-4-5          9.1M (8.8M in / 310.0K out)
///   Last 7 days:
///     2026-02-24  msgs 41    tokens 820.0K
/// ```
pub fn render_service(usage: &ServiceUsage, now: DateTime<Utc>, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();

    let title = Service::from_id(&usage.service)
        .map(|s| s.display_name().to_string())
        .unwrap_or_else(|| usage.service.clone());
    lines.push(format!(" {}", title).bold().to_string());

    if usage.daily_usage.is_empty() && usage.model_tokens.is_empty() && usage.rate_limits.is_empty()
    {
        lines.push(format!("  {}", "No data found".dimmed()));
        return lines.join("\n");
    }

    lines.push(format!(
        "  {}  {:<8}  {} {:<6}  {} {}",
        "Messages".cyan(),
        usage.total_messages,
        "Sessions".cyan(),
        usage.total_sessions,
        "Tokens".cyan(),
        format_tokens(usage.total_tokens)
    ));

    if let (Some(first), Some(last)) = (&usage.first_date, &usage.last_date) {
        lines.push(format!("  {}     {} → {}", "Range".cyan(), first, last));
    }

    for window in &usage.rate_limits {
        render_rate_limit(&mut lines, window, now);
    }

    if !usage.model_tokens.is_empty() {
        lines.push(format!("  {}:", "Models".cyan()));
        let mut models: Vec<_> = usage.model_tokens.iter().collect();
        models.sort_by(|a, b| b.billable().cmp(&a.billable()).then(a.model.cmp(&b.model)));
        for model in models.into_iter().take(TOP_MODELS) {
            lines.push(format!(
                "    {:<24} {} ({} in / {} out)",
                model.model,
                format_tokens(model.billable()),
                format_tokens(model.input_tokens),
                format_tokens(model.output_tokens)
            ));
        }
    }

    let recent: Vec<_> = usage.daily_usage.iter().rev().take(RECENT_DAYS).collect();
    if !recent.is_empty() {
        lines.push(format!("  {}:", "Last 7 days".cyan()));
        for day in recent.into_iter().rev() {
            lines.push(format!(
                "    {}  msgs {:<5} tokens {}",
                day.date,
                day.message_count,
                format_tokens(day.token_count)
            ));
        }
    }

    lines.join("\n")
}

pub fn render_summary(summary: &UsageSummary, now: DateTime<Utc>, use_color: bool) -> String {
    let mut sections: Vec<String> = summary
        .services
        .iter()
        .map(|usage| render_service(usage, now, use_color))
        .collect();
    if let Some(refreshed) = &summary.last_refreshed {
        sections.push(format!("Last refreshed {}", refreshed).dimmed().to_string());
    }
    sections.join("\n\n")
}

fn render_rate_limit(lines: &mut Vec<String>, window: &RateLimit, now: DateTime<Utc>) {
    let percent_str = format_used_percent(window.used_percent);
    let colored_percent = color_by_used(window.used_percent, &percent_str);
    let colored_bar = format_usage_bar(window.used_percent, BAR_WIDTH).magenta();

    let mut line = format!("  {}  {} {}", format!("{:<10}", window.name).cyan(), colored_percent, colored_bar);
    if window.used_tokens > 0 {
        line.push_str(&format!("  {} tokens", format_tokens(window.used_tokens)));
    }
    lines.push(line);

    if let Some(reset_line) = window
        .resets_at
        .as_deref()
        .and_then(|r| format_reset_str(r, now))
    {
        // 14 spaces to align under the percent/bar values
        lines.push(format!("              {}", reset_line.dimmed()));
    }
}

/// Green below 75% used, yellow below 90%, red beyond.
fn color_by_used(used_percent: f64, text: &str) -> ColoredString {
    if used_percent < 75.0 {
        text.green()
    } else if used_percent < 90.0 {
        text.yellow()
    } else {
        text.red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::usage::{DailyUsage, ModelTokens};

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn make_usage() -> ServiceUsage {
        let mut usage = ServiceUsage::empty("claude");
        usage.set_daily((1..=9).map(|d| DailyUsage {
            message_count: d,
            token_count: d * 1000,
            ..DailyUsage::new(format!("2026-02-{:02}", d))
        }));
        usage.set_models([
            ModelTokens {
                input_tokens: 2_000_000,
                output_tokens: 100_000,
                ..ModelTokens::new("claude-opus-4-5")
            },
            ModelTokens {
                input_tokens: 500,
                ..ModelTokens::new("claude-haiku-4-5")
            },
        ]);
        usage.total_messages = 45;
        usage.total_sessions = 9;
        usage.total_tokens = 2_100_500;
        usage.rate_limits = vec![RateLimit {
            name: "5h window".to_string(),
            used_percent: 28.0,
            window_minutes: 300,
            resets_at: Some("2026-03-01T14:15:00Z".to_string()),
            used_tokens: 1_200_000,
            model_breakdown: Vec::new(),
        }];
        usage
    }

    #[test]
    fn render_contains_service_name_and_totals() {
        let output = render_service(&make_usage(), now(), false);
        assert!(output.contains("Claude"));
        assert!(output.contains("45"));
        assert!(output.contains("2.1M"));
        assert!(output.contains("2026-02-01 → 2026-02-09"));
    }

    #[test]
    fn render_contains_rate_limit_with_countdown() {
        let output = render_service(&make_usage(), now(), false);
        assert!(output.contains("5h window"));
        assert!(output.contains("28% used"));
        assert!(output.contains("1.2M tokens"));
        assert!(output.contains("Resets in 2h 15m"));
    }

    #[test]
    fn render_orders_models_by_volume() {
        let output = render_service(&make_usage(), now(), false);
        let opus = output.find("claude-opus-4-5").unwrap();
        let haiku = output.find("claude-haiku-4-5").unwrap();
        assert!(opus < haiku);
    }

    #[test]
    fn render_shows_only_last_seven_days() {
        let output = render_service(&make_usage(), now(), false);
        assert!(!output.contains("2026-02-02  msgs"));
        assert!(output.contains("2026-02-03  msgs"));
        assert!(output.contains("2026-02-09  msgs"));
    }

    #[test]
    fn render_empty_service() {
        let output = render_service(&ServiceUsage::empty("codex"), now(), false);
        assert!(output.contains("Codex"));
        assert!(output.contains("No data found"));
    }

    #[test]
    fn render_no_ansi_when_color_false() {
        let output = render_service(&make_usage(), now(), false);
        assert!(!output.contains('\x1b'), "output should not contain ANSI codes");
    }

    #[test]
    fn render_summary_joins_services() {
        let summary = UsageSummary {
            services: vec![make_usage(), ServiceUsage::empty("antigravity")],
            last_refreshed: Some("2026-03-01T11:59:00Z".to_string()),
        };
        let output = render_summary(&summary, now(), false);
        assert!(output.contains("Claude"));
        assert!(output.contains("Antigravity"));
        assert!(output.contains("Last refreshed 2026-03-01T11:59:00Z"));
    }
}
