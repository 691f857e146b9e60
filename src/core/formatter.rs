use chrono::{DateTime, Utc};

/// Returns "{used}% used", rounded to the nearest integer and capped at 100.
pub fn format_used_percent(used_percent: f64) -> String {
    let used = used_percent.clamp(0.0, 100.0).round() as u64;
    format!("{}% used", used)
}

/// Returns "Resets in Xh Ym" relative to `now`. If past, returns "Resets now".
/// If more than 24 hours away, includes days.
pub fn format_reset_countdown(resets_at: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total_seconds = (*resets_at - now).num_seconds();

    if total_seconds <= 0 {
        return "Resets now".to_string();
    }

    let total_minutes = total_seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 24 {
        let days = hours / 24;
        let remaining_hours = hours % 24;
        if remaining_hours == 0 {
            format!("Resets in {}d", days)
        } else {
            format!("Resets in {}d {}h", days, remaining_hours)
        }
    } else if hours > 0 {
        format!("Resets in {}h {}m", hours, minutes)
    } else {
        format!("Resets in {}m", total_minutes.max(1))
    }
}

/// Countdown for a stored RFC 3339 reset time; `None` when it doesn't parse.
pub fn format_reset_str(resets_at: &str, now: DateTime<Utc>) -> Option<String> {
    let parsed = resets_at.parse::<DateTime<Utc>>().ok()?;
    Some(format_reset_countdown(&parsed, now))
}

/// Returns "[████░░░░░░░░]" where █ = used portion, ░ = headroom.
pub fn format_usage_bar(used_percent: f64, width: usize) -> String {
    let used_percent = used_percent.clamp(0.0, 100.0);
    let used_blocks = ((used_percent / 100.0) * width as f64).round() as usize;
    let free_blocks = width.saturating_sub(used_blocks);

    format!("[{}{}]", "█".repeat(used_blocks), "░".repeat(free_blocks))
}

/// Compact token count: 950, 12.3K, 4.5M, 1.2B.
pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000_000 {
        format!("{:.1}B", count as f64 / 1_000_000_000.0)
    } else if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn format_used_percent_rounds_and_caps() {
        assert_eq!(format_used_percent(28.4), "28% used");
        assert_eq!(format_used_percent(0.0), "0% used");
        assert_eq!(format_used_percent(110.0), "100% used");
    }

    #[test]
    fn format_reset_countdown_past() {
        let past = now() - Duration::seconds(10);
        assert_eq!(format_reset_countdown(&past, now()), "Resets now");
    }

    #[test]
    fn format_reset_countdown_minutes() {
        let future = now() + Duration::minutes(45);
        assert_eq!(format_reset_countdown(&future, now()), "Resets in 45m");
    }

    #[test]
    fn format_reset_countdown_hours_and_minutes() {
        let future = now() + Duration::minutes(135);
        assert_eq!(format_reset_countdown(&future, now()), "Resets in 2h 15m");
    }

    #[test]
    fn format_reset_countdown_days() {
        let future = now() + Duration::hours(25);
        assert_eq!(format_reset_countdown(&future, now()), "Resets in 1d 1h");
        let future = now() + Duration::hours(48);
        assert_eq!(format_reset_countdown(&future, now()), "Resets in 2d");
    }

    #[test]
    fn format_reset_str_parses_rfc3339() {
        assert_eq!(
            format_reset_str("2026-03-01T14:00:00Z", now()).as_deref(),
            Some("Resets in 2h 0m")
        );
        assert!(format_reset_str("soon", now()).is_none());
    }

    #[test]
    fn format_usage_bar_width() {
        assert_eq!(format_usage_bar(0.0, 12), "[░░░░░░░░░░░░]");
        assert_eq!(format_usage_bar(100.0, 12), "[████████████]");
        assert_eq!(format_usage_bar(50.0, 12), "[██████░░░░░░]");
    }

    #[test]
    fn format_tokens_scales() {
        assert_eq!(format_tokens(950), "950");
        assert_eq!(format_tokens(12_345), "12.3K");
        assert_eq!(format_tokens(4_500_000), "4.5M");
        assert_eq!(format_tokens(1_200_000_000), "1.2B");
    }
}
