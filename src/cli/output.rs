use anyhow::Result;
use serde::Serialize;
use std::io::IsTerminal;

use crate::core::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// `--json` wins, then `--format`, then the configured default.
    pub fn resolve(json_flag: bool, format_flag: Option<&str>, settings: &Settings) -> Self {
        if json_flag {
            return Self::Json;
        }
        match format_flag.unwrap_or(settings.default_format.as_str()) {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub use_color: bool,
    pub verbose: bool,
}

impl OutputOptions {
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{}", json);
        Ok(())
    }
}

/// Color unless disabled by flag, config, or NO_COLOR, or stdout is not a terminal.
pub fn detect_color(color_flag: bool, settings: &Settings) -> bool {
    if !color_flag {
        return false;
    }
    match settings.color.as_str() {
        "never" => false,
        "always" => true,
        _ => std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_overrides_everything() {
        let settings = Settings::default();
        assert_eq!(OutputFormat::resolve(true, Some("text"), &settings), OutputFormat::Json);
    }

    #[test]
    fn format_flag_then_config_default() {
        let mut settings = Settings::default();
        assert_eq!(OutputFormat::resolve(false, None, &settings), OutputFormat::Text);
        assert_eq!(OutputFormat::resolve(false, Some("json"), &settings), OutputFormat::Json);
        settings.default_format = "json".to_string();
        assert_eq!(OutputFormat::resolve(false, None, &settings), OutputFormat::Json);
        assert_eq!(OutputFormat::resolve(false, Some("text"), &settings), OutputFormat::Text);
    }

    #[test]
    fn color_setting_is_honoured() {
        let mut settings = Settings::default();
        assert!(!detect_color(false, &settings));
        settings.color = "always".to_string();
        assert!(detect_color(true, &settings));
        settings.color = "never".to_string();
        assert!(!detect_color(true, &settings));
    }
}
