use anyhow::Result;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::core::collectors::Service;
use crate::core::config::AppConfig;

pub fn init(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    match AppConfig::default().save() {
        Ok(path) => {
            println!("Generated config at {}", path.display());
            let ids: Vec<&str> = Service::all().iter().map(|s| s.id()).collect();
            println!("  {} services enabled: {}", ids.len(), ids.join(", "));
        }
        Err(e) => {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub fn check(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `aum config init` to create one.");
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        let enabled = config.enabled_services();
        if enabled.is_empty() {
            println!("  No services enabled.");
        } else {
            for service in enabled {
                println!("  {:<12} {}", service.id(), service.source_hint());
            }
        }
        println!("  Store: {}", config.store_path().display());
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}

pub fn path(opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    match opts.format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => opts.print_json(&serde_json::json!({
            "config": path,
            "exists": path.exists(),
        }))?,
    }
    Ok(())
}
