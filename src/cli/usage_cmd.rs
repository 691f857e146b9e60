use anyhow::Result;
use chrono::Utc;
use std::future::Future;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::monitor::{MonitorError, UsageMonitor};

/// Run `work` with a braille spinner on stderr in text mode.
async fn with_spinner<F, T>(opts: &OutputOptions, msg: &'static str, work: F) -> T
where
    F: Future<Output = T>,
{
    if opts.format != OutputFormat::Text || opts.verbose {
        return work.await;
    }
    let spinner = tokio::spawn(async move {
        let frames = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
        let mut i = 0usize;
        loop {
            eprint!("\r {} {}", frames[i % frames.len()], msg);
            i = i.wrapping_add(1);
            tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        }
    });
    let result = work.await;
    spinner.abort();
    eprint!("\r\x1b[2K");
    result
}

pub async fn summary(monitor: &UsageMonitor, opts: &OutputOptions) -> Result<()> {
    let summary = with_spinner(opts, "Loading usage...", monitor.summary()).await?;
    match opts.format {
        OutputFormat::Text => println!("{}", renderer::render_summary(&summary, Utc::now(), opts.use_color)),
        OutputFormat::Json => opts.print_json(&summary)?,
    }
    Ok(())
}

pub async fn refresh(monitor: &UsageMonitor, opts: &OutputOptions) -> Result<()> {
    let summary = with_spinner(opts, "Scanning session files...", monitor.refresh_all()).await?;
    match opts.format {
        OutputFormat::Text => println!("{}", renderer::render_summary(&summary, Utc::now(), opts.use_color)),
        OutputFormat::Json => opts.print_json(&summary)?,
    }
    Ok(())
}

pub async fn usage(monitor: &UsageMonitor, service: &str, opts: &OutputOptions) -> Result<()> {
    let usage = match with_spinner(opts, "Loading usage...", monitor.service_usage(service)).await {
        Ok(u) => u,
        Err(MonitorError::UnknownService(name)) => {
            let known: Vec<String> = monitor.services().iter().map(|s| s.to_string()).collect();
            eprintln!("Unknown service: '{}' (enabled: {})", name, known.join(", "));
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    match opts.format {
        OutputFormat::Text => println!("{}", renderer::render_service(&usage, Utc::now(), opts.use_color)),
        OutputFormat::Json => opts.print_json(&usage)?,
    }
    Ok(())
}
