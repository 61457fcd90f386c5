//! Structured logging setup (`tracing`), carried as ambient infrastructure
//! alongside the core indexer (spec §1 lists log shipping itself as a
//! Non-goal — this is the local subscriber, not a shipping pipeline).
//!
//! - JSON vs pretty format, selectable via config or env var.
//! - Optional file output with daily/hourly/never rotation.
//! - `RUST_LOG` env var takes precedence over the config's `log_level`.
//! - Truncation and sampling helpers keep high-volume per-block/per-log
//!   lines readable without losing the ability to find the full value.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration, loaded alongside the rest of `IndexerConfig`.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `"trace"`, `"debug"`, `"info"`, `"warn"`, `"error"`.
    pub log_level: String,
    /// `"json"` or `"pretty"`.
    pub log_format: String,
    /// Optional log file path; `None` logs to stderr only.
    pub log_file: Option<String>,
    /// `"daily"`, `"hourly"`, or `"never"`.
    pub rotation: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("PDP_INDEXER_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_file: std::env::var("PDP_INDEXER_LOG_FILE").ok(),
            rotation: "daily".to_string(),
        }
    }
}

/// Initializes the global tracing subscriber from `config`. `RUST_LOG`, if
/// set, overrides `config.log_level` entirely via `EnvFilter`'s own default
/// lookup. Call once at process startup, before spawning any chain tasks.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if let Some(log_file_path) = config.log_file {
        let path = std::path::Path::new(&log_file_path);
        let directory = path.parent().ok_or("invalid log file path: no parent directory")?;
        let filename_prefix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or("invalid log file path: no filename")?;

        let file_appender = match config.rotation.as_str() {
            "daily" => rolling::daily(directory, filename_prefix),
            "hourly" => rolling::hourly(directory, filename_prefix),
            "never" => rolling::never(directory, path.file_name().unwrap()),
            _ => rolling::daily(directory, filename_prefix),
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if config.log_format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true).with_span_list(true).with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(non_blocking),
                )
                .init();
        }

        // The non-blocking writer flushes on drop; this subscriber is meant
        // to outlive `init_tracing`'s stack frame for the life of the
        // process, so the guard is deliberately never dropped.
        std::mem::forget(guard);
    } else if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_thread_ids(false).with_file(true).with_line_number(true))
            .init();
    }

    Ok(())
}

/// Truncates a hex string for logging, e.g. a tx hash or merkle proof
/// element, to `len` characters plus an ellipsis marker.
pub fn truncate_hex(hex: &str, len: usize) -> String {
    if hex.len() <= len {
        hex.to_string()
    } else {
        format!("{}...", &hex[..len])
    }
}

/// Truncates a list for logging: shows the first `max` items and the total
/// count if there are more. Used for root-id batches and proof elements,
/// which can run into the thousands per event.
pub fn truncate_list<T: std::fmt::Display + std::fmt::Debug>(items: &[T], max: usize) -> String {
    if items.len() <= max {
        format!("{:?}", items)
    } else {
        let preview: Vec<String> = items.iter().take(max).map(|i| i.to_string()).collect();
        format!("[{} of {}]: {:?}", max, items.len(), preview)
    }
}

/// Returns true every `interval` calls; used to sample progress logs
/// during a long backfill instead of logging every single block.
pub fn should_log_progress(counter: &AtomicU64, interval: u64) -> bool {
    let count = counter.fetch_add(1, Ordering::Relaxed);
    count % interval == 0
}

/// Self-contained sampled progress counter, one per long-running loop.
pub struct ProgressCounter {
    counter: AtomicU64,
    interval: u64,
}

impl ProgressCounter {
    pub fn new(interval: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            interval,
        }
    }

    pub fn should_log(&self) -> bool {
        should_log_progress(&self.counter, self.interval)
    }

    pub fn get(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_hex_leaves_short_strings_untouched() {
        assert_eq!(truncate_hex("abcd", 16), "abcd");
        assert_eq!(truncate_hex("0123456789abcdef0123456789abcdef", 16), "0123456789abcdef...");
        assert_eq!(truncate_hex("", 16), "");
    }

    #[test]
    fn truncate_list_summarizes_when_over_the_cap() {
        let items = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(truncate_list(&items, 10), "[1, 2, 3, 4, 5, 6]");
        assert_eq!(truncate_list(&items, 3), "[3 of 6]: [1, 2, 3]");
    }

    #[test]
    fn should_log_progress_fires_every_interval() {
        let counter = AtomicU64::new(0);
        assert!(should_log_progress(&counter, 10));
        for _ in 1..10 {
            assert!(!should_log_progress(&counter, 10));
        }
        assert!(should_log_progress(&counter, 10));
    }

    #[test]
    fn progress_counter_tracks_its_own_count() {
        let counter = ProgressCounter::new(5);
        assert!(counter.should_log());
        for _ in 0..4 {
            assert!(!counter.should_log());
        }
        assert!(counter.should_log());
        assert_eq!(counter.get(), 6);
    }
}
