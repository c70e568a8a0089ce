//! Subscriber setup for the operator binary.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Filter from `RUST_LOG` if set and valid, else from `log_level`.
///
/// Returns a warning to emit once the subscriber is installed when either
/// input had to be discarded.
pub fn build_filter(rust_log: Option<&str>, log_level: &str) -> (EnvFilter, Option<String>) {
    let mut warning = None;

    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return (filter, None),
            Err(e) => warning = Some(format!("ignoring invalid RUST_LOG {directives:?}: {e}")),
        }
    }

    let level = match LevelFilter::from_str(log_level.trim()) {
        Ok(level) => level,
        Err(_) => {
            warning = Some(format!(
                "unknown log level {log_level:?}, falling back to info"
            ));
            LevelFilter::INFO
        }
    };
    (EnvFilter::default().add_directive(level.into()), warning)
}

/// Install the global fmt subscriber.
pub fn init(log_level: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, warning) = build_filter(rust_log.as_deref(), log_level);

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(warning) = warning {
        tracing::warn!("{warning}");
    }
}
