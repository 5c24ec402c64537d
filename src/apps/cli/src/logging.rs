//! Logging Configuration
//!
//! Library crates log through `log`; the subscriber installed here also
//! captures those records.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_LEVEL: &str = "TURNWISE_LOG_LEVEL";

/// Flag, then environment, then the build-mode default.
pub fn resolve_level(flag: Option<&str>, env: Option<&str>, is_debug: bool) -> log::LevelFilter {
    let fallback = if is_debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    for (source, value) in [("--log-level", flag), (ENV_LOG_LEVEL, env)] {
        if let Some(value) = value {
            match parse_log_level(value) {
                Some(level) => return level,
                None => eprintln!(
                    "Warning: Invalid {} '{}', falling back to default",
                    source, value
                ),
            }
        }
    }
    fallback
}

pub fn parse_log_level(value: &str) -> Option<log::LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        "off" => Some(log::LevelFilter::Off),
        _ => None,
    }
}

pub fn level_to_str(level: log::LevelFilter) -> &'static str {
    match level {
        log::LevelFilter::Trace => "trace",
        log::LevelFilter::Debug => "debug",
        log::LevelFilter::Info => "info",
        log::LevelFilter::Warn => "warn",
        log::LevelFilter::Error => "error",
        log::LevelFilter::Off => "off",
    }
}

fn filter_directives(level: log::LevelFilter) -> String {
    // HTTP internals are noisy below warn.
    format!("{},hyper=warn,h2=warn,rustls=warn", level_to_str(level))
}

pub fn init(flag: Option<&str>, is_debug: bool) -> log::LevelFilter {
    let env = std::env::var(ENV_LOG_LEVEL).ok();
    let level = resolve_level(flag, env.as_deref(), is_debug);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directives(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Warning: logging already initialized: {}", e);
    }
    level
}
