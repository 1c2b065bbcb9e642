//! Environment variable names read by [`crate::config::Config::from_env`].
//! The OTLP exporter resolves its own `OTEL_EXPORTER_OTLP_*` variables.
//!
//! These are purely helpers; handlers themselves never touch the
//! environment.

/// Minimum level, e.g. `debug`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Console format: `json`, `text` or `otel`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Output: `console`, `otel` or `fanout`.
pub const LOG_OUTPUT_ENV: &str = "LOG_OUTPUT";

/// `true` / `1` / `yes` enables colourised development output.
pub const LOG_DEV_MODE_ENV: &str = "LOG_DEV_MODE";

/// Development layout: `tint`, `slogor` or `devslog`.
pub const LOG_DEV_FLAVOR_ENV: &str = "LOG_DEV_FLAVOR";

/// `service.name` resource attribute.
pub const OTEL_SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
