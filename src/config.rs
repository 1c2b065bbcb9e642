use crate::console::OutputStream;
use crate::context::ContextKey;
use crate::env::{
    env_or, LOG_DEV_FLAVOR_ENV, LOG_DEV_MODE_ENV, LOG_FORMAT_ENV, LOG_LEVEL_ENV, LOG_OUTPUT_ENV,
    OTEL_SERVICE_NAME_ENV,
};
use crate::level::parse_level;
use crate::modes::TelemetryFactory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;

/// Error returned when parsing a [`LogFormat`], [`OutputType`] or
/// [`DevFlavor`] from its name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} {value:?}, expected one of: {expected}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    expected: String,
}

fn parse_variant<T: Copy + fmt::Display>(
    kind: &'static str,
    value: &str,
    all: &[T],
) -> Result<T, ParseEnumError> {
    let wanted = value.trim().to_ascii_lowercase();
    all.iter()
        .copied()
        .find(|variant| variant.to_string() == wanted)
        .ok_or_else(|| ParseEnumError {
            kind,
            value: value.to_string(),
            expected: all
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// How console records are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
    /// OpenTelemetry log data model, written to the output stream.
    Otel,
}

impl LogFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
            LogFormat::Otel => "otel",
        }
    }

    pub const fn all() -> [LogFormat; 3] {
        [LogFormat::Json, LogFormat::Text, LogFormat::Otel]
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("log format", s, &Self::all())
    }
}

/// Where records are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Console,
    /// A telemetry backend built by the configured [`TelemetryFactory`].
    Otel,
    /// Console and telemetry backend at once.
    Fanout,
}

impl OutputType {
    pub const fn as_str(self) -> &'static str {
        match self {
            OutputType::Console => "console",
            OutputType::Otel => "otel",
            OutputType::Fanout => "fanout",
        }
    }

    pub const fn all() -> [OutputType; 3] {
        [OutputType::Console, OutputType::Otel, OutputType::Fanout]
    }

    pub const fn needs_telemetry(self) -> bool {
        matches!(self, OutputType::Otel | OutputType::Fanout)
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("output type", s, &Self::all())
    }
}

/// Layout of the colourised development output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevFlavor {
    #[default]
    Tint,
    Slogor,
    Devslog,
}

impl DevFlavor {
    pub const fn as_str(self) -> &'static str {
        match self {
            DevFlavor::Tint => "tint",
            DevFlavor::Slogor => "slogor",
            DevFlavor::Devslog => "devslog",
        }
    }

    pub const fn all() -> [DevFlavor; 3] {
        [DevFlavor::Tint, DevFlavor::Slogor, DevFlavor::Devslog]
    }
}

impl fmt::Display for DevFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevFlavor {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("dev flavor", s, &Self::all())
    }
}

/// Logger configuration consumed by [`crate::init::init`].
///
/// Start from [`Config::default`] and override what you need:
///
/// ```
/// use serde_json::json;
/// use tracing::Level;
/// use tracing_ctx_logger::config::{Config, LogFormat};
///
/// let config = Config {
///     level: Level::DEBUG,
///     format: LogFormat::Text,
///     set_as_default: false,
///     ..Config::default()
/// }
/// .with_context_keys(["request_id", "user_id"])
/// .with_context_default(json!("unknown"));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum level; also written to the process-wide [`crate::level::log_level`].
    pub level: Level,
    pub format: LogFormat,
    /// Use the colourised [`crate::dev::DevHandler`] for the text format.
    pub dev_mode: bool,
    pub dev_flavor: DevFlavor,
    pub output_stream: OutputStream,
    /// Add `trace_id` / `span_id` from the context's span to console records.
    pub otel_tracing_enabled: bool,
    /// Instrumentation scope name; required for OTEL and fan-out output.
    pub otel_logger_name: String,
    pub output: OutputType,
    /// `service.name` resource attribute; required for OTEL and fan-out output.
    pub otel_service_name: String,
    /// Install the logger as the process default and route `tracing` events to it.
    pub set_as_default: bool,
    /// Keys copied from the call's context onto every record, in this order.
    pub context_keys: Vec<ContextKey>,
    /// Value used for context keys that are missing; `None` omits them.
    pub context_keys_default: Option<Value>,
    /// Builds the telemetry handler; the OTLP exporter when unset.
    pub telemetry: Option<Arc<dyn TelemetryFactory>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            dev_mode: false,
            dev_flavor: DevFlavor::Tint,
            output_stream: OutputStream::stdout(),
            otel_tracing_enabled: true,
            otel_logger_name: "my/pkg/name".to_string(),
            output: OutputType::Console,
            otel_service_name: "my-service".to_string(),
            set_as_default: true,
            context_keys: Vec::new(),
            context_keys_default: None,
            telemetry: None,
        }
    }
}

impl Config {
    pub fn with_context_keys<K: Into<ContextKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.context_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_default(mut self, value: impl Into<Value>) -> Self {
        self.context_keys_default = Some(value.into());
        self
    }

    /// Check the configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.output.needs_telemetry() {
            if self.otel_logger_name.is_empty() {
                errors.push(FieldError::new(
                    "otel_logger_name",
                    Some(self.otel_logger_name.clone()),
                    "required when output is otel or fanout",
                ));
            }
            if self.otel_service_name.is_empty() {
                errors.push(FieldError::new(
                    "otel_service_name",
                    Some(self.otel_service_name.clone()),
                    "required when output is otel or fanout",
                ));
            }
        }

        if let Some(default) = &self.context_keys_default {
            if !default.is_null() && self.context_keys.is_empty() {
                errors.push(FieldError::new(
                    "context_keys_default",
                    Some(default.to_string()),
                    "cannot be set without defining context_keys",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Defaults overridden by the `LOG_*` and `OTEL_SERVICE_NAME`
    /// environment variables. Unrecognised values keep the default.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.level = parse_level(&level);
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = parse_or_default(&format);
        }
        if let Ok(output) = std::env::var(LOG_OUTPUT_ENV) {
            config.output = parse_or_default(&output);
        }
        if let Ok(flavor) = std::env::var(LOG_DEV_FLAVOR_ENV) {
            config.dev_flavor = parse_or_default(&flavor);
        }
        if let Ok(dev_mode) = std::env::var(LOG_DEV_MODE_ENV) {
            config.dev_mode = matches!(dev_mode.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        config.otel_service_name = env_or(OTEL_SERVICE_NAME_ENV, &config.otel_service_name);
        config
    }
}

fn parse_or_default<T>(raw: &str) -> T
where
    T: FromStr<Err = ParseEnumError> + Default + fmt::Display,
{
    raw.parse().unwrap_or_else(|e: ParseEnumError| {
        let fallback = T::default();
        eprintln!("{e}; using {fallback}");
        fallback
    })
}

/// One configuration field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub value: Option<String>,
    pub reason: &'static str,
}

impl FieldError {
    fn new(field: &'static str, value: Option<String>, reason: &'static str) -> Self {
        Self { field, value, reason }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "field {:?} with value {value:?}: {}", self.field, self.reason),
            None => write!(f, "field {:?}: {}", self.field, self.reason),
        }
    }
}

/// All field errors found by [`Config::validate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn describe(errors: &[FieldError]) -> String {
    match errors {
        [] => "configuration validation failed".to_string(),
        [only] => format!("configuration validation failed: {only}"),
        [first, rest @ ..] => format!(
            "configuration validation failed with {} errors: {first} (and {} more)",
            errors.len(),
            rest.len()
        ),
    }
}
