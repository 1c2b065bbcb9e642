use crate::config::{Config, OutputType};
use crate::console::HandlerOptions;
use crate::context_handler::ContextAttributeHandler;
use crate::fanout::FanoutHandler;
use crate::handler::{panic_message, SharedHandler};
use crate::layer::install_global;
use crate::level::log_level;
use crate::logger::{set_default, Logger};
use crate::modes::{console_mode, otel_mode, BuildError};
use crate::record::Attr;
use crate::store::{get_config, set_config};
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Level;

/// Step of [`init`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Validation,
    HandlerCreation,
    OtelSetup,
    PanicRecovery,
}

impl InitStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            InitStage::Validation => "validation",
            InitStage::HandlerCreation => "handler_creation",
            InitStage::OtelSetup => "otel_setup",
            InitStage::PanicRecovery => "panic_recovery",
        }
    }
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`init`], tagged with the failing stage and carrying
/// the configuration that was in effect.
#[derive(thiserror::Error, Debug)]
#[error("logger initialization failed at {stage}: {source}")]
pub struct InitError {
    pub stage: InitStage,
    #[source]
    pub source: Box<dyn Error + Send + Sync>,
    pub config: Arc<Config>,
}

impl InitError {
    fn new(stage: InitStage, source: impl Into<Box<dyn Error + Send + Sync>>, config: &Arc<Config>) -> Self {
        Self {
            stage,
            source: source.into(),
            config: Arc::clone(config),
        }
    }
}

/// Telemetry setup failed and so did the console handler used instead.
#[derive(thiserror::Error, Debug)]
#[error("OTEL setup failed ({otel}) and console fallback also failed")]
pub struct FallbackError {
    pub otel: BuildError,
    #[source]
    pub console: BuildError,
}

/// Build a logger from `config`.
///
/// **Parameters**
/// - `config`: [`Config`] selecting level, console format, output and the
///   context keys copied onto every record.
///
/// **Returns**
/// - A [`Logger`] whose handler chain ends in a
///   [`ContextAttributeHandler`].
/// - `Err(InitError)` tagged with the failing [`InitStage`] and carrying
///   the configuration in effect.
///
/// **Behavior**
///
/// The config is stored (see [`crate::store::get_config`]) and validated,
/// the global [`log_level`] is set, and the handler for `config.output` is
/// built. A failed telemetry handler falls back to the console for the
/// `otel` output and to console only for `fanout`. With `set_as_default`
/// the logger becomes the process default and `tracing` events are routed
/// to it. SDK providers created on the way are flushed by
/// [`crate::store::shutdown`].
///
/// Never panics: a panic anywhere in the sequence is returned as an
/// [`InitError`] tagged [`InitStage::PanicRecovery`].
pub fn init(config: Config) -> Result<Logger, InitError> {
    init_with_attrs(config, Vec::new())
}

/// Like [`init`], with `attrs` bound to every record of the returned logger.
pub fn init_with_attrs(config: Config, attrs: Vec<Attr>) -> Result<Logger, InitError> {
    panic::catch_unwind(AssertUnwindSafe(|| build_logger(config, attrs))).unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        eprintln!("PANIC recovered during logger initialization: {message}");
        Err(InitError::new(
            InitStage::PanicRecovery,
            format!("panic during initialization: {message}"),
            &get_config(),
        ))
    })
}

fn build_logger(config: Config, attrs: Vec<Attr>) -> Result<Logger, InitError> {
    set_config(config);
    let config = get_config();
    config
        .validate()
        .map_err(|e| InitError::new(InitStage::Validation, e, &config))?;

    let level = log_level();
    level.set(config.level);
    let opts = HandlerOptions::new(level).with_source(config.level == Level::DEBUG);

    let base = base_handler(&config, opts)?;
    let handler = ContextAttributeHandler::new(
        base,
        config.context_keys.iter().cloned(),
        config.context_keys_default.clone(),
    );
    let logger = Logger::new(Arc::new(handler)).with(attrs);

    if config.set_as_default {
        set_default(logger.clone());
        if let Err(e) = install_global() {
            eprintln!("WARNING: tracing events will not reach the default logger: {e}");
        }
    }
    Ok(logger)
}

fn base_handler(config: &Arc<Config>, opts: HandlerOptions) -> Result<SharedHandler, InitError> {
    let creation = |e: BuildError| InitError::new(InitStage::HandlerCreation, e, config);

    match config.output {
        OutputType::Console => console_mode(config, opts).map_err(creation),
        OutputType::Otel => match otel_mode(config, &opts) {
            Ok(handler) => Ok(handler),
            Err(otel) => {
                eprintln!("WARNING: OTEL initialization failed ({otel}), falling back to console mode");
                console_mode(config, opts).map_err(|console| {
                    InitError::new(InitStage::OtelSetup, FallbackError { otel, console }, config)
                })
            }
        },
        OutputType::Fanout => {
            let console = console_mode(config, opts.clone()).map_err(creation)?;
            match otel_mode(config, &opts) {
                Ok(telemetry) => Ok(Arc::new(FanoutHandler::new([console, telemetry]))),
                Err(e) => {
                    eprintln!("WARNING: OTEL initialization failed in fanout mode ({e}), using console mode only");
                    Ok(console)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::console::tests::SharedBuf;
    use serde_json::{json, Value};
    use serial_test::serial;

    fn console_config(buf: &SharedBuf) -> Config {
        Config {
            output_stream: buf.stream(),
            set_as_default: false,
            otel_tracing_enabled: false,
            ..Config::default()
        }
    }

    #[test]
    #[serial]
    fn validation_failure_is_tagged() {
        let buf = SharedBuf::default();
        let config = console_config(&buf).with_context_default("unknown");
        let err = init(config).unwrap_err();
        assert_eq!(err.stage, InitStage::Validation);
        assert!(err
            .to_string()
            .starts_with("logger initialization failed at validation: configuration validation failed"));
        assert!(err.source().is_some());
        assert!(err.config.context_keys.is_empty());
    }

    #[test]
    #[serial]
    fn handler_creation_failure_is_tagged() {
        let buf = SharedBuf::default();
        let config = Config {
            format: LogFormat::Otel,
            otel_service_name: String::new(),
            ..console_config(&buf)
        };
        let err = init(config).unwrap_err();
        assert_eq!(err.stage, InitStage::HandlerCreation);
        assert_eq!(
            err.to_string(),
            "logger initialization failed at handler_creation: otel service name is required"
        );
    }

    #[test]
    #[serial]
    fn console_logger_writes_context_and_static_attrs() {
        let buf = SharedBuf::default();
        let config = console_config(&buf)
            .with_context_keys(["request_id", "user_id"])
            .with_context_default("unknown");
        let logger = init_with_attrs(config, vec![Attr::new("app", "billing")]).unwrap();

        let ctx = crate::context::Context::background().with_value("request_id", "req-1");
        logger.info_ctx(&ctx, "charged");

        let line: Value = serde_json::from_str(buf.contents().trim_end()).unwrap();
        assert_eq!(line["msg"], json!("charged"));
        assert_eq!(line["app"], json!("billing"));
        assert_eq!(line["request_id"], json!("req-1"));
        assert_eq!(line["user_id"], json!("unknown"));
    }

    #[test]
    #[serial]
    fn debug_level_adds_source_and_sets_global_level() {
        let buf = SharedBuf::default();
        let config = Config {
            level: Level::DEBUG,
            ..console_config(&buf)
        };
        let logger = init(config).unwrap();
        logger.debug("verbose");

        assert_eq!(log_level().get(), Level::DEBUG);
        let line: Value = serde_json::from_str(buf.contents().trim_end()).unwrap();
        assert!(line["source"]["file"].as_str().unwrap().ends_with("init.rs"));
        log_level().set(Level::INFO);
    }
}
