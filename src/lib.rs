//! Structured logging set up from one [`Config`].
//!
//! [`init`] builds a console, OTEL or fan-out handler chain, wraps it in a
//! [`ContextAttributeHandler`] that copies configured keys from the call's
//! [`Context`] onto every record, and returns a [`Logger`]. With
//! `set_as_default` the logger also receives `tracing` events.
//!
//! ```
//! use tracing_ctx_logger::{init, Config, Context, LogFormat};
//!
//! let config = Config {
//!     format: LogFormat::Text,
//!     set_as_default: false,
//!     ..Config::default()
//! }
//! .with_context_keys(["request_id"]);
//!
//! let logger = init(config).unwrap();
//! let ctx = Context::background().with_value("request_id", "req-42");
//! logger.info_ctx(&ctx, "request served");
//! ```

pub mod config;
pub mod console;
pub mod context;
pub mod context_handler;
pub mod dev;
pub mod env;
pub mod fanout;
pub mod handler;
pub mod init;
pub mod layer;
pub mod level;
pub mod logger;
pub mod memory;
pub mod modes;
pub mod otel;
#[cfg(feature = "otlp")]
pub mod otlp;
pub mod record;
pub mod store;
pub mod trace;

pub use config::{Config, DevFlavor, LogFormat, OutputType};
pub use context::{Context, ContextKey};
pub use context_handler::ContextAttributeHandler;
pub use handler::{Handler, HandlerError, SharedHandler};
pub use init::{init, init_with_attrs, InitError, InitStage};
pub use level::log_level;
pub use logger::Logger;
pub use record::{Attr, Record};
pub use store::shutdown;
