use std::fmt;

use serde_json::json;
use tracing_ctx_logger::{init, Config, Context, ContextKey, Logger};

/// Key type of our own; it only matches lookups made with the same type.
#[derive(Debug, PartialEq)]
struct SessionId;

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("session_id")
    }
}

fn main() {
    let config = Config {
        set_as_default: false,
        context_keys: vec!["request_id".into(), "user_id".into(), ContextKey::new(SessionId)],
        context_keys_default: Some(json!("unknown")),
        ..Config::default()
    };

    let logger = match init(config) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let ctx = Context::background();
    logger.info_ctx(&ctx, "No context values set yet");

    let ctx = ctx.with_value("request_id", "req-12345");
    logger.info_ctx(&ctx, "Processing request");

    let ctx = ctx.with_value("user_id", "user-789");
    logger.info_ctx(&ctx, "User authenticated");

    let ctx = ctx.with_value(ContextKey::new(SessionId), "sess-abc");
    logger.info_ctx(&ctx, "Session created");

    ctx.scope(|| process_user_request(&logger));

    logger.info("Context example completed");
}

fn process_user_request(logger: &Logger) {
    logger.info("Processing user request in nested function");
    logger.debug("Validating user permissions");
    logger.info("User request processed successfully");
}
