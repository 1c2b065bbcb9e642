use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing_ctx_logger::context::Context;
use tracing_ctx_logger::context_handler::ContextAttributeHandler;
use tracing_ctx_logger::layer::HandlerLayer;
use tracing_ctx_logger::memory::DiscardHandler;
use tracing_ctx_logger::Logger;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

fn main() {
    let handler = ContextAttributeHandler::new(
        Arc::new(DiscardHandler),
        ["request_id".into(), "user_id".into(), "tenant".into()],
        Some(json!("unknown")),
    );
    let logger = Logger::new(Arc::new(handler));

    let n: u64 = 100_000;
    let ctx = Context::background()
        .with_value("request_id", "req-1")
        .with_value("user_id", 42);

    let start = Instant::now();
    for _ in 0..n {
        logger.error_ctx(&ctx, "default load test error");
    }
    report("logger", n, start);

    let subscriber = Registry::default().with(HandlerLayer::new(logger));
    tracing::subscriber::with_default(subscriber, || {
        let _guard = ctx.attach();
        let start = Instant::now();
        for i in 0..n {
            tracing::error!(iteration = i, "default load test error");
        }
        report("tracing bridge", n, start);
    });
}

fn report(path: &str, n: u64, start: Instant) {
    let elapsed = start.elapsed();
    println!(
        "{path}: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
}
