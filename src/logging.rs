use std::io;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Configures stdout plus daily-rolling file logging for an embedding
/// service. Library consumers with their own subscriber should skip
/// this and filter on the per-subsystem targets directly.
pub fn configure_logging() {
    // Stdout log configuration
    let stdout_log = fmt::layer().with_writer(io::stdout).with_filter(EnvFilter::new(
        "info,resolver=info,candidates=warn,coherence=info,gazetteer=warn",
    ));

    // File log configuration
    let file_appender = rolling::daily("logs", "toponym.log");
    let file_log = fmt::layer().with_writer(file_appender).with_filter(
        EnvFilter::new("info,resolver=debug,candidates=debug,coherence=debug,gazetteer=info"),
    );

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
