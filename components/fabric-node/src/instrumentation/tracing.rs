// External crates
use console_subscriber::ConsoleLayer;
use std::panic;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{Directive, EnvFilter},
    fmt,
    prelude::*,
    registry::Registry,
};

/// Initializes the global tracing subscriber: ANSI + JSON file layers, error
/// span capture, and a tokio-console layer. Returns the non-blocking writer
/// guard; the caller must keep it alive for the process lifetime or buffered
/// log lines are dropped on exit.
pub fn init_tracing(log_dir: &str, log_level: &str) -> WorkerGuard {
    let file_appender = rolling::minutely(log_dir, "fabric-node.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if let Ok(tokio_directive) = "tokio=trace".parse::<Directive>() {
        filter = filter.add_directive(tokio_directive);
    }
    if let Ok(runtime_directive) = "runtime=trace".parse::<Directive>() {
        filter = filter.add_directive(runtime_directive);
    }

    let fmt_layer = fmt::layer()
        .with_ansi(true)
        .with_writer(non_blocking_writer.clone())
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let json_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let error_layer = ErrorLayer::default();
    let console_layer = ConsoleLayer::builder().spawn();

    let subscriber = Registry::default()
        .with(console_layer)
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(error_layer);

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    guard
}

pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => "Unknown panic",
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "fabric-node process panicked"
        );
    }));
}
