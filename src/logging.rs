//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, optionally, to JSON
//! files for following task attempts across worker processes.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(environment).to_string());
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level))
        };

        let console_layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter())
                .boxed()
        };

        let pid = process::id();
        let file_layer = config.log_dir.as_ref().map(|dir| {
            let log_dir = PathBuf::from(dir);
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let file_appender = tracing_appender::rolling::never(
                &log_dir,
                format!("{environment}.{pid}.{timestamp}.log"),
            );
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The guard flushes on drop; logging lives for the whole process
            std::mem::forget(guard);

            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(filter())
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_dir = config.log_dir.as_deref(),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Default filter directive per environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "debug",
        _ => "debug",
    }
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: &str,
    task_type: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        task_type = %task_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}
