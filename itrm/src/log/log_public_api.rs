// Copyright (c) 2024-2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{TracingConfig, try_create_layers};
use miette::IntoDiagnostic;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Global scope. Installs the subscriber for the whole process. Returns `Ok(())` without
/// doing anything when the config writes nowhere.
///
/// # Errors
///
/// Returns an error if the log file can't be created, or a global subscriber is
/// already installed.
pub fn try_initialize_logging_global(
    tracing_config: impl Into<TracingConfig>,
) -> miette::Result<()> {
    let tracing_config: TracingConfig = tracing_config.into();
    let Some(layers) = try_create_layers(&tracing_config)? else {
        return crate::ok!();
    };
    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .into_diagnostic()?;
    tracing::debug!(message = "Logging initialized", config = ?tracing_config);
    crate::ok!()
}

/// Thread local scope. The subscriber stays active until the returned guard is dropped.
/// Useful in tests, which run on their own threads.
///
/// # Errors
///
/// Returns an error if the log file can't be created.
pub fn try_initialize_logging_thread_local(
    tracing_config: impl Into<TracingConfig>,
) -> miette::Result<Option<tracing::subscriber::DefaultGuard>> {
    let tracing_config: TracingConfig = tracing_config.into();
    let Some(layers) = try_create_layers(&tracing_config)? else {
        return crate::ok!(None);
    };
    let subscriber = tracing_subscriber::registry().with(layers);
    crate::ok!(Some(tracing::subscriber::set_default(subscriber)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WriterConfig, try_create_temp_dir};
    use tracing_core::LevelFilter;

    #[test]
    fn test_thread_local_logging_writes_to_file() {
        let dir = try_create_temp_dir().unwrap();
        let file_path = dir.join("thread_local.log");
        let config = TracingConfig {
            writer_config: WriterConfig::File(file_path.to_str().unwrap().to_string()),
            level_filter: LevelFilter::DEBUG,
        };

        let guard = try_initialize_logging_thread_local(config).unwrap();
        assert!(guard.is_some());
        tracing::debug!(message = "hello from the test", answer = 42);
        drop(guard);

        let contents = std::fs::read_to_string(&file_path).unwrap();
        assert!(contents.contains("hello from the test"));
    }
}
