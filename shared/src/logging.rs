use std::path::Path;

use miette::Result;
use miette::{miette, Context, IntoDiagnostic};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is not set.
const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Initialize console logging and, if `log_file_path` is `Some`, file logging as well.
///
/// **IMPORTANT: Retain the returned `Option<WorkerGuard>` in scope, otherwise flushing to file will stop.**
///
/// ## Example
/// ```no_run
/// use miette::Result;
/// use shared::logging::initialize_console_and_file_logging;
/// use std::path::PathBuf;
///
/// fn main() -> Result<()> {
///     let log_file = PathBuf::from("logs/capturer.log");
///     let _guard = initialize_console_and_file_logging(Some(log_file.as_path()))?;
///
///     // ...
///
///     Ok(())
/// }
/// ```
pub fn initialize_console_and_file_logging(
    log_file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let file_writer_and_guard = match log_file_path {
        Some(path) => {
            let directory = path
                .parent()
                .ok_or_else(|| miette!("Could not parse the log file's parent directory."))?;

            let file_name = path
                .file_name()
                .ok_or_else(|| miette!("Could not parse the log file's name."))?;

            std::fs::create_dir_all(directory)
                .into_diagnostic()
                .wrap_err_with(|| miette!("Could not create log directory {:?}.", directory))?;

            Some(tracing_appender::non_blocking(
                tracing_appender::rolling::never(directory, file_name),
            ))
        }
        None => None,
    };

    let (file_writer, guard) = match file_writer_and_guard {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };


    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let console_subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish();

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::Layer::default()
            .with_ansi(false)
            .with_writer(writer)
    });

    let subscriber = console_subscriber.with(file_layer);


    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Failed to set up logging."))?;


    Ok(guard)
}
