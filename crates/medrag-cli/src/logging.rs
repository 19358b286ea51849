use anyhow::{Context, Result};
use medrag_core::LoggingConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Console and file logging settings after CLI overrides.
pub struct LogSettings<'a> {
    pub config: &'a LoggingConfig,
    pub verbose: bool,
    pub file: bool,
    pub directory: Option<&'a Path>,
}

/// Install the global subscriber. Console output goes to stderr so command
/// output on stdout stays parseable. The returned guard flushes the file
/// writer and must be held until exit.
pub fn init(settings: LogSettings<'_>) -> Result<Option<WorkerGuard>> {
    let level = if settings.verbose {
        "debug"
    } else {
        settings.config.level.as_str()
    };
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log filter '{}'", level))?;

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let console: BoxedLayer = match settings.config.format.as_str() {
        "json" => console.json().boxed(),
        "compact" => console.compact().boxed(),
        _ => console.pretty().boxed(),
    };
    let mut layers = vec![console];

    let mut guard = None;
    if settings.file && settings.config.file {
        let directory = settings
            .directory
            .unwrap_or(settings.config.directory.as_path());
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

        // medrag.log.YYYY-MM-DD, oldest removed past max_files
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("medrag.log")
            .max_log_files(settings.config.max_files.max(1))
            .build(directory)
            .context("Failed to create rolling log file")?;
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
