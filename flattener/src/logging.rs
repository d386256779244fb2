use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::settings::{LogConfig, LogLevel};

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            // tracing has nothing above error
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => LevelFilter::ERROR,
        }
    }
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy()
        .add_directive("rdkafka=warn".parse().expect("static directive is valid"))
}

/// Where log lines are written.
#[derive(Debug)]
pub enum LogTarget {
    Stdout,
    File(File),
}

impl LogTarget {
    /// Opens `log_file_path` for appending, or picks stdout when the path is empty.
    pub fn open(config: &LogConfig) -> std::io::Result<Self> {
        if config.log_file_path.is_empty() {
            return Ok(LogTarget::Stdout);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)?;
        Ok(LogTarget::File(file))
    }

    fn into_writer(self) -> (BoxMakeWriter, bool) {
        match self {
            LogTarget::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
            LogTarget::File(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn setup_tracing(target: LogTarget, level: LogLevel) {
    let (writer, ansi) = target.into_writer();
    let log_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_filter(env_filter(level));
    tracing_subscriber::registry().with(log_layer).init();
}
