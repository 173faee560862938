use eyre::Result;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
};

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 4,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 3,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Output format of the stdout log layer
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Multi-line, human readable
    Pretty,
    /// One line per event, abbreviated span context
    Compact,
    /// One JSON object per event
    Json,
    /// One line per event with full span context
    #[serde(other)]
    #[default]
    Full,
}

/// Configuration for the tracing subscribers
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    fmt: Style,
    #[serde(default)]
    level: Level,
}

impl TracingConfig {
    /// Build a config from its parts
    pub fn new(fmt: Style, level: Level) -> Self {
        Self { fmt, level }
    }

    /// Configured verbosity
    pub fn level(&self) -> Level {
        self.level
    }

    /// Per-target filter applied to every layer
    pub fn targets(&self) -> Targets {
        let mut target_layer = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            // only show these debug and trace logs at trace level
            target_layer = target_layer.with_target("hyper", Level::Info);
            target_layer = target_layer.with_target("h2", Level::Info);
            target_layer = target_layer.with_target("tonic", Level::Info);
            target_layer = target_layer.with_target("rocksdb", Level::Warn);
        }
        target_layer
    }

    /// Attempt to instantiate and register a tracing subscriber setup from
    /// settings. Meant to be called once by the binary embedding the
    /// manager, right after loading its settings.
    pub fn start_tracing(&self) -> Result<()> {
        let fmt_layer = match self.fmt {
            Style::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
            Style::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
            Style::Json => tracing_subscriber::fmt::layer().json().boxed(),
            Style::Full => tracing_subscriber::fmt::layer().boxed(),
        };
        let err_layer = tracing_error::ErrorLayer::default();

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(self.targets())
            .with(err_layer)
            .try_init()?;
        Ok(())
    }
}
