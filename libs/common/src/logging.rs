//! Logging bootstrap for the point server
//!
//! Console output plus an optional daily rolling log file, both in the
//! `timestamp [LEVEL] message` format (the file may use JSON lines instead).
//! The filter sits behind a reload handle so it can be changed at runtime.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::{Layered, SubscriberExt},
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV: &str = "POINTSRV_LOG_DIR";

const DEFAULT_LOG_DIR: &str = "logs";

type BoxedLayer = Box<dyn Layer<Layered<reload::Layer<EnvFilter, Registry>, Registry>> + Send + Sync>;

/// Level tag and its ANSI colour
fn level_tag(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// `2026-03-02T00:50:44.809112Z [INFO] TCP: Polling started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let (tag, colour) = level_tag(*event.metadata().level());
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        if writer.has_ansi_escapes() {
            write!(writer, "{} {}{}\x1b[0m ", ts, colour, tag)?;
        } else {
            write!(writer, "{} {} ", ts, tag)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct LoggingState {
    reload: reload::Handle<EnvFilter, Registry>,
    filter: Mutex<String>,
    // Dropping the guard stops the file writer
    _guard: Mutex<Option<WorkerGuard>>,
}

static STATE: OnceLock<LoggingState> = OnceLock::new();
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

fn env_log_dir() -> Option<PathBuf> {
    std::env::var(LOG_DIR_ENV).ok().map(PathBuf::from)
}

/// Fix the log root: `POINTSRV_LOG_DIR` > `config_dir` > `logs`
///
/// Only the first call has an effect.
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        env_log_dir()
            .or_else(|| config_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    });
}

pub fn get_log_root() -> PathBuf {
    LOG_ROOT
        .get()
        .cloned()
        .or_else(env_log_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// File prefix and default debug target
    pub service_name: String,
    pub log_dir: PathBuf,
    /// Filter used when RUST_LOG is unset, e.g. `info` or `info,pointsrv=trace`
    pub level: String,
    /// JSON lines in the log file
    pub enable_json: bool,
    pub enable_file: bool,
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            level: "info".to_string(),
            enable_json: false,
            enable_file: true,
            max_log_files: 30,
        }
    }
}

impl LogConfig {
    /// RUST_LOG, else a full directive from `level`, else `<level>,<service>=debug`
    pub fn filter_string(&self) -> String {
        if let Ok(env) = std::env::var("RUST_LOG") {
            if !env.is_empty() {
                return env;
            }
        }
        if self.level.contains(['=', ',']) {
            self.level.clone()
        } else {
            format!("{},{}=debug", self.level, self.service_name)
        }
    }

    fn file_writer(&self) -> Result<(NonBlocking, WorkerGuard), Box<dyn std::error::Error>> {
        fs::create_dir_all(&self.log_dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.service_name.as_str())
            .filename_suffix("log")
            .max_log_files(self.max_log_files.max(1))
            .build(&self.log_dir)?;
        Ok(tracing_appender::non_blocking(appender))
    }
}

/// Install the global subscriber; fails when one is already installed
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = config.filter_string();
    let (filter_layer, reload) = reload::Layer::new(EnvFilter::try_new(&filter)?);

    let mut layers: Vec<BoxedLayer> = vec![fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed()];

    let guard = if config.enable_file {
        let (writer, guard) = config.file_writer()?;
        layers.push(if config.enable_json {
            fmt::layer().json().with_writer(writer).with_target(true).boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        });
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(layers)
        .try_init()?;

    let _ = STATE.set(LoggingState {
        reload,
        filter: Mutex::new(filter.clone()),
        _guard: Mutex::new(guard),
    });

    tracing::info!(
        "Logging: {} @ {} (filter: {})",
        config.service_name,
        config.log_dir.display(),
        filter
    );
    Ok(())
}

/// Replace the active filter, e.g. `debug` or `info,pointsrv::sync=trace`
pub fn set_log_level(level: &str) -> Result<(), String> {
    let state = STATE
        .get()
        .ok_or("Logging not initialized with reload support")?;
    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    state
        .reload
        .reload(filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Ok(mut current) = state.filter.lock() {
        *current = level.to_string();
    }
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Active filter, `unknown` before initialisation
pub fn get_log_level() -> String {
    STATE
        .get()
        .and_then(|state| state.filter.lock().ok().map(|f| f.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}
