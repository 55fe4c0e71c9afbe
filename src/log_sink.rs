//! Crash-safe log sink
//!
//! Every diagnostic grefsen produces ends up here once a log file has been
//! requested. The sink renders each record as one fixed-format line:
//!
//! ```text
//! [   1.234 W] grefsen::supervisor:42: message
//! ```
//!
//! The file is opened lazily on the first record and kept open (append mode)
//! until the process exits. Each line is written with a single `write_all`
//! so a crash never leaves half a record behind, and a [`Severity::Fatal`]
//! record is synced to disk before the process aborts.
//!
//! Without a configured file the compact `tracing-subscriber` formatter on
//! stderr is used instead, and the sink only sees fatal records.

use once_cell::sync::Lazy;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used for the log file when `RUST_LOG` is not set
const FILE_FILTER: &str = "debug";
/// Filter used for stderr when `RUST_LOG` is not set
const STDERR_FILTER: &str = "info";

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Critical,
    /// Unrecoverable; the process aborts once the record is written
    Fatal,
}

impl Severity {
    /// Single character used in the rendered line
    pub fn as_char(self) -> char {
        match self {
            Severity::Debug => 'd',
            Severity::Info => 'i',
            Severity::Warning => 'W',
            Severity::Critical => '!',
            Severity::Fatal => 'F',
        }
    }
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::TRACE | Level::DEBUG => Severity::Debug,
            Level::INFO => Severity::Info,
            Level::WARN => Severity::Warning,
            Level::ERROR => Severity::Critical,
        }
    }
}

/// One line of the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Milliseconds since the process started
    pub elapsed_millis: u64,
    pub severity: Severity,
    /// Where the record came from, usually `module::path:line`
    pub origin: Option<String>,
    pub message: String,
}

impl LogRecord {
    /// Create a record stamped with the global sink's clock
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            elapsed_millis: LogSink::global().elapsed_millis(),
            severity,
            origin: None,
            message: message.into(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The full line, including the trailing newline
    pub fn render(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:4}.{:03} {}] ",
            self.elapsed_millis / 1000,
            self.elapsed_millis % 1000,
            self.severity.as_char()
        )?;
        if let Some(origin) = &self.origin {
            write!(f, "{origin}: ")?;
        }
        f.write_str(&self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    /// The destination can only change before anything was logged
    #[error("log destination cannot change after the first record was written")]
    AlreadyWritten,
}

#[derive(Debug)]
enum Destination {
    Stderr,
    File { path: PathBuf, file: Option<File> },
}

impl Destination {
    fn open_if_needed(&mut self) {
        let Destination::File { path, file } = &mut *self else {
            return;
        };
        if file.is_some() {
            return;
        }
        match OpenOptions::new().create(true).append(true).open(&*path) {
            Ok(opened) => *file = Some(opened),
            Err(err) => {
                eprintln!(
                    "grefsen: cannot open log file {}: {err}; logging to stderr",
                    path.display()
                );
                *self = Destination::Stderr;
            }
        }
    }

    fn write_line(&mut self, line: &[u8], fatal: bool) {
        self.open_if_needed();
        let mut fallback_notice = None;
        if let Destination::File {
            path,
            file: Some(file),
        } = &mut *self
        {
            let written = file.write_all(line).and_then(|()| {
                if fatal {
                    file.sync_data()
                } else {
                    Ok(())
                }
            });
            let Err(err) = written else {
                return;
            };
            fallback_notice = Some(format!(
                "grefsen: cannot write log file {}: {err}; logging to stderr\n",
                path.display()
            ));
            *self = Destination::Stderr;
        }

        let mut stderr = io::stderr().lock();
        if let Some(notice) = fallback_notice {
            let _ = stderr.write_all(notice.as_bytes());
        }
        let _ = stderr.write_all(line);
        let _ = stderr.flush();
    }
}

/// Process-wide log destination
#[derive(Debug)]
pub struct LogSink {
    started: Instant,
    written: AtomicBool,
    destination: Mutex<Destination>,
}

static GLOBAL_SINK: Lazy<LogSink> = Lazy::new(LogSink::new);

impl LogSink {
    /// A sink writing to stderr whose clock starts now
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            written: AtomicBool::new(false),
            destination: Mutex::new(Destination::Stderr),
        }
    }

    /// The sink shared by the whole process
    ///
    /// The first call starts the clock used for `elapsed_millis`, so the
    /// entry point touches it before doing anything else.
    pub fn global() -> &'static LogSink {
        &GLOBAL_SINK
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Send all further records to `path`
    ///
    /// The file is not touched until the first record arrives.
    pub fn configure(&self, path: impl Into<PathBuf>) -> Result<(), LogSinkError> {
        let mut destination = self.lock();
        if self.written.load(Ordering::SeqCst) {
            return Err(LogSinkError::AlreadyWritten);
        }
        *destination = Destination::File {
            path: path.into(),
            file: None,
        };
        Ok(())
    }

    /// Path of the log file, if one is configured and usable
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            Destination::File { path, .. } => Some(path.clone()),
            Destination::Stderr => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.path().is_some()
    }

    /// Write one record; aborts the process if it is fatal
    pub fn record(&self, record: &LogRecord) {
        let fatal = record.severity == Severity::Fatal;
        let line = record.render();
        {
            let mut destination = self.lock();
            self.written.store(true, Ordering::SeqCst);
            destination.write_line(line.as_bytes(), fatal);
        }
        if fatal {
            std::process::abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Destination> {
        // A writer that panicked mid-record must not silence everyone else
        self.destination
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Log a fatal record through the global sink and abort
///
/// Prefer the [`fatal!`](crate::fatal) macro, which fills in the origin.
pub fn fatal(origin: Option<String>, message: String) -> ! {
    let sink = LogSink::global();
    sink.record(&LogRecord {
        elapsed_millis: sink.elapsed_millis(),
        severity: Severity::Fatal,
        origin,
        message,
    });
    std::process::abort()
}

/// Log an unrecoverable condition and abort the process
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::log_sink::fatal(
            ::std::option::Option::Some(::std::format!(
                "{}:{}",
                ::std::module_path!(),
                ::std::line!()
            )),
            ::std::format!($($arg)+),
        )
    };
}

/// `tracing` layer feeding events into a [`LogSink`]
pub struct LogSinkLayer {
    sink: &'static LogSink,
}

impl LogSinkLayer {
    pub fn new(sink: &'static LogSink) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let origin = match (metadata.module_path(), metadata.line()) {
            (Some(module), Some(line)) => Some(format!("{module}:{line}")),
            (Some(module), None) => Some(module.to_string()),
            _ => None,
        };

        self.sink.record(&LogRecord {
            elapsed_millis: self.sink.elapsed_millis(),
            severity: Severity::from(metadata.level()),
            origin,
            message: visitor.finish(),
        });
    }
}

/// Collects the `message` field and appends the others as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        use std::fmt::Write as _;
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        use std::fmt::Write as _;
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the process-wide `tracing` subscriber
///
/// With a configured file every event goes through `sink`; otherwise the
/// compact formatter writes to stderr. Calling this twice keeps the first
/// subscriber.
pub fn init_tracing(sink: &'static LogSink) {
    if sink.is_configured() {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(FILE_FILTER));
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(LogSinkLayer::new(sink))
            .try_init();
    } else {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(STDERR_FILTER));
        let _ = tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .try_init();
    }
}

/// Point the global sink at `path` and install the subscriber
pub fn init_with_file(path: &Path) -> Result<(), LogSinkError> {
    let sink = LogSink::global();
    sink.configure(path)?;
    init_tracing(sink);
    Ok(())
}
