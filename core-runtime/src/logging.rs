//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with `tracing` crate, supporting:
//! - JSON and pretty-print output formats
//! - Module-level filtering
//! - Redaction of device serial numbers
//! - Integration with host logging via `LoggerSink`
//!
//! ## Overview
//!
//! This module configures the `tracing-subscriber` infrastructure and
//! forwards logs to the host platform through the `LoggerSink` trait. When a
//! sink is configured, every event that survives filtering is mirrored to the
//! host logger (`os_log`, Logcat, browser console) while still flowing
//! through the standard `tracing` layers.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LoggingConfig::default()
//!         .with_format(LogFormat::Pretty)
//!         .with_level(LogLevel::Debug);
//!
//!     init_logging(config).expect("Failed to initialize logging");
//!
//!     tracing::info!(device_id = 3, "Serial port opened");
//! }
//! ```
//!
//! ## LoggerSink integration
//!
//! The sink receives structured [`LogEntry`] instances with the event
//! message plus any fields emitted on the event. With redaction enabled
//! (the default), sensitive fields such as `serial_number` are masked before
//! they reach the host.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose events pass the default filter at the configured level.
const WORKSPACE_TARGETS: &[&str] = &[
    "usb_serial_bridge",
    "core_runtime",
    "core_serial",
    "core_service",
    "bridge_desktop",
    "bridge_traits",
];

/// Output format of the stdout layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored; development builds
    Pretty,
    /// One JSON object per line; release builds
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the workspace crates when no custom filter is set
    pub level: LogLevel,
    /// Mask device serial numbers in entries forwarded to the host sink
    pub redact_serial_numbers: bool,
    /// `EnvFilter` directives replacing the default, e.g. `"core_serial=trace"`
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Print the event target (`core_serial::session`, ...) on stdout
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_serial_numbers: true,
            filter: None,
            logger_sink: None,
            display_target: true,
        }
    }
}

impl std::fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_serial_numbers", &self.redact_serial_numbers)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_serial_redaction(mut self, redact: bool) -> Self {
        self.redact_serial_numbers = redact;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or the custom filter does not
/// parse.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let target = config.display_target;

    // Exactly one of these is Some; a None layer is a no-op.
    let pretty = (config.format == LogFormat::Pretty)
        .then(|| fmt::layer().pretty().with_target(target).with_writer(io::stdout));
    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(target)
            .with_writer(io::stdout)
    });
    let compact = (config.format == LogFormat::Compact)
        .then(|| fmt::layer().compact().with_target(target).with_writer(io::stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .with(LoggerSinkLayer::new(
            config.logger_sink,
            config.redact_serial_numbers,
        ))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = level_directive(config.level);
            WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, level))
                .chain(std::iter::once("serialport=warn".to_string()))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(directives).map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Mirrors enabled events to the host `LoggerSink`.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn entry_for<S>(&self, event: &Event<'_>, level: LogLevel, ctx: &Context<'_, S>) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);

        for (key, value) in fields.values {
            let value = if self.redact {
                redact_if_sensitive(&key, &value)
            } else {
                value
            };
            entry = entry.with_field(key, value);
        }

        match ctx.lookup_current() {
            Some(span) => entry.with_span_id(span.name()),
            None => entry,
        }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let level = log_level(*event.metadata().level());
        if level < sink.min_level() {
            return;
        }

        let entry = self.entry_for(event, level, &ctx);
        let sink = Arc::clone(sink);

        // Never block a runtime worker on the host logger.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.log(entry).await {
                        eprintln!("LoggerSink error: {}", err);
                    }
                });
            }
            Err(_) => {
                if let Err(err) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("LoggerSink error: {}", err);
                }
            }
        }
    }
}

/// Collects the message and fields of one event as strings.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: HashMap<String, String>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }
}

fn log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Mask a device serial number, keeping the last four characters so two
/// adapters can still be told apart. Other fields pass through unchanged.
///
/// ```ignore
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("serial_number", "A10KX3JD"), "****X3JD");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const SERIAL_FIELDS: &[&str] = &["serial_number", "serialnumber", "serial_no"];

    let field = field_name.to_lowercase();
    if !SERIAL_FIELDS.iter().any(|name| field.contains(name)) {
        return value.to_string();
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "[REDACTED]".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
