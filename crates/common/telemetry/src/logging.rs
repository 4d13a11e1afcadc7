// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{env, io::IsTerminal, sync::Once};

use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, fmt::MakeWriter, layer::SubscriberExt,
    registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets configuration files spell "use the default" either by omitting a field
/// or by leaving it blank.
///
/// # Errors
/// Returns an error if the non-empty string does not name a valid `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Default log level filter when neither `LoggingOptions::level` nor
/// `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("Failed to bridge log records into tracing"))]
    LogBridge {
        source: tracing_log::log::SetLoggerError,
    },

    #[snafu(display("Invalid log level filter: {level}"))]
    InvalidLevel {
        level:  String,
        source: filter::ParseError,
    },

    #[snafu(display("Failed to initialize rolling log files in {dir}"))]
    RollingAppender {
        dir:    String,
        source: tracing_appender::rolling::InitError,
    },

    #[snafu(display("A global tracing subscriber is already installed"))]
    SetGlobal {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

/// Configuration options for the logging system.
///
/// Controls where log events go (stdout, rolling files) and how they are
/// rendered. Every field has a default, so an empty config section is valid.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory path for storing log files.
    ///
    /// When set to a non-empty string, log files will be created in this
    /// directory with automatic hourly rotation, plus a separate error-only
    /// file. If empty, only stdout logging will be used.
    #[default = ""]
    #[builder(into, default)]
    pub dir: String,

    /// Log level filter string.
    ///
    /// Supports target syntax like "info" or "info,parfetch_downloader=debug".
    /// If None, falls back to the RUST_LOG environment variable or "info".
    #[builder(into)]
    pub level: Option<String>,

    /// Output format for log messages.
    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated log files to retain per log kind.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Whether to output logs to stdout in addition to files.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// JSON objects with structured fields, for log aggregation systems.
    ///
    /// ```json
    /// {"timestamp":"2025-01-01T12:00:00Z","level":"INFO","target":"parfetch","fields":{"message":"download completed"}}
    /// ```
    Json,

    /// Human-readable text, for consoles and development.
    ///
    /// ```text
    /// 2025-01-01T12:00:00.123Z  INFO parfetch: download completed
    /// ```
    #[default]
    Text,
}

/// Install the global tracing subscriber.
///
/// Sets up these layers depending on `opts`:
///
/// - **Stdout Layer**: if `append_stdout` is true
/// - **File Layer**: hourly rotated `<app_name>.*` files, if `dir` is set
/// - **Error File Layer**: error-only `<app_name>-err.*` files, if `dir` is set
///
/// `log` records from dependencies are bridged into tracing.
///
/// Returns the `WorkerGuard`s of the non-blocking writers. Keep them alive for
/// as long as logging is needed; dropping them flushes and stops the writers.
///
/// Only the first call installs anything. Later calls return no guards.
pub fn init_global_logging(
    app_name: &str,
    opts: &LoggingOptions,
) -> Result<Vec<WorkerGuard>, LoggingError> {
    static START: Once = Once::new();
    let mut result = Ok(Vec::new());

    START.call_once(|| result = install(app_name, opts));

    result
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>, LoggingError> {
    let mut guards = vec![];

    let level = opts
        .level
        .clone()
        .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
        .unwrap_or_else(|| DEFAULT_LOG_TARGETS.to_string());
    let targets = level
        .parse::<filter::Targets>()
        .context(InvalidLevelSnafu { level: &level })?;

    let stdout_logging_layer = if opts.append_stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        Some(fmt_layer(
            writer,
            opts.log_format,
            std::io::stdout().is_terminal(),
        ))
    } else {
        None
    };

    let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
        (None, None)
    } else {
        let (writer, guard) = tracing_appender::non_blocking(rolling_appender(opts, app_name)?);
        guards.push(guard);
        let file_layer = fmt_layer(writer, opts.log_format, false);

        let err_prefix = format!("{app_name}-err");
        let (writer, guard) =
            tracing_appender::non_blocking(rolling_appender(opts, &err_prefix)?);
        guards.push(guard);
        let err_layer = fmt_layer(writer, opts.log_format, false)
            .with_filter(filter::LevelFilter::ERROR)
            .boxed();

        (Some(file_layer), Some(err_layer))
    };

    LogTracer::init().context(LogBridgeSnafu)?;

    let subscriber = Registry::default()
        .with(targets)
        .with(stdout_logging_layer)
        .with(file_logging_layer)
        .with(err_file_logging_layer);
    tracing::subscriber::set_global_default(subscriber).context(SetGlobalSnafu)?;

    Ok(guards)
}

fn rolling_appender(
    opts: &LoggingOptions,
    prefix: &str,
) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .context(RollingAppenderSnafu { dir: &opts.dir })
}

fn fmt_layer<S, W>(writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}
