//! Stderr logger for pipeline runs.
//!
//! Lines look like `[  12.304s  INFO calibrate_camera] message`: seconds since
//! installation, level, and the stage being executed when the record was
//! emitted. Outside of a stage the tag is omitted. The orchestrator marks the
//! active stage with [`enter_stage`].

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::EnvFilter;

static ACTIVE_STAGE: Mutex<Option<&'static str>> = Mutex::new(None);

fn set_active_stage(stage: Option<&'static str>) -> Option<&'static str> {
    match ACTIVE_STAGE.lock() {
        Ok(mut slot) => std::mem::replace(&mut *slot, stage),
        Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), stage),
    }
}

fn active_stage() -> Option<&'static str> {
    match ACTIVE_STAGE.lock() {
        Ok(slot) => *slot,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Restores the previously active stage tag when dropped.
#[must_use = "the stage tag is cleared when the guard is dropped"]
pub struct StageScope {
    previous: Option<&'static str>,
}

impl Drop for StageScope {
    fn drop(&mut self) {
        set_active_stage(self.previous);
    }
}

/// Tag log lines with `stage` until the returned guard is dropped.
pub fn enter_stage(stage: &'static str) -> StageScope {
    StageScope {
        previous: set_active_stage(Some(stage)),
    }
}

struct Line<'a> {
    elapsed_s: f64,
    level: Level,
    stage: Option<&'a str>,
    message: &'a dyn fmt::Display,
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:8.3}s {:>5}", self.elapsed_s, self.level)?;
        if let Some(stage) = self.stage {
            write!(f, " {stage}")?;
        }
        write!(f, "] {}", self.message)
    }
}

struct RunLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Line {
            elapsed_s: self.started.elapsed().as_secs_f64(),
            level: record.level(),
            stage: active_stage(),
            message: record.args(),
        };
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<RunLogger> = OnceLock::new();

/// Map the CLI `--verbose` level to a log filter.
///
/// `0` keeps warnings and errors, `1` adds stage banners, `2+` adds debug
/// output such as full stage command lines.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install the stderr logger. Later calls keep the first level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| RunLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// [`init_with_level`] with the level derived from `--verbose`.
pub fn init_with_verbosity(verbose: u8) -> Result<(), log::SetLoggerError> {
    init_with_level(level_for_verbosity(verbose))
}

/// Install a `tracing` subscriber on stderr instead of the plain logger.
///
/// `RUST_LOG` overrides the filter derived from `verbose`. With `json` every
/// event is one JSON object; stage spans are reported when they close.
#[cfg(feature = "tracing")]
pub fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbose).to_string().to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(tracing_subscriber::fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
