//! Core types for the IMU/camera calibration pipeline.
//!
//! This crate knows nothing about processes. It covers:
//! - the immutable run configuration ([`RunConfig`]),
//! - dataset layout discovery ([`DatasetLayout`]),
//! - deterministic artifact naming ([`resolve`], [`ArtifactPaths`]),
//! - vendor telemetry normalization ([`normalize_file`]),
//! - the spline fusion result format and its diagnostic report.

mod config;
mod dataset;
mod logger;
mod paths;
mod report;
mod result;
mod telemetry;

pub use config::{
    format_flag, format_float, ArtifactClass, BoardConfig, BoardType, CameraModel, ConfigError,
    GravityAxis, Platform, RecomputePolicy, RunConfig, SplineQuantiles,
};
pub use dataset::{DatasetDir, DatasetLayout, DatasetLayoutError, Recording, RecordingKind};
pub use paths::{normalized_telemetry_path, resolve, ArtifactPaths, SIGNAL_DUMP_FILES};
pub use report::{
    format_signal_row, write_report, write_signal_dumps, ReportError, ResultStats, SensorStats,
    Signal,
};
pub use result::{RunResult, TrajectorySample, Xyz};
pub use telemetry::{normalize_file, Telemetry, TelemetryFormat, TelemetryFormatError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{
    enter_stage, init_with_level, init_with_verbosity, level_for_verbosity, StageScope,
};
