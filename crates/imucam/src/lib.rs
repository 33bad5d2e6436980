//! Facade crate for the `imucam-*` workspace.
//!
//! This crate provides:
//! - re-exports of the configuration, dataset and artifact-naming types
//!   (`imucam::core`) and of the stage graph and orchestrator
//!   (`imucam::pipeline`),
//! - (feature `cli`) the `imucam` binary that runs the calibration pipeline
//!   for a platform and hosts the built-in telemetry and report stages.
//!
//! ## Quickstart
//!
//! ```no_run
//! use imucam::core::{resolve, Platform, RunConfig};
//! use imucam::pipeline::{Pipeline, ProcessRunner, StageGraph, ToolPaths};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::for_platform(Platform::GoPro);
//! config.validate()?;
//! let paths = resolve("/data/gopro_run".as_ref(), &config)?;
//! let tools = ToolPaths::new("/opt/build/applications", "/opt/src");
//! let graph = StageGraph::build(&config, &paths, &tools);
//!
//! let mut pipeline = Pipeline::new(graph, config.recompute.clone(), ProcessRunner::new());
//! pipeline.run()?;
//! println!("result: {}", paths.result.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `imucam::core`: run configuration, dataset layout, artifact paths,
//!   telemetry normalization, result reporting, logger.
//! - `imucam::pipeline`: stage descriptors, stage graph, runners, orchestrator.

pub use imucam_core as core;
pub use imucam_pipeline as pipeline;

pub use imucam_core::{resolve, ArtifactPaths, Platform, RunConfig};
pub use imucam_pipeline::{Pipeline, PipelineError, StageGraph, StageId, ToolPaths};
