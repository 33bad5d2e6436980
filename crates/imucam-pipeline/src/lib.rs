//! Stage graph and orchestration for the IMU/camera calibration pipeline.
//!
//! Typical use:
//!
//! ```no_run
//! use imucam_core::{resolve, Platform, RunConfig};
//! use imucam_pipeline::{Pipeline, ProcessRunner, StageGraph, ToolPaths};
//!
//! let config = RunConfig::for_platform(Platform::Zed);
//! let paths = resolve("/data/run1".as_ref(), &config).unwrap();
//! let tools = ToolPaths::new("/opt/build/applications", "/opt/src");
//! let graph = StageGraph::build(&config, &paths, &tools);
//! let mut pipeline = Pipeline::new(graph, config.recompute.clone(), ProcessRunner::new());
//! pipeline.run().unwrap();
//! ```

mod graph;
mod orchestrator;
mod runner;
mod stage;
mod stamp;
mod tools;

pub use graph::{GraphError, StageGraph};
pub use orchestrator::{
    artifact_present, Pipeline, PipelineError, PipelineState, PlannedStage, RunReport,
    StageAction, StageOutcome, StageRecord,
};
pub use runner::{
    ProcessRunner, RecordingRunner, RunnerError, StageExit, StageInvocation, StageRunner,
};
pub use stage::{ArtifactRef, ArtifactSource, Program, Requirement, StageDescriptor, StageId};
pub use tools::{
    ToolPaths, CALIBRATE_CAMERA, ESTIMATE_POSES, ESTIMATE_ROTATION, EXTRACT_BOARD,
    IMU_BIAS_SCRIPT, NORMALIZE_SUBCOMMAND, REPORT_SUBCOMMAND, SPLINE_FUSION,
    SPLINE_WEIGHTS_SCRIPT,
};
