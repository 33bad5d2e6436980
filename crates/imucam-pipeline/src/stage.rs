//! Stage descriptors.

use imucam_core::ArtifactClass;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::runner::StageInvocation;

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ExtractCamCorners,
    ExtractCamImuCorners,
    CalibrateCamera,
    NormalizeCamImuTelemetry,
    NormalizeBiasTelemetry,
    EstimateImuBias,
    EstimateCameraPoses,
    EstimateSplineWeights,
    InitImuToCameraRotation,
    SplineFusion,
    ReportResults,
}

impl StageId {
    pub const ALL: [StageId; 11] = [
        StageId::ExtractCamCorners,
        StageId::ExtractCamImuCorners,
        StageId::CalibrateCamera,
        StageId::NormalizeCamImuTelemetry,
        StageId::NormalizeBiasTelemetry,
        StageId::EstimateImuBias,
        StageId::EstimateCameraPoses,
        StageId::EstimateSplineWeights,
        StageId::InitImuToCameraRotation,
        StageId::SplineFusion,
        StageId::ReportResults,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::ExtractCamCorners => "extract_cam_corners",
            StageId::ExtractCamImuCorners => "extract_cam_imu_corners",
            StageId::CalibrateCamera => "calibrate_camera",
            StageId::NormalizeCamImuTelemetry => "normalize_cam_imu_telemetry",
            StageId::NormalizeBiasTelemetry => "normalize_bias_telemetry",
            StageId::EstimateImuBias => "estimate_imu_bias",
            StageId::EstimateCameraPoses => "estimate_camera_poses",
            StageId::EstimateSplineWeights => "estimate_spline_weights",
            StageId::InitImuToCameraRotation => "init_imu_to_camera_rotation",
            StageId::SplineFusion => "spline_fusion",
            StageId::ReportResults => "report_results",
        }
    }

    /// Banner text.
    pub fn title(self) -> &'static str {
        match self {
            StageId::ExtractCamCorners => "Extracting corners for camera calibration",
            StageId::ExtractCamImuCorners => "Extracting corners for IMU-camera calibration",
            StageId::CalibrateCamera => "Calibrating camera intrinsics",
            StageId::NormalizeCamImuTelemetry => "Normalizing IMU-camera telemetry",
            StageId::NormalizeBiasTelemetry => "Normalizing IMU bias telemetry",
            StageId::EstimateImuBias => "Estimating IMU biases",
            StageId::EstimateCameraPoses => "Estimating camera poses for IMU-camera calibration",
            StageId::EstimateSplineWeights => "Estimating spline error weighting and knot spacing",
            StageId::InitImuToCameraRotation => "Initializing IMU to camera rotation",
            StageId::SplineFusion => "Optimizing IMU to camera calibration using spline fusion",
            StageId::ReportResults => "Reporting calibration results",
        }
    }

    /// 1-based position in the fixed stage order.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Recompute flag consulted before reusing this stage's outputs.
    pub fn artifact_class(self) -> ArtifactClass {
        match self {
            StageId::ExtractCamCorners | StageId::ExtractCamImuCorners => ArtifactClass::Corners,
            StageId::CalibrateCamera => ArtifactClass::CameraCalibration,
            StageId::NormalizeCamImuTelemetry | StageId::NormalizeBiasTelemetry => {
                ArtifactClass::Telemetry
            }
            StageId::EstimateImuBias => ArtifactClass::ImuBias,
            StageId::EstimateCameraPoses => ArtifactClass::Poses,
            StageId::EstimateSplineWeights => ArtifactClass::SplineWeights,
            StageId::InitImuToCameraRotation => ArtifactClass::RotationInit,
            StageId::SplineFusion => ArtifactClass::SplineFusion,
            StageId::ReportResults => ArtifactClass::Report,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a stage executes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Program {
    /// Compiled calibration tool from the build tree.
    Tool { path: PathBuf },
    /// Script run through an interpreter.
    Script { interpreter: PathBuf, script: PathBuf },
    /// Subcommand of this workspace's own binary.
    Builtin { exe: PathBuf, subcommand: String },
}

impl Program {
    pub fn executable(&self) -> &Path {
        match self {
            Program::Tool { path } => path,
            Program::Script { interpreter, .. } => interpreter,
            Program::Builtin { exe, .. } => exe,
        }
    }

    /// Arguments placed before the stage's `--key=value` list.
    pub fn leading_args(&self) -> Vec<String> {
        match self {
            Program::Tool { .. } => Vec::new(),
            Program::Script { script, .. } => vec![script.display().to_string()],
            Program::Builtin { subcommand, .. } => vec![subcommand.clone()],
        }
    }
}

/// Where an input artifact comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Raw dataset or user-supplied file.
    Dataset,
    /// Output of an earlier stage.
    Stage(StageId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub source: ArtifactSource,
}

impl ArtifactRef {
    pub fn dataset(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: ArtifactSource::Dataset,
        }
    }

    pub fn from_stage(stage: StageId, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: ArtifactSource::Stage(stage),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Optional { enabled: bool },
}

/// One node of the stage graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub id: StageId,
    pub program: Program,
    pub inputs: Vec<ArtifactRef>,
    pub outputs: Vec<PathBuf>,
    /// `--key=value` arguments, a pure function of the run configuration.
    pub args: Vec<String>,
    pub requirement: Requirement,
}

impl StageDescriptor {
    pub fn is_enabled(&self) -> bool {
        match self.requirement {
            Requirement::Required => true,
            Requirement::Optional { enabled } => enabled,
        }
    }

    /// Placeholder for an optional stage turned off by the configuration.
    pub fn disabled(id: StageId, program: Program) -> Self {
        Self {
            id,
            program,
            inputs: Vec::new(),
            outputs: Vec::new(),
            args: Vec::new(),
            requirement: Requirement::Optional { enabled: false },
        }
    }

    pub fn invocation(&self) -> StageInvocation {
        let mut args = self.program.leading_args();
        args.extend(self.args.iter().cloned());
        StageInvocation {
            stage: self.id,
            program: self.program.executable().to_path_buf(),
            args,
            outputs: self.outputs.clone(),
        }
    }

    /// Invocation arguments that determine what the stage writes. Logging
    /// and forcing switches are left out.
    pub fn content_args(&self) -> Vec<String> {
        self.invocation()
            .args
            .into_iter()
            .filter(|a| !NON_CONTENT_ARGS.iter().any(|key| a.starts_with(&format!("--{key}="))))
            .collect()
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn command_line(&self) -> String {
        let inv = self.invocation();
        let mut line = inv.program.display().to_string();
        for arg in &inv.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

const NON_CONTENT_ARGS: [&str; 3] = ["verbose", "logtostderr", "recompute_corners"];

/// `--key=value`.
pub(crate) fn arg(key: &str, value: impl fmt::Display) -> String {
    format!("--{key}={value}")
}

/// `--key=<path>`.
pub(crate) fn path_arg(key: &str, path: &Path) -> String {
    arg(key, path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_numbers_follow_order() {
        for (idx, id) in StageId::ALL.iter().enumerate() {
            assert_eq!(id.number(), idx + 1);
        }
        assert_eq!(StageId::SplineFusion.number(), 10);
    }

    #[test]
    fn script_invocation_puts_script_first() {
        let stage = StageDescriptor {
            id: StageId::EstimateSplineWeights,
            program: Program::Script {
                interpreter: PathBuf::from("python3"),
                script: PathBuf::from("/src/python/get_sew_for_dataset.py"),
            },
            inputs: Vec::new(),
            outputs: vec![PathBuf::from("/d/spline.json")],
            args: vec![arg("q_so3", 0.99)],
            requirement: Requirement::Required,
        };
        let inv = stage.invocation();
        assert_eq!(inv.program, PathBuf::from("python3"));
        assert_eq!(
            inv.args,
            vec!["/src/python/get_sew_for_dataset.py", "--q_so3=0.99"]
        );
        assert_eq!(
            stage.command_line(),
            "python3 /src/python/get_sew_for_dataset.py --q_so3=0.99"
        );
    }

    #[test]
    fn content_args_drop_logging_switches() {
        let stage = StageDescriptor {
            id: StageId::CalibrateCamera,
            program: Program::Tool {
                path: PathBuf::from("/build/calibrate_camera"),
            },
            inputs: Vec::new(),
            outputs: vec![PathBuf::from("/d/cam_calib.json")],
            args: vec![
                arg("grid_size", 0.04),
                arg("verbose", 1),
                arg("logtostderr", 0),
                arg("verbose_level", 2),
            ],
            requirement: Requirement::Required,
        };
        assert_eq!(
            stage.content_args(),
            vec!["--grid_size=0.04", "--verbose_level=2"]
        );
    }
}
