//! Locations of the external tools.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const EXTRACT_BOARD: &str = "extract_board_to_json";
pub const CALIBRATE_CAMERA: &str = "calibrate_camera";
pub const ESTIMATE_POSES: &str = "estimate_camera_poses_from_checkerboard";
pub const ESTIMATE_ROTATION: &str = "estimate_imu_to_camera_rotation";
pub const SPLINE_FUSION: &str = "continuous_time_imu_to_camera_calibration";
pub const IMU_BIAS_SCRIPT: &str = "get_imu_biases.py";
pub const SPLINE_WEIGHTS_SCRIPT: &str = "get_sew_for_dataset.py";

/// Subcommands of the `imucam` binary used as stages.
pub const NORMALIZE_SUBCOMMAND: &str = "normalize-telemetry";
pub const REPORT_SUBCOMMAND: &str = "report";

/// Where compiled tools, scripts and resources live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Directory holding the compiled calibration applications.
    pub build_root: PathBuf,
    /// Tool source tree with `python/` and `resource/` subdirectories.
    pub src_root: PathBuf,
    /// Interpreter for the helper scripts.
    pub python: PathBuf,
    /// Executable providing the built-in subcommands.
    pub self_exe: PathBuf,
}

impl ToolPaths {
    /// Defaults: `python3` from `PATH` and the currently running executable.
    pub fn new(build_root: impl Into<PathBuf>, src_root: impl Into<PathBuf>) -> Self {
        let self_exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("imucam"));
        Self {
            build_root: build_root.into(),
            src_root: src_root.into(),
            python: PathBuf::from("python3"),
            self_exe,
        }
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_self_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.self_exe = exe.into();
        self
    }

    pub fn binary(&self, name: &str) -> PathBuf {
        self.build_root.join(name)
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.src_root.join("python").join(name)
    }

    pub fn aruco_detector_params(&self) -> PathBuf {
        self.src_root
            .join("resource")
            .join("charuco_detector_params.yml")
    }

    pub fn python(&self) -> &Path {
        &self.python
    }
}
