//! Run configuration shared by every pipeline stage.
//!
//! A [`RunConfig`] is built once (from the command line or a JSON file) and
//! then only read. Every artifact filename and every stage argument list is a
//! pure function of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::RecordingKind;
use crate::telemetry::TelemetryFormat;

/// Errors raised while loading or validating a [`RunConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("downsample factor must be finite and > 0 (got {0})")]
    InvalidDownsampleFactor(f64),
    #[error("checker square size must be finite and > 0 (got {0} m)")]
    InvalidSquareSize(f64),
    #[error("board needs at least 2x2 squares (got {x}x{y})")]
    InvalidSquareCount { x: u32, y: u32 },
    #[error("voxel grid size must be finite and > 0 (got {0})")]
    InvalidVoxelGridSize(f64),
    #[error("gravity constant must be finite and > 0 (got {0})")]
    InvalidGravity(f64),
    #[error("bias trim must be finite and >= 0 (got {0} s)")]
    InvalidBiasTrim(f64),
    #[error("spline quantile {name} must be in (0, 1) (got {value})")]
    InvalidQuantile { name: &'static str, value: f64 },
}

/// Intrinsic camera models understood by the calibration tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraModel {
    Pinhole,
    PinholeRadialTangential,
    DivisionUndistortion,
    DoubleSphere,
    ExtendedUnified,
    Fisheye,
}

impl CameraModel {
    pub const ALL: [CameraModel; 6] = [
        CameraModel::Pinhole,
        CameraModel::PinholeRadialTangential,
        CameraModel::DivisionUndistortion,
        CameraModel::DoubleSphere,
        CameraModel::ExtendedUnified,
        CameraModel::Fisheye,
    ];

    /// Name passed to the tools (`--camera_model_to_calibrate=`).
    pub fn as_str(self) -> &'static str {
        match self {
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::PinholeRadialTangential => "PINHOLE_RADIAL_TANGENTIAL",
            CameraModel::DivisionUndistortion => "DIVISION_UNDISTORTION",
            CameraModel::DoubleSphere => "DOUBLE_SPHERE",
            CameraModel::ExtendedUnified => "EXTENDED_UNIFIED",
            CameraModel::Fisheye => "FISHEYE",
        }
    }

    /// Short tag embedded in artifact filenames.
    pub fn abbr(self) -> &'static str {
        match self {
            CameraModel::Pinhole => "pn",
            CameraModel::PinholeRadialTangential => "prt",
            CameraModel::DivisionUndistortion => "div",
            CameraModel::DoubleSphere => "ds",
            CameraModel::ExtendedUnified => "eu",
            CameraModel::Fisheye => "fish",
        }
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calibration board family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    #[default]
    Charuco,
    Radon,
}

impl BoardType {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardType::Charuco => "charuco",
            BoardType::Radon => "radon",
        }
    }
}

/// Board axis aligned with gravity, if known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GravityAxis {
    X,
    Y,
    Z,
    Unknown,
}

impl GravityAxis {
    /// Value expected by the spline fusion tool (`--known_grav_dir_axis=`).
    ///
    /// The tool spells the unknown case `UNKOWN`.
    pub fn tool_value(self) -> &'static str {
        match self {
            GravityAxis::X => "X",
            GravityAxis::Y => "Y",
            GravityAxis::Z => "Z",
            GravityAxis::Unknown => "UNKOWN",
        }
    }
}

/// Sensor platform. Decides how recordings and telemetry are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// GoPro / MYNT-style datasets: `cam0` image sequences and EuRoC CSV telemetry.
    #[serde(alias = "mynteye")]
    GoPro,
    /// ZED-style datasets: `*video.avi` recordings and JSON-lines telemetry.
    Zed,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::GoPro => "gopro",
            Platform::Zed => "zed",
        }
    }

    pub fn recording_kind(self) -> RecordingKind {
        match self {
            Platform::GoPro => RecordingKind::ImageSequence,
            Platform::Zed => RecordingKind::VideoFile,
        }
    }

    pub fn telemetry_format(self) -> TelemetryFormat {
        match self {
            Platform::GoPro => TelemetryFormat::Csv,
            Platform::Zed => TelemetryFormat::Jsonl,
        }
    }
}

/// Classes of artifacts that can be forced to recompute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactClass {
    Corners,
    CameraCalibration,
    Telemetry,
    ImuBias,
    Poses,
    SplineWeights,
    RotationInit,
    SplineFusion,
    Report,
}

impl ArtifactClass {
    pub const ALL: [ArtifactClass; 9] = [
        ArtifactClass::Corners,
        ArtifactClass::CameraCalibration,
        ArtifactClass::Telemetry,
        ArtifactClass::ImuBias,
        ArtifactClass::Poses,
        ArtifactClass::SplineWeights,
        ArtifactClass::RotationInit,
        ArtifactClass::SplineFusion,
        ArtifactClass::Report,
    ];
}

/// Which artifact classes are regenerated even when they already exist.
///
/// Empty means "reuse everything that is on disk".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecomputePolicy {
    classes: BTreeSet<ArtifactClass>,
}

impl RecomputePolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            classes: ArtifactClass::ALL.into_iter().collect(),
        }
    }

    pub fn with(mut self, class: ArtifactClass) -> Self {
        self.classes.insert(class);
        self
    }

    pub fn should_recompute(&self, class: ArtifactClass) -> bool {
        self.classes.contains(&class)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = ArtifactClass> + '_ {
        self.classes.iter().copied()
    }
}

/// Calibration board geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub board_type: BoardType,
    /// Side length of one checker square in meters.
    pub square_size_m: f64,
    /// Square count (not inner corners) along x.
    pub squares_x: u32,
    /// Square count (not inner corners) along y.
    pub squares_y: u32,
}

impl BoardConfig {
    /// Filename tag, e.g. `charuco_10x8_0.021`.
    pub fn tag(&self) -> String {
        format!(
            "{}_{}x{}_{}",
            self.board_type.as_str(),
            self.squares_x,
            self.squares_y,
            format_float(self.square_size_m)
        )
    }
}

/// Quantiles used by the spline error weighting script.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplineQuantiles {
    pub q_so3: f64,
    pub q_r3: f64,
}

fn default_gravity_const() -> f64 {
    9.811104
}

fn default_downsample_factor() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_verbose() -> u8 {
    1
}

/// Immutable parameters of one pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub platform: Platform,
    pub camera_model: CameraModel,
    pub board: BoardConfig,
    #[serde(default = "default_downsample_factor")]
    pub downsample_factor: f64,
    /// Pose deduplication voxel size used by the camera calibration.
    pub voxel_grid_size: f64,
    #[serde(default = "default_gravity_const")]
    pub gravity_const: f64,
    /// Seconds trimmed from both ends of the bias recording.
    pub bias_calib_remove_s: f64,
    #[serde(default = "default_true")]
    pub reestimate_bias: bool,
    #[serde(default)]
    pub optimize_board_points: bool,
    pub known_gravity_axis: GravityAxis,
    pub global_shutter: bool,
    pub calib_cam_line_delay: bool,
    /// Run the bias stages on the separate `imu_bias` recording.
    pub use_bias_recording: bool,
    pub spline: SplineQuantiles,
    #[serde(default)]
    pub imu_intrinsics: Option<PathBuf>,
    #[serde(default = "default_verbose")]
    pub verbose: u8,
    #[serde(default)]
    pub recompute: RecomputePolicy,
}

impl RunConfig {
    /// Defaults of the given platform.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::GoPro => Self {
                platform,
                camera_model: CameraModel::Fisheye,
                board: BoardConfig {
                    board_type: BoardType::Charuco,
                    square_size_m: 0.0385,
                    squares_x: 10,
                    squares_y: 8,
                },
                downsample_factor: default_downsample_factor(),
                voxel_grid_size: 0.04,
                gravity_const: default_gravity_const(),
                bias_calib_remove_s: 2.0,
                reestimate_bias: true,
                optimize_board_points: false,
                known_gravity_axis: GravityAxis::Unknown,
                global_shutter: true,
                calib_cam_line_delay: true,
                use_bias_recording: false,
                spline: SplineQuantiles {
                    q_so3: 0.99,
                    q_r3: 0.97,
                },
                imu_intrinsics: None,
                verbose: default_verbose(),
                recompute: RecomputePolicy::none(),
            },
            Platform::Zed => Self {
                platform,
                camera_model: CameraModel::PinholeRadialTangential,
                board: BoardConfig {
                    board_type: BoardType::Charuco,
                    square_size_m: 0.021,
                    squares_x: 10,
                    squares_y: 8,
                },
                downsample_factor: default_downsample_factor(),
                voxel_grid_size: 0.05,
                gravity_const: default_gravity_const(),
                bias_calib_remove_s: 1.0,
                reestimate_bias: true,
                optimize_board_points: false,
                known_gravity_axis: GravityAxis::Z,
                global_shutter: false,
                calib_cam_line_delay: false,
                use_bias_recording: true,
                spline: SplineQuantiles {
                    q_so3: 0.99,
                    q_r3: 0.99,
                },
                imu_intrinsics: None,
                verbose: default_verbose(),
                recompute: RecomputePolicy::none(),
            },
        }
    }

    /// Check value ranges. Called once before any path is resolved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.downsample_factor.is_finite() || self.downsample_factor <= 0.0 {
            return Err(ConfigError::InvalidDownsampleFactor(self.downsample_factor));
        }
        if !self.board.square_size_m.is_finite() || self.board.square_size_m <= 0.0 {
            return Err(ConfigError::InvalidSquareSize(self.board.square_size_m));
        }
        if self.board.squares_x < 2 || self.board.squares_y < 2 {
            return Err(ConfigError::InvalidSquareCount {
                x: self.board.squares_x,
                y: self.board.squares_y,
            });
        }
        if !self.voxel_grid_size.is_finite() || self.voxel_grid_size <= 0.0 {
            return Err(ConfigError::InvalidVoxelGridSize(self.voxel_grid_size));
        }
        if !self.gravity_const.is_finite() || self.gravity_const <= 0.0 {
            return Err(ConfigError::InvalidGravity(self.gravity_const));
        }
        if !self.bias_calib_remove_s.is_finite() || self.bias_calib_remove_s < 0.0 {
            return Err(ConfigError::InvalidBiasTrim(self.bias_calib_remove_s));
        }
        for (name, value) in [("q_so3", self.spline.q_so3), ("q_r3", self.spline.q_r3)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::InvalidQuantile { name, value });
            }
        }
        Ok(())
    }

    /// Tag shared by every artifact that depends on the camera model.
    pub fn camera_tag(&self) -> String {
        format!(
            "{}_{}",
            self.camera_model.abbr(),
            format_float(self.downsample_factor)
        )
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Format a float the way the tools print it: always with a fractional part.
///
/// `1.0` stays `1.0`, `0.5` stays `0.5`.
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

/// Format a flag as `1` / `0`.
pub fn format_flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_defaults_validate() {
        for platform in [Platform::GoPro, Platform::Zed] {
            RunConfig::for_platform(platform)
                .validate()
                .expect("defaults are valid");
        }
    }

    #[test]
    fn camera_abbreviations_are_unique() {
        let mut seen: Vec<&str> = CameraModel::ALL.iter().map(|m| m.abbr()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), CameraModel::ALL.len());
    }

    #[test]
    fn float_formatting_keeps_fraction() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(0.021), "0.021");
    }

    #[test]
    fn board_tag_embeds_geometry() {
        let cfg = RunConfig::for_platform(Platform::Zed);
        assert_eq!(cfg.board.tag(), "charuco_10x8_0.021");
        assert_eq!(cfg.camera_tag(), "prt_1.0");
    }

    #[test]
    fn rejects_bad_quantile() {
        let mut cfg = RunConfig::for_platform(Platform::GoPro);
        cfg.spline.q_r3 = 1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidQuantile { name: "q_r3", .. })
        ));
    }

    #[test]
    fn recompute_policy_serializes_as_list() {
        let policy = RecomputePolicy::none()
            .with(ArtifactClass::Poses)
            .with(ArtifactClass::Corners);
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"["corners","poses"]"#);
        let back: RecomputePolicy = serde_json::from_str(&json).unwrap();
        assert!(back.should_recompute(ArtifactClass::Poses));
        assert!(!back.should_recompute(ArtifactClass::Report));
    }

    #[test]
    fn json_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut cfg = RunConfig::for_platform(Platform::GoPro);
        cfg.camera_model = CameraModel::DoubleSphere;
        cfg.write_json(&path).unwrap();
        assert_eq!(RunConfig::load_json(&path).unwrap(), cfg);

        let minimal = r#"{
            "platform": "mynteye",
            "camera_model": "FISHEYE",
            "board": { "square_size_m": 0.03, "squares_x": 9, "squares_y": 7 },
            "voxel_grid_size": 0.04,
            "bias_calib_remove_s": 2.0,
            "known_gravity_axis": "unknown",
            "global_shutter": true,
            "calib_cam_line_delay": false,
            "use_bias_recording": false,
            "spline": { "q_so3": 0.99, "q_r3": 0.97 }
        }"#;
        let cfg: RunConfig = serde_json::from_str(minimal).unwrap();
        assert_eq!(cfg.platform, Platform::GoPro);
        assert_eq!(cfg.board.board_type, BoardType::Charuco);
        assert_eq!(cfg.gravity_const, 9.811104);
        assert_eq!(cfg.verbose, 1);
        assert!(cfg.reestimate_bias);
        assert!(cfg.recompute.is_empty());
    }
}
