//! Artifact path resolution.
//!
//! Every file a stage reads or writes is computed here. Derived filenames
//! embed the parameters that change their content (recording basename, board
//! geometry, camera model, downsample factor), so a run with different
//! parameters never overwrites an incompatible artifact while a run with the
//! same parameters finds and reuses the previous outputs. Stage parameters
//! that are not part of a name are checked against argument stamps before
//! an output is reused.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{format_float, RunConfig};
use crate::dataset::{DatasetDir, DatasetLayout, DatasetLayoutError};

/// Names of the plain-text signal dumps written by the reporter.
pub const SIGNAL_DUMP_FILES: [&str; 6] = [
    "accl_spline.txt",
    "accl_imu.txt",
    "accl_bias.txt",
    "gyro_spline.txt",
    "gyro_imu.txt",
    "gyro_bias.txt",
];

/// Full set of input and output paths of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub dataset_root: PathBuf,
    pub cam_dir: PathBuf,
    pub imu_bias_dir: PathBuf,
    pub cam_imu_dir: PathBuf,

    // Raw dataset inputs.
    pub cam_recording: PathBuf,
    pub bias_recording: PathBuf,
    pub cam_imu_recording: PathBuf,
    pub cam_imu_telemetry_raw: PathBuf,
    pub bias_telemetry_raw: Option<PathBuf>,

    // Derived artifacts.
    pub cam_corners: PathBuf,
    pub cam_imu_corners: PathBuf,
    /// Path handed to the camera calibration tool; it appends `.json`.
    pub cam_calib_stem: PathBuf,
    pub cam_calib: PathBuf,
    pub cam_imu_telemetry: PathBuf,
    pub bias_telemetry: Option<PathBuf>,
    pub imu_bias: Option<PathBuf>,
    pub pose_dataset: PathBuf,
    pub spline_weights: PathBuf,
    pub rotation_init: PathBuf,
    pub result: PathBuf,
    pub report_stats: PathBuf,
    pub signals_dir: PathBuf,
}

/// Discover the dataset layout under `dataset_root` and resolve every path.
pub fn resolve(dataset_root: &Path, config: &RunConfig) -> Result<ArtifactPaths, DatasetLayoutError> {
    let layout = DatasetLayout::discover(dataset_root, config.platform, config.use_bias_recording)?;
    Ok(ArtifactPaths::from_layout(&layout, config))
}

impl ArtifactPaths {
    /// Pure naming step: no filesystem access.
    pub fn from_layout(layout: &DatasetLayout, config: &RunConfig) -> Self {
        let cam_dir = layout.dir(DatasetDir::Cam);
        let imu_bias_dir = layout.dir(DatasetDir::ImuBias);
        let cam_imu_dir = layout.dir(DatasetDir::CamImu);

        let cam_rec = &layout.cam.basename;
        let bias_rec = &layout.imu_bias.basename;
        let joint_rec = &layout.cam_imu.basename;

        let corners_tag = format!(
            "{}_{}",
            config.board.tag(),
            format_float(config.downsample_factor)
        );
        let camera_tag = config.camera_tag();

        let cam_calib_stem = cam_dir.join(format!("cam_calib_{cam_rec}_{camera_tag}"));
        let cam_calib = with_suffix(&cam_calib_stem, ".json");

        let bias_telemetry = layout.bias_telemetry.as_deref().map(normalized_telemetry_path);
        let imu_bias = layout
            .bias_telemetry
            .as_ref()
            .map(|_| imu_bias_dir.join(format!("imu_bias_{bias_rec}.json")));

        Self {
            dataset_root: layout.root.clone(),
            cam_recording: layout.cam.path.clone(),
            bias_recording: layout.imu_bias.path.clone(),
            cam_imu_recording: layout.cam_imu.path.clone(),
            cam_imu_telemetry_raw: layout.cam_imu_telemetry.clone(),
            bias_telemetry_raw: layout.bias_telemetry.clone(),

            cam_corners: cam_dir.join(format!("cam_corners_{cam_rec}_{corners_tag}.uson")),
            cam_imu_corners: cam_imu_dir
                .join(format!("cam_imu_corners_{joint_rec}_{corners_tag}.uson")),
            cam_calib_stem,
            cam_calib,
            cam_imu_telemetry: normalized_telemetry_path(&layout.cam_imu_telemetry),
            bias_telemetry,
            imu_bias,
            pose_dataset: cam_imu_dir.join(format!("pose_calib_{joint_rec}_{camera_tag}.calibdata")),
            spline_weights: cam_imu_dir.join(format!("spline_info_{joint_rec}.json")),
            rotation_init: cam_imu_dir
                .join(format!("imu_to_cam_calibration_{joint_rec}_{camera_tag}.json")),
            result: cam_imu_dir.join(format!("cam_imu_calib_result_{joint_rec}_{camera_tag}.json")),
            report_stats: cam_imu_dir.join(format!("result_stats_{joint_rec}_{camera_tag}.json")),
            signals_dir: cam_imu_dir.join(format!("signals_{joint_rec}_{camera_tag}")),

            cam_dir,
            imu_bias_dir,
            cam_imu_dir,
        }
    }

    /// Every derived artifact path, in stage order.
    pub fn derived(&self) -> Vec<&Path> {
        let mut out: Vec<&Path> = vec![
            self.cam_corners.as_path(),
            self.cam_imu_corners.as_path(),
            self.cam_calib.as_path(),
            self.cam_imu_telemetry.as_path(),
        ];
        out.extend(self.bias_telemetry.as_deref());
        out.extend(self.imu_bias.as_deref());
        out.extend([
            self.pose_dataset.as_path(),
            self.spline_weights.as_path(),
            self.rotation_init.as_path(),
            self.result.as_path(),
            self.report_stats.as_path(),
        ]);
        out
    }

    /// Signal dump files inside [`ArtifactPaths::signals_dir`].
    pub fn signal_dumps(&self) -> Vec<PathBuf> {
        SIGNAL_DUMP_FILES
            .iter()
            .map(|name| self.signals_dir.join(name))
            .collect()
    }
}

/// `<dir>/<stem>_gen.json` next to a raw telemetry log.
pub fn normalized_telemetry_path(raw: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    raw.with_file_name(format!("{stem}_gen.json"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraModel, Platform};
    use crate::dataset::Recording;
    use std::collections::HashSet;

    fn layout(with_bias: bool) -> DatasetLayout {
        let root = PathBuf::from("/data/run1");
        DatasetLayout {
            cam: Recording {
                path: root.join("cam/calib_video.avi"),
                basename: "calib_video".into(),
            },
            imu_bias: Recording {
                path: root.join("imu_bias/bias_video.avi"),
                basename: "bias_video".into(),
            },
            cam_imu: Recording {
                path: root.join("cam_imu/joint_video.avi"),
                basename: "joint_video".into(),
            },
            cam_imu_telemetry: root.join("cam_imu/joint.jsonl"),
            bias_telemetry: with_bias.then(|| root.join("imu_bias/bias.jsonl")),
            root,
        }
    }

    #[test]
    fn names_follow_the_convention() {
        let cfg = RunConfig::for_platform(Platform::Zed);
        let paths = ArtifactPaths::from_layout(&layout(true), &cfg);
        assert_eq!(
            paths.cam_corners,
            PathBuf::from("/data/run1/cam/cam_corners_calib_video_charuco_10x8_0.021_1.0.uson")
        );
        assert_eq!(
            paths.cam_calib,
            PathBuf::from("/data/run1/cam/cam_calib_calib_video_prt_1.0.json")
        );
        assert_eq!(
            paths.cam_calib_stem,
            PathBuf::from("/data/run1/cam/cam_calib_calib_video_prt_1.0")
        );
        assert_eq!(
            paths.cam_imu_telemetry,
            PathBuf::from("/data/run1/cam_imu/joint_gen.json")
        );
        assert_eq!(
            paths.imu_bias.as_deref(),
            Some(Path::new("/data/run1/imu_bias/imu_bias_bias_video.json"))
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let cfg = RunConfig::for_platform(Platform::Zed);
        let a = ArtifactPaths::from_layout(&layout(true), &cfg);
        let b = ArtifactPaths::from_layout(&layout(true), &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn derived_paths_are_unique() {
        for with_bias in [false, true] {
            let cfg = RunConfig::for_platform(Platform::Zed);
            let paths = ArtifactPaths::from_layout(&layout(with_bias), &cfg);
            let derived = paths.derived();
            let unique: HashSet<_> = derived.iter().collect();
            assert_eq!(unique.len(), derived.len());
        }
    }

    #[test]
    fn camera_model_only_touches_model_dependent_names() {
        let mut cfg = RunConfig::for_platform(Platform::Zed);
        let prt = ArtifactPaths::from_layout(&layout(false), &cfg);
        cfg.camera_model = CameraModel::Fisheye;
        let fish = ArtifactPaths::from_layout(&layout(false), &cfg);

        assert_ne!(prt.cam_calib, fish.cam_calib);
        assert_ne!(prt.pose_dataset, fish.pose_dataset);
        assert_eq!(prt.cam_corners, fish.cam_corners);
        assert_eq!(prt.cam_imu_corners, fish.cam_imu_corners);
        assert_eq!(prt.spline_weights, fish.spline_weights);
    }

    #[test]
    fn downsample_factor_changes_corner_names() {
        let mut cfg = RunConfig::for_platform(Platform::Zed);
        let full = ArtifactPaths::from_layout(&layout(false), &cfg);
        cfg.downsample_factor = 0.5;
        let half = ArtifactPaths::from_layout(&layout(false), &cfg);
        assert_ne!(full.cam_corners, half.cam_corners);
        assert!(half.cam_corners.to_string_lossy().ends_with("_0.5.uson"));
    }

    #[test]
    fn bias_artifacts_absent_without_bias_recording() {
        let cfg = RunConfig::for_platform(Platform::GoPro);
        let paths = ArtifactPaths::from_layout(&layout(false), &cfg);
        assert!(paths.bias_telemetry.is_none());
        assert!(paths.imu_bias.is_none());
    }
}
