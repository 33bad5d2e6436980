//! Dataset layout discovery.
//!
//! A calibration dataset is a directory with three fixed subdirectories:
//!
//! - `cam`: recording used for the camera intrinsic calibration,
//! - `imu_bias`: static recording used for IMU bias estimation,
//! - `cam_imu`: joint camera + IMU recording.
//!
//! Each subdirectory must hold exactly one recognizable recording.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Platform;
use crate::telemetry::TelemetryFormat;

/// The three fixed dataset subdirectories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetDir {
    Cam,
    ImuBias,
    CamImu,
}

impl DatasetDir {
    pub const ALL: [DatasetDir; 3] = [DatasetDir::Cam, DatasetDir::ImuBias, DatasetDir::CamImu];

    pub fn name(self) -> &'static str {
        match self {
            DatasetDir::Cam => "cam",
            DatasetDir::ImuBias => "imu_bias",
            DatasetDir::CamImu => "cam_imu",
        }
    }
}

impl fmt::Display for DatasetDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a recording is stored inside a dataset subdirectory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    /// A single file whose name ends in `video.avi`.
    VideoFile,
    /// A non-empty directory named `cam0` holding one image per frame.
    ImageSequence,
}

const VIDEO_SUFFIX: &str = "video.avi";
const IMAGE_SEQUENCE_DIR: &str = "cam0";
const CSV_TELEMETRY_FILE: &str = "imu0.csv";

impl RecordingKind {
    fn describe(self) -> &'static str {
        match self {
            RecordingKind::VideoFile => "a video file ending in `video.avi`",
            RecordingKind::ImageSequence => "a non-empty `cam0` image directory",
        }
    }
}

/// Errors raised when the dataset does not have the expected layout.
#[derive(thiserror::Error, Debug)]
pub enum DatasetLayoutError {
    #[error("dataset root {} is not a directory", .0.display())]
    MissingRoot(PathBuf),
    #[error("could not find {expected} in subdirectory `{subdir}` ({})", path.display())]
    MissingRecording {
        subdir: DatasetDir,
        path: PathBuf,
        expected: &'static str,
    },
    #[error("subdirectory `{subdir}` holds {} recordings, expected exactly one", candidates.len())]
    AmbiguousRecording {
        subdir: DatasetDir,
        candidates: Vec<PathBuf>,
    },
    #[error("could not find {expected} telemetry in subdirectory `{subdir}` ({})", path.display())]
    MissingTelemetry {
        subdir: DatasetDir,
        path: PathBuf,
        expected: &'static str,
    },
    #[error("subdirectory `{subdir}` holds {} telemetry logs, expected exactly one", candidates.len())]
    AmbiguousTelemetry {
        subdir: DatasetDir,
        candidates: Vec<PathBuf>,
    },
    #[error("failed to list subdirectory `{subdir}`: {source}")]
    Io {
        subdir: DatasetDir,
        #[source]
        source: io::Error,
    },
}

impl DatasetLayoutError {
    /// Subdirectory the error refers to, if any.
    pub fn subdir(&self) -> Option<DatasetDir> {
        match self {
            DatasetLayoutError::MissingRoot(_) => None,
            DatasetLayoutError::MissingRecording { subdir, .. }
            | DatasetLayoutError::AmbiguousRecording { subdir, .. }
            | DatasetLayoutError::MissingTelemetry { subdir, .. }
            | DatasetLayoutError::AmbiguousTelemetry { subdir, .. }
            | DatasetLayoutError::Io { subdir, .. } => Some(*subdir),
        }
    }
}

/// One discovered recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// Video file or image directory.
    pub path: PathBuf,
    /// Name embedded in derived artifact filenames.
    pub basename: String,
}

/// Discovered dataset: one recording per subdirectory plus raw telemetry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub cam: Recording,
    pub imu_bias: Recording,
    pub cam_imu: Recording,
    pub cam_imu_telemetry: PathBuf,
    /// Raw telemetry of the bias recording, only looked up when it is used.
    pub bias_telemetry: Option<PathBuf>,
}

impl DatasetLayout {
    /// Inspect `root` and locate every recording the platform needs.
    ///
    /// Subdirectories are checked in the order `cam`, `imu_bias`, `cam_imu`,
    /// so the first missing one is reported.
    pub fn discover(
        root: &Path,
        platform: Platform,
        use_bias_recording: bool,
    ) -> Result<Self, DatasetLayoutError> {
        if !root.is_dir() {
            return Err(DatasetLayoutError::MissingRoot(root.to_path_buf()));
        }
        let kind = platform.recording_kind();
        let cam = find_recording(root, DatasetDir::Cam, kind)?;
        let imu_bias = find_recording(root, DatasetDir::ImuBias, kind)?;
        let cam_imu = find_recording(root, DatasetDir::CamImu, kind)?;

        let format = platform.telemetry_format();
        let cam_imu_telemetry = find_telemetry(root, DatasetDir::CamImu, format)?;
        let bias_telemetry = if use_bias_recording {
            Some(find_telemetry(root, DatasetDir::ImuBias, format)?)
        } else {
            None
        };

        Ok(Self {
            root: root.to_path_buf(),
            cam,
            imu_bias,
            cam_imu,
            cam_imu_telemetry,
            bias_telemetry,
        })
    }

    /// Absolute location of a dataset subdirectory.
    pub fn dir(&self, dir: DatasetDir) -> PathBuf {
        self.root.join(dir.name())
    }

    pub fn recording(&self, dir: DatasetDir) -> &Recording {
        match dir {
            DatasetDir::Cam => &self.cam,
            DatasetDir::ImuBias => &self.imu_bias,
            DatasetDir::CamImu => &self.cam_imu,
        }
    }
}

/// Sorted entries of a subdirectory. A missing subdirectory lists as empty.
fn list_entries(root: &Path, subdir: DatasetDir) -> Result<Vec<PathBuf>, DatasetLayoutError> {
    let dir = root.join(subdir.name());
    let read = match fs::read_dir(&dir) {
        Ok(read) => read,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(DatasetLayoutError::Io { subdir, source }),
    };
    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| DatasetLayoutError::Io { subdir, source })?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut read| read.next().is_some())
        .unwrap_or(false)
}

fn find_recording(
    root: &Path,
    subdir: DatasetDir,
    kind: RecordingKind,
) -> Result<Recording, DatasetLayoutError> {
    let entries = list_entries(root, subdir)?;
    let mut candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter(|p| match kind {
            RecordingKind::VideoFile => p.is_file() && file_name(p).ends_with(VIDEO_SUFFIX),
            RecordingKind::ImageSequence => {
                p.is_dir() && file_name(p) == IMAGE_SEQUENCE_DIR && dir_has_entries(p)
            }
        })
        .collect();

    match candidates.len() {
        0 => Err(DatasetLayoutError::MissingRecording {
            subdir,
            path: root.join(subdir.name()),
            expected: kind.describe(),
        }),
        1 => {
            let path = candidates.remove(0);
            let name = file_name(&path);
            let basename = match kind {
                RecordingKind::VideoFile => name.strip_suffix(".avi").unwrap_or(name),
                RecordingKind::ImageSequence => name,
            }
            .to_string();
            Ok(Recording { path, basename })
        }
        _ => Err(DatasetLayoutError::AmbiguousRecording { subdir, candidates }),
    }
}

fn find_telemetry(
    root: &Path,
    subdir: DatasetDir,
    format: TelemetryFormat,
) -> Result<PathBuf, DatasetLayoutError> {
    let entries = list_entries(root, subdir)?;
    let mut candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter(|p| {
            p.is_file()
                && match format {
                    TelemetryFormat::Csv => file_name(p) == CSV_TELEMETRY_FILE,
                    TelemetryFormat::Jsonl => file_name(p).ends_with(".jsonl"),
                }
        })
        .collect();

    match candidates.len() {
        0 => Err(DatasetLayoutError::MissingTelemetry {
            subdir,
            path: root.join(subdir.name()),
            expected: match format {
                TelemetryFormat::Csv => "an `imu0.csv`",
                TelemetryFormat::Jsonl => "a `*.jsonl`",
            },
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(DatasetLayoutError::AmbiguousTelemetry { subdir, candidates }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn zed_dataset() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("cam/calib_video.avi"));
        touch(&root.join("imu_bias/bias_video.avi"));
        touch(&root.join("imu_bias/bias.jsonl"));
        touch(&root.join("cam_imu/joint_video.avi"));
        touch(&root.join("cam_imu/joint.jsonl"));
        dir
    }

    #[test]
    fn discovers_zed_layout() {
        let dir = zed_dataset();
        let layout = DatasetLayout::discover(dir.path(), Platform::Zed, true).unwrap();
        assert_eq!(layout.cam.basename, "calib_video");
        assert_eq!(layout.cam_imu.basename, "joint_video");
        assert_eq!(layout.cam_imu_telemetry, dir.path().join("cam_imu/joint.jsonl"));
        assert_eq!(
            layout.bias_telemetry.as_deref(),
            Some(dir.path().join("imu_bias/bias.jsonl").as_path())
        );
    }

    #[test]
    fn bias_telemetry_not_required_when_unused() {
        let dir = zed_dataset();
        fs::remove_file(dir.path().join("imu_bias/bias.jsonl")).unwrap();
        let layout = DatasetLayout::discover(dir.path(), Platform::Zed, false).unwrap();
        assert!(layout.bias_telemetry.is_none());
        let err = DatasetLayout::discover(dir.path(), Platform::Zed, true).unwrap_err();
        assert_eq!(err.subdir(), Some(DatasetDir::ImuBias));
    }

    #[test]
    fn empty_cam_dir_names_subdirectory() {
        let dir = zed_dataset();
        fs::remove_file(dir.path().join("cam/calib_video.avi")).unwrap();
        let err = DatasetLayout::discover(dir.path(), Platform::Zed, false).unwrap_err();
        assert!(matches!(
            err,
            DatasetLayoutError::MissingRecording {
                subdir: DatasetDir::Cam,
                ..
            }
        ));
        assert!(err.to_string().contains("`cam`"));
    }

    #[test]
    fn two_videos_are_ambiguous() {
        let dir = zed_dataset();
        touch(&dir.path().join("cam_imu/second_video.avi"));
        let err = DatasetLayout::discover(dir.path(), Platform::Zed, false).unwrap_err();
        match err {
            DatasetLayoutError::AmbiguousRecording { subdir, candidates } => {
                assert_eq!(subdir, DatasetDir::CamImu);
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn image_sequence_must_be_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("cam/cam0/000.png"));
        fs::create_dir_all(root.join("imu_bias/cam0")).unwrap();
        touch(&root.join("cam_imu/cam0/000.png"));
        touch(&root.join("cam_imu/imu0.csv"));

        let err = DatasetLayout::discover(root, Platform::GoPro, false).unwrap_err();
        assert_eq!(err.subdir(), Some(DatasetDir::ImuBias));

        touch(&root.join("imu_bias/cam0/000.png"));
        let layout = DatasetLayout::discover(root, Platform::GoPro, false).unwrap();
        assert_eq!(layout.cam.basename, "cam0");
        assert_eq!(layout.cam_imu_telemetry, root.join("cam_imu/imu0.csv"));
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            DatasetLayout::discover(&missing, Platform::Zed, false),
            Err(DatasetLayoutError::MissingRoot(_))
        ));
    }
}
