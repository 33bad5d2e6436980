//! Argument stamps kept next to stage outputs.
//!
//! Output names only carry part of the configuration. After a stage succeeds
//! its content arguments are written to a hidden `.<output>.args.json` file
//! beside the first output; a later run reuses the outputs only while the
//! stamp still matches.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::stage::StageDescriptor;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ArgStamp {
    args: Vec<String>,
}

/// Result of comparing a stage against the stamp on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StampCheck {
    Matches,
    /// No stamp: outputs predate stamping or were placed by hand.
    Absent,
    /// Stamp written with other arguments, or unreadable.
    Stale,
}

/// Stamp location for `stage`, `None` when it declares no outputs.
pub(crate) fn stamp_path(stage: &StageDescriptor) -> Option<PathBuf> {
    let first = stage.outputs.first()?;
    let name = first.file_name()?.to_string_lossy();
    Some(first.with_file_name(format!(".{name}.args.json")))
}

pub(crate) fn check(stage: &StageDescriptor) -> StampCheck {
    let Some(path) = stamp_path(stage) else {
        return StampCheck::Absent;
    };
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StampCheck::Absent,
        Err(_) => return StampCheck::Stale,
    };
    match serde_json::from_str::<ArgStamp>(&raw) {
        Ok(stamp) if stamp.args == stage.content_args() => StampCheck::Matches,
        _ => StampCheck::Stale,
    }
}

pub(crate) fn write(stage: &StageDescriptor) -> Result<Option<PathBuf>, std::io::Error> {
    let Some(path) = stamp_path(stage) else {
        return Ok(None);
    };
    let stamp = ArgStamp {
        args: stage.content_args(),
    };
    let json = serde_json::to_string_pretty(&stamp).map_err(std::io::Error::other)?;
    write_file(&path, &json)?;
    Ok(Some(path))
}

fn write_file(path: &Path, contents: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Program, Requirement, StageId};

    fn stage(dir: &Path, grid: &str) -> StageDescriptor {
        StageDescriptor {
            id: StageId::CalibrateCamera,
            program: Program::Tool {
                path: PathBuf::from("/build/calibrate_camera"),
            },
            inputs: Vec::new(),
            outputs: vec![dir.join("cam_calib.json")],
            args: vec![format!("--grid_size={grid}"), "--verbose=1".into()],
            requirement: Requirement::Required,
        }
    }

    #[test]
    fn stamp_sits_next_to_first_output() {
        let s = stage(Path::new("/d/cam"), "0.04");
        assert_eq!(
            stamp_path(&s),
            Some(PathBuf::from("/d/cam/.cam_calib.json.args.json"))
        );
    }

    #[test]
    fn changed_arguments_make_the_stamp_stale() {
        let dir = tempfile::tempdir().unwrap();
        let original = stage(dir.path(), "0.04");
        assert_eq!(check(&original), StampCheck::Absent);

        write(&original).unwrap();
        assert_eq!(check(&original), StampCheck::Matches);

        let mut louder = original.clone();
        louder.args[1] = "--verbose=3".into();
        assert_eq!(check(&louder), StampCheck::Matches);

        assert_eq!(check(&stage(dir.path(), "0.08")), StampCheck::Stale);
    }

    #[test]
    fn garbage_stamp_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path(), "0.04");
        fs::write(stamp_path(&s).unwrap(), "not json").unwrap();
        assert_eq!(check(&s), StampCheck::Stale);
    }
}
