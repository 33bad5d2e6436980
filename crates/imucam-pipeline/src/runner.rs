//! Process execution seam.
//!
//! The orchestrator only talks to a [`StageRunner`]. [`ProcessRunner`] spawns
//! real child processes; [`RecordingRunner`] records invocations and fakes
//! their outputs so the orchestration logic can be tested without tools.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::stage::StageId;

/// Fully resolved command of one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: StageId,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Files the stage is expected to produce.
    pub outputs: Vec<PathBuf>,
}

/// How a stage process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageExit {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub elapsed: Duration,
}

impl StageExit {
    pub fn exited(code: i32, elapsed: Duration) -> Self {
        Self {
            code: Some(code),
            signal: None,
            elapsed,
        }
    }

    pub fn killed(signal: i32, elapsed: Duration) -> Self {
        Self {
            code: None,
            signal: Some(signal),
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for {}: {source}", program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to materialize {}: {source}", path.display())]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Executes one stage invocation to completion.
pub trait StageRunner {
    fn run(&mut self, invocation: &StageInvocation) -> Result<StageExit, RunnerError>;
}

impl<R: StageRunner + ?Sized> StageRunner for &mut R {
    fn run(&mut self, invocation: &StageInvocation) -> Result<StageExit, RunnerError> {
        (**self).run(invocation)
    }
}

/// Spawns each stage as a child process and blocks until it exits.
///
/// Standard output and error are inherited so tool diagnostics reach the
/// terminal directly. Standard input is closed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl StageRunner for ProcessRunner {
    fn run(&mut self, invocation: &StageInvocation) -> Result<StageExit, RunnerError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let status = child.wait().map_err(|source| RunnerError::Wait {
            program: invocation.program.clone(),
            source,
        })?;
        let elapsed = started.elapsed();

        Ok(StageExit {
            code: status.code(),
            signal: exit_signal(&status),
            elapsed,
        })
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[derive(Clone, Copy, Debug)]
enum Scripted {
    Fail(i32),
    Kill(i32),
}

/// Test double: records every invocation and writes placeholder outputs.
#[derive(Debug)]
pub struct RecordingRunner {
    invocations: Vec<StageInvocation>,
    scripted: HashMap<StageId, Scripted>,
    materialize: bool,
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            invocations: Vec::new(),
            scripted: HashMap::new(),
            materialize: true,
        }
    }

    /// Report success without creating any output file.
    pub fn without_outputs(mut self) -> Self {
        self.materialize = false;
        self
    }

    /// Make `stage` exit with `code` and produce nothing.
    pub fn fail_stage(mut self, stage: StageId, code: i32) -> Self {
        self.scripted.insert(stage, Scripted::Fail(code));
        self
    }

    /// Make `stage` die from `signal`.
    pub fn kill_stage(mut self, stage: StageId, signal: i32) -> Self {
        self.scripted.insert(stage, Scripted::Kill(signal));
        self
    }

    pub fn invocations(&self) -> &[StageInvocation] {
        &self.invocations
    }

    pub fn invoked_stages(&self) -> Vec<StageId> {
        self.invocations.iter().map(|i| i.stage).collect()
    }
}

impl StageRunner for RecordingRunner {
    fn run(&mut self, invocation: &StageInvocation) -> Result<StageExit, RunnerError> {
        self.invocations.push(invocation.clone());
        match self.scripted.get(&invocation.stage) {
            Some(Scripted::Fail(code)) => return Ok(StageExit::exited(*code, Duration::ZERO)),
            Some(Scripted::Kill(signal)) => return Ok(StageExit::killed(*signal, Duration::ZERO)),
            None => {}
        }
        if self.materialize {
            for output in &invocation.outputs {
                write_placeholder(output, invocation.stage)?;
            }
        }
        Ok(StageExit::exited(0, Duration::ZERO))
    }
}

fn write_placeholder(path: &Path, stage: StageId) -> Result<(), RunnerError> {
    let materialize_err = |source: std::io::Error| RunnerError::Materialize {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(materialize_err)?;
    }
    fs::write(path, format!("{{\"stage\":\"{stage}\"}}\n")).map_err(materialize_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(dir: &Path) -> StageInvocation {
        StageInvocation {
            stage: StageId::CalibrateCamera,
            program: PathBuf::from("/nonexistent/calibrate_camera"),
            args: vec!["--verbose=1".into()],
            outputs: vec![dir.join("nested/cam_calib.json")],
        }
    }

    #[test]
    fn recording_runner_materializes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = RecordingRunner::new();
        let exit = runner.run(&invocation(dir.path())).unwrap();
        assert!(exit.success());
        let written = fs::read_to_string(dir.path().join("nested/cam_calib.json")).unwrap();
        assert!(!written.is_empty());
        assert_eq!(runner.invoked_stages(), vec![StageId::CalibrateCamera]);
    }

    #[test]
    fn scripted_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = RecordingRunner::new().fail_stage(StageId::CalibrateCamera, 3);
        let exit = runner.run(&invocation(dir.path())).unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn process_runner_reports_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessRunner::new().run(&invocation(dir.path())).unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_passes_exit_code_through() {
        let inv = StageInvocation {
            stage: StageId::ReportResults,
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "exit 7".into()],
            outputs: Vec::new(),
        };
        let exit = ProcessRunner::new().run(&inv).unwrap();
        assert_eq!(exit.code, Some(7));
        assert_eq!(exit.signal, None);
        assert!(!exit.success());
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_reports_signal() {
        let inv = StageInvocation {
            stage: StageId::ReportResults,
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "kill -9 $$".into()],
            outputs: Vec::new(),
        };
        let exit = ProcessRunner::new().run(&inv).unwrap();
        assert_eq!(exit.code, None);
        assert_eq!(exit.signal, Some(9));
    }
}
