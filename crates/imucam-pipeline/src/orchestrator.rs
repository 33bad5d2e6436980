//! Sequential pipeline execution.
//!
//! The orchestrator walks the stage graph in order. For each enabled stage it
//! either reuses the outputs already on disk or checks the inputs, runs the
//! stage through a [`StageRunner`] and stops at the first failure.

use imucam_core::RecomputePolicy;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::graph::{GraphError, StageGraph};
use crate::runner::{RunnerError, StageRunner};
use crate::stage::{ArtifactSource, StageDescriptor, StageId};
use crate::stamp::{self, StampCheck};

/// Errors that abort a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("stage `{stage}` is missing input {}", path.display())]
    MissingArtifact { stage: StageId, path: PathBuf },
    #[error("stage `{stage}` failed with exit code {} after {:.1}s", display_code(*code), elapsed.as_secs_f64())]
    StageFailure {
        stage: StageId,
        code: Option<i32>,
        elapsed: Duration,
    },
    #[error("stage `{stage}` was terminated by signal {signal} after {:.1}s", elapsed.as_secs_f64())]
    Interrupted {
        stage: StageId,
        signal: i32,
        elapsed: Duration,
    },
    #[error("stage `{stage}` could not be launched: {source}")]
    Spawn {
        stage: StageId,
        #[source]
        source: RunnerError,
    },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "<none>".to_string(), |c| c.to_string())
}

impl PipelineError {
    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            PipelineError::Graph(_) => None,
            PipelineError::MissingArtifact { stage, .. }
            | PipelineError::StageFailure { stage, .. }
            | PipelineError::Interrupted { stage, .. }
            | PipelineError::Spawn { stage, .. } => Some(*stage),
        }
    }

    /// Process exit code for this error.
    ///
    /// Stage failures pass the stage's code through (1 when it is missing or
    /// zero), signals map to `128 + signal`, everything else to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::StageFailure { code, .. } => code.filter(|c| *c != 0).unwrap_or(1),
            PipelineError::Interrupted { signal, .. } => 128 + signal,
            _ => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Running(StageId),
    StageDone(StageId),
    StageFailed(StageId),
    Aborted,
    Completed,
}

/// What happened to one stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Executed,
    Reused,
    Disabled,
    MissingInput { path: PathBuf },
    Failed { code: Option<i32> },
    Interrupted { signal: i32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub number: usize,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub elapsed_s: f64,
}

/// Per-stage summary of one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub state: PipelineState,
    pub stages: Vec<StageRecord>,
    pub total_elapsed_s: f64,
}

impl RunReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }

    pub fn executed(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|r| r.outcome == StageOutcome::Executed)
            .map(|r| r.stage)
            .collect()
    }
}

/// Predicted action of a stage, used for dry runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    Run,
    Reuse,
    Skip,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    pub stage: StageId,
    pub action: StageAction,
    pub command: String,
}

/// Drives a [`StageGraph`] to completion or first failure.
pub struct Pipeline<R> {
    graph: StageGraph,
    recompute: RecomputePolicy,
    runner: R,
    state: PipelineState,
    records: Vec<StageRecord>,
    total_elapsed: Duration,
}

impl<R: StageRunner> Pipeline<R> {
    pub fn new(graph: StageGraph, recompute: RecomputePolicy, runner: R) -> Self {
        Self {
            graph,
            recompute,
            runner,
            state: PipelineState::Pending,
            records: Vec::new(),
            total_elapsed: Duration::ZERO,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            state: self.state,
            stages: self.records.clone(),
            total_elapsed_s: self.total_elapsed.as_secs_f64(),
        }
    }

    /// Predict what [`Pipeline::run`] would do from the current disk state.
    ///
    /// Stages planned to run count as regenerated for their dependents.
    pub fn plan(&self) -> Result<Vec<PlannedStage>, GraphError> {
        self.graph.validate()?;
        let mut regenerated = HashSet::new();
        let mut plan = Vec::with_capacity(self.graph.len());
        for stage in self.graph.stages() {
            let action = decide(stage, &self.recompute, &regenerated);
            if action == StageAction::Run {
                regenerated.insert(stage.id);
            }
            plan.push(PlannedStage {
                stage: stage.id,
                action,
                command: stage.command_line(),
            });
        }
        Ok(plan)
    }

    /// Execute every enabled stage in order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(stages = self.graph.len()))
    )]
    pub fn run(&mut self) -> Result<(), PipelineError> {
        let started = Instant::now();
        self.records.clear();
        let result = self.run_stages();
        self.total_elapsed = started.elapsed();
        match &result {
            Ok(()) => {
                self.state = PipelineState::Completed;
                log::info!(
                    "pipeline completed in {:.1}s",
                    self.total_elapsed.as_secs_f64()
                );
            }
            Err(_) => self.state = PipelineState::Aborted,
        }
        result
    }

    fn run_stages(&mut self) -> Result<(), PipelineError> {
        self.graph.validate()?;
        let total = self.graph.len();
        let stages = self.graph.stages().to_vec();
        let mut regenerated: HashSet<StageId> = HashSet::new();

        for stage in &stages {
            let _scope = imucam_core::enter_stage(stage.id.name());
            match decide(stage, &self.recompute, &regenerated) {
                StageAction::Skip => {
                    log::info!("stage {}/{total} {}: disabled", stage.id.number(), stage.id);
                    self.record(stage.id, StageOutcome::Disabled, Duration::ZERO);
                    continue;
                }
                StageAction::Reuse => {
                    log::info!(
                        "stage {}/{total} {}: reusing existing outputs",
                        stage.id.number(),
                        stage.id
                    );
                    self.record(stage.id, StageOutcome::Reused, Duration::ZERO);
                    self.state = PipelineState::StageDone(stage.id);
                    continue;
                }
                StageAction::Run => {}
            }

            if let Some(missing) = stage.inputs.iter().find(|i| !artifact_present(&i.path)) {
                self.record(
                    stage.id,
                    StageOutcome::MissingInput {
                        path: missing.path.clone(),
                    },
                    Duration::ZERO,
                );
                self.state = PipelineState::StageFailed(stage.id);
                return Err(PipelineError::MissingArtifact {
                    stage: stage.id,
                    path: missing.path.clone(),
                });
            }

            self.state = PipelineState::Running(stage.id);
            log::info!("==================================================");
            log::info!("stage {}/{total}: {}", stage.id.number(), stage.id.title());
            log::info!("==================================================");
            log::debug!("{}", stage.command_line());

            let started = Instant::now();
            let exit = match self.runner.run(&stage.invocation()) {
                Ok(exit) => exit,
                Err(source) => {
                    self.record(stage.id, StageOutcome::Failed { code: None }, started.elapsed());
                    self.state = PipelineState::StageFailed(stage.id);
                    return Err(PipelineError::Spawn {
                        stage: stage.id,
                        source,
                    });
                }
            };
            let elapsed = exit.elapsed.max(started.elapsed());

            if let Some(signal) = exit.signal {
                self.record(stage.id, StageOutcome::Interrupted { signal }, elapsed);
                self.state = PipelineState::StageFailed(stage.id);
                return Err(PipelineError::Interrupted {
                    stage: stage.id,
                    signal,
                    elapsed,
                });
            }
            if !exit.success() {
                self.record(stage.id, StageOutcome::Failed { code: exit.code }, elapsed);
                self.state = PipelineState::StageFailed(stage.id);
                return Err(PipelineError::StageFailure {
                    stage: stage.id,
                    code: exit.code,
                    elapsed,
                });
            }

            for output in stage.outputs.iter().filter(|p| !artifact_present(p)) {
                log::warn!(
                    "stage {} exited successfully but did not write {}",
                    stage.id,
                    output.display()
                );
            }
            if stage.outputs.iter().all(|p| artifact_present(p)) {
                match stamp::write(stage) {
                    Ok(Some(path)) => log::debug!("stamped {}", path.display()),
                    Ok(None) => {}
                    Err(err) => log::warn!("could not stamp outputs of stage {}: {err}", stage.id),
                }
            }
            log::info!(
                "stage {}/{total} {} finished in {:.2}s",
                stage.id.number(),
                stage.id,
                elapsed.as_secs_f64()
            );
            regenerated.insert(stage.id);
            self.record(stage.id, StageOutcome::Executed, elapsed);
            self.state = PipelineState::StageDone(stage.id);
        }
        Ok(())
    }

    fn record(&mut self, stage: StageId, outcome: StageOutcome, elapsed: Duration) {
        self.records.push(StageRecord {
            stage,
            number: stage.number(),
            outcome,
            elapsed_s: elapsed.as_secs_f64(),
        });
    }
}

/// Skip disabled stages; reuse a stage when its class is not forced, none of
/// its producers ran in this pass, all its outputs are present and they were
/// not stamped with different arguments.
fn decide(
    stage: &StageDescriptor,
    recompute: &RecomputePolicy,
    regenerated: &HashSet<StageId>,
) -> StageAction {
    if !stage.is_enabled() {
        return StageAction::Skip;
    }
    let forced = recompute.should_recompute(stage.id.artifact_class());
    let upstream_changed = stage.inputs.iter().any(|input| match input.source {
        ArtifactSource::Stage(producer) => regenerated.contains(&producer),
        ArtifactSource::Dataset => false,
    });
    let outputs_present =
        !stage.outputs.is_empty() && stage.outputs.iter().all(|p| artifact_present(p));
    if !forced && !upstream_changed && outputs_present && stamp::check(stage) != StampCheck::Stale
    {
        StageAction::Reuse
    } else {
        StageAction::Run
    }
}

/// A non-empty file, or a directory with at least one entry.
pub fn artifact_present(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}
