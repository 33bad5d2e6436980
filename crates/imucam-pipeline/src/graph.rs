//! The fixed stage graph.
//!
//! Stages are kept as an ordered list of descriptors. The order encodes the
//! dependencies: every input is either a dataset file or an output of an
//! earlier enabled stage, which [`StageGraph::validate`] checks without
//! running anything.

use imucam_core::{format_flag, format_float, ArtifactPaths, RunConfig, TelemetryFormat};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::stage::{
    arg, path_arg, ArtifactRef, ArtifactSource, Program, Requirement, StageDescriptor, StageId,
};
use crate::tools::{self, ToolPaths};

/// Structural problems in a stage graph.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage `{stage}` reads {} from `{producer}`, which is not an earlier stage", path.display())]
    ProducerNotEarlier {
        stage: StageId,
        producer: StageId,
        path: PathBuf,
    },
    #[error("stage `{stage}` reads {} from `{producer}`, which is disabled", path.display())]
    ProducerDisabled {
        stage: StageId,
        producer: StageId,
        path: PathBuf,
    },
    #[error("stage `{stage}` reads {} from `{producer}`, which does not declare it", path.display())]
    NotDeclaredByProducer {
        stage: StageId,
        producer: StageId,
        path: PathBuf,
    },
    #[error("{} is declared as output of both `{first}` and `{second}`", path.display())]
    DuplicateOutput {
        path: PathBuf,
        first: StageId,
        second: StageId,
    },
    #[error("stage `{0}` appears more than once")]
    DuplicateStage(StageId),
}

/// Ordered stage descriptors of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageGraph {
    stages: Vec<StageDescriptor>,
}

impl StageGraph {
    pub fn from_stages(stages: Vec<StageDescriptor>) -> Self {
        Self { stages }
    }

    /// Build the calibration pipeline for a configuration and resolved paths.
    pub fn build(config: &RunConfig, paths: &ArtifactPaths, tools: &ToolPaths) -> Self {
        let bias = BiasArtifacts::from_paths(config, paths);
        let stages = vec![
            extract_corners(
                StageId::ExtractCamCorners,
                config,
                tools,
                &paths.cam_recording,
                &paths.cam_corners,
            ),
            extract_corners(
                StageId::ExtractCamImuCorners,
                config,
                tools,
                &paths.cam_imu_recording,
                &paths.cam_imu_corners,
            ),
            calibrate_camera(config, paths, tools),
            normalize_telemetry(
                StageId::NormalizeCamImuTelemetry,
                config,
                tools,
                &paths.cam_imu_telemetry_raw,
                &paths.cam_imu_telemetry,
            ),
            match &bias {
                Some(b) => normalize_telemetry(
                    StageId::NormalizeBiasTelemetry,
                    config,
                    tools,
                    &b.raw,
                    &b.telemetry,
                ),
                None => StageDescriptor::disabled(
                    StageId::NormalizeBiasTelemetry,
                    builtin(tools, tools::NORMALIZE_SUBCOMMAND),
                ),
            },
            match &bias {
                Some(b) => estimate_imu_bias(config, tools, b),
                None => StageDescriptor::disabled(
                    StageId::EstimateImuBias,
                    script(tools, tools::IMU_BIAS_SCRIPT),
                ),
            },
            estimate_camera_poses(config, paths, tools),
            estimate_spline_weights(config, paths, tools),
            init_rotation(paths, tools, bias.as_ref()),
            spline_fusion(config, paths, tools, bias.as_ref()),
            report_results(paths, tools),
        ];
        Self { stages }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, id: StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Ids of the stages that will be considered for execution.
    pub fn enabled(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.iter().filter(|s| s.is_enabled()).map(|s| s.id)
    }

    /// Check dependency order and output uniqueness.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut position: HashMap<StageId, usize> = HashMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if position.insert(stage.id, idx).is_some() {
                return Err(GraphError::DuplicateStage(stage.id));
            }
        }

        let mut owners: HashMap<&Path, StageId> = HashMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if !stage.is_enabled() {
                continue;
            }
            for input in &stage.inputs {
                let ArtifactSource::Stage(producer) = input.source else {
                    continue;
                };
                let producer_stage = position
                    .get(&producer)
                    .filter(|&&p| p < idx)
                    .map(|&p| &self.stages[p])
                    .ok_or_else(|| GraphError::ProducerNotEarlier {
                        stage: stage.id,
                        producer,
                        path: input.path.clone(),
                    })?;
                if !producer_stage.is_enabled() {
                    return Err(GraphError::ProducerDisabled {
                        stage: stage.id,
                        producer,
                        path: input.path.clone(),
                    });
                }
                if !producer_stage.outputs.contains(&input.path) {
                    return Err(GraphError::NotDeclaredByProducer {
                        stage: stage.id,
                        producer,
                        path: input.path.clone(),
                    });
                }
            }
            for output in &stage.outputs {
                if let Some(first) = owners.insert(output.as_path(), stage.id) {
                    return Err(GraphError::DuplicateOutput {
                        path: output.clone(),
                        first,
                        second: stage.id,
                    });
                }
            }
        }
        Ok(())
    }
}

struct BiasArtifacts {
    raw: PathBuf,
    telemetry: PathBuf,
    estimate: PathBuf,
}

impl BiasArtifacts {
    fn from_paths(config: &RunConfig, paths: &ArtifactPaths) -> Option<Self> {
        if !config.use_bias_recording {
            return None;
        }
        Some(Self {
            raw: paths.bias_telemetry_raw.clone()?,
            telemetry: paths.bias_telemetry.clone()?,
            estimate: paths.imu_bias.clone()?,
        })
    }
}

fn tool(tools: &ToolPaths, name: &str) -> Program {
    Program::Tool {
        path: tools.binary(name),
    }
}

fn script(tools: &ToolPaths, name: &str) -> Program {
    Program::Script {
        interpreter: tools.python().to_path_buf(),
        script: tools.script(name),
    }
}

fn builtin(tools: &ToolPaths, subcommand: &str) -> Program {
    Program::Builtin {
        exe: tools.self_exe.clone(),
        subcommand: subcommand.to_string(),
    }
}

fn extract_corners(
    id: StageId,
    config: &RunConfig,
    tools: &ToolPaths,
    recording: &Path,
    corners: &Path,
) -> StageDescriptor {
    StageDescriptor {
        id,
        program: tool(tools, tools::EXTRACT_BOARD),
        inputs: vec![ArtifactRef::dataset(recording)],
        outputs: vec![corners.to_path_buf()],
        args: vec![
            path_arg("input_path", recording),
            path_arg("aruco_detector_params", &tools.aruco_detector_params()),
            arg("board_type", config.board.board_type.as_str()),
            path_arg("save_corners_json_path", corners),
            arg("downsample_factor", format_float(config.downsample_factor)),
            arg("checker_square_length_m", format_float(config.board.square_size_m)),
            arg("verbose", config.verbose),
            arg(
                "recompute_corners",
                format_flag(
                    config
                        .recompute
                        .should_recompute(imucam_core::ArtifactClass::Corners),
                ),
            ),
            arg("num_squares_x", config.board.squares_x),
            arg("num_squares_y", config.board.squares_y),
            arg("logtostderr", 1),
        ],
        requirement: Requirement::Required,
    }
}

fn calibrate_camera(config: &RunConfig, paths: &ArtifactPaths, tools: &ToolPaths) -> StageDescriptor {
    StageDescriptor {
        id: StageId::CalibrateCamera,
        program: tool(tools, tools::CALIBRATE_CAMERA),
        inputs: vec![ArtifactRef::from_stage(
            StageId::ExtractCamCorners,
            &paths.cam_corners,
        )],
        outputs: vec![paths.cam_calib.clone()],
        args: vec![
            path_arg("input_corners", &paths.cam_corners),
            path_arg("save_path_calib_dataset", &paths.cam_calib_stem),
            arg("camera_model_to_calibrate", config.camera_model.as_str()),
            arg("grid_size", format_float(config.voxel_grid_size)),
            arg("optimize_board_points", format_flag(config.optimize_board_points)),
            arg("verbose", config.verbose),
            arg("logtostderr", 0),
        ],
        requirement: Requirement::Required,
    }
}

fn normalize_telemetry(
    id: StageId,
    config: &RunConfig,
    tools: &ToolPaths,
    raw: &Path,
    normalized: &Path,
) -> StageDescriptor {
    let format: TelemetryFormat = config.platform.telemetry_format();
    let requirement = match id {
        StageId::NormalizeBiasTelemetry => Requirement::Optional { enabled: true },
        _ => Requirement::Required,
    };
    StageDescriptor {
        id,
        program: builtin(tools, tools::NORMALIZE_SUBCOMMAND),
        inputs: vec![ArtifactRef::dataset(raw)],
        outputs: vec![normalized.to_path_buf()],
        args: vec![
            path_arg("input", raw),
            arg("format", format),
            path_arg("output", normalized),
        ],
        requirement,
    }
}

fn estimate_imu_bias(config: &RunConfig, tools: &ToolPaths, bias: &BiasArtifacts) -> StageDescriptor {
    StageDescriptor {
        id: StageId::EstimateImuBias,
        program: script(tools, tools::IMU_BIAS_SCRIPT),
        inputs: vec![ArtifactRef::from_stage(
            StageId::NormalizeBiasTelemetry,
            &bias.telemetry,
        )],
        outputs: vec![bias.estimate.clone()],
        args: vec![
            path_arg("input_json_path", &bias.telemetry),
            path_arg("output_path", &bias.estimate),
            arg("gravity_const", format_float(config.gravity_const)),
            arg("remove_sec", format_float(config.bias_calib_remove_s)),
        ],
        requirement: Requirement::Optional { enabled: true },
    }
}

fn estimate_camera_poses(
    config: &RunConfig,
    paths: &ArtifactPaths,
    tools: &ToolPaths,
) -> StageDescriptor {
    StageDescriptor {
        id: StageId::EstimateCameraPoses,
        program: tool(tools, tools::ESTIMATE_POSES),
        inputs: vec![
            ArtifactRef::from_stage(StageId::ExtractCamImuCorners, &paths.cam_imu_corners),
            ArtifactRef::from_stage(StageId::CalibrateCamera, &paths.cam_calib),
        ],
        outputs: vec![paths.pose_dataset.clone()],
        args: vec![
            path_arg("input_corners", &paths.cam_imu_corners),
            path_arg("camera_calibration_json", &paths.cam_calib),
            path_arg("output_pose_dataset", &paths.pose_dataset),
            arg("optimize_board_points", format_flag(config.optimize_board_points)),
            arg("logtostderr", 1),
        ],
        requirement: Requirement::Required,
    }
}

fn estimate_spline_weights(
    config: &RunConfig,
    paths: &ArtifactPaths,
    tools: &ToolPaths,
) -> StageDescriptor {
    StageDescriptor {
        id: StageId::EstimateSplineWeights,
        program: script(tools, tools::SPLINE_WEIGHTS_SCRIPT),
        inputs: vec![ArtifactRef::from_stage(
            StageId::NormalizeCamImuTelemetry,
            &paths.cam_imu_telemetry,
        )],
        outputs: vec![paths.spline_weights.clone()],
        args: vec![
            path_arg("input_json_path", &paths.cam_imu_telemetry),
            path_arg("output_path", &paths.spline_weights),
            arg("q_so3", format_float(config.spline.q_so3)),
            arg("q_r3", format_float(config.spline.q_r3)),
        ],
        requirement: Requirement::Required,
    }
}

fn init_rotation(
    paths: &ArtifactPaths,
    tools: &ToolPaths,
    bias: Option<&BiasArtifacts>,
) -> StageDescriptor {
    let mut inputs = vec![
        ArtifactRef::from_stage(StageId::NormalizeCamImuTelemetry, &paths.cam_imu_telemetry),
        ArtifactRef::from_stage(StageId::EstimateCameraPoses, &paths.pose_dataset),
    ];
    let mut args = vec![
        path_arg("telemetry_json", &paths.cam_imu_telemetry),
        path_arg("input_pose_calibration_dataset", &paths.pose_dataset),
    ];
    if let Some(b) = bias {
        inputs.push(ArtifactRef::from_stage(StageId::EstimateImuBias, &b.estimate));
        args.push(path_arg("imu_bias_estimate", &b.estimate));
    }
    args.push(path_arg("imu_rotation_init_output", &paths.rotation_init));
    args.push(arg("logtostderr", 1));

    StageDescriptor {
        id: StageId::InitImuToCameraRotation,
        program: tool(tools, tools::ESTIMATE_ROTATION),
        inputs,
        outputs: vec![paths.rotation_init.clone()],
        args,
        requirement: Requirement::Required,
    }
}

fn spline_fusion(
    config: &RunConfig,
    paths: &ArtifactPaths,
    tools: &ToolPaths,
    bias: Option<&BiasArtifacts>,
) -> StageDescriptor {
    let mut inputs = vec![
        ArtifactRef::from_stage(StageId::InitImuToCameraRotation, &paths.rotation_init),
        ArtifactRef::from_stage(StageId::NormalizeCamImuTelemetry, &paths.cam_imu_telemetry),
        ArtifactRef::from_stage(StageId::EstimateCameraPoses, &paths.pose_dataset),
        ArtifactRef::from_stage(StageId::ExtractCamImuCorners, &paths.cam_imu_corners),
        ArtifactRef::from_stage(StageId::CalibrateCamera, &paths.cam_calib),
        ArtifactRef::from_stage(StageId::EstimateSplineWeights, &paths.spline_weights),
        ArtifactRef::dataset(&paths.cam_imu_recording),
    ];
    let mut args = vec![
        path_arg("gyro_to_cam_initial_calibration", &paths.rotation_init),
        path_arg("telemetry_json", &paths.cam_imu_telemetry),
    ];
    if let Some(intrinsics) = &config.imu_intrinsics {
        inputs.push(ArtifactRef::dataset(intrinsics));
        args.push(path_arg("imu_intrinsics", intrinsics));
    }
    args.extend([
        path_arg("input_pose_dataset", &paths.pose_dataset),
        path_arg("input_corners", &paths.cam_imu_corners),
        path_arg("camera_calibration_json", &paths.cam_calib),
    ]);
    if let Some(b) = bias {
        inputs.push(ArtifactRef::from_stage(StageId::EstimateImuBias, &b.estimate));
        args.push(path_arg("imu_bias_file", &b.estimate));
    }
    args.extend([
        path_arg("output_path", &paths.cam_imu_dir),
        path_arg("spline_error_weighting_json", &paths.spline_weights),
        path_arg("result_output_json", &paths.result),
        arg("reestimate_biases", format_flag(config.reestimate_bias)),
        arg("logtostderr", 1),
        arg("global_shutter", format_flag(config.global_shutter)),
        arg("gravity_const", format_float(config.gravity_const)),
        arg("known_grav_dir_axis", config.known_gravity_axis.tool_value()),
        arg("calibrate_cam_line_delay", format_flag(config.calib_cam_line_delay)),
        path_arg("debug_video_path", &paths.cam_imu_recording),
    ]);

    StageDescriptor {
        id: StageId::SplineFusion,
        program: tool(tools, tools::SPLINE_FUSION),
        inputs,
        outputs: vec![paths.result.clone()],
        args,
        requirement: Requirement::Required,
    }
}

fn report_results(paths: &ArtifactPaths, tools: &ToolPaths) -> StageDescriptor {
    // Stats go first: the reporter writes them last, after every dump.
    let mut outputs = vec![paths.report_stats.clone()];
    outputs.extend(paths.signal_dumps());
    StageDescriptor {
        id: StageId::ReportResults,
        program: builtin(tools, tools::REPORT_SUBCOMMAND),
        inputs: vec![ArtifactRef::from_stage(StageId::SplineFusion, &paths.result)],
        outputs,
        args: vec![
            path_arg("result", &paths.result),
            path_arg("stats-json", &paths.report_stats),
            path_arg("signals-dir", &paths.signals_dir),
        ],
        requirement: Requirement::Required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imucam_core::{DatasetLayout, Platform, Recording};

    fn layout(with_bias: bool) -> DatasetLayout {
        let root = PathBuf::from("/data/run");
        DatasetLayout {
            cam: Recording {
                path: root.join("cam/a_video.avi"),
                basename: "a_video".into(),
            },
            imu_bias: Recording {
                path: root.join("imu_bias/b_video.avi"),
                basename: "b_video".into(),
            },
            cam_imu: Recording {
                path: root.join("cam_imu/c_video.avi"),
                basename: "c_video".into(),
            },
            cam_imu_telemetry: root.join("cam_imu/c.jsonl"),
            bias_telemetry: with_bias.then(|| root.join("imu_bias/b.jsonl")),
            root,
        }
    }

    fn graph(use_bias: bool) -> StageGraph {
        let mut config = RunConfig::for_platform(Platform::Zed);
        config.use_bias_recording = use_bias;
        let paths = ArtifactPaths::from_layout(&layout(use_bias), &config);
        let tools = ToolPaths::new("/opt/build", "/opt/src").with_self_exe("/opt/imucam");
        StageGraph::build(&config, &paths, &tools)
    }

    fn has_arg(stage: &StageDescriptor, prefix: &str) -> bool {
        stage.args.iter().any(|a| a.starts_with(prefix))
    }

    #[test]
    fn graph_lists_every_stage_in_order() {
        let g = graph(true);
        let ids: Vec<StageId> = g.stages().iter().map(|s| s.id).collect();
        assert_eq!(ids, StageId::ALL.to_vec());
        g.validate().expect("valid graph");
    }

    #[test]
    fn bias_stages_disabled_without_bias_recording() {
        let g = graph(false);
        g.validate().expect("valid graph");
        let enabled: Vec<StageId> = g.enabled().collect();
        assert!(!enabled.contains(&StageId::NormalizeBiasTelemetry));
        assert!(!enabled.contains(&StageId::EstimateImuBias));

        let rotation = g.get(StageId::InitImuToCameraRotation).unwrap();
        assert!(!has_arg(rotation, "--imu_bias_estimate="));
        let fusion = g.get(StageId::SplineFusion).unwrap();
        assert!(!has_arg(fusion, "--imu_bias_file="));
    }

    #[test]
    fn bias_estimate_feeds_rotation_and_fusion() {
        let g = graph(true);
        let rotation = g.get(StageId::InitImuToCameraRotation).unwrap();
        assert!(has_arg(rotation, "--imu_bias_estimate=/data/run/imu_bias/imu_bias_b_video.json"));
        let fusion = g.get(StageId::SplineFusion).unwrap();
        assert!(fusion
            .inputs
            .iter()
            .any(|i| i.source == ArtifactSource::Stage(StageId::EstimateImuBias)));
    }

    #[test]
    fn every_argument_is_long_form_key_value() {
        for stage in graph(true).stages() {
            for a in &stage.args {
                assert!(a.starts_with("--") && a.contains('='), "{}: {a}", stage.id);
            }
        }
    }

    #[test]
    fn corner_extraction_arguments() {
        let g = graph(false);
        let stage = g.get(StageId::ExtractCamCorners).unwrap();
        assert_eq!(
            stage.args,
            vec![
                "--input_path=/data/run/cam/a_video.avi",
                "--aruco_detector_params=/opt/src/resource/charuco_detector_params.yml",
                "--board_type=charuco",
                "--save_corners_json_path=/data/run/cam/cam_corners_a_video_charuco_10x8_0.021_1.0.uson",
                "--downsample_factor=1.0",
                "--checker_square_length_m=0.021",
                "--verbose=1",
                "--recompute_corners=0",
                "--num_squares_x=10",
                "--num_squares_y=8",
                "--logtostderr=1",
            ]
        );
        assert_eq!(
            stage.program,
            Program::Tool {
                path: PathBuf::from("/opt/build/extract_board_to_json")
            }
        );
    }

    #[test]
    fn normalization_runs_through_own_binary() {
        let g = graph(false);
        let inv = g.get(StageId::NormalizeCamImuTelemetry).unwrap().invocation();
        assert_eq!(inv.program, PathBuf::from("/opt/imucam"));
        assert_eq!(inv.args[0], "normalize-telemetry");
        assert!(inv.args.contains(&"--format=jsonl".to_string()));
    }

    #[test]
    fn detects_out_of_order_dependency() {
        let mut stages = graph(false).stages().to_vec();
        stages.swap(2, 0);
        let err = StageGraph::from_stages(stages).validate().unwrap_err();
        assert!(matches!(
            err,
            GraphError::ProducerNotEarlier {
                stage: StageId::CalibrateCamera,
                producer: StageId::ExtractCamCorners,
                ..
            }
        ));
    }

    #[test]
    fn detects_duplicate_outputs() {
        let mut stages = graph(false).stages().to_vec();
        let corners = stages[0].outputs[0].clone();
        stages[1].outputs = vec![corners];
        let err = StageGraph::from_stages(stages).validate().unwrap_err();
        assert!(matches!(
            err,
            GraphError::DuplicateOutput {
                first: StageId::ExtractCamCorners,
                second: StageId::ExtractCamImuCorners,
                ..
            }
        ));
    }

    #[test]
    fn detects_dependency_on_disabled_stage() {
        let mut stages = graph(false).stages().to_vec();
        let fusion = stages
            .iter_mut()
            .find(|s| s.id == StageId::SplineFusion)
            .unwrap();
        fusion.inputs.push(ArtifactRef::from_stage(
            StageId::EstimateImuBias,
            "/data/run/imu_bias/imu_bias_b_video.json",
        ));
        let err = StageGraph::from_stages(stages).validate().unwrap_err();
        assert!(matches!(err, GraphError::ProducerDisabled { .. }));
    }
}
