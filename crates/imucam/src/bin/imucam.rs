use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use imucam::core::{
    normalize_file, resolve, write_report, ArtifactClass, BoardType, CameraModel, ConfigError,
    DatasetLayoutError, GravityAxis, Platform, RecomputePolicy, ReportError, RunConfig,
    TelemetryFormat, TelemetryFormatError,
};
use imucam::pipeline::{Pipeline, PipelineError, ProcessRunner, StageAction, StageGraph, ToolPaths};

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Layout(#[from] DatasetLayoutError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryFormatError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config {} is for platform `{found}`, not `{expected}`", path.display())]
    PlatformMismatch {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Layout(_) => -1,
            CliError::Pipeline(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// Orchestrates IMU/camera calibration over a recorded dataset.
#[derive(Debug, Parser)]
#[command(author, version, about = "IMU/camera calibration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Calibrate a GoPro / MYNT-style dataset (`cam0` image folders, EuRoC CSV telemetry).
    #[command(alias = "mynteye")]
    Gopro(RunArgs),
    /// Calibrate a ZED-style dataset (`*video.avi` recordings, JSON-lines telemetry).
    Zed(RunArgs),
    /// Convert a vendor IMU log into the canonical telemetry JSON.
    NormalizeTelemetry(NormalizeArgs),
    /// Summarize a spline fusion result and dump its signals.
    Report(ReportArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CameraModelArg {
    #[value(alias = "PINHOLE")]
    Pinhole,
    #[value(alias = "PINHOLE_RADIAL_TANGENTIAL")]
    PinholeRadialTangential,
    #[value(alias = "DIVISION_UNDISTORTION")]
    DivisionUndistortion,
    #[value(alias = "DOUBLE_SPHERE")]
    DoubleSphere,
    #[value(alias = "EXTENDED_UNIFIED")]
    ExtendedUnified,
    #[value(alias = "FISHEYE")]
    Fisheye,
}

impl From<CameraModelArg> for CameraModel {
    fn from(arg: CameraModelArg) -> Self {
        match arg {
            CameraModelArg::Pinhole => CameraModel::Pinhole,
            CameraModelArg::PinholeRadialTangential => CameraModel::PinholeRadialTangential,
            CameraModelArg::DivisionUndistortion => CameraModel::DivisionUndistortion,
            CameraModelArg::DoubleSphere => CameraModel::DoubleSphere,
            CameraModelArg::ExtendedUnified => CameraModel::ExtendedUnified,
            CameraModelArg::Fisheye => CameraModel::Fisheye,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BoardTypeArg {
    Charuco,
    Radon,
}

impl From<BoardTypeArg> for BoardType {
    fn from(arg: BoardTypeArg) -> Self {
        match arg {
            BoardTypeArg::Charuco => BoardType::Charuco,
            BoardTypeArg::Radon => BoardType::Radon,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GravityAxisArg {
    X,
    Y,
    Z,
    Unknown,
}

impl From<GravityAxisArg> for GravityAxis {
    fn from(arg: GravityAxisArg) -> Self {
        match arg {
            GravityAxisArg::X => GravityAxis::X,
            GravityAxisArg::Y => GravityAxis::Y,
            GravityAxisArg::Z => GravityAxis::Z,
            GravityAxisArg::Unknown => GravityAxis::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RecomputeArg {
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

impl From<RecomputeArg> for ArtifactClass {
    fn from(arg: RecomputeArg) -> Self {
        match arg {
            RecomputeArg::Corners => ArtifactClass::Corners,
            RecomputeArg::CameraCalibration => ArtifactClass::CameraCalibration,
            RecomputeArg::Telemetry => ArtifactClass::Telemetry,
            RecomputeArg::ImuBias => ArtifactClass::ImuBias,
            RecomputeArg::Poses => ArtifactClass::Poses,
            RecomputeArg::SplineWeights => ArtifactClass::SplineWeights,
            RecomputeArg::RotationInit => ArtifactClass::RotationInit,
            RecomputeArg::SplineFusion => ArtifactClass::SplineFusion,
            RecomputeArg::Report => ArtifactClass::Report,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Jsonl,
}

impl From<FormatArg> for TelemetryFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => TelemetryFormat::Csv,
            FormatArg::Jsonl => TelemetryFormat::Jsonl,
        }
    }
}

/// Options shared by the platform subcommands. Unset options keep the
/// platform defaults (or the values from `--config`).
#[derive(Debug, Args)]
struct RunArgs {
    /// Dataset root holding `cam/`, `imu_bias/` and `cam_imu/`.
    #[arg(long)]
    path_calib_dataset: PathBuf,
    /// Directory with the compiled calibration applications.
    #[arg(long)]
    path_to_build: PathBuf,
    /// Tool source tree holding `python/` and `resource/`.
    #[arg(long)]
    path_to_src: PathBuf,
    /// Interpreter for the helper scripts.
    #[arg(long, default_value = "python3")]
    python: PathBuf,

    /// Base configuration as JSON; command-line options override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    camera_model: Option<CameraModelArg>,
    #[arg(long, value_enum)]
    board_type: Option<BoardTypeArg>,
    /// Checker square side length in meters.
    #[arg(long)]
    checker_size_m: Option<f64>,
    #[arg(long)]
    num_squares_x: Option<u32>,
    #[arg(long)]
    num_squares_y: Option<u32>,
    #[arg(long)]
    image_downsample_factor: Option<f64>,
    /// Pose deduplication voxel size for the camera calibration.
    #[arg(long)]
    voxel_grid_size: Option<f64>,
    #[arg(long)]
    gravity_const: Option<f64>,
    /// Seconds trimmed from both ends of the bias recording.
    #[arg(long)]
    bias_calib_remove_s: Option<f64>,

    /// Shorthand for `--recompute corners`.
    #[arg(long)]
    recompute_corners: bool,
    /// Regenerate these artifact classes even when they exist.
    #[arg(long, value_enum, num_args = 1..)]
    recompute: Vec<RecomputeArg>,
    /// Regenerate every artifact.
    #[arg(long)]
    recompute_all: bool,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    reestimate_bias_spline_opt: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    optimize_board_points: Option<bool>,
    #[arg(long, value_enum)]
    known_gravity_axis: Option<GravityAxisArg>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    global_shutter: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    calib_cam_line_delay: Option<bool>,
    /// Estimate IMU biases from the separate `imu_bias` recording.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    use_bias_recording: Option<bool>,
    /// IMU intrinsics JSON forwarded to spline fusion.
    #[arg(long)]
    path_to_imu_intrinsics: Option<PathBuf>,

    /// 0: warnings only, 1: stage banners, 2+: command lines.
    #[arg(long)]
    verbose: Option<u8>,
    /// Write the per-stage run report as JSON.
    #[arg(long)]
    report_json: Option<PathBuf>,
    /// Print the stage plan without launching anything.
    #[arg(long)]
    dry_run: bool,
    /// Emit structured JSON logs. Only honored with the `tracing` feature.
    #[arg(long)]
    json_logs: bool,
}

impl RunArgs {
    fn run_config(&self, platform: Platform) -> Result<RunConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                let config = RunConfig::load_json(path)?;
                if config.platform != platform {
                    return Err(CliError::PlatformMismatch {
                        path: path.clone(),
                        expected: platform.as_str(),
                        found: config.platform.as_str(),
                    });
                }
                config
            }
            None => RunConfig::for_platform(platform),
        };

        if let Some(model) = self.camera_model {
            config.camera_model = model.into();
        }
        if let Some(board_type) = self.board_type {
            config.board.board_type = board_type.into();
        }
        if let Some(size) = self.checker_size_m {
            config.board.square_size_m = size;
        }
        if let Some(x) = self.num_squares_x {
            config.board.squares_x = x;
        }
        if let Some(y) = self.num_squares_y {
            config.board.squares_y = y;
        }
        if let Some(factor) = self.image_downsample_factor {
            config.downsample_factor = factor;
        }
        if let Some(voxel) = self.voxel_grid_size {
            config.voxel_grid_size = voxel;
        }
        if let Some(gravity) = self.gravity_const {
            config.gravity_const = gravity;
        }
        if let Some(trim) = self.bias_calib_remove_s {
            config.bias_calib_remove_s = trim;
        }
        if let Some(v) = self.reestimate_bias_spline_opt {
            config.reestimate_bias = v;
        }
        if let Some(v) = self.optimize_board_points {
            config.optimize_board_points = v;
        }
        if let Some(axis) = self.known_gravity_axis {
            config.known_gravity_axis = axis.into();
        }
        if let Some(v) = self.global_shutter {
            config.global_shutter = v;
        }
        if let Some(v) = self.calib_cam_line_delay {
            config.calib_cam_line_delay = v;
        }
        if let Some(v) = self.use_bias_recording {
            config.use_bias_recording = v;
        }
        if let Some(path) = &self.path_to_imu_intrinsics {
            config.imu_intrinsics = Some(absolute(path)?);
        }
        if let Some(v) = self.verbose {
            config.verbose = v;
        }

        config.recompute = if self.recompute_all {
            RecomputePolicy::all()
        } else {
            let mut policy = config.recompute.clone();
            if self.recompute_corners {
                policy = policy.with(ArtifactClass::Corners);
            }
            for class in &self.recompute {
                policy = policy.with((*class).into());
            }
            policy
        };

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    /// Vendor telemetry log.
    #[arg(long)]
    input: PathBuf,
    #[arg(long, value_enum)]
    format: FormatArg,
    /// Canonical telemetry JSON to write.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Spline fusion result JSON.
    #[arg(long)]
    result: PathBuf,
    /// Statistics JSON to write.
    #[arg(long)]
    stats_json: PathBuf,
    /// Directory for the plain-text signal dumps.
    #[arg(long)]
    signals_dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = try_main(cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn try_main(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Gopro(args) => run_pipeline(Platform::GoPro, &args),
        Command::Zed(args) => run_pipeline(Platform::Zed, &args),
        Command::NormalizeTelemetry(args) => {
            init_logging(1, false);
            let telemetry = normalize_file(&args.input, args.format.into(), &args.output)?;
            log::info!(
                "normalized {} IMU samples ({:.1}s) into {}",
                telemetry.len(),
                telemetry.duration_s(),
                args.output.display()
            );
            Ok(())
        }
        Command::Report(args) => {
            init_logging(1, false);
            let stats = write_report(&args.result, &args.stats_json, &args.signals_dir)?;
            log::info!(
                "{} samples over [{:.3}, {:.3}] s",
                stats.num_samples,
                stats.start_time,
                stats.end_time
            );
            let (a, g) = (&stats.accelerometer, &stats.gyroscope);
            log::info!(
                "accelerometer rms residual: {:.5} {:.5} {:.5}",
                a.rms_residual.x,
                a.rms_residual.y,
                a.rms_residual.z
            );
            log::info!(
                "gyroscope rms residual: {:.5} {:.5} {:.5}",
                g.rms_residual.x,
                g.rms_residual.y,
                g.rms_residual.z
            );
            Ok(())
        }
    }
}

fn run_pipeline(platform: Platform, args: &RunArgs) -> Result<(), CliError> {
    let config = args.run_config(platform)?;
    init_logging(config.verbose, args.json_logs);

    let dataset_root = absolute(&args.path_calib_dataset)?;
    let paths = resolve(&dataset_root, &config)?;
    log::info!(
        "dataset {} ({}, camera model {}, bias recording {})",
        dataset_root.display(),
        platform.as_str(),
        config.camera_model,
        if config.use_bias_recording { "on" } else { "off" }
    );

    let tools = ToolPaths::new(absolute(&args.path_to_build)?, absolute(&args.path_to_src)?)
        .with_python(&args.python);
    let graph = StageGraph::build(&config, &paths, &tools);
    let mut pipeline = Pipeline::new(graph, config.recompute.clone(), ProcessRunner::new());

    if args.dry_run {
        for entry in pipeline.plan().map_err(PipelineError::from)? {
            let action = match entry.action {
                StageAction::Run => "run",
                StageAction::Reuse => "reuse",
                StageAction::Skip => "skip",
            };
            println!(
                "{:>2} {:<28} {:<5} {}",
                entry.stage.number(),
                entry.stage.name(),
                action,
                entry.command
            );
        }
        return Ok(());
    }

    let result = pipeline.run();
    if let Some(path) = &args.report_json {
        if let Err(source) = pipeline.report().write_json(path) {
            let err = CliError::Io {
                path: path.clone(),
                source,
            };
            if result.is_ok() {
                return Err(err);
            }
            log::error!("could not write run report: {err}");
        }
    }
    result?;

    log::info!("calibration result: {}", paths.result.display());
    log::info!("result statistics: {}", paths.report_stats.display());
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    std::path::absolute(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        imucam::core::init_tracing(verbose, json);
        let _ = tracing_log::LogTracer::init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = json;
        let _ = imucam::core::init_with_verbosity(verbose);
    }
}
