//! Result statistics and plain-text signal dumps.
//!
//! The reporter reads the spline fusion result and produces:
//! - a JSON summary of spline-vs-measurement residuals and bias estimates,
//! - one `<timestamp> <x> <y> <z>` text file per signal for plotting tools.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::SIGNAL_DUMP_FILES;
use crate::result::{RunResult, TrajectorySample, Xyz};

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("trajectory key `{0}` is not a timestamp")]
    InvalidTimestamp(String),
    #[error("result trajectory is empty")]
    EmptyTrajectory,
}

/// Signals stored per trajectory sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    AcclSpline,
    AcclImu,
    AcclBias,
    GyroSpline,
    GyroImu,
    GyroBias,
}

impl Signal {
    /// Same order as [`SIGNAL_DUMP_FILES`].
    pub const ALL: [Signal; 6] = [
        Signal::AcclSpline,
        Signal::AcclImu,
        Signal::AcclBias,
        Signal::GyroSpline,
        Signal::GyroImu,
        Signal::GyroBias,
    ];

    pub fn file_name(self) -> &'static str {
        SIGNAL_DUMP_FILES[self as usize]
    }

    pub fn select(self, sample: &TrajectorySample) -> Xyz {
        match self {
            Signal::AcclSpline => sample.accl_spline,
            Signal::AcclImu => sample.accl_imu,
            Signal::AcclBias => sample.accl_bias,
            Signal::GyroSpline => sample.gyro_spline,
            Signal::GyroImu => sample.gyro_imu,
            Signal::GyroBias => sample.gyro_bias,
        }
    }
}

/// Residual and bias summary of one sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    /// Per-axis RMS of `spline - measurement`.
    pub rms_residual: Xyz,
    pub max_abs_residual: Xyz,
    pub mean_bias: Xyz,
    /// Bias at the last timestamp.
    pub final_bias: Xyz,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultStats {
    pub num_samples: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub accelerometer: SensorStats,
    pub gyroscope: SensorStats,
}

struct Accumulator {
    sum_sq: Vector3<f64>,
    max_abs: Vector3<f64>,
    bias_sum: Vector3<f64>,
    last_bias: Vector3<f64>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            sum_sq: Vector3::zeros(),
            max_abs: Vector3::zeros(),
            bias_sum: Vector3::zeros(),
            last_bias: Vector3::zeros(),
        }
    }

    fn add(&mut self, spline: Xyz, measured: Xyz, bias: Xyz) {
        let residual = spline.to_vector() - measured.to_vector();
        self.sum_sq += residual.component_mul(&residual);
        self.max_abs = self.max_abs.sup(&residual.abs());
        let bias = bias.to_vector();
        self.bias_sum += bias;
        self.last_bias = bias;
    }

    fn finish(&self, n: usize) -> SensorStats {
        let n = n as f64;
        SensorStats {
            rms_residual: (self.sum_sq / n).map(f64::sqrt).into(),
            max_abs_residual: self.max_abs.into(),
            mean_bias: (self.bias_sum / n).into(),
            final_bias: self.last_bias.into(),
        }
    }
}

impl ResultStats {
    pub fn compute(result: &RunResult) -> Result<Self, ReportError> {
        let samples = result.samples_in_time_order()?;
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Err(ReportError::EmptyTrajectory);
        };
        let (start_time, end_time) = (first.0, last.0);

        let mut accl = Accumulator::new();
        let mut gyro = Accumulator::new();
        for (_, s) in &samples {
            accl.add(s.accl_spline, s.accl_imu, s.accl_bias);
            gyro.add(s.gyro_spline, s.gyro_imu, s.gyro_bias);
        }

        Ok(Self {
            num_samples: samples.len(),
            start_time,
            end_time,
            accelerometer: accl.finish(samples.len()),
            gyroscope: gyro.finish(samples.len()),
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// One `<timestamp> <x> <y> <z>` row.
pub fn format_signal_row(t: f64, v: Xyz) -> String {
    format!("{t} {} {} {}", v.x, v.y, v.z)
}

/// Write one text file per [`Signal`] into `dir`, rows in time order.
pub fn write_signal_dumps(result: &RunResult, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let samples = result.samples_in_time_order()?;
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(Signal::ALL.len());
    for signal in Signal::ALL {
        let mut body = String::new();
        for (t, sample) in &samples {
            let _ = writeln!(body, "{}", format_signal_row(*t, signal.select(sample)));
        }
        let path = dir.join(signal.file_name());
        fs::write(&path, body)?;
        written.push(path);
    }
    Ok(written)
}

/// Compute statistics, write the signal dumps and then the stats JSON.
///
/// The stats file is written last so its presence marks a complete report.
pub fn write_report(
    result_path: &Path,
    stats_path: &Path,
    signals_dir: &Path,
) -> Result<ResultStats, ReportError> {
    let result = RunResult::load_json(result_path)?;
    let stats = ResultStats::compute(&result)?;
    write_signal_dumps(&result, signals_dir)?;
    stats.write_json(stats_path)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn xyz(x: f64, y: f64, z: f64) -> Xyz {
        Xyz { x, y, z }
    }

    fn sample(accl_err: f64, gyro_err: f64, bias: f64) -> TrajectorySample {
        TrajectorySample {
            accl_spline: xyz(1.0 + accl_err, 0.0, 9.81),
            accl_imu: xyz(1.0, 0.0, 9.81),
            accl_bias: xyz(bias, 0.0, 0.0),
            gyro_spline: xyz(0.0, gyro_err, 0.0),
            gyro_imu: xyz(0.0, 0.0, 0.0),
            gyro_bias: xyz(0.0, 0.0, bias),
        }
    }

    fn result() -> RunResult {
        let mut trajectory = BTreeMap::new();
        trajectory.insert("0.0".to_string(), sample(0.3, -0.1, 0.01));
        trajectory.insert("0.01".to_string(), sample(-0.4, 0.1, 0.03));
        RunResult {
            trajectory,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn computes_rms_and_biases() {
        let stats = ResultStats::compute(&result()).unwrap();
        assert_eq!(stats.num_samples, 2);
        assert_relative_eq!(stats.end_time, 0.01);
        assert_relative_eq!(stats.accelerometer.rms_residual.x, (0.125f64).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(stats.accelerometer.rms_residual.z, 0.0);
        assert_relative_eq!(stats.accelerometer.max_abs_residual.x, 0.4, epsilon = 1e-12);
        assert_relative_eq!(stats.gyroscope.rms_residual.y, 0.1, epsilon = 1e-12);
        assert_relative_eq!(stats.accelerometer.mean_bias.x, 0.02, epsilon = 1e-12);
        assert_relative_eq!(stats.gyroscope.final_bias.z, 0.03);
    }

    #[test]
    fn empty_trajectory_is_an_error() {
        let empty = RunResult {
            trajectory: BTreeMap::new(),
            extra: serde_json::Map::new(),
        };
        assert!(matches!(
            ResultStats::compute(&empty),
            Err(ReportError::EmptyTrajectory)
        ));
    }

    #[test]
    fn writes_whitespace_rows_per_signal() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_signal_dumps(&result(), dir.path()).unwrap();
        assert_eq!(files.len(), 6);

        let gyro_bias = fs::read_to_string(dir.path().join("gyro_bias.txt")).unwrap();
        let rows: Vec<Vec<f64>> = gyro_bias
            .lines()
            .map(|l| l.split_whitespace().map(|f| f.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows, vec![vec![0.0, 0.0, 0.0, 0.01], vec![0.01, 0.0, 0.0, 0.03]]);
    }

    #[test]
    fn report_writes_stats_after_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let result_path = dir.path().join("result.json");
        let stats_path = dir.path().join("stats.json");
        let signals = dir.path().join("signals");
        result().write_json(&result_path).unwrap();

        let stats = write_report(&result_path, &stats_path, &signals).unwrap();
        let raw = fs::read_to_string(&stats_path).unwrap();
        let back: ResultStats = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, stats);
        assert!(signals.join("accl_spline.txt").is_file());
    }
}
