//! Spline fusion result document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::Vector3;

use crate::report::ReportError;

/// 3-vector as written by the spline fusion tool.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Xyz {
    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<Vector3<f64>> for Xyz {
    fn from(v: Vector3<f64>) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

/// Spline value, measurement and bias of both sensors at one timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub accl_spline: Xyz,
    pub accl_imu: Xyz,
    pub accl_bias: Xyz,
    pub gyro_spline: Xyz,
    pub gyro_imu: Xyz,
    pub gyro_bias: Xyz,
}

/// Final result of the spline fusion stage.
///
/// Fields other than `trajectory` are kept verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Timestamp (as written by the tool) -> sample.
    pub trajectory: BTreeMap<String, TrajectorySample>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RunResult {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Samples sorted by numeric timestamp.
    ///
    /// Keys are strings in the JSON document, so the map order is lexical;
    /// `"10.0"` sorts before `"9.0"` there but not here.
    pub fn samples_in_time_order(&self) -> Result<Vec<(f64, &TrajectorySample)>, ReportError> {
        let mut samples = Vec::with_capacity(self.trajectory.len());
        for (key, sample) in &self.trajectory {
            let t: f64 = key
                .trim()
                .parse()
                .map_err(|_| ReportError::InvalidTimestamp(key.clone()))?;
            if !t.is_finite() {
                return Err(ReportError::InvalidTimestamp(key.clone()));
            }
            samples.push((t, sample));
        }
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(samples)
    }
}
