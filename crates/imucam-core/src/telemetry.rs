//! Telemetry normalization.
//!
//! Vendor IMU logs are converted into one canonical JSON document that every
//! downstream stage reads:
//!
//! ```json
//! {
//!   "timestamps_ns": [0, 5000000],
//!   "accelerometer": [[0.1, 9.8, 0.0], [0.1, 9.8, 0.1]],
//!   "gyroscope": [[0.0, 0.01, 0.0], [0.0, 0.02, 0.0]],
//!   "camera_fps": null,
//!   "img_timestamps_ns": []
//! }
//! ```
//!
//! Supported inputs:
//! - EuRoC-style CSV: `timestamp_ns, gyro_x, gyro_y, gyro_z, acc_x, acc_y, acc_z`,
//!   `#` starts a comment/header line.
//! - JSON lines (ZED recorder): one object per line with `timestamp`,
//!   `accelerometer` and `gyroscope` fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Errors produced while parsing or validating a vendor telemetry log.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryFormatError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("line {line}: {reason}")]
    Csv { line: usize, reason: String },
    #[error("line {line}: {source}")]
    JsonLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: non-finite measurement")]
    NonFinite { line: usize },
    #[error("telemetry log contains no IMU samples")]
    Empty,
    #[error("timestamps go backwards at sample {index} ({previous} ns -> {current} ns)")]
    NonMonotonic {
        index: usize,
        previous: i64,
        current: i64,
    },
    #[error("unknown telemetry format `{0}` (expected `csv` or `jsonl`)")]
    UnknownFormat(String),
}

/// Vendor telemetry formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    Csv,
    Jsonl,
}

impl TelemetryFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryFormat::Csv => "csv",
            TelemetryFormat::Jsonl => "jsonl",
        }
    }
}

impl fmt::Display for TelemetryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryFormat {
    type Err = TelemetryFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(TelemetryFormat::Csv),
            "jsonl" | "json-lines" | "jsonlines" => Ok(TelemetryFormat::Jsonl),
            _ => Err(TelemetryFormatError::UnknownFormat(s.to_string())),
        }
    }
}

/// Canonical telemetry document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub timestamps_ns: Vec<i64>,
    /// Accelerometer samples in m/s^2.
    pub accelerometer: Vec<[f64; 3]>,
    /// Gyroscope samples in rad/s.
    pub gyroscope: Vec<[f64; 3]>,
    #[serde(default)]
    pub camera_fps: Option<f64>,
    #[serde(default)]
    pub img_timestamps_ns: Vec<i64>,
}

impl Telemetry {
    pub fn push(&mut self, timestamp_ns: i64, accelerometer: [f64; 3], gyroscope: [f64; 3]) {
        self.timestamps_ns.push(timestamp_ns);
        self.accelerometer.push(accelerometer);
        self.gyroscope.push(gyroscope);
    }

    pub fn len(&self) -> usize {
        self.timestamps_ns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps_ns.is_empty()
    }

    /// Duration covered by the IMU samples, in seconds.
    pub fn duration_s(&self) -> f64 {
        match (self.timestamps_ns.first(), self.timestamps_ns.last()) {
            (Some(first), Some(last)) => (last - first) as f64 * 1e-9,
            _ => 0.0,
        }
    }

    /// Reject empty logs and timestamps that go backwards.
    pub fn validate(&self) -> Result<(), TelemetryFormatError> {
        if self.is_empty() {
            return Err(TelemetryFormatError::Empty);
        }
        for (index, pair) in self.timestamps_ns.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(TelemetryFormatError::NonMonotonic {
                    index: index + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(())
    }

    /// Parse a vendor log from text.
    pub fn parse(text: &str, format: TelemetryFormat) -> Result<Self, TelemetryFormatError> {
        let telemetry = match format {
            TelemetryFormat::Csv => parse_csv(text)?,
            TelemetryFormat::Jsonl => parse_jsonl(text)?,
        };
        telemetry.validate()?;
        Ok(telemetry)
    }

    /// Load a canonical telemetry document.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TelemetryFormatError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this document as JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TelemetryFormatError> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Read a vendor log, validate it and write the canonical JSON document.
///
/// The output is only written when the whole input parsed.
pub fn normalize_file(
    input: &Path,
    format: TelemetryFormat,
    output: &Path,
) -> Result<Telemetry, TelemetryFormatError> {
    let raw = fs::read_to_string(input)?;
    let telemetry = Telemetry::parse(&raw, format)?;
    telemetry.write_json(output)?;
    Ok(telemetry)
}

fn parse_timestamp(field: &str) -> Option<i64> {
    field
        .parse::<i64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.round() as i64))
}

fn parse_csv(text: &str) -> Result<Telemetry, TelemetryFormatError> {
    let mut telemetry = Telemetry::default();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 7 {
            return Err(TelemetryFormatError::Csv {
                line: line_no,
                reason: format!("expected 7 columns, found {}", fields.len()),
            });
        }
        let timestamp = parse_timestamp(fields[0]).ok_or_else(|| TelemetryFormatError::Csv {
            line: line_no,
            reason: format!("invalid timestamp `{}`", fields[0]),
        })?;
        let mut values = [0.0f64; 6];
        for (slot, field) in values.iter_mut().zip(&fields[1..7]) {
            *slot = field.parse().map_err(|_| TelemetryFormatError::Csv {
                line: line_no,
                reason: format!("invalid number `{field}`"),
            })?;
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TelemetryFormatError::NonFinite { line: line_no });
        }
        let gyro = [values[0], values[1], values[2]];
        let acc = [values[3], values[4], values[5]];
        telemetry.push(timestamp, acc, gyro);
    }
    Ok(telemetry)
}

#[derive(Deserialize)]
struct ImuRecord {
    #[serde(alias = "timestamp_ns", alias = "ts")]
    timestamp: i64,
    #[serde(alias = "acc", alias = "linear_acceleration")]
    accelerometer: [f64; 3],
    #[serde(alias = "gyro", alias = "angular_velocity")]
    gyroscope: [f64; 3],
}

fn parse_jsonl(text: &str) -> Result<Telemetry, TelemetryFormatError> {
    let mut telemetry = Telemetry::default();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ImuRecord = serde_json::from_str(line).map_err(|source| {
            TelemetryFormatError::JsonLine {
                line: line_no,
                source,
            }
        })?;
        if record
            .accelerometer
            .iter()
            .chain(&record.gyroscope)
            .any(|v| !v.is_finite())
        {
            return Err(TelemetryFormatError::NonFinite { line: line_no });
        }
        telemetry.push(record.timestamp, record.accelerometer, record.gyroscope);
    }
    Ok(telemetry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUROC: &str = "\
#timestamp [ns],w_RS_S_x [rad s^-1],w_RS_S_y [rad s^-1],w_RS_S_z [rad s^-1],a_RS_S_x [m s^-2],a_RS_S_y [m s^-2],a_RS_S_z [m s^-2]
1403636579758555392,-0.099134,0.14032,0.02154,8.1476,-0.37,-2.4267
1403636579763555584,-0.099134,0.14102,0.02224,8.0330,-0.40,-2.4184
";

    #[test]
    fn parses_euroc_csv_with_gyro_first() {
        let t = Telemetry::parse(EUROC, TelemetryFormat::Csv).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.timestamps_ns[0], 1403636579758555392);
        assert_eq!(t.gyroscope[0], [-0.099134, 0.14032, 0.02154]);
        assert_eq!(t.accelerometer[1], [8.0330, -0.40, -2.4184]);
    }

    #[test]
    fn csv_error_reports_line() {
        let text = "# header\n1,0,0,0,0,0,0\n2,0,0,abc,0,0,0\n";
        match Telemetry::parse(text, TelemetryFormat::Csv) {
            Err(TelemetryFormatError::Csv { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("abc"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_json_lines_with_aliases() {
        let text = r#"{"timestamp": 10, "accelerometer": [0.0, 9.8, 0.1], "gyroscope": [0.1, 0.2, 0.3]}

{"ts": 20, "acc": [0.0, 9.7, 0.1], "gyro": [0.0, 0.0, 0.0]}
"#;
        let t = Telemetry::parse(text, TelemetryFormat::Jsonl).unwrap();
        assert_eq!(t.timestamps_ns, vec![10, 20]);
        assert_eq!(t.accelerometer[1], [0.0, 9.7, 0.1]);
    }

    #[test]
    fn json_line_error_reports_line() {
        let text = "{\"timestamp\": 1, \"accelerometer\": [0,0,0], \"gyroscope\": [0,0,0]}\n{\"timestamp\": 2}\n";
        assert!(matches!(
            Telemetry::parse(text, TelemetryFormat::Jsonl),
            Err(TelemetryFormatError::JsonLine { line: 2, .. })
        ));
    }

    #[test]
    fn rejects_empty_and_backwards_logs() {
        assert!(matches!(
            Telemetry::parse("# only header\n", TelemetryFormat::Csv),
            Err(TelemetryFormatError::Empty)
        ));
        let text = "5,0,0,0,0,0,0\n3,0,0,0,0,0,0\n";
        assert!(matches!(
            Telemetry::parse(text, TelemetryFormat::Csv),
            Err(TelemetryFormatError::NonMonotonic { index: 1, .. })
        ));
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("CSV".parse::<TelemetryFormat>().unwrap(), TelemetryFormat::Csv);
        assert_eq!("jsonl".parse::<TelemetryFormat>().unwrap(), TelemetryFormat::Jsonl);
        assert!("xml".parse::<TelemetryFormat>().is_err());
    }

    #[test]
    fn normalize_writes_canonical_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("imu0.csv");
        let output = dir.path().join("imu0_gen.json");
        fs::write(&input, EUROC).unwrap();

        let t = normalize_file(&input, TelemetryFormat::Csv, &output).unwrap();
        let back = Telemetry::load_json(&output).unwrap();
        assert_eq!(back, t);

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(value["camera_fps"].is_null());
        assert_eq!(value["accelerometer"][0][0], 8.1476);
    }

    #[test]
    fn failed_normalization_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("imu0.csv");
        let output = dir.path().join("imu0_gen.json");
        fs::write(&input, "1,2,3\n").unwrap();
        assert!(normalize_file(&input, TelemetryFormat::Csv, &output).is_err());
        assert!(!output.exists());
    }
}
