//! # Line Parser
//!
//! Classifies decoded lines and extracts telemetry samples and configuration
//! snapshots.

use chrono::{DateTime, Utc};

use super::types::*;
use crate::error::ParseError;

/// Classify a decoded line by prefix, falling back to keyword heuristics
///
/// # Examples
///
/// ```
/// use imu_link::protocol::parser::classify;
/// use imu_link::protocol::types::LineKind;
///
/// assert_eq!(classify("DATA:1,2,3"), LineKind::Telemetry("1,2,3"));
/// assert_eq!(classify("Started streaming"), LineKind::Status("Started streaming"));
/// ```
pub fn classify(line: &str) -> LineKind<'_> {
    if let Some(fields) = line.strip_prefix(DATA_PREFIX) {
        return LineKind::Telemetry(fields);
    }
    if let Some(fields) = line.strip_prefix(CONFIG_PREFIX) {
        return LineKind::ConfigSnapshot(fields);
    }
    if line.starts_with(DEBUG_PREFIX) {
        return LineKind::Debug(line);
    }
    if line.starts_with(SCAN_PREFIX) {
        return LineKind::Scan(line);
    }
    if line.contains(HELP_MARKER) {
        return LineKind::Help(line);
    }

    let lower = line.to_lowercase();
    if STATUS_KEYWORDS.iter().any(|word| lower.contains(word)) {
        return LineKind::Status(line);
    }

    LineKind::Unrecognized(line)
}

/// Parse the payload of a `DATA:` line
///
/// # Arguments
///
/// * `fields` - Payload after the `DATA:` prefix
/// * `host_time` - Arrival time of the line
///
/// # Errors
///
/// - `FieldCount` if the payload does not have exactly 11 fields
/// - `NumericFormat` if any field is not a number
pub fn parse_telemetry(
    fields: &str,
    host_time: DateTime<Utc>,
) -> Result<TelemetrySample, ParseError> {
    let parts: Vec<&str> = fields.split(',').map(str::trim).collect();
    if parts.len() != TELEMETRY_FIELD_COUNT {
        return Err(ParseError::FieldCount {
            expected: TELEMETRY_FIELD_COUNT,
            found: parts.len(),
        });
    }

    let device_timestamp = parts[0]
        .parse::<u32>()
        .map_err(|_| numeric_error("timestamp", parts[0]))?;

    let mut values = [0f32; TELEMETRY_FIELD_COUNT - 1];
    for (i, (slot, raw)) in values.iter_mut().zip(&parts[1..]).enumerate() {
        *slot = raw
            .parse::<f32>()
            .map_err(|_| numeric_error(TELEMETRY_FIELD_NAMES[i], raw))?;
    }

    Ok(TelemetrySample {
        device_timestamp,
        host_time,
        accel: Vec3::new(values[0], values[1], values[2]),
        gyro: Vec3::new(values[3], values[4], values[5]),
        mag: Vec3::new(values[6], values[7], values[8]),
        temperature: values[9],
    })
}

/// Field names after the timestamp, used in error messages
const TELEMETRY_FIELD_NAMES: [&str; TELEMETRY_FIELD_COUNT - 1] =
    ["ax", "ay", "az", "gx", "gy", "gz", "mx", "my", "mz", "temp"];

/// Parse the payload of a `CONFIG:` line
///
/// Unknown keys are skipped. Any malformed pair, non-numeric value, or
/// out-of-range value rejects the whole line.
///
/// # Examples
///
/// ```
/// use imu_link::protocol::parser::parse_config;
///
/// let patch = parse_config("ACCEL_RANGE=2,EN_GYRO=0,STREAMING=1").unwrap();
/// assert_eq!(patch.accel_range, Some(2));
/// assert_eq!(patch.enable_gyro, Some(false));
/// assert_eq!(patch.mag_rate, None);
/// ```
pub fn parse_config(fields: &str) -> Result<ConfigPatch, ParseError> {
    let mut patch = ConfigPatch::default();

    for pair in fields.split(',') {
        let mut split = pair.split('=');
        let (key, value) = match (split.next(), split.next(), split.next()) {
            (Some(key), Some(value), None) => (key.trim(), value.trim()),
            _ => return Err(ParseError::MalformedPair(pair.to_string())),
        };

        match key {
            "ACCEL_RANGE" => patch.accel_range = Some(ranged(key, value, 0, ACCEL_RANGE_MAX)?),
            "GYRO_RANGE" => patch.gyro_range = Some(ranged(key, value, 0, GYRO_RANGE_MAX)?),
            "MAG_RATE" => patch.mag_rate = Some(ranged(key, value, 0, MAG_RATE_MAX)?),
            "SAMPLE_RATE" => {
                patch.sample_rate_hz = Some(ranged(key, value, SAMPLE_RATE_MIN, SAMPLE_RATE_MAX)?)
            }
            "EN_ACCEL" => patch.enable_accel = Some(flag(key, value)?),
            "EN_GYRO" => patch.enable_gyro = Some(flag(key, value)?),
            "EN_MAG" => patch.enable_mag = Some(flag(key, value)?),
            "EN_TEMP" => patch.enable_temp = Some(flag(key, value)?),
            _ => {}
        }
    }

    Ok(patch)
}

fn numeric_error(field: &str, value: &str) -> ParseError {
    ParseError::NumericFormat {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn integer(key: &str, value: &str) -> Result<i64, ParseError> {
    value.parse::<i64>().map_err(|_| numeric_error(key, value))
}

fn ranged<T>(key: &str, value: &str, min: T, max: T) -> Result<T, ParseError>
where
    T: Into<i64> + TryFrom<i64>,
{
    let n = integer(key, value)?;
    if n < min.into() || n > max.into() {
        return Err(ParseError::OutOfRange {
            key: key.to_string(),
            value: n,
        });
    }
    T::try_from(n).map_err(|_| ParseError::OutOfRange {
        key: key.to_string(),
        value: n,
    })
}

fn flag(key: &str, value: &str) -> Result<bool, ParseError> {
    Ok(integer(key, value)? != 0)
}
