//! Ride summary records as delivered by the telemetry source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Reference to the athlete owning a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteRef {
    pub id: u64,
}

/// Immutable summary of a single ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSummary {
    pub id: u64,
    pub athlete: AthleteRef,
    /// Elapsed time in seconds
    #[serde(alias = "elapsed_time")]
    pub elapsed_time: f64,
    /// ISO-8601 UTC start date, e.g. `2013-01-01T00:00:00Z`
    #[serde(alias = "start_date")]
    pub start_date: String,
    #[serde(default)]
    pub name: String,
    /// Total distance in meters
    pub distance: f64,
    /// Moving time in seconds
    #[serde(alias = "moving_time", default)]
    pub moving_time: f64,
    #[serde(default)]
    pub bike: Option<serde_json::Value>,
    #[serde(default)]
    pub location: Option<String>,
    /// Maximum heart rate in bpm, when the ride was recorded with a monitor
    #[serde(alias = "max_heartrate", default)]
    pub max_heartrate: Option<f64>,
}

/// Envelope of the single-ride endpoint: `{"ride": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct RideEnvelope {
    pub ride: RideSummary,
}

impl RideSummary {
    /// Decode a summary from JSON, with or without the `ride` envelope.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| ExportError::type_mismatch("ride", e.to_string()))?;
        let decoded = if value.get("ride").is_some() {
            serde_json::from_value::<RideEnvelope>(value).map(|e| e.ride)
        } else {
            serde_json::from_value::<RideSummary>(value)
        };
        decoded.map_err(|e| ExportError::type_mismatch("ride", e.to_string()))
    }

    /// Athlete id the ride belongs to.
    pub fn athlete_id(&self) -> u64 {
        self.athlete.id
    }

    /// Parsed start date.
    pub fn start(&self) -> Result<DateTime<Utc>> {
        parse_start_date(&self.start_date)
    }

    /// Maximum heart rate as whole bpm, if recorded and non-zero.
    pub fn max_heart_rate_bpm(&self) -> Result<Option<u32>> {
        match self.max_heartrate {
            None => Ok(None),
            Some(value) => whole_number("max_heartrate", value).map(|v| Some(v).filter(|&v| v != 0)),
        }
    }
}

/// Parse an ISO-8601 / RFC 3339 start date into UTC.
pub fn parse_start_date(start_date: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(start_date)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ExportError::type_mismatch(
                "start_date",
                format!("'{}' is not an ISO-8601 timestamp: {}", start_date, e),
            )
        })
}

/// Coerce a stream number to a non-negative whole number.
pub(crate) fn whole_number(field: &str, value: f64) -> Result<u32> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(ExportError::type_mismatch(
            field,
            format!("expected a non-negative whole number, got {}", value),
        ));
    }
    Ok(value as u32)
}
