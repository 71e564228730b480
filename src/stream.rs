//! Columnar telemetry streams keyed by channel name.
//!
//! A stream arrives as JSON, either flat (`{"altitude": [10, 12]}`) or keyed
//! (`{"altitude": {"data": [10, 12], "series_type": "distance"}}`). Values
//! are type checked per channel while decoding so that a bad value surfaces
//! as [`ExportError::TypeMismatch`] naming the channel, never as a panic
//! during conversion.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ExportError, Result};

/// Time offsets from the ride start, in seconds.
pub const TIME: &str = "time";
/// `[latitude, longitude]` pairs.
pub const LATLNG: &str = "latlng";
/// Altitude in meters.
pub const ALTITUDE: &str = "altitude";
/// Cumulative distance in meters.
pub const DISTANCE: &str = "distance";
/// Instantaneous speed.
pub const VELOCITY: &str = "velocity";
/// Heart rate in bpm (optional).
pub const HEARTRATE: &str = "heartrate";
/// Cadence in rpm (optional).
pub const CADENCE: &str = "cadence";

/// Channels a stream must carry to be converted.
pub const REQUIRED_CHANNELS: [&str; 5] = [LATLNG, TIME, ALTITUDE, DISTANCE, VELOCITY];

/// Alternate names accepted for canonical channels.
const CHANNEL_ALIASES: [(&str, &str); 1] = [("velocity_smooth", VELOCITY)];

/// Values of a single channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    /// One number per sample
    Scalar(Vec<f64>),
    /// One `[a, b]` pair per sample
    Pair(Vec<[f64; 2]>),
}

impl Channel {
    /// Number of samples in the channel.
    pub fn len(&self) -> usize {
        match self {
            Channel::Scalar(values) => values.len(),
            Channel::Pair(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A telemetry stream: channel name to per-sample values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityStream {
    channels: BTreeMap<String, Channel>,
}

impl ActivityStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style scalar channel insert.
    pub fn with_scalar(mut self, name: &str, values: Vec<f64>) -> Self {
        self.insert(name, Channel::Scalar(values));
        self
    }

    /// Builder-style pair channel insert.
    pub fn with_pairs(mut self, name: &str, values: Vec<[f64; 2]>) -> Self {
        self.insert(name, Channel::Pair(values));
        self
    }

    /// Insert or replace a channel, resolving aliases to canonical names.
    pub fn insert(&mut self, name: &str, channel: Channel) {
        self.channels.insert(canonical_name(name).to_string(), channel);
    }

    /// Whether the stream carries the named channel at all.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(canonical_name(name))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(canonical_name(name))
    }

    /// Channel names in sorted order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Scalar values of a channel, `None` if the channel is absent.
    ///
    /// A pair channel requested as scalar is a type mismatch.
    pub fn scalars(&self, name: &str) -> Result<Option<&[f64]>> {
        match self.channel(name) {
            None => Ok(None),
            Some(Channel::Scalar(values)) => Ok(Some(values)),
            Some(Channel::Pair(values)) if values.is_empty() => Ok(Some(&[])),
            Some(Channel::Pair(_)) => Err(ExportError::type_mismatch(
                name,
                "expected numbers, found coordinate pairs",
            )),
        }
    }

    /// Pair values of a channel, `None` if the channel is absent.
    pub fn pairs(&self, name: &str) -> Result<Option<&[[f64; 2]]>> {
        match self.channel(name) {
            None => Ok(None),
            Some(Channel::Pair(values)) => Ok(Some(values)),
            // An empty JSON array carries no shape
            Some(Channel::Scalar(values)) if values.is_empty() => Ok(Some(&[])),
            Some(Channel::Scalar(_)) => Err(ExportError::type_mismatch(
                name,
                "expected coordinate pairs, found numbers",
            )),
        }
    }

    /// Decode a stream from its JSON text.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| ExportError::type_mismatch("stream", e.to_string()))?;
        Self::from_json(&value)
    }

    /// Decode a stream from a JSON value.
    ///
    /// The top level must be an object. Each member is either an array of
    /// values or an object whose `data` member is that array. Arrays whose
    /// first element is an array decode as pair channels.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ExportError::type_mismatch("stream", "expected a JSON object"))?;

        let mut stream = Self::new();
        for (name, raw) in object {
            let data = match raw {
                Value::Array(items) => items,
                Value::Object(keyed) => match keyed.get("data") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(ExportError::type_mismatch(
                            name,
                            "keyed channel has no 'data' array",
                        ))
                    }
                },
                other => {
                    return Err(ExportError::type_mismatch(
                        name,
                        format!("expected an array, got {}", json_kind(other)),
                    ))
                }
            };

            let channel = if matches!(data.first(), Some(Value::Array(_))) {
                Channel::Pair(
                    data.iter()
                        .enumerate()
                        .map(|(i, v)| decode_pair(name, i, v))
                        .collect::<Result<_>>()?,
                )
            } else {
                Channel::Scalar(
                    data.iter()
                        .enumerate()
                        .map(|(i, v)| decode_number(name, i, v))
                        .collect::<Result<_>>()?,
                )
            };
            stream.insert(name, channel);
        }
        Ok(stream)
    }
}

fn canonical_name(name: &str) -> &str {
    CHANNEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

fn decode_number(channel: &str, index: usize, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        ExportError::type_mismatch(
            channel,
            format!("sample {} is {}, expected a number", index, json_kind(value)),
        )
    })
}

fn decode_pair(channel: &str, index: usize, value: &Value) -> Result<[f64; 2]> {
    match value.as_array().map(Vec::as_slice) {
        Some([a, b]) => Ok([
            decode_number(channel, index, a)?,
            decode_number(channel, index, b)?,
        ]),
        _ => Err(ExportError::type_mismatch(
            channel,
            format!("sample {} is not a [lat, lng] pair", index),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_flat_stream() {
        let stream = ActivityStream::from_json(&json!({
            "time": [0, 5],
            "latlng": [[1.0, 2.0], [1.1, 2.1]],
            "velocity": [0, 9.0]
        }))
        .unwrap();

        assert_eq!(stream.scalars(TIME).unwrap(), Some(&[0.0, 5.0][..]));
        assert_eq!(
            stream.pairs(LATLNG).unwrap(),
            Some(&[[1.0, 2.0], [1.1, 2.1]][..])
        );
        assert!(!stream.has_channel(HEARTRATE));
    }

    #[test]
    fn test_decode_keyed_stream_and_alias() {
        let stream = ActivityStream::from_json(&json!({
            "velocity_smooth": {"data": [1.5, 2.5], "series_type": "distance"},
            "altitude": {"data": [10, 11], "resolution": "high"}
        }))
        .unwrap();

        assert!(stream.has_channel(VELOCITY));
        assert!(stream.has_channel("velocity_smooth"));
        assert_eq!(stream.scalars(VELOCITY).unwrap(), Some(&[1.5, 2.5][..]));
        let names: Vec<_> = stream.channel_names().collect();
        assert_eq!(names, vec!["altitude", "velocity"]);
    }

    #[test]
    fn test_non_numeric_value_is_type_mismatch() {
        let result = ActivityStream::from_json(&json!({"altitude": [10, "high"]}));
        match result {
            Err(ExportError::TypeMismatch { field, message }) => {
                assert_eq!(field, "altitude");
                assert!(message.contains("sample 1"));
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_pair_is_type_mismatch() {
        let result = ActivityStream::from_json(&json!({"latlng": [[1.0, 2.0], [1.0]]}));
        assert!(matches!(
            result,
            Err(ExportError::TypeMismatch { ref field, .. }) if field == "latlng"
        ));
    }

    #[test]
    fn test_wrong_shape_accessors() {
        let stream = ActivityStream::new()
            .with_scalar(LATLNG, vec![1.0])
            .with_pairs(ALTITUDE, vec![[1.0, 2.0]]);
        assert!(stream.pairs(LATLNG).is_err());
        assert!(stream.scalars(ALTITUDE).is_err());
        assert_eq!(stream.scalars(CADENCE).unwrap(), None);
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(ActivityStream::from_json_str("[1, 2, 3]").is_err());
        assert!(ActivityStream::from_json_str("not json").is_err());
    }
}
