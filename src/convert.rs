//! Stream to document conversion.
//!
//! Walks a ride's stream sample by sample and feeds a [`TcxDocument`]:
//! 1. Sample count comes from the `latlng` channel
//! 2. Each required channel must be present and exactly that long
//! 3. Timestamps are the ride start plus the `time` offset at each index
//! 4. Heart rate and cadence are read only when their channel exists
//!
//! Validation happens before the first sample is appended, so a failed
//! conversion never yields a partially filled document.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info};

use crate::error::{ExportError, OptionExt, Result};
use crate::ride::{parse_start_date, whole_number, RideSummary};
use crate::stream::{self, ActivityStream};
use crate::tcx::{DocumentOptions, TcxDocument, TrackSample};

/// Receives progress events from a conversion.
///
/// All methods default to doing nothing.
pub trait ConversionObserver {
    /// Called once the stream passed validation.
    fn on_start(&self, _summary: &RideSummary, _sample_count: usize) {}

    /// Called after each trackpoint is appended.
    fn on_sample(&self, _index: usize, _sample: &TrackSample) {}

    /// Called when the document is complete.
    fn on_finish(&self, _document: &TcxDocument) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Observer that forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ConversionObserver for LogObserver {
    fn on_start(&self, summary: &RideSummary, sample_count: usize) {
        info!(
            "[Convert] Ride {} ({}): {} samples",
            summary.id, summary.name, sample_count
        );
    }

    fn on_sample(&self, index: usize, sample: &TrackSample) {
        debug!("[Convert] Sample {} at {}", index, sample.time);
    }

    fn on_finish(&self, document: &TcxDocument) {
        info!(
            "[Convert] Document complete with {} trackpoints",
            document.trackpoint_count()
        );
    }
}

/// Format a timestamp as RFC 3339 UTC with a `Z` suffix.
///
/// Sub-second digits appear only when non-zero.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Convert a ride summary and its stream into a TCX document.
pub fn convert(summary: &RideSummary, stream: &ActivityStream) -> Result<TcxDocument> {
    convert_with(summary, stream, &DocumentOptions::default(), &NoopObserver)
}

/// Convert with explicit document options and an observer.
pub fn convert_with(
    summary: &RideSummary,
    stream: &ActivityStream,
    options: &DocumentOptions,
    observer: &dyn ConversionObserver,
) -> Result<TcxDocument> {
    let start = parse_start_date(&summary.start_date)?;
    let max_heart_rate = summary.max_heart_rate_bpm()?;
    let channels = Channels::resolve(stream)?;

    observer.on_start(summary, channels.len());

    let mut document = TcxDocument::with_options(summary.start_date.as_str(), options);
    document.set_distance(summary.distance)?;
    document.set_duration(summary.elapsed_time)?;
    if let Some(bpm) = max_heart_rate {
        document.set_max_heart_rate(bpm);
    }

    for index in 0..channels.len() {
        let sample = channels.sample(&start, index)?;
        document.add_sample(&sample)?;
        observer.on_sample(index, &sample);
    }

    observer.on_finish(&document);
    Ok(document)
}

/// Validated, equal-length views of every channel used for conversion.
struct Channels<'a> {
    latlng: &'a [[f64; 2]],
    time: &'a [f64],
    altitude: &'a [f64],
    distance: &'a [f64],
    velocity: &'a [f64],
    heartrate: Option<&'a [f64]>,
    cadence: Option<&'a [f64]>,
}

impl<'a> Channels<'a> {
    fn resolve(source: &'a ActivityStream) -> Result<Self> {
        for name in stream::REQUIRED_CHANNELS {
            if !source.has_channel(name) {
                return Err(ExportError::MissingChannel {
                    channel: name.to_string(),
                });
            }
        }

        let latlng = source
            .pairs(stream::LATLNG)?
            .ok_or_missing_channel(stream::LATLNG)?;
        let expected = latlng.len();

        let required = move |name: &str| -> Result<&'a [f64]> {
            let values = source.scalars(name)?.ok_or_missing_channel(name)?;
            check_length(name, expected, values.len())?;
            Ok(values)
        };
        let optional = move |name: &str| -> Result<Option<&'a [f64]>> {
            match source.scalars(name)? {
                Some(values) => {
                    check_length(name, expected, values.len())?;
                    Ok(Some(values))
                }
                None => Ok(None),
            }
        };

        let channels = Self {
            latlng,
            time: required(stream::TIME)?,
            altitude: required(stream::ALTITUDE)?,
            distance: required(stream::DISTANCE)?,
            velocity: required(stream::VELOCITY)?,
            heartrate: optional(stream::HEARTRATE)?,
            cadence: optional(stream::CADENCE)?,
        };

        debug!(
            "[Convert] Stream has {} samples (heartrate: {}, cadence: {})",
            expected,
            channels.heartrate.is_some(),
            channels.cadence.is_some()
        );
        Ok(channels)
    }

    fn len(&self) -> usize {
        self.latlng.len()
    }

    fn sample(&self, start: &DateTime<Utc>, index: usize) -> Result<TrackSample> {
        let [latitude, longitude] = self.latlng[index];
        let time = offset_time(start, self.time[index])?;

        let heartrate = self
            .heartrate
            .map(|values| whole_number(stream::HEARTRATE, values[index]))
            .transpose()?;
        let cadence = self
            .cadence
            .map(|values| whole_number(stream::CADENCE, values[index]))
            .transpose()?;

        Ok(TrackSample::new(
            format_timestamp(&time),
            latitude,
            longitude,
            self.altitude[index],
            self.distance[index],
            self.velocity[index],
        )
        .with_heartrate(heartrate)
        .with_cadence(cadence))
    }
}

fn check_length(channel: &str, expected: usize, actual: usize) -> Result<()> {
    if actual != expected {
        return Err(ExportError::MalformedStream {
            channel: channel.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Start time plus a fractional offset in seconds, at millisecond precision.
fn offset_time(start: &DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return Err(ExportError::type_mismatch(
            stream::TIME,
            format!("offset {} is not a usable number of seconds", seconds),
        ));
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(|| {
            ExportError::type_mismatch(
                stream::TIME,
                format!("offset {} overflows the timestamp range", seconds),
            )
        })
}
