//! Training Center XML (TCX) document builder.
//!
//! A [`TcxDocument`] holds exactly one Biking activity with one lap and one
//! track. Summary setters append to the lap, [`TcxDocument::add_sample`]
//! appends trackpoints in call order, and [`TcxDocument::write_to_file`]
//! serializes the whole tree with a fixed XML declaration.
//!
//! ## Example
//! ```rust
//! use ride_tcx::{TcxDocument, TrackSample};
//!
//! let mut doc = TcxDocument::new("2013-01-01T00:00:00Z");
//! doc.set_distance(50.0).unwrap();
//! doc.set_duration(5.0).unwrap();
//! doc.add_sample(&TrackSample::new("2013-01-01T00:00:00Z", 1.0, 2.0, 10.0, 0.0, 0.0))
//!     .unwrap();
//! assert!(doc.render().contains("<Trackpoint>"));
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{ExportError, Result};
use crate::xml::{self, Element};

/// Declaration line written before the document body.
pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Namespace of the Garmin activity extension holding per-point speed.
pub const ACTIVITY_EXTENSION_NS: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";

/// Root attributes, in output order.
pub const ROOT_ATTRIBUTES: [(&str, &str); 7] = [
    (
        "xsi:schemaLocation",
        "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 \
         http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd",
    ),
    ("xmlns:ns5", "http://www.garmin.com/xmlschemas/ActivityGoals/v1"),
    ("xmlns:ns4", "http://www.garmin.com/xmlschemas/ProfileExtension/v1"),
    ("xmlns:ns3", ACTIVITY_EXTENSION_NS),
    ("xmlns:ns2", "http://www.garmin.com/xmlschemas/UserProfile/v2"),
    ("xmlns", "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"),
    ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
];

/// Sport written on the activity element.
pub const SPORT: &str = "Biking";

/// Spelling of the lap trigger element emitted by existing exports.
pub const LEGACY_TRIGGER_METHOD: &str = "TriggerMehtod";
/// Schema-correct spelling of the lap trigger element.
pub const TRIGGER_METHOD: &str = "TriggerMethod";

/// Options that change the emitted document shape.
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    /// Keep the misspelled `TriggerMehtod` element for consumers that expect it
    pub legacy_trigger_method: bool,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            legacy_trigger_method: true,
        }
    }
}

impl DocumentOptions {
    /// Element name used for the lap trigger method.
    pub fn trigger_method_element(&self) -> &'static str {
        if self.legacy_trigger_method {
            LEGACY_TRIGGER_METHOD
        } else {
            TRIGGER_METHOD
        }
    }
}

/// One telemetry instant, ready to be appended as a trackpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSample {
    /// Timestamp token, written verbatim
    pub time: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Cumulative distance in meters
    pub distance: f64,
    /// Instantaneous speed, in the source's unit
    pub speed: f64,
    /// Heart rate in bpm; 0 is treated as absent
    pub heartrate: Option<u32>,
    /// Cadence in rpm; 0 is treated as absent
    pub cadence: Option<u32>,
}

impl TrackSample {
    /// Create a sample without heart rate or cadence.
    pub fn new(
        time: impl Into<String>,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        distance: f64,
        speed: f64,
    ) -> Self {
        Self {
            time: time.into(),
            latitude,
            longitude,
            altitude,
            distance,
            speed,
            heartrate: None,
            cadence: None,
        }
    }

    pub fn with_heartrate(mut self, heartrate: Option<u32>) -> Self {
        self.heartrate = heartrate;
        self
    }

    pub fn with_cadence(mut self, cadence: Option<u32>) -> Self {
        self.cadence = cadence;
        self
    }
}

/// Format a float as its shortest round-trippable decimal string.
///
/// Integral values print without a fractional part (`10`), others with the
/// minimum digits needed to read back the same `f64` (`9.5`, `51.5074`).
/// Non-finite values have no decimal form and are rejected.
pub fn format_decimal(field: &str, value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(ExportError::type_mismatch(
            field,
            format!("expected a finite number, got {}", value),
        ));
    }
    // -0.0 would otherwise print as "-0"
    if value == 0.0 {
        return Ok("0".to_string());
    }
    Ok(value.to_string())
}

/// A TCX document under construction.
#[derive(Debug, Clone)]
pub struct TcxDocument {
    root: Element,
    start_time: String,
    trackpoints: usize,
}

impl TcxDocument {
    /// Create a document for an activity starting at `start_time`.
    ///
    /// The token is written verbatim as the activity Id and lap StartTime.
    pub fn new(start_time: impl Into<String>) -> Self {
        Self::with_options(start_time, &DocumentOptions::default())
    }

    /// Create a document with explicit shape options.
    pub fn with_options(start_time: impl Into<String>, options: &DocumentOptions) -> Self {
        let start_time = start_time.into();

        let lap = Element::new("Lap")
            .attr("StartTime", start_time.as_str())
            .child(Element::with_text("Intensity", "Active"))
            .child(Element::with_text(options.trigger_method_element(), "Manual"))
            // Calories are not derived from the stream
            .child(Element::with_text("Calories", "0"))
            .child(Element::new("Track"));

        let activity = Element::new("Activity")
            .attr("sport", SPORT)
            .child(Element::with_text("Id", start_time.as_str()))
            .child(lap);

        let mut root = Element::new("TrainingCenterDatabase");
        for (key, value) in ROOT_ATTRIBUTES {
            root.attributes.push((key.to_string(), value.to_string()));
        }
        root.children.push(Element::new("Activities").child(activity));

        Self {
            root,
            start_time,
            trackpoints: 0,
        }
    }

    /// Rebuild a document from rendered TCX text.
    pub fn parse(input: &str) -> Result<Self> {
        let root = xml::parse(input)?;
        if root.name != "TrainingCenterDatabase" {
            return Err(ExportError::xml(format!(
                "unexpected root element '{}'",
                root.name
            )));
        }
        let lap = root
            .children
            .first()
            .filter(|a| a.name == "Activities")
            .and_then(|a| a.children.first())
            .filter(|a| a.name == "Activity")
            .and_then(|a| a.children.last())
            .filter(|l| l.name == "Lap")
            .ok_or_else(|| ExportError::xml("document has no Activities/Activity/Lap"))?;
        let start_time = lap.attribute("StartTime").unwrap_or_default().to_string();
        let trackpoints = lap
            .find("Track")
            .ok_or_else(|| ExportError::xml("lap has no Track"))?
            .find_all("Trackpoint")
            .count();

        Ok(Self {
            root,
            start_time,
            trackpoints,
        })
    }

    /// Start timestamp token the document was created with.
    pub fn start_time(&self) -> &str {
        &self.start_time
    }

    /// Number of trackpoints appended so far.
    pub fn trackpoint_count(&self) -> usize {
        self.trackpoints
    }

    /// The underlying element tree.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Append the lap's total distance in meters.
    ///
    /// Appends a new element on every call; callers set it at most once.
    /// Non-finite values are rejected with [`ExportError::TypeMismatch`].
    pub fn set_distance(&mut self, meters: f64) -> Result<()> {
        let text = format_decimal("distance", meters)?;
        self.push_lap_summary(Element::with_text("DistanceMeters", text));
        Ok(())
    }

    /// Append the lap's total duration in seconds.
    ///
    /// Appends a new element on every call; callers set it at most once.
    pub fn set_duration(&mut self, seconds: f64) -> Result<()> {
        let text = format_decimal("duration", seconds)?;
        self.push_lap_summary(Element::with_text("TotalTimeSeconds", text));
        Ok(())
    }

    /// Append the lap's maximum heart rate, unless it is zero.
    pub fn set_max_heart_rate(&mut self, bpm: u32) {
        if bpm == 0 {
            return;
        }
        self.push_lap_summary(
            Element::new("MaximumHeartRateBpm").child(Element::with_text("Value", bpm.to_string())),
        );
    }

    /// Append one trackpoint to the track.
    ///
    /// Child order is fixed: Time, Position, AltitudeMeters, DistanceMeters,
    /// Extensions, then HeartRateBpm and Cadence when present and non-zero.
    pub fn add_sample(&mut self, sample: &TrackSample) -> Result<()> {
        let mut point = Element::new("Trackpoint")
            .child(Element::with_text("Time", sample.time.as_str()))
            .child(
                Element::new("Position")
                    .child(Element::with_text(
                        "LatitudeDegrees",
                        format_decimal("latitude", sample.latitude)?,
                    ))
                    .child(Element::with_text(
                        "LongitudeDegrees",
                        format_decimal("longitude", sample.longitude)?,
                    )),
            )
            .child(Element::with_text(
                "AltitudeMeters",
                format_decimal("altitude", sample.altitude)?,
            ))
            .child(Element::with_text(
                "DistanceMeters",
                format_decimal("distance", sample.distance)?,
            ))
            .child(
                Element::new("Extensions").child(
                    Element::new("TPX")
                        .attr("xmlns", ACTIVITY_EXTENSION_NS)
                        .child(Element::with_text(
                            "Speed",
                            format_decimal("speed", sample.speed)?,
                        )),
                ),
            );

        if let Some(bpm) = sample.heartrate.filter(|&v| v != 0) {
            point = point.child(
                Element::new("HeartRateBpm").child(Element::with_text("Value", bpm.to_string())),
            );
        }
        if let Some(rpm) = sample.cadence.filter(|&v| v != 0) {
            point = point.child(Element::with_text("Cadence", rpm.to_string()));
        }

        self.track_mut().children.push(point);
        self.trackpoints += 1;
        Ok(())
    }

    /// Render the document body in canonical pretty-printed form.
    pub fn render(&self) -> String {
        self.root.render()
    }

    /// Render the full file contents: declaration line plus body.
    pub fn to_file_contents(&self) -> String {
        format!("{}\n{}", XML_DECLARATION, self.render())
    }

    /// Write the document to `path`.
    ///
    /// Fails with [`ExportError::AlreadyExists`] when the path exists and
    /// `allow_overwrite` is false; the existing file is left untouched.
    /// Content goes to a sibling temporary file that is renamed into place.
    pub fn write_to_file(&self, path: impl AsRef<Path>, allow_overwrite: bool) -> Result<()> {
        let path = path.as_ref();
        if path.exists() && !allow_overwrite {
            return Err(ExportError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let tmp_path = temp_sibling(path);
        let contents = self.to_file_contents();
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(
            "[TcxDocument] Wrote {} trackpoints ({} bytes) to {}",
            self.trackpoints,
            contents.len(),
            path.display()
        );
        Ok(())
    }

    fn lap_mut(&mut self) -> &mut Element {
        // Structure is fixed at construction and validated by parse()
        let activities = &mut self.root.children[0];
        let activity = &mut activities.children[0];
        let lap_index = activity.children.len() - 1;
        &mut activity.children[lap_index]
    }

    fn track_mut(&mut self) -> &mut Element {
        let lap = self.lap_mut();
        let track_index = lap
            .children
            .iter()
            .rposition(|c| c.name == "Track")
            .unwrap_or(lap.children.len() - 1);
        &mut lap.children[track_index]
    }

    /// Insert a lap summary element just before the track.
    fn push_lap_summary(&mut self, element: Element) {
        let lap = self.lap_mut();
        let track_index = lap
            .children
            .iter()
            .rposition(|c| c.name == "Track")
            .unwrap_or(lap.children.len());
        lap.children.insert(track_index, element);
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
