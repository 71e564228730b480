//! # Ride TCX
//!
//! Convert ride telemetry streams into Training Center XML (TCX) documents.
//!
//! This library provides:
//! - A TCX document builder with a deterministic pretty-printer
//! - Typed decoding of columnar telemetry streams
//! - Stream to document conversion with per-channel optionality
//! - An optional HTTP client for fetching rides and streams
//!
//! ## Features
//!
//! - **`http`** - Enable HTTP client for ride fetching
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use ride_tcx::{convert, ActivityStream, RideSummary};
//!
//! let summary = RideSummary::from_json_str(r#"{
//!     "id": 1, "athlete": {"id": 2}, "elapsedTime": 5,
//!     "startDate": "2013-01-01T00:00:00Z", "distance": 50
//! }"#).unwrap();
//! let stream = ActivityStream::from_json_str(r#"{
//!     "time": [0, 5],
//!     "latlng": [[1.0, 2.0], [1.1, 2.1]],
//!     "altitude": [10, 12],
//!     "distance": [0, 50],
//!     "velocity": [0, 9.0]
//! }"#).unwrap();
//!
//! let document = convert(&summary, &stream).unwrap();
//! assert_eq!(document.trackpoint_count(), 2);
//! println!("{}", document.to_file_contents());
//! ```

// Unified error handling
pub mod error;
pub use error::{ExportError, OptionExt, Result};

// Minimal XML element tree, printer and parser
pub mod xml;
pub use xml::Element;

// TCX document builder
pub mod tcx;
pub use tcx::{DocumentOptions, TcxDocument, TrackSample};

// Ride summaries from the telemetry source
pub mod ride;
pub use ride::{AthleteRef, RideSummary};

// Telemetry streams keyed by channel name
pub mod stream;
pub use stream::{ActivityStream, Channel};

// Stream to document conversion
pub mod convert;
pub use convert::{convert, convert_with, ConversionObserver, LogObserver, NoopObserver};

// Export configuration
pub mod config;
pub use config::ExportConfig;

// HTTP module for ride fetching
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{export_ride_sync, fetch_ride_sync, Ride, RideFetcher, RideListing, RideQuery};
