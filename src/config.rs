//! Export configuration.
//!
//! Plain serde struct with defaults, loadable from JSON. Every field is
//! optional in the JSON input.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::tcx::DocumentOptions;

/// Default telemetry source API root.
pub const DEFAULT_API_BASE_URL: &str = "http://www.strava.com/api/v1";

/// Configuration for fetching rides and writing TCX files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// API root; endpoints are appended (`/rides/{id}`, `/streams/{id}`)
    pub api_base_url: String,
    /// Replace existing output files instead of failing
    pub allow_overwrite: bool,
    /// Emit the legacy `TriggerMehtod` element name
    pub legacy_trigger_method: bool,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retries on HTTP 429 and transport errors
    pub max_retries: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            allow_overwrite: false,
            legacy_trigger_method: true,
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl ExportConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input).map_err(|e| ExportError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Reject values no request could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(ExportError::Config {
                message: "api_base_url must not be empty".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ExportError::Config {
                message: "request_timeout_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// API root without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Document shape options derived from this config.
    pub fn document_options(&self) -> DocumentOptions {
        DocumentOptions {
            legacy_trigger_method: self.legacy_trigger_method,
        }
    }
}
