//! HTTP client for the ride telemetry API.
//!
//! This module provides the telemetry source collaborator:
//! - Login, ride listing with offset pagination, ride and stream fetch
//! - Automatic retry with exponential backoff on 429 and transport errors
//! - A memoizing [`Ride`] handle that fetches each resource once
//! - Blocking wrappers that run the async client on a private runtime

use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::convert::{convert_with, ConversionObserver, LogObserver};
use crate::error::{ExportError, Result};
use crate::ride::{RideEnvelope, RideSummary};
use crate::stream::ActivityStream;
use crate::tcx::TcxDocument;

/// Rides returned per listing page by the API.
pub const PAGE_SIZE: u32 = 50;

/// Filters for ride listings. Unset fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub club_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub athlete_name: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl RideQuery {
    /// Rides of a single athlete.
    pub fn for_athlete(athlete_id: u64) -> Self {
        Self {
            athlete_id: Some(athlete_id),
            ..Default::default()
        }
    }
}

/// One entry of a ride listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideListing {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RidesPage {
    rides: Vec<RideListing>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Async client for the ride telemetry API.
pub struct RideFetcher {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
}

impl RideFetcher {
    /// Create a fetcher from a validated config.
    pub fn new(config: &ExportConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExportError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            token: None,
            max_retries: config.max_retries,
        })
    }

    /// Attach an API token to every subsequent request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Exchange credentials for an API token and keep it for later requests.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<String> {
        let url = format!("{}/authentication/login", self.base_url);
        debug!("[RideFetcher] Logging in as {}", email);
        let response: LoginResponse = self
            .send_json(&url, || {
                self.client
                    .post(&url)
                    .form(&[("email", email), ("password", password)])
            })
            .await?;
        self.token = Some(response.token.clone());
        Ok(response.token)
    }

    /// Fetch one page of rides matching `query`.
    pub async fn get_rides(&self, query: &RideQuery) -> Result<Vec<RideListing>> {
        let url = format!("{}/rides", self.base_url);
        debug!("[RideFetcher] Getting rides with {:?}", query);
        let page: RidesPage = self
            .send_json(&url, || self.authorized(self.client.get(&url).query(query)))
            .await?;
        Ok(page.rides)
    }

    /// Fetch every ride matching `query`, following offsets until a page
    /// comes back empty. Any offset set on `query` is ignored.
    pub async fn get_all_rides(&self, query: &RideQuery) -> Result<Vec<RideListing>> {
        let mut rides = Vec::new();
        let mut page_query = query.clone();
        let mut offset = 0;
        loop {
            page_query.offset = Some(offset);
            let batch = self.get_rides(&page_query).await?;
            if batch.is_empty() {
                break;
            }
            debug!(
                "[RideFetcher] Got {} rides at offset {}",
                batch.len(),
                offset
            );
            rides.extend(batch);
            offset += PAGE_SIZE;
        }
        info!("[RideFetcher] Listed {} rides", rides.len());
        Ok(rides)
    }

    /// Fetch a ride's summary.
    pub async fn fetch_ride(&self, ride_id: u64) -> Result<RideSummary> {
        let url = format!("{}/rides/{}", self.base_url, ride_id);
        let envelope: RideEnvelope = self
            .send_json(&url, || self.authorized(self.client.get(&url)))
            .await?;
        Ok(envelope.ride)
    }

    /// Fetch a ride's telemetry stream.
    pub async fn fetch_stream(&self, ride_id: u64) -> Result<ActivityStream> {
        let url = format!("{}/streams/{}", self.base_url, ride_id);
        let value: serde_json::Value = self
            .send_json(&url, || self.authorized(self.client.get(&url)))
            .await?;
        ActivityStream::from_json(&value)
    }

    /// Fetch a ride and its stream, then build the TCX document.
    pub async fn fetch_document(
        &self,
        ride_id: u64,
        config: &ExportConfig,
        observer: &dyn ConversionObserver,
    ) -> Result<TcxDocument> {
        let summary = self.fetch_ride(ride_id).await?;
        let stream = self.fetch_stream(ride_id).await?;
        convert_with(&summary, &stream, &config.document_options(), observer)
    }

    /// Fetch, convert and write a ride to `path`.
    ///
    /// `observer` receives the conversion events; pass [`LogObserver`] for
    /// log output or [`NoopObserver`](crate::convert::NoopObserver) for none.
    pub async fn export_ride(
        &self,
        ride_id: u64,
        path: impl AsRef<Path>,
        config: &ExportConfig,
        observer: &dyn ConversionObserver,
    ) -> Result<TcxDocument> {
        let path = path.as_ref();
        // Fail before any network traffic if the target is taken
        if path.exists() && !config.allow_overwrite {
            return Err(ExportError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let start = Instant::now();
        let document = self.fetch_document(ride_id, config, observer).await?;
        document.write_to_file(path, config.allow_overwrite)?;
        info!(
            "[RideFetcher] Exported ride {} ({} trackpoints) to {} in {:.2}s",
            ride_id,
            document.trackpoint_count(),
            path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(document)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request built by `build`, retrying on 429 and transport errors.
    async fn send_json<T, F>(&self, url: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;

        loop {
            debug!("[RideFetcher] Sending request for {}", url);
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > self.max_retries {
                            return Err(ExportError::Http {
                                message: "Max retries exceeded (429)".to_string(),
                                status_code: Some(status.as_u16()),
                            });
                        }
                        let backoff = backoff(retries);
                        warn!(
                            "[RideFetcher] 429 for {}, retry {} after {:?}",
                            url, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(ExportError::Http {
                            message: format!("{} returned {}", url, status),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    return resp.json::<T>().await.map_err(|e| ExportError::Http {
                        message: format!("Parse error for {}: {}", url, e),
                        status_code: Some(status.as_u16()),
                    });
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.max_retries {
                        return Err(ExportError::Http {
                            message: format!("Request error for {}: {}", url, e),
                            status_code: e.status().map(|s| s.as_u16()),
                        });
                    }
                    let backoff = backoff(retries);
                    warn!(
                        "[RideFetcher] Error for {}: {}, retry {} after {:?}",
                        url, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, 8s, capped at 16s.
fn backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * (1 << retry.min(5)))
}

/// A ride whose summary and stream are fetched at most once.
///
/// Call [`Ride::invalidate`] to force the next access to fetch again.
#[derive(Debug, Clone)]
pub struct Ride {
    id: u64,
    summary: Option<RideSummary>,
    stream: Option<ActivityStream>,
}

impl Ride {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            summary: None,
            stream: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Summary, fetched on first access.
    pub async fn summary(&mut self, fetcher: &RideFetcher) -> Result<&RideSummary> {
        let summary = match self.summary.take() {
            Some(summary) => summary,
            None => fetcher.fetch_ride(self.id).await?,
        };
        Ok(self.summary.insert(summary))
    }

    /// Stream, fetched on first access.
    pub async fn stream(&mut self, fetcher: &RideFetcher) -> Result<&ActivityStream> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => fetcher.fetch_stream(self.id).await?,
        };
        Ok(self.stream.insert(stream))
    }

    /// Whether the summary has been fetched.
    pub fn is_summary_cached(&self) -> bool {
        self.summary.is_some()
    }

    /// Drop cached data so the next access fetches again.
    pub fn invalidate(&mut self) {
        self.summary = None;
        self.stream = None;
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ExportError::Http {
            message: format!("Failed to create tokio runtime: {}", e),
            status_code: None,
        })
}

/// Blocking wrapper around [`RideFetcher::fetch_ride`].
///
/// Must not be called from inside an async runtime.
pub fn fetch_ride_sync(config: &ExportConfig, token: Option<&str>, ride_id: u64) -> Result<RideSummary> {
    let rt = runtime()?;
    let mut fetcher = RideFetcher::new(config)?;
    if let Some(token) = token {
        fetcher = fetcher.with_token(token);
    }
    rt.block_on(fetcher.fetch_ride(ride_id))
}

/// Blocking wrapper around [`RideFetcher::export_ride`], logging conversion
/// progress through [`LogObserver`].
///
/// Must not be called from inside an async runtime.
pub fn export_ride_sync(
    config: &ExportConfig,
    token: Option<&str>,
    ride_id: u64,
    path: impl AsRef<Path>,
) -> Result<TcxDocument> {
    let rt = runtime()?;
    let mut fetcher = RideFetcher::new(config)?;
    if let Some(token) = token {
        fetcher = fetcher.with_token(token);
    }
    rt.block_on(fetcher.export_ride(ride_id, path, config, &LogObserver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(10), Duration::from_secs(16));
    }

    #[test]
    fn test_query_serialization_skips_unset() {
        let mut query = RideQuery::for_athlete(42);
        query.offset = Some(50);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, serde_json::json!({"athleteId": 42, "offset": 50}));
    }

    #[test]
    fn test_fetcher_rejects_invalid_config() {
        let config = ExportConfig {
            api_base_url: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            RideFetcher::new(&config),
            Err(ExportError::Config { .. })
        ));
    }

    #[test]
    fn test_ride_starts_uncached() {
        let mut ride = Ride::new(7);
        assert_eq!(ride.id(), 7);
        assert!(!ride.is_summary_cached());
        ride.invalidate();
        assert!(!ride.is_summary_cached());
    }
}
