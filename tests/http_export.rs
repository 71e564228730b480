//! HTTP collaborator tests against a mock telemetry API.

use std::sync::Mutex;

use ride_tcx::http::{Ride, RideFetcher, RideQuery};
use ride_tcx::{
    ConversionObserver, ExportConfig, ExportError, LogObserver, NoopObserver, RideSummary,
    TcxDocument,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_for(server: &MockServer) -> ExportConfig {
    init_logging();
    ExportConfig {
        api_base_url: server.uri(),
        max_retries: 0,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

fn ride_body() -> serde_json::Value {
    json!({
        "ride": {
            "id": 42,
            "athlete": {"id": 7},
            "elapsedTime": 5,
            "startDate": "2013-01-01T00:00:00Z",
            "name": "Lunch Ride",
            "distance": 50.0,
            "movingTime": 5,
            "bike": null,
            "location": "Boulder, CO"
        }
    })
}

fn stream_body() -> serde_json::Value {
    json!({
        "time": [0, 5],
        "latlng": [[1.0, 2.0], [1.1, 2.1]],
        "altitude": [10, 12],
        "distance": [0, 50],
        "velocity": [0, 9.0],
        "heartrate": [0, 85]
    })
}

#[tokio::test]
async fn test_login_sets_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/authentication/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc123"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .and(header("authorization", "Bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .mount(&server)
        .await;

    let mut fetcher = RideFetcher::new(&config_for(&server)).unwrap();
    let token = fetcher.login("rider@example.com", "secret").await.unwrap();
    assert_eq!(token, "abc123");

    let ride = fetcher.fetch_ride(42).await.unwrap();
    assert_eq!(ride.name, "Lunch Ride");
    assert_eq!(ride.athlete_id(), 7);
}

#[tokio::test]
async fn test_get_all_rides_follows_offsets() {
    let server = MockServer::start().await;

    let first_page: Vec<_> = (0..50).map(|i| json!({"id": i, "name": "ride"})).collect();
    Mock::given(method("GET"))
        .and(path("/rides"))
        .and(query_param("athleteId", "7"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rides": first_page})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rides"))
        .and(query_param("offset", "50"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"rides": [{"id": 50, "name": "last"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rides"))
        .and(query_param("offset", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rides": []})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RideFetcher::new(&config_for(&server)).unwrap();
    let rides = fetcher
        .get_all_rides(&RideQuery::for_athlete(7))
        .await
        .unwrap();
    assert_eq!(rides.len(), 51);
    assert_eq!(rides[50].name, "last");
}

#[tokio::test]
async fn test_not_found_is_propagated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rides/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = RideFetcher::new(&config_for(&server)).unwrap();
    let result = fetcher.fetch_ride(404).await;
    assert!(matches!(
        result,
        Err(ExportError::Http {
            status_code: Some(404),
            ..
        })
    ));
}

#[tokio::test]
async fn test_rate_limit_exhausts_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/streams/42"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = RideFetcher::new(&config_for(&server)).unwrap();
    let result = fetcher.fetch_stream(42).await;
    assert!(matches!(
        result,
        Err(ExportError::Http {
            status_code: Some(429),
            ..
        })
    ));
}

#[tokio::test]
async fn test_rate_limit_recovers_within_retries() {
    let server = MockServer::start().await;

    // Mounted first, so it answers the first request and then steps aside
    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExportConfig {
        max_retries: 1,
        ..config_for(&server)
    };
    let fetcher = RideFetcher::new(&config).unwrap();
    let ride = fetcher.fetch_ride(42).await.unwrap();
    assert_eq!(ride.name, "Lunch Ride");
}

#[tokio::test]
async fn test_ride_handle_fetches_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = RideFetcher::new(&config_for(&server)).unwrap();
    let mut ride = Ride::new(42);

    assert_eq!(ride.summary(&fetcher).await.unwrap().distance, 50.0);
    assert_eq!(ride.summary(&fetcher).await.unwrap().name, "Lunch Ride");
    assert!(ride.is_summary_cached());

    ride.invalidate();
    assert!(!ride.is_summary_cached());
    ride.summary(&fetcher).await.unwrap();
}

#[tokio::test]
async fn test_export_ride_writes_document() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/streams/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream_body()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("42.tcx");
    let config = config_for(&server);
    let fetcher = RideFetcher::new(&config).unwrap();

    let document = fetcher
        .export_ride(42, &out, &config, &LogObserver)
        .await
        .unwrap();
    assert_eq!(document.trackpoint_count(), 2);

    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
    assert_eq!(written.matches("<HeartRateBpm>").count(), 1);
    assert!(written.contains("<Value>85</Value>"));

    // Second export without overwrite must fail and keep the file
    let again = fetcher
        .export_ride(42, &out, &config, &LogObserver)
        .await;
    assert!(matches!(again, Err(ExportError::AlreadyExists { .. })));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), written);
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl ConversionObserver for RecordingObserver {
    fn on_start(&self, summary: &RideSummary, sample_count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {} {}", summary.id, sample_count));
    }

    fn on_finish(&self, document: &TcxDocument) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish {}", document.trackpoint_count()));
    }
}

#[tokio::test]
async fn test_export_ride_reports_to_observer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/streams/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream_body()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("42.tcx");
    let config = config_for(&server);
    let fetcher = RideFetcher::new(&config).unwrap();
    let observer = RecordingObserver::default();

    fetcher
        .export_ride(42, &out, &config, &observer)
        .await
        .unwrap();
    assert_eq!(
        *observer.events.lock().unwrap(),
        vec!["start 42 2".to_string(), "finish 2".to_string()]
    );
}

#[tokio::test]
async fn test_export_missing_channel_writes_nothing() {
    let server = MockServer::start().await;

    let mut stream = stream_body();
    stream.as_object_mut().unwrap().remove("altitude");

    Mock::given(method("GET"))
        .and(path("/rides/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ride_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/streams/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("42.tcx");
    let config = config_for(&server);
    let fetcher = RideFetcher::new(&config).unwrap();

    let result = fetcher
        .export_ride(42, &out, &config, &NoopObserver)
        .await;
    assert!(matches!(
        result,
        Err(ExportError::MissingChannel { ref channel }) if channel == "altitude"
    ));
    assert!(!out.exists());
}
