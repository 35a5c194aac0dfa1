use super::*;
use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Form, Json, Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

const EXPECTED_AUTH: &str = "Basic bW9kZWxsZXI6c2VjcmV0LXRva2Vu";

#[derive(Clone, Default)]
struct MockState {
    submitted_forms: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    place_queries: Arc<Mutex<Vec<String>>>,
    point_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == EXPECTED_AUTH)
}

async fn handle_status(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Authentication required."})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "authenticated": true,
            "status": true,
            "message": "API is up",
            "hello": "modeller"
        })),
    )
}

async fn handle_create_job(
    State(state): State<MockState>,
    Form(form): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    state.submitted_forms.lock().await.push(form);
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job": "8d1f1c36-5c3f-4f4c-9a4e-2f1a8c0e2b11",
            "message": "Job scheduled"
        })),
    )
}

async fn handle_prognosis(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    match query.get("bbox").map(String::as_str) {
        Some("176,-40,177,-39") => (
            StatusCode::OK,
            Json(json!({
                "configkey": "260b90221e570dfe6caa06946a4bd340",
                "message": "4 chunks need processing",
                "features": {"type": "FeatureCollection", "features": []},
                "num_of_chunks_already_processed": 0,
                "num_of_chunks_to_be_processed": 4
            })),
        )
            .into_response(),
        Some("0,0,1,1") => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": "upstream down"})),
        )
            .into_response(),
        Some("0,0,2,2") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response(),
        Some(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "configkey": "260b90221e570dfe6caa06946a4bd340",
                "message": "Area is too large for this model"
            })),
        )
            .into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn handle_job_status(Path(job): Path<String>) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job": job,
            "status_code": 1,
            "percent_complete": 100,
            "results": {
                "attributes": [],
                "config_key": "260b90221e570dfe6caa06946a4bd340",
                "timesteps": [
                    {"timestamp": "2014-06-13T22:00:00", "attributes": {"snowdepth": true}}
                ]
            }
        })),
    )
}

async fn handle_job_log(Path(job): Path<String>) -> impl IntoResponse {
    format!("log for {job}\nline 2")
}

async fn handle_config(Path(key): Path<String>) -> impl IntoResponse {
    if key == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Configuration not found."})),
        )
            .into_response();
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "<html>Internal Server Error</html>").into_response()
}

async fn handle_places(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let q = query.get("q").cloned().unwrap_or_default();
    state.place_queries.lock().await.push(q);
    Json(json!({
        "geonames": [
            {"name": "Napier", "countryName": "New Zealand", "lat": "-39.4928", "lng": "176.912"}
        ]
    }))
}

async fn handle_point(
    headers: HeaderMap,
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Authentication required."})));
    }
    let layer = query.get("layers").cloned().unwrap_or_default();
    state.point_queries.lock().await.push(query);
    if layer == "broken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"currentvalue": null, "value": [], "timestamp": [], "message": "Error:no such layer"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "currentvalue": 3.5,
            "value": [1.0, 3.5],
            "timestamp": ["2014-06-13T00:00:00", "2014-06-14T00:00:00"],
            "model": "pcrsnow",
            "yaxis": {"min": 0, "max": 50}
        })),
    )
}

async fn spawn_api_server() -> anyhow::Result<(String, MockState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MockState::default();
    let app = Router::new()
        .route("/api/v1/", get(handle_status))
        .route("/api/v1/job", get(handle_prognosis).post(handle_create_job))
        .route("/api/v1/job/:job", get(handle_job_status))
        .route("/api/v1/job/:job/log", get(handle_job_log))
        .route("/api/v1/config/:key", get(handle_config))
        .route("/geonames", get(handle_places))
        .route("/data/point", get(handle_point))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn settings_for(server_url: &str) -> Settings {
    Settings {
        api_url: format!("{server_url}/api/v1"),
        api_username: Some("modeller".into()),
        api_token: Some("secret-token".into()),
        geocoder_url: Some(format!("{server_url}/geonames?username=demo")),
        ..Settings::default()
    }
}

fn request(bbox: &str) -> JobRequest {
    JobRequest {
        model_name: "pcrsnow".into(),
        parameters: vec![
            ("timesteps".into(), "10".into()),
            ("bbox".into(), "ignored".into()),
        ],
        bbox: BoundingBox::parse(bbox).expect("bbox"),
    }
}

#[test]
fn form_pairs_put_model_first_and_bbox_last() {
    let pairs = request("176,-40,177,-39").form_pairs();
    assert_eq!(pairs.first().map(|(k, _)| k.as_str()), Some("model_name"));
    assert_eq!(
        pairs.last(),
        Some(&("bbox".to_string(), "176,-40,177,-39".to_string()))
    );
    assert_eq!(pairs.iter().filter(|(k, _)| k == "bbox").count(), 1);
}

#[tokio::test]
async fn api_status_sends_basic_auth() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let status = api.api_status().await.expect("status");
    assert!(status.authenticated);
    assert_eq!(status.message.as_deref(), Some("API is up"));

    let anonymous = HttpModelApi::new(&Settings {
        api_username: None,
        api_token: None,
        ..settings_for(&server_url)
    })
    .expect("client");
    let err = anonymous.api_status().await.expect_err("unauthorized");
    assert_eq!(err.status(), Some(401));
    assert!(err.alert_text().ends_with("Authentication required."));
}

#[tokio::test]
async fn create_job_posts_form_and_accepts_202() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let created = api
        .create_job(&request("176,-40,177,-39"))
        .await
        .expect("create");
    assert_eq!(created.job, "8d1f1c36-5c3f-4f4c-9a4e-2f1a8c0e2b11");

    let forms = state.submitted_forms.lock().await;
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0][0], ("model_name".into(), "pcrsnow".into()));
    assert_eq!(forms[0][1], ("timesteps".into(), "10".into()));
    assert_eq!(forms[0][2], ("bbox".into(), "176,-40,177,-39".into()));
}

#[tokio::test]
async fn job_status_treats_202_as_success() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let status = api
        .job_status(&JobId::from("8d1f1c36"))
        .await
        .expect("status");
    assert_eq!(status.job, Some(JobId::from("8d1f1c36")));
    assert_eq!(status.percent_complete, 100);
    assert!(status.result_set().is_some());
}

#[tokio::test]
async fn prognosis_refusal_with_json_is_an_answer() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let permitted = api
        .prognosis(&request("176,-40,177,-39"))
        .await
        .expect("permitted");
    assert!(permitted.permitted);
    assert_eq!(permitted.response.num_of_chunks_to_be_processed, Some(4));
    assert!(permitted.response.features.is_some());

    let refused = api
        .prognosis(&request("170,-45,179,-35"))
        .await
        .expect("refusal is not an error");
    assert!(!refused.permitted);
    assert_eq!(refused.response.message, "Area is too large for this model");
    assert_eq!(
        refused.response.configkey.as_ref().map(ConfigKey::short),
        Some("260b90")
    );
}

#[tokio::test]
async fn prognosis_error_body_without_answer_is_a_fault() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let err = api
        .prognosis(&request("0,0,1,1"))
        .await
        .expect_err("502 with an unrelated json body");
    assert!(matches!(err, ApiCallError::Status { status: 502 }));

    let err = api
        .prognosis(&request("0,0,2,2"))
        .await
        .expect_err("500 with an empty json object");
    assert!(matches!(err, ApiCallError::Status { status: 500 }));
    assert!(err.alert_text().contains("Status: 500"));
}

#[tokio::test]
async fn point_series_sends_location_and_selection() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");
    let query = PointQuery {
        location: LatLng {
            lat: -39.5,
            lng: 176.25,
        },
        attribute: "snowdepth".into(),
        timestamp: Timestamp::parse("2014-06-14T00:00:00").expect("timestamp"),
        config_key: ConfigKey::from("260b90221e570dfe6caa06946a4bd340"),
    };

    let series = api.point_series(&query).await.expect("series");
    assert!(series.is_plottable());
    assert_eq!(series.current_value, Some(3.5));

    let seen = state.point_queries.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("lat").map(String::as_str), Some("-39.5"));
    assert_eq!(seen[0].get("lng").map(String::as_str), Some("176.25"));
    assert_eq!(seen[0].get("layers").map(String::as_str), Some("snowdepth"));
    assert_eq!(
        seen[0].get("time").map(String::as_str),
        Some("2014-06-14T00:00:00")
    );
    assert_eq!(
        seen[0].get("configkey").map(String::as_str),
        Some("260b90221e570dfe6caa06946a4bd340")
    );
    drop(seen);

    let err = api
        .point_series(&PointQuery {
            attribute: "broken".into(),
            ..query
        })
        .await
        .expect_err("server error");
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn non_json_errors_are_hard_failures() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let err = api
        .configuration(&ConfigKey::from("260b90221e570dfe6caa06946a4bd340"))
        .await
        .expect_err("500 without json");
    assert!(matches!(err, ApiCallError::Status { status: 500 }));
    assert!(err
        .alert_text()
        .ends_with("No JSON content could be decoded."));

    let err = api
        .configuration(&ConfigKey::from("missing"))
        .await
        .expect_err("404 with json");
    match err {
        ApiCallError::Api(exception) => {
            assert_eq!(exception.status, 404);
            assert_eq!(exception.message, "Configuration not found.");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn job_log_is_plain_text() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    let log = api.job_log(&JobId::from("abc")).await.expect("log");
    assert_eq!(log, "log for abc\nline 2");
}

#[tokio::test]
async fn place_search_keeps_geocoder_params_and_skips_empty_queries() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpModelApi::new(&settings_for(&server_url)).expect("client");

    assert!(api.search_places("   ").await.expect("empty").is_empty());
    assert!(state.place_queries.lock().await.is_empty());

    let places = api.search_places("napier").await.expect("places");
    assert_eq!(places.len(), 1);
    assert_eq!(places[0].name, "Napier");
    assert_eq!(places[0].country_name.as_deref(), Some("New Zealand"));
    assert_eq!(*state.place_queries.lock().await, vec!["napier".to_string()]);
}

#[tokio::test]
async fn missing_geocoder_is_reported() {
    let api = HttpModelApi::new(&Settings {
        geocoder_url: None,
        ..Settings::default()
    })
    .expect("client");
    let err = api.search_places("napier").await.expect_err("no geocoder");
    assert!(matches!(err, ApiCallError::NotConfigured("geocoder_url")));
}

#[test]
fn endpoints_resolve_below_the_api_url() {
    let api = HttpModelApi::new(&Settings {
        api_url: "http://127.0.0.1:9/api/v1".into(),
        ..Settings::default()
    })
    .expect("client");
    assert_eq!(
        api.endpoint("job").expect("job url").as_str(),
        "http://127.0.0.1:9/api/v1/job"
    );
    assert_eq!(api.point_data.as_str(), "http://127.0.0.1:9/data/point");

    let configured = HttpModelApi::new(&Settings {
        point_data_url: Some("http://tiles.example.org/point".into()),
        ..Settings::default()
    })
    .expect("client");
    assert_eq!(configured.point_data.as_str(), "http://tiles.example.org/point");
}
