// tests/client_stub.rs
//
// Drives SchoolApiClient against an in-process axum stub of the school service.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

use timetable_core::models::{
    AssignSubstituteRequest, FreeTeacherQuery, RemoveSubstituteRequest, TimetableFilter,
};
use timetable_core::periods::parse_time;
use timetable_core::{ApiError, ClientConfig, SchoolApiClient, SchoolDay, SchoolService};

const TOKEN: &str = "stub-token";

#[derive(Clone, Default)]
struct StubState {
    teacher_list_hits: Arc<AtomicUsize>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", TOKEN))
}

async fn teachers(State(state): State<StubState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "no token" }))).into_response();
    }
    state.teacher_list_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!([
        { "id": "U", "name": "Mr. Umber", "scope": "north" },
        { "id": "V", "name": "Ms. Violet" }
    ]))
    .into_response()
}

async fn teacher_schedule(
    Path(teacher_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if teacher_id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no such teacher" })))
            .into_response();
    }
    let year = params.get("academicYear").cloned().unwrap_or_default();
    Json(json!({
        "data": [{
            "day": "Tuesday",
            "startTime": "09:30",
            "endTime": "10:10",
            "subject": format!("Mathematics {}", year),
            "class": "5",
            "section": "A",
            "room": "R12",
            "periodIndex": 2,
            "timetableId": format!("tt-{}", teacher_id)
        }]
    }))
    .into_response()
}

async fn timetables(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let class = params.get("class").cloned().unwrap_or_default();
    Json(json!([{
        "id": format!("tt-{}", class),
        "scope": { "kind": "classSection", "className": class, "section": "A" },
        "academicYear": "2024-25",
        "status": params.get("status").cloned().unwrap_or_else(|| "draft".to_string()),
        "schedule": []
    }]))
}

async fn free_teachers(Query(params): Query<HashMap<String, String>>) -> Response {
    let expected = [
        ("weekday", "Tuesday"),
        ("startTime", "09:30"),
        ("endTime", "10:10"),
        ("scope", "north"),
    ];
    if expected
        .iter()
        .any(|(k, v)| params.get(*k).map(String::as_str) != Some(*v))
    {
        return (StatusCode::BAD_REQUEST, format!("unexpected query {:?}", params)).into_response();
    }
    Json(json!([{ "id": "U", "name": "Mr. Umber", "scope": "north" }])).into_response()
}

async fn assign(Json(body): Json<Value>) -> Response {
    if body["substituteTeacherId"] == "V" {
        return (StatusCode::CONFLICT, Json(json!({ "message": "slot taken" }))).into_response();
    }
    if body["substituteTeacherId"] == "busy" {
        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
    }
    Json(json!({
        "id": "sub-9",
        "timetableId": body["timetableId"],
        "date": body["date"],
        "weekday": "Tuesday",
        "periodIndex": body["periodIndex"],
        "subject": "Mathematics",
        "class": "5",
        "section": "A",
        "startTime": "09:30",
        "endTime": "10:10",
        "originalTeacherId": "T",
        "originalTeacher": "Ms. Teal",
        "substituteTeacherId": body["substituteTeacherId"],
        "substituteTeacher": "Mr. Umber",
        "reason": body["reason"],
        "status": "active"
    }))
    .into_response()
}

async fn remove(Json(body): Json<Value>) -> StatusCode {
    if body["dayIndex"] == 1 && body["periodIndex"] == 2 {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_timetable(Path(id): Path<String>) -> Response {
    if id == "tt-5a" {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "database offline" })))
            .into_response()
    }
}

async fn spawn_stub(state: StubState) -> Url {
    let app = Router::new()
        .route("/api/teachers", get(teachers))
        .route("/api/timetables", get(timetables))
        .route("/api/timetables/teacher/{teacher_id}", get(teacher_schedule))
        .route("/api/timetables/{id}", delete(delete_timetable))
        .route("/api/substitutions", post(assign))
        .route("/api/substitutions/remove", post(remove))
        .route("/api/substitutions/free-teachers", get(free_teachers))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}/api", addr)).unwrap()
}

async fn client(state: StubState) -> (SchoolApiClient, tempfile::TempDir) {
    let base_url = spawn_stub(state).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = ClientConfig::new(base_url);
    config.api_token = Some(TOKEN.to_string());
    config.cache_dir = dir.path().to_path_buf();
    (SchoolApiClient::new(config).unwrap(), dir)
}

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 3).unwrap()
}

fn assign_request(substitute: &str) -> AssignSubstituteRequest {
    AssignSubstituteRequest {
        timetable_id: "tt-5a".to_string(),
        day_index: 1,
        period_index: 2,
        substitute_teacher_id: substitute.to_string(),
        reason: Some("sick".to_string()),
        date: tuesday(),
        scope: Some("north".to_string()),
    }
}

#[tokio::test]
async fn wrapped_schedule_is_unwrapped_and_year_is_sent() {
    let (client, _dir) = client(StubState::default()).await;
    let entries = client
        .fetch_teacher_schedule("T", Some("2024-25"))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].subject, "Mathematics 2024-25");
    assert_eq!(entries[0].timetable_id.as_deref(), Some("tt-T"));
}

#[tokio::test]
async fn missing_resource_maps_to_not_found() {
    let (client, _dir) = client(StubState::default()).await;
    let err = client.fetch_teacher_schedule("missing", None).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(ref m) if m == "no such teacher"));
}

#[tokio::test]
async fn timetable_filter_becomes_query_string() {
    let (client, _dir) = client(StubState::default()).await;
    let filter = TimetableFilter {
        class_name: Some("5".to_string()),
        status: Some(timetable_core::models::TimetableStatus::Active),
        ..Default::default()
    };
    let list = client.fetch_timetables(&filter).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "tt-5");
    assert!(filter.matches(&list[0]));
}

#[tokio::test]
async fn free_teacher_query_sends_window_and_scope() {
    let (client, _dir) = client(StubState::default()).await;
    let query = FreeTeacherQuery {
        weekday: SchoolDay::Tuesday,
        start_time: parse_time("09:30").unwrap(),
        end_time: parse_time("10:10").unwrap(),
        scope: Some("north".to_string()),
    };
    let free = client.fetch_free_teachers(&query).await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].id, "U");
}

#[tokio::test]
async fn assignment_round_trip_and_error_statuses() {
    let (client, _dir) = client(StubState::default()).await;

    let record = client.assign_substitute(&assign_request("U")).await.unwrap();
    assert_eq!(record.id.as_deref(), Some("sub-9"));
    assert_eq!(record.weekday, SchoolDay::Tuesday);
    assert_eq!(record.date, tuesday());
    assert_eq!(record.reason.as_deref(), Some("sick"));

    match client.assign_substitute(&assign_request("V")).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status.as_u16(), 409);
            assert_eq!(message, "slot taken");
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(matches!(
        client.assign_substitute(&assign_request("busy")).await,
        Err(ApiError::RateLimited)
    ));

    client
        .remove_substitute(&RemoveSubstituteRequest::from(&record))
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_reports_server_errors() {
    let (client, _dir) = client(StubState::default()).await;
    client.delete_timetable("tt-5a").await.unwrap();
    let err = client.delete_timetable("tt-6b").await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, ApiError::Status { ref message, .. } if message == "database offline"));
}

#[tokio::test]
async fn reference_data_is_served_from_cache() {
    let state = StubState::default();
    let hits = state.teacher_list_hits.clone();
    let (client, _dir) = client(state).await;

    let first = client.fetch_teachers().await.unwrap();
    let second = client.fetch_teachers().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert_eq!(client.clear_cache(Some("teachers")).unwrap(), 1);
    client.fetch_teachers().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_token_is_rejected_by_service() {
    let base_url = spawn_stub(StubState::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = ClientConfig::new(base_url);
    config.cache_dir = dir.path().to_path_buf();
    let client = SchoolApiClient::new(config).unwrap();
    match client.fetch_teachers().await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(message, "no token");
        }
        other => panic!("expected 401, got {:?}", other),
    }
}
