// src/client.rs

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::ResponseCache;
use crate::error::ApiError;
use crate::models::{
    AcademicYear, AssignSubstituteRequest, ClassInfo, FlatScheduleEntry, FreeTeacherQuery,
    RemoveSubstituteRequest, Room, SubstitutionRecord, Teacher, Timetable, TimetableFilter,
};
use crate::periods::format_time;
use crate::service::SchoolService;

pub const DEFAULT_CACHE_DIR: &str = "./timetable_cache";
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 24 * 60 * 60; // 24 hours

// --- Configuration ---

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub cache_dir: PathBuf,
    pub cache_duration_secs: u64,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            timeout: Duration::from_secs(30),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_duration_secs: DEFAULT_CACHE_DURATION_SECS,
        }
    }
}

// --- Response Shapes ---

/// The service answers either with the bare payload or wrapped as `{ "data": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(data) => data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    error: Option<String>,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(ErrorPayload {
            message: Some(m), ..
        }) => m,
        Ok(ErrorPayload { error: Some(e), .. }) => e,
        _ => body.to_string(),
    }
}

// --- Client ---

/// REST implementation of [`SchoolService`].
#[derive(Clone)]
pub struct SchoolApiClient {
    config: Arc<ClientConfig>,
    http_client: Client,
    cache: ResponseCache,
}

impl SchoolApiClient {
    pub fn new(mut config: ClientConfig) -> Result<Self, ApiError> {
        let http_client = Client::builder().timeout(config.timeout).build()?;
        let cache = ResponseCache::new(&config.cache_dir, config.cache_duration_secs)?;

        // Relative joins drop the last path segment unless the base ends in '/'
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }

        Ok(Self {
            config: Arc::new(config),
            http_client,
            cache,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Base URL extended with percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::UrlParse(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn build_request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        match &self.config.api_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Sends the request and returns the raw body of a 2xx response.
    async fn send(&self, request_builder: RequestBuilder, context_msg: &str) -> Result<Vec<u8>, ApiError> {
        let request = request_builder.build().map_err(|e| {
            error!("Request build failed for '{}': {}", context_msg, e);
            ApiError::Request(e)
        })?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let resp = self.http_client.execute(request).await.map_err(|e| {
            error!(
                "HTTP execution failed before receiving response for '{}' (URL: {}): {}",
                context_msg, request_url, e
            );
            ApiError::Request(e)
        })?;

        let status = resp.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = resp.bytes().await?;
            return Ok(bytes.to_vec());
        }

        let error_body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
        error!(
            "API Error Response: Status={}, Body='{}' for URL: {}",
            status, error_body, request_url
        );

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limit exceeded for '{}' (URL: {})", context_msg, request_url);
                Err(ApiError::RateLimited)
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(error_message(&error_body))),
            _ => Err(ApiError::Status {
                status,
                message: error_message(&error_body),
            }),
        }
    }

    pub async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, ApiError> {
        let bytes = self.send(request_builder, context_msg).await?;
        match std::str::from_utf8(&bytes) {
            Ok(text) => debug!("Raw Success Response Body for '{}': {}", context_msg, text),
            Err(_) => debug!(
                "Raw Success Response Body (Hex) for '{}': {}",
                context_msg,
                hex::encode(&bytes)
            ),
        }
        let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|e| {
            error!("JSON deserialization failed for '{}': {}", context_msg, e);
            ApiError::Json(e)
        })?;
        Ok(envelope.into_inner())
    }

    /// For endpoints whose success body carries nothing we need.
    async fn send_expecting_success(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<(), ApiError> {
        self.send(request_builder, context_msg).await.map(|_| ())
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(String, String)],
        context_msg: &str,
    ) -> Result<T, ApiError> {
        let request = self.build_request(Method::GET, self.endpoint(segments)?).query(query);
        self.send_and_deserialize(request, context_msg).await
    }

    pub async fn get_with_cache<T: DeserializeOwned + Serialize>(
        &self,
        segments: &[&str],
        resource_type: &str,
        query_params: &BTreeMap<String, String>,
        context_msg: &str,
    ) -> Result<T, ApiError> {
        match self.cache.load(resource_type, query_params) {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!(
                "Failed to load from cache for {} ({}): {}. Attempting API fetch.",
                resource_type, context_msg, e
            ),
        }

        let request = self
            .build_request(Method::GET, self.endpoint(segments)?)
            .query(query_params);
        let data: T = self.send_and_deserialize(request, context_msg).await?;

        // A failed cache write is not worth failing the fetch for
        if let Err(e) = self.cache.save(resource_type, query_params, &data) {
            error!("Failed to save to cache for {} ({}): {}", resource_type, context_msg, e);
        }
        Ok(data)
    }

    pub fn clear_cache(&self, resource_type: Option<&str>) -> Result<usize, ApiError> {
        self.cache.clear(resource_type)
    }
}

fn year_query(academic_year: Option<&str>) -> Vec<(String, String)> {
    academic_year
        .map(|y| vec![("academicYear".to_string(), y.to_string())])
        .unwrap_or_default()
}

#[async_trait]
impl SchoolService for SchoolApiClient {
    async fn fetch_timetables(&self, filter: &TimetableFilter) -> Result<Vec<Timetable>, ApiError> {
        self.get(&["timetables"], &filter.query_pairs(), "fetch timetables")
            .await
    }

    async fn fetch_teacher_schedule(
        &self,
        teacher_id: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError> {
        let context = format!("fetch schedule for teacher {}", teacher_id);
        self.get(
            &["timetables", "teacher", teacher_id],
            &year_query(academic_year),
            &context,
        )
        .await
    }

    async fn fetch_room_schedule(
        &self,
        room_id: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError> {
        let context = format!("fetch schedule for room {}", room_id);
        self.get(&["timetables", "room", room_id], &year_query(academic_year), &context)
            .await
    }

    async fn fetch_active_substitutions(&self) -> Result<Vec<SubstitutionRecord>, ApiError> {
        self.get(&["substitutions", "active"], &[], "fetch active substitutions")
            .await
    }

    async fn fetch_free_teachers(&self, query: &FreeTeacherQuery) -> Result<Vec<Teacher>, ApiError> {
        let mut pairs = vec![
            ("weekday".to_string(), query.weekday.name().to_string()),
            ("startTime".to_string(), format_time(query.start_time)),
            ("endTime".to_string(), format_time(query.end_time)),
        ];
        if let Some(scope) = &query.scope {
            pairs.push(("scope".to_string(), scope.clone()));
        }
        self.get(&["substitutions", "free-teachers"], &pairs, "fetch free teachers")
            .await
    }

    async fn assign_substitute(
        &self,
        request: &AssignSubstituteRequest,
    ) -> Result<SubstitutionRecord, ApiError> {
        let builder = self
            .build_request(Method::POST, self.endpoint(&["substitutions"])?)
            .json(request);
        self.send_and_deserialize(builder, "assign substitute").await
    }

    async fn remove_substitute(&self, request: &RemoveSubstituteRequest) -> Result<(), ApiError> {
        let builder = self
            .build_request(Method::POST, self.endpoint(&["substitutions", "remove"])?)
            .json(request);
        self.send_expecting_success(builder, "remove substitute").await
    }

    async fn delete_timetable(&self, timetable_id: &str) -> Result<(), ApiError> {
        let builder = self.build_request(
            Method::DELETE,
            self.endpoint(&["timetables", timetable_id])?,
        );
        let context = format!("delete timetable {}", timetable_id);
        self.send_expecting_success(builder, &context).await
    }

    async fn fetch_classes(&self) -> Result<Vec<ClassInfo>, ApiError> {
        self.get_with_cache(&["classes"], "classes", &BTreeMap::new(), "fetch classes")
            .await
    }

    async fn fetch_teachers(&self) -> Result<Vec<Teacher>, ApiError> {
        self.get_with_cache(&["teachers"], "teachers", &BTreeMap::new(), "fetch teachers")
            .await
    }

    async fn fetch_rooms(&self) -> Result<Vec<Room>, ApiError> {
        self.get_with_cache(&["rooms"], "rooms", &BTreeMap::new(), "fetch rooms")
            .await
    }

    async fn fetch_academic_years(&self) -> Result<Vec<AcademicYear>, ApiError> {
        self.get_with_cache(
            &["academic-years"],
            "academic_years",
            &BTreeMap::new(),
            "fetch academic years",
        )
        .await
    }
}
