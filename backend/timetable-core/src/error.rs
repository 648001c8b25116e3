// src/error.rs

use reqwest::StatusCode;
use thiserror::Error;

// --- Collaborator Errors ---

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Rate limit exceeded (Status 429)")]
    RateLimited,

    // Non-429 error statuses from the school service
    #[error("School service error: Status={status}, Message='{message}'")]
    Status { status: StatusCode, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl ApiError {
    /// Statuses a user can sensibly retry by re-submitting the same step.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(_) | ApiError::RateLimited => true,
            ApiError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

pub(crate) fn io_context<E: Into<std::io::Error>, S: Into<String>>(
    source: E,
    context: S,
) -> ApiError {
    ApiError::Io {
        source: source.into(),
        context: context.into(),
    }
}

// --- Workflow Errors ---

/// Local validation failures block an action before any request is sent.
/// `Collaborator` wraps a failed request; the workflow state is left as it was.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Cannot {action} while the workflow is {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("Slot {index} is not one of the {available} candidate slots")]
    SlotIndexOutOfRange { index: usize, available: usize },

    #[error("Teacher {teacher_id} is not free for the chosen slot")]
    SubstituteNotAvailable { teacher_id: String },

    #[error("The chosen slot has no timetable identifier; it cannot be assigned")]
    MissingTimetableId,

    #[error("The chosen slot has no resolvable period index")]
    MissingPeriodIndex,

    #[error("A substitute assignment is still waiting on the school service")]
    CommitInFlight,

    #[error("Results for this step are still loading")]
    NotReady,

    #[error("School service request failed: {0}")]
    Collaborator(#[from] ApiError),
}

// --- Configuration Errors ---

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment configuration error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse period grid: {0}")]
    Json(#[from] serde_json::Error),
}

// --- Export Errors ---

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
