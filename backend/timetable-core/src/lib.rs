// src/lib.rs
//
// Timetable core: period grid, schedule normalization, grid rendering and the
// substitute-teacher workflow, over a REST or offline school service.

pub mod cache;
pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod export;
pub mod grid;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod normalizer;
pub mod periods;
pub mod service;
pub mod timetables;
pub mod workflow;

pub use client::{ClientConfig, SchoolApiClient};
pub use config::AppConfig;
pub use error::{ApiError, ConfigError, ExportError, WorkflowError};
pub use ledger::{Ledger, Reversal};
pub use memory::{MemorySchoolService, Snapshot};
pub use periods::{PeriodGrid, SchoolDay};
pub use service::SchoolService;
pub use workflow::SubstituteWorkflow;
