// src/service.rs

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    AcademicYear, AssignSubstituteRequest, ClassInfo, FlatScheduleEntry, FreeTeacherQuery,
    RemoveSubstituteRequest, Room, SubstitutionRecord, Teacher, Timetable, TimetableFilter,
};

/// Operations the timetable core consumes from the school service.
/// Implemented over REST by `SchoolApiClient` and in memory by `MemorySchoolService`.
#[async_trait]
pub trait SchoolService: Send + Sync {
    async fn fetch_timetables(&self, filter: &TimetableFilter) -> Result<Vec<Timetable>, ApiError>;

    async fn fetch_teacher_schedule(
        &self,
        teacher_id: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError>;

    async fn fetch_room_schedule(
        &self,
        room_id: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError>;

    async fn fetch_active_substitutions(&self) -> Result<Vec<SubstitutionRecord>, ApiError>;

    async fn fetch_free_teachers(&self, query: &FreeTeacherQuery) -> Result<Vec<Teacher>, ApiError>;

    async fn assign_substitute(
        &self,
        request: &AssignSubstituteRequest,
    ) -> Result<SubstitutionRecord, ApiError>;

    async fn remove_substitute(&self, request: &RemoveSubstituteRequest) -> Result<(), ApiError>;

    async fn delete_timetable(&self, timetable_id: &str) -> Result<(), ApiError>;

    // --- Reference data for selection controls ---

    async fn fetch_classes(&self) -> Result<Vec<ClassInfo>, ApiError>;

    async fn fetch_teachers(&self) -> Result<Vec<Teacher>, ApiError>;

    async fn fetch_rooms(&self) -> Result<Vec<Room>, ApiError>;

    async fn fetch_academic_years(&self) -> Result<Vec<AcademicYear>, ApiError>;
}
