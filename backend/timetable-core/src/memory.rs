// src/memory.rs
//
// Offline school service backed by a JSON snapshot. Answers every collaborator
// operation locally, including the free-teacher query.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::conflict::{self, TeacherLessons};
use crate::error::{io_context, ApiError};
use crate::models::{
    AcademicYear, AssignSubstituteRequest, ClassInfo, FlatScheduleEntry, FreeTeacherQuery,
    RemoveSubstituteRequest, Room, SubstitutionRecord, SubstitutionStatus, Teacher, Timetable,
    TimetableFilter, TimetableScope,
};
use crate::normalizer::resolve_period;
use crate::periods::{format_time, parse_time, PeriodGrid, SchoolDay};
use crate::service::SchoolService;

/// Everything the offline service knows. Teacher and room schedules are keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub timetables: Vec<Timetable>,
    #[serde(default)]
    pub teacher_schedules: BTreeMap<String, Vec<FlatScheduleEntry>>,
    #[serde(default)]
    pub room_schedules: BTreeMap<String, Vec<FlatScheduleEntry>>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub academic_years: Vec<AcademicYear>,
    #[serde(default)]
    pub substitutions: Vec<SubstitutionRecord>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let json = fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read snapshot: {:?}", path)))?;
        serde_json::from_str(&json)
            .map_err(|e| ApiError::Snapshot(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| io_context(e, format!("Failed to write snapshot: {:?}", path)))
    }

    fn teacher_name(&self, teacher_id: &str) -> Option<&str> {
        self.teachers
            .iter()
            .find(|t| t.id == teacher_id)
            .map(|t| t.name.as_str())
    }
}

// The lesson an assignment targets, found in either schedule shape.
struct LessonRef {
    teacher_id: String,
    subject: String,
    class_name: String,
    section: String,
    start_time: String,
    end_time: String,
}

fn flat_period_index(entry: &FlatScheduleEntry, grid: &PeriodGrid) -> Option<u32> {
    entry
        .period_index
        .or_else(|| resolve_period(grid, &entry.start_time, None).1.map(|n| n as u32))
}

fn find_lesson(
    snapshot: &Snapshot,
    grid: &PeriodGrid,
    timetable_id: &str,
    day: SchoolDay,
    period_index: u32,
) -> Option<LessonRef> {
    for (teacher_id, entries) in &snapshot.teacher_schedules {
        let hit = entries.iter().find(|e| {
            e.timetable_id.as_deref() == Some(timetable_id)
                && e.school_day() == Some(day)
                && flat_period_index(e, grid) == Some(period_index)
        });
        if let Some(e) = hit {
            return Some(LessonRef {
                teacher_id: teacher_id.clone(),
                subject: e.subject.clone(),
                class_name: e.class_name.clone(),
                section: e.section.clone(),
                start_time: e.start_time.clone(),
                end_time: e.end_time.clone(),
            });
        }
    }

    let timetable = snapshot.timetables.iter().find(|t| t.id == timetable_id)?;
    let TimetableScope::ClassSection {
        class_name,
        section,
    } = &timetable.scope
    else {
        return None;
    };
    timetable
        .entries
        .iter()
        .filter(|d| SchoolDay::parse(&d.day) == Some(day))
        .flat_map(|d| d.periods.iter())
        .find(|p| {
            let ordinal = p.period_number.and_then(|n| n.checked_sub(1));
            let index = ordinal.or_else(|| resolve_period(grid, &p.start_time, None).1.map(|n| n as u32));
            index == Some(period_index)
        })
        .and_then(|p| {
            Some(LessonRef {
                teacher_id: p.teacher_id.clone()?,
                subject: p.subject_name.clone(),
                class_name: class_name.clone(),
                section: section.clone(),
                start_time: p.start_time.clone(),
                end_time: p.end_time.clone(),
            })
        })
}

fn rejected(status: StatusCode, message: impl Into<String>) -> ApiError {
    ApiError::Status {
        status,
        message: message.into(),
    }
}

/// With `on_date`, only substitutions dated that day occupy a teacher;
/// without it every active substitution on the weekday does.
fn evaluate_free_teachers(
    snapshot: &Snapshot,
    grid: &PeriodGrid,
    query: &FreeTeacherQuery,
    on_date: Option<NaiveDate>,
) -> Vec<Teacher> {
    let lessons: Vec<TeacherLessons<'_>> = snapshot
        .teacher_schedules
        .iter()
        .map(|(id, entries)| TeacherLessons {
            teacher_id: id.as_str(),
            lessons: entries.as_slice(),
        })
        .collect();
    let substitutions: Vec<SubstitutionRecord> = snapshot
        .substitutions
        .iter()
        .filter(|r| on_date.map_or(true, |date| r.date == date))
        .cloned()
        .collect();
    conflict::free_teachers(&snapshot.teachers, &lessons, &substitutions, query, grid)
}

// --- Service ---

pub struct MemorySchoolService {
    state: Mutex<Snapshot>,
    grid: PeriodGrid,
}

impl MemorySchoolService {
    pub fn new(snapshot: Snapshot, grid: PeriodGrid) -> Self {
        Self {
            state: Mutex::new(snapshot),
            grid,
        }
    }

    pub fn load(path: &Path, grid: PeriodGrid) -> Result<Self, ApiError> {
        let snapshot = Snapshot::load(path)?;
        info!(
            "Loaded snapshot {:?}: {} timetable(s), {} teacher schedule(s), {} substitution(s)",
            path,
            snapshot.timetables.len(),
            snapshot.teacher_schedules.len(),
            snapshot.substitutions.len()
        );
        Ok(Self::new(snapshot, grid))
    }

    pub async fn save(&self, path: &Path) -> Result<(), ApiError> {
        self.state.lock().await.save(path)?;
        info!("Saved snapshot to {:?}", path);
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl SchoolService for MemorySchoolService {
    async fn fetch_timetables(&self, filter: &TimetableFilter) -> Result<Vec<Timetable>, ApiError> {
        let state = self.state.lock().await;
        Ok(state
            .timetables
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    // Snapshots hold one academic year, so the year argument is not consulted.
    async fn fetch_teacher_schedule(
        &self,
        teacher_id: &str,
        _academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError> {
        let state = self.state.lock().await;
        match state.teacher_schedules.get(teacher_id) {
            Some(entries) => Ok(entries.clone()),
            None if state.teacher_name(teacher_id).is_some() => Ok(Vec::new()),
            None => Err(ApiError::NotFound(format!("teacher {}", teacher_id))),
        }
    }

    async fn fetch_room_schedule(
        &self,
        room_id: &str,
        _academic_year: Option<&str>,
    ) -> Result<Vec<FlatScheduleEntry>, ApiError> {
        let state = self.state.lock().await;
        match state.room_schedules.get(room_id) {
            Some(entries) => Ok(entries.clone()),
            None if state.rooms.iter().any(|r| r.id == room_id) => Ok(Vec::new()),
            None => Err(ApiError::NotFound(format!("room {}", room_id))),
        }
    }

    async fn fetch_active_substitutions(&self) -> Result<Vec<SubstitutionRecord>, ApiError> {
        let state = self.state.lock().await;
        Ok(state
            .substitutions
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn fetch_free_teachers(&self, query: &FreeTeacherQuery) -> Result<Vec<Teacher>, ApiError> {
        let state = self.state.lock().await;
        Ok(evaluate_free_teachers(&state, &self.grid, query, None))
    }

    async fn assign_substitute(
        &self,
        request: &AssignSubstituteRequest,
    ) -> Result<SubstitutionRecord, ApiError> {
        let mut state = self.state.lock().await;

        let weekday = SchoolDay::from_index(request.day_index).ok_or_else(|| {
            rejected(
                StatusCode::BAD_REQUEST,
                format!("dayIndex {} is not a school day", request.day_index),
            )
        })?;
        if SchoolDay::from_date(request.date) != Some(weekday) {
            return Err(rejected(
                StatusCode::BAD_REQUEST,
                format!("{} does not fall on {}", request.date, weekday),
            ));
        }

        let lesson = find_lesson(
            &state,
            &self.grid,
            &request.timetable_id,
            weekday,
            request.period_index,
        )
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "lesson {} / {} / period index {}",
                request.timetable_id, weekday, request.period_index
            ))
        })?;

        let substitute_name = state
            .teacher_name(&request.substitute_teacher_id)
            .ok_or_else(|| ApiError::NotFound(format!("teacher {}", request.substitute_teacher_id)))?
            .to_string();

        let already_covered = state
            .substitutions
            .iter()
            .any(|s| s.covers(&request.timetable_id, request.period_index, request.date));
        if already_covered {
            return Err(rejected(StatusCode::CONFLICT, "slot already has an active substitute"));
        }

        let (start, end) = parse_time(&lesson.start_time)
            .zip(parse_time(&lesson.end_time))
            .or_else(|| {
                let period = self.grid.by_ordinal(request.period_index as usize)?;
                Some((period.start, period.end))
            })
            .ok_or_else(|| rejected(StatusCode::BAD_REQUEST, "lesson times cannot be read"))?;

        let query = FreeTeacherQuery {
            weekday,
            start_time: start,
            end_time: end,
            scope: request.scope.clone(),
        };
        let free = evaluate_free_teachers(&state, &self.grid, &query, Some(request.date));
        if !free.iter().any(|t| t.id == request.substitute_teacher_id) {
            warn!(
                "Rejecting assignment: {} is not free on {} {}-{}",
                request.substitute_teacher_id, weekday, start, end
            );
            return Err(rejected(
                StatusCode::CONFLICT,
                format!("teacher {} is not free in that window", request.substitute_teacher_id),
            ));
        }

        let original_teacher = state
            .teacher_name(&lesson.teacher_id)
            .unwrap_or(&lesson.teacher_id)
            .to_string();
        let record = SubstitutionRecord {
            id: Some(format!("sub-{}", state.substitutions.len() + 1)),
            timetable_id: request.timetable_id.clone(),
            date: request.date,
            weekday,
            period_index: request.period_index,
            subject: lesson.subject,
            class_name: lesson.class_name,
            section: lesson.section,
            start_time: parse_time(&lesson.start_time)
                .map(format_time)
                .unwrap_or(lesson.start_time),
            end_time: parse_time(&lesson.end_time)
                .map(format_time)
                .unwrap_or(lesson.end_time),
            original_teacher_id: lesson.teacher_id,
            original_teacher,
            substitute_teacher_id: request.substitute_teacher_id.clone(),
            substitute_teacher: substitute_name,
            reason: request.reason.clone(),
            status: SubstitutionStatus::Active,
        };
        info!(
            "Assigned {} to cover {} {} on {}",
            record.substitute_teacher,
            record.class_section(),
            record.subject,
            record.date
        );
        state.substitutions.push(record.clone());
        Ok(record)
    }

    async fn remove_substitute(&self, request: &RemoveSubstituteRequest) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for record in state.substitutions.iter_mut().filter(|s| {
            s.is_active()
                && s.timetable_id == request.timetable_id
                && s.day_index() == request.day_index
                && s.period_index == request.period_index
        }) {
            record.status = SubstitutionStatus::Reverted;
            removed += 1;
        }
        if removed == 0 {
            return Err(ApiError::NotFound(format!(
                "active substitution {} / day {} / period index {}",
                request.timetable_id, request.day_index, request.period_index
            )));
        }
        debug!("Reverted {} substitution record(s)", removed);
        Ok(())
    }

    async fn delete_timetable(&self, timetable_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let before = state.timetables.len();
        state.timetables.retain(|t| t.id != timetable_id);
        if state.timetables.len() == before {
            return Err(ApiError::NotFound(format!("timetable {}", timetable_id)));
        }
        let belongs = |e: &FlatScheduleEntry| e.timetable_id.as_deref() == Some(timetable_id);
        for entries in state.teacher_schedules.values_mut() {
            entries.retain(|e| !belongs(e));
        }
        for entries in state.room_schedules.values_mut() {
            entries.retain(|e| !belongs(e));
        }
        info!("Deleted timetable {}", timetable_id);
        Ok(())
    }

    async fn fetch_classes(&self) -> Result<Vec<ClassInfo>, ApiError> {
        Ok(self.state.lock().await.classes.clone())
    }

    async fn fetch_teachers(&self) -> Result<Vec<Teacher>, ApiError> {
        Ok(self.state.lock().await.teachers.clone())
    }

    async fn fetch_rooms(&self) -> Result<Vec<Room>, ApiError> {
        Ok(self.state.lock().await.rooms.clone())
    }

    async fn fetch_academic_years(&self) -> Result<Vec<AcademicYear>, ApiError> {
        Ok(self.state.lock().await.academic_years.clone())
    }
}
