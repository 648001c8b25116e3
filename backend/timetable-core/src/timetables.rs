// src/timetables.rs
//
// Timetable management and loading of one view's raw schedule.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::grid::{render_with_cover, RenderedGrid};
use crate::models::{Timetable, TimetableFilter, TimetableStatus};
use crate::normalizer::{normalize, NormalizedSchedule, RawSchedule};
use crate::periods::PeriodGrid;
use crate::service::SchoolService;

/// Which schedule to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewTarget {
    Class {
        class_name: String,
        section: String,
    },
    Teacher {
        teacher_id: String,
    },
    Room {
        room_id: String,
    },
}

pub async fn list_timetables<S: SchoolService + ?Sized>(
    service: &S,
    filter: &TimetableFilter,
) -> Result<Vec<Timetable>, ApiError> {
    let mut timetables = service.fetch_timetables(filter).await?;
    timetables.sort_by(|a, b| {
        a.academic_year
            .cmp(&b.academic_year)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(timetables)
}

pub async fn delete_timetable<S: SchoolService + ?Sized>(
    service: &S,
    timetable_id: &str,
) -> Result<(), ApiError> {
    service.delete_timetable(timetable_id).await?;
    info!("Timetable {} deleted", timetable_id);
    Ok(())
}

/// Picks the timetable a class view shows: the active one if any, else the
/// first draft.
pub fn pick_class_timetable(timetables: &[Timetable]) -> Option<&Timetable> {
    timetables
        .iter()
        .find(|t| t.status == TimetableStatus::Active)
        .or_else(|| timetables.first())
}

pub async fn load_raw_schedule<S: SchoolService + ?Sized>(
    service: &S,
    target: &ViewTarget,
    academic_year: Option<&str>,
) -> Result<RawSchedule, ApiError> {
    match target {
        ViewTarget::Class {
            class_name,
            section,
        } => {
            let filter = TimetableFilter {
                class_name: Some(class_name.clone()),
                section: Some(section.clone()),
                academic_year: academic_year.map(String::from),
                status: None,
            };
            let timetables = service.fetch_timetables(&filter).await?;
            if timetables.len() > 1 {
                warn!(
                    "{} timetables match {}-{}; showing the active one",
                    timetables.len(),
                    class_name,
                    section
                );
            }
            let timetable = pick_class_timetable(&timetables).ok_or_else(|| {
                ApiError::NotFound(format!("timetable for class {}-{}", class_name, section))
            })?;
            Ok(RawSchedule::Class {
                timetable_id: Some(timetable.id.clone()),
                days: timetable.entries.clone(),
            })
        }
        ViewTarget::Teacher { teacher_id } => Ok(RawSchedule::Teacher(
            service
                .fetch_teacher_schedule(teacher_id, academic_year)
                .await?,
        )),
        ViewTarget::Room { room_id } => Ok(RawSchedule::Room(
            service.fetch_room_schedule(room_id, academic_year).await?,
        )),
    }
}

/// Normalized schedule plus its rendered grid with current covers.
pub struct LoadedView {
    pub schedule: NormalizedSchedule,
    pub grid: RenderedGrid,
}

pub async fn load_view<S: SchoolService + ?Sized>(
    service: &S,
    grid: &PeriodGrid,
    target: &ViewTarget,
    academic_year: Option<&str>,
    week_of: Option<NaiveDate>,
) -> Result<LoadedView, ApiError> {
    let raw = load_raw_schedule(service, target, academic_year).await?;
    let schedule = normalize(&raw, grid);
    let substitutions = service.fetch_active_substitutions().await?;
    let rendered = render_with_cover(grid, &schedule, &substitutions, week_of);
    Ok(LoadedView {
        schedule,
        grid: rendered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassDaySchedule, ClassPeriodEntry, TimetableScope};

    fn timetable(id: &str, status: TimetableStatus) -> Timetable {
        Timetable {
            id: id.to_string(),
            scope: TimetableScope::ClassSection {
                class_name: "5".to_string(),
                section: "A".to_string(),
            },
            academic_year: "2024-25".to_string(),
            status,
            entries: vec![ClassDaySchedule {
                day: "Monday".to_string(),
                periods: vec![ClassPeriodEntry {
                    period_number: Some(1),
                    subject_name: "English".to_string(),
                    teacher: "Ms. Teal".to_string(),
                    teacher_id: Some("T".to_string()),
                    room_name: "R12".to_string(),
                    start_time: "08:00".to_string(),
                    end_time: "08:40".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn active_timetable_wins_over_draft() {
        let list = vec![
            timetable("draft", TimetableStatus::Draft),
            timetable("live", TimetableStatus::Active),
        ];
        assert_eq!(pick_class_timetable(&list).unwrap().id, "live");
        assert_eq!(pick_class_timetable(&list[..1]).unwrap().id, "draft");
        assert!(pick_class_timetable(&[]).is_none());
    }

    #[tokio::test]
    async fn class_view_loads_and_renders() {
        use crate::memory::{MemorySchoolService, Snapshot};
        use crate::periods::SchoolDay;

        let snapshot = Snapshot {
            timetables: vec![timetable("tt-5a", TimetableStatus::Active)],
            ..Default::default()
        };
        let svc = MemorySchoolService::new(snapshot, PeriodGrid::standard().clone());
        let target = ViewTarget::Class {
            class_name: "5".to_string(),
            section: "A".to_string(),
        };
        let view = load_view(&svc, PeriodGrid::standard(), &target, None, None)
            .await
            .unwrap();
        let cell = view.grid.cell(SchoolDay::Monday, "Period 1").unwrap();
        assert_eq!(cell.as_filled().unwrap().display_counterpart(), "Ms. Teal");

        delete_timetable(&svc, "tt-5a").await.unwrap();
        assert!(matches!(
            load_raw_schedule(&svc, &target, None).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
