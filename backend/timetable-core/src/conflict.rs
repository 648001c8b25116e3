// src/conflict.rs
//
// Local evaluation of the conflict resolution query: a teacher is free for a
// window when nothing they teach or cover on that weekday overlaps it.

use chrono::NaiveTime;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{FlatScheduleEntry, FreeTeacherQuery, SubstitutionRecord, Teacher};
use crate::periods::{parse_time, PeriodGrid, SchoolDay};

/// Half-open `[start, end)` window on one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub day: SchoolDay,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }
}

impl From<&FreeTeacherQuery> for TimeWindow {
    fn from(query: &FreeTeacherQuery) -> Self {
        Self {
            day: query.weekday,
            start: query.start_time,
            end: query.end_time,
        }
    }
}

/// Window of a regular lesson, or `None` when its day or times cannot be read.
pub fn lesson_window(entry: &FlatScheduleEntry) -> Option<TimeWindow> {
    Some(TimeWindow {
        day: entry.school_day()?,
        start: parse_time(&entry.start_time)?,
        end: parse_time(&entry.end_time)?,
    })
}

/// Window of a substitution; falls back to the period grid when the record
/// carries no readable times.
pub fn substitution_window(record: &SubstitutionRecord, grid: &PeriodGrid) -> Option<TimeWindow> {
    let times = parse_time(&record.start_time).zip(parse_time(&record.end_time));
    let (start, end) = match times {
        Some(pair) => pair,
        None => {
            let period = grid.by_ordinal(record.period_index as usize)?;
            (period.start, period.end)
        }
    };
    Some(TimeWindow {
        day: record.weekday,
        start,
        end,
    })
}

/// A teacher's regular lessons, keyed by teacher id.
pub struct TeacherLessons<'a> {
    pub teacher_id: &'a str,
    pub lessons: &'a [FlatScheduleEntry],
}

/// Teachers in scope with no regular lesson and no active substitution
/// overlapping the queried window. Lessons whose window cannot be read are
/// treated as occupying the teacher.
pub fn free_teachers(
    roster: &[Teacher],
    timetables: &[TeacherLessons<'_>],
    substitutions: &[SubstitutionRecord],
    query: &FreeTeacherQuery,
    grid: &PeriodGrid,
) -> Vec<Teacher> {
    let window = TimeWindow::from(query);
    let mut busy: HashSet<&str> = HashSet::new();

    for tt in timetables {
        let clashes = tt.lessons.iter().any(|lesson| match lesson_window(lesson) {
            Some(w) => w.overlaps(&window),
            None => lesson.school_day() == Some(window.day),
        });
        if clashes {
            busy.insert(tt.teacher_id);
        }
    }

    for record in substitutions.iter().filter(|r| r.is_active()) {
        let clashes = match substitution_window(record, grid) {
            Some(w) => w.overlaps(&window),
            None => record.weekday == window.day,
        };
        if clashes {
            busy.insert(record.substitute_teacher_id.as_str());
        }
    }

    let mut free: Vec<Teacher> = roster
        .iter()
        .filter(|t| match (&query.scope, &t.scope) {
            (Some(wanted), Some(theirs)) => wanted == theirs,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .filter(|t| !busy.contains(t.id.as_str()))
        .cloned()
        .collect();
    free.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    debug!(
        "Free-teacher query {} {}-{}: {} busy, {} free",
        query.weekday,
        query.start_time,
        query.end_time,
        busy.len(),
        free.len()
    );
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubstitutionStatus;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn lesson(day: &str, start: &str, end: &str) -> FlatScheduleEntry {
        FlatScheduleEntry {
            day: day.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            subject: "Any".to_string(),
            class_name: "6".to_string(),
            section: "B".to_string(),
            room: String::new(),
            teacher: None,
            teacher_id: None,
            period_index: None,
            timetable_id: None,
        }
    }

    fn teacher(id: &str, scope: Option<&str>) -> Teacher {
        Teacher {
            id: id.to_string(),
            name: format!("Teacher {}", id),
            scope: scope.map(String::from),
        }
    }

    fn query(scope: Option<&str>) -> FreeTeacherQuery {
        FreeTeacherQuery {
            weekday: SchoolDay::Tuesday,
            start_time: t(9, 30),
            end_time: t(10, 10),
            scope: scope.map(String::from),
        }
    }

    #[test]
    fn adjacent_windows_do_not_overlap() {
        let a = TimeWindow { day: SchoolDay::Tuesday, start: t(8, 40), end: t(9, 30) };
        let b = TimeWindow { day: SchoolDay::Tuesday, start: t(9, 30), end: t(10, 10) };
        assert!(!a.overlaps(&b));
        let c = TimeWindow { day: SchoolDay::Tuesday, start: t(9, 50), end: t(10, 30) };
        assert!(b.overlaps(&c));
        let d = TimeWindow { day: SchoolDay::Monday, ..c };
        assert!(!b.overlaps(&d));
    }

    #[test]
    fn teacher_with_overlapping_lesson_is_excluded() {
        let roster = vec![teacher("U", None), teacher("V", None)];
        let v_lessons = vec![lesson("Tuesday", "09:30", "10:10")];
        let u_lessons = vec![lesson("Tuesday", "10:10", "10:50"), lesson("Monday", "09:30", "10:10")];
        let timetables = vec![
            TeacherLessons { teacher_id: "U", lessons: &u_lessons },
            TeacherLessons { teacher_id: "V", lessons: &v_lessons },
        ];
        let free = free_teachers(&roster, &timetables, &[], &query(None), PeriodGrid::standard());
        let ids: Vec<_> = free.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["U"]);
    }

    #[test]
    fn active_substitution_occupies_substitute() {
        let roster = vec![teacher("U", None), teacher("W", None)];
        let record = SubstitutionRecord {
            id: None,
            timetable_id: "tt".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
            weekday: SchoolDay::Tuesday,
            period_index: 2,
            subject: "Mathematics".to_string(),
            class_name: "5".to_string(),
            section: "A".to_string(),
            // no times: window comes from the grid's third teaching period
            start_time: String::new(),
            end_time: String::new(),
            original_teacher_id: "T".to_string(),
            original_teacher: "T".to_string(),
            substitute_teacher_id: "W".to_string(),
            substitute_teacher: "W".to_string(),
            reason: None,
            status: SubstitutionStatus::Active,
        };
        let mut reverted = record.clone();
        reverted.substitute_teacher_id = "U".to_string();
        reverted.status = SubstitutionStatus::Reverted;

        let free = free_teachers(
            &roster,
            &[],
            &[record, reverted],
            &query(None),
            PeriodGrid::standard(),
        );
        let ids: Vec<_> = free.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["U"]);
    }

    #[test]
    fn scope_limits_candidates() {
        let roster = vec![teacher("U", Some("north")), teacher("X", Some("south")), teacher("Y", None)];
        let free = free_teachers(&roster, &[], &[], &query(Some("north")), PeriodGrid::standard());
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].id, "U");
        let unscoped = free_teachers(&roster, &[], &[], &query(None), PeriodGrid::standard());
        assert_eq!(unscoped.len(), 3);
    }

    #[test]
    fn unreadable_lesson_times_count_as_busy_that_day() {
        let roster = vec![teacher("U", None)];
        let lessons = vec![lesson("Tuesday", "whenever", "later")];
        let timetables = vec![TeacherLessons { teacher_id: "U", lessons: &lessons }];
        let free = free_teachers(&roster, &timetables, &[], &query(None), PeriodGrid::standard());
        assert!(free.is_empty());
    }
}
