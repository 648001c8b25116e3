// src/models.rs
//
// Wire types exchanged with the school service. Field names follow the
// service's camelCase JSON.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::periods::{hhmm, SchoolDay};

// --- Raw Schedule Shapes ---

/// One lesson inside a class-view day. `period_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPeriodEntry {
    #[serde(default)]
    pub period_number: Option<u32>,
    pub subject_name: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub room_name: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDaySchedule {
    pub day: String,
    #[serde(default)]
    pub periods: Vec<ClassPeriodEntry>,
}

/// Teacher-view and room-view entry. `period_index` is 0-based over teaching periods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatScheduleEntry {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub section: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub teacher: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub period_index: Option<u32>,
    #[serde(default)]
    pub timetable_id: Option<String>,
}

impl FlatScheduleEntry {
    pub fn class_section(&self) -> String {
        format!("{}-{}", self.class_name, self.section)
    }

    pub fn school_day(&self) -> Option<SchoolDay> {
        SchoolDay::parse(&self.day)
    }
}

// --- Timetables ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimetableScope {
    #[serde(rename_all = "camelCase")]
    ClassSection { class_name: String, section: String },
    #[serde(rename_all = "camelCase")]
    Teacher { teacher_id: String },
    #[serde(rename_all = "camelCase")]
    Room { room_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimetableStatus {
    Draft,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
    pub id: String,
    pub scope: TimetableScope,
    pub academic_year: String,
    pub status: TimetableStatus,
    #[serde(default, alias = "schedule")]
    pub entries: Vec<ClassDaySchedule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableFilter {
    #[serde(rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TimetableStatus>,
}

impl TimetableFilter {
    pub fn matches(&self, timetable: &Timetable) -> bool {
        if let Some(year) = &self.academic_year {
            if &timetable.academic_year != year {
                return false;
            }
        }
        if let Some(status) = self.status {
            if timetable.status != status {
                return false;
            }
        }
        match &timetable.scope {
            TimetableScope::ClassSection {
                class_name,
                section,
            } => {
                self.class_name.as_ref().map_or(true, |c| c == class_name)
                    && self.section.as_ref().map_or(true, |s| s == section)
            }
            _ => self.class_name.is_none() && self.section.is_none(),
        }
    }

    /// Query pairs for the timetable list endpoint.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(c) = &self.class_name {
            pairs.push(("class".to_string(), c.clone()));
        }
        if let Some(s) = &self.section {
            pairs.push(("section".to_string(), s.clone()));
        }
        if let Some(y) = &self.academic_year {
            pairs.push(("academicYear".to_string(), y.clone()));
        }
        if let Some(status) = self.status {
            let status = match status {
                TimetableStatus::Draft => "draft",
                TimetableStatus::Active => "active",
            };
            pairs.push(("status".to_string(), status.to_string()));
        }
        pairs
    }
}

// --- Teachers & Reference Data ---

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub name: String,
    #[serde(default)]
    pub current: bool,
}

// --- Substitutions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionStatus {
    Active,
    Reverted,
}

/// A one-date override of the teacher holding a lesson slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timetable_id: String,
    pub date: NaiveDate,
    pub weekday: SchoolDay,
    pub period_index: u32,
    pub subject: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub section: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub original_teacher_id: String,
    pub original_teacher: String,
    pub substitute_teacher_id: String,
    pub substitute_teacher: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: SubstitutionStatus,
}

impl SubstitutionRecord {
    pub fn day_index(&self) -> u8 {
        self.weekday.index()
    }

    pub fn class_section(&self) -> String {
        format!("{}-{}", self.class_name, self.section)
    }

    pub fn is_active(&self) -> bool {
        self.status == SubstitutionStatus::Active
    }

    /// True when this record covers the given lesson on the given date.
    pub fn covers(&self, timetable_id: &str, period_index: u32, date: NaiveDate) -> bool {
        self.is_active()
            && self.timetable_id == timetable_id
            && self.period_index == period_index
            && self.date == date
    }
}

// --- Requests ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignSubstituteRequest {
    pub timetable_id: String,
    pub day_index: u8,
    pub period_index: u32,
    pub substitute_teacher_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveSubstituteRequest {
    pub timetable_id: String,
    pub day_index: u8,
    pub period_index: u32,
}

impl From<&SubstitutionRecord> for RemoveSubstituteRequest {
    fn from(record: &SubstitutionRecord) -> Self {
        Self {
            timetable_id: record.timetable_id.clone(),
            day_index: record.day_index(),
            period_index: record.period_index,
        }
    }
}

/// Conflict resolution query: who is free on `weekday` during `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeTeacherQuery {
    pub weekday: SchoolDay,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_entry_reads_service_json() {
        let entry: FlatScheduleEntry = serde_json::from_value(json!({
            "day": "Tuesday",
            "startTime": "09:30",
            "endTime": "10:10",
            "subject": "Mathematics",
            "class": "5",
            "section": "A",
            "room": "R12",
            "periodIndex": 2,
            "timetableId": "tt-5a"
        }))
        .unwrap();
        assert_eq!(entry.class_section(), "5-A");
        assert_eq!(entry.school_day(), Some(SchoolDay::Tuesday));
        assert_eq!(entry.period_index, Some(2));
        assert!(entry.teacher.is_none());
    }

    #[test]
    fn timetable_accepts_schedule_alias() {
        let tt: Timetable = serde_json::from_value(json!({
            "id": "tt-5a",
            "scope": { "kind": "classSection", "className": "5", "section": "A" },
            "academicYear": "2024-25",
            "status": "active",
            "schedule": [{ "day": "Monday", "periods": [] }]
        }))
        .unwrap();
        assert_eq!(tt.entries.len(), 1);
        assert_eq!(tt.status, TimetableStatus::Active);
    }

    #[test]
    fn filter_matches_class_scope_only() {
        let tt = Timetable {
            id: "tt".into(),
            scope: TimetableScope::ClassSection {
                class_name: "5".into(),
                section: "A".into(),
            },
            academic_year: "2024-25".into(),
            status: TimetableStatus::Draft,
            entries: vec![],
        };
        let mut filter = TimetableFilter {
            class_name: Some("5".into()),
            ..Default::default()
        };
        assert!(filter.matches(&tt));
        filter.status = Some(TimetableStatus::Active);
        assert!(!filter.matches(&tt));
        assert_eq!(filter.query_pairs().len(), 2);
    }

    #[test]
    fn assign_request_serializes_camel_case() {
        let req = AssignSubstituteRequest {
            timetable_id: "tt".into(),
            day_index: 1,
            period_index: 2,
            substitute_teacher_id: "U".into(),
            reason: None,
            date: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
            scope: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["dayIndex"], 1);
        assert_eq!(value["substituteTeacherId"], "U");
        assert_eq!(value["date"], "2024-09-03");
        assert!(value.get("reason").is_none());
    }
}
