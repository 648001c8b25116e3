// src/normalizer.rs
//
// Converts the three view-specific schedule shapes into one Day -> Period -> Slot map.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::models::{ClassDaySchedule, FlatScheduleEntry};
use crate::periods::{format_time, parse_time, PeriodGrid, SchoolDay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Class,
    Teacher,
    Room,
}

/// Raw schedule as delivered for one view.
#[derive(Debug, Clone)]
pub enum RawSchedule {
    Class {
        timetable_id: Option<String>,
        days: Vec<ClassDaySchedule>,
    },
    Teacher(Vec<FlatScheduleEntry>),
    Room(Vec<FlatScheduleEntry>),
}

impl RawSchedule {
    pub fn view(&self) -> ViewKind {
        match self {
            RawSchedule::Class { .. } => ViewKind::Class,
            RawSchedule::Teacher(_) => ViewKind::Teacher,
            RawSchedule::Room(_) => ViewKind::Room,
        }
    }
}

/// Column a slot was placed in: a defined period, or a label synthesized
/// from a start time that matched no period.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PeriodLabel {
    Defined(String),
    Synthesized(String),
}

impl PeriodLabel {
    pub fn is_synthesized(&self) -> bool {
        matches!(self, PeriodLabel::Synthesized(_))
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodLabel::Defined(name) => f.write_str(name),
            PeriodLabel::Synthesized(start) => write!(f, "{} (off-grid)", start),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterpartKind {
    Teacher,
    ClassSection,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSlot {
    pub subject: String,
    /// Teacher name for class and room views, "class-section" for the teacher view.
    pub counterpart: String,
    pub counterpart_kind: CounterpartKind,
    pub room: String,
    pub start_time: String,
    pub end_time: String,
    pub timetable_id: Option<String>,
    pub period_index: Option<u32>,
}

impl NormalizedSlot {
    pub fn time_range(&self) -> String {
        format!("{}-{}", self.start_time, self.end_time)
    }
}

pub type SlotKey = (SchoolDay, PeriodLabel);

/// A raw entry whose day could not be placed on the grid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnplacedEntry {
    pub raw_day: String,
    pub subject: String,
    pub start_time: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSchedule {
    pub view: ViewKind,
    pub slots: BTreeMap<SlotKey, NormalizedSlot>,
    pub unplaced: Vec<UnplacedEntry>,
}

impl NormalizedSchedule {
    pub fn slot(&self, day: SchoolDay, period_name: &str) -> Option<&NormalizedSlot> {
        self.slots
            .get(&(day, PeriodLabel::Defined(period_name.to_string())))
    }

    pub fn synthesized_labels(&self) -> Vec<PeriodLabel> {
        let mut labels: Vec<PeriodLabel> = self
            .slots
            .keys()
            .filter(|(_, label)| label.is_synthesized())
            .map(|(_, label)| label.clone())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}

// Intermediate row shared by all three view mappings.
struct MappedEntry {
    raw_day: String,
    ordinal: Option<usize>,
    slot: NormalizedSlot,
}

// --- Per-view Mappings ---

fn map_class_view(timetable_id: &Option<String>, days: &[ClassDaySchedule]) -> Vec<MappedEntry> {
    days.iter()
        .flat_map(|day| {
            day.periods.iter().map(move |p| MappedEntry {
                raw_day: day.day.clone(),
                // period numbers are 1-based in the class view
                ordinal: p
                    .period_number
                    .and_then(|n| n.checked_sub(1))
                    .map(|n| n as usize),
                slot: NormalizedSlot {
                    subject: p.subject_name.clone(),
                    counterpart: p.teacher.clone(),
                    counterpart_kind: CounterpartKind::Teacher,
                    room: p.room_name.clone(),
                    start_time: p.start_time.clone(),
                    end_time: p.end_time.clone(),
                    timetable_id: timetable_id.clone(),
                    period_index: p.period_number.and_then(|n| n.checked_sub(1)),
                },
            })
        })
        .collect()
}

fn map_teacher_view(entries: &[FlatScheduleEntry]) -> Vec<MappedEntry> {
    entries
        .iter()
        .map(|e| MappedEntry {
            raw_day: e.day.clone(),
            ordinal: e.period_index.map(|n| n as usize),
            slot: NormalizedSlot {
                subject: e.subject.clone(),
                counterpart: e.class_section(),
                counterpart_kind: CounterpartKind::ClassSection,
                room: e.room.clone(),
                start_time: e.start_time.clone(),
                end_time: e.end_time.clone(),
                timetable_id: e.timetable_id.clone(),
                period_index: e.period_index,
            },
        })
        .collect()
}

fn map_room_view(entries: &[FlatScheduleEntry]) -> Vec<MappedEntry> {
    entries
        .iter()
        .map(|e| MappedEntry {
            raw_day: e.day.clone(),
            ordinal: e.period_index.map(|n| n as usize),
            slot: NormalizedSlot {
                subject: e.subject.clone(),
                counterpart: e.teacher.clone().unwrap_or_default(),
                counterpart_kind: CounterpartKind::Teacher,
                room: e.room.clone(),
                start_time: e.start_time.clone(),
                end_time: e.end_time.clone(),
                timetable_id: e.timetable_id.clone(),
                period_index: e.period_index,
            },
        })
        .collect()
}

// --- Period Resolution ---

/// Exact start match first, then the N-th teaching period, then a label
/// synthesized from the raw start time.
pub fn resolve_period(
    grid: &PeriodGrid,
    raw_start: &str,
    ordinal: Option<usize>,
) -> (PeriodLabel, Option<usize>) {
    let start = parse_time(raw_start);
    if let Some(period) = start.and_then(|t| grid.by_start(t)) {
        return (
            PeriodLabel::Defined(period.name.clone()),
            grid.ordinal_of(&period.name),
        );
    }
    if let Some(n) = ordinal {
        if let Some(period) = grid.by_ordinal(n) {
            debug!(
                "Start time '{}' matched no period; using ordinal {} -> {}",
                raw_start, n, period.name
            );
            return (PeriodLabel::Defined(period.name.clone()), Some(n));
        }
    }
    let label = start
        .map(format_time)
        .unwrap_or_else(|| raw_start.trim().to_string());
    debug!(
        "Start time '{}' (ordinal {:?}) resolved to no period; synthesizing '{}'",
        raw_start, ordinal, label
    );
    (PeriodLabel::Synthesized(label), ordinal)
}

fn tidy_time(raw: &str) -> String {
    parse_time(raw)
        .map(format_time)
        .unwrap_or_else(|| raw.trim().to_string())
}

// --- Normalization ---

pub fn normalize(raw: &RawSchedule, grid: &PeriodGrid) -> NormalizedSchedule {
    let mapped = match raw {
        RawSchedule::Class { timetable_id, days } => map_class_view(timetable_id, days),
        RawSchedule::Teacher(entries) => map_teacher_view(entries),
        RawSchedule::Room(entries) => map_room_view(entries),
    };

    let mut placed: Vec<(SlotKey, NormalizedSlot)> = Vec::with_capacity(mapped.len());
    let mut unplaced = Vec::new();

    for entry in mapped {
        let Some(day) = SchoolDay::parse(&entry.raw_day) else {
            warn!(
                "Schedule entry '{}' at {} has unplaceable day '{}'",
                entry.slot.subject, entry.slot.start_time, entry.raw_day
            );
            unplaced.push(UnplacedEntry {
                raw_day: entry.raw_day,
                subject: entry.slot.subject,
                start_time: entry.slot.start_time,
                reason: "day is not Monday..Saturday".to_string(),
            });
            continue;
        };

        let (label, resolved_ordinal) = resolve_period(grid, &entry.slot.start_time, entry.ordinal);
        let mut slot = entry.slot;
        slot.start_time = tidy_time(&slot.start_time);
        slot.end_time = tidy_time(&slot.end_time);
        if slot.period_index.is_none() {
            slot.period_index = resolved_ordinal.map(|n| n as u32);
        }
        placed.push(((day, label), slot));
    }

    // Sorting makes collision handling independent of input order.
    placed.sort();
    unplaced.sort();

    let mut slots = BTreeMap::new();
    for (key, slot) in placed {
        if let Some(previous) = slots.insert(key.clone(), slot) {
            warn!(
                "Two entries resolved to {} / {}; keeping the later one over '{}'",
                key.0, key.1, previous.subject
            );
        }
    }

    NormalizedSchedule {
        view: raw.view(),
        slots,
        unplaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassPeriodEntry;

    fn flat(day: &str, start: &str, end: &str, subject: &str, index: Option<u32>) -> FlatScheduleEntry {
        FlatScheduleEntry {
            day: day.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            subject: subject.to_string(),
            class_name: "5".to_string(),
            section: "A".to_string(),
            room: "R12".to_string(),
            teacher: Some("Ms. Teal".to_string()),
            teacher_id: Some("T".to_string()),
            period_index: index,
            timetable_id: Some("tt-5a".to_string()),
        }
    }

    #[test]
    fn teacher_view_uses_class_section_counterpart() {
        let raw = RawSchedule::Teacher(vec![flat("Tuesday", "09:30", "10:10", "Mathematics", None)]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        let slot = normalized.slot(SchoolDay::Tuesday, "Period 3").unwrap();
        assert_eq!(slot.counterpart, "5-A");
        assert_eq!(slot.counterpart_kind, CounterpartKind::ClassSection);
        assert_eq!(slot.period_index, Some(2));
        assert_eq!(slot.time_range(), "09:30-10:10");
    }

    #[test]
    fn room_view_uses_teacher_counterpart() {
        let raw = RawSchedule::Room(vec![flat("Mon", "08:00:00", "08:40:00", "Art", Some(0))]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        let slot = normalized.slot(SchoolDay::Monday, "Period 1").unwrap();
        assert_eq!(slot.counterpart, "Ms. Teal");
        assert_eq!(slot.start_time, "08:00");
    }

    #[test]
    fn class_view_falls_back_to_one_based_period_number() {
        let raw = RawSchedule::Class {
            timetable_id: Some("tt-5a".to_string()),
            days: vec![ClassDaySchedule {
                day: "Wednesday".to_string(),
                periods: vec![ClassPeriodEntry {
                    period_number: Some(4),
                    subject_name: "History".to_string(),
                    teacher: "Mr. Gray".to_string(),
                    teacher_id: None,
                    room_name: "R3".to_string(),
                    start_time: "10:15".to_string(),
                    end_time: "10:55".to_string(),
                }],
            }],
        };
        let normalized = normalize(&raw, PeriodGrid::standard());
        let slot = normalized.slot(SchoolDay::Wednesday, "Period 4").unwrap();
        assert_eq!(slot.counterpart, "Mr. Gray");
        assert_eq!(slot.period_index, Some(3));
        assert_eq!(slot.timetable_id.as_deref(), Some("tt-5a"));
    }

    #[test]
    fn unmatched_start_without_index_is_synthesized_not_dropped() {
        let raw = RawSchedule::Teacher(vec![flat("Thursday", "10:32", "11:12", "Science", None)]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        assert_eq!(normalized.slots.len(), 1);
        let key = (SchoolDay::Thursday, PeriodLabel::Synthesized("10:32".to_string()));
        assert_eq!(normalized.slots[&key].subject, "Science");
        assert_eq!(normalized.synthesized_labels().len(), 1);
    }

    #[test]
    fn unparseable_start_keeps_raw_text_as_label() {
        let raw = RawSchedule::Teacher(vec![flat("Friday", "after lunch", "", "Music", None)]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        let key = (SchoolDay::Friday, PeriodLabel::Synthesized("after lunch".to_string()));
        assert!(normalized.slots.contains_key(&key));
    }

    #[test]
    fn out_of_range_ordinal_is_synthesized() {
        let raw = RawSchedule::Teacher(vec![flat("Friday", "15:00", "15:40", "Club", Some(12))]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        let (_, label) = normalized.slots.keys().next().unwrap();
        assert_eq!(label, &PeriodLabel::Synthesized("15:00".to_string()));
    }

    #[test]
    fn sunday_entries_are_reported_as_unplaced() {
        let raw = RawSchedule::Teacher(vec![flat("Sunday", "09:30", "10:10", "Chess", None)]);
        let normalized = normalize(&raw, PeriodGrid::standard());
        assert!(normalized.slots.is_empty());
        assert_eq!(normalized.unplaced.len(), 1);
        assert_eq!(normalized.unplaced[0].raw_day, "Sunday");
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let entries = vec![
            flat("Monday", "08:00", "08:40", "English", None),
            flat("Monday", "08:00", "08:40", "French", None), // same cell
            flat("Tuesday", "09:30", "10:10", "Mathematics", Some(2)),
            flat("Tuesday", "10:32", "11:12", "Science", None),
            flat("Saturday", "13:30", "14:10", "Sport", Some(7)),
        ];
        let forward = normalize(&RawSchedule::Teacher(entries.clone()), PeriodGrid::standard());
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = normalize(&RawSchedule::Teacher(reversed_entries), PeriodGrid::standard());
        let mut rotated_entries = entries;
        rotated_entries.rotate_left(2);
        let rotated = normalize(&RawSchedule::Teacher(rotated_entries), PeriodGrid::standard());

        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
        // one cell per distinct key, collision collapsed
        assert_eq!(forward.slots.len(), 4);
    }
}
