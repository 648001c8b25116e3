// src/grid.rs

use chrono::{Duration, NaiveDate};
use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::models::SubstitutionRecord;
use crate::normalizer::{CounterpartKind, NormalizedSchedule, NormalizedSlot, PeriodLabel};
use crate::periods::{week_start, PeriodGrid, SchoolDay};

/// Substitute currently covering a rendered lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cover {
    pub date: NaiveDate,
    pub original_teacher: String,
    pub substitute_teacher: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledCell {
    pub slot: NormalizedSlot,
    pub cover: Option<Cover>,
}

impl FilledCell {
    /// Teacher (or class-section) to show in the cell.
    pub fn display_counterpart(&self) -> &str {
        match (&self.cover, self.slot.counterpart_kind) {
            (Some(cover), CounterpartKind::Teacher) => &cover.substitute_teacher,
            _ => &self.slot.counterpart,
        }
    }

    /// Hover/detail text.
    pub fn detail(&self) -> String {
        let mut text = format!(
            "{} | {} | {} | {}",
            self.slot.subject,
            self.display_counterpart(),
            self.slot.room,
            self.slot.time_range()
        );
        if let Some(cover) = &self.cover {
            text.push_str(&format!(
                " | covering for {} on {}",
                cover.original_teacher, cover.date
            ));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GridCell {
    Break,
    Empty,
    Filled(FilledCell),
}

impl GridCell {
    pub fn as_filled(&self) -> Option<&FilledCell> {
        match self {
            GridCell::Filled(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn short_text(&self) -> String {
        match self {
            GridCell::Break => "Break".to_string(),
            GridCell::Empty => "-".to_string(),
            GridCell::Filled(cell) => {
                let marker = if cell.cover.is_some() { " (sub)" } else { "" };
                format!(
                    "{}\n{}{}\n{}",
                    cell.slot.subject,
                    cell.display_counterpart(),
                    marker,
                    cell.slot.room
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub label: PeriodLabel,
    pub time_range: String,
    pub is_break: bool,
    /// One cell per `SchoolDay::ALL`, in order.
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedGrid {
    pub rows: Vec<GridRow>,
}

impl RenderedGrid {
    pub fn cell(&self, day: SchoolDay, period_name: &str) -> Option<&GridCell> {
        self.rows
            .iter()
            .find(|row| matches!(&row.label, PeriodLabel::Defined(n) if n == period_name))
            .and_then(|row| row.cells.get(day.index() as usize))
    }

    pub fn cells(&self) -> impl Iterator<Item = (SchoolDay, &PeriodLabel, &GridCell)> {
        self.rows.iter().flat_map(|row| {
            SchoolDay::ALL
                .iter()
                .zip(row.cells.iter())
                .map(move |(day, cell)| (*day, &row.label, cell))
        })
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(ASCII_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let mut header = vec![Cell::new("Period").add_attribute(Attribute::Bold)];
        header.extend(
            SchoolDay::ALL
                .iter()
                .map(|d| Cell::new(d.name()).add_attribute(Attribute::Bold)),
        );
        table.set_header(header);

        for row in &self.rows {
            let mut cells = vec![Cell::new(format!("{}\n{}", row.label, row.time_range))];
            cells.extend(row.cells.iter().map(|c| {
                let cell = Cell::new(c.short_text());
                if row.is_break {
                    cell.set_alignment(CellAlignment::Center)
                } else {
                    cell
                }
            }));
            table.add_row(cells);
        }
        table
    }
}

// --- Rendering ---

pub fn render(grid: &PeriodGrid, schedule: &NormalizedSchedule) -> RenderedGrid {
    render_with_cover(grid, schedule, &[], None)
}

/// Renders every (period, day) pair once. Active substitutions matching a
/// cell's timetable, weekday and period index mark it as covered; with
/// `week_of`, only substitutions dated inside that week apply.
pub fn render_with_cover(
    grid: &PeriodGrid,
    schedule: &NormalizedSchedule,
    substitutions: &[SubstitutionRecord],
    week_of: Option<NaiveDate>,
) -> RenderedGrid {
    let week = week_of.map(|d| {
        let monday = week_start(d);
        (monday, monday + Duration::days(6))
    });
    let applicable: Vec<&SubstitutionRecord> = substitutions
        .iter()
        .filter(|r| r.is_active())
        .filter(|r| week.map_or(true, |(from, to)| r.date >= from && r.date < to))
        .collect();

    let filled = |day: SchoolDay, label: &PeriodLabel| -> GridCell {
        match schedule.slots.get(&(day, label.clone())) {
            Some(slot) => GridCell::Filled(FilledCell {
                slot: slot.clone(),
                cover: find_cover(&applicable, day, slot),
            }),
            None => GridCell::Empty,
        }
    };

    let mut rows: Vec<GridRow> = grid
        .periods()
        .iter()
        .map(|period| {
            let label = PeriodLabel::Defined(period.name.clone());
            let cells = if period.is_break {
                SchoolDay::ALL.iter().map(|_| GridCell::Break).collect()
            } else {
                SchoolDay::ALL.iter().map(|d| filled(*d, &label)).collect()
            };
            GridRow {
                label,
                time_range: period.time_range_label(),
                is_break: period.is_break,
                cells,
            }
        })
        .collect();

    // Off-grid lessons get their own rows after the defined periods.
    for label in schedule.synthesized_labels() {
        let cells = SchoolDay::ALL.iter().map(|d| filled(*d, &label)).collect();
        let time_range = match &label {
            PeriodLabel::Synthesized(start) => start.clone(),
            PeriodLabel::Defined(_) => String::new(),
        };
        rows.push(GridRow {
            label,
            time_range,
            is_break: false,
            cells,
        });
    }

    RenderedGrid { rows }
}

fn find_cover(
    substitutions: &[&SubstitutionRecord],
    day: SchoolDay,
    slot: &NormalizedSlot,
) -> Option<Cover> {
    let (Some(timetable_id), Some(period_index)) = (&slot.timetable_id, slot.period_index) else {
        return None;
    };
    substitutions
        .iter()
        .filter(|r| {
            r.weekday == day && &r.timetable_id == timetable_id && r.period_index == period_index
        })
        .max_by_key(|r| r.date)
        .map(|r| Cover {
            date: r.date,
            original_teacher: r.original_teacher.clone(),
            substitute_teacher: r.substitute_teacher.clone(),
            reason: r.reason.clone(),
        })
}
