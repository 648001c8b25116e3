// src/export.rs
//
// CSV output for a rendered grid and for the assignment ledger.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::ExportError;
use crate::grid::{GridCell, RenderedGrid};
use crate::models::{SubstitutionRecord, SubstitutionStatus};
use crate::periods::SchoolDay;

fn cell_text(cell: &GridCell) -> String {
    match cell {
        GridCell::Break => "Break".to_string(),
        GridCell::Empty => String::new(),
        GridCell::Filled(filled) => {
            let mut text = format!(
                "{} / {} / {}",
                filled.slot.subject,
                filled.display_counterpart(),
                filled.slot.room
            );
            if filled.cover.is_some() {
                text.push_str(" (sub)");
            }
            text
        }
    }
}

/// One row per period, one column per school day.
pub fn write_grid<W: Write>(grid: &RenderedGrid, writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["Period".to_string(), "Time".to_string()];
    header.extend(SchoolDay::ALL.iter().map(|d| d.name().to_string()));
    wtr.write_record(&header)?;

    for row in &grid.rows {
        let mut record = vec![row.label.to_string(), row.time_range.clone()];
        record.extend(row.cells.iter().map(cell_text));
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|e| ExportError::Csv(e.into()))?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerRow<'a> {
    id: &'a str,
    date: String,
    weekday: &'static str,
    period_index: u32,
    class: String,
    subject: &'a str,
    start_time: &'a str,
    end_time: &'a str,
    original_teacher: &'a str,
    substitute_teacher: &'a str,
    reason: &'a str,
    status: &'static str,
}

impl<'a> From<&'a SubstitutionRecord> for LedgerRow<'a> {
    fn from(r: &'a SubstitutionRecord) -> Self {
        Self {
            id: r.id.as_deref().unwrap_or(""),
            date: r.date.format("%Y-%m-%d").to_string(),
            weekday: r.weekday.name(),
            period_index: r.period_index,
            class: r.class_section(),
            subject: &r.subject,
            start_time: &r.start_time,
            end_time: &r.end_time,
            original_teacher: &r.original_teacher,
            substitute_teacher: &r.substitute_teacher,
            reason: r.reason.as_deref().unwrap_or(""),
            status: match r.status {
                SubstitutionStatus::Active => "active",
                SubstitutionStatus::Reverted => "reverted",
            },
        }
    }
}

pub fn write_ledger<W: Write>(records: &[SubstitutionRecord], writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(LedgerRow::from(record))?;
    }
    wtr.flush().map_err(|e| ExportError::Csv(e.into()))?;
    Ok(())
}

pub fn create_file(path: &Path) -> Result<File, ExportError> {
    File::create(path).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })
}
