// src/periods.rs

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

// --- School Days ---

/// The six days a timetable row can belong to, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchoolDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl SchoolDay {
    pub const ALL: [SchoolDay; 6] = [
        SchoolDay::Monday,
        SchoolDay::Tuesday,
        SchoolDay::Wednesday,
        SchoolDay::Thursday,
        SchoolDay::Friday,
        SchoolDay::Saturday,
    ];

    /// Day index used by the assignment endpoints. Monday is 0.
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn from_weekday(weekday: Weekday) -> Option<Self> {
        match weekday {
            Weekday::Mon => Some(SchoolDay::Monday),
            Weekday::Tue => Some(SchoolDay::Tuesday),
            Weekday::Wed => Some(SchoolDay::Wednesday),
            Weekday::Thu => Some(SchoolDay::Thursday),
            Weekday::Fri => Some(SchoolDay::Friday),
            Weekday::Sat => Some(SchoolDay::Saturday),
            Weekday::Sun => None,
        }
    }

    pub fn from_date(date: NaiveDate) -> Option<Self> {
        Self::from_weekday(date.weekday())
    }

    /// Parses full names and three-letter abbreviations, ignoring case.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|day| {
            let name = day.name().to_ascii_lowercase();
            lowered == name || lowered == name[..3]
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            SchoolDay::Monday => "Monday",
            SchoolDay::Tuesday => "Tuesday",
            SchoolDay::Wednesday => "Wednesday",
            SchoolDay::Thursday => "Thursday",
            SchoolDay::Friday => "Friday",
            SchoolDay::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for SchoolDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchoolDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("'{}' is not a school day (Monday..Saturday)", s))
    }
}

/// Monday of the week containing `date` (Sunday belongs to the week it ends).
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

// --- Wall-clock Times ---

const TIME_FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

/// Parses the time strings the school service sends (`09:30`, `09:30:00`, `9:30 AM`).
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Serde adapter for `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).ok_or_else(|| D::Error::custom(format!("invalid time '{}'", raw)))
    }
}

// --- Period Grid Definition ---

/// One timetable column. The range is half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodDefinition {
    pub name: String,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub is_break: bool,
}

impl PeriodDefinition {
    pub fn time_range_label(&self) -> String {
        format!("{}-{}", format_time(self.start), format_time(self.end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PeriodGrid {
    periods: Vec<PeriodDefinition>,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

// Forty-minute periods from 08:00 with a short break and a lunch break.
static STANDARD_GRID: Lazy<PeriodGrid> = Lazy::new(|| {
    let table: [(&str, (u32, u32), (u32, u32), bool); 10] = [
        ("Period 1", (8, 0), (8, 40), false),
        ("Period 2", (8, 40), (9, 20), false),
        ("Short Break", (9, 20), (9, 30), true),
        ("Period 3", (9, 30), (10, 10), false),
        ("Period 4", (10, 10), (10, 50), false),
        ("Lunch", (10, 50), (11, 30), true),
        ("Period 5", (11, 30), (12, 10), false),
        ("Period 6", (12, 10), (12, 50), false),
        ("Period 7", (12, 50), (13, 30), false),
        ("Period 8", (13, 30), (14, 10), false),
    ];
    PeriodGrid {
        periods: table
            .iter()
            .map(|(name, (sh, sm), (eh, em), is_break)| PeriodDefinition {
                name: name.to_string(),
                start: hm(*sh, *sm),
                end: hm(*eh, *em),
                is_break: *is_break,
            })
            .collect(),
    }
});

impl PeriodGrid {
    /// Validates ordering and uniqueness before accepting a custom grid.
    pub fn new(periods: Vec<PeriodDefinition>) -> Result<Self, ConfigError> {
        if periods.is_empty() {
            return Err(ConfigError::Invalid("period grid is empty".to_string()));
        }
        let mut names = HashSet::new();
        for period in &periods {
            if !names.insert(period.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate period name '{}'",
                    period.name
                )));
            }
            if period.start >= period.end {
                return Err(ConfigError::Invalid(format!(
                    "period '{}' ends before it starts",
                    period.name
                )));
            }
        }
        for pair in periods.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ConfigError::Invalid(format!(
                    "period '{}' overlaps or precedes '{}'",
                    pair[1].name, pair[0].name
                )));
            }
        }
        Ok(Self { periods })
    }

    pub fn standard() -> &'static PeriodGrid {
        &STANDARD_GRID
    }

    /// Loads a grid from a JSON array of period definitions.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let periods: Vec<PeriodDefinition> = serde_json::from_str(&json)?;
        Self::new(periods)
    }

    pub fn periods(&self) -> &[PeriodDefinition] {
        &self.periods
    }

    pub fn teaching_periods(&self) -> impl Iterator<Item = &PeriodDefinition> {
        self.periods.iter().filter(|p| !p.is_break)
    }

    pub fn get(&self, name: &str) -> Option<&PeriodDefinition> {
        self.periods.iter().find(|p| p.name == name)
    }

    /// Non-break period whose range starts exactly at `start`.
    pub fn by_start(&self, start: NaiveTime) -> Option<&PeriodDefinition> {
        self.teaching_periods().find(|p| p.start == start)
    }

    /// The N-th non-break period, zero-based, in definition order.
    pub fn by_ordinal(&self, ordinal: usize) -> Option<&PeriodDefinition> {
        self.teaching_periods().nth(ordinal)
    }

    /// Zero-based position of a period among the non-break periods.
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.teaching_periods().position(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_grid_passes_validation() {
        let grid = PeriodGrid::standard();
        assert!(PeriodGrid::new(grid.periods().to_vec()).is_ok());
        assert_eq!(grid.teaching_periods().count(), 8);
        assert_eq!(grid.periods().iter().filter(|p| p.is_break).count(), 2);
    }

    #[test]
    fn lookup_by_start_skips_breaks() {
        let grid = PeriodGrid::standard();
        assert_eq!(grid.by_start(hm(9, 30)).map(|p| p.name.as_str()), Some("Period 3"));
        // Short Break starts at 09:20 but never holds a lesson
        assert!(grid.by_start(hm(9, 20)).is_none());
        assert!(grid.by_start(hm(10, 32)).is_none());
    }

    #[test]
    fn ordinal_counts_only_teaching_periods() {
        let grid = PeriodGrid::standard();
        assert_eq!(grid.by_ordinal(2).map(|p| p.name.as_str()), Some("Period 3"));
        assert_eq!(grid.ordinal_of("Period 5"), Some(4));
        assert_eq!(grid.ordinal_of("Lunch"), None);
        assert!(grid.by_ordinal(8).is_none());
    }

    #[test]
    fn rejects_overlapping_periods() {
        let periods = vec![
            PeriodDefinition {
                name: "A".into(),
                start: hm(8, 0),
                end: hm(9, 0),
                is_break: false,
            },
            PeriodDefinition {
                name: "B".into(),
                start: hm(8, 30),
                end: hm(9, 30),
                is_break: false,
            },
        ];
        assert!(matches!(PeriodGrid::new(periods), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let p = PeriodDefinition {
            name: "A".into(),
            start: hm(8, 0),
            end: hm(9, 0),
            is_break: false,
        };
        let mut q = p.clone();
        q.start = hm(9, 0);
        q.end = hm(10, 0);
        assert!(PeriodGrid::new(vec![p, q]).is_err());
    }

    #[test]
    fn parses_service_time_formats() {
        assert_eq!(parse_time("09:30"), Some(hm(9, 30)));
        assert_eq!(parse_time(" 09:30:00 "), Some(hm(9, 30)));
        assert_eq!(parse_time("9:30 AM"), Some(hm(9, 30)));
        assert_eq!(parse_time("1:10 PM"), Some(hm(13, 10)));
        assert_eq!(parse_time("soon"), None);
    }

    #[test]
    fn school_day_parsing_and_indexing() {
        assert_eq!(SchoolDay::parse("tuesday"), Some(SchoolDay::Tuesday));
        assert_eq!(SchoolDay::parse("SAT"), Some(SchoolDay::Saturday));
        assert_eq!(SchoolDay::parse("Sunday"), None);
        assert_eq!(SchoolDay::Monday.index(), 0);
        assert_eq!(SchoolDay::from_index(5), Some(SchoolDay::Saturday));
        assert_eq!(SchoolDay::from_index(6), None);

        let tuesday = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();
        assert_eq!(SchoolDay::from_date(tuesday), Some(SchoolDay::Tuesday));
        let sunday = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();
        assert_eq!(SchoolDay::from_date(sunday), None);
        assert_eq!(week_start(sunday), NaiveDate::from_ymd_opt(2024, 9, 2).unwrap());
    }

    #[test]
    fn loads_grid_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");
        fs::write(
            &path,
            r#"[{"name":"P1","start":"08:00","end":"08:45"},
                {"name":"Break","start":"08:45","end":"09:00","isBreak":true},
                {"name":"P2","start":"09:00","end":"09:45"}]"#,
        )
        .unwrap();
        let grid = PeriodGrid::load(&path).unwrap();
        assert_eq!(grid.periods().len(), 3);
        assert!(grid.get("Break").unwrap().is_break);
    }
}
