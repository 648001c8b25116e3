// src/ledger.rs

use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::{RemoveSubstituteRequest, SubstitutionRecord, SubstitutionStatus};
use crate::service::SchoolService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversal {
    Reverted,
    /// Nothing to undo; reported as success.
    AlreadyReverted,
}

/// Substitution records known to this session, newest assignments included.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<SubstitutionRecord>,
}

fn same_lesson(a: &SubstitutionRecord, b: &SubstitutionRecord) -> bool {
    a.timetable_id == b.timetable_id
        && a.weekday == b.weekday
        && a.period_index == b.period_index
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<SubstitutionRecord>) -> Self {
        Self { records }
    }

    /// Replaces the ledger with the service's active records.
    pub async fn refresh<S: SchoolService + ?Sized>(&mut self, service: &S) -> Result<usize, ApiError> {
        self.records = service.fetch_active_substitutions().await?;
        self.records.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.period_index.cmp(&b.period_index))
                .then_with(|| a.timetable_id.cmp(&b.timetable_id))
        });
        debug!("Ledger refreshed: {} active record(s)", self.records.len());
        Ok(self.records.len())
    }

    pub fn records(&self) -> &[SubstitutionRecord] {
        &self.records
    }

    pub fn active(&self) -> impl Iterator<Item = &SubstitutionRecord> {
        self.records.iter().filter(|r| r.is_active())
    }

    pub fn get(&self, index: usize) -> Option<&SubstitutionRecord> {
        self.records.get(index)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&SubstitutionRecord> {
        self.records.iter().find(|r| r.id.as_deref() == Some(id))
    }

    /// Removes the substitution keyed by timetable, day and period index.
    /// A record that is already reverted (here or on the service) is a no-op.
    pub async fn reverse<S: SchoolService + ?Sized>(
        &mut self,
        service: &S,
        record: &SubstitutionRecord,
    ) -> Result<Reversal, ApiError> {
        if !record.is_active() {
            debug!("Record for {} on {} already reverted", record.class_section(), record.date);
            return Ok(Reversal::AlreadyReverted);
        }

        let outcome = match service
            .remove_substitute(&RemoveSubstituteRequest::from(record))
            .await
        {
            Ok(()) => Reversal::Reverted,
            Err(ApiError::NotFound(message)) => {
                debug!("Service has no active substitution to remove: {}", message);
                Reversal::AlreadyReverted
            }
            Err(e) => return Err(e),
        };

        for entry in self.records.iter_mut().filter(|r| same_lesson(r, record)) {
            entry.status = SubstitutionStatus::Reverted;
        }
        info!(
            "Reverted substitution: {} {} on {} back to {}",
            record.class_section(),
            record.subject,
            record.date,
            record.original_teacher
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySchoolService, Snapshot};
    use crate::periods::{PeriodGrid, SchoolDay};
    use chrono::NaiveDate;

    fn record(status: SubstitutionStatus) -> SubstitutionRecord {
        SubstitutionRecord {
            id: Some("sub-1".to_string()),
            timetable_id: "tt-5a".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
            weekday: SchoolDay::Tuesday,
            period_index: 2,
            subject: "Mathematics".to_string(),
            class_name: "5".to_string(),
            section: "A".to_string(),
            start_time: "09:30".to_string(),
            end_time: "10:10".to_string(),
            original_teacher_id: "T".to_string(),
            original_teacher: "Ms. Teal".to_string(),
            substitute_teacher_id: "U".to_string(),
            substitute_teacher: "Mr. Umber".to_string(),
            reason: None,
            status,
        }
    }

    fn service_with(records: Vec<SubstitutionRecord>) -> MemorySchoolService {
        let snapshot = Snapshot {
            substitutions: records,
            ..Default::default()
        };
        MemorySchoolService::new(snapshot, PeriodGrid::standard().clone())
    }

    #[tokio::test]
    async fn refresh_lists_active_only() {
        let svc = service_with(vec![
            record(SubstitutionStatus::Active),
            record(SubstitutionStatus::Reverted),
        ]);
        let mut ledger = Ledger::new();
        assert_eq!(ledger.refresh(&svc).await.unwrap(), 1);
        assert_eq!(ledger.active().count(), 1);
    }

    #[tokio::test]
    async fn reverse_marks_record_reverted() {
        let svc = service_with(vec![record(SubstitutionStatus::Active)]);
        let mut ledger = Ledger::new();
        ledger.refresh(&svc).await.unwrap();
        let target = ledger.records()[0].clone();
        assert_eq!(ledger.reverse(&svc, &target).await.unwrap(), Reversal::Reverted);
        assert_eq!(ledger.active().count(), 0);
        assert!(svc.fetch_active_substitutions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reversing_reverted_record_is_a_no_op() {
        let svc = service_with(vec![record(SubstitutionStatus::Reverted)]);
        let mut ledger = Ledger::from_records(vec![record(SubstitutionStatus::Reverted)]);
        let target = ledger.records()[0].clone();
        assert_eq!(
            ledger.reverse(&svc, &target).await.unwrap(),
            Reversal::AlreadyReverted
        );
        assert_eq!(svc.snapshot().await.substitutions[0].status, SubstitutionStatus::Reverted);
    }

    #[tokio::test]
    async fn record_reverted_elsewhere_counts_as_success() {
        // the ledger still believes the record is active
        let svc = service_with(vec![record(SubstitutionStatus::Reverted)]);
        let mut ledger = Ledger::from_records(vec![record(SubstitutionStatus::Active)]);
        let target = ledger.records()[0].clone();
        assert_eq!(
            ledger.reverse(&svc, &target).await.unwrap(),
            Reversal::AlreadyReverted
        );
        assert_eq!(ledger.records()[0].status, SubstitutionStatus::Reverted);
    }
}
