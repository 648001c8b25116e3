// src/workflow.rs
//
// Substitute assignment as an explicit state machine:
//
//   Idle -> TeacherDateSelected -> SlotSelected -> ReadyToCommit -> Idle
//
// Steps that need remote data hand out a request carrying a `Ticket`. The
// result is fed back with that ticket; once the selection has moved on, the
// ticket no longer matches and the result is dropped as stale.

use chrono::{NaiveDate, NaiveTime};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{ApiError, WorkflowError};
use crate::models::{
    AssignSubstituteRequest, FlatScheduleEntry, FreeTeacherQuery, SubstitutionRecord, Teacher,
};
use crate::normalizer::{resolve_period, PeriodLabel};
use crate::periods::{format_time, parse_time, PeriodGrid, SchoolDay};
use crate::service::SchoolService;

// --- Tickets & Resolutions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Remote-backed part of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Pending(Ticket),
    Ready(T),
    /// The request failed; re-submitting the step issues a fresh one.
    Failed(String),
}

impl<T> Resolution<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Resolution::Ready(value) => Some(value),
            _ => None,
        }
    }

    fn is_pending(&self, ticket: Ticket) -> bool {
        matches!(self, Resolution::Pending(t) if *t == ticket)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T = ()> {
    Accepted(T),
    Stale,
}

/// Empty results are shown as guidance for the next step, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guidance {
    NoSchoolDay,
    NoLessonsOnDay,
    SlotTimesUnknown,
    NoFreeTeachers,
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Guidance::NoSchoolDay => "The chosen date is not a school day; pick Monday to Saturday.",
            Guidance::NoLessonsOnDay => {
                "The absent teacher has no uncovered lessons that day; pick another date."
            }
            Guidance::SlotTimesUnknown => {
                "The chosen lesson has no readable time window; pick another slot."
            }
            Guidance::NoFreeTeachers => "No teacher is free for this slot; pick another slot.",
        };
        f.write_str(text)
    }
}

// --- Selection Data ---

/// One lesson of the absent teacher that can be covered on the chosen date.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSlot {
    pub weekday: SchoolDay,
    pub period: PeriodLabel,
    pub subject: String,
    pub class_name: String,
    pub section: String,
    pub room: String,
    pub start_time: String,
    pub end_time: String,
    pub timetable_id: Option<String>,
    pub period_index: Option<u32>,
    pub window: Option<(NaiveTime, NaiveTime)>,
}

impl CandidateSlot {
    pub fn class_section(&self) -> String {
        format!("{}-{}", self.class_name, self.section)
    }

    pub fn label(&self) -> String {
        format!(
            "{} {}-{} {} {}",
            self.period,
            self.start_time,
            self.end_time,
            self.class_section(),
            self.subject
        )
    }
}

/// What the absent teacher's schedule lookup needs to return.
#[derive(Debug, Clone, Default)]
pub struct SlotSources {
    pub schedule: Vec<FlatScheduleEntry>,
    pub active_substitutions: Vec<SubstitutionRecord>,
}

/// Lessons on the date's weekday, minus those already covered that date.
pub fn candidate_slots(
    grid: &PeriodGrid,
    sources: &SlotSources,
    weekday: SchoolDay,
    date: NaiveDate,
) -> Vec<CandidateSlot> {
    let mut slots: Vec<CandidateSlot> = sources
        .schedule
        .iter()
        .filter(|e| e.school_day() == Some(weekday))
        .map(|e| {
            let (period, ordinal) =
                resolve_period(grid, &e.start_time, e.period_index.map(|n| n as usize));
            let period_index = e.period_index.or(ordinal.map(|n| n as u32));
            let window = parse_time(&e.start_time)
                .zip(parse_time(&e.end_time))
                .or_else(|| match &period {
                    PeriodLabel::Defined(name) => grid.get(name).map(|p| (p.start, p.end)),
                    PeriodLabel::Synthesized(_) => None,
                });
            CandidateSlot {
                weekday,
                period,
                subject: e.subject.clone(),
                class_name: e.class_name.clone(),
                section: e.section.clone(),
                room: e.room.clone(),
                start_time: window.map_or_else(|| e.start_time.clone(), |(s, _)| format_time(s)),
                end_time: window.map_or_else(|| e.end_time.clone(), |(_, end)| format_time(end)),
                timetable_id: e.timetable_id.clone(),
                period_index,
                window,
            }
        })
        .filter(|slot| {
            let covered = match (&slot.timetable_id, slot.period_index) {
                (Some(tt), Some(index)) => sources
                    .active_substitutions
                    .iter()
                    .any(|s| s.covers(tt, index, date)),
                _ => false,
            };
            if covered {
                debug!("Skipping {}: already covered on {}", slot.label(), date);
            }
            !covered
        })
        .collect();
    slots.sort_by(|a, b| {
        a.window
            .map(|w| w.0)
            .cmp(&b.window.map(|w| w.0))
            .then_with(|| a.period.cmp(&b.period))
    });
    slots
}

// --- Requests handed to the caller ---

#[derive(Debug, Clone, PartialEq)]
pub struct SlotsRequest {
    pub ticket: Ticket,
    pub teacher_id: String,
    pub academic_year: Option<String>,
}

impl SlotsRequest {
    pub async fn fetch<S: SchoolService + ?Sized>(&self, service: &S) -> Result<SlotSources, ApiError> {
        let schedule = service
            .fetch_teacher_schedule(&self.teacher_id, self.academic_year.as_deref())
            .await?;
        let active_substitutions = service.fetch_active_substitutions().await?;
        Ok(SlotSources {
            schedule,
            active_substitutions,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutesRequest {
    pub ticket: Ticket,
    pub query: FreeTeacherQuery,
}

impl SubstitutesRequest {
    pub async fn fetch<S: SchoolService + ?Sized>(&self, service: &S) -> Result<Vec<Teacher>, ApiError> {
        service.fetch_free_teachers(&self.query).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub ticket: Ticket,
    pub request: AssignSubstituteRequest,
}

impl CommitRequest {
    pub async fn send<S: SchoolService + ?Sized>(
        &self,
        service: &S,
    ) -> Result<SubstitutionRecord, ApiError> {
        service.assign_substitute(&self.request).await
    }
}

// --- States ---

#[derive(Debug, Clone, PartialEq)]
pub struct Absence {
    pub teacher: Teacher,
    pub date: NaiveDate,
    pub candidates: Resolution<Vec<CandidateSlot>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotChoice {
    pub index: usize,
    pub substitutes: Resolution<Vec<Teacher>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstituteChoice {
    pub teacher: Teacher,
    pub reason: Option<String>,
    pub commit: Option<Ticket>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkflowState {
    #[default]
    Idle,
    TeacherDateSelected(Absence),
    SlotSelected(Absence, SlotChoice),
    ReadyToCommit(Absence, SlotChoice, SubstituteChoice),
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::TeacherDateSelected(_) => "teacher-date-selected",
            WorkflowState::SlotSelected(..) => "slot-selected",
            WorkflowState::ReadyToCommit(..) => "ready-to-commit",
        }
    }

    fn absence(&self) -> Option<&Absence> {
        match self {
            WorkflowState::Idle => None,
            WorkflowState::TeacherDateSelected(a)
            | WorkflowState::SlotSelected(a, _)
            | WorkflowState::ReadyToCommit(a, _, _) => Some(a),
        }
    }

    fn slot_choice(&self) -> Option<&SlotChoice> {
        match self {
            WorkflowState::SlotSelected(_, s) | WorkflowState::ReadyToCommit(_, s, _) => Some(s),
            _ => None,
        }
    }
}

/// Flat read-only view of the current selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub absent_teacher: Option<&'a Teacher>,
    pub date: Option<NaiveDate>,
    pub candidate_slots: Option<&'a [CandidateSlot]>,
    pub chosen_slot_index: Option<usize>,
    pub available_substitutes: Option<&'a [Teacher]>,
    pub substitute_teacher: Option<&'a Teacher>,
    pub reason: Option<&'a str>,
}

// --- Workflow ---

pub struct SubstituteWorkflow {
    grid: PeriodGrid,
    scope: Option<String>,
    academic_year: Option<String>,
    state: WorkflowState,
    next_ticket: u64,
}

impl SubstituteWorkflow {
    pub fn new(grid: PeriodGrid) -> Self {
        Self {
            grid,
            scope: None,
            academic_year: None,
            state: WorkflowState::Idle,
            next_ticket: 0,
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_academic_year(mut self, academic_year: Option<String>) -> Self {
        self.academic_year = academic_year;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn selection(&self) -> Selection<'_> {
        let absence = self.state.absence();
        let slot = self.state.slot_choice();
        let substitute = match &self.state {
            WorkflowState::ReadyToCommit(_, _, s) => Some(s),
            _ => None,
        };
        Selection {
            absent_teacher: absence.map(|a| &a.teacher),
            date: absence.map(|a| a.date),
            candidate_slots: absence.and_then(|a| a.candidates.ready()).map(Vec::as_slice),
            chosen_slot_index: slot.map(|s| s.index),
            available_substitutes: slot.and_then(|s| s.substitutes.ready()).map(Vec::as_slice),
            substitute_teacher: substitute.map(|s| &s.teacher),
            reason: substitute.and_then(|s| s.reason.as_deref()),
        }
    }

    pub fn chosen_slot(&self) -> Option<&CandidateSlot> {
        let index = self.state.slot_choice()?.index;
        self.state.absence()?.candidates.ready()?.get(index)
    }

    /// Guidance for an empty result at the current step, if any.
    pub fn guidance(&self) -> Option<Guidance> {
        match &self.state {
            WorkflowState::TeacherDateSelected(a) => {
                if SchoolDay::from_date(a.date).is_none() {
                    Some(Guidance::NoSchoolDay)
                } else {
                    match a.candidates.ready() {
                        Some(slots) if slots.is_empty() => Some(Guidance::NoLessonsOnDay),
                        _ => None,
                    }
                }
            }
            WorkflowState::SlotSelected(..) => {
                if self.chosen_slot().map_or(false, |s| s.window.is_none()) {
                    return Some(Guidance::SlotTimesUnknown);
                }
                match self.state.slot_choice().and_then(|s| s.substitutes.ready()) {
                    Some(teachers) if teachers.is_empty() => Some(Guidance::NoFreeTeachers),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// True while an assignment request has been issued and not yet applied.
    pub fn commit_pending(&self) -> bool {
        matches!(&self.state, WorkflowState::ReadyToCommit(_, _, s) if s.commit.is_some())
    }

    fn warn_if_orphaning_commit(&self) {
        if self.commit_pending() {
            warn!("Leaving the workflow with an assignment in flight; its result will be discarded");
        }
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn invalid(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    // --- Transitions ---

    /// Starts a new cycle from any state. Returns `None` when the date is not
    /// a school day; the state then carries `Guidance::NoSchoolDay`.
    pub fn select_absence(&mut self, teacher: Teacher, date: NaiveDate) -> Option<SlotsRequest> {
        info!("Absence selected: {} ({}) on {}", teacher.name, teacher.id, date);
        self.warn_if_orphaning_commit();
        if SchoolDay::from_date(date).is_none() {
            self.state = WorkflowState::TeacherDateSelected(Absence {
                teacher,
                date,
                candidates: Resolution::Ready(Vec::new()),
            });
            return None;
        }
        let ticket = self.issue_ticket();
        let request = SlotsRequest {
            ticket,
            teacher_id: teacher.id.clone(),
            academic_year: self.academic_year.clone(),
        };
        self.state = WorkflowState::TeacherDateSelected(Absence {
            teacher,
            date,
            candidates: Resolution::Pending(ticket),
        });
        Some(request)
    }

    pub fn apply_slots(
        &mut self,
        ticket: Ticket,
        result: Result<SlotSources, ApiError>,
    ) -> Result<Applied, WorkflowError> {
        let grid = &self.grid;
        let absence = match &mut self.state {
            WorkflowState::TeacherDateSelected(a) if a.candidates.is_pending(ticket) => a,
            _ => {
                debug!("Discarding stale candidate slots for {:?}", ticket);
                return Ok(Applied::Stale);
            }
        };
        match result {
            Ok(sources) => {
                // select_absence only issues tickets for school days
                let Some(weekday) = SchoolDay::from_date(absence.date) else {
                    absence.candidates = Resolution::Ready(Vec::new());
                    return Ok(Applied::Accepted(()));
                };
                let slots = candidate_slots(grid, &sources, weekday, absence.date);
                info!(
                    "{} candidate slot(s) for {} on {}",
                    slots.len(),
                    absence.teacher.name,
                    absence.date
                );
                absence.candidates = Resolution::Ready(slots);
                Ok(Applied::Accepted(()))
            }
            Err(e) => {
                warn!("Loading candidate slots failed: {}", e);
                absence.candidates = Resolution::Failed(e.to_string());
                Err(WorkflowError::Collaborator(e))
            }
        }
    }

    /// Picks a candidate slot, clearing any substitute chosen before. Returns
    /// `None` when the slot has no readable window to query.
    pub fn choose_slot(&mut self, index: usize) -> Result<Option<SubstitutesRequest>, WorkflowError> {
        if self.commit_pending() {
            return Err(WorkflowError::CommitInFlight);
        }
        let Some(absence) = self.state.absence() else {
            return Err(self.invalid("choose a slot"));
        };
        let Some(candidates) = absence.candidates.ready() else {
            return Err(WorkflowError::NotReady);
        };
        let slot = candidates
            .get(index)
            .ok_or(WorkflowError::SlotIndexOutOfRange {
                index,
                available: candidates.len(),
            })?;
        let window = slot.window;
        let weekday = slot.weekday;
        info!("Slot chosen: {}", slot.label());
        let absence = absence.clone();

        let Some((start_time, end_time)) = window else {
            self.state = WorkflowState::SlotSelected(
                absence,
                SlotChoice {
                    index,
                    substitutes: Resolution::Ready(Vec::new()),
                },
            );
            return Ok(None);
        };

        let ticket = self.issue_ticket();
        self.state = WorkflowState::SlotSelected(
            absence,
            SlotChoice {
                index,
                substitutes: Resolution::Pending(ticket),
            },
        );
        Ok(Some(SubstitutesRequest {
            ticket,
            query: FreeTeacherQuery {
                weekday,
                start_time,
                end_time,
                scope: self.scope.clone(),
            },
        }))
    }

    pub fn apply_substitutes(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Teacher>, ApiError>,
    ) -> Result<Applied, WorkflowError> {
        let (absence, choice) = match &mut self.state {
            WorkflowState::SlotSelected(a, s) if s.substitutes.is_pending(ticket) => (a, s),
            _ => {
                debug!("Discarding stale substitute list for {:?}", ticket);
                return Ok(Applied::Stale);
            }
        };
        match result {
            Ok(mut teachers) => {
                teachers.retain(|t| t.id != absence.teacher.id);
                info!("{} substitute(s) available", teachers.len());
                choice.substitutes = Resolution::Ready(teachers);
                Ok(Applied::Accepted(()))
            }
            Err(e) => {
                warn!("Loading free teachers failed: {}", e);
                choice.substitutes = Resolution::Failed(e.to_string());
                Err(WorkflowError::Collaborator(e))
            }
        }
    }

    pub fn choose_substitute(
        &mut self,
        teacher_id: &str,
        reason: Option<String>,
    ) -> Result<(), WorkflowError> {
        if self.commit_pending() {
            return Err(WorkflowError::CommitInFlight);
        }
        let (absence, choice) = match &self.state {
            WorkflowState::SlotSelected(a, s) | WorkflowState::ReadyToCommit(a, s, _) => (a, s),
            _ => return Err(self.invalid("choose a substitute")),
        };
        let Some(available) = choice.substitutes.ready() else {
            return Err(WorkflowError::NotReady);
        };
        let teacher = available
            .iter()
            .find(|t| t.id == teacher_id)
            .cloned()
            .ok_or_else(|| WorkflowError::SubstituteNotAvailable {
                teacher_id: teacher_id.to_string(),
            })?;
        info!("Substitute chosen: {} ({})", teacher.name, teacher.id);
        self.state = WorkflowState::ReadyToCommit(
            absence.clone(),
            choice.clone(),
            SubstituteChoice {
                teacher,
                reason: reason.filter(|r| !r.trim().is_empty()),
                commit: None,
            },
        );
        Ok(())
    }

    /// Validates the chosen slot locally; nothing is issued when it fails.
    pub fn commit(&mut self) -> Result<CommitRequest, WorkflowError> {
        let WorkflowState::ReadyToCommit(absence, _, substitute) = &self.state else {
            return Err(self.invalid("commit"));
        };
        if substitute.commit.is_some() {
            return Err(WorkflowError::CommitInFlight);
        }
        let slot = self.chosen_slot().ok_or(WorkflowError::NotReady)?;
        let timetable_id = slot
            .timetable_id
            .clone()
            .ok_or(WorkflowError::MissingTimetableId)?;
        let period_index = slot.period_index.ok_or(WorkflowError::MissingPeriodIndex)?;
        let request = AssignSubstituteRequest {
            timetable_id,
            day_index: slot.weekday.index(),
            period_index,
            substitute_teacher_id: substitute.teacher.id.clone(),
            reason: substitute.reason.clone(),
            date: absence.date,
            scope: self.scope.clone(),
        };

        let ticket = self.issue_ticket();
        if let WorkflowState::ReadyToCommit(_, _, substitute) = &mut self.state {
            substitute.commit = Some(ticket);
        }
        info!(
            "Committing substitute {} for {} period index {} on {}",
            request.substitute_teacher_id, request.timetable_id, request.period_index, request.date
        );
        Ok(CommitRequest { ticket, request })
    }

    /// On success the cycle ends and the workflow is back to `Idle`.
    pub fn apply_commit(
        &mut self,
        ticket: Ticket,
        result: Result<SubstitutionRecord, ApiError>,
    ) -> Result<Applied<SubstitutionRecord>, WorkflowError> {
        let substitute = match &mut self.state {
            WorkflowState::ReadyToCommit(_, _, s) if s.commit == Some(ticket) => s,
            _ => {
                debug!("Discarding stale commit result for {:?}", ticket);
                return Ok(Applied::Stale);
            }
        };
        match result {
            Ok(record) => {
                info!(
                    "Substitution recorded: {} covers {} {} on {}",
                    record.substitute_teacher,
                    record.class_section(),
                    record.subject,
                    record.date
                );
                self.state = WorkflowState::Idle;
                Ok(Applied::Accepted(record))
            }
            Err(e) => {
                warn!("Assigning substitute failed: {}", e);
                substitute.commit = None;
                Err(WorkflowError::Collaborator(e))
            }
        }
    }

    pub fn cancel(&mut self) {
        if self.state != WorkflowState::Idle {
            info!("Workflow cancelled from {}", self.state.name());
            self.warn_if_orphaning_commit();
        }
        self.state = WorkflowState::Idle;
    }

    // --- Sequential drivers ---

    pub async fn load_slots<S: SchoolService + ?Sized>(
        &mut self,
        service: &S,
        teacher: Teacher,
        date: NaiveDate,
    ) -> Result<(), WorkflowError> {
        let Some(request) = self.select_absence(teacher, date) else {
            return Ok(());
        };
        let result = request.fetch(service).await;
        self.apply_slots(request.ticket, result).map(|_| ())
    }

    pub async fn load_substitutes<S: SchoolService + ?Sized>(
        &mut self,
        service: &S,
        index: usize,
    ) -> Result<(), WorkflowError> {
        let Some(request) = self.choose_slot(index)? else {
            return Ok(());
        };
        let result = request.fetch(service).await;
        self.apply_substitutes(request.ticket, result).map(|_| ())
    }

    pub async fn submit<S: SchoolService + ?Sized>(
        &mut self,
        service: &S,
    ) -> Result<SubstitutionRecord, WorkflowError> {
        let request = self.commit()?;
        let result = request.send(service).await;
        match self.apply_commit(request.ticket, result)? {
            Applied::Accepted(record) => Ok(record),
            Applied::Stale => Err(WorkflowError::NotReady),
        }
    }
}
