// src/main.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::presets::ASCII_FULL;
use comfy_table::{ContentArrangement, Table};
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timetable_core::export;
use timetable_core::grid::RenderedGrid;
use timetable_core::models::{SubstitutionRecord, Teacher, TimetableFilter, TimetableScope, TimetableStatus};
use timetable_core::timetables::{self, ViewTarget};
use timetable_core::workflow::Guidance;
use timetable_core::{
    AppConfig, Ledger, MemorySchoolService, PeriodGrid, Reversal, SchoolApiClient, SchoolService,
    SubstituteWorkflow,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Timetable grids and substitute-teacher assignment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// School service base URL (overrides TIMETABLE_API_BASE_URL)
    #[arg(global = true, long)]
    base_url: Option<String>,

    /// Work against a JSON snapshot instead of the school service
    #[arg(global = true, long)]
    snapshot: Option<PathBuf>,

    #[arg(global = true, long)]
    academic_year: Option<String>,

    /// Branch/campus scope for free-teacher queries and assignments
    #[arg(global = true, long)]
    scope: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a weekly grid
    #[command(subcommand)]
    Grid(GridCommand),
    /// Find and assign substitute teachers
    #[command(subcommand)]
    Substitute(SubstituteCommand),
    /// List or revert substitutions
    #[command(subcommand)]
    Ledger(LedgerCommand),
    #[command(subcommand)]
    Timetable(TimetableCommand),
    /// Reference data for selections
    #[command(subcommand)]
    Reference(ReferenceCommand),
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
struct GridOptions {
    /// Show substitutions dated in the week containing this date (default: today)
    #[arg(long, conflicts_with = "all_weeks")]
    week_of: Option<NaiveDate>,
    /// Show every active substitution regardless of its date
    #[arg(long)]
    all_weeks: bool,
    /// Write the grid as CSV instead of printing it
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl GridOptions {
    fn reference_week(&self, today: NaiveDate) -> Option<NaiveDate> {
        if self.all_weeks {
            None
        } else {
            Some(self.week_of.unwrap_or(today))
        }
    }
}

#[derive(Subcommand, Debug)]
enum GridCommand {
    Class {
        class: String,
        section: String,
        #[command(flatten)]
        opts: GridOptions,
    },
    Teacher {
        teacher_id: String,
        #[command(flatten)]
        opts: GridOptions,
    },
    Room {
        room_id: String,
        #[command(flatten)]
        opts: GridOptions,
    },
}

#[derive(Args, Debug)]
struct AbsenceArgs {
    /// Absent teacher id
    teacher_id: String,
    date: NaiveDate,
}

#[derive(Subcommand, Debug)]
enum SubstituteCommand {
    /// Lessons of the absent teacher that need cover on the date
    Slots {
        #[command(flatten)]
        absence: AbsenceArgs,
    },
    /// Teachers free for one of those lessons
    Free {
        #[command(flatten)]
        absence: AbsenceArgs,
        /// Index from `substitute slots`
        slot: usize,
    },
    Assign {
        #[command(flatten)]
        absence: AbsenceArgs,
        slot: usize,
        substitute_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    List {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Revert by record id or by index from `ledger list`
    Revert { record: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Draft,
    Active,
}

impl From<StatusArg> for TimetableStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Draft => TimetableStatus::Draft,
            StatusArg::Active => TimetableStatus::Active,
        }
    }
}

#[derive(Subcommand, Debug)]
enum TimetableCommand {
    List {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    Delete { timetable_id: String },
}

#[derive(Subcommand, Debug)]
enum ReferenceCommand {
    Classes,
    Teachers,
    Rooms,
    Years,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove cached reference data (one resource type, or all)
    Clear { resource: Option<String> },
}

// --- Backends ---

enum Backend {
    Live(SchoolApiClient),
    Offline {
        service: MemorySchoolService,
        path: PathBuf,
    },
}

impl Backend {
    fn service(&self) -> &dyn SchoolService {
        match self {
            Backend::Live(client) => client,
            Backend::Offline { service, .. } => service,
        }
    }

    /// Writes offline changes back to the snapshot file.
    async fn persist(&self) -> Result<()> {
        if let Backend::Offline { service, path } = self {
            service
                .save(path)
                .await
                .with_context(|| format!("Failed to save snapshot {:?}", path))?;
        }
        Ok(())
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn print_guidance(guidance: Option<Guidance>) {
    if let Some(g) = guidance {
        println!("{}", g);
    }
}

async fn find_teacher(service: &dyn SchoolService, teacher_id: &str) -> Result<Teacher> {
    let roster = service
        .fetch_teachers()
        .await
        .context("Failed to load teacher roster")?;
    roster
        .into_iter()
        .find(|t| t.id == teacher_id)
        .ok_or_else(|| anyhow!("Unknown teacher id '{}'", teacher_id))
}

fn emit_grid(grid: &RenderedGrid, csv: Option<&PathBuf>) -> Result<()> {
    match csv {
        Some(path) => {
            export::write_grid(grid, export::create_file(path)?)?;
            info!("Grid written to {:?}", path);
        }
        None => println!("{}", grid.to_table()),
    }
    Ok(())
}

fn print_ledger(records: &[SubstitutionRecord]) {
    let mut table = new_table(&[
        "#", "Id", "Date", "Day", "Time", "Class", "Subject", "Original", "Substitute", "Reason",
    ]);
    for (i, r) in records.iter().enumerate() {
        table.add_row(vec![
            i.to_string(),
            r.id.clone().unwrap_or_default(),
            r.date.to_string(),
            r.weekday.to_string(),
            format!("{}-{}", r.start_time, r.end_time),
            r.class_section(),
            r.subject.clone(),
            r.original_teacher.clone(),
            r.substitute_teacher.clone(),
            r.reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
}

// --- Commands ---

async fn run_grid(
    backend: &Backend,
    grid: &PeriodGrid,
    config: &AppConfig,
    command: GridCommand,
) -> Result<()> {
    let (target, opts) = match command {
        GridCommand::Class {
            class,
            section,
            opts,
        } => (
            ViewTarget::Class {
                class_name: class,
                section,
            },
            opts,
        ),
        GridCommand::Teacher { teacher_id, opts } => (ViewTarget::Teacher { teacher_id }, opts),
        GridCommand::Room { room_id, opts } => (ViewTarget::Room { room_id }, opts),
    };
    let view = timetables::load_view(
        backend.service(),
        grid,
        &target,
        config.academic_year.as_deref(),
        opts.reference_week(Local::now().date_naive()),
    )
    .await
    .context("Failed to load schedule")?;

    for entry in &view.schedule.unplaced {
        warn!(
            "Not shown: {} at {} on '{}' ({})",
            entry.subject, entry.start_time, entry.raw_day, entry.reason
        );
    }
    emit_grid(&view.grid, opts.csv.as_ref())
}

async fn run_substitute(
    backend: &Backend,
    grid: &PeriodGrid,
    config: &AppConfig,
    command: SubstituteCommand,
) -> Result<()> {
    let service = backend.service();
    let mut workflow = SubstituteWorkflow::new(grid.clone())
        .with_scope(config.scope.clone())
        .with_academic_year(config.academic_year.clone());

    let absence = match &command {
        SubstituteCommand::Slots { absence }
        | SubstituteCommand::Free { absence, .. }
        | SubstituteCommand::Assign { absence, .. } => absence,
    };
    let teacher = find_teacher(service, &absence.teacher_id).await?;
    workflow
        .load_slots(service, teacher, absence.date)
        .await
        .context("Failed to load candidate slots")?;

    let slot_index = match &command {
        SubstituteCommand::Slots { .. } => {
            let mut table = new_table(&["#", "Period", "Time", "Class", "Subject", "Room"]);
            for (i, slot) in workflow
                .selection()
                .candidate_slots
                .unwrap_or_default()
                .iter()
                .enumerate()
            {
                table.add_row(vec![
                    i.to_string(),
                    slot.period.to_string(),
                    format!("{}-{}", slot.start_time, slot.end_time),
                    slot.class_section(),
                    slot.subject.clone(),
                    slot.room.clone(),
                ]);
            }
            println!("{}", table);
            print_guidance(workflow.guidance());
            return Ok(());
        }
        SubstituteCommand::Free { slot, .. } | SubstituteCommand::Assign { slot, .. } => *slot,
    };

    if let Some(guidance) = workflow.guidance() {
        bail!("{}", guidance);
    }
    workflow
        .load_substitutes(service, slot_index)
        .await
        .context("Failed to load free teachers")?;

    match command {
        SubstituteCommand::Free { .. } => {
            let mut table = new_table(&["Id", "Name"]);
            for t in workflow.selection().available_substitutes.unwrap_or_default() {
                table.add_row(vec![t.id.clone(), t.name.clone()]);
            }
            println!("{}", table);
            print_guidance(workflow.guidance());
            Ok(())
        }
        SubstituteCommand::Assign {
            substitute_id,
            reason,
            ..
        } => {
            if let Some(guidance) = workflow.guidance() {
                bail!("{}", guidance);
            }
            workflow.choose_substitute(&substitute_id, reason)?;
            let record = workflow.submit(service).await?;
            backend.persist().await?;
            println!(
                "{} covers {} {} on {} ({}-{}), replacing {}",
                record.substitute_teacher,
                record.class_section(),
                record.subject,
                record.date,
                record.start_time,
                record.end_time,
                record.original_teacher
            );
            Ok(())
        }
        SubstituteCommand::Slots { .. } => Ok(()),
    }
}

async fn run_ledger(backend: &Backend, command: LedgerCommand) -> Result<()> {
    let service = backend.service();
    let mut ledger = Ledger::new();
    ledger
        .refresh(service)
        .await
        .context("Failed to load active substitutions")?;

    match command {
        LedgerCommand::List { csv: Some(path) } => {
            export::write_ledger(ledger.records(), export::create_file(&path)?)?;
            info!("Ledger written to {:?}", path);
        }
        LedgerCommand::List { csv: None } => {
            print_ledger(ledger.records());
            if ledger.records().is_empty() {
                println!("No active substitutions.");
            }
        }
        LedgerCommand::Revert { record } => {
            let target = ledger
                .find_by_id(&record)
                .or_else(|| record.parse::<usize>().ok().and_then(|i| ledger.get(i)))
                .cloned()
                .ok_or_else(|| anyhow!("No active substitution '{}'", record))?;
            match ledger.reverse(service, &target).await? {
                Reversal::Reverted => {
                    backend.persist().await?;
                    println!(
                        "Reverted: {} {} on {} is back with {}",
                        target.class_section(),
                        target.subject,
                        target.date,
                        target.original_teacher
                    );
                }
                Reversal::AlreadyReverted => println!("Already reverted; nothing to do."),
            }
        }
    }
    Ok(())
}

async fn run_timetable(backend: &Backend, config: &AppConfig, command: TimetableCommand) -> Result<()> {
    match command {
        TimetableCommand::List {
            class,
            section,
            status,
        } => {
            let filter = TimetableFilter {
                class_name: class,
                section,
                academic_year: config.academic_year.clone(),
                status: status.map(TimetableStatus::from),
            };
            let list = timetables::list_timetables(backend.service(), &filter).await?;
            let mut table = new_table(&["Id", "Scope", "Year", "Status", "Days"]);
            for t in &list {
                let scope = match &t.scope {
                    TimetableScope::ClassSection {
                        class_name,
                        section,
                    } => format!("class {}-{}", class_name, section),
                    TimetableScope::Teacher { teacher_id } => format!("teacher {}", teacher_id),
                    TimetableScope::Room { room_id } => format!("room {}", room_id),
                };
                let status = match t.status {
                    TimetableStatus::Draft => "draft",
                    TimetableStatus::Active => "active",
                };
                table.add_row(vec![
                    t.id.clone(),
                    scope,
                    t.academic_year.clone(),
                    status.to_string(),
                    t.entries.len().to_string(),
                ]);
            }
            println!("{}", table);
        }
        TimetableCommand::Delete { timetable_id } => {
            timetables::delete_timetable(backend.service(), &timetable_id).await?;
            backend.persist().await?;
            println!("Deleted timetable {}", timetable_id);
        }
    }
    Ok(())
}

async fn run_reference(backend: &Backend, command: ReferenceCommand) -> Result<()> {
    let service = backend.service();
    let table = match command {
        ReferenceCommand::Classes => {
            let mut table = new_table(&["Id", "Name", "Sections"]);
            for c in service.fetch_classes().await? {
                table.add_row(vec![c.id, c.name, c.sections.join(", ")]);
            }
            table
        }
        ReferenceCommand::Teachers => {
            let mut table = new_table(&["Id", "Name", "Scope"]);
            for t in service.fetch_teachers().await? {
                table.add_row(vec![t.id, t.name, t.scope.unwrap_or_default()]);
            }
            table
        }
        ReferenceCommand::Rooms => {
            let mut table = new_table(&["Id", "Name"]);
            for r in service.fetch_rooms().await? {
                table.add_row(vec![r.id, r.name]);
            }
            table
        }
        ReferenceCommand::Years => {
            let mut table = new_table(&["Year", "Current"]);
            for y in service.fetch_academic_years().await? {
                let current = if y.current { "yes" } else { "" };
                table.add_row(vec![y.name, current.to_string()]);
            }
            table
        }
    };
    println!("{}", table);
    Ok(())
}

fn run_cache(backend: &Backend, command: CacheCommand) -> Result<()> {
    let CacheCommand::Clear { resource } = command;
    match backend {
        Backend::Live(client) => {
            let removed = client.clear_cache(resource.as_deref())?;
            println!("Removed {} cached file(s)", removed);
            Ok(())
        }
        Backend::Offline { .. } => bail!("The offline snapshot has no cache to clear"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if cli.base_url.is_some() {
        config.api_base_url = cli.base_url.clone();
    }
    if cli.academic_year.is_some() {
        config.academic_year = cli.academic_year.clone();
    }
    if cli.scope.is_some() {
        config.scope = cli.scope.clone();
    }
    config.validate().context("Invalid configuration")?;

    let grid = config.period_grid().context("Failed to load period grid")?;

    let backend = match &cli.snapshot {
        Some(path) => {
            let service = MemorySchoolService::load(path, grid.clone())
                .with_context(|| format!("Failed to load snapshot {:?}", path))?;
            Backend::Offline {
                service,
                path: path.clone(),
            }
        }
        None => {
            let client_config = config.client_config()?;
            info!("Using school service at {}", client_config.base_url);
            Backend::Live(SchoolApiClient::new(client_config).context("Failed to create client")?)
        }
    };

    match cli.command {
        Commands::Grid(cmd) => run_grid(&backend, &grid, &config, cmd).await,
        Commands::Substitute(cmd) => run_substitute(&backend, &grid, &config, cmd).await,
        Commands::Ledger(cmd) => run_ledger(&backend, cmd).await,
        Commands::Timetable(cmd) => run_timetable(&backend, &config, cmd).await,
        Commands::Reference(cmd) => run_reference(&backend, cmd).await,
        Commands::Cache(cmd) => run_cache(&backend, cmd),
    }
}
