//! Taskmill worker: runs the job manager against a shared SQLite database.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use taskmill_core::{AlertSink, Frequency, TaskmillConfig, TracingSink};
use taskmill_jobs::JobRegistry;
use taskmill_scheduler::{JobManager, ScheduleRepository};
use taskmill_store::SqliteStore;
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(name = "taskmill-worker")]
#[command(about = "Distributed scheduled-job worker", long_about = None)]
struct Cli {
    /// Path to taskmill.toml
    #[arg(long, env = "TASKMILL_CONFIG")]
    config: Option<String>,

    /// Print listings as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for due instances until Ctrl-C (the default)
    Run {
        /// Poll even when manager.auto_start is false
        #[arg(long)]
        force: bool,
    },
    /// Generate and enqueue every active schedule's instances for one day
    ScheduleDay {
        /// UTC date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Enqueue a one-off TestJob run, due in 30 seconds
    EnqueueTest,
    /// List instances targeted on one day
    Instances {
        /// UTC date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show when the next queued instance is due
    Next,
    /// List schedules
    Schedules {
        /// Include inactive schedules
        #[arg(long)]
        all: bool,
    },
    /// Add a schedule
    AddSchedule {
        /// Schedule ID
        id: String,
        /// Registered job id to run
        job_id: String,
        /// Time of day, [0.]hh:mm[:ss] UTC
        #[arg(long)]
        at: String,
        /// none, once, daily or work_days
        #[arg(long, default_value = "daily")]
        frequency: Frequency,
        /// Store the schedule switched off
        #[arg(long)]
        inactive: bool,
    },
    /// Remove a schedule
    RemoveSchedule {
        /// Schedule ID
        id: String,
    },
    /// Force an instance to Failed so it is never run
    RemoveInstance {
        /// Instance ID
        id: i64,
    },
    /// Operate on the generic task queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Enqueue a task id
    Push { task_id: String },
    /// Claim the next task id
    Pop,
    /// Mark a task done
    Complete { task_id: String },
    /// Mark a task done with a failure marker
    Fail { task_id: String },
    /// List tasks not yet done
    List,
}

/// Everything a subcommand needs, built once per process.
struct Context {
    config: TaskmillConfig,
    store: Arc<SqliteStore>,
    alerts: Arc<dyn AlertSink>,
    manager: Arc<JobManager>,
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taskmill_worker=info,taskmill_scheduler=info,taskmill_store=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > TASKMILL_CONFIG env > ~/.taskmill/taskmill.toml
    let config = TaskmillConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TaskmillConfig::default()
    });

    if let Err(e) = config.validate() {
        tracing::warn!("Configuration problems:\n{e}");
    }

    config.ensure_database_dir()?;
    info!(path = %config.database.path, "opening SQLite database");
    let alerts: Arc<dyn AlertSink> = Arc::new(TracingSink);
    let store = Arc::new(
        SqliteStore::open(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )?
        .with_alerts(alerts.clone()),
    );

    let claimant = config.manager.claimant_identity();
    let repository = ScheduleRepository::new(store.clone(), claimant, alerts.clone());
    let manager = Arc::new(JobManager::new(
        repository,
        Arc::new(JobRegistry::with_builtin()),
        alerts.clone(),
        config.manager.clone(),
    ));

    let ctx = Context {
        config,
        store,
        alerts,
        manager,
        json: cli.json,
    };

    match cli.command.unwrap_or(Commands::Run { force: false }) {
        Commands::Run { force } => commands::run(&ctx, force).await?,
        Commands::ScheduleDay { date } => commands::schedule_day(&ctx, date)?,
        Commands::EnqueueTest => commands::enqueue_test(&ctx)?,
        Commands::Instances { date } => commands::instances(&ctx, date)?,
        Commands::Next => commands::next(&ctx)?,
        Commands::Schedules { all } => commands::schedules(&ctx, all)?,
        Commands::AddSchedule {
            id,
            job_id,
            at,
            frequency,
            inactive,
        } => commands::add_schedule(&ctx, id, job_id, at, frequency, !inactive)?,
        Commands::RemoveSchedule { id } => commands::remove_schedule(&ctx, &id)?,
        Commands::RemoveInstance { id } => commands::remove_instance(&ctx, id)?,
        Commands::Queue { command } => match command {
            QueueCommands::Push { task_id } => commands::queue::push(&ctx, &task_id)?,
            QueueCommands::Pop => commands::queue::pop(&ctx)?,
            QueueCommands::Complete { task_id } => commands::queue::complete(&ctx, &task_id)?,
            QueueCommands::Fail { task_id } => commands::queue::fail(&ctx, &task_id)?,
            QueueCommands::List => commands::queue::list(&ctx)?,
        },
    }

    Ok(())
}
