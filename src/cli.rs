//! CLI interface for Pilewatch.
//!
//! Every subcommand is non-interactive: arguments in, a short report out.
//! Progress and per-observation events go to stderr through `tracing`.

mod format;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jiff::Timestamp;

use crate::{
    client::{ActivityLog, FarmCalendar, ThingsBoard},
    config::Config,
    cycle::Orchestrator,
    observation::ObservationBuilder,
    retry,
    schedule::JobRegistry,
    storage::Storage,
};

use format::{format_record, format_report, format_window};

/// Pilewatch: deliver compost pile telemetry to the farm activity log.
#[derive(Debug, Parser)]
#[command(name = "pilewatch", after_long_help = USAGE_HELP)]
pub struct Cli {
    /// Config file. Defaults to `~/.pilewatch/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log JSON lines instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    command: Command,
}

const USAGE_HELP: &str = r"Typical use:
  pilewatch run north-pile            one cycle now
  pilewatch schedule north-pile south-pile
                                      daily cycles inside each operation window
  pilewatch outbox list               observations waiting for delivery
  pilewatch outbox flush              retry them without observing

Passwords may come from PILEWATCH_TELEMETRY_PASSWORD and
PILEWATCH_ACTIVITY_LOG_PASSWORD instead of the config file.";

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one telemetry cycle for a pile's compost operation.
    ///
    /// Resends queued observations, then observes every configured device.
    Run {
        /// Pile name as known to the activity log.
        pile: String,
    },

    /// Register piles and run their daily cycles until every operation ends.
    Schedule {
        #[arg(required = true)]
        piles: Vec<String>,
    },

    /// Inspect or flush the outbox.
    Outbox {
        #[command(subcommand)]
        command: OutboxCommand,
    },

    /// List the operation windows recorded so far.
    Piles,

    /// Assess the piles from today's telemetry and publish the result.
    Recommend,
}

#[derive(Debug, Subcommand)]
enum OutboxCommand {
    /// List observations waiting for delivery.
    List,

    /// Show one observation, delivered or not.
    Show { id: i64 },

    /// Resend every queued observation.
    Flush,
}

/// The live services a command talks to.
struct Services {
    storage: Storage,
    telemetry: ThingsBoard,
    activity_log: FarmCalendar,
}

impl Services {
    fn connect(config: &Config) -> Result<Self, String> {
        let storage = open_storage(config)?;
        let telemetry = ThingsBoard::new(
            &config.telemetry.url,
            &config.telemetry.username,
            &config.telemetry_password()?,
            config.http_timeout(),
        )
        .map_err(|e| format!("failed to set up telemetry client: {e}"))?;
        let activity_log = activity_log_client(config)?;
        Ok(Self {
            storage,
            telemetry,
            activity_log,
        })
    }

    fn orchestrator<'a>(&'a self, config: &Config) -> Orchestrator<'a> {
        Orchestrator::new(
            &self.storage,
            &self.telemetry,
            &self.activity_log,
            builder(config),
            config.devices.clone(),
        )
        .with_workers(config.device_workers)
        .with_recommendation(config.recommendation.clone())
    }
}

fn builder(config: &Config) -> ObservationBuilder {
    ObservationBuilder::new(config.vocabulary.clone(), config.activity_types.clone())
}

fn activity_log_client(config: &Config) -> Result<FarmCalendar, String> {
    FarmCalendar::new(
        &config.activity_log.url,
        &config.activity_log.login_url,
        &config.activity_log.username,
        &config.activity_log_password()?,
        config.http_timeout(),
    )
    .map_err(|e| format!("failed to set up activity log client: {e}"))
}

fn open_storage(config: &Config) -> Result<Storage, String> {
    let path = config.database_path()?;
    Storage::open(&path).map_err(|e| format!("failed to open {}: {e}", path.display()))
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli) -> Result<(), String> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { pile } => cmd_run(&config, &pile),
        Command::Schedule { piles } => cmd_schedule(&config, &piles),
        Command::Outbox { command } => match command {
            OutboxCommand::List => cmd_outbox_list(&config),
            OutboxCommand::Show { id } => cmd_outbox_show(&config, id),
            OutboxCommand::Flush => cmd_outbox_flush(&config),
        },
        Command::Piles => cmd_piles(&config),
        Command::Recommend => cmd_recommend(&config),
    }
}

fn cmd_run(config: &Config, pile: &str) -> Result<(), String> {
    let services = Services::connect(config)?;
    let orchestrator = services.orchestrator(config);

    let token = services
        .activity_log
        .authenticate()
        .map_err(|e| format!("activity log login failed: {e}"))?;
    let window = services
        .activity_log
        .resolve_operation(&token, pile)
        .map_err(|e| format!("failed to look up pile {pile}: {e}"))?
        .ok_or_else(|| format!("no compost operation found for pile {pile}"))?;
    services
        .storage
        .register_operation_window(&window)
        .map_err(|e| format!("failed to record operation window: {e}"))?;

    let report = orchestrator
        .run_cycle_with_token(&window.operation_id, &token)
        .map_err(|e| e.to_string())?;

    println!("{}", format_report(&window.operation_id, &report));
    Ok(())
}

fn cmd_schedule(config: &Config, piles: &[String]) -> Result<(), String> {
    let services = Services::connect(config)?;
    let orchestrator = services.orchestrator(config);
    let mut registry = JobRegistry::new(config.daily_trigger);

    let token = services
        .activity_log
        .authenticate()
        .map_err(|e| format!("activity log login failed: {e}"))?;
    let now = Timestamp::now();
    for pile in piles {
        registry
            .register_pile(&orchestrator, &token, pile, now)
            .map_err(|e| e.to_string())?;
    }
    if let Some(interval) = config.recommendation_interval() {
        registry.schedule_recommendations(interval, now);
    }

    for job in registry.jobs() {
        match job.next_run {
            Some(at) => eprintln!("{}: next run {at}", job.id),
            None => eprintln!("{}: operation over, not scheduled", job.id),
        }
    }
    registry.run(&orchestrator);
    Ok(())
}

fn cmd_outbox_list(config: &Config) -> Result<(), String> {
    let storage = open_storage(config)?;
    let records = storage
        .list_unsent()
        .map_err(|e| format!("failed to list outbox: {e}"))?;
    let total = storage
        .count_observations()
        .map_err(|e| format!("failed to count outbox: {e}"))?;

    if records.is_empty() {
        println!("Outbox empty");
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    eprintln!(
        "{} queued, {} delivered after retry",
        records.len(),
        total.saturating_sub(records.len())
    );
    Ok(())
}

fn cmd_outbox_show(config: &Config, id: i64) -> Result<(), String> {
    let storage = open_storage(config)?;
    let record = storage.load_observation(id).map_err(|e| e.to_string())?;
    let state = if record.sent { "delivered" } else { "queued" };
    println!("{}  ({state})", format_record(&record));
    Ok(())
}

fn cmd_outbox_flush(config: &Config) -> Result<(), String> {
    let storage = open_storage(config)?;
    let activity_log = activity_log_client(config)?;

    let token = activity_log
        .authenticate()
        .map_err(|e| format!("activity log login failed: {e}"))?;
    let delivered = retry::flush(&storage, &builder(config), &activity_log, &token)
        .map_err(|e| format!("failed to flush outbox: {e}"))?;
    let remaining = storage
        .count_unsent()
        .map_err(|e| format!("failed to count outbox: {e}"))?;

    println!("Resent {delivered}, {remaining} still queued");
    Ok(())
}

fn cmd_piles(config: &Config) -> Result<(), String> {
    let storage = open_storage(config)?;
    let windows = storage
        .list_operation_windows()
        .map_err(|e| format!("failed to list operations: {e}"))?;

    if windows.is_empty() {
        println!("No piles registered");
        return Ok(());
    }
    for window in &windows {
        println!("{}", format_window(window));
    }
    Ok(())
}

fn cmd_recommend(config: &Config) -> Result<(), String> {
    let services = Services::connect(config)?;
    let orchestrator = services.orchestrator(config);

    match orchestrator
        .run_recommendation_pass()
        .map_err(|e| e.to_string())?
    {
        Some(status) => {
            let json = serde_json::to_string_pretty(&status)
                .map_err(|e| format!("failed to serialize recommendation: {e}"))?;
            println!("{json}");
        }
        None => eprintln!("Not enough telemetry for a recommendation"),
    }
    Ok(())
}
