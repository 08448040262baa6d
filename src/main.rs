use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cobot_logger::data::duration::{format_duration, parse_duration};
use cobot_logger::store::{self, SampleLog};
use cobot_logger::{app, events, AcquisitionLoop, BridgeConnector, Monitor, Settings};
use cobot_types::JobId;

#[derive(Parser, Debug)]
#[command(name = "cobot-logger")]
#[command(about = "Log production rate and liveness of a networked cobot controller")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sample database, overrides storage.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire telemetry and log samples until interrupted
    Run {
        /// Telemetry bridge address (host:port)
        #[arg(short, long)]
        address: Option<String>,

        /// Data timeout (e.g., "5s", "2500ms")
        #[arg(long, value_parser = duration_arg)]
        data_timeout: Option<Duration>,

        /// Cycle timeout (e.g., "60s", "2m")
        #[arg(long, value_parser = duration_arg)]
        cycle_timeout: Option<Duration>,

        /// Target rate in parts per hour
        #[arg(long)]
        target: Option<f64>,

        /// Log to this job instead of the most recent one
        #[arg(long, conflicts_with = "new_job")]
        job: Option<i64>,

        /// Create a job with this name and log to it
        #[arg(long)]
        new_job: Option<String>,
    },

    /// List jobs, newest first
    Jobs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a job
    NewJob {
        /// Job name (e.g., "Line2_ValveCaps")
        name: String,
    },

    /// Export a job's samples as CSV
    Export {
        /// Job id (see `jobs`)
        #[arg(short, long)]
        job: i64,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        settings.storage.path = db;
    }

    match args.command {
        Command::Run {
            address,
            data_timeout,
            cycle_timeout,
            target,
            job,
            new_job,
        } => {
            if let Some(address) = address {
                settings.device.address = address;
            }
            if let Some(timeout) = data_timeout {
                settings.health.data_timeout_secs = timeout.as_secs_f64();
            }
            if let Some(timeout) = cycle_timeout {
                settings.health.cycle_timeout_secs = timeout.as_secs_f64();
            }
            if let Some(target) = target {
                settings.rate.target_per_hour = target;
            }
            settings.validate()?;
            run(&settings, job.map(JobId), new_job).await
        }
        Command::Jobs { json } => list_jobs(&settings, json),
        Command::NewJob { name } => {
            let mut log = open_log(&settings)?;
            let job = log.create_job(&name)?;
            println!("Created job {} ({})", job.id, job.name);
            log.close()?;
            Ok(())
        }
        Command::Export { job, out } => export(&settings, JobId(job), out),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn open_log(settings: &Settings) -> Result<SampleLog> {
    let path = &settings.storage.path;
    SampleLog::open_with(path, settings.storage.commit_every)
        .with_context(|| format!("Failed to open sample log at {}", path.display()))
}

/// Acquire and log until Ctrl-C.
async fn run(settings: &Settings, job: Option<JobId>, new_job: Option<String>) -> Result<()> {
    let log = open_log(settings)?;
    let mut monitor = Monitor::open(log, settings.monitor())?;
    if let Some(name) = new_job {
        monitor.create_job(&name)?;
    } else if let Some(id) = job {
        monitor.select_job(id)?;
    }
    match monitor.active_job() {
        Some(job) => info!("Logging to job {} ({})", job.name, job.id),
        None => warn!("No job yet; samples are not logged until one is created with `new-job`"),
    }

    let (tx, rx) = events::channel();
    let connector = BridgeConnector::new(tokio::runtime::Handle::current());
    let handle = AcquisitionLoop::start(connector, settings.acquisition(), tx)
        .context("Failed to start acquisition thread")?;
    info!("Polling {}", settings.device.address);

    app::run(&mut monitor, rx, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    })
    .await;

    let grace = settings.shutdown_grace();
    if !handle.shutdown(grace).await {
        warn!(
            "Acquisition did not confirm shutdown within {}",
            format_duration(grace)
        );
    }

    monitor
        .close()
        .context("Failed to commit pending samples")?;
    info!("Sample log closed");
    Ok(())
}

fn list_jobs(settings: &Settings, json: bool) -> Result<()> {
    let log = open_log(settings)?;
    let jobs = log.list_jobs()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{:>5}  {}  {}",
            job.id,
            store::format_timestamp(job.started_at_ms)?,
            job.name
        );
    }
    Ok(())
}

fn export(settings: &Settings, job: JobId, out: Option<PathBuf>) -> Result<()> {
    let log = open_log(settings)?;
    if log.job(job)?.is_none() {
        bail!("No job with id {}", job);
    }
    let samples = log.export(job)?;

    match out {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            store::write_csv(BufWriter::new(file), &samples)?;
            info!("Exported {} samples to {}", samples.len(), path.display());
        }
        None => store::write_csv(io::stdout().lock(), &samples)?,
    }
    Ok(())
}
