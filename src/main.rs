use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use roster_lib::config::{default_config_path, Settings};
use roster_lib::database::local::{children, occurrences, points, queue, routes};
use roster_lib::database::remote::SupabaseClient;
use roster_lib::database::Db;
use roster_lib::models::sync::SyncStatus;
use roster_lib::services::{reports, roster, SyncCoordinator};

#[derive(Parser)]
#[clap(name = "roster", about = "School transport roster with offline-first cloud sync")]
#[clap(version)]
struct Cli {
    /// Path to the configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue depth, last sync and connectivity settings
    Status,

    /// Send queued changes now (downloading first on a fresh install)
    Sync,

    /// Pull server state into the local store
    Download {
        /// Download even if this installation has synced before
        #[clap(long)]
        force: bool,
    },

    /// Keep syncing on an interval until interrupted
    Watch,

    /// Print routes with their points and children
    #[clap(name = "ls")]
    List,

    #[clap(name = "add-route")]
    AddRoute {
        name: String,
        #[clap(long)]
        description: Option<String>,
    },

    #[clap(name = "add-point")]
    AddPoint {
        /// Route id
        route: String,
        name: String,
        #[clap(long)]
        address: Option<String>,
    },

    #[clap(name = "add-child")]
    AddChild {
        /// Point id
        point: String,
        name: String,
        #[clap(long)]
        responsible: Option<String>,
        #[clap(long)]
        contact: Option<String>,
    },

    /// Remove a route, point or child (and everything under it)
    #[clap(name = "rm")]
    Remove {
        #[clap(value_enum)]
        kind: EntityKind,
        id: String,
    },

    /// Mark a child present (or absent) for a day
    Mark {
        /// Child id
        child: String,
        #[clap(long)]
        absent: bool,
        /// Day as YYYY-MM-DD; defaults to today
        #[clap(long)]
        date: Option<NaiveDate>,
    },

    /// Incident notes
    #[clap(subcommand)]
    Occurrence(OccurrenceCommands),

    /// Monthly attendance report as CSV
    Report {
        /// Month as YYYY-MM; defaults to the current month
        #[clap(long, value_parser = parse_month)]
        month: Option<(i32, u32)>,
        /// Write to this file, or into this directory as relatorio_YYYY_MM.csv
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Weekday attendance calendar for one child
    Calendar {
        child: String,
        #[clap(long, value_parser = parse_month)]
        month: Option<(i32, u32)>,
    },
}

#[derive(Subcommand)]
enum OccurrenceCommands {
    Add {
        /// Child id
        child: String,
        /// Kind of incident, e.g. "Atraso"
        kind: String,
        #[clap(long)]
        observation: Option<String>,
        #[clap(long)]
        date: Option<NaiveDate>,
    },
    #[clap(name = "ls")]
    List,
    #[clap(name = "rm")]
    Remove { id: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EntityKind {
    Route,
    Point,
    Child,
}

fn parse_month(value: &str) -> Result<(i32, u32), String> {
    let (year, month) = value
        .split_once('-')
        .ok_or_else(|| format!("expected YYYY-MM, got '{}'", value))?;
    let year: i32 = year.parse().map_err(|_| format!("invalid year '{}'", year))?;
    let month: u32 = month.parse().map_err(|_| format!("invalid month '{}'", month))?;
    if !(1..=12).contains(&month) {
        return Err(format!("month out of range: {}", month));
    }
    Ok((year, month))
}

fn current_month() -> (i32, u32) {
    let today = Utc::now().date_naive();
    (today.year(), today.month())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("ROSTER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn sync_coordinator(db: &Db, settings: &Settings) -> Result<SyncCoordinator<SupabaseClient>> {
    let client = roster_lib::connect_backend(settings)
        .ok_or_else(|| anyhow!("no [backend] section in the configuration"))?
        .context("failed to build backend client")?;
    if settings.auth.is_none() {
        bail!("no [auth] section in the configuration");
    }
    Ok(roster_lib::coordinator(db, client, settings))
}

fn format_status(status: &SyncStatus) -> String {
    let mut lines = vec![
        format!("online:      {}", status.online),
        format!("phase:       {}", status.phase.as_str()),
        format!("pending:     {}", status.pending),
        format!("dropped:     {}", status.dropped),
    ];
    match status.last_synced_at {
        Some(at) => lines.push(format!("last sync:   {}", at.to_rfc3339())),
        None => lines.push("last sync:   never".to_string()),
    }
    lines.push(format!("signed in:   {}", status.signed_in));
    if let Some(message) = &status.message {
        lines.push(format!("message:     {}", message));
    }
    lines.join("\n")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let settings = Settings::load_or_default(&config_path)?;
    let db = roster_lib::open_store(&settings)
        .await
        .map_err(|e| anyhow!(e))?;
    let pool = &db.0;

    match cli.command {
        Commands::Status => {
            let pending = queue::depth(pool)
                .await
                .map_err(|e| anyhow!(e))?;
            match sync_coordinator(&db, &settings) {
                Ok(sync) => println!("{}", format_status(&sync.status().await?)),
                Err(e) => {
                    println!("pending:     {}", pending);
                    println!("offline:     {:#}", e);
                }
            }
        }

        Commands::Sync => {
            let sync = sync_coordinator(&db, &settings)?;
            if let Some(stats) = sync.trigger_initial_download(&identity(&settings)?).await? {
                println!("{}", stats.summary());
            }
            match sync.trigger_sync(&identity(&settings)?).await? {
                Some(counts) => println!("{}", counts.summary()),
                None => println!("A sync pass is already running"),
            }
        }

        Commands::Download { force } => {
            let sync = sync_coordinator(&db, &settings)?;
            let who = identity(&settings)?;
            let stats = if force {
                Some(roster_lib::services::download_and_merge(pool, sync.backend(), &who).await?)
            } else {
                sync.trigger_initial_download(&who).await?
            };
            match stats {
                Some(stats) => println!("{}", stats.summary()),
                None => println!("Already synced; use --force to download again"),
            }
        }

        Commands::Watch => {
            let sync = sync_coordinator(&db, &settings)?;
            let mut ticker = tokio::time::interval(settings.interval());
            log::info!("watching, syncing every {:?}", settings.interval());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sync.tick().await {
                            Ok(Some(counts)) => log::info!("{}", counts.summary()),
                            Ok(None) => {}
                            Err(e) => log::warn!("sync pass failed: {}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("interrupted, stopping");
                        break;
                    }
                }
            }
        }

        Commands::List => {
            for route in routes::list_routes(pool).await {
                println!("{}  {}", route.id, route.name);
                for point in points::points_by_route(pool, &route.id).await {
                    println!("  {}  {}", point.id, point.name);
                    for child in children::children_by_point(pool, &point.id).await {
                        println!("    {}  {}", child.id, child.name);
                    }
                }
            }
        }

        Commands::AddRoute { name, description } => {
            let route = roster::create_route(pool, name, description)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("{}", route.id);
        }

        Commands::AddPoint {
            route,
            name,
            address,
        } => {
            if routes::get_route(pool, &route).await.is_none() {
                bail!("no route with id {}", route);
            }
            let point = roster::create_point(pool, route, name, address)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("{}", point.id);
        }

        Commands::AddChild {
            point,
            name,
            responsible,
            contact,
        } => {
            if points::get_point(pool, &point).await.is_none() {
                bail!("no point with id {}", point);
            }
            let child = roster::create_child(pool, point, name, responsible, contact)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("{}", child.id);
        }

        Commands::Remove { kind, id } => {
            let removed = match kind {
                EntityKind::Route => roster::delete_route(pool, &id).await.map(|r| r.is_some()),
                EntityKind::Point => roster::delete_point(pool, &id).await.map(|p| p.is_some()),
                EntityKind::Child => roster::delete_child(pool, &id).await.map(|c| c.is_some()),
            }
            .map_err(|e| anyhow!(e))?;
            if !removed {
                bail!("nothing with id {}", id);
            }
        }

        Commands::Mark {
            child,
            absent,
            date,
        } => {
            if children::get_child(pool, &child).await.is_none() {
                bail!("no child with id {}", child);
            }
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let marked = roster::mark_attendance(pool, &child, date, !absent)
                .await
                .map_err(|e| anyhow!(e))?;
            let record = marked.record();
            println!(
                "{} {} {}",
                record.date,
                record.child_id,
                if record.present { "present" } else { "absent" }
            );
        }

        Commands::Occurrence(OccurrenceCommands::Add {
            child,
            kind,
            observation,
            date,
        }) => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let occurrence =
                occurrences::add_occurrence(pool, child, kind, observation, date).await;
            println!("{}", occurrence.id);
        }

        Commands::Occurrence(OccurrenceCommands::List) => {
            for o in occurrences::list_occurrences(pool).await {
                println!(
                    "{}  {}  {}  {}  {}",
                    o.id,
                    o.date,
                    o.child_id,
                    o.occurrence_type,
                    o.observation.unwrap_or_default()
                );
            }
        }

        Commands::Occurrence(OccurrenceCommands::Remove { id }) => {
            if !occurrences::delete_occurrence(pool, &id).await {
                bail!("no occurrence with id {}", id);
            }
        }

        Commands::Report { month, output } => {
            let (year, month) = month.unwrap_or_else(current_month);
            let rows = reports::monthly_report(pool, year, month)
                .await
                .map_err(|e| anyhow!(e))?;
            let csv = reports::report_csv(&rows);

            match output {
                Some(path) => {
                    let path = if path.is_dir() {
                        path.join(reports::report_file_name(year, month))
                    } else {
                        path
                    };
                    std::fs::write(&path, csv)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => println!("{}", csv),
            }
        }

        Commands::Calendar { child, month } => {
            let (year, month) = month.unwrap_or_else(current_month);
            let days = reports::month_calendar(pool, &child, year, month)
                .await
                .map_err(|e| anyhow!(e))?;
            for day in days {
                let mark = match day.present {
                    Some(true) => "P",
                    Some(false) => "F",
                    None => "-",
                };
                println!("{} {:?} {}", day.date, day.weekday, mark);
            }
        }
    }

    Ok(())
}

fn identity(settings: &Settings) -> Result<roster_lib::models::sync::Identity> {
    settings
        .identity()
        .ok_or_else(|| anyhow!("no [auth] section in the configuration"))
}
