use anyhow::{Context, Result};
use civicrs::core::fingerprint::FingerprintService;
use civicrs::core::geo::Coordinates;
use civicrs::core::lifecycle::StatusChange;
use civicrs::core::settings::Settings;
use civicrs::database::models::{Actor, Category, ReportStatus, Role};
use civicrs::database::{get_database_path, ReportFilter, SqliteStore};
use civicrs::services::{ReportDraft, ReportService};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "civicrs", version, about = "Triage civic issue reports")]
struct Cli {
    /// SQLite database (default: platform data dir)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// JSON settings file, used instead of the stored settings
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit and manage reports
    Report {
        #[command(subcommand)]
        command: ReportCmd,
    },

    /// Manage reporter profiles
    Reporter {
        #[command(subcommand)]
        command: ReporterCmd,
    },

    /// Estimate resolution time for a category
    Predict {
        #[arg(value_name = "CATEGORY")]
        category: Category,
    },

    /// Report statistics (admin only)
    Analytics {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "admin")]
        role: Role,
    },

    /// Show or change engine settings
    Settings {
        #[command(subcommand)]
        command: SettingsCmd,
    },

    /// Print the perceptual fingerprint of one or more photos
    Fingerprint {
        #[arg(value_name = "FILE", required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ReportCmd {
    /// Submit a new report
    Submit {
        #[arg(long)]
        reporter: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Category,
        #[arg(long)]
        description: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Photo of the issue
        #[arg(long, value_name = "FILE")]
        photo: PathBuf,
        /// Image classifier label (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Move a report to a new status
    Status {
        id: String,
        #[arg(long)]
        status: ReportStatus,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "authority")]
        role: Role,
        #[arg(long)]
        resolution_photo: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        duplicate_of: Option<String>,
    },

    /// Show a single report
    Show { id: String },

    /// List reports visible to an actor, newest first
    List {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long)]
        status: Option<ReportStatus>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        reporter: Option<String>,
    },

    /// Delete a report and claw back its points
    Delete {
        id: String,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },

    /// Toggle the actor's upvote on a report
    Upvote {
        id: String,
        #[arg(long)]
        actor: String,
    },

    /// Comment on a report
    Comment {
        id: String,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long)]
        text: String,
    },

    /// List comments on a report
    Comments { id: String },
}

#[derive(Subcommand, Debug)]
enum ReporterCmd {
    /// Create a profile or change its role
    Add {
        id: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },

    /// Show a profile
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
    /// Print the effective settings
    Show,

    /// Persist a single setting
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or("RUST_LOG", "info"));

    let cli = Cli::parse();

    if let Commands::Fingerprint { paths } = &cli.command {
        return fingerprint_files(paths);
    }

    let db_path = match cli.db {
        Some(path) => path,
        None => get_database_path().context("Failed to resolve database path")?,
    };
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;

    let mut settings = store.load_settings().context("Failed to load settings")?;
    if let Some(path) = &cli.settings {
        settings = Settings::from_json_file(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
    }

    let service = ReportService::with_settings(store, settings);

    match cli.command {
        Commands::Report { command } => run_report(&service, command)?,

        Commands::Reporter { command } => match command {
            ReporterCmd::Add { id, role } => print_json(&service.register_reporter(&id, role)?)?,
            ReporterCmd::Show { id } => print_json(&service.get_reporter(&id)?)?,
        },

        Commands::Predict { category } => {
            print_json(&service.estimate_resolution_time(category)?)?
        }

        Commands::Analytics { actor, role } => {
            print_json(&service.analytics(&Actor::new(actor, role))?)?
        }

        Commands::Settings { command } => match command {
            SettingsCmd::Show => print_json(service.settings())?,
            SettingsCmd::Set { key, value } => {
                let mut updated = service.store().load_settings()?;
                updated
                    .set(&key, &value)
                    .with_context(|| format!("Cannot set {}", key))?;
                service
                    .store()
                    .save_settings(&updated)
                    .context("Failed to save settings")?;
                info!("Saved {} = {}", key, value);
                print_json(&updated)?;
            }
        },

        Commands::Fingerprint { .. } => {}
    }

    Ok(())
}

fn run_report(service: &ReportService<SqliteStore>, command: ReportCmd) -> Result<()> {
    match command {
        ReportCmd::Submit {
            reporter,
            title,
            category,
            description,
            lat,
            lon,
            photo,
            labels,
        } => {
            let image_bytes =
                fs::read(&photo).with_context(|| format!("Failed to read photo {:?}", photo))?;
            let draft = ReportDraft {
                reporter_id: reporter,
                title,
                category,
                description,
                coordinates: Coordinates::new(lat, lon)?,
                image_bytes,
                classifier_labels: labels,
            };
            print_json(&service.submit(draft)?)?;
        }

        ReportCmd::Status {
            id,
            status,
            actor,
            role,
            resolution_photo,
            reason,
            duplicate_of,
        } => {
            let change = StatusChange {
                new_status: status,
                resolution_photo_ref: resolution_photo,
                rejection_reason: reason,
                duplicate_of,
            };
            let report = service.update_status(&id, change, &Actor::new(actor, role))?;
            print_json(&report)?;
        }

        ReportCmd::Show { id } => print_json(&service.get_report(&id)?)?,

        ReportCmd::List {
            actor,
            role,
            status,
            category,
            reporter,
        } => {
            let filter = ReportFilter {
                reporter_id: reporter,
                status,
                category,
                ..ReportFilter::default()
            };
            print_json(&service.list_reports(&Actor::new(actor, role), filter)?)?;
        }

        ReportCmd::Delete { id, actor, role } => {
            print_json(&service.delete_report(&id, &Actor::new(actor, role))?)?
        }

        ReportCmd::Upvote { id, actor } => {
            print_json(&service.toggle_upvote(&id, &Actor::new(actor, Role::User))?)?
        }

        ReportCmd::Comment {
            id,
            actor,
            role,
            text,
        } => print_json(&service.add_comment(&id, &Actor::new(actor, role), &text)?)?,

        ReportCmd::Comments { id } => print_json(&service.list_comments(&id)?)?,
    }

    Ok(())
}

/// Fingerprint every file in parallel; with exactly two readable photos also
/// print their distance.
fn fingerprint_files(paths: &[PathBuf]) -> Result<()> {
    let contents: Vec<(String, Vec<u8>)> = paths
        .iter()
        .map(|path| -> Result<(String, Vec<u8>)> {
            let bytes =
                fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            Ok((path.display().to_string(), bytes))
        })
        .collect::<Result<_>>()?;

    let inputs: Vec<(&str, &[u8])> = contents
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
        .collect();

    let service = FingerprintService::new();
    let results = service.fingerprint_batch(&inputs);

    let entries: Vec<_> = results
        .iter()
        .map(|(name, result)| match result {
            Ok(fingerprint) => json!({ "path": name, "fingerprint": fingerprint.to_hex() }),
            Err(err) => json!({ "path": name, "error": err.to_string() }),
        })
        .collect();

    let distance = match results.as_slice() {
        [(_, Ok(a)), (_, Ok(b))] => Some(a.distance(b)?),
        _ => None,
    };

    print_json(&json!({ "fingerprints": entries, "distance": distance }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
