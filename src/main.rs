use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rollcall::engine::{AttendanceEngine, MarkResponse};
use rollcall::geo::{Coordinate, Geofence};
use rollcall::types::AttendanceStatus;
use rollcall::{settings, storage};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    version,
    about = "Classroom attendance with geofence and credential checks"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "rollcall.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a class, optionally with a geofence
    AddClass {
        name: String,
        #[arg(long, allow_hyphen_values = true, requires_all = ["longitude", "radius"])]
        latitude: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires_all = ["latitude", "radius"])]
        longitude: Option<f64>,
        /// Geofence radius in meters
        #[arg(long, requires_all = ["latitude", "longitude"])]
        radius: Option<f64>,
    },
    /// Replace the geofence of a class
    SetGeofence {
        class_id: i32,
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,
        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,
        #[arg(long)]
        radius: f64,
    },
    /// Remove the geofence of a class
    ClearGeofence { class_id: i32 },
    /// Mark attendance for a subject from a reported position
    Mark {
        subject: String,
        class_id: i32,
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,
        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,
    },
    /// Record a staff decision for a subject, class and day
    MarkManual {
        subject: String,
        class_id: i32,
        /// PRESENT, ABSENT, LATE or EXCUSED
        #[arg(long)]
        status: AttendanceStatus,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        note: Option<String>,
    },
    /// List attendance for a class on a date (defaults to today)
    Roster {
        class_id: i32,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List the attendance history of a subject
    History { subject: String },
    /// Remove the biometric credential of a subject
    RevokeCredential { subject: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = Arc::new(storage::init(&settings.database).await?);
    let engine = AttendanceEngine::from_settings(Arc::clone(&db), &settings);

    match cli.command {
        Command::AddClass {
            name,
            latitude,
            longitude,
            radius,
        } => {
            let geofence = match (latitude, longitude, radius) {
                (Some(lat), Some(lon), Some(r)) => Some(Geofence::new(Coordinate::new(lat, lon)?, r)?),
                _ => None,
            };
            let class = storage::create_class(&db, &name, geofence).await?;
            print_json(&class)?;
        }
        Command::SetGeofence {
            class_id,
            latitude,
            longitude,
            radius,
        } => {
            let geofence = Geofence::new(Coordinate::new(latitude, longitude)?, radius)?;
            let class = storage::set_class_geofence(&db, class_id, Some(geofence))
                .await?
                .ok_or_else(|| miette::miette!("class {class_id} not found"))?;
            print_json(&class)?;
        }
        Command::ClearGeofence { class_id } => {
            let class = storage::set_class_geofence(&db, class_id, None)
                .await?
                .ok_or_else(|| miette::miette!("class {class_id} not found"))?;
            print_json(&class)?;
        }
        Command::Mark {
            subject,
            class_id,
            latitude,
            longitude,
        } => {
            let reported = Coordinate::new(latitude, longitude)?;
            let outcome = engine.mark_with_geofence(&subject, class_id, reported).await?;
            print_json(&MarkResponse::from(&outcome))?;
        }
        Command::MarkManual {
            subject,
            class_id,
            status,
            date,
            note,
        } => {
            let date = date.unwrap_or_else(|| engine.today());
            let outcome = engine
                .mark_manually(&subject, class_id, date, status, note)
                .await?;
            print_json(&MarkResponse::from(&outcome))?;
        }
        Command::Roster { class_id, date } => {
            let date = date.unwrap_or_else(|| engine.today());
            print_json(&engine.class_roster(class_id, date).await?)?;
        }
        Command::History { subject } => {
            print_json(&engine.subject_history(&subject).await?)?;
        }
        Command::RevokeCredential { subject } => {
            let revoked = engine.revoke_credential(&subject).await?;
            print_json(&serde_json::json!({ "subject": subject, "revoked": revoked }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{out}");
    Ok(())
}
