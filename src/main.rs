use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use rx_extractor::{
    health, ConnectionManager, Extractor, OpenAiClient, Pipeline, PipelineError,
    PrescriptionStore, Settings,
};

#[derive(Parser)]
#[command(name = "rx_extractor", about = "Extract structured prescriptions from free text")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    Init,
    /// Extract a prescription from text and store it
    Process {
        /// Prescription text (default: read from --file or stdin)
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,
        /// Read prescription text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show one stored prescription
    Show {
        id: i64,
    },
    /// List recently stored prescriptions
    History {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show row counts
    Stats,
    /// Liveness check
    Health,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = run(cli.command);

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load() -> anyhow::Result<(Settings, PrescriptionStore)> {
    let settings = Settings::load().context("Failed to load settings")?;
    info!(?settings, "Settings loaded");
    let store = PrescriptionStore::new(ConnectionManager::new(&settings.database));
    Ok((settings, store))
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        // Liveness must not depend on settings, the database or the service.
        Commands::Health => {
            println!("{}", serde_json::to_string(&health())?);
            Ok(())
        }
        Commands::Init => {
            let (settings, store) = load()?;
            store.initialize()?;
            println!("Tables ready in {:?}", settings.database.path);
            Ok(())
        }
        Commands::Process { text, file } => {
            let text = read_input(text, file)?;
            let (settings, store) = load()?;
            let client = OpenAiClient::new(&settings.extraction)?;
            let pipeline = Pipeline::new(Extractor::new(client), store);
            match pipeline.process(&text) {
                Ok(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                Err(e @ PipelineError::Storage { .. }) => {
                    if let Some(record) = e.extracted() {
                        println!("{}", serde_json::to_string_pretty(record)?);
                    }
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Show { id } => {
            let (_, store) = load()?;
            match store.fetch(id)? {
                Some(row) => {
                    println!("Prescription #{} (stored {})", row.id, row.created_at);
                    println!("{}", serde_json::to_string_pretty(&row.record)?);
                    Ok(())
                }
                None => bail!("No prescription with id {}", id),
            }
        }
        Commands::History { limit } => {
            let (_, store) = load()?;
            let rows = store.recent(limit)?;
            if rows.is_empty() {
                println!("No prescriptions stored yet.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<12} | {:<20} | {:<28} | {:<10} | {:<19}",
                "#", "Rx", "Patient", "Medication", "Written", "Stored"
            );
            println!("{}", "-".repeat(108));
            for r in &rows {
                let written = r
                    .date_written
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:>5} | {:<12} | {:<20} | {:<28} | {:<10} | {:<19}",
                    r.id,
                    truncate(&r.rx_number, 12),
                    truncate(&r.patient_name, 20),
                    truncate(&r.medication, 28),
                    written,
                    r.created_at
                );
            }
            println!("\n{} prescriptions", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let (_, store) = load()?;
            let c = store.table_counts()?;
            println!("Prescriptions: {}", c.prescriptions);
            println!("Medications:   {}", c.medications);
            println!("Dosages:       {}", c.dosages);
            Ok(())
        }
    }
}

fn read_input(text: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(t) = text {
        return Ok(t);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read prescription text from stdin")?;
    Ok(buf)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
