use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// D-Bus proxy for the presenced daemon.
#[zbus::proxy(
    interface = "org.freedesktop.Presence1",
    default_service = "org.freedesktop.Presence1",
    default_path = "/org/freedesktop/Presence1"
)]
trait Presence {
    async fn enroll(&self, id: &str, display_name: &str, embedding_json: &str)
        -> zbus::Result<String>;
    async fn update_embedding(&self, id: &str, embedding_json: &str) -> zbus::Result<bool>;
    async fn rename(&self, id: &str, display_name: &str) -> zbus::Result<String>;
    async fn remove_identity(&self, id: &str) -> zbus::Result<bool>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn record_attendance(&self, identity_id: &str) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn attendance_for_identity(&self, identity_id: &str) -> zbus::Result<String>;
    async fn attendance_between(&self, from: &str, to: &str) -> zbus::Result<String>;
    async fn detect(
        &self,
        frame_json: &str,
        width: u32,
        height: u32,
        manual: bool,
    ) -> zbus::Result<String>;
    async fn set_auto_detection(&self, enabled: bool) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from an embedding file (JSON array of floats)
    Enroll {
        /// Display name for the identity
        name: String,
        /// Path to the embedding JSON file
        #[arg(short, long)]
        embedding: PathBuf,
        /// Explicit identity id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Replace the embedding of an enrolled identity
    Reenroll {
        /// Identity id
        id: String,
        /// Path to the embedding JSON file
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Change an identity's display name
    Rename {
        /// Identity id
        id: String,
        /// New display name
        name: String,
    },
    /// Remove an enrolled identity
    Remove {
        /// Identity id
        id: String,
    },
    /// List enrolled identities
    List,
    /// Record attendance for an identity manually
    Record {
        /// Identity id
        identity_id: String,
    },
    /// Show attendance events
    Attendance {
        /// Only events for this identity
        #[arg(long)]
        identity: Option<String>,
        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        from: Option<String>,
        /// Inclusive upper bound (RFC 3339)
        #[arg(long)]
        to: Option<String>,
    },
    /// Offer a frame payload (face-observation JSON) for detection
    Detect {
        /// Path to the observation JSON file
        #[arg(short, long)]
        frame: PathBuf,
        /// Mark the capture as operator-initiated
        #[arg(long)]
        manual: bool,
    },
    /// Enable or disable automatic detection
    Auto {
        /// "on" or "off"
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
    /// Show daemon status
    Status,
}

/// Re-indent a JSON payload for terminal output; print raw if not JSON.
fn print_json(payload: &str) {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{payload}"),
        },
        Err(_) => println!("{payload}"),
    }
}

fn read_embedding(path: &PathBuf) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding file {}", path.display()))?;
    // Validate locally so the daemon never sees junk.
    serde_json::from_str::<Vec<f32>>(&raw)
        .with_context(|| format!("{} is not a JSON array of floats", path.display()))?;
    Ok(raw)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to session bus")?;
    let proxy = PresenceProxy::new(&connection)
        .await
        .context("connecting to presenced")?;

    match cli.command {
        Commands::Enroll { name, embedding, id } => {
            let embedding_json = read_embedding(&embedding)?;
            let created = proxy
                .enroll(id.as_deref().unwrap_or(""), &name, &embedding_json)
                .await?;
            print_json(&created);
        }
        Commands::Reenroll { id, embedding } => {
            let embedding_json = read_embedding(&embedding)?;
            proxy.update_embedding(&id, &embedding_json).await?;
            println!("re-enrolled {id}");
        }
        Commands::Rename { id, name } => {
            let updated = proxy.rename(&id, &name).await?;
            print_json(&updated);
        }
        Commands::Remove { id } => {
            proxy.remove_identity(&id).await?;
            println!("removed {id}");
        }
        Commands::List => {
            let identities = proxy.list_identities().await?;
            print_json(&identities);
        }
        Commands::Record { identity_id } => {
            let event = proxy.record_attendance(&identity_id).await?;
            print_json(&event);
        }
        Commands::Attendance { identity, from, to } => {
            let events = match identity {
                Some(identity) => proxy.attendance_for_identity(&identity).await?,
                None if from.is_some() || to.is_some() => {
                    proxy
                        .attendance_between(from.as_deref().unwrap_or(""), to.as_deref().unwrap_or(""))
                        .await?
                }
                None => proxy.list_attendance().await?,
            };
            print_json(&events);
        }
        Commands::Detect { frame, manual } => {
            let payload = std::fs::read_to_string(&frame)
                .with_context(|| format!("reading frame file {}", frame.display()))?;
            let report = proxy.detect(&payload, 0, 0, manual).await?;
            print_json(&report);
        }
        Commands::Auto { mode } => {
            let enabled = proxy.set_auto_detection(mode == "on").await?;
            println!("auto detection {}", if enabled { "on" } else { "off" });
        }
        Commands::Status => {
            let status = proxy.status().await?;
            print_json(&status);
        }
    }

    Ok(())
}
