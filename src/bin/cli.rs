// Relisten Offline - offline track storage for archival concert recordings
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use relisten_offline::download::{DownloadCoordinator, HttpTransferAgent, OfflineEvent};
use relisten_offline::library::OfflineLibrary;
use relisten_offline::storage::{queries, Database};
use relisten_offline::{OfflineConfig, OfflineError, StorageLayout, TrackDescriptor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

/// How long `delete` waits for the background file removal
const DELETE_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "offline-cli")]
#[command(about = "Relisten offline CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file, overrides --data-dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one track and wait until it settles
    Download {
        #[arg(long)]
        track: Uuid,
        #[arg(long)]
        source: Uuid,
        #[arg(long)]
        show: Uuid,
        #[arg(long)]
        artist: Uuid,
        #[arg(long)]
        url: Url,
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Remove one track from offline storage
    Delete {
        #[arg(long)]
        track: Uuid,
    },
    /// Remove every offline track
    Wipe,
    /// Show disk usage, for one source or in total
    Usage {
        #[arg(long)]
        source: Option<Uuid>,
    },
    /// List offline sources, newest first
    List {
        #[arg(long)]
        artist: Option<Uuid>,
    },
    /// Show a track's offline state
    Status {
        #[arg(long)]
        track: Uuid,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<OfflineConfig> {
    if let Some(path) = &cli.config {
        return OfflineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    Ok(match &cli.data_dir {
        Some(dir) => OfflineConfig::for_data_dir(dir),
        None => OfflineConfig::default(),
    })
}

async fn start_coordinator(
    database: &Database,
    layout: &StorageLayout,
) -> anyhow::Result<DownloadCoordinator> {
    let agent = Arc::new(HttpTransferAgent::new()?);
    let coordinator = DownloadCoordinator::start(database.clone(), agent, layout.clone())
        .await
        .context("Failed to start download coordinator")?;

    let report = coordinator.recovery_report();
    if report.backlog_len > 0 || report.pending_deletions > 0 {
        println!(
            "Recovered {} queued track(s), {} pending deletion(s)",
            report.backlog_len, report.pending_deletions
        );
    }
    Ok(coordinator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    run(cli).await.map_err(|e| {
        match e.downcast_ref::<OfflineError>().map(OfflineError::user_message) {
            Some(message) => e.context(message),
            None => e,
        }
    })
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    let database = Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let layout = StorageLayout::new(&config.storage_dir);
    let library = OfflineLibrary::new(database.clone(), layout.clone());

    match cli.command {
        Commands::Download {
            track,
            source,
            show,
            artist,
            url,
            title,
        } => {
            let coordinator = start_coordinator(&database, &layout).await?;
            let descriptor = TrackDescriptor::new(track, source, show, artist, title, url);
            let (token, mut events) = coordinator.subscribe_channel();

            if !coordinator.download(&descriptor).await? {
                println!("Track {} needs no download", track);
            } else {
                while let Some(event) = events.recv().await {
                    match event {
                        OfflineEvent::TrackProgress { track: t, fraction } if t.track_id == track => {
                            eprint!("\r{:5.1}%", fraction * 100.0);
                        }
                        OfflineEvent::TrackFinished(t) if t.track_id == track => {
                            eprintln!();
                            if let Some(path) = library.offline_path(&track).await? {
                                println!("Downloaded to {}", path.display());
                            }
                            break;
                        }
                        OfflineEvent::TrackFailed { track: t, reason } if t.track_id == track => {
                            eprintln!();
                            coordinator.unsubscribe(token);
                            coordinator.shutdown().await?;
                            bail!("Download failed: {}", reason);
                        }
                        _ => {}
                    }
                }
            }

            coordinator.unsubscribe(token);
            coordinator.shutdown().await?;
        }
        Commands::Delete { track } => {
            let Some(record) = queries::find_track(database.pool(), &track).await? else {
                bail!("Track {} is not offline", track);
            };
            let descriptor = record.descriptor()?;

            let coordinator = start_coordinator(&database, &layout).await?;
            let (token, mut events) = coordinator.subscribe_channel();
            coordinator.delete(&descriptor).await?;

            let removed = tokio::time::timeout(DELETE_WAIT, async {
                while let Some(event) = events.recv().await {
                    if let OfflineEvent::TracksDeleted(tracks) = event {
                        if tracks.iter().any(|t| t.track_id == track) {
                            return true;
                        }
                    }
                }
                false
            })
            .await
            .unwrap_or(false);

            coordinator.unsubscribe(token);
            coordinator.shutdown().await?;
            if removed {
                println!("Deleted {}", track);
            } else {
                println!("Track {} marked for deletion, file removal retried on next start", track);
            }
        }
        Commands::Wipe => {
            let coordinator = start_coordinator(&database, &layout).await?;
            coordinator.delete_all_downloads().await?;
            coordinator.shutdown().await?;
            println!("Removed all offline tracks");
        }
        Commands::Usage { source } => {
            let usage = match source {
                Some(source_id) => library.disk_usage().disk_usage_for_source(&source_id).await?,
                None => library.disk_usage().total_disk_usage().await?,
            };
            println!("{} track(s), {} bytes", usage.track_count, usage.total_bytes);
        }
        Commands::List { artist } => {
            let sources = library.offline_sources(artist.as_ref()).await?;
            if sources.is_empty() {
                println!("No offline sources");
            }
            for source in sources {
                let usage = library.disk_usage().disk_usage_for_source(&source.source_id).await?;
                println!(
                    "{}  show {}  {} track(s)  {} bytes  added {}",
                    source.source_id,
                    source.show_id,
                    usage.track_count,
                    usage.total_bytes,
                    source.created_at.to_rfc3339()
                );
            }
        }
        Commands::Status { track } => {
            let state = library.track_state(&track).await?;
            println!("{}: {}", track, state.as_str());
            if let Some(path) = library.offline_path(&track).await? {
                println!("  file: {}", path.display());
            }
            if let Some(bytes) = library.disk_usage().disk_usage_for_track(&track).await? {
                println!("  size: {} bytes", bytes);
            }
        }
    }

    database.close().await?;
    Ok(())
}
