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


//! Download coordinator
//!
//! Public entry point of the offline subsystem. [`DownloadCoordinator`] is a
//! cheap, cloneable handle; every call becomes a command on one channel
//! consumed by a single worker task, so all coordinator state mutations are
//! linearized. Transfer agent callbacks travel through the same channel.
//!
//! # Concurrency Model
//! - One worker task owns the backlog, the active transfer table and all
//!   state store writes
//! - At most [`MAX_CONCURRENT_TRANSFERS`] transfers are started at once
//! - Event callbacks run on the worker task; calling back into the
//!   coordinator from a callback only enqueues a command, so it never
//!   deadlocks
//!
//! # Usage Example
//! ```no_run
//! use relisten_offline::download::{DownloadCoordinator, HttpTransferAgent};
//! use relisten_offline::{OfflineConfig, StorageLayout, storage::Database};
//! use std::sync::Arc;
//!
//! # async fn example(track: relisten_offline::TrackDescriptor) -> relisten_offline::Result<()> {
//! let config = OfflineConfig::default();
//! let database = Database::new(&config.database_path).await?;
//! let agent = Arc::new(HttpTransferAgent::new()?);
//! let coordinator =
//!     DownloadCoordinator::start(database, agent, StorageLayout::new(&config.storage_dir)).await?;
//!
//! coordinator.subscribe(|event| println!("{:?}", event));
//! coordinator.download(&track).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::MAX_CONCURRENT_TRANSFERS;
use crate::download::agent::{TransferAgent, TransferEvent};
use crate::download::events::{EventNotifier, OfflineEvent, SubscriptionToken};
use crate::download::worker::{CoordinatorWorker, FileRemoval};
use crate::error::{OfflineError, Result};
use crate::file::StorageLayout;
use crate::model::{Recording, TrackDescriptor, TrackId};
use crate::storage::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Callback invoked with the fraction complete of one transfer
pub type ProgressObserver = Box<dyn Fn(f32) + Send + Sync>;

/// Commands sent to the coordinator worker
pub(crate) enum CoordinatorCommand {
    Download {
        tracks: Vec<TrackDescriptor>,
        /// Raise one `TracksQueued` instead of one `TrackQueued` per track
        batch: bool,
        response_tx: Option<oneshot::Sender<Result<Vec<TrackDescriptor>>>>,
    },
    Delete {
        track_ids: Vec<TrackId>,
        response_tx: oneshot::Sender<Result<usize>>,
    },
    DeleteAll {
        response_tx: oneshot::Sender<Result<()>>,
    },
    ImportDownloaded {
        track: TrackDescriptor,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    IsQueued {
        track_id: TrackId,
        response_tx: oneshot::Sender<bool>,
    },
    IsActivelyDownloading {
        track_id: TrackId,
        response_tx: oneshot::Sender<bool>,
    },
    ObserveProgress {
        track_id: TrackId,
        observer: ProgressObserver,
        response_tx: oneshot::Sender<bool>,
    },
    Snapshot {
        response_tx: oneshot::Sender<CoordinatorSnapshot>,
    },
    /// Progress or completion reported by the transfer agent
    Transfer(TransferEvent),
    /// Background file removal finished
    FilesRemoved {
        removals: Vec<FileRemoval>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// What start-up recovery found and did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// `downloading` records reset to `queued`
    pub requeued: u64,
    /// Tracks placed in the rebuilt backlog
    pub backlog_len: usize,
    /// `deleting` records whose file removal was retried
    pub pending_deletions: usize,
    /// Partial transfer files removed from the storage directory
    pub orphans_removed: usize,
}

/// A track currently handed to the transfer agent
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub track: TrackDescriptor,
    pub progress: f32,
}

/// Point-in-time view of the coordinator's queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorSnapshot {
    /// In start order
    pub active: Vec<ActiveTrack>,
    /// In scheduling order
    pub backlog: Vec<TrackId>,
}

impl CoordinatorSnapshot {
    pub fn active_ids(&self) -> Vec<TrackId> {
        self.active.iter().map(|a| a.track.track_id).collect()
    }
}

/// Handle to the coordinator worker
#[derive(Clone)]
pub struct DownloadCoordinator {
    command_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    notifier: Arc<EventNotifier>,
    recovery: RecoveryReport,
}

impl DownloadCoordinator {
    /// Start the coordinator with its own event notifier
    ///
    /// Runs crash recovery before any command is accepted. Must be called
    /// within a tokio runtime.
    pub async fn start(
        database: Database,
        agent: Arc<dyn TransferAgent>,
        layout: StorageLayout,
    ) -> Result<Self> {
        Self::start_with_notifier(database, agent, layout, Arc::new(EventNotifier::new())).await
    }

    /// Start the coordinator raising events on an existing notifier
    ///
    /// Subscribers registered beforehand also see events raised during
    /// recovery.
    pub async fn start_with_notifier(
        database: Database,
        agent: Arc<dyn TransferAgent>,
        layout: StorageLayout,
        notifier: Arc<EventNotifier>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut worker = CoordinatorWorker::new(
            command_rx,
            command_tx.downgrade(),
            database,
            agent,
            layout,
            notifier.clone(),
        );
        let recovery = worker.recover().await?;
        info!(
            requeued = recovery.requeued,
            backlog = recovery.backlog_len,
            pending_deletions = recovery.pending_deletions,
            orphans_removed = recovery.orphans_removed,
            max_concurrent = MAX_CONCURRENT_TRANSFERS,
            "Download coordinator recovered"
        );

        tokio::spawn(worker.run());

        Ok(Self {
            command_tx,
            notifier,
            recovery,
        })
    }

    /// Result of the recovery pass run by `start`
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn events(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&OfflineEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionToken, mpsc::UnboundedReceiver<OfflineEvent>) {
        self.notifier.subscribe_channel()
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.notifier.unsubscribe(token)
    }

    // ===== Downloads =====

    /// Make a track available offline
    ///
    /// Returns false when no new work was needed: the track is already
    /// queued, already downloading, or downloaded with its file on disk.
    /// Transfer failures are reported through `TrackFailed` events, never
    /// through this result.
    pub async fn download(&self, track: &TrackDescriptor) -> Result<bool> {
        let queued = self
            .request(|response_tx| CoordinatorCommand::Download {
                tracks: vec![track.clone()],
                batch: false,
                response_tx: Some(response_tx),
            })
            .await??;
        Ok(!queued.is_empty())
    }

    /// Make every track of a recording available offline
    ///
    /// Raises a single `TracksQueued` event for the newly queued tracks,
    /// which are also returned.
    pub async fn download_recording(&self, recording: &Recording) -> Result<Vec<TrackDescriptor>> {
        self.request(|response_tx| CoordinatorCommand::Download {
            tracks: recording.tracks.clone(),
            batch: true,
            response_tx: Some(response_tx),
        })
        .await?
    }

    /// Enqueue a download without waiting for the outcome
    ///
    /// Safe to call from an event callback.
    pub fn request_download(&self, track: &TrackDescriptor) -> Result<()> {
        self.command_tx
            .send(CoordinatorCommand::Download {
                tracks: vec![track.clone()],
                batch: false,
                response_tx: None,
            })
            .map_err(|_| OfflineError::CoordinatorStopped)
    }

    /// Record a file already present at the track's layout path as downloaded
    pub async fn import_downloaded(&self, track: &TrackDescriptor) -> Result<bool> {
        self.request(|response_tx| CoordinatorCommand::ImportDownloaded {
            track: track.clone(),
            response_tx,
        })
        .await?
    }

    // ===== Deletion =====

    /// Remove a track from offline storage
    ///
    /// Returns once the record is `deleting` and any transfer is cancelled.
    /// The file is removed in the background; `TracksDeleted` follows.
    pub async fn delete(&self, track: &TrackDescriptor) -> Result<bool> {
        let marked = self.delete_ids(vec![track.track_id]).await?;
        Ok(marked > 0)
    }

    /// Remove every track of a recording, raising one `TracksDeleted` event
    pub async fn delete_recording(&self, recording: &Recording) -> Result<usize> {
        self.delete_ids(recording.track_ids().collect()).await
    }

    async fn delete_ids(&self, track_ids: Vec<TrackId>) -> Result<usize> {
        self.request(|response_tx| CoordinatorCommand::Delete {
            track_ids,
            response_tx,
        })
        .await?
    }

    /// Cancel every transfer, clear all records and empty the storage directory
    ///
    /// Completes all filesystem work before returning. Requests submitted
    /// while the wipe runs are processed after it.
    pub async fn delete_all_downloads(&self) -> Result<()> {
        self.request(|response_tx| CoordinatorCommand::DeleteAll { response_tx })
            .await?
    }

    /// Blocking variant of [`Self::delete_all_downloads`]
    ///
    /// For synchronous callers outside the async runtime. Panics if called
    /// from within an async context, and must not be called from an event
    /// callback.
    pub fn delete_all_downloads_blocking(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::DeleteAll { response_tx })
            .map_err(|_| OfflineError::CoordinatorStopped)?;
        response_rx
            .blocking_recv()
            .map_err(|_| OfflineError::CoordinatorStopped)?
    }

    // ===== Status =====

    /// Waiting for a slot, or handed to the agent but not yet running
    pub async fn is_queued(&self, track_id: TrackId) -> Result<bool> {
        self.request(|response_tx| CoordinatorCommand::IsQueued {
            track_id,
            response_tx,
        })
        .await
    }

    /// The agent reports the transfer as running
    pub async fn is_actively_downloading(&self, track_id: TrackId) -> Result<bool> {
        self.request(|response_tx| CoordinatorCommand::IsActivelyDownloading {
            track_id,
            response_tx,
        })
        .await
    }

    /// Register a progress callback for the track's transfer
    ///
    /// A track still in the backlog gets the observer attached when it
    /// starts. Returns false if the track is neither active nor queued.
    pub async fn observe_progress<F>(&self, track_id: TrackId, observer: F) -> Result<bool>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.request(|response_tx| CoordinatorCommand::ObserveProgress {
            track_id,
            observer: Box::new(observer),
            response_tx,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        self.request(|response_tx| CoordinatorCommand::Snapshot { response_tx })
            .await
    }

    /// Stop the worker after the commands already submitted
    ///
    /// Running transfers are cancelled and their records stay
    /// `downloading`, so the next start re-queues them.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response_tx| CoordinatorCommand::Shutdown { response_tx })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .map_err(|_| OfflineError::CoordinatorStopped)?;
        response_rx
            .await
            .map_err(|_| OfflineError::CoordinatorStopped)
    }
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}
