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


//! Coordinator worker
//!
//! Owns every piece of mutable coordinator state and processes
//! [`CoordinatorCommand`]s one at a time.
//!
//! # State Machine (per track)
//! ```text
//! unknown --download--> queued --slot--> downloading --ok--> downloaded
//! downloading --transient failure / bad content type--> queued (retry)
//! downloading --fatal failure--> unknown
//! any --delete--> deleting --file removed--> unknown
//! ```
//!
//! A track queued for retry goes back on the backlog only after the slot it
//! freed has been refilled, so it runs on the next queue fill at the
//! earliest.

use crate::config::MAX_CONCURRENT_TRANSFERS;
use crate::download::agent::{
    TransferAgent, TransferError, TransferEvent, TransferEventSink, TransferHandle,
    TransferOutcome, TransferRequest, TransferStatus,
};
use crate::download::backlog::Backlog;
use crate::download::coordinator::{
    ActiveTrack, CoordinatorCommand, CoordinatorSnapshot, ProgressObserver, RecoveryReport,
};
use crate::download::events::{EventNotifier, FailureReason, OfflineEvent};
use crate::error::{OfflineError, Result};
use crate::file::paths::remove_file_if_exists;
use crate::file::{StorageLayout, StorageScanner};
use crate::model::{TrackDescriptor, TrackId};
use crate::storage::models::{OfflineTrackRecord, TrackDownloadState};
use crate::storage::{queries, Database};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// In-flight transfer of one track
struct TrackDownload {
    track: TrackDescriptor,
    handle: TransferHandle,
    progress: f32,
    started_seq: u64,
    observers: Vec<ProgressObserver>,
}

/// Result of removing one track's file in the background
pub(crate) struct FileRemoval {
    record: OfflineTrackRecord,
    path: PathBuf,
    outcome: std::result::Result<(), String>,
}

pub(crate) struct CoordinatorWorker {
    command_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
    command_tx: mpsc::WeakUnboundedSender<CoordinatorCommand>,
    database: Database,
    agent: Arc<dyn TransferAgent>,
    layout: StorageLayout,
    notifier: Arc<EventNotifier>,
    backlog: Backlog,
    active: HashMap<TrackId, TrackDownload>,
    handles: HashMap<TransferHandle, TrackId>,
    /// Cancelled transfers whose `Finished` event has not arrived yet
    superseded: HashMap<TransferHandle, TrackId>,
    /// Observers registered while the track was still in the backlog
    pending_observers: HashMap<TrackId, Vec<ProgressObserver>>,
    /// Failed tracks to put back on the backlog once the current fill is done
    retries: Vec<(DateTime<Utc>, TrackDescriptor)>,
    next_seq: u64,
}

impl CoordinatorWorker {
    pub(crate) fn new(
        command_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
        command_tx: mpsc::WeakUnboundedSender<CoordinatorCommand>,
        database: Database,
        agent: Arc<dyn TransferAgent>,
        layout: StorageLayout,
        notifier: Arc<EventNotifier>,
    ) -> Self {
        Self {
            command_rx,
            command_tx,
            database,
            agent,
            layout,
            notifier,
            backlog: Backlog::new(),
            active: HashMap::new(),
            handles: HashMap::new(),
            superseded: HashMap::new(),
            pending_observers: HashMap::new(),
            retries: Vec::new(),
            next_seq: 0,
        }
    }

    // ===== Recovery =====

    /// Bring persisted state back to something schedulable
    ///
    /// 1. `downloading` records could not have survived the previous
    ///    process and go back to `queued`
    /// 2. The backlog is rebuilt from `queued` records, oldest first
    /// 3. File removal is retried for records stuck in `deleting`
    /// 4. Leftover partial transfer files are removed
    /// 5. Free slots are filled
    pub(crate) async fn recover(&mut self) -> Result<RecoveryReport> {
        self.layout.ensure_exists().await?;
        let pool = self.database.pool();
        let mut report = RecoveryReport::default();

        report.requeued = queries::requeue_interrupted(pool).await?;
        if report.requeued > 0 {
            info!(count = report.requeued, "Re-queued interrupted downloads");
        }

        for record in queries::tracks_in_state(pool, TrackDownloadState::Queued).await? {
            match record.descriptor() {
                Ok(track) => {
                    self.backlog.insert(record.created_at, track);
                }
                Err(e) => {
                    warn!(track = %record.track_id, error = %e, "Dropping unreadable queued record");
                    queries::remove_track(pool, &record.track_id).await?;
                }
            }
        }
        report.backlog_len = self.backlog.len();

        let stuck = queries::tracks_in_state(pool, TrackDownloadState::Deleting).await?;
        report.pending_deletions = stuck.len();
        if !stuck.is_empty() {
            info!(count = stuck.len(), "Retrying stuck deletions");
            self.schedule_file_removal(stuck);
        }

        let known: Vec<String> = queries::all_tracks(pool)
            .await?
            .into_iter()
            .map(|r| r.url)
            .collect();
        let scanner = StorageScanner::new(&self.layout);
        let scan = scanner.scan(known.iter().map(String::as_str)).await?;
        report.orphans_removed = scanner.remove_partial_files(&scan).await;
        if !scan.unreferenced_files.is_empty() {
            info!(
                count = scan.unreferenced_files.len(),
                "Storage directory holds files without a track record"
            );
        }

        self.fill_slots().await;
        Ok(report)
    }

    // ===== Worker Loop =====

    pub(crate) async fn run(mut self) {
        info!("DownloadCoordinator worker started");

        while let Some(command) = self.command_rx.recv().await {
            if !self.handle_command(command).await {
                break;
            }
        }

        for (track_id, download) in self.active.drain() {
            debug!(track = %track_id, handle = %download.handle, "Cancelling transfer on shutdown");
            self.agent.cancel(download.handle);
        }

        info!("DownloadCoordinator worker stopped");
    }

    /// Returns false when the worker should stop
    async fn handle_command(&mut self, command: CoordinatorCommand) -> bool {
        match command {
            CoordinatorCommand::Download {
                tracks,
                batch,
                response_tx,
            } => {
                let result = self.download_tracks(tracks, batch).await;
                match response_tx {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            error!(error = %e, "Download request failed");
                        }
                    }
                }
            }
            CoordinatorCommand::Delete {
                track_ids,
                response_tx,
            } => {
                let result = self.delete_tracks(track_ids).await;
                let _ = response_tx.send(result);
            }
            CoordinatorCommand::DeleteAll { response_tx } => {
                let result = self.delete_all().await;
                let _ = response_tx.send(result);
            }
            CoordinatorCommand::ImportDownloaded { track, response_tx } => {
                let result = self.import_downloaded(track).await;
                let _ = response_tx.send(result);
            }
            CoordinatorCommand::IsQueued {
                track_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.is_queued(&track_id));
            }
            CoordinatorCommand::IsActivelyDownloading {
                track_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.is_actively_downloading(&track_id));
            }
            CoordinatorCommand::ObserveProgress {
                track_id,
                observer,
                response_tx,
            } => {
                let _ = response_tx.send(self.observe_progress(track_id, observer));
            }
            CoordinatorCommand::Snapshot { response_tx } => {
                let _ = response_tx.send(self.snapshot());
            }
            CoordinatorCommand::Transfer(TransferEvent::Progress { handle, fraction }) => {
                self.on_progress(handle, fraction);
            }
            CoordinatorCommand::Transfer(TransferEvent::Finished { handle, result }) => {
                if let Err(e) = self.on_finished(handle, result).await {
                    error!(%handle, error = %e, "Failed to settle finished transfer");
                }
            }
            CoordinatorCommand::FilesRemoved { removals } => {
                self.on_files_removed(removals).await;
            }
            CoordinatorCommand::Shutdown { response_tx } => {
                let _ = response_tx.send(());
                return false;
            }
        }

        true
    }

    // ===== Download Requests =====

    async fn download_tracks(
        &mut self,
        tracks: Vec<TrackDescriptor>,
        batch: bool,
    ) -> Result<Vec<TrackDescriptor>> {
        let mut queued = Vec::new();
        let mut failure = None;

        for track in tracks {
            match self.queue_if_needed(&track).await {
                Ok(true) => queued.push(track),
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Announce before filling so `TrackQueued` precedes `TrackStarted`
        if batch && !queued.is_empty() {
            self.raise(OfflineEvent::TracksQueued(queued.clone()));
        } else {
            for track in &queued {
                self.raise(OfflineEvent::TrackQueued(track.clone()));
            }
        }

        self.fill_slots().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    /// Persist `queued` and add to the backlog unless no work is needed
    async fn queue_if_needed(&mut self, track: &TrackDescriptor) -> Result<bool> {
        let track_id = track.track_id;
        if self.active.contains_key(&track_id) || self.backlog.contains(&track_id) {
            return Ok(false);
        }

        let pool = self.database.pool();
        if let Some(record) = queries::find_track(pool, &track_id).await? {
            if record.state == TrackDownloadState::Downloaded {
                let path = self.layout.path_for_url(&record.url);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(false);
                }
                warn!(
                    track = %track_id,
                    file = %path.display(),
                    "Downloaded track is missing its file, queueing again"
                );
            }
        }

        let record = queries::queue_track(pool, track).await?;
        self.backlog.insert(record.created_at, track.clone());
        debug!(track = %track_id, backlog = self.backlog.len(), "Track queued");

        Ok(true)
    }

    /// Hand backlog entries to the agent while slots are free
    ///
    /// Tracks that failed with a retryable reason rejoin the backlog after
    /// the loop, so a failing track never restarts inside the same fill.
    async fn fill_slots(&mut self) {
        while self.active.len() < MAX_CONCURRENT_TRANSFERS {
            let Some(track) = self.backlog.pop_front() else {
                break;
            };
            let track_id = track.track_id;
            if let Err(e) = self.start_transfer(track).await {
                error!(track = %track_id, error = %e, "Failed to start transfer");
            }
        }

        for (created_at, track) in self.retries.drain(..) {
            debug!(track = %track.track_id, "Track back on the backlog for retry");
            self.backlog.insert(created_at, track);
        }
    }

    async fn start_transfer(&mut self, track: TrackDescriptor) -> Result<()> {
        let track_id = track.track_id;
        let pool = self.database.pool();

        if !queries::mark_downloading(pool, &track_id).await? {
            warn!(track = %track_id, "Backlog entry has no queued record, skipping");
            self.pending_observers.remove(&track_id);
            return Ok(());
        }

        let Some(sink) = self.event_sink() else {
            queries::mark_queued(pool, &track_id).await?;
            return Err(OfflineError::CoordinatorStopped);
        };

        let request = TransferRequest {
            url: track.url.clone(),
            destination: self.layout.path_for_url(track.url.as_str()),
        };

        match self.agent.start(request, sink) {
            Ok(handle) => {
                let observers = self.pending_observers.remove(&track_id).unwrap_or_default();
                self.handles.insert(handle, track_id);
                self.active.insert(
                    track_id,
                    TrackDownload {
                        track: track.clone(),
                        handle,
                        progress: 0.0,
                        started_seq: self.next_seq,
                        observers,
                    },
                );
                self.next_seq += 1;

                info!(track = %track_id, %handle, active = self.active.len(), "Transfer started");
                self.raise(OfflineEvent::TrackStarted(track));
                Ok(())
            }
            Err(e) => {
                self.pending_observers.remove(&track_id);
                self.settle_failure(track, FailureReason::from(&e)).await
            }
        }
    }

    fn event_sink(&self) -> Option<TransferEventSink> {
        let command_tx = self.command_tx.upgrade()?;
        Some(TransferEventSink::new(move |event| {
            let _ = command_tx.send(CoordinatorCommand::Transfer(event));
        }))
    }

    async fn import_downloaded(&mut self, track: TrackDescriptor) -> Result<bool> {
        if self.active.contains_key(&track.track_id) || self.backlog.contains(&track.track_id) {
            return Ok(false);
        }

        let path = self.layout.path_for_url(track.url.as_str());
        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| OfflineError::FileNotFound(path.display().to_string()))?;

        queries::import_downloaded(self.database.pool(), &track, metadata.len()).await?;
        info!(track = %track.track_id, bytes = metadata.len(), "Imported downloaded track");
        self.raise(OfflineEvent::TrackFinished(track));

        Ok(true)
    }

    // ===== Transfer Callbacks =====

    fn on_progress(&mut self, handle: TransferHandle, fraction: f32) {
        let Some(track_id) = self.handles.get(&handle) else {
            return;
        };
        let Some(download) = self.active.get_mut(track_id) else {
            return;
        };

        download.progress = fraction;
        for observer in &download.observers {
            observer(fraction);
        }

        let track = download.track.clone();
        self.raise(OfflineEvent::TrackProgress { track, fraction });
    }

    async fn on_finished(
        &mut self,
        handle: TransferHandle,
        result: std::result::Result<TransferOutcome, TransferError>,
    ) -> Result<()> {
        let Some(track_id) = self.handles.remove(&handle) else {
            return self.discard_superseded(handle, result).await;
        };

        let Some(download) = self.active.remove(&track_id) else {
            return Err(self.invariant_violation(format!(
                "Transfer {} finished for track {} with no active entry",
                handle, track_id
            )));
        };

        let settled = self.settle(download.track, result).await;
        self.fill_slots().await;
        settled
    }

    async fn settle(
        &mut self,
        track: TrackDescriptor,
        result: std::result::Result<TransferOutcome, TransferError>,
    ) -> Result<()> {
        let track_id = track.track_id;
        let state = queries::find_track(self.database.pool(), &track_id)
            .await?
            .map(|r| r.state)
            .unwrap_or(TrackDownloadState::Unknown);

        if state != TrackDownloadState::Downloading {
            discard_output(&result).await;
            return Err(self.invariant_violation(format!(
                "Transfer finished for track {} whose record is {}",
                track_id,
                state.as_str()
            )));
        }

        match result {
            Ok(outcome) => {
                self.accept(track, &outcome.location, outcome.content_type.as_deref())
                    .await
            }
            Err(TransferError::DestinationExists {
                staged,
                destination,
            }) => {
                if let Some(reason) = reject_content_type(staged.content_type.as_deref()) {
                    remove_quietly(&staged.location).await;
                    return self.settle_failure(track, reason).await;
                }

                // rename(2) replaces the existing file atomically
                match fs::rename(&staged.location, &destination).await {
                    Ok(()) => {
                        debug!(track = %track_id, file = %destination.display(), "Replaced existing file");
                        self.accept(track, &destination, None).await
                    }
                    Err(e) => {
                        remove_quietly(&staged.location).await;
                        self.settle_failure(track, FailureReason::Filesystem(e.to_string()))
                            .await
                    }
                }
            }
            Err(e) => self.settle_failure(track, FailureReason::from(&e)).await,
        }
    }

    /// Validate and record a file that is now at its final location
    async fn accept(
        &mut self,
        track: TrackDescriptor,
        location: &Path,
        content_type: Option<&str>,
    ) -> Result<()> {
        if let Some(reason) = reject_content_type(content_type) {
            remove_quietly(location).await;
            return self.settle_failure(track, reason).await;
        }

        let size = match fs::metadata(location).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                return self
                    .settle_failure(track, FailureReason::Filesystem(e.to_string()))
                    .await
            }
        };

        if !queries::mark_downloaded(self.database.pool(), &track.track_id, size).await? {
            return Err(self.invariant_violation(format!(
                "Track {} left downloading while its transfer was settled",
                track.track_id
            )));
        }

        info!(track = %track.track_id, bytes = size, "Track downloaded");
        self.raise(OfflineEvent::TrackFinished(track));
        Ok(())
    }

    async fn settle_failure(&mut self, track: TrackDescriptor, reason: FailureReason) -> Result<()> {
        let pool = self.database.pool();
        let retryable = reason.is_retryable();
        if retryable {
            if queries::mark_queued(pool, &track.track_id).await? {
                if let Some(record) = queries::find_track(pool, &track.track_id).await? {
                    self.retries.push((record.created_at, track.clone()));
                }
            }
        } else {
            queries::remove_track(pool, &track.track_id).await?;
        }

        warn!(track = %track.track_id, reason = %reason, retryable, "Download failed");
        self.raise(OfflineEvent::TrackFailed { track, reason });
        Ok(())
    }

    /// Clean up after a transfer that was cancelled by a delete or wipe
    async fn discard_superseded(
        &mut self,
        handle: TransferHandle,
        result: std::result::Result<TransferOutcome, TransferError>,
    ) -> Result<()> {
        let Some(track_id) = self.superseded.remove(&handle) else {
            warn!(%handle, "Finished event for unknown transfer");
            if let Err(TransferError::DestinationExists { staged, .. }) = &result {
                remove_quietly(&staged.location).await;
            }
            return Ok(());
        };

        let state = queries::find_track(self.database.pool(), &track_id)
            .await?
            .map(|r| r.state);

        // A newer download of the same track owns the destination now
        if state != Some(TrackDownloadState::Downloaded) {
            discard_output(&result).await;
        } else if let Err(TransferError::DestinationExists { staged, .. }) = &result {
            remove_quietly(&staged.location).await;
        }

        debug!(track = %track_id, %handle, "Discarded superseded transfer");
        Ok(())
    }

    // ===== Deletion =====

    async fn delete_tracks(&mut self, track_ids: Vec<TrackId>) -> Result<usize> {
        let mut marked = Vec::new();
        let mut failure = None;

        for track_id in track_ids {
            self.backlog.remove(&track_id);
            self.pending_observers.remove(&track_id);

            if let Some(download) = self.active.remove(&track_id) {
                self.handles.remove(&download.handle);
                self.superseded.insert(download.handle, track_id);
                self.agent.cancel(download.handle);
                debug!(track = %track_id, handle = %download.handle, "Cancelled transfer for delete");
            }

            match queries::mark_deleting(self.database.pool(), &track_id).await {
                Ok(Some(record)) => marked.push(record),
                Ok(None) => debug!(track = %track_id, "Delete requested for track that is not offline"),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let count = marked.len();
        self.schedule_file_removal(marked);
        self.fill_slots().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Remove files off the worker task, reporting back with `FilesRemoved`
    fn schedule_file_removal(&self, records: Vec<OfflineTrackRecord>) {
        if records.is_empty() {
            return;
        }
        let Some(command_tx) = self.command_tx.upgrade() else {
            warn!(count = records.len(), "Coordinator stopping, file removal deferred to next start");
            return;
        };

        let layout = self.layout.clone();
        tokio::spawn(async move {
            let mut removals = Vec::with_capacity(records.len());
            for record in records {
                let path = layout.path_for_url(&record.url);
                let outcome = remove_file_if_exists(&path)
                    .await
                    .map_err(|e| e.to_string());
                removals.push(FileRemoval {
                    record,
                    path,
                    outcome,
                });
            }
            let _ = command_tx.send(CoordinatorCommand::FilesRemoved { removals });
        });
    }

    async fn on_files_removed(&mut self, removals: Vec<FileRemoval>) {
        let pool = self.database.pool();
        let mut deleted = Vec::new();

        for removal in removals {
            let track_id = removal.record.track_id;
            if let Err(message) = removal.outcome {
                warn!(
                    track = %track_id,
                    file = %removal.path.display(),
                    error = %message,
                    "Failed to remove track file, record stays deleting"
                );
                continue;
            }

            match queries::remove_deleted_track(pool, &track_id).await {
                Ok(true) => match removal.record.descriptor() {
                    Ok(track) => deleted.push(track),
                    Err(e) => warn!(track = %track_id, error = %e, "Deleted track has an unreadable URL"),
                },
                Ok(false) => debug!(track = %track_id, "Track re-queued while its file was removed"),
                Err(e) => error!(track = %track_id, error = %e, "Failed to remove deleted track record"),
            }
        }

        if !deleted.is_empty() {
            info!(count = deleted.len(), "Tracks deleted");
            self.raise(OfflineEvent::TracksDeleted(deleted));
        }
    }

    async fn delete_all(&mut self) -> Result<()> {
        for (track_id, download) in self.active.drain() {
            self.superseded.insert(download.handle, track_id);
            self.agent.cancel(download.handle);
        }
        self.handles.clear();
        self.backlog.clear();
        self.pending_observers.clear();

        let pool = self.database.pool();
        let records = queries::all_tracks(pool).await?;
        queries::clear_all(pool).await?;
        self.layout.reset().await?;

        let deleted: Vec<TrackDescriptor> = records
            .iter()
            .filter_map(|r| r.descriptor().ok())
            .collect();
        info!(count = records.len(), "Deleted all offline tracks");
        if !deleted.is_empty() {
            self.raise(OfflineEvent::TracksDeleted(deleted));
        }

        Ok(())
    }

    // ===== Queries =====

    fn is_queued(&self, track_id: &TrackId) -> bool {
        if self.backlog.contains(track_id) {
            return true;
        }
        self.active
            .get(track_id)
            .map(|d| self.agent.status(d.handle) == TransferStatus::Pending)
            .unwrap_or(false)
    }

    fn is_actively_downloading(&self, track_id: &TrackId) -> bool {
        self.active
            .get(track_id)
            .map(|d| self.agent.status(d.handle) == TransferStatus::Running)
            .unwrap_or(false)
    }

    fn observe_progress(&mut self, track_id: TrackId, observer: ProgressObserver) -> bool {
        if let Some(download) = self.active.get_mut(&track_id) {
            download.observers.push(observer);
            return true;
        }
        if self.backlog.contains(&track_id) {
            self.pending_observers
                .entry(track_id)
                .or_default()
                .push(observer);
            return true;
        }
        false
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        let mut active: Vec<&TrackDownload> = self.active.values().collect();
        active.sort_by_key(|d| d.started_seq);

        CoordinatorSnapshot {
            active: active
                .into_iter()
                .map(|d| ActiveTrack {
                    track: d.track.clone(),
                    progress: d.progress,
                })
                .collect(),
            backlog: self.backlog.track_ids(),
        }
    }

    // ===== Helpers =====

    fn raise(&self, event: OfflineEvent) {
        self.notifier.raise(&event);
    }

    /// The state store and the worker disagree; this is a bug
    fn invariant_violation(&self, message: String) -> OfflineError {
        error!(%message, "Coordinator invariant violated");
        debug_assert!(false, "{}", message);
        OfflineError::invariant(message)
    }
}

/// `Some(reason)` when a reported content type is present and not audio
fn reject_content_type(content_type: Option<&str>) -> Option<FailureReason> {
    match content_type {
        Some(ct) if !is_audio_content_type(ct) => {
            Some(FailureReason::UnexpectedContentType(ct.to_string()))
        }
        _ => None,
    }
}

pub(crate) fn is_audio_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().to_ascii_lowercase().starts_with("audio/"))
        .unwrap_or(false)
}

/// Remove whatever file a finished transfer produced
async fn discard_output(result: &std::result::Result<TransferOutcome, TransferError>) {
    match result {
        Ok(outcome) => remove_quietly(&outcome.location).await,
        Err(TransferError::DestinationExists { staged, .. }) => {
            remove_quietly(&staged.location).await
        }
        Err(_) => {}
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(file = %path.display(), error = %e, "Failed to remove file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use uuid::Uuid;

    const HANDLE: TransferHandle = TransferHandle::new(7);

    /// Accepts every request under one handle and never reports back
    struct SilentAgent;

    impl TransferAgent for SilentAgent {
        fn start(
            &self,
            _request: TransferRequest,
            _events: TransferEventSink,
        ) -> std::result::Result<TransferHandle, TransferError> {
            Ok(HANDLE)
        }

        fn cancel(&self, _handle: TransferHandle) {}

        fn status(&self, _handle: TransferHandle) -> TransferStatus {
            TransferStatus::Running
        }
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "whose record is queued"))]
    async fn test_finish_for_track_not_downloading_is_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::new_in_memory().await.unwrap();
        let layout = StorageLayout::new(dir.path());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut worker = CoordinatorWorker::new(
            command_rx,
            command_tx.downgrade(),
            database.clone(),
            Arc::new(SilentAgent),
            layout.clone(),
            Arc::new(EventNotifier::new()),
        );

        let track = TrackDescriptor::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::nil(),
            Uuid::nil(),
            "Dark Star".to_string(),
            Url::parse("https://archive.example/gd72-08-27/dark-star.mp3").unwrap(),
        );
        assert!(worker.queue_if_needed(&track).await.unwrap());
        worker.fill_slots().await;
        assert!(worker.active.contains_key(&track.track_id));

        // The store moves on while the transfer is still in flight
        assert!(queries::mark_queued(database.pool(), &track.track_id).await.unwrap());

        let destination = layout.path_for_url(track.url.as_str());
        fs::write(&destination, b"ID3").await.unwrap();
        let outcome = TransferOutcome {
            location: destination.clone(),
            bytes: 3,
            content_type: Some("audio/mpeg".to_string()),
        };

        let result = worker.on_finished(HANDLE, Ok(outcome)).await;
        assert!(matches!(result, Err(OfflineError::InvariantViolation(_))));

        let record = queries::find_track(database.pool(), &track.track_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TrackDownloadState::Queued);
        drop(command_tx);
    }

    #[test]
    fn test_audio_content_types() {
        assert!(is_audio_content_type("audio/mpeg"));
        assert!(is_audio_content_type("Audio/MPEG; charset=binary"));
        assert!(is_audio_content_type(" audio/flac"));
        assert!(!is_audio_content_type("text/html; charset=utf-8"));
        assert!(!is_audio_content_type("application/octet-stream"));
        assert!(!is_audio_content_type(""));
    }

    #[test]
    fn test_missing_content_type_is_accepted() {
        assert!(reject_content_type(None).is_none());
        assert!(reject_content_type(Some("audio/mpeg")).is_none());
        assert_eq!(
            reject_content_type(Some("text/html")),
            Some(FailureReason::UnexpectedContentType("text/html".to_string()))
        );
    }
}
