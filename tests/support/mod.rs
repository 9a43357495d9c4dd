//! Shared fixtures for coordinator integration tests
//!
//! `ScriptedAgent` never touches the network. Tests decide when each
//! transfer progresses, completes or fails, which makes races reproducible.

#![allow(dead_code)]

use relisten_offline::download::agent::staging_path;
use relisten_offline::download::{
    DownloadCoordinator, EventNotifier, OfflineEvent, TransferAgent, TransferError,
    TransferEventSink, TransferHandle, TransferOutcome, TransferRequest, TransferStatus,
};
use relisten_offline::library::{DiskUsage, OfflineLibrary};
use relisten_offline::storage::Database;
use relisten_offline::{Recording, StorageLayout, TrackDescriptor};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

struct ScriptedTransfer {
    request: TransferRequest,
    sink: TransferEventSink,
    status: TransferStatus,
}

/// In-process transfer agent driven by the test
#[derive(Default)]
pub struct ScriptedAgent {
    next_handle: AtomicU64,
    transfers: Mutex<HashMap<TransferHandle, ScriptedTransfer>>,
    started: Mutex<Vec<(TransferHandle, TransferRequest)>>,
    cancelled: Mutex<Vec<TransferHandle>>,
}

impl ScriptedAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every transfer ever started, in start order
    pub fn started(&self) -> Vec<(TransferHandle, TransferRequest)> {
        self.started.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Transfers started and not yet finished by the test
    pub fn open_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<TransferHandle> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Most recent handle started for a URL
    pub fn handle_for(&self, url: &Url) -> Option<TransferHandle> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, request)| &request.url == url)
            .map(|(handle, _)| *handle)
    }

    pub fn set_running(&self, handle: TransferHandle) {
        if let Some(transfer) = self.transfers.lock().unwrap().get_mut(&handle) {
            transfer.status = TransferStatus::Running;
        }
    }

    pub fn progress(&self, handle: TransferHandle, fraction: f32) {
        let sink = self.transfers.lock().unwrap().get(&handle).map(|t| t.sink.clone());
        if let Some(sink) = sink {
            sink.progress(handle, fraction);
        }
    }

    /// Finish a transfer successfully with `body` as its content
    ///
    /// Stages the body first and moves it into place only when the
    /// destination is free, the way the HTTP agent does.
    pub fn complete(&self, handle: TransferHandle, body: &[u8], content_type: Option<&str>) {
        let Some(transfer) = self.take(handle) else {
            panic!("complete() on unknown handle {}", handle);
        };
        let destination = transfer.request.destination.clone();
        let staging = staging_path(&destination, handle);
        std::fs::write(&staging, body).unwrap();

        let staged = TransferOutcome {
            location: staging.clone(),
            bytes: body.len() as u64,
            content_type: content_type.map(str::to_string),
        };
        let result = if destination.exists() {
            Err(TransferError::DestinationExists {
                staged,
                destination,
            })
        } else {
            std::fs::rename(&staging, &destination).unwrap();
            Ok(TransferOutcome {
                location: destination,
                ..staged
            })
        };
        transfer.sink.finished(handle, result);
    }

    pub fn complete_audio(&self, handle: TransferHandle, body: &[u8]) {
        self.complete(handle, body, Some("audio/mpeg"));
    }

    pub fn fail(&self, handle: TransferHandle, error: TransferError) {
        let Some(transfer) = self.take(handle) else {
            panic!("fail() on unknown handle {}", handle);
        };
        transfer.sink.finished(handle, Err(error));
    }

    /// Deliver the `Cancelled` result for a handle the coordinator cancelled
    pub fn finish_cancelled(&self, handle: TransferHandle) {
        self.fail(handle, TransferError::Cancelled);
    }

    fn take(&self, handle: TransferHandle) -> Option<ScriptedTransfer> {
        self.transfers.lock().unwrap().remove(&handle)
    }
}

impl TransferAgent for ScriptedAgent {
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEventSink,
    ) -> Result<TransferHandle, TransferError> {
        let handle = TransferHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.started.lock().unwrap().push((handle, request.clone()));
        self.transfers.lock().unwrap().insert(
            handle,
            ScriptedTransfer {
                request,
                sink: events,
                status: TransferStatus::Pending,
            },
        );
        Ok(handle)
    }

    /// Only records the request; tests deliver the outcome explicitly
    fn cancel(&self, handle: TransferHandle) {
        self.cancelled.lock().unwrap().push(handle);
    }

    fn status(&self, handle: TransferHandle) -> TransferStatus {
        self.transfers
            .lock()
            .unwrap()
            .get(&handle)
            .map(|t| t.status)
            .unwrap_or(TransferStatus::Unknown)
    }
}

/// Events raised by the coordinator, in order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<OfflineEvent>>>,
}

impl EventLog {
    pub fn attach(notifier: &EventNotifier) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        notifier.subscribe(move |event| events.lock().unwrap().push(event.clone()));
        log
    }

    pub fn all(&self) -> Vec<OfflineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&OfflineEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// A coordinator over a temporary data directory and a scripted agent
pub struct Harness {
    pub dir: TempDir,
    pub database: Database,
    pub layout: StorageLayout,
    pub agent: Arc<ScriptedAgent>,
    pub coordinator: DownloadCoordinator,
    pub events: EventLog,
}

impl Harness {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::new(dir.path().join("offline.db")).await.unwrap();
        let layout = StorageLayout::new(dir.path().join("offline-mp3s"));
        Self::start_on(dir, database, layout).await
    }

    async fn start_on(dir: TempDir, database: Database, layout: StorageLayout) -> Self {
        let agent = ScriptedAgent::new();
        let notifier = Arc::new(EventNotifier::new());
        let events = EventLog::attach(&notifier);
        let coordinator = DownloadCoordinator::start_with_notifier(
            database.clone(),
            agent.clone(),
            layout.clone(),
            notifier,
        )
        .await
        .unwrap();

        Self {
            dir,
            database,
            layout,
            agent,
            coordinator,
            events,
        }
    }

    /// Stop the coordinator and start a new one on the same store and directory
    pub async fn restart(self) -> Self {
        self.coordinator.shutdown().await.unwrap();
        Self::start_on(self.dir, self.database, self.layout).await
    }

    /// Start a new coordinator after the current one was shut down
    pub async fn restart_after_shutdown(self) -> Self {
        Self::start_on(self.dir, self.database, self.layout).await
    }

    pub async fn usage_for_source(&self, source_id: &Uuid) -> DiskUsage {
        OfflineLibrary::new(self.database.clone(), self.layout.clone())
            .disk_usage()
            .disk_usage_for_source(source_id)
            .await
            .unwrap()
    }

    /// Wait until every command sent so far has been processed
    pub async fn sync(&self) {
        self.coordinator.snapshot().await.unwrap();
    }

    /// Download a track and complete its transfer with an audio body
    pub async fn download_and_complete(&self, track: &TrackDescriptor, body: &[u8]) {
        assert!(self.coordinator.download(track).await.unwrap());
        let handle = self.agent.handle_for(&track.url).unwrap();
        self.agent.complete_audio(handle, body);
        self.sync().await;
    }

    pub fn file_for(&self, track: &TrackDescriptor) -> std::path::PathBuf {
        self.layout.path_for_url(track.url.as_str())
    }
}

pub fn track(source_id: Uuid, n: u32) -> TrackDescriptor {
    TrackDescriptor::new(
        Uuid::new_v4(),
        source_id,
        Uuid::nil(),
        Uuid::nil(),
        format!("Track {}", n),
        Url::parse(&format!("https://archive.example/{}/{}.mp3", source_id, n)).unwrap(),
    )
}

pub fn recording(track_count: u32) -> Recording {
    let source_id = Uuid::new_v4();
    Recording {
        source_id,
        show_id: Uuid::nil(),
        artist_id: Uuid::nil(),
        tracks: (1..=track_count).map(|n| track(source_id, n)).collect(),
    }
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}
