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


//! HTTP transfer agent
//!
//! Streams a response body into a per-transfer staging file, then moves it
//! into place. One tokio task per transfer; cancellation goes through a
//! oneshot channel raced against the body stream.
//!
//! # Failure Classification
//! - Connect errors, timeouts, body stream errors, 408/429/5xx: transient
//! - Any other non-success status: permanent
//! - Destination already present: `DestinationExists` with the staged file

use crate::config::{REQUEST_TIMEOUT, RESOURCE_TIMEOUT};
use crate::download::agent::{
    staging_path, TransferAgent, TransferError, TransferEventSink, TransferHandle,
    TransferOutcome, TransferRequest, TransferStatus,
};
use crate::download::progress::ProgressTracker;
use crate::error::Result;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct TransferSlot {
    status: TransferStatus,
    cancel_tx: Option<oneshot::Sender<()>>,
}

type SlotMap = Arc<Mutex<HashMap<TransferHandle, TransferSlot>>>;

/// Transfer agent backed by reqwest
pub struct HttpTransferAgent {
    client: Client,
    next_handle: AtomicU64,
    transfers: SlotMap,
}

impl HttpTransferAgent {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(RESOURCE_TIMEOUT)
            .build()?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            next_handle: AtomicU64::new(1),
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn set_status(transfers: &SlotMap, handle: TransferHandle, status: TransferStatus) {
        if let Ok(mut map) = transfers.lock() {
            if let Some(slot) = map.get_mut(&handle) {
                slot.status = status;
            }
        }
    }
}

impl TransferAgent for HttpTransferAgent {
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEventSink,
    ) -> std::result::Result<TransferHandle, TransferError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransferError::Io(format!("No async runtime: {}", e)))?;

        let handle = TransferHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.transfers
            .lock()
            .map_err(|_| TransferError::Io("Transfer table poisoned".to_string()))?
            .insert(
                handle,
                TransferSlot {
                    status: TransferStatus::Pending,
                    cancel_tx: Some(cancel_tx),
                },
            );

        let client = self.client.clone();
        let transfers = self.transfers.clone();
        runtime.spawn(async move {
            let result =
                run_transfer(&client, handle, &request, &events, &transfers, cancel_rx).await;
            if let Ok(mut map) = transfers.lock() {
                map.remove(&handle);
            }
            debug!(%handle, ok = result.is_ok(), "Transfer finished");
            events.finished(handle, result);
        });

        Ok(handle)
    }

    fn cancel(&self, handle: TransferHandle) {
        let sender = self
            .transfers
            .lock()
            .ok()
            .and_then(|mut map| map.get_mut(&handle).and_then(|slot| slot.cancel_tx.take()));

        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    fn status(&self, handle: TransferHandle) -> TransferStatus {
        self.transfers
            .lock()
            .ok()
            .and_then(|map| map.get(&handle).map(|slot| slot.status))
            .unwrap_or(TransferStatus::Unknown)
    }
}

async fn run_transfer(
    client: &Client,
    handle: TransferHandle,
    request: &TransferRequest,
    events: &TransferEventSink,
    transfers: &SlotMap,
    mut cancel_rx: oneshot::Receiver<()>,
) -> std::result::Result<TransferOutcome, TransferError> {
    let response = tokio::select! {
        response = client.get(request.url.clone()).send() => response.map_err(classify_reqwest)?,
        _ = &mut cancel_rx => return Err(TransferError::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::network(
            format!("HTTP {}", status),
            is_transient_status(status),
        ));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    HttpTransferAgent::set_status(transfers, handle, TransferStatus::Running);

    let staging = staging_path(&request.destination, handle);
    let written = match stream_body(response, handle, &staging, events, &mut cancel_rx).await {
        Ok(written) => written,
        Err(e) => {
            remove_staging(&staging).await;
            return Err(e);
        }
    };

    let staged = TransferOutcome {
        location: staging,
        bytes: written,
        content_type,
    };
    finalize_staged(staged, &request.destination, &mut cancel_rx).await
}

/// Move a fully written staging file to its destination
///
/// A cancel that arrived after the body was streamed still wins: the staged
/// file is removed and nothing lands at the destination.
async fn finalize_staged(
    staged: TransferOutcome,
    destination: &Path,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> std::result::Result<TransferOutcome, TransferError> {
    if cancel_rx.try_recv().is_ok() {
        remove_staging(&staged.location).await;
        return Err(TransferError::Cancelled);
    }

    if fs::try_exists(destination).await.unwrap_or(false) {
        return Err(TransferError::DestinationExists {
            staged,
            destination: destination.to_path_buf(),
        });
    }

    fs::rename(&staged.location, destination).await?;
    Ok(TransferOutcome {
        location: destination.to_path_buf(),
        ..staged
    })
}

async fn remove_staging(staging: &Path) {
    if let Err(e) = fs::remove_file(staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %staging.display(), error = %e, "Failed to remove staging file");
        }
    }
}

async fn stream_body(
    response: reqwest::Response,
    handle: TransferHandle,
    staging: &Path,
    events: &TransferEventSink,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> std::result::Result<u64, TransferError> {
    let mut tracker = ProgressTracker::new(response.content_length());
    let mut writer = BufWriter::new(fs::File::create(staging).await?);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk_result) = tokio::select! {
        chunk = stream.next() => chunk,
        _ = &mut *cancel_rx => return Err(TransferError::Cancelled),
    } {
        let chunk = chunk_result
            .map_err(|e| TransferError::network(format!("Stream error: {}", e), true))?;

        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if tracker.update(written) {
            if let Some(fraction) = tracker.progress().fraction() {
                events.progress(handle, fraction);
            }
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    tracker.force_update(written);
    events.progress(handle, tracker.progress().fraction().unwrap_or(1.0));

    Ok(written)
}

fn classify_reqwest(err: reqwest::Error) -> TransferError {
    let transient = err.is_timeout() || err.is_connect() || err.is_request();
    TransferError::network(format!("Request failed: {}", err), transient)
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::agent::TransferEvent;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_unknown_handle_status() {
        let agent = HttpTransferAgent::new().unwrap();
        assert_eq!(agent.status(TransferHandle::new(42)), TransferStatus::Unknown);
        // Cancelling an unknown handle is a no-op
        agent.cancel(TransferHandle::new(42));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient_failure() {
        let dir = tempdir().unwrap();
        let agent = HttpTransferAgent::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransferEventSink::new(move |event| {
            let _ = tx.send(event);
        });

        // Port 9 on localhost is expected to refuse connections
        let handle = agent
            .start(
                TransferRequest {
                    url: url::Url::parse("http://127.0.0.1:9/track.mp3").unwrap(),
                    destination: dir.path().join("track.mp3"),
                },
                sink,
            )
            .unwrap();

        loop {
            match rx.recv().await.unwrap() {
                TransferEvent::Finished { handle: h, result } => {
                    assert_eq!(h, handle);
                    let err = result.unwrap_err();
                    assert!(err.is_transient(), "unexpected error: {err}");
                    break;
                }
                TransferEvent::Progress { .. } => continue,
            }
        }
        assert!(!dir.path().join("track.mp3").exists());
    }

    #[tokio::test]
    async fn test_cancel_after_body_skips_rename() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("track.mp3");
        let staging = staging_path(&destination, TransferHandle::new(1));
        fs::write(&staging, b"ID3").await.unwrap();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();
        let staged = TransferOutcome {
            location: staging.clone(),
            bytes: 3,
            content_type: Some("audio/mpeg".to_string()),
        };

        let result = finalize_staged(staged, &destination, &mut cancel_rx).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(!destination.exists());
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_finalize_renames_into_place() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("track.mp3");
        let staging = staging_path(&destination, TransferHandle::new(2));
        fs::write(&staging, b"ID3").await.unwrap();

        // Sender still held: no cancel requested
        let (_cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let staged = TransferOutcome {
            location: staging.clone(),
            bytes: 3,
            content_type: None,
        };

        let outcome = finalize_staged(staged, &destination, &mut cancel_rx).await.unwrap();
        assert_eq!(outcome.location, destination);
        assert_eq!(fs::read(&destination).await.unwrap(), b"ID3");
        assert!(!staging.exists());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_real_download() {
        let dir = tempdir().unwrap();
        let agent = HttpTransferAgent::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransferEventSink::new(move |event| {
            let _ = tx.send(event);
        });

        agent
            .start(
                TransferRequest {
                    url: url::Url::parse("https://httpbin.org/bytes/4096").unwrap(),
                    destination: dir.path().join("bytes.mp3"),
                },
                sink,
            )
            .unwrap();

        while let Some(event) = rx.recv().await {
            if let TransferEvent::Finished { result, .. } = event {
                let outcome = result.unwrap();
                assert_eq!(outcome.bytes, 4096);
                assert!(outcome.location.exists());
                break;
            }
        }
    }
}
