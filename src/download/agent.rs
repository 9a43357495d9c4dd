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


//! Transfer agent contract
//!
//! A transfer agent performs one network transfer per `start` call and
//! reports progress and a typed terminal result through the
//! [`TransferEventSink`] it was given. It does not limit concurrency; the
//! coordinator never has more than [`crate::config::MAX_CONCURRENT_TRANSFERS`]
//! transfers started at once.
//!
//! Agents must deliver exactly one `Finished` event per started handle,
//! including for cancelled transfers (`TransferError::Cancelled`).

use crate::config::PARTIAL_FILE_EXTENSION;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Opaque identifier of one started transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u64);

impl TransferHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

/// What to fetch and where the finished file belongs
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub url: Url,
    pub destination: PathBuf,
}

/// A completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Where the bytes are now
    pub location: PathBuf,
    pub bytes: u64,
    /// Response content type, if the agent exposes one
    pub content_type: Option<String>,
}

/// Terminal failure of a transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Network error: {message}")]
    Network { message: String, transient: bool },

    /// The body was stored at `staged.location` but `destination` already exists
    #[error("Destination already exists: {}", .destination.display())]
    DestinationExists {
        staged: TransferOutcome,
        destination: PathBuf,
    },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer I/O error: {0}")]
    Io(String),
}

impl TransferError {
    pub fn network<S: Into<String>>(message: S, transient: bool) -> Self {
        TransferError::Network {
            message: message.into(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Network { transient: true, .. })
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

/// Status as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Accepted but no bytes requested yet
    Pending,
    Running,
    Finished,
    /// The agent does not know this handle
    Unknown,
}

/// Event reported by an agent for one handle
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        handle: TransferHandle,
        fraction: f32,
    },
    Finished {
        handle: TransferHandle,
        result: std::result::Result<TransferOutcome, TransferError>,
    },
}

impl TransferEvent {
    pub fn handle(&self) -> TransferHandle {
        match self {
            TransferEvent::Progress { handle, .. } | TransferEvent::Finished { handle, .. } => {
                *handle
            }
        }
    }
}

/// Channel back to the coordinator
///
/// Delivery never blocks and never fails from the agent's point of view.
/// Events sent after the coordinator stopped are dropped.
#[derive(Clone)]
pub struct TransferEventSink {
    deliver: Arc<dyn Fn(TransferEvent) + Send + Sync>,
}

impl TransferEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransferEvent) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn progress(&self, handle: TransferHandle, fraction: f32) {
        (self.deliver)(TransferEvent::Progress { handle, fraction });
    }

    pub fn finished(
        &self,
        handle: TransferHandle,
        result: std::result::Result<TransferOutcome, TransferError>,
    ) {
        (self.deliver)(TransferEvent::Finished { handle, result });
    }
}

impl fmt::Debug for TransferEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEventSink").finish_non_exhaustive()
    }
}

/// Network transfer capability driven by the coordinator
pub trait TransferAgent: Send + Sync {
    /// Begin transferring `request.url` towards `request.destination`
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEventSink,
    ) -> std::result::Result<TransferHandle, TransferError>;

    /// Ask a transfer to stop; a `Finished` event still follows
    fn cancel(&self, handle: TransferHandle);

    fn status(&self, handle: TransferHandle) -> TransferStatus;
}

/// Staging file for a transfer: `<destination>.<handle>.part`
///
/// Unique per handle, so a cancelled transfer still flushing never shares
/// a file with its replacement.
pub fn staging_path(destination: &Path, handle: TransferHandle) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.{}", handle.id(), PARTIAL_FILE_EXTENSION));
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_staging_path_is_partial_and_unique() {
        let dest = Path::new("/data/offline-mp3s/abc.mp3");
        let a = staging_path(dest, TransferHandle::new(1));
        let b = staging_path(dest, TransferHandle::new(2));

        assert_eq!(a, PathBuf::from("/data/offline-mp3s/abc.mp3.1.part"));
        assert_ne!(a, b);
        assert!(crate::file::StorageLayout::is_partial_file(&a));
    }

    #[test]
    fn test_sink_delivers_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            TransferEventSink::new(move |event| seen.lock().unwrap().push(event))
        };

        let handle = TransferHandle::new(7);
        sink.progress(handle, 0.5);
        sink.finished(handle, Err(TransferError::Cancelled));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.handle() == handle));
    }

    #[test]
    fn test_only_transient_network_errors_are_transient() {
        assert!(TransferError::network("timeout", true).is_transient());
        assert!(!TransferError::network("HTTP 404", false).is_transient());
        assert!(!TransferError::Cancelled.is_transient());
    }
}
