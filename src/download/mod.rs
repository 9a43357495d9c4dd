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


//! Download coordination
//!
//! This module schedules track downloads onto a transfer agent and keeps
//! the state store in step with what the agent reports.
//!
//! # Components
//! - `coordinator` - public handle and command protocol
//! - `worker` - the task that owns all scheduling state
//! - `agent` - transfer agent abstraction and its event sink
//! - `http` - reqwest-backed transfer agent
//! - `events` - lifecycle events and subscriber fan-out
//! - `backlog` - FIFO of queued tracks waiting for a slot
//! - `progress` - byte progress and throttling

pub mod agent;
pub mod backlog;
pub mod coordinator;
pub mod events;
pub mod http;
pub mod progress;
mod worker;

// Re-export commonly used types
pub use agent::{
    TransferAgent, TransferError, TransferEvent, TransferEventSink, TransferHandle,
    TransferOutcome, TransferRequest, TransferStatus,
};
pub use coordinator::{ActiveTrack, CoordinatorSnapshot, DownloadCoordinator, RecoveryReport};
pub use events::{EventNotifier, FailureReason, OfflineEvent, SubscriptionToken};
pub use http::HttpTransferAgent;
pub use progress::{ProgressTracker, TransferProgress};
