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


//! Transfer progress tracking
//!
//! Progress is reported to observers as a fraction in `0.0..=1.0`.
//! Updates are throttled so a fast transfer does not flood the
//! coordinator's command queue.

use crate::config::PROGRESS_INTERVAL;
use std::time::{Duration, Instant};

/// Snapshot of one transfer's progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    /// From the Content-Length header, when the server sent one
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
        }
    }

    /// Fraction complete, or `None` when the total is unknown
    pub fn fraction(&self) -> Option<f32> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0) as f32),
            None => None,
        }
    }
}

/// Progress tracker with callback throttling
#[derive(Debug)]
pub struct ProgressTracker {
    progress: TransferProgress,

    /// Last update time (for throttling)
    last_update: Instant,

    /// Minimum interval between progress callbacks
    update_interval: Duration,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self::with_interval(total_bytes, PROGRESS_INTERVAL)
    }

    pub fn with_interval(total_bytes: Option<u64>, update_interval: Duration) -> Self {
        Self {
            progress: TransferProgress::new(total_bytes),
            last_update: Instant::now(),
            update_interval,
        }
    }

    /// Update progress with new position
    ///
    /// Returns true if enough time has passed and callback should be invoked
    pub fn update(&mut self, bytes_transferred: u64) -> bool {
        self.progress.bytes_transferred = bytes_transferred;

        let now = Instant::now();
        if now.duration_since(self.last_update) >= self.update_interval {
            self.last_update = now;
            true
        } else {
            false
        }
    }

    /// Force an update regardless of time interval
    pub fn force_update(&mut self, bytes_transferred: u64) {
        self.progress.bytes_transferred = bytes_transferred;
        self.last_update = Instant::now();
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}
