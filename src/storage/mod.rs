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


//! State store
//!
//! Durable per-track lifecycle state backed by SQLite. The download
//! coordinator is the only writer; everything else reads.
//!
//! # Database Schema
//! - OfflineTracks: one row per requested track (state, size, URL)
//! - OfflineSources: one row per recording with a downloaded track
//!
//! # Usage Example
//! ```no_run
//! use relisten_offline::storage::{Database, queries};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./offline.db").await?;
//! let sources = queries::list_sources(db.pool(), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

// Re-export commonly used types
pub use database::Database;
pub use models::{OfflineSourceRecord, OfflineTrackRecord, TrackDownloadState};
