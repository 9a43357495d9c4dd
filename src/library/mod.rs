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


//! Read-only offline library
//!
//! Answers "is this available offline" questions for the UI and playback
//! layers. The state store is the only source of truth; nothing here is
//! cached and nothing here writes.
//!
//! # Usage Example
//! ```no_run
//! use relisten_offline::library::OfflineLibrary;
//! use relisten_offline::{storage::Database, StorageLayout};
//!
//! # async fn example(source_id: uuid::Uuid) -> relisten_offline::Result<()> {
//! let database = Database::new("./offline.db").await?;
//! let library = OfflineLibrary::new(database, StorageLayout::new("./offline-mp3s"));
//!
//! let usage = library.disk_usage().disk_usage_for_source(&source_id).await?;
//! println!("{} tracks, {} bytes", usage.track_count, usage.total_bytes);
//! # Ok(())
//! # }
//! ```

pub mod disk_usage;

pub use disk_usage::{DiskUsage, DiskUsageCalculator};

use crate::error::Result;
use crate::file::StorageLayout;
use crate::model::{SourceId, TrackId};
use crate::storage::models::{OfflineSourceRecord, TrackDownloadState};
use crate::storage::queries::{self, Scope};
use crate::storage::Database;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OfflineLibrary {
    database: Database,
    layout: StorageLayout,
}

impl OfflineLibrary {
    pub fn new(database: Database, layout: StorageLayout) -> Self {
        Self { database, layout }
    }

    pub fn disk_usage(&self) -> DiskUsageCalculator {
        DiskUsageCalculator::new(self.database.clone(), self.layout.clone())
    }

    /// Lifecycle state of a track, `Unknown` when there is no record
    pub async fn track_state(&self, track_id: &TrackId) -> Result<TrackDownloadState> {
        Ok(queries::find_track(self.database.pool(), track_id)
            .await?
            .map(|r| r.state)
            .unwrap_or(TrackDownloadState::Unknown))
    }

    pub async fn is_track_available(&self, track_id: &TrackId) -> Result<bool> {
        Ok(self.track_state(track_id).await? == TrackDownloadState::Downloaded)
    }

    /// Local file of a downloaded track
    pub async fn offline_path(&self, track_id: &TrackId) -> Result<Option<PathBuf>> {
        let record = queries::find_track(self.database.pool(), track_id).await?;
        Ok(record
            .filter(|r| r.state == TrackDownloadState::Downloaded)
            .map(|r| self.layout.path_for_url(&r.url)))
    }

    /// Every one of the source's `track_count` tracks is downloaded
    pub async fn is_source_fully_available(&self, source_id: &SourceId, track_count: u64) -> Result<bool> {
        if track_count == 0 {
            return Ok(false);
        }
        let downloaded = queries::count_downloaded(self.database.pool(), Scope::Source, source_id).await?;
        Ok(downloaded >= track_count)
    }

    pub async fn is_source_partially_available(&self, source_id: &SourceId) -> Result<bool> {
        self.any_downloaded(Scope::Source, source_id).await
    }

    pub async fn is_show_partially_available(&self, show_id: &Uuid) -> Result<bool> {
        self.any_downloaded(Scope::Show, show_id).await
    }

    pub async fn is_artist_partially_available(&self, artist_id: &Uuid) -> Result<bool> {
        self.any_downloaded(Scope::Artist, artist_id).await
    }

    /// Sources with at least one downloaded track, newest first
    pub async fn offline_sources(&self, artist_id: Option<&Uuid>) -> Result<Vec<OfflineSourceRecord>> {
        queries::list_sources(self.database.pool(), artist_id).await
    }

    async fn any_downloaded(&self, scope: Scope, id: &Uuid) -> Result<bool> {
        Ok(queries::count_downloaded(self.database.pool(), scope, id).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackDescriptor;
    use sqlx::SqlitePool;
    use tempfile::tempdir;
    use url::Url;

    fn track(source_id: Uuid, show_id: Uuid, artist_id: Uuid, n: u32) -> TrackDescriptor {
        TrackDescriptor::new(
            Uuid::new_v4(),
            source_id,
            show_id,
            artist_id,
            format!("Track {}", n),
            Url::parse(&format!("https://archive.example/ph97-12-31/{}.mp3", n)).unwrap(),
        )
    }

    async fn downloaded(pool: &SqlitePool, t: &TrackDescriptor) {
        queries::queue_track(pool, t).await.unwrap();
        queries::mark_downloading(pool, &t.track_id).await.unwrap();
        queries::mark_downloaded(pool, &t.track_id, 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_track_availability() {
        let dir = tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let layout = StorageLayout::new(dir.path());
        let library = OfflineLibrary::new(db.clone(), layout.clone());
        let t = track(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);

        assert_eq!(library.track_state(&t.track_id).await.unwrap(), TrackDownloadState::Unknown);
        assert!(library.offline_path(&t.track_id).await.unwrap().is_none());

        queries::queue_track(db.pool(), &t).await.unwrap();
        assert_eq!(library.track_state(&t.track_id).await.unwrap(), TrackDownloadState::Queued);
        assert!(!library.is_track_available(&t.track_id).await.unwrap());

        queries::mark_downloading(db.pool(), &t.track_id).await.unwrap();
        queries::mark_downloaded(db.pool(), &t.track_id, 100).await.unwrap();
        assert!(library.is_track_available(&t.track_id).await.unwrap());
        assert_eq!(
            library.offline_path(&t.track_id).await.unwrap(),
            Some(layout.path_for_url(t.url.as_str()))
        );

        queries::mark_deleting(db.pool(), &t.track_id).await.unwrap();
        assert!(!library.is_track_available(&t.track_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_and_full_availability() {
        let dir = tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let library = OfflineLibrary::new(db.clone(), StorageLayout::new(dir.path()));
        let (source, show, artist) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let a = track(source, show, artist, 1);
        let b = track(source, show, artist, 2);

        assert!(!library.is_source_partially_available(&source).await.unwrap());
        assert!(!library.is_show_partially_available(&show).await.unwrap());
        assert!(!library.is_artist_partially_available(&artist).await.unwrap());

        downloaded(db.pool(), &a).await;
        queries::queue_track(db.pool(), &b).await.unwrap();

        assert!(library.is_source_partially_available(&source).await.unwrap());
        assert!(library.is_show_partially_available(&show).await.unwrap());
        assert!(library.is_artist_partially_available(&artist).await.unwrap());
        assert!(!library.is_source_fully_available(&source, 2).await.unwrap());

        queries::mark_downloading(db.pool(), &b.track_id).await.unwrap();
        queries::mark_downloaded(db.pool(), &b.track_id, 100).await.unwrap();
        assert!(library.is_source_fully_available(&source, 2).await.unwrap());
        assert!(!library.is_source_fully_available(&source, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_sources_by_artist() {
        let dir = tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let library = OfflineLibrary::new(db.clone(), StorageLayout::new(dir.path()));
        let artist = Uuid::new_v4();
        let mine = track(Uuid::new_v4(), Uuid::new_v4(), artist, 1);
        let other = track(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 2);

        downloaded(db.pool(), &mine).await;
        downloaded(db.pool(), &other).await;

        assert_eq!(library.offline_sources(None).await.unwrap().len(), 2);
        let sources = library.offline_sources(Some(&artist)).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, mine.source_id);
    }
}
