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


//! Disk usage calculator
//!
//! Read-only aggregation over downloaded track records. Each query reads
//! its records with a single statement, so a track moving to `deleting`
//! mid-scan is either fully counted or not counted at all. Queries go
//! straight to the pool and never wait on the download coordinator.

use crate::error::Result;
use crate::file::StorageLayout;
use crate::model::{SourceId, TrackId};
use crate::storage::models::{OfflineTrackRecord, TrackDownloadState};
use crate::storage::{queries, Database};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

/// Bytes and track count stored locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub track_count: u64,
}

impl DiskUsage {
    fn add(&mut self, bytes: u64) {
        self.total_bytes = self.total_bytes.saturating_add(bytes);
        self.track_count += 1;
    }
}

#[derive(Debug, Clone)]
pub struct DiskUsageCalculator {
    database: Database,
    layout: StorageLayout,
}

impl DiskUsageCalculator {
    pub fn new(database: Database, layout: StorageLayout) -> Self {
        Self { database, layout }
    }

    /// Bytes and number of downloaded tracks of one source
    pub async fn disk_usage_for_source(&self, source_id: &SourceId) -> Result<DiskUsage> {
        let records = queries::downloaded_tracks_for_source(self.database.pool(), source_id).await?;
        Ok(self.sum(&records).await)
    }

    /// Size of one downloaded track, None if it is not downloaded
    pub async fn disk_usage_for_track(&self, track_id: &TrackId) -> Result<Option<u64>> {
        let Some(record) = queries::find_track(self.database.pool(), track_id).await? else {
            return Ok(None);
        };
        if record.state != TrackDownloadState::Downloaded {
            return Ok(None);
        }
        Ok(Some(self.record_size(&record).await))
    }

    /// Bytes and number of all downloaded tracks
    pub async fn total_disk_usage(&self) -> Result<DiskUsage> {
        let records = queries::downloaded_tracks(self.database.pool()).await?;
        Ok(self.sum(&records).await)
    }

    async fn sum(&self, records: &[OfflineTrackRecord]) -> DiskUsage {
        let mut usage = DiskUsage::default();
        for record in records {
            usage.add(self.record_size(record).await);
        }
        usage
    }

    /// Recorded size, or the file's size for records stored without one
    async fn record_size(&self, record: &OfflineTrackRecord) -> u64 {
        if let Some(size) = record.file_size {
            return size;
        }

        let path = self.layout.path_for_url(&record.url);
        match fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!(track = %record.track_id, error = %e, "No size recorded and file unreadable");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackDescriptor;
    use sqlx::SqlitePool;
    use tempfile::tempdir;
    use url::Url;
    use uuid::Uuid;

    fn track(source_id: Uuid, n: u32) -> TrackDescriptor {
        TrackDescriptor::new(
            Uuid::new_v4(),
            source_id,
            Uuid::nil(),
            Uuid::nil(),
            format!("Track {}", n),
            Url::parse(&format!("https://archive.example/gd72-08-27/{}.mp3", n)).unwrap(),
        )
    }

    async fn downloaded(pool: &SqlitePool, t: &TrackDescriptor, size: u64) {
        queries::queue_track(pool, t).await.unwrap();
        queries::mark_downloading(pool, &t.track_id).await.unwrap();
        queries::mark_downloaded(pool, &t.track_id, size).await.unwrap();
    }

    #[tokio::test]
    async fn test_only_downloaded_tracks_are_counted() {
        let dir = tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let pool = db.pool().clone();
        let source = Uuid::new_v4();
        let (a, b, c, d) = (track(source, 1), track(source, 2), track(source, 3), track(source, 4));

        downloaded(&pool, &a, 1000).await;
        downloaded(&pool, &b, 2500).await;
        downloaded(&pool, &c, 4000).await;
        queries::mark_deleting(&pool, &c.track_id).await.unwrap();
        queries::queue_track(&pool, &d).await.unwrap();

        let calculator = DiskUsageCalculator::new(db, StorageLayout::new(dir.path()));
        let usage = calculator.disk_usage_for_source(&source).await.unwrap();

        assert_eq!(
            usage,
            DiskUsage {
                total_bytes: 3500,
                track_count: 2
            }
        );
        assert_eq!(calculator.disk_usage_for_track(&b.track_id).await.unwrap(), Some(2500));
        assert_eq!(calculator.disk_usage_for_track(&c.track_id).await.unwrap(), None);
        assert_eq!(calculator.disk_usage_for_track(&d.track_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_total_spans_sources() {
        let dir = tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let pool = db.pool().clone();

        downloaded(&pool, &track(Uuid::new_v4(), 1), 10).await;
        downloaded(&pool, &track(Uuid::new_v4(), 2), 20).await;

        let calculator = DiskUsageCalculator::new(db, StorageLayout::new(dir.path()));
        let total = calculator.total_disk_usage().await.unwrap();
        assert_eq!(total.total_bytes, 30);
        assert_eq!(total.track_count, 2);

        let empty = calculator.disk_usage_for_source(&Uuid::new_v4()).await.unwrap();
        assert_eq!(empty, DiskUsage::default());
    }

    #[tokio::test]
    async fn test_missing_size_falls_back_to_file() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let db = Database::new_in_memory().await.unwrap();
        let source = Uuid::new_v4();
        let t = track(source, 1);

        // Rows written by older clients have no size
        sqlx::query(
            "INSERT INTO OfflineTracks (track_id, source_id, show_id, artist_id, title, url, state, file_size, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'downloaded', NULL, '2025-01-01T00:00:00.000000Z')",
        )
        .bind(t.track_id.to_string())
        .bind(source.to_string())
        .bind(Uuid::nil().to_string())
        .bind(Uuid::nil().to_string())
        .bind(&t.title)
        .bind(t.url.as_str())
        .execute(db.pool())
        .await
        .unwrap();
        tokio::fs::write(layout.path_for_url(t.url.as_str()), vec![0u8; 777])
            .await
            .unwrap();

        let calculator = DiskUsageCalculator::new(db.clone(), layout);
        let usage = calculator.disk_usage_for_source(&source).await.unwrap();
        assert_eq!(usage.total_bytes, 777);
        assert_eq!(usage.track_count, 1);

        // Read path never writes the measured size back
        let record = queries::find_track(db.pool(), &t.track_id).await.unwrap().unwrap();
        assert_eq!(record.file_size, None);
    }
}
