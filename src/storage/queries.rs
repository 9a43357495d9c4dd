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


//! Database query functions
//!
//! Every state transition is a single statement or a single transaction, so
//! a transition either fully applies or not at all. Transitions are guarded
//! by the expected current state and report whether a row changed.
//!
//! # Query Patterns
//! - Free functions over `&SqlitePool`
//! - Transactions for anything touching both tables
//! - The source table is pruned in the same transaction as any transition
//!   away from `downloaded`

use crate::error::Result;
use crate::model::{SourceId, TrackDescriptor, TrackId};
use crate::storage::models::{
    format_timestamp, OfflineSourceRecord, OfflineTrackRecord, TrackDownloadState,
};
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Column used to scope availability queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Source,
    Show,
    Artist,
}

impl Scope {
    fn column(&self) -> &'static str {
        match self {
            Scope::Source => "source_id",
            Scope::Show => "show_id",
            Scope::Artist => "artist_id",
        }
    }
}

// ============================================================================
// TRACK READS
// ============================================================================

/// Find a track record by id
pub async fn find_track(pool: &SqlitePool, track_id: &TrackId) -> Result<Option<OfflineTrackRecord>> {
    let row = sqlx::query("SELECT * FROM OfflineTracks WHERE track_id = ?")
        .bind(track_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(OfflineTrackRecord::from_row).transpose()
}

/// All tracks in one state, oldest request first
pub async fn tracks_in_state(
    pool: &SqlitePool,
    state: TrackDownloadState,
) -> Result<Vec<OfflineTrackRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM OfflineTracks WHERE state = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(OfflineTrackRecord::from_row).collect()
}

/// Every track record, oldest request first
pub async fn all_tracks(pool: &SqlitePool) -> Result<Vec<OfflineTrackRecord>> {
    let rows = sqlx::query("SELECT * FROM OfflineTracks ORDER BY created_at ASC, rowid ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(OfflineTrackRecord::from_row).collect()
}

/// Downloaded tracks of one source, read in a single statement
pub async fn downloaded_tracks_for_source(
    pool: &SqlitePool,
    source_id: &SourceId,
) -> Result<Vec<OfflineTrackRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM OfflineTracks WHERE source_id = ? AND state = 'downloaded' ORDER BY created_at ASC",
    )
    .bind(source_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(OfflineTrackRecord::from_row).collect()
}

/// Every downloaded track
pub async fn downloaded_tracks(pool: &SqlitePool) -> Result<Vec<OfflineTrackRecord>> {
    tracks_in_state(pool, TrackDownloadState::Downloaded).await
}

/// Number of downloaded tracks within a source, show or artist
pub async fn count_downloaded(pool: &SqlitePool, scope: Scope, id: &Uuid) -> Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM OfflineTracks WHERE {} = ? AND state = 'downloaded'",
        scope.column()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count.max(0) as u64)
}

// ============================================================================
// TRACK TRANSITIONS
// ============================================================================

/// Write a `queued` record for a track (`unknown -> queued`)
///
/// An existing record is reset to `queued` keeping its original `created_at`.
/// When that record was `downloaded` (file vanished from disk) the source
/// record is pruned in the same transaction.
pub async fn queue_track(pool: &SqlitePool, track: &TrackDescriptor) -> Result<OfflineTrackRecord> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO OfflineTracks (
            track_id, source_id, show_id, artist_id, title, url, duration, state, file_size, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', NULL, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            state = 'queued',
            file_size = NULL,
            title = excluded.title,
            url = excluded.url,
            duration = excluded.duration
        RETURNING *
        "#,
    )
    .bind(track.track_id.to_string())
    .bind(track.source_id.to_string())
    .bind(track.show_id.to_string())
    .bind(track.artist_id.to_string())
    .bind(&track.title)
    .bind(track.url.as_str())
    .bind(track.duration)
    .bind(format_timestamp(&Utc::now()))
    .fetch_one(&mut *tx)
    .await?;
    let record = OfflineTrackRecord::from_row(&row)?;

    prune_source(&mut tx, &record.source_id).await?;
    tx.commit().await?;

    Ok(record)
}

/// `queued -> downloading`
pub async fn mark_downloading(pool: &SqlitePool, track_id: &TrackId) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE OfflineTracks SET state = 'downloading' WHERE track_id = ? AND state = 'queued'",
    )
    .bind(track_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `downloading -> queued` after a retryable failure
pub async fn mark_queued(pool: &SqlitePool, track_id: &TrackId) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE OfflineTracks SET state = 'queued', file_size = NULL WHERE track_id = ? AND state = 'downloading'",
    )
    .bind(track_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `downloading -> downloaded`, creating the source record if missing
pub async fn mark_downloaded(pool: &SqlitePool, track_id: &TrackId, file_size: u64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        UPDATE OfflineTracks SET state = 'downloaded', file_size = ?
        WHERE track_id = ? AND state = 'downloading'
        RETURNING source_id, show_id, artist_id
        "#,
    )
    .bind(file_size as i64)
    .bind(track_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(false);
    };

    insert_source_if_missing(
        &mut tx,
        &row.try_get::<String, _>("source_id")?,
        &row.try_get::<String, _>("show_id")?,
        &row.try_get::<String, _>("artist_id")?,
    )
    .await?;
    tx.commit().await?;

    Ok(true)
}

/// Any state `-> deleting`
///
/// Returns the updated record, or `None` when the track has no record.
pub async fn mark_deleting(pool: &SqlitePool, track_id: &TrackId) -> Result<Option<OfflineTrackRecord>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "UPDATE OfflineTracks SET state = 'deleting', file_size = NULL WHERE track_id = ? RETURNING *",
    )
    .bind(track_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let record = match row {
        Some(row) => OfflineTrackRecord::from_row(&row)?,
        None => {
            tx.rollback().await?;
            return Ok(None);
        }
    };

    prune_source(&mut tx, &record.source_id).await?;
    tx.commit().await?;

    Ok(Some(record))
}

/// Remove a record whose file has been deleted (`deleting -> unknown`)
///
/// A record that was re-queued in the meantime is left alone.
pub async fn remove_deleted_track(pool: &SqlitePool, track_id: &TrackId) -> Result<bool> {
    delete_track_where(pool, track_id, "AND state = 'deleting'").await
}

/// Remove a record regardless of its state (fatal transfer failure)
pub async fn remove_track(pool: &SqlitePool, track_id: &TrackId) -> Result<bool> {
    delete_track_where(pool, track_id, "").await
}

async fn delete_track_where(pool: &SqlitePool, track_id: &TrackId, guard: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        "DELETE FROM OfflineTracks WHERE track_id = ? {} RETURNING source_id",
        guard
    );
    let source_id: Option<String> = sqlx::query_scalar(&sql)
        .bind(track_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

    let Some(source_id) = source_id else {
        tx.rollback().await?;
        return Ok(false);
    };

    prune_source_str(&mut tx, &source_id).await?;
    tx.commit().await?;

    Ok(true)
}

/// Reset every `downloading` record to `queued`
///
/// No transfer survives process death, so at start-up these were
/// interrupted rather than in flight.
pub async fn requeue_interrupted(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE OfflineTracks SET state = 'queued', file_size = NULL WHERE state = 'downloading'",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Record a file that is already on disk as downloaded
pub async fn import_downloaded(pool: &SqlitePool, track: &TrackDescriptor, file_size: u64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO OfflineTracks (
            track_id, source_id, show_id, artist_id, title, url, duration, state, file_size, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'downloaded', ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            state = 'downloaded',
            file_size = excluded.file_size,
            title = excluded.title,
            url = excluded.url,
            duration = excluded.duration
        "#,
    )
    .bind(track.track_id.to_string())
    .bind(track.source_id.to_string())
    .bind(track.show_id.to_string())
    .bind(track.artist_id.to_string())
    .bind(&track.title)
    .bind(track.url.as_str())
    .bind(track.duration)
    .bind(file_size as i64)
    .bind(format_timestamp(&Utc::now()))
    .execute(&mut *tx)
    .await?;

    insert_source_if_missing(
        &mut tx,
        &track.source_id.to_string(),
        &track.show_id.to_string(),
        &track.artist_id.to_string(),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Delete every track and source record
pub async fn clear_all(pool: &SqlitePool) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query("DELETE FROM OfflineTracks")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM OfflineSources")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(removed)
}

// ============================================================================
// SOURCE QUERIES
// ============================================================================

/// Find a source record by id
pub async fn find_source(pool: &SqlitePool, source_id: &SourceId) -> Result<Option<OfflineSourceRecord>> {
    let row = sqlx::query("SELECT * FROM OfflineSources WHERE source_id = ?")
        .bind(source_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(OfflineSourceRecord::from_row).transpose()
}

/// Offline sources, most recently added first, optionally for one artist
pub async fn list_sources(pool: &SqlitePool, artist_id: Option<&Uuid>) -> Result<Vec<OfflineSourceRecord>> {
    let rows = match artist_id {
        Some(artist_id) => {
            sqlx::query(
                "SELECT * FROM OfflineSources WHERE artist_id = ? ORDER BY created_at DESC",
            )
            .bind(artist_id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM OfflineSources ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(OfflineSourceRecord::from_row).collect()
}

async fn insert_source_if_missing(
    conn: &mut SqliteConnection,
    source_id: &str,
    show_id: &str,
    artist_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO OfflineSources (source_id, show_id, artist_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(source_id)
    .bind(show_id)
    .bind(artist_id)
    .bind(format_timestamp(&Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Drop the source record when none of its tracks remain downloaded
async fn prune_source(conn: &mut SqliteConnection, source_id: &SourceId) -> Result<bool> {
    prune_source_str(conn, &source_id.to_string()).await
}

async fn prune_source_str(conn: &mut SqliteConnection, source_id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM OfflineSources
        WHERE source_id = ?
          AND NOT EXISTS (
              SELECT 1 FROM OfflineTracks WHERE source_id = ? AND state = 'downloaded'
          )
        "#,
    )
    .bind(source_id)
    .bind(source_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
