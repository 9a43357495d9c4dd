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


//! Database migrations
//!
//! This module handles database schema creation and migrations.
//!
//! # Migration Strategy
//! Since sqlx's compile-time migration system requires build-time database connection,
//! we implement migrations as runtime SQL execution for mobile compatibility.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
///
/// This function creates the database schema and applies any pending migrations.
/// Migrations are tracked in the `_migrations` table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "offline_schema", create_offline_schema(pool)).await?;
    run_migration(pool, 2, "track_duration", add_track_duration(pool)).await?;

    Ok(())
}

/// Create migrations tracking table
async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the track and source tables
///
/// The CHECK constraints mirror the rules enforced in `models.rs`:
/// only the four persisted states are accepted, and a size may only be
/// recorded for a downloaded track.
async fn create_offline_schema(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- One row per track the user asked to keep offline
CREATE TABLE IF NOT EXISTS OfflineTracks (
    track_id TEXT PRIMARY KEY NOT NULL,
    source_id TEXT NOT NULL,
    show_id TEXT NOT NULL,
    artist_id TEXT NOT NULL,

    -- Needed to rebuild the backlog after a restart
    title TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL,

    state TEXT NOT NULL
        CHECK (state IN ('queued', 'downloading', 'downloaded', 'deleting')),
    file_size INTEGER
        CHECK (file_size IS NULL OR (state = 'downloaded' AND file_size >= 0)),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_tracks_source ON OfflineTracks(source_id, state);
CREATE INDEX IF NOT EXISTS idx_offline_tracks_show ON OfflineTracks(show_id, state);
CREATE INDEX IF NOT EXISTS idx_offline_tracks_artist ON OfflineTracks(artist_id, state);
CREATE INDEX IF NOT EXISTS idx_offline_tracks_state ON OfflineTracks(state, created_at);

-- One row per recording with at least one downloaded track
CREATE TABLE IF NOT EXISTS OfflineSources (
    source_id TEXT PRIMARY KEY NOT NULL,
    show_id TEXT NOT NULL,
    artist_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_sources_show ON OfflineSources(show_id);
CREATE INDEX IF NOT EXISTS idx_offline_sources_artist ON OfflineSources(artist_id, created_at);
        "#,
    )
    .await?;

    Ok(())
}

/// Keep the track duration so rebuilt descriptors match the requested ones
async fn add_track_duration(pool: &SqlitePool) -> Result<()> {
    pool.execute("ALTER TABLE OfflineTracks ADD COLUMN duration REAL")
        .await?;

    Ok(())
}
