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


//! Persisted records
//!
//! # Design Notes
//! - Identifiers stored as hyphenated UUID TEXT
//! - DateTime stored as TEXT in RFC 3339 format
//! - States stored as lowercase TEXT, converted through `as_str`/`from_str`
//! - A row is rejected on read if it carries a size while not downloaded

use crate::error::{OfflineError, Result};
use crate::model::{SourceId, TrackDescriptor, TrackId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use url::Url;
use uuid::Uuid;

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle state of a track
///
/// `Unknown` is never written; a track without a row is implicitly unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackDownloadState {
    Unknown,
    Queued,
    Downloading,
    Downloaded,
    Deleting,
}

impl TrackDownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackDownloadState::Unknown => "unknown",
            TrackDownloadState::Queued => "queued",
            TrackDownloadState::Downloading => "downloading",
            TrackDownloadState::Downloaded => "downloaded",
            TrackDownloadState::Deleting => "deleting",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TrackDownloadState::Queued),
            "downloading" => Ok(TrackDownloadState::Downloading),
            "downloaded" => Ok(TrackDownloadState::Downloaded),
            "deleting" => Ok(TrackDownloadState::Deleting),
            _ => Err(OfflineError::InvalidData(format!(
                "Invalid track state: {}",
                s
            ))),
        }
    }

    /// Queued or downloading
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TrackDownloadState::Queued | TrackDownloadState::Downloading
        )
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// Persisted per-track record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineTrackRecord {
    pub track_id: TrackId,
    pub source_id: SourceId,
    pub show_id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub url: String,
    /// Seconds, when the descriptor carried one
    pub duration: Option<f64>,
    pub state: TrackDownloadState,
    /// Set only when `state == Downloaded`
    pub file_size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl OfflineTrackRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let state = TrackDownloadState::from_str(&row.try_get::<String, _>("state")?)?;
        let file_size = row
            .try_get::<Option<i64>, _>("file_size")?
            .map(|size| {
                u64::try_from(size).map_err(|_| {
                    OfflineError::InvalidData(format!("Negative file size: {}", size))
                })
            })
            .transpose()?;

        let track_id = Uuid::parse_str(&row.try_get::<String, _>("track_id")?)?;
        if file_size.is_some() && state != TrackDownloadState::Downloaded {
            return Err(OfflineError::InvalidData(format!(
                "Track {} has a size but is {}",
                track_id,
                state.as_str()
            )));
        }

        Ok(Self {
            track_id,
            source_id: Uuid::parse_str(&row.try_get::<String, _>("source_id")?)?,
            show_id: Uuid::parse_str(&row.try_get::<String, _>("show_id")?)?,
            artist_id: Uuid::parse_str(&row.try_get::<String, _>("artist_id")?)?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            duration: row.try_get("duration")?,
            state,
            file_size,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }

    /// Rebuild the descriptor the record was created from
    pub fn descriptor(&self) -> Result<TrackDescriptor> {
        let track = TrackDescriptor::new(
            self.track_id,
            self.source_id,
            self.show_id,
            self.artist_id,
            self.title.clone(),
            Url::parse(&self.url)?,
        );
        Ok(match self.duration {
            Some(seconds) => track.with_duration(seconds),
            None => track,
        })
    }
}

/// Persisted per-recording record
///
/// Exists exactly while at least one track of the source is downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSourceRecord {
    pub source_id: SourceId,
    pub show_id: Uuid,
    pub artist_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl OfflineSourceRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            source_id: Uuid::parse_str(&row.try_get::<String, _>("source_id")?)?,
            show_id: Uuid::parse_str(&row.try_get::<String, _>("show_id")?)?,
            artist_id: Uuid::parse_str(&row.try_get::<String, _>("artist_id")?)?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }
}

/// Format a timestamp the way it is stored
///
/// Fixed-width microsecond precision keeps lexical order equal to time order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            TrackDownloadState::Queued,
            TrackDownloadState::Downloading,
            TrackDownloadState::Downloaded,
            TrackDownloadState::Deleting,
        ] {
            assert_eq!(TrackDownloadState::from_str(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_is_never_parsed() {
        assert!(TrackDownloadState::from_str("unknown").is_err());
        assert!(TrackDownloadState::from_str("paused").is_err());
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let earlier = parse_timestamp("2025-03-01T10:00:00.000001Z").unwrap();
        let later = parse_timestamp("2025-03-01T10:00:00.5Z").unwrap();
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }
}
