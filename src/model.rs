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


//! Track and recording descriptors
//!
//! These come from the metadata layer already resolved. The offline core
//! never fetches metadata itself; it only keys work by `track_id` and
//! fetches bytes from `url`.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Stable track identifier, independent of the track's URL
pub type TrackId = Uuid;

/// Recording (source) identifier
pub type SourceId = Uuid;

/// A single downloadable track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub track_id: TrackId,
    pub source_id: SourceId,
    pub show_id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub url: Url,
    /// Duration in seconds, when the metadata layer knows it
    pub duration: Option<f64>,
}

impl TrackDescriptor {
    pub fn new(
        track_id: TrackId,
        source_id: SourceId,
        show_id: Uuid,
        artist_id: Uuid,
        title: impl Into<String>,
        url: Url,
    ) -> Self {
        Self {
            track_id,
            source_id,
            show_id,
            artist_id,
            title: title.into(),
            url,
            duration: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }
}

/// One taped performance of a show, with its ordered tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub source_id: SourceId,
    pub show_id: Uuid,
    pub artist_id: Uuid,
    pub tracks: Vec<TrackDescriptor>,
}

impl Recording {
    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().map(|t| t.track_id)
    }
}
