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


//! In-memory backlog of queued tracks waiting for a transfer slot
//!
//! Ordered by the record's `created_at`, ties broken by insertion order.
//! Each track appears at most once.

use crate::model::{TrackDescriptor, TrackId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

type OrderKey = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
pub struct Backlog {
    ordered: BTreeMap<OrderKey, TrackDescriptor>,
    keys: HashMap<TrackId, OrderKey>,
    next_seq: u64,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a track; returns false if it is already present
    pub fn insert(&mut self, created_at: DateTime<Utc>, track: TrackDescriptor) -> bool {
        if self.keys.contains_key(&track.track_id) {
            return false;
        }

        let key = (created_at, self.next_seq);
        self.next_seq += 1;
        self.keys.insert(track.track_id, key);
        self.ordered.insert(key, track);
        true
    }

    /// Remove and return the oldest track
    pub fn pop_front(&mut self) -> Option<TrackDescriptor> {
        let (_, track) = self.ordered.pop_first()?;
        self.keys.remove(&track.track_id);
        Some(track)
    }

    pub fn remove(&mut self, track_id: &TrackId) -> Option<TrackDescriptor> {
        let key = self.keys.remove(track_id)?;
        self.ordered.remove(&key)
    }

    pub fn contains(&self, track_id: &TrackId) -> bool {
        self.keys.contains_key(track_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.keys.clear();
    }

    /// Track ids in scheduling order
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.ordered.values().map(|t| t.track_id).collect()
    }
}
