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


//! Storage directory scanner
//!
//! Compares the files in the storage directory with the state store.
//! Leftover partial transfer files are always garbage after a restart.
//! Track files without a record are only reported; they may be waiting
//! for `import_downloaded`.

use crate::error::{OfflineError, Result};
use crate::file::paths::{remove_file_if_exists, StorageLayout};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

/// Scan results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResults {
    /// Number of regular files found
    pub files_found: usize,
    /// Partial transfer files
    pub partial_files: Vec<PathBuf>,
    /// Track files that no record points at
    pub unreferenced_files: Vec<PathBuf>,
}

/// Storage scanner
pub struct StorageScanner<'a> {
    layout: &'a StorageLayout,
}

impl<'a> StorageScanner<'a> {
    pub fn new(layout: &'a StorageLayout) -> Self {
        Self { layout }
    }

    /// Scan the storage directory
    ///
    /// `known_urls` are the URLs of every track record, in any state.
    pub async fn scan<'u>(&self, known_urls: impl IntoIterator<Item = &'u str>) -> Result<ScanResults> {
        let mut results = ScanResults::default();
        let root = self.layout.root();
        if !root.exists() {
            return Ok(results);
        }

        let expected: HashSet<String> = known_urls
            .into_iter()
            .map(StorageLayout::file_name_for_url)
            .collect();

        let mut entries = fs::read_dir(root).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to read directory {}: {}",
                root.display(),
                e
            ))
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            results.files_found += 1;

            if StorageLayout::is_partial_file(&path) {
                results.partial_files.push(path);
                continue;
            }

            let referenced = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| expected.contains(n))
                .unwrap_or(false);
            if !referenced {
                results.unreferenced_files.push(path);
            }
        }

        Ok(results)
    }

    /// Delete partial transfer files found by a scan
    ///
    /// Returns how many were removed. Failures are logged and skipped.
    pub async fn remove_partial_files(&self, results: &ScanResults) -> usize {
        let mut removed = 0;
        for path in &results.partial_files {
            match remove_file_if_exists(path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %path.display(), error = %e, "Failed to remove partial file"),
            }
        }
        removed
    }
}
