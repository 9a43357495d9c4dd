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


//! Storage layout
//!
//! One flat directory with one file per track. The file name is the
//! SHA-256 of the track's URL, hex encoded, plus a fixed extension, so it
//! never depends on mutable metadata such as the title.

use crate::config::{PARTIAL_FILE_EXTENSION, TRACK_FILE_EXTENSION};
use crate::error::{OfflineError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Location of offline track files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name for a URL: `sha256(url).mp3`
    pub fn file_name_for_url(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("{}.{}", hex::encode(digest), TRACK_FILE_EXTENSION)
    }

    /// Full path a track downloaded from `url` is stored at
    pub fn path_for_url(&self, url: &str) -> PathBuf {
        self.root.join(Self::file_name_for_url(url))
    }

    /// Whether a path is an in-progress transfer file
    pub fn is_partial_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == PARTIAL_FILE_EXTENSION)
            .unwrap_or(false)
    }

    /// Create the storage directory if needed
    pub async fn ensure_exists(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to create storage directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Remove the whole storage directory and recreate it empty
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => info!(dir = %self.root.display(), "Removed storage directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.root.display(), "Storage directory already absent");
            }
            Err(e) => {
                return Err(OfflineError::FileIoError(format!(
                    "Failed to remove storage directory {}: {}",
                    self.root.display(),
                    e
                )))
            }
        }

        self.ensure_exists().await
    }
}

/// Remove a file, treating "already gone" as success
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_name_is_stable_hash() {
        let name = StorageLayout::file_name_for_url("https://archive.org/download/gd1977/d1t01.mp3");

        assert!(name.ends_with(".mp3"));
        // 32 byte digest, hex encoded
        assert_eq!(name.len(), 64 + 4);
        assert_eq!(
            name,
            StorageLayout::file_name_for_url("https://archive.org/download/gd1977/d1t01.mp3")
        );
        assert_ne!(
            name,
            StorageLayout::file_name_for_url("https://archive.org/download/gd1977/d1t02.mp3")
        );
    }

    #[test]
    fn test_path_is_flat() {
        let layout = StorageLayout::new("/data/offline-mp3s");
        let path = layout.path_for_url("https://example.com/a/b/c.mp3");
        assert_eq!(path.parent(), Some(Path::new("/data/offline-mp3s")));
    }

    #[test]
    fn test_partial_file_detection() {
        assert!(StorageLayout::is_partial_file(Path::new("/x/abc.mp3.7.part")));
        assert!(!StorageLayout::is_partial_file(Path::new("/x/abc.mp3")));
    }

    #[tokio::test]
    async fn test_reset_empties_directory() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("offline-mp3s"));
        layout.ensure_exists().await.unwrap();
        tokio::fs::write(layout.path_for_url("https://x/1.mp3"), b"data")
            .await
            .unwrap();

        layout.reset().await.unwrap();

        assert!(layout.root().is_dir());
        let mut entries = tokio::fs::read_dir(layout.root()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        remove_file_if_exists(&dir.path().join("nope.mp3")).await.unwrap();
    }
}
