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


//! Configuration for offline storage
//!
//! Scheduling and timeout values are fixed constants. Only the on-disk
//! locations are configurable, because mobile hosts hand us their own
//! application directories.
//!
//! # Default Location
//! - Desktop (macOS): ~/Library/Application Support/Relisten
//! - Desktop (Linux): ~/.local/share/Relisten
//! - Desktop (Windows): %APPDATA%/Relisten
//! - Android / iOS: must be supplied by the host app

use crate::error::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of transfers handed to the transfer agent at once
pub const MAX_CONCURRENT_TRANSFERS: usize = 3;

/// Timeout for establishing a connection and receiving response headers
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a whole transfer, including the body
pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Minimum interval between progress notifications for one transfer
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Name of the flat directory holding downloaded tracks
pub const STORAGE_DIR_NAME: &str = "offline-mp3s";

/// Extension of every stored track file
pub const TRACK_FILE_EXTENSION: &str = "mp3";

/// Extension appended to in-progress transfer files
pub const PARTIAL_FILE_EXTENSION: &str = "part";

const DATABASE_FILE_NAME: &str = "offline.db";

/// On-disk locations used by the offline subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Application data directory
    pub data_dir: PathBuf,
    /// Flat directory containing one file per downloaded track
    pub storage_dir: PathBuf,
    /// SQLite database holding track and source records
    pub database_path: PathBuf,
}

impl OfflineConfig {
    /// Derive storage and database locations from a data directory
    pub fn for_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            storage_dir: data_dir.join(STORAGE_DIR_NAME),
            database_path: data_dir.join(DATABASE_FILE_NAME),
            data_dir,
        }
    }

    /// Load configuration from a JSON file
    ///
    /// Falls back to the platform default when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::ConfigurationError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.storage_dir == self.data_dir {
            return Err(OfflineError::ConfigurationError(
                "storage_dir must be a dedicated directory, it is wiped by delete-all".to_string(),
            ));
        }
        if self.database_path.starts_with(&self.storage_dir) {
            return Err(OfflineError::ConfigurationError(
                "database_path must not live inside storage_dir".to_string(),
            ));
        }
        Ok(())
    }

    /// Get default data directory for the platform
    pub fn default_data_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Relisten")
        }

        #[cfg(target_os = "linux")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local").join("share").join("Relisten")
        }

        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(appdata).join("Relisten")
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            // Mobile hosts pass their own directory through `for_data_dir`
            PathBuf::from(".")
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self::for_data_dir(Self::default_data_dir())
    }
}
