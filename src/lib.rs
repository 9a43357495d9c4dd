//! Relisten offline core
//!
//! Keeps archival concert recordings playable without a network:
//! a download coordinator bounded to three simultaneous transfers, a SQLite
//! state store that survives restarts, and read-only queries over what is
//! stored locally.
//!
//! # Modules
//! - `download` - coordinator, transfer agents and lifecycle events
//! - `storage` - SQLite state store
//! - `library` - availability and disk usage queries
//! - `file` - on-disk layout of track files
//! - `config` - constants and paths

pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod library;
pub mod model;
pub mod storage;

pub use config::OfflineConfig;
pub use download::{DownloadCoordinator, HttpTransferAgent, OfflineEvent};
pub use error::{OfflineError, Result};
pub use file::StorageLayout;
pub use library::{DiskUsage, OfflineLibrary};
pub use model::{Recording, SourceId, TrackDescriptor, TrackId};
