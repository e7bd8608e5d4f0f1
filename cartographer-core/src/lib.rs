//! Cartographer Core Library
//!
//! This crate provides the core functionality for Cartographer:
//! - Room types, content checksums and on-disk envelopes
//! - Extraction of embedded navigation scripts into their own files
//! - Forward sync from a monolithic map into a per-room tree
//! - Rebuilding monolithic maps and script bundles from the tree
//! - Batched script formatting through an external tool
//! - Room validation and map download

pub mod builder;
pub mod download;
pub mod format;
pub mod script;
pub mod sync;
pub mod tree;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use builder::{BuildError, BuildProgress, BundleOptions, TreeBuilder, BUNDLE_MAPDB_FILE, BUNDLE_SCRIPT_DIR};
pub use download::{download, DownloadError, DownloadStats};
pub use format::{
    CommandFormatter, FormatProgress, Formatter, FormatterError, FormatterOutput, ScriptFormatBatch,
};
pub use script::{FallbackSource, Recovery, ScriptError, ScriptKind, ScriptReference};
pub use sync::{SyncEngine, SyncError, SyncEvent, SyncProgress};
pub use tree::{normalize_path, path_to_string, Tree};
pub use types::{
    BuildResults, ConfigError, DiskState, Envelope, FormatterConfig, OperationError, Operations,
    ProjectConfig, Room, RoomRecord, TimeCost, World,
};
pub use validation::{
    validate_files, validate_mapdb, validate_room, FieldIssue, FileValidationError,
    FileValidationReport, MapdbError, ValidatedMapdb, ValidationError,
};
