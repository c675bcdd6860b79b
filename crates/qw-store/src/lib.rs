//! Concurrent, persistent store for qw-core wave patterns.
//!
//! One writer at a time (ingest, import), any number of readers working on
//! immutable snapshots, and an explicit `persist` step that writes the current
//! snapshot atomically through a [`SnapshotBackend`].

pub mod backend;
pub mod config;
pub mod error;
pub mod index;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backend::{JsonFileBackend, SnapshotBackend, open_backend};
pub use config::{BackendKind, StoreConfig, sanitize_name};
pub use error::{AppliedWrite, Result, StoreError};
pub use index::FrequencyBands;
pub use sqlite::SqliteBackend;
pub use store::{ImportReport, IngestOutcome, PatternStore, SearchHit, StoreStats};
