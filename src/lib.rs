//! boardpulse: conflict detection, resolution suggestion, and pattern
//! learning for project boards.
//!
//! The engine periodically snapshots each board, runs resource, schedule, and
//! dependency detection passes over it, reconciles the findings with stored
//! open conflicts, ranks candidate resolutions, and learns from feedback which
//! resolution strategies actually work per board.

pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod learn;
pub mod migrations;
pub mod notify;
pub mod orchestrator;
pub mod queries;
pub mod snapshot;
pub mod suggest;
pub mod types;

pub use config::EngineConfig;
pub use error::EngineError;
pub use learn::PatternLearner;
pub use notify::{Notifier, NullNotifier};
pub use orchestrator::{scan_channel, CycleReport, Orchestrator, ScanHandle, ScanReport, ScanTrigger};
pub use snapshot::SnapshotReader;
pub use suggest::Suggester;
pub use types::{Conflict, ConflictStatus, ConflictType, Resolution, ResolutionType, Severity, Snapshot};
