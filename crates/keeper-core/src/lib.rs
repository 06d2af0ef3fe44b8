//! Install, update, and supervision engine for keeper.
//!
//! This crate owns everything between the release feed and a running
//! instance, independent of any front end:
//! - Release discovery, caching, and platform asset selection.
//! - Streaming downloads with progress and archive extraction.
//! - Backup-then-replace installs that carry user data forward.
//! - Legacy layout migration and child process supervision.

mod carry;
pub mod deps;
mod download;
pub mod engine;
mod error;
mod extract;
mod instance;
mod lock;
pub mod migrate;
pub mod process;
pub mod release;
mod state;
pub mod swap;
pub mod version;

/// Recursive data copy used after an install and its report types.
pub use carry::{CopyReport, SkippedEntry, copy_tree};
/// Runtime dependency checks and installs for ffmpeg and yt-dlp.
pub use deps::{DependencySource, DependencyTracker, RuntimeDependency};
/// Streaming asset download and the progress event it emits.
pub use download::{CHUNK_SIZE, Progress, ProgressSender, download};
/// Orchestration of the install pipeline and process lifecycle.
pub use engine::{Completion, Engine, EngineConfig, InstanceRuntime};
/// Error taxonomy shared by every engine operation.
pub use error::{EngineError, ErrorKind};
/// Archive classification and extraction.
pub use extract::{ArchiveKind, extract_archive};
/// Persisted instance data and the store collaborators implement.
pub use instance::{InstanceRecord, InstanceStore};
/// Cross-process ownership of an instance.
pub use lock::InstanceLock;
/// Layout migration for instances created by older releases.
pub use migrate::{MigrationOutcome, MigrationReport, migrate_all, migrate_layout, needs_migration};
/// Child process ownership and version probing.
pub use process::{Launch, ProcessExit, ProcessSupervisor, RunSlot, RunState, probe_version};
/// Release feed client and asset selection.
pub use release::{
    FeedConfig, ReleaseAsset, ReleaseClient, ReleaseDescriptor, expected_asset_name, select_asset,
};
/// Instance state derivation and command gating.
pub use state::{Command, DepState, InstanceState, ensure_allowed};
/// Phased install swap and one-step rollback.
pub use swap::{InstallSwap, SwapPhase, SwapReport, relocate_install, restore_backup};
/// Version normalization and comparison.
pub use version::{compare_versions, is_update_available, normalize_version};
