//! Message Index - message key to message group lookup for a translation wiki.
//!
//! Every translatable message belongs to a message group. The index maps the
//! normalized key of each message (`"{namespace}:{key}"`) to the groups that
//! claim it, so a page can be attributed to its group without scanning every
//! group definition.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          MessageIndex                           │
//! │   lookup_group_ids │ primary_group_id │ store_interim │ rebuild │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                      │                      │
//! ┌────────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │  LookupCache   │   │  InterimOverlay    │   │ RebuildCoordinator│
//! │  (LRU, local)  │   │  (TTL slot, ~24h)  │   │ lock → diff → write│
//! └────────────────┘   └────────────────────┘   └──────────────────┘
//!                                 │                      │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   IndexStore │ InterimStore │ IndexLock │ TaskQueue │ Observer  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Maintenance runtime and index assembly
//! - [`core::time`] - Timestamps and clocks
//! - [`core::error`] - Error types
//!
//! ## Index
//! - [`index::key`] - Key normalization and identifiers
//! - [`index::snapshot`] - Key to claimants mapping
//! - [`index::diff`] - Snapshot comparison
//! - [`index::cache`] - Bounded lookup cache
//! - [`index::interim`] - Interim overlay
//! - [`index::lookup`] - Lookup facade
//! - [`index::rebuild`] - Rebuild coordinator
//! - [`index::service`] - The assembled index
//!
//! ## Collaborators
//! - [`groups`] - Group registry contract and static groups
//! - [`storage`] - Store, overlay slot, lock and token backends
//! - [`jobs`] - Deferred tasks and membership notifications
//!
//! ## Operations
//! - [`ops::metrics`] - Index metrics
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A key resolves to every claiming group, first claimant first
//! - Rebuilds are mutually exclusive across processes and never re-entrant
//! - Nothing is written unless the full new snapshot was computed
//! - Overlay entries newer than a rebuild survive it and trigger a follow-up

// Core infrastructure
pub mod core;

// Index engine
pub mod index;

// Collaborators
pub mod groups;
pub mod jobs;
pub mod storage;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use self::core::error::{IndexError, IndexResult};
pub use index::{GroupId, IndexComponents, IndexSettings, MessageIndex, NormalizedKey};
pub use ops::metrics;
