//! Message key index.
//!
//! - [`key`] - normalized keys, group ids, page identities
//! - [`snapshot`] - the full key to claimants mapping
//! - [`diff`] - snapshot comparison
//! - [`cache`] - bounded process-local lookup cache
//! - [`interim`] - overlay of keys added since the last rebuild
//! - [`lookup`] - read path over cache, overlay and store
//! - [`rebuild`] - lock-guarded full rebuild
//! - [`service`] - all of the above behind one [`MessageIndex`]
//!
//! # Invariants
//!
//! - A key's claimant list is never empty; its first element is the primary
//!   group.
//! - A rebuild writes nothing unless the full new snapshot was computed.
//! - An overlay entry is deleted only by a rebuild whose purge timestamp is
//!   at or after the entry's timestamp.

pub mod cache;
pub mod diff;
pub mod interim;
pub mod key;
pub mod lookup;
pub mod rebuild;
pub mod service;
pub mod snapshot;

pub use key::{GroupId, NormalizedKey, PageIdentity};
pub use rebuild::{KeyConflict, RebuildReport};
pub use service::{IndexComponents, IndexSettings, MessageIndex};
pub use snapshot::{GroupIds, IndexSnapshot};
