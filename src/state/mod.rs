//! Durable tracking state.
//!
//! The scanner's memory between runs lives here:
//!
//! * [`entry`]: the per-path record and its change-detection logic.
//! * [`store`]: the versioned on-disk blob with atomic rewrite and
//!   legacy-format upgrade.
//! * [`lock`]: shared/exclusive advisory locks that serialize concurrent
//!   invocations sharing one database.

pub mod entry;
pub mod lock;
pub mod store;

pub use entry::{Change, Entry, StatSnapshot};
pub use lock::{FileLock, LockError};
pub use store::{LoadedState, StateStore, StoreError};
