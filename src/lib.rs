//! dirsweep — stateful directory sweeping.
//!
//! A scanner watches a directory subtree across repeated invocations,
//! keeps a durable `path → entry` index, classifies every path as added,
//! changed, unchanged or removed, and enforces age and aggregate-size
//! retention policies through user-supplied hooks. Concurrent invocations
//! sharing one state database serialize on advisory file locks, and long
//! integrity scans checkpoint their progress atomically.

pub mod actions;
pub mod cli;
pub mod config;
pub mod logging;
pub mod scanner;
pub mod state;

pub use actions::{safe_remove, safe_trash, Action, HookContext, Hooks};
pub use config::{ConfigError, ScanConfig, SizeLimit};
pub use scanner::{ScanError, ScanReport, Scanner};
pub use state::{Entry, StateStore};
