//! Entry actions: hook dispatch and disk mutation.
//!
//! * [`hook`]: the tagged callable/command-template hook variants and the
//!   dispatcher that interprets their boolean results.
//! * [`remove`]: the removal protocol (secure wipe, subprocess tree delete,
//!   sudo retry, trash relocation), all dryrun-aware.

pub mod hook;
pub mod remove;

pub use hook::{safe_remove, safe_trash, Action, HookContext, HookFn, Hooks};
pub use remove::RemoveOptions;
