//! Hook dispatch.
//!
//! A hook is either a native callable or a shell command template; the
//! dispatcher interprets its boolean result as "commit the state update".
//! Command templates substitute `%s` with the quoted, shell-escaped path.
//! Hooks never abort a scan: a failing callable or a nonzero exit becomes
//! `false`.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};

use crate::config::ScanConfig;
use crate::state::entry::Entry;

/// Context handed to callable hooks alongside the entry.
pub struct HookContext<'a> {
    /// The active scan configuration (dryrun, sudo, timestamp sources...).
    pub config: &'a ScanConfig,
    /// The instant this scan started.
    pub now: DateTime<Utc>,
    /// Entry age in fractional days, present when dispatched from the age
    /// or size policy.
    pub age_days: Option<f64>,
}

/// A native hook: receives the entry and the scan context, decides whether
/// the state update should be committed.
pub type HookFn = Box<dyn Fn(&mut Entry, &HookContext<'_>) -> anyhow::Result<bool>>;

/// A user-supplied decision hook.
pub enum Action {
    /// In-process callable.
    Callable(HookFn),
    /// Shell command template; `%s` expands to the escaped path.
    Command(String),
}

impl Action {
    /// Wrap a closure or function as a callable hook.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&mut Entry, &HookContext<'_>) -> anyhow::Result<bool> + 'static,
    {
        Action::Callable(Box::new(f))
    }

    /// Wrap a shell command template.
    pub fn command(template: impl Into<String>) -> Self {
        Action::Command(template.into())
    }

    /// Invoke the hook. Callable errors and nonzero exits are logged and
    /// mapped to `false`; they never propagate.
    pub fn dispatch(&self, entry: &mut Entry, ctx: &HookContext<'_>) -> bool {
        match self {
            Action::Callable(f) => match f(entry, ctx) {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Hook failed for '{}': {:#}", entry.path().display(), e);
                    false
                }
            },
            Action::Command(template) => {
                run_command(template, entry.path(), ctx.config.sudo, ctx.config.dryrun)
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Callable(_) => f.write_str("Action::Callable(..)"),
            Action::Command(cmd) => f.debug_tuple("Action::Command").field(cmd).finish(),
        }
    }
}

/// The four decision hooks of the engine. Absent added/changed/removed
/// hooks default to "commit"; an absent past-limit hook means the age and
/// size policies only report.
#[derive(Debug)]
pub struct Hooks {
    /// A path was seen for the first time.
    pub on_added: Option<Action>,
    /// A tracked path's contents or timestamp changed.
    pub on_changed: Option<Action>,
    /// A tracked path disappeared from disk.
    pub on_removed: Option<Action>,
    /// A tracked path breached the age or size policy.
    pub on_past_limit: Option<Action>,
}

impl Default for Hooks {
    /// The stock hook set: policy breaches remove the entry from disk;
    /// everything else just updates state.
    fn default() -> Self {
        Self {
            on_added: None,
            on_changed: None,
            on_removed: None,
            on_past_limit: Some(Action::callable(safe_remove)),
        }
    }
}

impl Hooks {
    /// A hook set that observes but never mutates anything.
    #[must_use]
    pub fn observe_only() -> Self {
        Self {
            on_added: None,
            on_changed: None,
            on_removed: None,
            on_past_limit: None,
        }
    }
}

/// The stock past-limit hook: delete the entry's path, report success.
pub fn safe_remove(entry: &mut Entry, ctx: &HookContext<'_>) -> anyhow::Result<bool> {
    Ok(entry.remove(ctx.config))
}

/// Past-limit hook that relocates to the system trash instead of deleting.
pub fn safe_trash(entry: &mut Entry, ctx: &HookContext<'_>) -> anyhow::Result<bool> {
    Ok(entry.trash(ctx.config))
}

/// Escape `$`, `"` and `\` so the path survives double-quoting in a shell
/// command line.
#[must_use]
pub fn shell_escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '$' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Substitute the quoted, escaped path into every `%s` of the template, or
/// append it when the template has no placeholder.
#[must_use]
pub fn expand_template(template: &str, path: &Path) -> String {
    let quoted = format!("\"{}\"", shell_escape(&path.to_string_lossy()));
    if template.contains("%s") {
        template.replace("%s", &quoted)
    } else {
        format!("{template} {quoted}")
    }
}

/// Expand and execute a command template against a path through the shell.
/// Exit status 0 maps to `true`. Under dryrun the command is logged and
/// reported successful without being run.
pub fn run_shell(template: &str, path: &Path, dryrun: bool) -> bool {
    let cmd = expand_template(template, path);
    if dryrun {
        log::info!("dryrun: not executing: {cmd}");
        return true;
    }
    log::debug!("Executing: {cmd}");
    match Command::new("/bin/sh").arg("-c").arg(&cmd).status() {
        Ok(status) => status.success(),
        Err(e) => {
            log::error!("Could not spawn shell for '{cmd}': {e}");
            false
        }
    }
}

/// [`run_shell`] with a sudo retry: a failed command is attempted once more
/// with `sudo` prefixed when the option is set.
pub fn run_command(template: &str, path: &Path, sudo: bool, dryrun: bool) -> bool {
    if run_shell(template, path, dryrun) {
        return true;
    }
    log::error!(
        "Command failed: '{}' with '{}'",
        template,
        path.display()
    );
    if sudo {
        return run_shell(&format!("sudo {template}"), path, dryrun);
    }
    false
}
