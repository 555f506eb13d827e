//! Error types for hook execution and role orchestration.
//!
//! Each layer owns one enum: the executor reports how a process ended,
//! the template expander reports rendering failures, and the hook system
//! decorates executor failures with the failure policy that was applied.
//! Startup code wraps all of these in `anyhow::Error`.

use std::time::Duration;

use thiserror::Error;

use crate::hooks::system::HookEvent;

/// Outcome of a single process invocation that did not exit cleanly.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The configured command path was empty.
    #[error("command cannot be empty")]
    EmptyCommand,

    /// Path resolution failed.
    #[error("command not found: {command}")]
    NotFound { command: String },

    /// The process could not be spawned.
    #[error("failed to start command {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The deadline passed before the process exited.
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The caller canceled the invocation.
    #[error("command canceled")]
    Canceled,

    /// The process exited with a non-zero status or died from a signal.
    #[error("command exited with status {code}{}", signal_suffix(.signal))]
    NonZeroExit { code: i32, signal: Option<i32> },

    /// Waiting on the child failed at the OS level.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),
}

impl ExecError {
    /// True for timeout or cancellation, as opposed to a process failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ExecError::Timeout { .. } | ExecError::Canceled)
    }
}

fn signal_suffix(signal: &Option<i32>) -> String {
    match signal {
        Some(sig) => format!(" (signal {sig})"),
        None => String::new(),
    }
}

/// Rejection reasons for a configured hook command path.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("command path cannot contain spaces or tabs: {command:?}")]
    Whitespace { command: String },

    #[error("command path '{path}' is not in a safe directory")]
    UnsafeDirectory { path: String },

    #[error("failed to resolve absolute path for {command}: {source}")]
    Resolve {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Template rendering failures. Rendering never produces partial output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references undefined variable .{name}")]
    UndefinedVariable { name: String },

    #[error("unclosed action starting at offset {offset}")]
    Unclosed { offset: usize },

    #[error("malformed action {{{{{action}}}}}")]
    Malformed { action: String },
}

/// Errors surfaced by [`crate::hooks::system::HookSystem::execute_hook`].
#[derive(Debug, Error)]
pub enum HookError {
    /// The event name does not map to a hook definition.
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// Environment or argument templates failed to render.
    #[error("failed to expand templates for {event}: {source}")]
    Template {
        event: HookEvent,
        #[source]
        source: TemplateError,
    },

    /// The hook failed under the `abort` policy.
    #[error("hook {event} failed with abort strategy: {source}")]
    Aborted {
        event: HookEvent,
        #[source]
        source: ExecError,
    },

    /// Every attempt under the `retry` policy failed.
    #[error("hook {event} failed after {attempts} retries: {source}")]
    RetriesExhausted {
        event: HookEvent,
        attempts: u32,
        #[source]
        source: ExecError,
    },

    /// The deadline or a cancellation fired while waiting to retry.
    #[error("hook {event} retry interrupted after {attempts} attempts: {source}")]
    RetryInterrupted {
        event: HookEvent,
        attempts: u32,
        #[source]
        source: ExecError,
    },

    /// The configured failure policy is not one of abort, continue, retry.
    #[error("hook {event} failed with unknown strategy '{policy}': {source}")]
    UnknownPolicy {
        event: HookEvent,
        policy: String,
        #[source]
        source: ExecError,
    },
}
