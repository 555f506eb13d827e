//! Event-to-command dispatch with failure policies.
//!
//! [`HookSystem::execute_hook`] resolves an event to its configured
//! command, renders templates, builds the sanitized environment and
//! drives the [`Executor`]. A failed run is then handled according to the
//! hook's policy: `abort` propagates, `continue` swallows with a warning,
//! `retry` re-runs with quadratic backoff inside the same deadline.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HooksConfig, ResolvedHook};
use crate::errors::{ExecError, HookError};
use crate::hooks::env::build_hook_env;
use crate::hooks::executor::{ExecRequest, Executor};
use crate::hooks::template::{expand_args, expand_environment, TemplateData};
use crate::metrics::{HOOK_DURATION_SECONDS, HOOK_EXECUTIONS_TOTAL};

/// Total attempts, including the first, under the `retry` policy.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Role transition events that can carry a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    ToReady,
    ToMaster,
    ToSlave,
    ToDestroy,
}

impl HookEvent {
    pub const ALL: [HookEvent; 4] = [
        HookEvent::ToReady,
        HookEvent::ToMaster,
        HookEvent::ToSlave,
        HookEvent::ToDestroy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::ToReady => "ToReady",
            HookEvent::ToMaster => "ToMaster",
            HookEvent::ToSlave => "ToSlave",
            HookEvent::ToDestroy => "ToDestroy",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| HookError::UnknownEvent(s.to_string()))
    }
}

/// What to do when a hook command fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    Continue,
    Retry,
}

impl FailurePolicy {
    /// Parse a configured policy name; `None` for anything unrecognised.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "abort" => Some(FailurePolicy::Abort),
            "continue" => Some(FailurePolicy::Continue),
            "retry" => Some(FailurePolicy::Retry),
            _ => None,
        }
    }
}

/// Delay before retry number `retry` (1-based): `retry²` seconds.
pub fn retry_backoff(retry: u32) -> Duration {
    Duration::from_secs(u64::from(retry) * u64::from(retry))
}

/// Runs the configured hook for each role event.
///
/// Holds no role state; concurrent calls for different events are safe.
pub struct HookSystem {
    hooks: HooksConfig,
    node_id: String,
    raft_addr: String,
    executor: Arc<dyn Executor>,
}

impl HookSystem {
    pub fn new(config: &Config, executor: Arc<dyn Executor>) -> Self {
        Self::from_parts(
            config.hooks.clone(),
            config.node.id.clone(),
            config.node.raft_addr.clone(),
            executor,
        )
    }

    pub fn from_parts(
        hooks: HooksConfig,
        node_id: impl Into<String>,
        raft_addr: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            hooks,
            node_id: node_id.into(),
            raft_addr: raft_addr.into(),
            executor,
        }
    }

    /// Run the hook for an event given by name.
    pub async fn execute_named(&self, name: &str, cancel: &CancellationToken) -> Result<(), HookError> {
        let event: HookEvent = name.parse()?;
        self.execute_hook(event, cancel).await
    }

    /// Run the hook for `event`.
    ///
    /// Returns `Ok` when hooks are disabled or the event has no command.
    pub async fn execute_hook(&self, event: HookEvent, cancel: &CancellationToken) -> Result<(), HookError> {
        if !self.hooks.enabled {
            debug!(event = %event, "hooks disabled, skipping");
            return Ok(());
        }

        let hook = self.hooks.hook_for(event);
        if hook.command.is_empty() {
            debug!(event = %event, "no hook command configured");
            return Ok(());
        }

        info!(event = %event, command = %hook.command, "executing hook");

        let data = TemplateData {
            node_id: self.node_id.clone(),
            event: event.to_string(),
            raft_addr: self.raft_addr.clone(),
        };
        let env = expand_environment(&hook.environment, &data)
            .map_err(|source| HookError::Template { event, source })?;
        let args =
            expand_args(&hook.args, &data).map_err(|source| HookError::Template { event, source })?;

        let request = ExecRequest {
            command: hook.command.clone(),
            args,
            env: build_hook_env(event.as_str(), &self.node_id, &env),
            event: event.to_string(),
            deadline: Instant::now() + hook.timeout,
        };

        let started = Instant::now();
        let result = self.run_with_policy(event, &hook, &request, cancel).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!(HOOK_EXECUTIONS_TOTAL, "event" => event.as_str(), "outcome" => outcome).increment(1);
        histogram!(HOOK_DURATION_SECONDS, "event" => event.as_str())
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_with_policy(
        &self,
        event: HookEvent,
        hook: &ResolvedHook,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<(), HookError> {
        let err = match self.executor.execute(request, cancel).await {
            Ok(()) => {
                info!(event = %event, "hook executed successfully");
                return Ok(());
            }
            Err(err) => err,
        };

        error!(event = %event, error = %err, "hook execution failed");

        match FailurePolicy::from_name(&hook.on_failure) {
            Some(FailurePolicy::Abort) => Err(HookError::Aborted { event, source: err }),
            Some(FailurePolicy::Continue) => {
                warn!(
                    event = %event,
                    error = %err,
                    "hook failed but continuing due to continue strategy"
                );
                Ok(())
            }
            Some(FailurePolicy::Retry) => self.retry(event, hook, request, cancel, err).await,
            None => Err(HookError::UnknownPolicy {
                event,
                policy: hook.on_failure.clone(),
                source: err,
            }),
        }
    }

    /// Attempts 2..=MAX_RETRY_ATTEMPTS, after the first attempt failed with `first`.
    async fn retry(
        &self,
        event: HookEvent,
        hook: &ResolvedHook,
        request: &ExecRequest,
        cancel: &CancellationToken,
        first: ExecError,
    ) -> Result<(), HookError> {
        let mut last = first;

        for attempt in 2..=MAX_RETRY_ATTEMPTS {
            let backoff = retry_backoff(attempt - 1);
            info!(
                event = %event,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "retrying hook"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HookError::RetryInterrupted {
                        event,
                        attempts: attempt - 1,
                        source: ExecError::Canceled,
                    });
                }
                _ = tokio::time::sleep_until(request.deadline) => {
                    return Err(HookError::RetryInterrupted {
                        event,
                        attempts: attempt - 1,
                        source: ExecError::Timeout { timeout: hook.timeout },
                    });
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            match self.executor.execute(request, cancel).await {
                Ok(()) => {
                    info!(event = %event, attempt, "hook succeeded on retry");
                    return Ok(());
                }
                Err(err) => {
                    warn!(event = %event, attempt, error = %err, "hook retry failed");
                    last = err;
                }
            }
        }

        Err(HookError::RetriesExhausted {
            event,
            attempts: MAX_RETRY_ATTEMPTS,
            source: last,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted [`Executor`] used by hook and role tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::hooks::executor::ExecFuture;

    /// Replays a queue of results (default success) and records each request.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        results: Mutex<VecDeque<Result<(), ExecError>>>,
        fail_always: bool,
        pub requests: Mutex<Vec<ExecRequest>>,
    }

    impl ScriptedExecutor {
        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_always: true,
                ..Self::default()
            }
        }

        pub fn with_results(results: Vec<Result<(), ExecError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().expect("mutex poisoned").len()
        }

        pub fn events(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("mutex poisoned")
                .iter()
                .map(|r| r.event.clone())
                .collect()
        }
    }

    impl Executor for ScriptedExecutor {
        fn execute<'a>(&'a self, request: &'a ExecRequest, _cancel: &'a CancellationToken) -> ExecFuture<'a> {
            self.requests
                .lock()
                .expect("mutex poisoned")
                .push(request.clone());
            let result = if self.fail_always {
                Err(ExecError::NonZeroExit {
                    code: 1,
                    signal: None,
                })
            } else {
                self.results
                    .lock()
                    .expect("mutex poisoned")
                    .pop_front()
                    .unwrap_or(Ok(()))
            };
            Box::pin(async move { result })
        }
    }
}
