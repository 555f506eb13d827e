//! Role state machine driven by consensus leadership.
//!
//! A node is `Ready` until the first leadership signal, then `Master` or
//! `Slave` as leadership moves, and finally `Destroy` on shutdown. Every
//! candidate role, whether it comes from a pushed leadership edge or from
//! the periodic poll, goes through [`RoleMachine::transition`] under one
//! async mutex. That mutex is held while the transition's hook runs, so a
//! second transition cannot start until the first one's hook returns.
//!
//! Rapid flapping is absorbed by a debounce window measured from the last
//! committed transition. Leaving `Ready` is never debounced, and the
//! `Destroy` transition on shutdown bypasses the window entirely.
//!
//! A failed hook is logged and the role stays committed. Drift between the
//! logical role and the bound VIP is left to the next leadership change.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::raft::Consensus;
use crate::config::StateConfig;
use crate::errors::HookError;
use crate::hooks::system::{HookEvent, HookSystem};
use crate::metrics::{CURRENT_ROLE, TRANSITIONS_DEBOUNCED_TOTAL, TRANSITIONS_TOTAL};

/// Logical role of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Ready,
    Slave,
    Master,
    Destroy,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Ready => "Ready",
            Role::Slave => "Slave",
            Role::Master => "Master",
            Role::Destroy => "Destroy",
        }
    }

    /// Hook event fired when this role is entered.
    pub fn event(self) -> HookEvent {
        match self {
            Role::Ready => HookEvent::ToReady,
            Role::Slave => HookEvent::ToSlave,
            Role::Master => HookEvent::ToMaster,
            Role::Destroy => HookEvent::ToDestroy,
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Role::Ready => 0.0,
            Role::Slave => 1.0,
            Role::Master => 2.0,
            Role::Destroy => 3.0,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Committed role pair, as observed by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub current: Role,
    pub previous: Role,
}

/// Result of evaluating one candidate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Candidate equals the current role, the node is destroyed, or it is shutting down.
    Unchanged,
    /// Suppressed by the debounce window.
    Debounced,
    /// Role changed and the entry hook ran (successfully or not).
    Committed { from: Role, to: Role },
}

struct RoleState {
    current: Role,
    previous: Role,
    last_transition: Instant,
}

/// Owns this node's role and turns leadership signals into transitions.
pub struct RoleMachine {
    node_id: String,
    state: Mutex<RoleState>,
    snapshot_tx: watch::Sender<RoleSnapshot>,
    hooks: Arc<HookSystem>,
    consensus: Arc<dyn Consensus>,
    debounce: Duration,
    poll_interval: Duration,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RoleMachine {
    pub fn new(
        node_id: impl Into<String>,
        hooks: Arc<HookSystem>,
        consensus: Arc<dyn Consensus>,
        debounce: Duration,
        poll_interval: Duration,
    ) -> Self {
        let initial = RoleSnapshot {
            current: Role::Ready,
            previous: Role::Ready,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        gauge!(CURRENT_ROLE).set(Role::Ready.gauge_value());

        Self {
            node_id: node_id.into(),
            state: Mutex::new(RoleState {
                current: Role::Ready,
                previous: Role::Ready,
                last_transition: Instant::now(),
            }),
            snapshot_tx,
            hooks,
            consensus,
            debounce,
            poll_interval,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            monitor: std::sync::Mutex::new(None),
        }
    }

    pub fn from_config(
        node_id: impl Into<String>,
        state: &StateConfig,
        hooks: Arc<HookSystem>,
        consensus: Arc<dyn Consensus>,
    ) -> Self {
        Self::new(node_id, hooks, consensus, state.debounce(), state.poll_interval())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Last committed role.
    pub fn current_role(&self) -> Role {
        self.snapshot_tx.borrow().current
    }

    /// Last committed role together with the one before it.
    pub fn snapshot(&self) -> RoleSnapshot {
        *self.snapshot_tx.borrow()
    }

    /// Watch committed role changes.
    pub fn subscribe(&self) -> watch::Receiver<RoleSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Run the `ToReady` hook once, without changing the role.
    pub async fn announce_ready(&self) -> Result<(), HookError> {
        let state = self.state.lock().await;
        if state.current != Role::Ready {
            return Ok(());
        }
        info!(node_id = %self.node_id, "executing ToReady hook");
        self.hooks
            .execute_hook(HookEvent::ToReady, &self.shutdown)
            .await
    }

    /// Spawn the leadership monitor. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().expect("mutex poisoned");
        if monitor.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        info!(node_id = %self.node_id, role = %self.current_role(), "starting role machine");
        let edges = self.consensus.leadership_changes();
        let machine = Arc::clone(self);
        *monitor = Some(tokio::spawn(async move {
            machine.monitor_leadership(edges).await;
        }));
    }

    async fn monitor_leadership(&self, edges: broadcast::Receiver<bool>) {
        let mut edges = Some(edges);
        let mut ticker = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(node_id = %self.node_id, "stopping role machine");
                    break;
                }
                edge = next_edge(&mut edges) => match edge {
                    Ok(is_leader) => {
                        self.observe_leadership(is_leader).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed leadership notifications, polling consensus");
                        self.poll_consensus().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("leadership channel closed, relying on polling");
                        edges = None;
                    }
                },
                _ = ticker.tick() => {
                    self.poll_consensus().await;
                }
            }
        }
    }

    /// Handle a pushed leadership edge.
    pub async fn observe_leadership(&self, is_leader: bool) -> TransitionOutcome {
        let candidate = if is_leader { Role::Master } else { Role::Slave };
        self.transition(candidate).await
    }

    /// Re-derive the role from the consensus leader queries.
    pub async fn poll_consensus(&self) -> TransitionOutcome {
        let candidate = match self.consensus.current_leader() {
            None => Role::Slave,
            Some(_) if self.consensus.is_self_leader() => Role::Master,
            Some(_) => Role::Slave,
        };
        self.transition(candidate).await
    }

    async fn transition(&self, candidate: Role) -> TransitionOutcome {
        let mut state = self.state.lock().await;

        if self.shutdown.is_cancelled() || state.current == Role::Destroy || candidate == state.current {
            return TransitionOutcome::Unchanged;
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_transition);
        if elapsed < self.debounce && state.current != Role::Ready {
            debug!(
                from = %state.current,
                to = %candidate,
                elapsed_ms = elapsed.as_millis() as u64,
                "debouncing role transition"
            );
            counter!(TRANSITIONS_DEBOUNCED_TOTAL).increment(1);
            return TransitionOutcome::Debounced;
        }

        let from = state.current;
        self.commit(&mut state, candidate, now);

        if let Err(err) = self
            .hooks
            .execute_hook(candidate.event(), &self.shutdown)
            .await
        {
            error!(role = %candidate, error = %err, "hook execution failed during role transition");
        }

        TransitionOutcome::Committed {
            from,
            to: candidate,
        }
    }

    fn commit(&self, state: &mut RoleState, to: Role, now: Instant) {
        info!(node_id = %self.node_id, from = %state.current, to = %to, "role transition");
        counter!(TRANSITIONS_TOTAL, "from" => state.current.as_str(), "to" => to.as_str()).increment(1);
        gauge!(CURRENT_ROLE).set(to.gauge_value());

        state.previous = state.current;
        state.current = to;
        state.last_transition = now;
        self.snapshot_tx.send_replace(RoleSnapshot {
            current: state.current,
            previous: state.previous,
        });
    }

    /// Stop monitoring and enter `Destroy`, running its hook.
    ///
    /// In-flight transition hooks are canceled first. Only the first call
    /// does anything.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(node_id = %self.node_id, "role machine already shut down");
            return;
        }

        self.shutdown.cancel();
        let monitor = self.monitor.lock().expect("mutex poisoned").take();
        if let Some(handle) = monitor {
            if let Err(err) = handle.await {
                warn!(error = %err, "role monitor task ended abnormally");
            }
        }

        let mut state = self.state.lock().await;
        info!(node_id = %self.node_id, current_role = %state.current, "shutting down role machine");
        self.commit(&mut state, Role::Destroy, Instant::now());

        // The machine-wide token is already canceled; ToDestroy is bounded by its timeout only.
        if let Err(err) = self
            .hooks
            .execute_hook(HookEvent::ToDestroy, &CancellationToken::new())
            .await
        {
            error!(error = %err, "destroy hook failed");
        }
    }

    /// Whether [`RoleMachine::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn next_edge(edges: &mut Option<broadcast::Receiver<bool>>) -> Result<bool, RecvError> {
    match edges {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
