//! vip-switch library -- floating VIP ownership driven by Raft leadership.
//!
//! A node follows consensus leadership through a debounced role state
//! machine (`Ready`, `Slave`, `Master`, `Destroy`) and runs an external
//! hook command on every committed transition. Hooks are the only way the
//! daemon touches the network: they bind or release the shared address.

use std::sync::Arc;

pub mod cluster;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod role;
pub mod server;

use crate::cluster::raft::Consensus;
use crate::config::Config;
use crate::role::RoleMachine;

/// Shared state for the status endpoint handlers.
pub struct AppState {
    /// Effective configuration after command-line overrides.
    pub config: Config,
    /// The node's role state machine.
    pub machine: Arc<RoleMachine>,
    /// Consensus handle, for leader queries.
    pub consensus: Arc<dyn Consensus>,
}
