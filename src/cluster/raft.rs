//! Raft consensus boundary for vip-switch.
//!
//! [`Consensus`] is everything the role state machine needs from the
//! consensus layer. [`RaftNode`] implements it for a single process: it
//! records the leader reported by whatever drives elections, publishes an
//! edge on every change of this node's own leadership, and self-elects
//! when it is the only voter in the cluster.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the leadership edge channel.
const LEADERSHIP_CHANNEL_CAPACITY: usize = 16;

/// Leadership surface consumed by the role state machine.
pub trait Consensus: Send + Sync + 'static {
    /// Subscribe to edge-triggered "am I leader now" notifications.
    fn leadership_changes(&self) -> broadcast::Receiver<bool>;

    /// ID of the current leader, `None` when no leader is known.
    fn current_leader(&self) -> Option<String>;

    /// Whether this node currently leads.
    fn is_self_leader(&self) -> bool;

    /// Stop participating in consensus.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// A node in the Raft cluster, as seen by this process.
pub struct RaftNode {
    /// Unique identifier for this node.
    pub node_id: String,
    /// Consensus address of this node.
    pub raft_addr: String,
    /// Addresses of peer nodes.
    pub peers: Vec<String>,
    leader: RwLock<Option<String>>,
    leader_tx: broadcast::Sender<bool>,
    running: AtomicBool,
}

impl RaftNode {
    /// Create a new `RaftNode` with the given ID, address and peer list.
    pub fn new(node_id: impl Into<String>, raft_addr: impl Into<String>, peers: Vec<String>) -> Self {
        let (leader_tx, _) = broadcast::channel(LEADERSHIP_CHANNEL_CAPACITY);
        Self {
            node_id: node_id.into(),
            raft_addr: raft_addr.into(),
            peers,
            leader: RwLock::new(None),
            leader_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Start participating. A node with no peers elects itself.
    pub fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            node_id = %self.node_id,
            raft_addr = %self.raft_addr,
            peers = ?self.peers,
            "starting raft node"
        );

        if self.peers.is_empty() {
            info!(node_id = %self.node_id, "single-voter cluster, bootstrapping as leader");
            self.observe_leader(Some(self.node_id.as_str()));
        }
        Ok(())
    }

    /// Record the cluster's current leader.
    ///
    /// Emits `true`/`false` on the leadership channel only when this node's
    /// own leadership flips; a change between two other leaders is silent
    /// and is picked up by polling.
    pub fn observe_leader(&self, leader: Option<&str>) {
        let mut current = self.leader.write().expect("lock poisoned");
        let was_leader = current.as_deref() == Some(self.node_id.as_str());
        let is_leader = leader == Some(self.node_id.as_str());

        if current.as_deref() != leader {
            debug!(node_id = %self.node_id, leader = ?leader, "leader changed");
        }
        *current = leader.map(str::to_string);
        drop(current);

        if was_leader != is_leader {
            info!(node_id = %self.node_id, is_leader, "leadership changed");
            // No subscribers is fine; the poll covers it.
            let _ = self.leader_tx.send(is_leader);
        }
    }

    /// Whether [`RaftNode::start`] has run and shutdown has not.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Consensus for RaftNode {
    fn leadership_changes(&self) -> broadcast::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    fn current_leader(&self) -> Option<String> {
        self.leader.read().expect("lock poisoned").clone()
    }

    fn is_self_leader(&self) -> bool {
        self.leader.read().expect("lock poisoned").as_deref() == Some(self.node_id.as_str())
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.running.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            info!(node_id = %self.node_id, "shutting down raft node");
            if self.is_self_leader() {
                self.observe_leader(None);
            }
            info!(node_id = %self.node_id, "raft node shutdown complete");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_voter_self_elects() {
        let node = RaftNode::new("n1", "127.0.0.1:10001", vec![]);
        let mut rx = node.leadership_changes();
        node.start().unwrap();

        assert!(node.is_running());
        assert!(node.is_self_leader());
        assert_eq!(node.current_leader().as_deref(), Some("n1"));
        assert!(rx.try_recv().unwrap());
    }

    #[test]
    fn test_multi_voter_waits_for_leader() {
        let node = RaftNode::new("n1", "127.0.0.1:10001", vec!["127.0.0.1:10002".to_string()]);
        node.start().unwrap();
        assert!(!node.is_self_leader());
        assert_eq!(node.current_leader(), None);
    }

    #[test]
    fn test_edges_only_on_own_leadership_flips() {
        let node = RaftNode::new("n1", "127.0.0.1:10001", vec!["peer".to_string()]);
        let mut rx = node.leadership_changes();

        node.observe_leader(Some("n2"));
        assert!(rx.try_recv().is_err());

        node.observe_leader(Some("n1"));
        assert!(rx.try_recv().unwrap());

        node.observe_leader(Some("n1"));
        assert!(rx.try_recv().is_err());

        node.observe_leader(Some("n3"));
        assert!(!rx.try_recv().unwrap());
        assert_eq!(node.current_leader().as_deref(), Some("n3"));
    }

    #[tokio::test]
    async fn test_shutdown_steps_down_once() {
        let node = RaftNode::new("n1", "127.0.0.1:10001", vec![]);
        node.start().unwrap();
        let mut rx = node.leadership_changes();

        node.shutdown().await.unwrap();
        assert!(!node.is_running());
        assert!(!node.is_self_leader());
        assert!(!rx.try_recv().unwrap());

        node.shutdown().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
