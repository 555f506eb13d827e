//! Cluster coordination.
//!
//! Leadership is decided by Raft consensus. The role state machine only
//! sees the narrow [`raft::Consensus`] surface: edge-triggered leadership
//! notifications plus "who leads" and "am I leader" queries.

pub mod raft;
