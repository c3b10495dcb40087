use serde::{Deserialize, Serialize};

use super::ClusterView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct NodeState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub role: NodeRole,
    pub leader_id: Option<u64>,
    pub leader_address: Option<String>,
    pub heartbeat_received: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: NodeRole::Follower,
            leader_id: None,
            leader_address: None,
            heartbeat_received: false,
        }
    }
}

/// Point-in-time view of a node, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: u64,
    pub address: String,
    pub role: NodeRole,
    pub term: u64,
    pub voted_for: Option<u64>,
    pub leader_id: Option<u64>,
    pub leader_address: Option<String>,
    pub cluster: ClusterView,
}
