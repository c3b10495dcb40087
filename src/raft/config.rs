use std::collections::BTreeMap;

use super::ClusterView;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: u64,
    pub address: String,
    pub peers: BTreeMap<u64, String>, // node_id -> address, including self
    pub tick_interval_ms: u64,
    pub election_jitter_ms: u64,
    pub rpc_timeout_ms: u64,
    pub update_system: bool,
}

impl RaftConfig {
    pub fn new(node_id: u64, address: &str) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(node_id, address.to_string());
        Self {
            node_id,
            address: address.to_string(),
            peers,
            tick_interval_ms: 5000,
            election_jitter_ms: 1000,
            rpc_timeout_ms: 200,
            update_system: false,
        }
    }

    pub fn add_peer(&mut self, peer_id: u64, address: &str) {
        self.peers.insert(peer_id, address.to_string());
    }

    pub fn initial_view(&self) -> ClusterView {
        ClusterView::new(self.peers.clone())
    }
}
