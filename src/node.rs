use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::executor::{CalcError, CalculationRequest, Executor};
use crate::network::Transport;
use crate::raft::{
    ClusterView, HeartbeatRequest, HeartbeatResponse, NodeStatus, Raft, RaftError, VoteRequest,
    VoteResponse,
};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Raft(#[from] RaftError),
}

/// Everything one cluster member runs: consensus, dispatch and local
/// arithmetic. The HTTP server and the in-memory transport both call into
/// this type.
pub struct CalculatorNode {
    id: u64,
    address: String,
    raft: Raft,
    dispatcher: Dispatcher,
    executor: Executor,
}

impl CalculatorNode {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        let raft_config = config.raft_config()?;
        let id = raft_config.node_id;
        let address = raft_config.address.clone();
        let raft = Raft::new(raft_config, transport)?;
        let dispatcher = Dispatcher::new(
            raft.clone(),
            config.execution_mode(),
            config.forward_timeout(),
        );
        let executor = Executor::new(config.byzantine);
        if executor.is_byzantine() {
            info!("Node {id} runs a byzantine executor");
        }

        Ok(Self {
            id,
            address,
            raft,
            dispatcher,
            executor,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn raft(&self) -> &Raft {
        &self.raft
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Starts the election timer.
    pub fn start(&self) -> JoinHandle<()> {
        info!("Node {} starting at {}", self.id, self.address);
        self.raft.start()
    }

    pub async fn handle_vote(&self, request: &VoteRequest) -> VoteResponse {
        self.raft.handle_vote_request(request).await
    }

    pub async fn handle_heartbeat(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
        self.raft.handle_heartbeat(request).await
    }

    pub async fn handle_update_sys(&self, view: ClusterView) {
        self.raft.replace_cluster_view(view).await
    }

    pub async fn handle_calc(
        &self,
        request: &CalculationRequest,
        forwarded_by: Option<u64>,
    ) -> Result<i64, DispatchError> {
        self.dispatcher.dispatch(request, forwarded_by).await
    }

    pub fn handle_calc_internal(&self, request: &CalculationRequest) -> Result<i64, CalcError> {
        let result = self.executor.execute(request);
        debug!("Node {} evaluated {:?} -> {:?}", self.id, request, result);
        result
    }

    pub async fn status(&self) -> NodeStatus {
        self.raft.status().await
    }
}
