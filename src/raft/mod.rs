mod cluster;
mod config;
mod error;
mod node;
mod rpc;
mod state;

pub use self::cluster::ClusterView;
pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::node::{
    ElectionOutcome, ElectionRound, HeartbeatOutcome, HeartbeatRound, RaftNode, TickAction,
};
pub use self::rpc::{HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse};
pub use self::state::{NodeRole, NodeState, NodeStatus};

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::network::{fan_out, Transport};

/// Leader election and liveness for one node.
///
/// All mutable consensus state sits behind one mutex. The lock is taken to
/// open a round and again to apply its replies, never across an outbound
/// call, so inbound vote and heartbeat handlers are never blocked by a slow
/// peer.
#[derive(Clone)]
pub struct Raft {
    pub node: Arc<Mutex<RaftNode>>,
    transport: Arc<dyn Transport>,
}

impl Raft {
    pub fn new(config: RaftConfig, transport: Arc<dyn Transport>) -> Result<Self, RaftError> {
        let node = RaftNode::new(config)?;
        Ok(Self {
            node: Arc::new(Mutex::new(node)),
            transport,
        })
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Spawns the election timer. It runs until the returned handle is aborted.
    ///
    /// While leading, fires are scheduled from the previous fire rather than
    /// from the end of the heartbeat round, so slow peers do not stretch the
    /// heartbeat period.
    pub fn start(&self) -> JoinHandle<()> {
        let raft = self.clone();
        tokio::spawn(async move {
            let mut next = Instant::now() + raft.node.lock().await.next_tick_in();
            loop {
                sleep_until(next).await;
                let fired = next;
                raft.tick().await;

                let node = raft.node.lock().await;
                next = if node.is_leader() {
                    (fired + node.tick_interval()).max(Instant::now())
                } else {
                    Instant::now() + node.next_tick_in()
                };
            }
        })
    }

    /// One fire of the election timer.
    pub async fn tick(&self) {
        let (id, action) = {
            let mut node = self.node.lock().await;
            (node.id(), node.on_tick())
        };

        match action {
            TickAction::SendHeartbeats => {
                if let Err(e) = self.broadcast_heartbeats().await {
                    error!("Node {id} failed to send heartbeats: {e}");
                }
            }
            TickAction::LivenessConfirmed => {
                debug!("Node {id} tick: heartbeat received since last tick");
            }
            TickAction::StartElection => {
                info!("Node {id} tick: no heartbeat received, starting election");
                self.start_election().await;
            }
        }
    }

    pub async fn start_election(&self) -> ElectionOutcome {
        let (id, timeout, round) = {
            let mut node = self.node.lock().await;
            let round = node.begin_election();
            (node.id(), node.rpc_timeout(), round)
        };
        info!(
            "Node {} requesting votes for term {} from {:?}",
            id,
            round.term,
            round.peers.iter().map(|(peer, _)| *peer).collect::<Vec<_>>()
        );

        let transport = Arc::clone(&self.transport);
        let request = round.request.clone();
        let replies = fan_out(round.peers.clone(), move |_, addr| {
            let transport = Arc::clone(&transport);
            let request = request.clone();
            async move { transport.request_vote(&addr, request, timeout).await }
        })
        .await;

        let mut responses = Vec::with_capacity(replies.len());
        for (peer, reply) in replies {
            match reply {
                Ok(resp) => {
                    debug!(
                        "Node {id} vote from {peer}: granted={} term={}",
                        resp.vote_granted, resp.term
                    );
                    responses.push(resp);
                }
                Err(e) => warn!("Node {id} got no vote from {peer}: {e}"),
            }
        }

        let outcome = self.node.lock().await.complete_election(&round, &responses);
        if let ElectionOutcome::Won { .. } = outcome {
            if let Err(e) = self.broadcast_heartbeats().await {
                error!("Node {id} won term {} but could not announce it: {e}", round.term);
            }
        }
        outcome
    }

    pub async fn broadcast_heartbeats(&self) -> Result<HeartbeatOutcome, RaftError> {
        let (id, timeout, round) = {
            let mut node = self.node.lock().await;
            let round = node.begin_heartbeat_round()?;
            (node.id(), node.rpc_timeout(), round)
        };

        let transport = Arc::clone(&self.transport);
        let request = round.request.clone();
        let replies = fan_out(round.peers.clone(), move |_, addr| {
            let transport = Arc::clone(&transport);
            let request = request.clone();
            async move { transport.send_heartbeat(&addr, request, timeout).await }
        })
        .await;

        let mut answered = Vec::with_capacity(replies.len());
        for (peer, reply) in replies {
            match reply {
                Ok(resp) => answered.push((peer, resp)),
                Err(e) => warn!("Node {id} heartbeat to {peer} failed: {e}"),
            }
        }

        let outcome = self
            .node
            .lock()
            .await
            .complete_heartbeat_round(&round, &answered);

        match &outcome {
            HeartbeatOutcome::AllFollowing => {
                debug!("Node {id} heartbeat: {} peers follow", round.peers.len());
            }
            HeartbeatOutcome::Degraded { acks, missing } => {
                info!(
                    "Node {id} heartbeat: {} peers follow, {:?} do not",
                    acks.len(),
                    missing
                );
            }
            HeartbeatOutcome::Reconfigured { view, .. } => {
                self.push_cluster_view(view).await;
            }
            HeartbeatOutcome::LostQuorum { acks } => {
                warn!("Node {id} stepped down, only {:?} acknowledged", acks);
            }
            HeartbeatOutcome::SteppedDown { term } => {
                info!("Node {id} stepped down after seeing term {term}");
            }
            HeartbeatOutcome::Superseded => {
                debug!("Node {id} heartbeat round superseded");
            }
        }

        Ok(outcome)
    }

    /// Sends `view` to every member in it except this node. Failures are logged.
    pub async fn push_cluster_view(&self, view: &ClusterView) {
        let (id, timeout) = {
            let node = self.node.lock().await;
            (node.id(), node.rpc_timeout())
        };

        let transport = Arc::clone(&self.transport);
        let shared = Arc::new(view.clone());
        let replies = fan_out(view.peers_of(id), move |_, addr| {
            let transport = Arc::clone(&transport);
            let view = Arc::clone(&shared);
            async move { transport.push_cluster_view(&addr, &view, timeout).await }
        })
        .await;

        for (peer, reply) in replies {
            if let Err(e) = reply {
                warn!("Node {id} could not push cluster view to {peer}: {e}");
            }
        }
    }

    pub async fn handle_vote_request(&self, request: &VoteRequest) -> VoteResponse {
        self.node.lock().await.handle_vote_request(request)
    }

    pub async fn handle_heartbeat(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
        self.node.lock().await.handle_heartbeat(request)
    }

    pub async fn replace_cluster_view(&self, view: ClusterView) {
        self.node.lock().await.replace_cluster_view(view)
    }

    pub async fn status(&self) -> NodeStatus {
        self.node.lock().await.status()
    }

    pub async fn rpc_timeout(&self) -> Duration {
        self.node.lock().await.rpc_timeout()
    }
}
