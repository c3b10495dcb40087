use rand::Rng;
use std::time::Duration;
use log::{debug, info, warn};

use super::{
    ClusterView, HeartbeatRequest, HeartbeatResponse, NodeRole, NodeState, NodeStatus,
    RaftConfig, RaftError, VoteRequest, VoteResponse,
};

/// What the election timer should do on this fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    SendHeartbeats,
    LivenessConfirmed,
    StartElection,
}

/// A vote solicitation in flight. Produced by [`RaftNode::begin_election`].
#[derive(Debug, Clone)]
pub struct ElectionRound {
    pub term: u64,
    pub request: VoteRequest,
    pub peers: Vec<(u64, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Won { votes: usize },
    Lost { votes: usize },
    /// A peer answered with a higher term; the candidate adopted it.
    SteppedDown { term: u64 },
    /// The node left candidacy for this term while votes were in flight.
    Superseded,
}

/// A heartbeat broadcast in flight. Produced by [`RaftNode::begin_heartbeat_round`].
#[derive(Debug, Clone)]
pub struct HeartbeatRound {
    pub term: u64,
    pub request: HeartbeatRequest,
    pub peers: Vec<(u64, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Every peer acknowledged.
    AllFollowing,
    /// Quorum held but some peers were silent; the view is unchanged.
    Degraded { acks: Vec<u64>, missing: Vec<u64> },
    /// Quorum held and silent peers were dropped from the view.
    Reconfigured { view: ClusterView, dropped: Vec<u64> },
    /// Too few acknowledgements to remain leader.
    LostQuorum { acks: Vec<u64> },
    SteppedDown { term: u64 },
    Superseded,
}

pub struct RaftNode {
    id: u64,
    address: String,
    state: NodeState,
    view: ClusterView,
    config: RaftConfig,
}

impl RaftNode {
    pub fn new(config: RaftConfig) -> Result<Self, RaftError> {
        let view = config.initial_view();
        match view.address_of(config.node_id) {
            None => return Err(RaftError::MissingSelf(config.node_id)),
            Some(listed) if listed != config.address => {
                return Err(RaftError::AddressMismatch {
                    id: config.node_id,
                    configured: config.address.clone(),
                    listed: listed.to_string(),
                })
            }
            Some(_) => {}
        }

        Ok(Self {
            id: config.node_id,
            address: config.address.clone(),
            state: NodeState::default(),
            view,
            config,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn cluster_view(&self) -> &ClusterView {
        &self.view
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.role, NodeRole::Leader)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_interval_ms)
    }

    /// How long the timer sleeps before its next fire.
    ///
    /// Leaders keep the fixed interval. Everyone else waits one RPC deadline
    /// longer, so a heartbeat round slowed by a silent peer still lands inside
    /// the window, plus a random jitter against repeated split votes.
    pub fn next_tick_in(&self) -> Duration {
        let base = self.config.tick_interval_ms;
        if self.is_leader() {
            return Duration::from_millis(base);
        }
        let jitter = if self.config.election_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.election_jitter_ms)
        };
        Duration::from_millis(base + self.config.rpc_timeout_ms + jitter)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            address: self.address.clone(),
            role: self.state.role,
            term: self.state.current_term,
            voted_for: self.state.voted_for,
            leader_id: self.state.leader_id,
            leader_address: self.state.leader_address.clone(),
            cluster: self.view.clone(),
        }
    }

    /// Decides what a timer fire means for this node and clears the
    /// heartbeat flag if it was set.
    pub fn on_tick(&mut self) -> TickAction {
        if self.is_leader() {
            TickAction::SendHeartbeats
        } else if self.state.heartbeat_received {
            self.state.heartbeat_received = false;
            TickAction::LivenessConfirmed
        } else {
            TickAction::StartElection
        }
    }

    fn set_role(&mut self, role: NodeRole) {
        if self.state.role != role {
            info!(
                "Node {} role {:?} -> {:?} (term {})",
                self.id, self.state.role, role, self.state.current_term
            );
            self.state.role = role;
        }
    }

    /// Moves to a strictly higher term as a follower with no vote cast.
    fn adopt_term(&mut self, term: u64) {
        if term <= self.state.current_term {
            return;
        }
        debug!(
            "Node {} adopting term {} (was {})",
            self.id, term, self.state.current_term
        );
        self.state.current_term = term;
        self.state.voted_for = None;
        self.set_role(NodeRole::Follower);
    }

    fn step_down(&mut self, term: u64) {
        self.adopt_term(term);
        self.set_role(NodeRole::Follower);
        self.state.leader_id = None;
        self.state.leader_address = None;
    }

    pub fn begin_election(&mut self) -> ElectionRound {
        self.state.current_term += 1;
        self.state.voted_for = Some(self.id);
        self.state.heartbeat_received = false;
        self.state.leader_id = None;
        self.state.leader_address = None;
        self.set_role(NodeRole::Candidate);

        ElectionRound {
            term: self.state.current_term,
            request: VoteRequest {
                candidate_id: self.id,
                term: self.state.current_term,
            },
            peers: self.view.peers_of(self.id),
        }
    }

    pub fn complete_election(
        &mut self,
        round: &ElectionRound,
        responses: &[VoteResponse],
    ) -> ElectionOutcome {
        let highest = responses.iter().map(|r| r.term).max().unwrap_or(0);
        if highest > self.state.current_term {
            self.step_down(highest);
            return ElectionOutcome::SteppedDown { term: highest };
        }

        if self.state.role != NodeRole::Candidate || self.state.current_term != round.term {
            return ElectionOutcome::Superseded;
        }

        let granted = responses
            .iter()
            .filter(|r| r.vote_granted && r.term == round.term)
            .count();
        let votes = granted + 1;

        if self.view.is_quorum(votes) {
            info!(
                "Node {} won election for term {} with {}/{} votes",
                self.id,
                round.term,
                votes,
                self.view.member_count()
            );
            self.set_role(NodeRole::Leader);
            self.state.leader_id = Some(self.id);
            self.state.leader_address = Some(self.address.clone());
            ElectionOutcome::Won { votes }
        } else {
            info!(
                "Node {} lost election for term {} with {}/{} votes",
                self.id,
                round.term,
                votes,
                self.view.member_count()
            );
            self.set_role(NodeRole::Follower);
            ElectionOutcome::Lost { votes }
        }
    }

    pub fn handle_vote_request(&mut self, request: &VoteRequest) -> VoteResponse {
        if request.term < self.state.current_term {
            debug!(
                "Node {} denies vote to {}: term {} is lower than {}",
                self.id, request.candidate_id, request.term, self.state.current_term
            );
            return VoteResponse {
                term: self.state.current_term,
                vote_granted: false,
            };
        }

        self.adopt_term(request.term);

        // First vote in a term wins.
        let may_vote = match self.state.voted_for {
            None => true,
            Some(id) => id == request.candidate_id,
        };
        if !may_vote {
            debug!(
                "Node {} denies vote to {}: already voted for {:?} in term {}",
                self.id, request.candidate_id, self.state.voted_for, self.state.current_term
            );
            return VoteResponse {
                term: self.state.current_term,
                vote_granted: false,
            };
        }

        self.state.voted_for = Some(request.candidate_id);
        self.set_role(NodeRole::Follower);
        debug!(
            "Node {} grants vote to {} for term {}",
            self.id, request.candidate_id, self.state.current_term
        );
        VoteResponse {
            term: self.state.current_term,
            vote_granted: true,
        }
    }

    pub fn begin_heartbeat_round(&mut self) -> Result<HeartbeatRound, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }
        self.state.leader_id = Some(self.id);
        self.state.leader_address = Some(self.address.clone());

        Ok(HeartbeatRound {
            term: self.state.current_term,
            request: HeartbeatRequest {
                leader_id: self.id,
                leader_addr: self.address.clone(),
                leader_term: self.state.current_term,
            },
            peers: self.view.peers_of(self.id),
        })
    }

    /// Applies the replies of a heartbeat broadcast.
    ///
    /// `replies` holds only the peers that answered at all; silent peers are
    /// the ones in `round.peers` without a successful reply.
    pub fn complete_heartbeat_round(
        &mut self,
        round: &HeartbeatRound,
        replies: &[(u64, HeartbeatResponse)],
    ) -> HeartbeatOutcome {
        let highest = replies.iter().map(|(_, r)| r.current_term).max().unwrap_or(0);
        if highest > self.state.current_term {
            self.step_down(highest);
            return HeartbeatOutcome::SteppedDown { term: highest };
        }

        if !self.is_leader() || self.state.current_term != round.term {
            return HeartbeatOutcome::Superseded;
        }

        let mut acks: Vec<u64> = replies
            .iter()
            .filter(|(_, r)| r.success)
            .map(|(id, _)| *id)
            .collect();
        acks.sort_unstable();
        acks.dedup();

        if !self.view.is_quorum(acks.len() + 1) {
            warn!(
                "Node {} lost quorum in term {}: {} of {} peers acknowledged",
                self.id,
                round.term,
                acks.len(),
                round.peers.len()
            );
            self.step_down(self.state.current_term);
            return HeartbeatOutcome::LostQuorum { acks };
        }

        let missing: Vec<u64> = round
            .peers
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !acks.contains(id))
            .collect();

        if missing.is_empty() {
            return HeartbeatOutcome::AllFollowing;
        }

        if !self.config.update_system {
            return HeartbeatOutcome::Degraded { acks, missing };
        }

        let view = self.view.retain_survivors(self.id, &acks);
        info!(
            "Node {} dropping {:?} from the cluster, new members {:?}",
            self.id,
            missing,
            view.ids()
        );
        self.view = view.clone();
        HeartbeatOutcome::Reconfigured {
            view,
            dropped: missing,
        }
    }

    pub fn handle_heartbeat(&mut self, request: &HeartbeatRequest) -> HeartbeatResponse {
        if request.leader_term < self.state.current_term {
            debug!(
                "Node {} rejects heartbeat from {}: term {} is lower than {}",
                self.id, request.leader_id, request.leader_term, self.state.current_term
            );
            return HeartbeatResponse {
                current_term: self.state.current_term,
                success: false,
            };
        }

        self.adopt_term(request.leader_term);
        if self.state.leader_id != Some(request.leader_id) {
            info!(
                "Node {} following leader {} at {} (term {})",
                self.id, request.leader_id, request.leader_addr, request.leader_term
            );
        }
        self.state.leader_id = Some(request.leader_id);
        self.state.leader_address = Some(request.leader_addr.clone());
        self.state.heartbeat_received = true;
        self.set_role(NodeRole::Follower);

        HeartbeatResponse {
            current_term: self.state.current_term,
            success: true,
        }
    }

    /// Adopts a view pushed by the leader without further validation.
    pub fn replace_cluster_view(&mut self, view: ClusterView) {
        let view = view.normalized();
        if !view.contains(self.id) {
            warn!(
                "Node {} adopting a cluster view that does not list it: {:?}",
                self.id,
                view.ids()
            );
        }
        info!(
            "Node {} cluster view {:?} -> {:?}",
            self.id,
            self.view.ids(),
            view.ids()
        );
        self.view = view;
    }
}
