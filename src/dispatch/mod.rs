mod error;

pub use self::error::DispatchError;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::seq::IndexedRandom;

use crate::executor::CalculationRequest;
use crate::network::{fan_out, CalcRoute, NetworkError};
use crate::raft::Raft;

/// How the leader gets a calculation evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One member picked at random, the leader included.
    #[default]
    Single,
    /// Every member evaluates, the most common answer wins.
    MajorityVote,
}

/// One member's reply to a majority-vote round. A rejection is tallied like
/// any value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Answer {
    Value(i64),
    Rejected { status: u16, body: String },
}

impl Answer {
    pub fn into_result(self) -> Result<i64, DispatchError> {
        match self {
            Answer::Value(value) => Ok(value),
            Answer::Rejected { status, body } => Err(DispatchError::Upstream { status, body }),
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Value(value) => write!(f, "{value}"),
            Answer::Rejected { status, body } => write!(f, "{status} {body}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorityTally<T> {
    pub value: T,
    pub count: usize,
    pub responders: usize,
}

impl<T> MajorityTally<T> {
    pub fn has_majority(&self) -> bool {
        self.count * 2 > self.responders
    }
}

/// Picks the most frequent value. Ties go to the smallest value.
pub fn tally_votes<T: Ord + Clone>(values: &[T]) -> Option<MajorityTally<T>> {
    let mut counts: BTreeMap<&T, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }

    let mut best: Option<(&T, usize)> = None;
    for (value, count) in counts {
        match best {
            Some((_, top)) if count <= top => {}
            _ => best = Some((value, count)),
        }
    }

    best.map(|(value, count)| MajorityTally {
        value: value.clone(),
        count,
        responders: values.len(),
    })
}

/// Routes client calculations: followers relay to the leader, the leader
/// farms the work out to members.
pub struct Dispatcher {
    raft: Raft,
    mode: ExecutionMode,
    forward_timeout: Duration,
}

struct Snapshot {
    id: u64,
    is_leader: bool,
    leader: Option<(u64, String)>,
    members: Vec<(u64, String)>,
    rpc_timeout: Duration,
}

impl Dispatcher {
    pub fn new(raft: Raft, mode: ExecutionMode, forward_timeout: Duration) -> Self {
        Self {
            raft,
            mode,
            forward_timeout,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    async fn snapshot(&self) -> Snapshot {
        let node = self.raft.node.lock().await;
        let state = node.state();
        Snapshot {
            id: node.id(),
            is_leader: node.is_leader(),
            leader: state.leader_id.zip(state.leader_address.clone()),
            members: node.cluster_view().members(),
            rpc_timeout: node.rpc_timeout(),
        }
    }

    /// Handles a `/calc` submission. `forwarded_by` is set when another
    /// follower already relayed this request once.
    pub async fn dispatch(
        &self,
        request: &CalculationRequest,
        forwarded_by: Option<u64>,
    ) -> Result<i64, DispatchError> {
        let op = request.validate()?;
        let snap = self.snapshot().await;
        debug!(
            "Node {} dispatching {} {} {} (leader: {})",
            snap.id, request.a, op, request.b, snap.is_leader
        );

        if snap.is_leader {
            return match self.mode {
                ExecutionMode::Single => self.single_node_calculation(request, &snap).await,
                ExecutionMode::MajorityVote => self
                    .majority_vote_calculation(request, &snap)
                    .await?
                    .value
                    .into_result(),
            };
        }

        if let Some(from) = forwarded_by {
            warn!(
                "Node {} got a request forwarded by {} but is not the leader",
                snap.id, from
            );
            return Err(DispatchError::NoLeader);
        }

        match snap.leader {
            Some((leader_id, addr)) if leader_id != snap.id => {
                self.forward_to_leader(request, snap.id, leader_id, &addr)
                    .await
            }
            _ => {
                info!("Node {} has no leader to forward to", snap.id);
                Err(DispatchError::NoLeader)
            }
        }
    }

    /// Runs one majority-vote round from this node and returns the full
    /// tally, whatever the configured mode. Only the leader may do this.
    pub async fn majority_vote(
        &self,
        request: &CalculationRequest,
    ) -> Result<MajorityTally<Answer>, DispatchError> {
        request.validate()?;
        let snap = self.snapshot().await;
        if !snap.is_leader {
            return Err(DispatchError::NoLeader);
        }
        self.majority_vote_calculation(request, &snap).await
    }

    async fn forward_to_leader(
        &self,
        request: &CalculationRequest,
        own_id: u64,
        leader_id: u64,
        addr: &str,
    ) -> Result<i64, DispatchError> {
        info!("Node {own_id} forwarding calculation to leader {leader_id} at {addr}");
        self.raft
            .transport()
            .calculate(
                addr,
                request,
                CalcRoute::Forward { from: own_id },
                self.forward_timeout,
            )
            .await
            .map_err(|e| match e {
                NetworkError::Rejected { status, body } => DispatchError::Upstream { status, body },
                other => {
                    warn!("Node {own_id} could not reach leader {leader_id}: {other}");
                    DispatchError::LeaderUnreachable(other)
                }
            })
    }

    async fn single_node_calculation(
        &self,
        request: &CalculationRequest,
        snap: &Snapshot,
    ) -> Result<i64, DispatchError> {
        let (worker, addr) = snap
            .members
            .choose(&mut rand::rng())
            .cloned()
            .ok_or(DispatchError::NoResponses)?;
        info!("Leader {} sending calculation to member {}", snap.id, worker);

        self.raft
            .transport()
            .calculate(&addr, request, CalcRoute::Internal, snap.rpc_timeout)
            .await
            .map_err(|e| match e {
                NetworkError::Rejected { status, body } => DispatchError::Upstream { status, body },
                other => {
                    warn!("Leader {} lost member {}: {}", snap.id, worker, other);
                    DispatchError::WorkerUnreachable(other)
                }
            })
    }

    async fn majority_vote_calculation(
        &self,
        request: &CalculationRequest,
        snap: &Snapshot,
    ) -> Result<MajorityTally<Answer>, DispatchError> {
        let transport = self.raft.transport();
        let shared = Arc::new(request.clone());
        let timeout = snap.rpc_timeout;
        let replies = fan_out(snap.members.clone(), move |_, addr| {
            let transport = Arc::clone(&transport);
            let request = Arc::clone(&shared);
            async move {
                transport
                    .calculate(&addr, &request, CalcRoute::Internal, timeout)
                    .await
            }
        })
        .await;

        let mut answers = Vec::with_capacity(replies.len());
        for (member, reply) in replies {
            let answer = match reply {
                Ok(value) => Answer::Value(value),
                Err(NetworkError::Rejected { status, body }) => Answer::Rejected { status, body },
                Err(e) => {
                    warn!("Leader {} member {} did not answer: {}", snap.id, member, e);
                    continue;
                }
            };
            debug!("Leader {} member {} answered {}", snap.id, member, answer);
            answers.push(answer);
        }

        let tally = tally_votes(&answers).ok_or(DispatchError::NoResponses)?;
        if tally.has_majority() {
            info!(
                "Leader {} majority result {} ({}/{})",
                snap.id, tally.value, tally.count, tally.responders
            );
        } else {
            warn!(
                "Leader {} no majority, returning {} ({}/{})",
                snap.id, tally.value, tally.count, tally.responders
            );
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_common_value_wins() {
        let tally = tally_votes(&[7, 7, 12345, 7, 7]).expect("tally");
        assert_eq!(tally.value, 7);
        assert_eq!(tally.count, 4);
        assert_eq!(tally.responders, 5);
        assert!(tally.has_majority());
    }

    #[test]
    fn ties_go_to_the_smallest_value() {
        let tally = tally_votes(&[9, 3, 9, 3]).expect("tally");
        assert_eq!(tally.value, 3);
        assert_eq!(tally.count, 2);
        assert!(!tally.has_majority());

        let tally = tally_votes(&[5, -2, 40]).expect("tally");
        assert_eq!(tally.value, -2);
    }

    #[test]
    fn plurality_without_majority_is_still_returned() {
        let tally = tally_votes(&[1, 1, 2, 3, 4]).expect("tally");
        assert_eq!(tally.value, 1);
        assert!(!tally.has_majority());
    }

    #[test]
    fn agreed_rejection_outvotes_a_stray_value() {
        let overflow = Answer::Rejected {
            status: 422,
            body: "Arithmetic overflow".to_string(),
        };
        let answers = vec![
            overflow.clone(),
            Answer::Value(81),
            overflow.clone(),
            overflow.clone(),
        ];
        let tally = tally_votes(&answers).expect("tally");
        assert_eq!(tally.value, overflow);
        assert_eq!(tally.count, 3);
        assert_eq!(
            tally.value.into_result().expect_err("rejected").status_code(),
            422
        );

        // Even split: a value sorts before a rejection.
        let tally = tally_votes(&[Answer::Value(4), overflow]).expect("tally");
        assert_eq!(tally.value, Answer::Value(4));
    }

    #[test]
    fn no_values_no_tally() {
        assert_eq!(tally_votes::<i64>(&[]), None);
    }
}
