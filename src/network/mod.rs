pub mod client;
pub mod error;
pub mod memory;
pub mod server;

pub use client::HttpTransport;
pub use error::NetworkError;
pub use memory::LocalTransport;
pub use server::{serve, serve_listener};

use std::future::Future;
use std::time::Duration;

use log::error;
use tokio::task::JoinSet;

use crate::executor::CalculationRequest;
use crate::raft::{ClusterView, HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse};

/// Header a follower sets when it relays a client calculation to the leader.
pub const FORWARDED_BY_HEADER: &str = "x-forwarded-by";

/// How a calculation is addressed to another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcRoute {
    /// A plain client submission to `/calc`.
    Client,
    /// A follower relaying a client submission to the leader it knows.
    Forward { from: u64 },
    /// The leader asking a member to evaluate locally via `/calc-internal`.
    Internal,
}

/// Outbound calls between nodes. Every call is bounded by `timeout`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(
        &self,
        addr: &str,
        request: VoteRequest,
        timeout: Duration,
    ) -> Result<VoteResponse, NetworkError>;

    async fn send_heartbeat(
        &self,
        addr: &str,
        request: HeartbeatRequest,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, NetworkError>;

    async fn push_cluster_view(
        &self,
        addr: &str,
        view: &ClusterView,
        timeout: Duration,
    ) -> Result<(), NetworkError>;

    async fn calculate(
        &self,
        addr: &str,
        request: &CalculationRequest,
        route: CalcRoute,
        timeout: Duration,
    ) -> Result<i64, NetworkError>;
}

/// Runs `call` against every peer concurrently and waits for all of them.
///
/// Results come back in ascending peer id order. A task that panics is
/// logged and left out.
pub async fn fan_out<T, F, Fut>(
    peers: Vec<(u64, String)>,
    call: F,
) -> Vec<(u64, Result<T, NetworkError>)>
where
    F: Fn(u64, String) -> Fut,
    Fut: Future<Output = Result<T, NetworkError>> + Send + 'static,
    T: Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (peer, addr) in peers {
        let fut = call(peer, addr);
        tasks.spawn(async move { (peer, fut.await) });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!("Fan-out task failed: {e}"),
        }
    }
    results.sort_by_key(|(peer, _)| *peer);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_joins_every_peer_in_id_order() {
        let peers = vec![
            (3, "c".to_string()),
            (1, "a".to_string()),
            (2, "b".to_string()),
        ];
        let results = fan_out(peers, |peer, addr| async move {
            if peer == 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(NetworkError::Connection {
                    addr,
                    reason: "refused".to_string(),
                })
            } else {
                Ok(addr)
            }
        })
        .await;

        let ids: Vec<u64> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(results[0].1, Ok("a".to_string()));
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1, Ok("c".to_string()));
    }

    #[tokio::test]
    async fn fan_out_over_no_peers_is_empty() {
        let results: Vec<(u64, Result<(), NetworkError>)> =
            fan_out(Vec::new(), |_, _| async { Ok(()) }).await;
        assert!(results.is_empty());
    }
}
