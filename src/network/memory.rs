use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;

use super::{CalcRoute, NetworkError, Transport};
use crate::executor::CalculationRequest;
use crate::node::CalculatorNode;
use crate::raft::{ClusterView, HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse};

/// Transport that calls nodes living in the same process.
///
/// Addresses map to registered nodes. Calls *to* a disconnected address fail
/// like a refused connection, and calls to a silenced address hang until
/// their deadline. Calls *from* such a node still go out.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<String, Weak<CalculatorNode>>>,
    down: RwLock<HashSet<String>>,
    silent: RwLock<HashSet<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, node: &Arc<CalculatorNode>) {
        self.nodes
            .write()
            .await
            .insert(node.address().to_string(), Arc::downgrade(node));
    }

    pub async fn disconnect(&self, addr: &str) {
        self.down.write().await.insert(addr.to_string());
    }

    pub async fn reconnect(&self, addr: &str) {
        self.down.write().await.remove(addr);
        self.silent.write().await.remove(addr);
    }

    /// Calls to `addr` never answer; each one times out.
    pub async fn silence(&self, addr: &str) {
        self.silent.write().await.insert(addr.to_string());
    }

    async fn resolve(
        &self,
        addr: &str,
        timeout: Duration,
    ) -> Result<Arc<CalculatorNode>, NetworkError> {
        let refused = || NetworkError::Connection {
            addr: addr.to_string(),
            reason: "connection refused".to_string(),
        };
        if self.down.read().await.contains(addr) {
            return Err(refused());
        }
        if self.silent.read().await.contains(addr) {
            tokio::time::sleep(timeout).await;
            return Err(NetworkError::Timeout {
                addr: addr.to_string(),
                after: timeout,
            });
        }
        self.nodes
            .read()
            .await
            .get(addr)
            .and_then(Weak::upgrade)
            .ok_or_else(refused)
    }

    async fn bounded<T>(
        addr: &str,
        timeout: Duration,
        call: impl Future<Output = Result<T, NetworkError>>,
    ) -> Result<T, NetworkError> {
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| NetworkError::Timeout {
                addr: addr.to_string(),
                after: timeout,
            })?
    }
}

fn rejected(status: u16, err: impl ToString) -> NetworkError {
    NetworkError::Rejected {
        status,
        body: err.to_string(),
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn request_vote(
        &self,
        addr: &str,
        request: VoteRequest,
        timeout: Duration,
    ) -> Result<VoteResponse, NetworkError> {
        let node = self.resolve(addr, timeout).await?;
        Self::bounded(addr, timeout, async { Ok(node.handle_vote(&request).await) }).await
    }

    async fn send_heartbeat(
        &self,
        addr: &str,
        request: HeartbeatRequest,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, NetworkError> {
        let node = self.resolve(addr, timeout).await?;
        Self::bounded(addr, timeout, async {
            Ok(node.handle_heartbeat(&request).await)
        })
        .await
    }

    async fn push_cluster_view(
        &self,
        addr: &str,
        view: &ClusterView,
        timeout: Duration,
    ) -> Result<(), NetworkError> {
        let node = self.resolve(addr, timeout).await?;
        let view = view.clone();
        Self::bounded(addr, timeout, async {
            node.handle_update_sys(view).await;
            Ok(())
        })
        .await
    }

    async fn calculate(
        &self,
        addr: &str,
        request: &CalculationRequest,
        route: CalcRoute,
        timeout: Duration,
    ) -> Result<i64, NetworkError> {
        let node = self.resolve(addr, timeout).await?;
        Self::bounded(addr, timeout, async {
            match route {
                CalcRoute::Client => node
                    .handle_calc(request, None)
                    .await
                    .map_err(|e| rejected(e.status_code(), e)),
                CalcRoute::Forward { from } => node
                    .handle_calc(request, Some(from))
                    .await
                    .map_err(|e| rejected(e.status_code(), e)),
                CalcRoute::Internal => node
                    .handle_calc_internal(request)
                    .map_err(|e| rejected(e.status_code(), e)),
            }
        })
        .await
    }
}
