use std::time::Duration;

use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{header, Body, Client, Method, Request, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CalcRoute, NetworkError, Transport, FORWARDED_BY_HEADER};
use crate::executor::CalculationRequest;
use crate::raft::{
    ClusterView, HeartbeatRequest, HeartbeatResponse, NodeStatus, VoteRequest, VoteResponse,
};

/// Turns `:8001`, `127.0.0.1:8001` or `http://127.0.0.1:8001` into a URI for `path`.
pub fn endpoint(addr: &str, path: &str) -> Result<Uri, NetworkError> {
    let trimmed = addr
        .trim()
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let host = if trimmed.starts_with(':') {
        format!("127.0.0.1{trimmed}")
    } else {
        trimmed.to_string()
    };
    if host.is_empty() {
        return Err(NetworkError::InvalidAddress(addr.to_string()));
    }
    format!("http://{host}{path}")
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(addr.to_string()))
}

/// Parses the plain-text integer returned by `/calc` and `/calc-internal`.
pub fn parse_calc_body(body: &[u8]) -> Result<i64, NetworkError> {
    let text = std::str::from_utf8(body).map_err(|e| NetworkError::Decode(e.to_string()))?;
    text.trim()
        .parse::<i64>()
        .map_err(|e| NetworkError::Decode(format!("`{}`: {e}", text.trim())))
}

/// HTTP/1.1 JSON transport between nodes.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn exchange(
        &self,
        method: Method,
        addr: &str,
        path: &str,
        body: Vec<u8>,
        extra_header: Option<(&str, String)>,
        timeout: Duration,
    ) -> Result<Bytes, NetworkError> {
        let uri = endpoint(addr, path)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some((name, value)) = extra_header {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Body::from(body))
            .map_err(|e| NetworkError::InvalidAddress(format!("{addr}: {e}")))?;

        let connection_error = |e: hyper::Error| NetworkError::Connection {
            addr: addr.to_string(),
            reason: e.to_string(),
        };
        let call = async {
            let response = self.client.request(request).await.map_err(connection_error)?;
            let status = response.status();
            let bytes = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(connection_error)?;
            if !status.is_success() {
                return Err(NetworkError::Rejected {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).trim().to_string(),
                });
            }
            Ok(bytes)
        };

        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| NetworkError::Timeout {
                addr: addr.to_string(),
                after: timeout,
            })?
    }

    async fn post_json<Req, Resp>(
        &self,
        addr: &str,
        path: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, NetworkError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| NetworkError::Decode(e.to_string()))?;
        let bytes = self
            .exchange(Method::POST, addr, path, body, None, timeout)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::Decode(e.to_string()))
    }

    pub async fn fetch_status(
        &self,
        addr: &str,
        timeout: Duration,
    ) -> Result<NodeStatus, NetworkError> {
        let bytes = self
            .exchange(Method::GET, addr, "/status", Vec::new(), None, timeout)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn request_vote(
        &self,
        addr: &str,
        request: VoteRequest,
        timeout: Duration,
    ) -> Result<VoteResponse, NetworkError> {
        self.post_json(addr, "/vote", &request, timeout).await
    }

    async fn send_heartbeat(
        &self,
        addr: &str,
        request: HeartbeatRequest,
        timeout: Duration,
    ) -> Result<HeartbeatResponse, NetworkError> {
        self.post_json(addr, "/heartBeat", &request, timeout).await
    }

    async fn push_cluster_view(
        &self,
        addr: &str,
        view: &ClusterView,
        timeout: Duration,
    ) -> Result<(), NetworkError> {
        let body = serde_json::to_vec(view).map_err(|e| NetworkError::Decode(e.to_string()))?;
        self.exchange(Method::POST, addr, "/update-sys", body, None, timeout)
            .await
            .map(|_| ())
    }

    async fn calculate(
        &self,
        addr: &str,
        request: &CalculationRequest,
        route: CalcRoute,
        timeout: Duration,
    ) -> Result<i64, NetworkError> {
        let body = serde_json::to_vec(request).map_err(|e| NetworkError::Decode(e.to_string()))?;
        let (path, extra) = match route {
            CalcRoute::Client => ("/calc", None),
            CalcRoute::Forward { from } => ("/calc", Some((FORWARDED_BY_HEADER, from.to_string()))),
            CalcRoute::Internal => ("/calc-internal", None),
        };
        let bytes = self
            .exchange(Method::POST, addr, path, body, extra, timeout)
            .await?;
        parse_calc_body(&bytes)
    }
}
