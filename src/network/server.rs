use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use hyper::body::HttpBody as _;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::AddrIncoming;
use hyper::server::Builder;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{NetworkError, FORWARDED_BY_HEADER};
use crate::executor::CalculationRequest;
use crate::node::CalculatorNode;
use crate::raft::{ClusterView, HeartbeatRequest, VoteRequest};

const MAX_BODY_BYTES: usize = 64 * 1024;

const ROUTES: &[&str] = &[
    "/calc",
    "/calc-internal",
    "/vote",
    "/heartBeat",
    "/update-sys",
    "/status",
];

/// Binds `addr` and serves the node until the server fails.
pub async fn serve(addr: SocketAddr, node: Arc<CalculatorNode>) -> Result<(), NetworkError> {
    let builder = hyper::Server::try_bind(&addr).map_err(|e| NetworkError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    run(builder, node).await
}

/// Serves on a listener the caller already bound.
pub async fn serve_listener(
    listener: TcpListener,
    node: Arc<CalculatorNode>,
) -> Result<(), NetworkError> {
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let bind_error = |reason: String| NetworkError::Bind {
        addr: addr.clone(),
        reason,
    };
    listener
        .set_nonblocking(true)
        .map_err(|e| bind_error(e.to_string()))?;
    let builder = hyper::Server::from_tcp(listener).map_err(|e| bind_error(e.to_string()))?;
    run(builder, node).await
}

async fn run(builder: Builder<AddrIncoming>, node: Arc<CalculatorNode>) -> Result<(), NetworkError> {
    info!("Node {} serving HTTP on {}", node.id(), node.address());
    let make_svc = make_service_fn(move |_conn| {
        let node = Arc::clone(&node);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let node = Arc::clone(&node);
                async move { handle(req, node).await }
            }))
        }
    });

    builder
        .serve(make_svc)
        .await
        .map_err(|e| NetworkError::Server(e.to_string()))
}

fn respond(status: u16, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    resp
}

fn text(status: u16, body: impl Into<Body>) -> Response<Body> {
    respond(status, "text/plain; charset=utf-8", body)
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => respond(200, "application/json", bytes),
        Err(e) => text(500, format!("failed to encode response: {e}")),
    }
}

fn preflight() -> Response<Body> {
    let mut resp = respond(204, "text/plain; charset=utf-8", Body::empty());
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, x-forwarded-by"),
    );
    resp
}

enum ReadBodyLimitedError {
    TooLarge,
    Hyper(hyper::Error),
}

impl From<hyper::Error> for ReadBodyLimitedError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

async fn read_body_limited(
    mut body: Body,
    max_bytes: usize,
) -> Result<Vec<u8>, ReadBodyLimitedError> {
    let mut out = Vec::new();
    while let Some(next) = body.data().await {
        let chunk = next?;
        if out.len() + chunk.len() > max_bytes {
            return Err(ReadBodyLimitedError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Reads and decodes a JSON body, or produces the error response to send.
async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    let declared_too_large = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len > MAX_BODY_BYTES)
        .unwrap_or(false);
    if declared_too_large {
        return Err(text(413, "payload too large"));
    }

    let bytes = match read_body_limited(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(ReadBodyLimitedError::TooLarge) => return Err(text(413, "payload too large")),
        Err(ReadBodyLimitedError::Hyper(e)) => {
            return Err(text(400, format!("failed to read request body: {e}")))
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| text(400, format!("invalid JSON: {e}")))
}

/// `Ok(None)` for a client request, `Ok(Some(id))` for a relayed one.
fn forwarded_by(req: &Request<Body>) -> Result<Option<u64>, Response<Body>> {
    match req.headers().get(FORWARDED_BY_HEADER) {
        None => Ok(None),
        Some(raw) => raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| text(400, format!("invalid {FORWARDED_BY_HEADER} header"))),
    }
}

async fn handle(
    req: Request<Body>,
    node: Arc<CalculatorNode>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("Node {} <- {} {}", node.id(), method, path);

    let response = match (method, path.as_str()) {
        (Method::OPTIONS, _) => preflight(),
        (Method::POST, "/calc") => match forwarded_by(&req) {
            Err(resp) => resp,
            Ok(from) => match read_json::<CalculationRequest>(req).await {
                Err(resp) => resp,
                Ok(calc) => match node.handle_calc(&calc, from).await {
                    Ok(value) => text(200, value.to_string()),
                    Err(e) => {
                        warn!("Node {} failed calculation: {}", node.id(), e);
                        text(e.status_code(), e.to_string())
                    }
                },
            },
        },
        (Method::POST, "/calc-internal") => match read_json::<CalculationRequest>(req).await {
            Err(resp) => resp,
            Ok(calc) => match node.handle_calc_internal(&calc) {
                Ok(value) => text(200, value.to_string()),
                Err(e) => text(e.status_code(), e.to_string()),
            },
        },
        (Method::POST, "/vote") => match read_json::<VoteRequest>(req).await {
            Err(resp) => resp,
            Ok(vote) => json(&node.handle_vote(&vote).await),
        },
        (Method::POST, "/heartBeat") => match read_json::<HeartbeatRequest>(req).await {
            Err(resp) => resp,
            Ok(beat) => json(&node.handle_heartbeat(&beat).await),
        },
        (Method::POST, "/update-sys") => match read_json::<ClusterView>(req).await {
            Err(resp) => resp,
            Ok(view) => {
                node.handle_update_sys(view).await;
                text(200, Body::empty())
            }
        },
        (Method::GET, "/status") => json(&node.status().await),
        (_, path) if ROUTES.contains(&path) => text(405, "method not allowed"),
        _ => text(404, "not found"),
    };

    Ok(response)
}
