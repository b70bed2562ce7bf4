//! Development HTTP server.
//!
//! Every GET goes to [`Porter::read_file`]; bundles are built on first
//! request. Responses carry an ETag so unchanged files answer 304.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use porter::{FileResponse, Porter, ReadQuery};
use tokio::net::TcpListener;
use tracing::{debug, error};

use crate::error::{CliError, Result};
use crate::ui;

pub fn router(porter: Porter) -> Router {
    Router::new().fallback(handle).with_state(porter)
}

pub async fn serve(porter: Porter, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| CliError::InvalidArgument(format!("invalid address {host}:{port}: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Server(format!("failed to bind {addr}: {e}")))?;

    ui::success(&format!("Serving at http://{addr}"));
    axum::serve(listener, router(porter))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CliError::Server(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    debug!("shutting down");
}

async fn handle(State(porter): State<Porter>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let query = ReadQuery::parse(uri.query().unwrap_or_default());
    match porter.read_file(uri.path(), query).await {
        Ok(Some(file)) => respond(file, &headers, method == Method::HEAD),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("{} {}: {e}", method, uri);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn respond(file: FileResponse, request: &HeaderMap, head: bool) -> Response {
    let fresh = request
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|tags| tags.split(',').any(|tag| tag.trim() == file.etag));
    let status = if fresh {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in file.headers() {
        builder = builder.header(name, value);
    }
    let body = if fresh || head {
        Body::empty()
    } else {
        Body::from(file.content)
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
