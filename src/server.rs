//! Static file server for the working copy.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::services::ServeDir;

/// Path segment that is never served.
const REPOSITORY_DIR: &str = ".git";

/// Errors returned by the HTTP server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The server failed while running.
    #[error("HTTP server error: {0}")]
    Serve(#[from] io::Error),
}

/// Router serving files under `root`; directories serve `index.html`.
pub fn router(root: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(middleware::from_fn(hide_repository_metadata))
        .layer(middleware::from_fn(log_request))
}

/// True if any segment of the (percent-decoded) request path names the
/// repository metadata directory.
fn exposes_repository_metadata(path: &str) -> bool {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);
    decoded
        .split(['/', '\\'])
        .any(|segment| segment.eq_ignore_ascii_case(REPOSITORY_DIR))
}

async fn hide_repository_metadata(request: Request, next: Next) -> Response {
    if exposes_repository_metadata(request.uri().path()) {
        log::debug!("refusing to serve {}", request.uri().path());
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    log::debug!(
        "{} {} -> {} ({:?})",
        method,
        uri,
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

/// Bind the listen address (`host:port`; host names are resolved).
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Serve `root` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, root: &Path, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("serving {} on http://{}", root.display(), addr);
    }

    axum::serve(listener, router(root))
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("received SIGINT, shutting down"),
        () = terminate => log::info!("received SIGTERM, shutting down"),
    }
}
