use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::exporters::prometheus::{content_type, encode};
use crate::registry::Registry;

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/", get(scrape))
        .route("/metrics", get(scrape))
        .with_state(registry)
}

// Every request runs a fresh collection pass; nothing is cached here.
async fn scrape(State(registry): State<Arc<Registry>>) -> Response {
    let families = match registry.gather().await {
        Ok(families) => families,
        Err(e) => {
            error!(error = %e, "Scrape failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    match encode(&families) {
        Ok(body) => {
            debug!(families = families.len(), "Scrape served");
            ([(header::CONTENT_TYPE, content_type())], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn serve<F>(addr: SocketAddr, registry: Arc<Registry>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Serving metrics");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}
