//! HTTP server exposing counter state behind the admission filter.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::admission::{hits_per_ip, AdmissionFilter, HitsPerIpLimit, RemoteIp};
use crate::counter::{GenericCounter, IpCounter, ScopedCounter};
use crate::error::{CounterError, Result};

/// Counters available to handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ip_counter: IpCounter,
    pub generic_counter: GenericCounter,
}

impl AppState {
    fn counter_for(&self, scope: &str) -> Option<&ScopedCounter> {
        if scope == self.ip_counter.scope() {
            Some(&*self.ip_counter)
        } else if scope == self.generic_counter.scope() {
            Some(&*self.generic_counter)
        } else {
            None
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionStatus {
    pub ip: String,
    pub ip_hits: u64,
    pub ip_hits_exceeded: bool,
}

/// Body of `GET /counters/:scope/:key`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterValue {
    pub key: String,
    pub count: u64,
}

impl IntoResponse for CounterError {
    fn into_response(self) -> Response {
        let status = match self {
            CounterError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self, "Request failed");
        (status, self.to_string()).into_response()
    }
}

/// Build the application router with the admission filter in front of every route.
pub fn router(state: AppState, admission: AdmissionFilter) -> Router {
    Router::new()
        .route("/", get(admission_status))
        .route("/counters/:scope/:key", get(counter_value))
        .layer(middleware::from_fn_with_state(admission, hits_per_ip))
        .with_state(state)
}

async fn admission_status(
    State(state): State<AppState>,
    Extension(RemoteIp(ip)): Extension<RemoteIp>,
    Extension(limit): Extension<HitsPerIpLimit>,
) -> Result<Json<AdmissionStatus>> {
    let ip_hits = state.ip_counter.get_ip_hits(&ip).await?;
    Ok(Json(AdmissionStatus {
        ip,
        ip_hits,
        ip_hits_exceeded: limit.exceeded,
    }))
}

async fn counter_value(
    State(state): State<AppState>,
    Path((scope, key)): Path<(String, String)>,
) -> std::result::Result<Json<CounterValue>, Response> {
    let counter = state
        .counter_for(&scope)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown scope '{scope}'")).into_response())?;
    let count = counter
        .get_counter(&key)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(CounterValue {
        key: counter.get_key(&key),
        count,
    }))
}

/// HTTP server for the counter service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, state: AppState, admission: AdmissionFilter) -> Self {
        Self {
            addr,
            router: router(state, admission),
        }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            CounterError::Io(e)
        })
    }
}
