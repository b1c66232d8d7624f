use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ConfigError,
    export::ExportDocument,
    netdetect,
    progress::{ProgressSink, ProgressSnapshot, ScanPhase},
    scanner::{ScanOrchestrator, TcpProber},
    types::{ScanConfiguration, ScanReport},
};

#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<Mutex<ServerState>>, // shared between handlers and the running scan's sink
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    report: Option<ScanReport>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub phase: ScanPhase,
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRange {
    pub network: String,
    pub start_ip: String,
    pub end_ip: String,
}

impl AppState {
    fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Mirrors a running scan's progress into the shared server state.
struct StateSink(AppState);

impl ProgressSink for StateSink {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.0.with_state(|s| s.status.progress = snapshot.clone());
    }

    fn on_phase(&self, phase: ScanPhase) {
        // Completed is published by `finish_scan` together with the report.
        if phase != ScanPhase::Completed {
            self.0.with_state(|s| s.status.phase = phase);
        }
    }
}

/// Store a finished run's outcome. Phase and report change under one lock so
/// `/status` never reports completion before `/results` can serve it.
fn finish_scan(app: &AppState, res: Result<ScanReport, ConfigError>) {
    app.with_state(|s| match res {
        Ok(report) => {
            s.report = Some(report);
            s.status.phase = ScanPhase::Completed;
        }
        Err(e) => {
            warn!("scan error: {e}");
            s.status.phase = ScanPhase::Failed;
            s.status.error = Some(e.to_string());
        }
    });
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/results", get(get_results))
        .route("/networks", get(get_networks))
        .with_state(state);

    Router::new().nest("/api", api)
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn spawn_server(bind: &str, shutdown: CancellationToken) -> Result<()> {
    let app = router(AppState::default());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving API on http://{}/api", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("API server stopped");
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let status = app.with_state(|s| s.status.clone());
    (StatusCode::OK, Json(status))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    match app.with_state(|s| s.report.as_ref().map(ExportDocument::from)) {
        Some(doc) => (StatusCode::OK, Json(doc)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn get_networks() -> impl IntoResponse {
    match netdetect::detect_local_networks() {
        Ok(nets) => {
            let ranges: Vec<NetworkRange> = nets
                .into_iter()
                .map(|net| {
                    let (start, end) = netdetect::host_range(net);
                    NetworkRange {
                        network: net.to_string(),
                        start_ip: start.to_string(),
                        end_ip: end.to_string(),
                    }
                })
                .collect();
            (StatusCode::OK, Json(ranges)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("interface detection failed: {e}"))
            .into_response(),
    }
}

async fn post_scan(
    State(app): State<AppState>,
    Json(config): Json<ScanConfiguration>,
) -> impl IntoResponse {
    // Reject bad input up front so the caller gets the reason synchronously.
    let addresses = match ScanOrchestrator::<TcpProber>::prepare(&config) {
        Ok(a) => a,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let accepted = app.with_state(|s| {
        if matches!(
            s.status.phase,
            ScanPhase::Enumerating | ScanPhase::Running | ScanPhase::Draining
        ) {
            return None;
        }
        s.status = Status {
            phase: ScanPhase::Enumerating,
            progress: ProgressSnapshot {
                total_hosts: addresses.len() as u64,
                total_ports: (addresses.len() * config.ports.len()) as u64,
                ..ProgressSnapshot::default()
            },
            error: None,
        };
        s.report = None;
        Some(s.status.clone())
    });
    let Some(status) = accepted else {
        return (StatusCode::CONFLICT, "a scan is already running").into_response();
    };

    let app2 = app.clone();
    tokio::spawn(async move {
        let sink: Arc<dyn ProgressSink> = Arc::new(StateSink(app2.clone()));
        let res = ScanOrchestrator::<TcpProber>::default().run(&config, Some(sink)).await;
        finish_scan(&app2, res);
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}
