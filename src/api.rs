use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    config::PipelineCfg,
    leads::{Lead, LeadFilter, LeadService},
    model::{RunId, RunState, RunStatus},
    orchestrator::Orchestrator,
};

const MAX_LABEL_LEN: usize = 120;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    leads: Arc<LeadService>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, leads: Arc<LeadService>) -> Self {
        Self { orchestrator, leads }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/pipeline", get(get_pipeline))
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/leads", get(list_leads))
        .route("/api/leads/mock-mode", put(set_mock_mode))
        .route("/api/leads/{id}", get(get_lead))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind {bind}"))?;
    info!("leadsniper API listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResp { status: &'static str }

async fn health() -> Json<HealthResp> {
    Json(HealthResp { status: "ok" })
}

async fn get_pipeline(State(st): State<AppState>) -> Json<PipelineCfg> {
    Json(st.orchestrator.pipeline().clone())
}

#[derive(Deserialize)]
struct StartRunReq {
    #[serde(default)]
    trigger: String,
    #[serde(default)]
    source: String,
}

#[derive(Serialize, Deserialize)]
pub struct StartRunResp { pub run_id: RunId }

async fn start_run(
    State(st): State<AppState>,
    Json(req): Json<StartRunReq>,
) -> Result<(StatusCode, Json<StartRunResp>), ApiErr> {
    let trigger = label_or(&req.trigger, "All", "trigger")?;
    let source = label_or(&req.source, "all", "source")?;
    let run_id = st.orchestrator.start_run(trigger, source);
    Ok((StatusCode::CREATED, Json(StartRunResp { run_id })))
}

fn label_or<'a>(value: &'a str, fallback: &'a str, field: &str) -> Result<&'a str, ApiErr> {
    let v = value.trim();
    if v.chars().count() > MAX_LABEL_LEN {
        return Err(ApiErr::bad_request(format!("{field} must be at most {MAX_LABEL_LEN} characters")));
    }
    Ok(if v.is_empty() { fallback } else { v })
}

#[derive(Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub progress: u8,
}

async fn list_runs(State(st): State<AppState>) -> Json<Vec<RunSummary>> {
    let registry = st.orchestrator.registry();
    let runs = registry
        .ids()
        .into_iter()
        .filter_map(|run_id| {
            let state = registry.get(&run_id)?;
            Some(RunSummary { run_id, status: state.status, progress: state.progress })
        })
        .collect();
    Json(runs)
}

async fn get_run(State(st): State<AppState>, Path(id): Path<String>) -> Result<Json<RunState>, ApiErr> {
    st.orchestrator
        .get_run_status(&id)
        .map(Json)
        .ok_or_else(|| ApiErr::run_not_found(&id))
}

#[derive(Serialize, Deserialize)]
pub struct CancelResp {
    pub cancelled: bool,
    pub run: RunState,
}

async fn cancel_run(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResp>), ApiErr> {
    let cancelled = st.orchestrator.cancel_run(&id);
    let run = st.orchestrator.get_run_status(&id).ok_or_else(|| ApiErr::run_not_found(&id))?;
    Ok((StatusCode::ACCEPTED, Json(CancelResp { cancelled, run })))
}

async fn list_leads(State(st): State<AppState>, Query(filter): Query<LeadFilter>) -> Json<Vec<Lead>> {
    let leads = st.leads.list_leads().await;
    Json(filter.apply(leads))
}

async fn get_lead(State(st): State<AppState>, Path(id): Path<String>) -> Result<Json<Lead>, ApiErr> {
    st.leads
        .get_lead(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiErr::lead_not_found(&id))
}

#[derive(Deserialize)]
struct MockModeReq { enabled: bool }

async fn set_mock_mode(State(st): State<AppState>, Json(req): Json<MockModeReq>) -> StatusCode {
    st.leads.set_mock_mode(req.enabled);
    info!(enabled = req.enabled, "lead mock mode changed");
    StatusCode::NO_CONTENT
}

#[derive(Debug)]
struct ApiErr {
    status: StatusCode,
    code: String,
    message: String,
    suggestion: Option<String>,
}

impl ApiErr {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            suggestion: None,
        }
    }

    fn run_not_found(run_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "run_not_found".to_string(),
            message: format!("No run with id {}", run_id),
            suggestion: Some("Runs are kept in memory only; start a new run after a server restart.".to_string()),
        }
    }

    fn lead_not_found(lead_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "lead_not_found".to_string(),
            message: format!("No lead with id {}", lead_id),
            suggestion: None,
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            suggestion: Option<String>,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
                suggestion: self.suggestion,
            }),
        )
            .into_response()
    }
}
