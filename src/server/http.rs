use std::str::FromStr;

use super::http_errors::{map_core_error, map_exchange_error, map_start_error};
use super::http_types::{
    AccountResponse, ChallengeAnswerRequest, HealthResponse, StartRunRequest, StatisticsResponse,
    StatusResponse, WorkerResponse,
};
use super::state::AppState;
use crate::domain::WorkMode;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run/start", post(start_run))
        .route("/run/stop", post(stop_run))
        .route("/run/status", get(run_status))
        .route("/run/statistics", get(run_statistics))
        .route("/accounts", get(list_accounts))
        .route("/accounts/:id/stop", post(stop_account_worker))
        .route("/accounts/:id/restart", post(restart_account_worker))
        .route("/accounts/:id/challenge", post(answer_challenge))
        .route("/profiles/sync", post(sync_profiles))
        .route("/exchange/user", get(exchange_user))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_work_mode(mode: &str) -> Option<WorkMode> {
    WorkMode::from_str(mode).ok()
}

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        start_run,
        stop_run,
        run_status,
        run_statistics,
        list_accounts,
        stop_account_worker,
        restart_account_worker,
        answer_challenge,
        sync_profiles,
        exchange_user,
    ),
    components(
        schemas(
            HealthResponse,
            StartRunRequest,
            ChallengeAnswerRequest,
            StatusResponse,
            StatisticsResponse,
            WorkerResponse,
            AccountResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Run", description = "Run lifecycle and snapshots"),
        (name = "Accounts", description = "Per-account worker control"),
        (name = "Exchange", description = "Exchange-facing helpers"),
    ),
    info(
        title = "Rep Swarm API",
        version = "0.1.0",
        description = "Control surface for multi-account task orchestration",
        license(name = "MIT")
    )
)]
struct ApiDoc;

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

/// Start a run with the given settings
#[utoipa::path(
    post,
    path = "/run/start",
    tag = "Run",
    request_body = StartRunRequest,
    responses(
        (status = 202, description = "Run started", body = Object),
        (status = 400, description = "Invalid settings", body = Object),
        (status = 409, description = "A run is already in progress", body = Object),
        (status = 422, description = "No eligible accounts", body = Object),
        (status = 500, description = "Failed to start run", body = Object)
    )
)]
async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunRequest>,
) -> impl IntoResponse {
    let Some(work_mode) = parse_work_mode(&req.work_mode) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid work_mode",
                "allowed": ["parallel", "sequential"]
            })),
        );
    };

    let settings = req.into_settings(work_mode);
    match state.orchestrator.start(settings).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "started" })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to start run");
            let (status, body) = map_start_error(&e);
            (status, Json(body))
        }
    }
}

/// Stop the current run
///
/// Cooperative: resolves once every live worker has finished its in-flight
/// task and logged out. Idempotent when nothing is running.
#[utoipa::path(
    post,
    path = "/run/stop",
    tag = "Run",
    responses((status = 200, description = "Run stopped (or nothing was running)", body = Object))
)]
async fn stop_run(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.stop().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "stopped" })),
    )
}

/// Current run status snapshot
#[utoipa::path(
    get,
    path = "/run/status",
    tag = "Run",
    responses((status = 200, description = "Run status", body = StatusResponse))
)]
async fn run_status(State(state): State<AppState>) -> impl IntoResponse {
    let status: StatusResponse = state.orchestrator.status().into();
    (StatusCode::OK, Json(status))
}

/// Current run statistics snapshot
#[utoipa::path(
    get,
    path = "/run/statistics",
    tag = "Run",
    responses((status = 200, description = "Run statistics", body = StatisticsResponse))
)]
async fn run_statistics(State(state): State<AppState>) -> impl IntoResponse {
    let stats: StatisticsResponse = state.orchestrator.statistics().into();
    (StatusCode::OK, Json(stats))
}

/// List accounts with their derived statuses
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "Accounts",
    responses(
        (status = 200, description = "Accounts with derived status", body = [AccountResponse]),
        (status = 500, description = "Failed to list accounts", body = Object)
    )
)]
async fn list_accounts(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.account_overview().await {
        Ok(accounts) => {
            let accounts: Vec<AccountResponse> = accounts.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(serde_json::json!(accounts)))
        }
        Err(e) => {
            error!(error = %e, "Failed to list accounts");
            let (status, body) = map_core_error(&e);
            (status, Json(body))
        }
    }
}

/// Ask one account's worker to stand down
#[utoipa::path(
    post,
    path = "/accounts/{id}/stop",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses((status = 202, description = "Stop requested", body = Object))
)]
async fn stop_account_worker(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    state.orchestrator.stop_account_worker(id);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "stopping" })),
    )
}

/// Restart one account's worker
#[utoipa::path(
    post,
    path = "/accounts/{id}/restart",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 202, description = "Restart requested", body = Object),
        (status = 404, description = "Account not found", body = Object)
    )
)]
async fn restart_account_worker(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.restart_account_worker(id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "restarting" })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to restart account worker");
            let (status, body) = map_core_error(&e);
            (status, Json(body))
        }
    }
}

/// Answer a pending guard challenge for an account
#[utoipa::path(
    post,
    path = "/accounts/{id}/challenge",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = ChallengeAnswerRequest,
    responses(
        (status = 200, description = "Answer delivered", body = Object),
        (status = 404, description = "No login is waiting for an answer", body = Object)
    )
)]
async fn answer_challenge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChallengeAnswerRequest>,
) -> impl IntoResponse {
    if state.challenges.resolve(id, req.code) {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "delivered" })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "No login is waiting for a challenge answer" })),
        )
    }
}

/// Match exchange profiles to local accounts
#[utoipa::path(
    post,
    path = "/profiles/sync",
    tag = "Exchange",
    responses(
        (status = 200, description = "Sync report", body = Object),
        (status = 400, description = "Exchange API token is not configured", body = Object),
        (status = 429, description = "Rate limited by the exchange", body = Object)
    )
)]
async fn sync_profiles(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.sync_profiles().await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))),
        Err(e) => {
            error!(error = %e, "Profile sync failed");
            let (status, body) = map_core_error(&e);
            (status, Json(body))
        }
    }
}

/// Exchange user info for the configured API token
///
/// Doubles as a token validity check.
#[utoipa::path(
    get,
    path = "/exchange/user",
    tag = "Exchange",
    responses(
        (status = 200, description = "Exchange user info", body = Object),
        (status = 400, description = "Exchange API token is not configured", body = Object),
        (status = 502, description = "Exchange request failed", body = Object)
    )
)]
async fn exchange_user(State(state): State<AppState>) -> impl IntoResponse {
    use crate::infrastructure::TaskSource;

    match state.exchange.user_info().await {
        Ok(user) => (StatusCode::OK, Json(serde_json::json!(user))),
        Err(e) => {
            error!(error = %e, "Exchange user info failed");
            let (status, body) = map_exchange_error(&e);
            (status, Json(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_work_mode_accepts_both_modes() {
        assert_eq!(parse_work_mode("parallel"), Some(WorkMode::Parallel));
        assert_eq!(parse_work_mode("sequential"), Some(WorkMode::Sequential));
    }

    #[test]
    fn parse_invalid_work_mode_returns_none() {
        assert!(parse_work_mode("turbo").is_none());
        assert!(parse_work_mode("").is_none());
    }
}
