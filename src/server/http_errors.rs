use crate::application::OrchestratorError;
use crate::infrastructure::{ExchangeError, StoreError};
use axum::http::StatusCode;

pub(super) fn map_start_error(err: &OrchestratorError) -> (StatusCode, serde_json::Value) {
    match err {
        OrchestratorError::AlreadyRunning => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "A run is already in progress" }),
        ),
        OrchestratorError::NoEligibleAccounts => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": "No accounts with a platform id are eligible to run" }),
        ),
        OrchestratorError::InvalidSettings(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Failed to start run" }),
        ),
    }
}

pub(super) fn map_core_error(err: &OrchestratorError) -> (StatusCode, serde_json::Value) {
    match err {
        OrchestratorError::Store(StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Account not found" }),
        ),
        OrchestratorError::Exchange(ExchangeError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({ "error": "Rate limited by the exchange, please retry" }),
        ),
        OrchestratorError::Exchange(ExchangeError::MissingToken) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Exchange API token is not configured" }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Operation failed" }),
        ),
    }
}

pub(super) fn map_exchange_error(err: &ExchangeError) -> (StatusCode, serde_json::Value) {
    match err {
        ExchangeError::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({ "error": "Rate limited by the exchange, please retry" }),
        ),
        ExchangeError::MissingToken => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Exchange API token is not configured" }),
        ),
        ExchangeError::Rejected(msg) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": msg }),
        ),
        _ => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "Exchange request failed" }),
        ),
    }
}
