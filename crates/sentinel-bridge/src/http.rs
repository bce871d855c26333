//! HTTP surface of the bridge.
//!
//! - `POST /intents` — IntentEnvelope in, ApprovalEnvelope out; 4xx on
//!   validation failure or denial, 5xx on infrastructure failure.
//! - `POST /verify` — `{approval, plan}` in, `{valid, reason?}` out.
//! - `GET /health` — 200 when signer, audit chain, and event store are
//!   reachable; 503 otherwise.
//! - `GET /audit?since=<seq>&format=jsonl|cef` — read-only export.
//!
//! Validation and policy failures surface a stable error code and no
//! internal detail; integrity failures surface as a generic 5xx with the
//! full context kept in the logs.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sentinel_core::{Approval, Plan, SentinelError};
use sentinel_journal::ExportFormat;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::BridgeService;

/// Build the bridge router.
pub fn router(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/intents", post(post_intents))
        .route("/verify", post(post_verify))
        .route("/health", get(get_health))
        .route("/audit", get(get_audit))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Error wrapper mapping the unified error to wire responses.
struct ApiError(SentinelError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match &error {
            SentinelError::Validation { .. } => StatusCode::BAD_REQUEST,
            SentinelError::PolicyDenial { .. } => StatusCode::FORBIDDEN,
            SentinelError::Signature { .. } | SentinelError::Expired { .. } => {
                StatusCode::UNAUTHORIZED
            }
            SentinelError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal failures are logged with context but surface generically.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %error, "request failed");
            "internal error".to_string()
        } else {
            error.to_string()
        };

        let body = Json(json!({
            "error": error.code(),
            "message": message,
        }));

        if let SentinelError::DependencyUnavailable {
            retry_after_secs: Some(secs),
            ..
        } = &error
        {
            return (
                status,
                [(header::RETRY_AFTER, secs.to_string())],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}

impl From<SentinelError> for ApiError {
    fn from(error: SentinelError) -> Self {
        Self(error)
    }
}

async fn post_intents(
    State(service): State<Arc<BridgeService>>,
    Json(body): Json<Value>,
) -> Result<Json<Approval>, ApiError> {
    let approval = service.submit_intent(body).await?;
    Ok(Json(approval))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    approval: Approval,
    plan: Plan,
}

async fn post_verify(
    State(service): State<Arc<BridgeService>>,
    Json(request): Json<VerifyRequest>,
) -> impl IntoResponse {
    Json(service.verify(&request.approval, &request.plan))
}

async fn get_health(State(service): State<Arc<BridgeService>>) -> Response {
    let status = service.health();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default)]
    since: u64,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "jsonl".to_string()
}

async fn get_audit(
    State(service): State<Arc<BridgeService>>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = query.format.parse()?;
    let exported = service.export_audit(query.since, format)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        exported,
    )
        .into_response())
}
