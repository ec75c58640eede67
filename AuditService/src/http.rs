use audit_models::{AuditError, AuditRecord};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::anchor::AnchorRequest;
use crate::scheduler::SubmitRequest;
use crate::AuditService;

type AppState = Arc<AuditService>;

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    details: String,
}

pub struct ApiError(AuditError);

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(AuditError::Validation(format!("invalid request body: {}", rejection.body_text())))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AuditError::NotFound(_) => StatusCode::NOT_FOUND,
            AuditError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuditError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            AuditError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AuditError::Persistence(_) | AuditError::InvalidTransition { .. } | AuditError::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            details: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// `POST /audit` body. With a wallet the audit is tracked, without one it is a
/// one-off analysis.
#[derive(Debug, Deserialize)]
struct AuditBody {
    code: String,
    #[serde(default)]
    wallet: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreBody {
    id: String,
    wallet: String,
    code: String,
    audit_text: Value,
}

pub fn router(service: AppState) -> Router {
    let api = Router::new()
        .route("/audit", post(submit_audit))
        .route("/store", post(store_audit))
        .route("/report/{id}", get(get_report))
        .route("/report/{id}/pdf", get(get_report_pdf))
        .route("/status/{id}", get(get_status))
        .route("/user-audits/{email}", get(get_user_audits));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .with_state(service)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn submit_audit(
    State(service): State<AppState>,
    body: Result<Json<AuditBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    match body.wallet {
        Some(wallet) => {
            let request = SubmitRequest {
                wallet,
                code: body.code,
                email: body.email,
            };
            let submission = service.submit(&request).await?;
            Ok(Json(submission).into_response())
        }
        None => {
            let report = service.analyze(&body.code).await?;
            Ok(Json(report).into_response())
        }
    }
}

async fn store_audit(
    State(service): State<AppState>,
    body: Result<Json<StoreBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let audit_text = match body.audit_text {
        Value::String(text) => text,
        other => other.to_string(),
    };
    let receipt = service
        .anchor(AnchorRequest {
            id: body.id,
            submitter: body.wallet,
            source: body.code,
            audit_text,
        })
        .await?;

    Ok(Json(json!({
        "tx": receipt.ledger_reference,
        "contentLocator": receipt.content_locator,
        "sourceHash": receipt.source_hash,
    })))
}

async fn get_report(State(service): State<AppState>, Path(id): Path<String>) -> Result<Json<AuditRecord>, ApiError> {
    Ok(Json(service.record(&id).await?))
}

async fn get_status(State(service): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let status = service.status(&id).await?;
    Ok(Json(json!({ "status": status })))
}

async fn get_user_audits(
    State(service): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    Ok(Json(service.user_audits(&email).await?))
}

/// Streams the rendered PDF. The temporary file lives as long as the body
/// stream and is removed when the stream finishes or the client goes away.
async fn get_report_pdf(State(service): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let rendered = service.render_report(&id).await?;
    let file = tokio::fs::File::open(rendered.path())
        .await
        .map_err(|e| AuditError::Render(format!("cannot open rendered report: {}", e)))?;

    let temp_path = rendered.into_temp_path();
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _owned = &temp_path;
        chunk
    });

    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"audit-{}.pdf\"", id),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Serves the API until Ctrl-C, then drains in-flight audits.
pub async fn serve(service: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "audit API listening");

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}
