use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::health::HealthChecker,
    error::GatewayError,
    gateway::Gateway,
    models::{
        notification::{SubmitNotification, SubmitOutcome},
        response::ApiResponse,
        status::{StatusQuery, StatusUpdate},
    },
};

pub struct AppState {
    pub gateway: Gateway,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/notifications/", post(submit_notification))
        .route(
            "/api/v1/notifications/{notification_type}/status/",
            post(update_status).get(get_status),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<S>(
    state: Arc<AppState>,
    port: u16,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Notification gateway started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Notification gateway stopped");

    Ok(())
}

async fn submit_notification(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitNotification>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(submission) = payload.map_err(|e| GatewayError::validation(e.body_text()))?;

    let response = match state.gateway.submit(submission).await? {
        SubmitOutcome::Accepted { request_id } => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                json!({ "request_id": request_id, "status": "pending" }),
                "Notification accepted for delivery.",
            )),
        ),
        SubmitOutcome::Duplicate { request_id } => (
            StatusCode::OK,
            Json(ApiResponse::success(
                json!({ "request_id": request_id, "status": "duplicate" }),
                "Request is a duplicate and was already accepted.",
            )),
        ),
    };

    Ok(response.into_response())
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(notification_type): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(update) = payload.map_err(|e| GatewayError::validation(e.body_text()))?;

    let record = state
        .gateway
        .update_status(&notification_type, update)
        .await?;

    Ok(Json(ApiResponse::success(record, "Status updated.")).into_response())
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(notification_type): Path<String>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Response, GatewayError> {
    let Query(query) = query.map_err(|e| GatewayError::validation(e.body_text()))?;

    let record = state
        .gateway
        .get_status(&notification_type, query.notification_id.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(record, "Status retrieved.")).into_response())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health_checker.check_all().await;

    let healthy = report.is_healthy();

    let (status_code, message) = if healthy {
        (StatusCode::OK, "All dependencies are healthy.")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "One or more dependencies are unhealthy.")
    };

    let mut body = ApiResponse::success(report, message);
    body.success = healthy;

    (status_code, Json(body))
}
