use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::app::services::StorePort;
use crate::domain::models::LogRecord;
use crate::domain::telemetry::SessionTelemetry;

const GENERIC_ERROR_DETAIL: &str = "Internal Server Error. Please try again later.";

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn StorePort>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LogRecordResponse {
    pub id: String,
    pub received_at: String,
    pub topic: String,
    pub payload: SessionTelemetry,
}

impl From<LogRecord> for LogRecordResponse {
    fn from(record: LogRecord) -> Self {
        Self {
            id: record.id,
            received_at: record.received_at,
            topic: record.topic,
            payload: record.payload,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health)
            .service(list_messages_endpoint),
    );
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/messages")]
async fn list_messages_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let store = Arc::clone(&state.store);

    match web::block(move || store.list_all()).await {
        Ok(Ok(records)) => {
            let mapped: Vec<LogRecordResponse> =
                records.into_iter().map(LogRecordResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Ok(Err(error)) => {
            tracing::error!(error = %error, "failed to list log records");
            internal_error_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "log record query was cancelled");
            internal_error_response()
        }
    }
}

fn internal_error_response() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "detail": GENERIC_ERROR_DETAIL
    }))
}
