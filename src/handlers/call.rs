//! Call control endpoints.
//!
//! The browser toggles the process-wide call flag with these. Sessions read the
//! flag before starting capture and before forwarding every audio chunk.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("Backend is running")
}

pub async fn start_call(state: web::Data<AppState>) -> HttpResponse {
    let changed = state.call.start();
    if changed {
        info!("Call started");
    }

    HttpResponse::Ok().json(json!({
        "call_active": state.call.is_active(),
        "changed": changed
    }))
}

pub async fn stop_call(state: web::Data<AppState>) -> HttpResponse {
    let changed = state.call.stop();
    if changed {
        info!("Call stopped");
    }

    HttpResponse::Ok().json(json!({
        "call_active": state.call.is_active(),
        "changed": changed
    }))
}
