use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "reasonify-rs is running",
        "config": {
            "hybrid_model": config.hybrid_model,
            "reasoning_model": config.reasoning.exposed_model(),
            "answering_model": config.answering.exposed_model(),
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "features": {
                "log_level": config.features.log_level,
                "default_temperature": config.features.default_temperature,
                "default_max_tokens": config.features.default_max_tokens,
            }
        }
    }))
}
