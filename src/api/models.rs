use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::auth::authenticate;
use crate::error::into_axum_response;
use crate::state::AppState;

// Fixed creation timestamp, matching what most OpenAI-compatible gateways
// report for static model listings.
const MODEL_CREATED: u64 = 1_677_610_602;

/// List the three exposed model ids in `OpenAI` format.
#[must_use]
pub async fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = authenticate(headers, &state.allowed_keys) {
        return into_axum_response(&err);
    }

    let config = &state.config;
    let data: Vec<Value> = [
        (config.hybrid_model.as_str(), "hybrid"),
        (config.reasoning.exposed_model(), "reasoning"),
        (config.answering.exposed_model(), "answering"),
    ]
    .into_iter()
    .map(|(id, owned_by)| {
        json!({
            "id": id,
            "object": "model",
            "created": MODEL_CREATED,
            "owned_by": owned_by,
            "permission": [],
            "root": id,
            "parent": null,
        })
    })
    .collect();

    Json(json!({ "object": "list", "data": data })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppConfig, ClientAuthConfig, FeaturesConfig, ProviderConfig, ServerConfig,
    };

    fn test_state() -> Arc<AppState> {
        let provider = |model: &str, exposed: &str| ProviderConfig {
            base_url: "https://api.example.com".into(),
            api_key: "k".into(),
            model: model.into(),
            exposed_model: Some(exposed.into()),
        };
        AppState::from_config(AppConfig {
            server: ServerConfig::default(),
            reasoning: provider("deep-thought-1", "reasoner"),
            answering: provider("fast-answerer-2", "answerer"),
            hybrid_model: "hybrid".into(),
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["test-key".into()],
            },
            features: FeaturesConfig::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lists_exposed_ids_not_upstream_models() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer test-key".parse().unwrap());
        let response = handler(State(test_state()), &headers).await;

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["hybrid", "reasoner", "answerer"]);
        for m in body["data"].as_array().unwrap() {
            assert_eq!(m["object"], "model");
            assert_eq!(m["root"], m["id"]);
        }
    }

    #[tokio::test]
    async fn rejects_missing_key() {
        let response = handler(State(test_state()), &HeaderMap::new()).await;
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
