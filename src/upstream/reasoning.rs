use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::stream::ReasoningClassifier;
use crate::transport::HttpTransport;

/// Opaque conversation handle returned by the reasoning provider's
/// bootstrap call, required by its streaming endpoint.
#[derive(Debug, Clone)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct ConversationResponse {
    id: String,
}

/// Adapter for the reasoning provider.
///
/// Endpoint URLs are precomputed at startup; nothing here mutates after
/// construction. The wire shape is conversation-scoped: a bootstrap POST
/// yields a conversation id, then a per-conversation messages POST streams
/// newline-delimited JSON events tagged with `content_type`/`type` fields.
pub struct ReasoningUpstream {
    api_key: String,
    model: String,
    conversations_url: url::Url,
    conversation_base: String,
}

impl ReasoningUpstream {
    /// Prepare the adapter from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the configured base URL cannot
    /// be parsed.
    pub fn new(provider: &ProviderConfig) -> Result<Self, GatewayError> {
        let base = provider.base_url.trim_end_matches('/').to_string();
        let conversations_url = url::Url::parse(&format!("{base}/api/v1/conversations"))
            .map_err(|e| GatewayError::Config(format!("Invalid reasoning base_url: {e}")))?;
        Ok(Self {
            api_key: provider.api_key.clone(),
            model: provider.model.clone(),
            conversations_url,
            conversation_base: base,
        })
    }

    #[must_use]
    pub fn classifier(&self) -> ReasoningClassifier {
        ReasoningClassifier
    }

    /// Open a new reasoning conversation.
    ///
    /// This is the bootstrap step the orchestrator retries; it is the only
    /// call in the pipeline that ever gets retried.
    ///
    /// # Errors
    ///
    /// Propagates transport/status failures; a 2xx response without a
    /// conversation id is reported as [`GatewayError::UpstreamUnavailable`]
    /// so the bootstrap retry policy applies.
    pub async fn bootstrap(
        &self,
        transport: &HttpTransport,
    ) -> Result<ConversationHandle, GatewayError> {
        let body = serde_json::json!({ "model": self.model });
        let response = transport
            .post_json(&self.conversations_url, &self.api_key, &body)
            .await?;

        let parsed: ConversationResponse = response.json().await.map_err(|e| {
            GatewayError::UpstreamUnavailable(format!("bootstrap response unreadable: {e}"))
        })?;
        if parsed.id.is_empty() {
            return Err(GatewayError::UpstreamUnavailable(
                "bootstrap response missing conversation id".to_string(),
            ));
        }
        tracing::debug!(conversation = %parsed.id, "reasoning conversation opened");
        Ok(ConversationHandle(parsed.id))
    }

    /// Open the streaming call for a bootstrapped conversation.
    ///
    /// # Errors
    ///
    /// Propagates transport/status failures. Never retried: a failure here
    /// (or later on the body) fails the stage.
    pub async fn stream_request(
        &self,
        transport: &HttpTransport,
        handle: &ConversationHandle,
        user_text: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = url::Url::parse(&format!(
            "{}/api/v1/conversations/{}/messages",
            self.conversation_base,
            handle.as_str()
        ))
        .map_err(|e| GatewayError::Internal(format!("conversation stream URL: {e}")))?;

        let body = serde_json::json!({
            "model": self.model,
            "content": user_text,
            "stream": true,
        });
        transport.post_json(&url, &self.api_key, &body).await
    }
}
