use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::protocol::openai::ChatMessage;
use crate::stream::AnsweringClassifier;
use crate::transport::HttpTransport;

/// Adapter for the answering provider.
///
/// Speaks standard OpenAI chat-completions: one streaming POST to
/// `{base}/chat/completions` with the configured upstream model substituted
/// for whatever the client asked for.
pub struct AnsweringUpstream {
    api_key: String,
    model: String,
    chat_url: url::Url,
}

impl AnsweringUpstream {
    /// Prepare the adapter from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the configured base URL cannot
    /// be parsed.
    pub fn new(provider: &ProviderConfig) -> Result<Self, GatewayError> {
        let base = provider.base_url.trim_end_matches('/');
        let chat_url = url::Url::parse(&format!("{base}/chat/completions"))
            .map_err(|e| GatewayError::Config(format!("Invalid answering base_url: {e}")))?;
        Ok(Self {
            api_key: provider.api_key.clone(),
            model: provider.model.clone(),
            chat_url,
        })
    }

    #[must_use]
    pub fn classifier(&self) -> AnsweringClassifier {
        AnsweringClassifier
    }

    /// Build the upstream request body for a streaming chat call.
    ///
    /// The client-facing model id is replaced with the provider's real model;
    /// sampling knobs are forwarded only when present.
    #[must_use]
    pub fn build_request_body(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f64>,
        max_tokens: Option<u64>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(t) = temperature {
                map.insert("temperature".to_string(), serde_json::json!(t));
            }
            if let Some(m) = max_tokens {
                map.insert("max_tokens".to_string(), serde_json::json!(m));
            }
        }
        body
    }

    /// Open the streaming chat-completions call.
    ///
    /// # Errors
    ///
    /// Propagates transport/status failures from the POST.
    pub async fn stream_request(
        &self,
        transport: &HttpTransport,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, GatewayError> {
        transport.post_json(&self.chat_url, &self.api_key, body).await
    }
}
