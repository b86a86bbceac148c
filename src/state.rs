use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::auth::{build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::transport::HttpTransport;
use crate::upstream::{AnsweringUpstream, ReasoningUpstream};
use crate::util::next_generated_id;

/// Shared application state.
///
/// Built once at startup and shared read-only across requests; the only
/// mutable member is the completion-id counter.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub reasoning: ReasoningUpstream,
    pub answering: AnsweringUpstream,
    pub allowed_keys: AllowedClientKeys,
    completion_counter: AtomicU64,
}

impl AppState {
    /// Build all request-path machinery from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the HTTP client or an upstream
    /// adapter cannot be constructed.
    pub fn from_config(config: AppConfig) -> Result<Arc<Self>, GatewayError> {
        let transport = HttpTransport::new(&config.server)?;
        let reasoning = ReasoningUpstream::new(&config.reasoning)?;
        let answering = AnsweringUpstream::new(&config.answering)?;
        let allowed_keys = build_allowed_key_set(&config);
        Ok(Arc::new(Self {
            config,
            transport,
            reasoning,
            answering,
            allowed_keys,
            completion_counter: AtomicU64::new(1),
        }))
    }

    /// Fresh correlation id for one chat-completion session.
    #[must_use]
    pub fn next_completion_id(&self) -> String {
        next_generated_id("chatcmpl", &self.completion_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientAuthConfig, FeaturesConfig, ProviderConfig, ServerConfig};

    fn test_config() -> AppConfig {
        let provider = ProviderConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: "k".into(),
            model: "m".into(),
            exposed_model: None,
        };
        AppConfig {
            server: ServerConfig::default(),
            reasoning: provider.clone(),
            answering: provider,
            hybrid_model: "hybrid".into(),
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["k1".into()],
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn completion_ids_are_unique_and_prefixed() {
        let state = AppState::from_config(test_config()).unwrap();
        let a = state.next_completion_id();
        let b = state.next_completion_id();
        assert!(a.starts_with("chatcmpl-"));
        assert_ne!(a, b);
    }
}
