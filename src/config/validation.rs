use super::{AppConfig, ConfigError, ProviderConfig};

/// Validate semantic constraints that serde cannot express.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] describing the first violated constraint.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_provider("reasoning", &config.reasoning)?;
    validate_provider("answering", &config.answering)?;

    if config.hybrid_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "hybrid_model must not be empty".to_string(),
        ));
    }

    let reasoning_id = config.reasoning.exposed_model();
    let answering_id = config.answering.exposed_model();
    if reasoning_id == answering_id
        || reasoning_id == config.hybrid_model
        || answering_id == config.hybrid_model
    {
        return Err(ConfigError::Validation(format!(
            "exposed model ids must be distinct: reasoning='{reasoning_id}', \
             answering='{answering_id}', hybrid='{}'",
            config.hybrid_model
        )));
    }

    if config.client_authentication.allowed_keys.is_empty() {
        return Err(ConfigError::Validation(
            "client_authentication.allowed_keys must list at least one key".to_string(),
        ));
    }
    if config
        .client_authentication
        .allowed_keys
        .iter()
        .any(|key| key.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "client_authentication.allowed_keys must not contain empty keys".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(section: &str, provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.base_url.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{section}.base_url must not be empty"
        )));
    }
    let parsed = url::Url::parse(&provider.base_url)
        .map_err(|e| ConfigError::Validation(format!("{section}.base_url is invalid: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{section}.base_url must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if provider.api_key.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{section}.api_key must not be empty"
        )));
    }
    if provider.model.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{section}.model must not be empty"
        )));
    }
    if let Some(exposed) = provider.exposed_model.as_deref() {
        if exposed.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}.exposed_model must not be empty when set"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientAuthConfig, FeaturesConfig, ServerConfig};

    fn provider(model: &str, exposed: &str) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://api.example.com".into(),
            api_key: "secret".into(),
            model: model.into(),
            exposed_model: Some(exposed.into()),
        }
    }

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            reasoning: provider("deep-thought-1", "reasoner"),
            answering: provider("gpt-4o-mini", "answerer"),
            hybrid_model: "hybrid".into(),
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["client-key".into()],
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_invalid_base_url() {
        let mut config = valid_config();
        config.reasoning.base_url = "not a url".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut config = valid_config();
        config.answering.base_url = "ftp://api.example.com".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_colliding_exposed_model_ids() {
        let mut config = valid_config();
        config.answering.exposed_model = Some("reasoner".into());
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.hybrid_model = "answerer".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_missing_client_keys() {
        let mut config = valid_config();
        config.client_authentication.allowed_keys.clear();
        assert!(validate_config(&config).is_err());
    }
}
