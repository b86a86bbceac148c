use crate::config::AppConfig;
use crate::error::GatewayError;
use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;

/// Compact key index used in hot-path authentication.
pub enum AllowedClientKeys {
    Empty,
    Single { bearer: Box<str> },
    Multiple(FxHashSet<String>),
}

/// Build the allowed-key index from configuration.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let keys = &config.client_authentication.allowed_keys;
    match keys.len() {
        0 => AllowedClientKeys::Empty,
        1 => AllowedClientKeys::Single {
            bearer: format!("Bearer {}", keys[0]).into_boxed_str(),
        },
        _ => AllowedClientKeys::Multiple(keys.iter().cloned().collect()),
    }
}

/// Extract the API key from `Authorization: Bearer <key>`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the header is missing or malformed.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request against the prebuilt key index.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), GatewayError> {
    match allowed_keys {
        AllowedClientKeys::Single { bearer } => {
            let presented = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))?;
            if presented == bearer.as_ref() {
                Ok(())
            } else {
                Err(GatewayError::Auth("Invalid API key".to_string()))
            }
        }
        AllowedClientKeys::Multiple(allowed_set) => {
            let client_key = extract_api_key(headers)?;
            if allowed_set.contains(client_key) {
                Ok(())
            } else {
                Err(GatewayError::Auth("Invalid API key".to_string()))
            }
        }
        AllowedClientKeys::Empty => Err(GatewayError::Auth("Invalid API key".to_string())),
    }
}
