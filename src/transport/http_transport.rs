use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::GatewayError;

const UPSTREAM_ERROR_BODY_MAX_CHARS: usize = 512;

/// HTTP client for upstream provider requests.
///
/// One pooled reqwest client, built once at startup from server config and
/// shared read-only across all sessions. Connect and overall read timeouts
/// come from config; a timeout firing mid-stream surfaces as
/// [`GatewayError::UpstreamUnavailable`] on the body stream.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport from server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the underlying client cannot be
    /// constructed.
    pub fn new(config: &ServerConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.http_pool_max_idle_per_host)
            .pool_idle_timeout(pool_idle_timeout)
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.timeout))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self { client })
    }

    /// POST a JSON body to an upstream endpoint and return the raw response.
    ///
    /// The response body is untouched; streaming callers consume it via
    /// `bytes_stream()`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UpstreamUnavailable`] for connect/DNS/timeout and
    ///   other transport failures.
    /// - [`GatewayError::UpstreamRejected`] for non-2xx responses, carrying
    ///   the status and a truncated body excerpt.
    pub async fn post_json(
        &self,
        url: &url::Url,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        ensure_success(response).await
    }
}

/// Map a reqwest failure into the gateway taxonomy.
pub(crate) fn classify_transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::UpstreamUnavailable(err.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.text().await {
        Ok(text) => truncate_chars(&text, UPSTREAM_ERROR_BODY_MAX_CHARS),
        Err(_) => String::new(),
    };
    tracing::warn!(status = status.as_u16(), "upstream rejected request");
    Err(GatewayError::UpstreamRejected {
        status: status.as_u16(),
        message,
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
