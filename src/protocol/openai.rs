use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Inbound `POST /v1/chat/completions` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatCompletionRequest {
    /// Validate the shape constraints the gateway enforces before any
    /// upstream call: messages present, last message from the user, and
    /// non-empty content.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidRequest` naming the violated constraint.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "model is required".to_string(),
            ));
        }
        let Some(last) = self.messages.last() else {
            return Err(GatewayError::InvalidRequest(
                "messages must contain at least one entry".to_string(),
            ));
        };
        if last.role != "user" {
            return Err(GatewayError::InvalidRequest(format!(
                "last message must have role 'user', got '{}'",
                last.role
            )));
        }
        if last.content.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "last message content must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Content of the final user turn. Only valid after [`Self::validate`].
    #[must_use]
    pub fn last_user_content(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }

    /// Character count of all message content, the prompt-side usage proxy.
    #[must_use]
    pub fn prompt_chars(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| m.content.chars().count() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<(&str, &str)>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "hybrid".into(),
            messages: messages
                .into_iter()
                .map(|(role, content)| ChatMessage {
                    role: role.into(),
                    content: content.into(),
                })
                .collect(),
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn accepts_user_terminated_conversation() {
        let req = request(vec![("system", "be brief"), ("user", "what is 2+2?")]);
        assert!(req.validate().is_ok());
        assert_eq!(req.last_user_content(), "what is 2+2?");
    }

    #[test]
    fn rejects_empty_messages() {
        assert!(request(vec![]).validate().is_err());
    }

    #[test]
    fn rejects_non_user_last_message() {
        let req = request(vec![("user", "hi"), ("assistant", "hello")]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_blank_content() {
        let req = request(vec![("user", "   ")]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn prompt_chars_counts_characters_not_bytes() {
        let req = request(vec![("user", "café")]);
        assert_eq!(req.prompt_chars(), 4);
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!req.stream);
        assert!(req.temperature.is_none());
        assert!(req.max_tokens.is_none());
    }
}
