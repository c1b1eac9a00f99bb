use crate::{
    config::{ApiKey, Config},
    error::{Error, Result},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

/// Sends one prompt with a system instruction and returns the generated text.
///
/// Implementations must be thread-safe; the dispatcher shares a single
/// instance across all workers. A call blocks until the answer is
/// available and never retries.
pub trait Completion: Send + Sync {
    /// Requests a completion for `prompt` under `instruction`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on transport, authentication or
    /// response format failures.
    fn complete(&self, prompt: &str, instruction: &str) -> Result<String>;
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction that frames the conversation
    System,
    /// The prompt being answered
    User,
}

/// One role-tagged message of a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage<'a> {
    /// Message author
    pub role: Role,
    /// Message text
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Blocking client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: ApiKey,
    temperature: Option<f32>,
}

impl ChatClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            url: config.completions_url(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, instruction: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: Role::System,
                    content: instruction,
                },
                ChatMessage {
                    role: Role::User,
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        }
    }
}

impl Completion for ChatClient {
    fn complete(&self, prompt: &str, instruction: &str) -> Result<String> {
        debug!(model = %self.model, "Requesting completion for: {prompt}");
        let started = Instant::now();

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose())
            .json(&self.request(prompt, instruction))
            .send()?;

        let status = response.status();
        let body = response.text()?;
        trace!("Response status {status}, {} bytes", body.len());

        if !status.is_success() {
            return Err(Error::upstream(format!(
                "{status}: {}",
                error_message(&body)
            )));
        }

        let text = parse_completion(&body)?;
        debug!(
            "Completion received in {:.2}s ({} chars)",
            started.elapsed().as_secs_f64(),
            text.len()
        );
        Ok(text)
    }
}

/// Extracts the first choice's text from a response body.
fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::upstream(format!("malformed response: {e}")))?;

    response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::upstream("response contained no choices"))?
        .message
        .content
        .ok_or_else(|| Error::upstream("first choice has no text content"))
}

/// Best-effort extraction of the service's error message.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client() -> ChatClient {
        let config = Config::builder()
            .model("gpt-4o-mini")
            .api_key("sk-test")
            .temperature(0.5)
            .build()
            .unwrap();
        ChatClient::new(&config).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let client = test_client();
        let request = client.request("Explain TCP", "You are concise.");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "You are concise."},
                    {"role": "user", "content": "Explain TCP"}
                ],
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn test_request_omits_unset_temperature() {
        let config = Config::builder()
            .model("gpt-4o-mini")
            .api_key("sk-test")
            .build()
            .unwrap();
        let client = ChatClient::new(&config).unwrap();

        let value = serde_json::to_value(client.request("p", "i")).unwrap();
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_parse_first_choice() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "first"}},
                {"index": 1, "message": {"role": "assistant", "content": "second"}}
            ]
        })
        .to_string();

        assert_eq!(parse_completion(&body).unwrap(), "first");
    }

    #[test]
    fn test_parse_empty_choices() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(err.is_upstream());
    }

    #[test]
    fn test_parse_null_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        assert!(parse_completion(body).unwrap_err().is_upstream());
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_completion("<html>Bad Gateway</html>").unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(error_message(body), "Incorrect API key provided");
        assert_eq!(error_message("  upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn test_unreachable_endpoint_is_upstream_error() {
        let config = Config::builder()
            .model("gpt-4o-mini")
            .api_key("sk-test")
            .base_url("http://127.0.0.1:9")
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap();
        let client = ChatClient::new(&config).unwrap();

        let err = client.complete("hello", "be brief").unwrap_err();
        assert!(err.is_upstream());
    }
}
