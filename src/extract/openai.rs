use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CompletionBackend, CompletionRequest, ExtractionError};
use crate::config::ExtractionSettings;

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint
/// using strict `json_schema` structured output.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(settings: &ExtractionSettings) -> Result<Self, ExtractionError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ExtractionError::MissingCredential)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(OpenAiClient {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: Value,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn build_request<'a>(model: &'a str, request: &CompletionRequest<'a>) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: request.system,
            },
            ChatMessage {
                role: "user",
                content: request.user,
            },
        ],
        response_format: json!({
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "strict": true,
                "schema": request.schema,
            }
        }),
        temperature: 0.0,
    }
}

/// Pull the JSON text out of a completion reply.
fn reply_content(body: &str) -> Result<String, ExtractionError> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(ExtractionError::EmptyResponse)?;
    if let Some(refusal) = message.refusal {
        return Err(ExtractionError::Refused(refusal));
    }
    message.content.ok_or(ExtractionError::EmptyResponse)
}

impl CompletionBackend for OpenAiClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ExtractionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request(&self.model, request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(ExtractionError::Service {
                status: status.as_u16(),
                body: text,
            });
        }
        reply_content(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: Option<&str>) -> ExtractionSettings {
        ExtractionSettings {
            api_key: key.map(String::from),
            base_url: "https://api.example.test/v1/".into(),
            model: "gpt-4o".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn requires_credential() {
        assert!(matches!(
            OpenAiClient::new(&settings(None)),
            Err(ExtractionError::MissingCredential)
        ));
        assert!(matches!(
            OpenAiClient::new(&settings(Some("  "))),
            Err(ExtractionError::MissingCredential)
        ));
        let client = OpenAiClient::new(&settings(Some("sk-test"))).unwrap();
        assert_eq!(client.base_url, "https://api.example.test/v1");
        assert_eq!(client.model(), "gpt-4o");
    }

    #[test]
    fn request_carries_strict_schema() {
        let schema = json!({"type": "object"});
        let req = CompletionRequest {
            system: "sys",
            user: "Lisinopril 10mg",
            schema_name: "prescription_record",
            schema: &schema,
        };
        let body = serde_json::to_value(build_request("gpt-4o", &req)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Lisinopril 10mg");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["response_format"]["json_schema"]["schema"], schema);
    }

    #[test]
    fn reply_content_variants() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}]}"#;
        assert_eq!(reply_content(ok).unwrap(), r#"{"a":1}"#);

        let refused =
            r#"{"choices":[{"message":{"role":"assistant","content":null,"refusal":"no"}}]}"#;
        assert!(matches!(reply_content(refused), Err(ExtractionError::Refused(r)) if r == "no"));

        assert!(matches!(
            reply_content(r#"{"choices":[]}"#),
            Err(ExtractionError::EmptyResponse)
        ));
        assert!(matches!(
            reply_content("<html>bad gateway</html>"),
            Err(ExtractionError::MalformedOutput(_))
        ));
    }
}
