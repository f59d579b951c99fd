//! OpenAI chat-completions extractor.
//!
//! Uses structured output (`response_format: json_schema`) generated from the
//! extraction schema, at temperature 0.
//!
//! ```rust,ignore
//! use regwatch::extraction::openai::OpenAiExtractor;
//! use regwatch::security::ModelCredentials;
//!
//! let extractor = OpenAiExtractor::new(ModelCredentials::new("sk-...", "gpt-4o-mini"))?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::security::ModelCredentials;
use crate::traits::extractor::{ExtractionRequest, Extractor, ExtractorError, RawExtraction};

const SYSTEM_PROMPT: &str = "You extract structured data from regulatory and legal documents. \
Fill every field in the schema using only facts stated in the document; use null when a field \
is not stated. Copy numbers and dates exactly as they appear, formatting dates as YYYY-MM-DD. \
Write a short factual summary of the document. Report your confidence in [0, 1].";

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiExtractor {
    client: Client,
    credentials: ModelCredentials,
}

impl OpenAiExtractor {
    pub fn new(credentials: ModelCredentials) -> Result<Self, ExtractorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Use a preconfigured HTTP client (proxies, custom timeouts).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn user_prompt(request: &ExtractionRequest) -> String {
        let mut prompt = String::new();
        for instructions in [Some(request.schema.instructions.as_str()), request.instructions.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
        {
            prompt.push_str(instructions.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Document:\n");
        prompt.push_str(&request.normalized_text);
        prompt
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractorError> {
        let body = ChatRequest {
            model: &self.credentials.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(request),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "regulatory_extraction",
                    strict: false,
                    schema: request.schema.response_json_schema(),
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.credentials.base_url))
            .bearer_auth(self.credentials.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractorError::Timeout
                } else {
                    ExtractorError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Unavailable(format!(
                "OpenAI returned {status}: {error_text}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::InvalidPayload(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractorError::InvalidPayload("no choices in response".into()))?;

        parse_payload(&content)
    }

    fn model(&self) -> &str {
        &self.credentials.model
    }
}

/// Parse `{ fields, summary, confidence }`, tolerating a Markdown code fence.
fn parse_payload(content: &str) -> Result<RawExtraction, ExtractorError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if json.is_empty() {
        return Err(ExtractorError::InvalidPayload("empty content".into()));
    }

    let payload: Payload =
        serde_json::from_str(json).map_err(|e| ExtractorError::InvalidPayload(e.to_string()))?;
    let Value::Object(fields) = payload.fields else {
        return Err(ExtractorError::InvalidPayload("`fields` is not an object".into()));
    };

    Ok(RawExtraction {
        fields,
        summary: payload.summary,
        confidence: payload.confidence,
    })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Payload {
    fields: Value,
    #[serde(default)]
    summary: String,
    confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::{ExtractionSchema, FieldKind, FieldSpec};
    use serde_json::json;

    #[test]
    fn test_parse_payload_with_fence() {
        let content = "```json\n{\"fields\": {\"rate\": 10.0}, \"summary\": \"Rate is 10\", \"confidence\": 0.9}\n```";
        let raw = parse_payload(content).unwrap();

        assert_eq!(raw.fields["rate"], json!(10.0));
        assert_eq!(raw.summary, "Rate is 10");
    }

    #[test]
    fn test_parse_payload_rejects_garbage() {
        assert!(matches!(
            parse_payload("   "),
            Err(ExtractorError::InvalidPayload(_))
        ));
        assert!(parse_payload(r#"{"fields": [], "summary": "x", "confidence": 1}"#).is_err());
    }

    #[test]
    fn test_user_prompt_includes_instructions() {
        let request = ExtractionRequest {
            normalized_text: "Rate: 10.00".into(),
            schema: ExtractionSchema::new("rates")
                .with_instructions("Track the sales tax rate.")
                .with_field(FieldSpec::new("rate", FieldKind::Number)),
            instructions: Some("Ignore archived notices.".into()),
        };
        let prompt = OpenAiExtractor::user_prompt(&request);

        assert!(prompt.starts_with("Track the sales tax rate.\n\nIgnore archived notices."));
        assert!(prompt.ends_with("Document:\nRate: 10.00"));
    }
}
