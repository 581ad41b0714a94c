//! Text-model assisted extraction and pagination
//!
//! The model is asked for strict JSON. Responses are validated against a
//! fixed contract; anything else is a [`ExtractionError::ParseFailure`].
//!
//! Extraction contract:
//! `{"fields": {"<field>": ["value", ...], ...}}`; values must be strings
//! that occur verbatim in the supplied page text.
//!
//! Pagination contract:
//! `{"next_url": "<url>" | null, "confidence": 0-100}`; the URL must be one
//! of the offered candidates.

use crate::config::{AiConfig, FieldSpec};
use crate::error::{Error, ExtractionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A chat-style text model
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Complete a prompt with a system instruction
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiModel {
    /// Build a client from job config
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| crate::error::ConfigError::Missing("ai.api_key".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextModel for OpenAiModel {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!("Model {} returned {} chars", self.model, text.len());
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// System instruction for field extraction
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured data from web page text. \
Only return values that appear verbatim in the provided text; never infer, complete, or invent values. \
Respond with a single JSON object of the form {\"fields\": {\"<field>\": [\"value\", ...]}} \
containing every requested field, using an empty array when a field is not present.";

/// System instruction for pagination
pub const PAGINATION_SYSTEM_PROMPT: &str = "You identify the link to the next page of a paginated listing. \
Choose only from the candidate links provided. Respond with a single JSON object of the form \
{\"next_url\": \"<url or null>\", \"confidence\": <integer 0-100>}.";

/// Locate a JSON object in a reply, tolerating ```json fences and prose
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Prompt asking for the requested fields from page text
pub fn build_extraction_prompt(fields: &[FieldSpec], text: &str) -> String {
    let names: Vec<String> = fields
        .iter()
        .map(|f| format!("- {} ({:?})", f.name, f.kind()).to_lowercase())
        .collect();
    format!(
        "FIELDS:\n{}\n\nPAGE TEXT:\n\"\"\"\n{}\n\"\"\"\n\nReturn the JSON object now.",
        names.join("\n"),
        text
    )
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Validate an extraction reply against the contract and the source text
pub fn parse_extraction(
    raw: &str,
    fields: &[FieldSpec],
    source_text: &str,
) -> std::result::Result<BTreeMap<String, Vec<String>>, ExtractionError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| ExtractionError::ParseFailure("no JSON object in reply".to_string()))?;
    let value: Value =
        serde_json::from_str(block).map_err(|e| ExtractionError::ParseFailure(e.to_string()))?;
    let object = value
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| ExtractionError::ParseFailure("missing \"fields\" object".to_string()))?;

    let haystack = squash(source_text);
    let mut out = BTreeMap::new();
    for field in fields {
        let values = match object.get(&field.name) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        ExtractionError::ParseFailure(format!(
                            "non-string value for field '{}'",
                            field.name
                        ))
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ExtractionError::ParseFailure(format!(
                    "field '{}' must be an array, got {}",
                    field.name, other
                )))
            }
        };

        let verified: Vec<String> = values
            .into_iter()
            .filter(|v| {
                let present = !v.trim().is_empty() && haystack.contains(&squash(v));
                if !present {
                    warn!("Dropping model value not found in page text for '{}': {}", field.name, v);
                }
                present
            })
            .collect();
        out.insert(field.name.clone(), verified);
    }
    Ok(out)
}

/// A link offered to the model
#[derive(Debug, Clone, Serialize)]
pub struct LinkCandidate {
    /// Absolute URL
    pub url: String,
    /// Anchor text
    pub text: String,
}

/// Parsed pagination reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaginationAnswer {
    /// Proposed next page
    pub next_url: Option<String>,
    /// Self-reported confidence, 0-100
    pub confidence: u8,
}

/// Prompt listing candidate links
pub fn build_pagination_prompt(page_url: &str, candidates: &[LinkCandidate]) -> String {
    let lines: Vec<String> = candidates
        .iter()
        .map(|c| format!("- {} | {}", c.url, c.text))
        .collect();
    format!(
        "CURRENT PAGE: {}\n\nCANDIDATE LINKS (url | text):\n{}\n\nReturn the JSON object now.",
        page_url,
        lines.join("\n")
    )
}

/// Validate a pagination reply
pub fn parse_pagination(
    raw: &str,
    candidates: &[LinkCandidate],
) -> std::result::Result<PaginationAnswer, ExtractionError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| ExtractionError::ParseFailure("no JSON object in reply".to_string()))?;
    let answer: PaginationAnswer =
        serde_json::from_str(block).map_err(|e| ExtractionError::ParseFailure(e.to_string()))?;
    if answer.confidence > 100 {
        return Err(ExtractionError::ParseFailure(format!(
            "confidence {} out of range",
            answer.confidence
        )));
    }
    if let Some(ref url) = answer.next_url {
        if !candidates.iter().any(|c| &c.url == url) {
            return Err(ExtractionError::ParseFailure(format!(
                "proposed URL is not a candidate: {}",
                url
            )));
        }
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::new("email"), FieldSpec::new("name")]
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("Sure! {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("no json"), None);
    }

    #[test]
    fn test_parse_extraction_verifies_presence() {
        let text = "Contact Jane Doe at jane@example.com";
        let raw = r#"{"fields": {"email": ["jane@example.com", "made@up.com"], "name": "Jane Doe"}}"#;
        let parsed = parse_extraction(raw, &fields(), text).unwrap();
        assert_eq!(parsed["email"], vec!["jane@example.com".to_string()]);
        assert_eq!(parsed["name"], vec!["Jane Doe".to_string()]);
    }

    #[test]
    fn test_parse_extraction_missing_field_is_empty() {
        let parsed = parse_extraction(r#"{"fields": {"email": []}}"#, &fields(), "x").unwrap();
        assert!(parsed["name"].is_empty());
    }

    #[test]
    fn test_parse_extraction_rejects_bad_shapes() {
        assert!(matches!(
            parse_extraction("not json at all", &fields(), ""),
            Err(ExtractionError::ParseFailure(_))
        ));
        assert!(matches!(
            parse_extraction(r#"{"email": ["a"]}"#, &fields(), "a"),
            Err(ExtractionError::ParseFailure(_))
        ));
        assert!(matches!(
            parse_extraction(r#"{"fields": {"email": [1, 2]}}"#, &fields(), "1 2"),
            Err(ExtractionError::ParseFailure(_))
        ));
    }

    #[test]
    fn test_parse_pagination() {
        let candidates = vec![LinkCandidate {
            url: "https://a.test/p2".into(),
            text: "Next".into(),
        }];
        let ok = parse_pagination(r#"{"next_url": "https://a.test/p2", "confidence": 85}"#, &candidates)
            .unwrap();
        assert_eq!(ok.confidence, 85);
        assert!(parse_pagination(r#"{"next_url": "https://evil.test/", "confidence": 99}"#, &candidates)
            .is_err());
        let none = parse_pagination(r#"{"next_url": null, "confidence": 10}"#, &candidates).unwrap();
        assert_eq!(none.next_url, None);
    }

    #[test]
    fn test_prompts_mention_inputs() {
        let prompt = build_extraction_prompt(&fields(), "page body");
        assert!(prompt.contains("- email (email)"));
        assert!(prompt.contains("page body"));
        let prompt = build_pagination_prompt("https://a.test/", &[]);
        assert!(prompt.contains("https://a.test/"));
    }
}
