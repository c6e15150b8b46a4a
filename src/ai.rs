//! Document categorization against an OpenAI-compatible chat-completions
//! endpoint.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AiConfig;

const MAX_TEXT_CHARS: usize = 20_000;
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const MAX_CATEGORIES: usize = 5;

const SYSTEM_PROMPT: &str = "You categorize organizational documents. \
Reply with a JSON object only: {\"categories\": [string], \"recipients\": [string]}. \
Give at most five short category labels. For recipients, pick ids from the \
supplied roster of people who would need this document; use an empty list when unsure.";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier response was not understood: {0}")]
    InvalidResponse(String),
}

/// What the classifier gets to see of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text { name: String, text: String },
    Image { name: String, mime_type: String, base64: String },
    Opaque { name: String, mime_type: String },
}

impl DocumentContent {
    pub fn from_bytes(name: &str, mime_type: &str, bytes: &[u8]) -> Self {
        let mime = mime_type.to_ascii_lowercase();

        if is_textual(&mime) {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return DocumentContent::Text {
                    name: name.to_string(),
                    text: text.chars().take(MAX_TEXT_CHARS).collect(),
                };
            }
        }

        if mime.starts_with("image/") && bytes.len() <= MAX_IMAGE_BYTES {
            return DocumentContent::Image {
                name: name.to_string(),
                mime_type: mime,
                base64: BASE64.encode(bytes),
            };
        }

        DocumentContent::Opaque {
            name: name.to_string(),
            mime_type: mime,
        }
    }

    fn user_content(&self, roster: &str) -> Value {
        match self {
            DocumentContent::Text { name, text } => Value::String(format!(
                "Roster:\n{roster}\n\nDocument \"{name}\":\n{text}"
            )),
            DocumentContent::Image {
                name,
                mime_type,
                base64,
            } => json!([
                { "type": "text", "text": format!("Roster:\n{roster}\n\nDocument \"{name}\" is the attached image.") },
                { "type": "image_url", "image_url": { "url": format!("data:{mime_type};base64,{base64}") } },
            ]),
            DocumentContent::Opaque { name, mime_type } => Value::String(format!(
                "Roster:\n{roster}\n\nOnly the name and type of this document are known: \"{name}\" ({mime_type})."
            )),
        }
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/csv" | "application/markdown"
        )
}

/// A person the classifier may suggest as a recipient.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub categories: Vec<String>,
    pub suggested_recipients: Vec<Uuid>,
}

#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    async fn classify(
        &self,
        content: &DocumentContent,
        roster: &[RosterEntry],
    ) -> Result<Classification, ClassifierError>;
}

/// Used when no endpoint is configured: every document completes with no
/// categories or suggestions.
pub struct DisabledClassifier;

#[async_trait]
impl DocumentClassifier for DisabledClassifier {
    async fn classify(
        &self,
        _content: &DocumentContent,
        _roster: &[RosterEntry],
    ) -> Result<Classification, ClassifierError> {
        Ok(Classification::default())
    }
}

pub struct ChatCompletionsClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsClassifier {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: completions_url(&endpoint),
            api_key,
            model,
        })
    }
}

fn completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl DocumentClassifier for ChatCompletionsClassifier {
    async fn classify(
        &self,
        content: &DocumentContent,
        roster: &[RosterEntry],
    ) -> Result<Classification, ClassifierError> {
        let roster_text = roster
            .iter()
            .map(|entry| match &entry.department {
                Some(department) => format!("{} | {} | {}", entry.id, entry.name, department),
                None => format!("{} | {}", entry.id, entry.name),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Value::String(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: content.user_content(&roster_text),
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body: ChatResponse = response.json().await?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::InvalidResponse("empty completion".into()))?;

        let known: HashSet<Uuid> = roster.iter().map(|entry| entry.id).collect();
        parse_classification(&reply, &known)
    }
}

/// Builds the classifier described by `config`.
pub fn classifier_from_config(config: &AiConfig) -> anyhow::Result<Box<dyn DocumentClassifier>> {
    match &config.api_url {
        Some(url) if config.enabled() => Ok(Box::new(ChatCompletionsClassifier::new(
            url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?)),
        _ => {
            tracing::warn!("AI_API_URL not set; documents will complete without categorization");
            Ok(Box::new(DisabledClassifier))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    recipients: Vec<String>,
}

/// Parses the model's reply. Code fences are tolerated; recipients outside
/// the roster are dropped.
pub fn parse_classification(
    reply: &str,
    roster: &HashSet<Uuid>,
) -> Result<Classification, ClassifierError> {
    let trimmed = strip_code_fence(reply);
    let raw: RawClassification = serde_json::from_str(trimmed)
        .map_err(|err| ClassifierError::InvalidResponse(err.to_string()))?;

    let mut seen = HashSet::new();
    let categories = raw
        .categories
        .into_iter()
        .map(|category| category.trim().to_string())
        .filter(|category| !category.is_empty())
        .filter(|category| seen.insert(category.to_lowercase()))
        .take(MAX_CATEGORIES)
        .collect();

    let mut picked = HashSet::new();
    let suggested_recipients = raw
        .recipients
        .iter()
        .filter_map(|value| Uuid::parse_str(value.trim()).ok())
        .filter(|id| roster.contains(id))
        .filter(|id| picked.insert(*id))
        .collect();

    Ok(Classification {
        categories,
        suggested_recipients,
    })
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_replies() {
        let bob = Uuid::new_v4();
        let roster = HashSet::from([bob]);

        let plain = format!(r#"{{"categories": ["Finance", "Q3"], "recipients": ["{bob}"]}}"#);
        let parsed = parse_classification(&plain, &roster).unwrap();
        assert_eq!(parsed.categories, vec!["Finance", "Q3"]);
        assert_eq!(parsed.suggested_recipients, vec![bob]);

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(parse_classification(&fenced, &roster).unwrap(), parsed);
    }

    #[test]
    fn drops_unknown_recipients_and_duplicate_categories() {
        let bob = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let reply = format!(
            r#"{{"categories": ["HR", "hr", " ", "Policy"], "recipients": ["{stranger}", "not-a-uuid", "{bob}", "{bob}"]}}"#
        );
        let parsed = parse_classification(&reply, &HashSet::from([bob])).unwrap();
        assert_eq!(parsed.categories, vec!["HR", "Policy"]);
        assert_eq!(parsed.suggested_recipients, vec![bob]);
    }

    #[test]
    fn rejects_non_json_reply() {
        let err = parse_classification("I think this is a contract.", &HashSet::new()).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn content_kind_follows_mime_type() {
        let text = DocumentContent::from_bytes("notes.txt", "text/plain", b"hello");
        assert!(matches!(text, DocumentContent::Text { ref text, .. } if text == "hello"));

        let image = DocumentContent::from_bytes("scan.png", "image/png", &[0x89, 0x50]);
        assert!(matches!(image, DocumentContent::Image { ref base64, .. } if base64 == "iVA="));

        let pdf = DocumentContent::from_bytes("report.pdf", "application/pdf", b"%PDF");
        assert!(matches!(pdf, DocumentContent::Opaque { .. }));

        let binary_text = DocumentContent::from_bytes("bad.txt", "text/plain", &[0xff, 0xfe]);
        assert!(matches!(binary_text, DocumentContent::Opaque { .. }));
    }

    #[test]
    fn completions_url_is_normalized() {
        assert_eq!(
            completions_url("https://llm.internal/v1/"),
            "https://llm.internal/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://llm.internal/v1/chat/completions"),
            "https://llm.internal/v1/chat/completions"
        );
    }
}
