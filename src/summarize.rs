//! Optional AI summaries attached to new listings.
use crate::model::ListingRecord;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Annotation used whenever a summary could not be produced.
pub const SUMMARY_PLACEHOLDER: &str = "(summary unavailable)";

const INSTRUCTIONS: &str = "You summarize job, internship and event listings for a chat \
notification. Reply with at most two short sentences covering who it is for, what it \
offers and any deadline. Reply in the language of the listing. No preamble.";

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String>;
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn summary_input(record: &ListingRecord) -> String {
    match record.detail_text.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(detail) => format!("{}\n\n{}", record.title, detail),
        None => match record.deadline() {
            Some(d) => format!("{}\n{}", record.title, d),
            None => record.title.clone(),
        },
    }
}

/// Produce an annotation for `record`. Never fails: any summarizer error or
/// empty reply becomes [`SUMMARY_PLACEHOLDER`].
#[instrument(skip_all, fields(source = %record.source, title = %record.title))]
pub async fn enrich(summarizer: &dyn Summarizer, record: &ListingRecord, max_chars: usize) -> String {
    let input = summary_input(record);
    let input = truncate_chars(&input, max_chars);
    match summarizer.summarize(input, max_chars).await {
        Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
        Ok(_) => {
            warn!("summarizer returned empty text");
            SUMMARY_PLACEHOLDER.to_string()
        }
        Err(err) => {
            warn!(?err, "summarizer failed; using placeholder");
            SUMMARY_PLACEHOLDER.to_string()
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiSummarizer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSummarizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiSummarizer {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("listing-watchbot/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build summarizer HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn build_request(&self, text: &str) -> Result<reqwest::Request> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: INSTRUCTIONS,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.2,
        };
        self.http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .build()
            .context("failed to build summarizer request")
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String> {
        let request = self.build_request(truncate_chars(text, max_chars))?;
        debug!(model = %self.model, chars = text.chars().count(), "summarizer request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach summarizer")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("summarizer error {}: {}", status, body));
        }
        let payload: ChatResponse = res.json().await.context("invalid summarizer response")?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("summarizer returned no choices"))
    }
}
