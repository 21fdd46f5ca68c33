use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
};

use super::{
    chunk_content,
    parse_cards_from_response,
    prompts,
    CardSource,
};
use crate::core::{
    models::{
        Card,
        Chapter,
        Density,
    },
    AnkimineError,
};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Card generation backed by the Claude messages API. A timeout and an API
/// error are reported identically: the chapter is left untouched and the
/// caller retries.
pub struct ClaudeSource {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeSource {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self, AnkimineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, api_key, model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()) })
    }

    async fn complete(&self, system: &str, prompt: String) -> Result<String, AnkimineError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![Message { role: "user", content: prompt }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AnkimineError::Custom(format!("messages API returned {status}: {detail}")));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.clone())
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl CardSource for ClaudeSource {
    async fn generate(
        &self,
        book_title: &str,
        book_author: &str,
        chapter: &Chapter,
        density: Density,
    ) -> Result<Vec<Card>, AnkimineError> {
        let chunks = chunk_content(&chapter.content);
        let total = chunks.len();
        let mut cards = Vec::new();

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let prompt = prompts::generation_prompt(
                book_title,
                book_author,
                chapter,
                density,
                &chunk,
                Some((idx, total)),
            );

            let response =
                self.complete(prompts::SYSTEM_PROMPT, prompt).await.map_err(|e| {
                    AnkimineError::Generation { chapter: chapter.index, reason: e.to_string() }
                })?;

            let parsed = parse_cards_from_response(&response, chapter);
            log::debug!(
                "chapter {} chunk {}/{}: {} cards parsed",
                chapter.index,
                idx + 1,
                total,
                parsed.len()
            );
            cards.extend(parsed);
        }

        Ok(cards)
    }
}
