use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::core::{
    models::{
        Card,
        CardFormat,
        CardStatus,
        CardType,
        Chapter,
        Density,
    },
    text::slugify,
    AnkimineError,
};

pub mod api;
pub mod prompts;

pub use api::ClaudeSource;

/// The external capability that proposes raw candidate cards for a chapter.
/// The pipeline only cares about the contract: chapter text + density in,
/// Card-shaped candidates out. Scores may be pre-populated or left for the
/// ranker; content is validated at this boundary.
#[async_trait]
pub trait CardSource: Send + Sync {
    async fn generate(
        &self,
        book_title: &str,
        book_author: &str,
        chapter: &Chapter,
        density: Density,
    ) -> Result<Vec<Card>, AnkimineError>;
}

/// Rough ~4 chars per token; chunks are split on paragraph boundaries.
const MAX_CHUNK_TOKENS: usize = 12_000;

pub fn chunk_content(content: &str) -> Vec<String> {
    let max_chars = MAX_CHUNK_TOKENS * 4;
    if content.len() <= max_chars {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for para in content.split("\n\n") {
        let para_len = para.len() + 2;
        if current_len + para_len > max_chars && !current.is_empty() {
            chunks.push(current.join("\n\n"));
            current = vec![para];
            current_len = para_len;
        } else {
            current.push(para);
            current_len += para_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }

    chunks
}

#[derive(Debug, Deserialize)]
struct RawCard {
    format: Option<String>,
    card_type: Option<String>,
    question: Option<String>,
    answer: Option<String>,
    cloze_text: Option<String>,
    importance: Option<i64>,
    difficulty: Option<i64>,
    source_section: Option<String>,
    source_quote: Option<String>,
}

fn parse_format(raw: Option<&str>) -> Option<CardFormat> {
    match raw.unwrap_or("qa") {
        "qa" => Some(CardFormat::Qa),
        "cloze" => Some(CardFormat::Cloze),
        _ => None,
    }
}

fn parse_card_type(raw: Option<&str>) -> Option<CardType> {
    match raw.unwrap_or("concept") {
        "concept" => Some(CardType::Concept),
        "fact" => Some(CardType::Fact),
        "process" => Some(CardType::Process),
        "term" => Some(CardType::Term),
        "relationship" => Some(CardType::Relationship),
        "example" => Some(CardType::Example),
        _ => None,
    }
}

fn clamp_score(raw: Option<i64>) -> u8 {
    raw.unwrap_or(5).clamp(1, 10) as u8
}

/// Turn one raw candidate into a Card, or drop it when malformed. A QA card
/// needs both question and answer; a cloze card needs cloze text.
fn validate_raw(raw: RawCard, chapter: &Chapter) -> Option<Card> {
    let format = parse_format(raw.format.as_deref())?;
    let card_type = parse_card_type(raw.card_type.as_deref())?;

    match format {
        CardFormat::Qa => {
            if raw.question.as_deref().unwrap_or("").is_empty()
                || raw.answer.as_deref().unwrap_or("").is_empty()
            {
                return None;
            }
        }
        CardFormat::Cloze => {
            if raw.cloze_text.as_deref().unwrap_or("").is_empty() {
                return None;
            }
        }
    }

    let fingerprint = Card::compute_fingerprint(
        format,
        raw.question.as_deref(),
        raw.answer.as_deref(),
        raw.cloze_text.as_deref(),
    );

    Some(Card {
        fingerprint,
        format,
        card_type,
        question: raw.question,
        answer: raw.answer,
        cloze_text: raw.cloze_text,
        importance: clamp_score(raw.importance),
        difficulty: clamp_score(raw.difficulty),
        priority: 0.0,
        source_chapter: chapter.title.clone(),
        source_chapter_index: chapter.index,
        source_section: raw.source_section,
        source_quote: raw.source_quote,
        status: CardStatus::Included,
        tags: vec![
            format!("chapter::{:02}_{}", chapter.index + 1, slugify(&chapter.title)),
            format!("type::{}", card_type.as_str()),
            format!(
                "format::{}",
                match format {
                    CardFormat::Qa => "qa",
                    CardFormat::Cloze => "cloze",
                }
            ),
        ],
    })
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*(\[[\s\S]*?\])\s*```").unwrap())
}

fn bare_array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[\s\S]*\]").unwrap())
}

/// Extract the JSON card array out of a model response (fenced block or
/// bare array) and validate each entry. Malformed entries are skipped, not
/// fatal.
pub fn parse_cards_from_response(response: &str, chapter: &Chapter) -> Vec<Card> {
    let json_str = if let Some(captures) = fenced_json_re().captures(response) {
        captures.get(1).map(|m| m.as_str().to_string())
    } else {
        bare_array_re().find(response).map(|m| m.as_str().to_string())
    };

    let Some(json_str) = json_str else {
        return Vec::new();
    };

    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&json_str) else {
        return Vec::new();
    };

    values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<RawCard>(value).ok())
        .filter_map(|raw| validate_raw(raw, chapter))
        .collect()
}

/// Deterministic offline source for --dry-run and tests. Produces a small
/// fixed spread of scores per chapter so threshold behavior is visible
/// without any API traffic.
pub struct MockSource;

#[async_trait]
impl CardSource for MockSource {
    async fn generate(
        &self,
        _book_title: &str,
        _book_author: &str,
        chapter: &Chapter,
        _density: Density,
    ) -> Result<Vec<Card>, AnkimineError> {
        if chapter.content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let samples: [(&str, u8, u8); 3] = [
            ("What is the central idea of", 9, 6),
            ("What supporting fact appears in", 6, 5),
            ("What minor detail is mentioned in", 3, 4),
        ];

        let cards = samples
            .iter()
            .filter_map(|(stem, importance, difficulty)| {
                let question = format!("{} \"{}\"?", stem, chapter.title);
                let answer = format!("A placeholder answer for {}", chapter.title);
                let raw = RawCard {
                    format: Some("qa".to_string()),
                    card_type: Some("concept".to_string()),
                    question: Some(question),
                    answer: Some(answer),
                    cloze_text: None,
                    importance: Some(*importance as i64),
                    difficulty: Some(*difficulty as i64),
                    source_section: None,
                    source_quote: None,
                };
                validate_raw(raw, chapter)
            })
            .collect();

        Ok(cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chapter() -> Chapter {
        Chapter {
            index: 2,
            title: "The Water Cycle".to_string(),
            content: "Evaporation, condensation, precipitation.".to_string(),
            word_count: 4,
        }
    }

    #[test]
    fn parses_fenced_json_response() {
        let response = r#"Here are the cards:
```json
[
  {"format": "qa", "card_type": "concept", "question": "What drives evaporation?",
   "answer": "Solar energy", "importance": 8, "difficulty": 4}
]
```"#;
        let cards = parse_cards_from_response(response, &test_chapter());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].question.as_deref(), Some("What drives evaporation?"));
        assert_eq!(cards[0].importance, 8);
        assert_eq!(cards[0].source_chapter_index, 2);
    }

    #[test]
    fn parses_bare_array() {
        let response = r#"[{"format": "cloze", "card_type": "term",
            "cloze_text": "Water vapor condenses into {{c1::clouds}}",
            "importance": 6, "difficulty": 5}]"#;
        let cards = parse_cards_from_response(response, &test_chapter());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].format, CardFormat::Cloze);
    }

    #[test]
    fn clamps_scores_and_defaults_missing_ones() {
        let response = r#"[
            {"format": "qa", "question": "Q1", "answer": "A1", "importance": 99, "difficulty": -3},
            {"format": "qa", "question": "Q2", "answer": "A2"}
        ]"#;
        let cards = parse_cards_from_response(response, &test_chapter());
        assert_eq!(cards.len(), 2);
        assert_eq!((cards[0].importance, cards[0].difficulty), (10, 1));
        assert_eq!((cards[1].importance, cards[1].difficulty), (5, 5));
    }

    #[test]
    fn skips_malformed_cards() {
        let response = r#"[
            {"format": "qa", "question": "No answer here"},
            {"format": "cloze"},
            {"format": "riddle", "question": "Q", "answer": "A"},
            {"format": "qa", "card_type": "haiku", "question": "Q", "answer": "A"},
            {"format": "qa", "question": "Valid", "answer": "Card"}
        ]"#;
        let cards = parse_cards_from_response(response, &test_chapter());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].question.as_deref(), Some("Valid"));
    }

    #[test]
    fn no_json_means_no_cards() {
        assert!(parse_cards_from_response("I could not find anything.", &test_chapter()).is_empty());
    }

    #[test]
    fn tags_carry_chapter_and_type() {
        let response =
            r#"[{"format": "qa", "card_type": "fact", "question": "Q", "answer": "A"}]"#;
        let cards = parse_cards_from_response(response, &test_chapter());
        assert_eq!(
            cards[0].tags,
            vec![
                "chapter::03_the_water_cycle".to_string(),
                "type::fact".to_string(),
                "format::qa".to_string()
            ]
        );
    }

    #[test]
    fn chunking_respects_paragraphs() {
        let para = "word ".repeat(2000);
        let content = vec![para.as_str(); 8].join("\n\n");
        let chunks = chunk_content(&content);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_CHUNK_TOKENS * 4 + 2);
        }

        let short = "just one paragraph";
        assert_eq!(chunk_content(short), vec![short.to_string()]);
    }

    #[tokio::test]
    async fn mock_source_is_deterministic() {
        let chapter = test_chapter();
        let first = MockSource.generate("T", "A", &chapter, Density::Medium).await.unwrap();
        let second = MockSource.generate("T", "A", &chapter, Density::Medium).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn mock_source_empty_chapter_yields_nothing() {
        let mut chapter = test_chapter();
        chapter.content = "   ".to_string();
        let cards = MockSource.generate("T", "A", &chapter, Density::Medium).await.unwrap();
        assert!(cards.is_empty());
    }
}
