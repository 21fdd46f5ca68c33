use std::{
    collections::HashMap,
    fs,
    path::Path,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::core::{
    models::{
        BookState,
        Card,
        CardFormat,
    },
    AnkimineError,
};

pub mod api;

use api::{
    CardTemplateSpec,
    CreateModelParams,
    NoteInput,
    NoteOptions,
};

const CARD_CSS: &str = r#"
.card {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
    font-size: 18px;
    text-align: left;
    color: #1a1a1a;
    background-color: #ffffff;
    padding: 20px;
    line-height: 1.5;
}

.question {
    font-size: 20px;
    margin-bottom: 20px;
}

.answer {
    border-top: 1px solid #e0e0e0;
    padding-top: 20px;
}

.cloze {
    font-weight: bold;
    color: #0066cc;
}

.metadata {
    font-size: 12px;
    color: #888;
    margin-top: 30px;
    padding-top: 15px;
    border-top: 1px solid #f0f0f0;
}

.source-chapter {
    font-style: italic;
}

.night_mode .card {
    background-color: #1e1e1e;
    color: #e0e0e0;
}

.night_mode .cloze {
    color: #66b3ff;
}

.night_mode .metadata {
    color: #666;
    border-top-color: #333;
}

.night_mode .answer {
    border-top-color: #333;
}
"#;

const QA_FRONT: &str = r#"<div class="question">{{Question}}</div>"#;

const QA_BACK: &str = r#"<div class="question">{{Question}}</div>
<hr id="answer">
<div class="answer">{{Answer}}</div>

<div class="metadata">
    <span class="source-chapter">{{SourceChapter}}</span>
    {{#SourceSection}} &middot; {{SourceSection}}{{/SourceSection}}
</div>"#;

const CLOZE_FRONT: &str = r#"<div class="cloze-text">{{cloze:Text}}</div>"#;

const CLOZE_BACK: &str = r#"<div class="cloze-text">{{cloze:Text}}</div>

<div class="metadata">
    <span class="source-chapter">{{SourceChapter}}</span>
    {{#SourceSection}} &middot; {{SourceSection}}{{/SourceSection}}
</div>"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckConfig {
    pub deck_name: Option<String>,   // Defaults to "<title> - <author>"
    pub parent_deck: Option<String>, // Nest under this deck
    pub create_subdecks: bool,       // One subdeck per chapter
}

impl DeckConfig {
    pub fn full_deck_name(&self, book_title: &str, book_author: &str) -> String {
        let base =
            self.deck_name.clone().unwrap_or_else(|| format!("{book_title} - {book_author}"));
        match &self.parent_deck {
            Some(parent) => format!("{parent}::{base}"),
            None => base,
        }
    }

    pub fn chapter_deck_name(
        &self,
        base_deck_name: &str,
        chapter_title: &str,
        chapter_index: usize,
    ) -> String {
        if !self.create_subdecks {
            return base_deck_name.to_string();
        }
        let safe_title: String = chapter_title
            .chars()
            .map(|c| if c.is_alphanumeric() || " -_".contains(c) { c } else { '_' })
            .collect();
        format!("{}::Ch{} - {}", base_deck_name, chapter_index + 1, safe_title)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub deck_name: String,
    pub notes_added: usize,
    pub notes_failed: usize,
}

fn qa_model_name(deck_name: &str) -> String {
    format!("{deck_name} - Q&A")
}

fn cloze_model_name(deck_name: &str) -> String {
    format!("{deck_name} - Cloze")
}

fn qa_model(deck_name: &str) -> CreateModelParams {
    CreateModelParams {
        model_name: qa_model_name(deck_name),
        in_order_fields: vec![
            "Question".to_string(),
            "Answer".to_string(),
            "SourceChapter".to_string(),
            "SourceSection".to_string(),
        ],
        css: CARD_CSS.to_string(),
        is_cloze: false,
        card_templates: vec![CardTemplateSpec {
            name: "Card 1".to_string(),
            front: QA_FRONT.to_string(),
            back: QA_BACK.to_string(),
        }],
    }
}

fn cloze_model(deck_name: &str) -> CreateModelParams {
    CreateModelParams {
        model_name: cloze_model_name(deck_name),
        in_order_fields: vec![
            "Text".to_string(),
            "SourceChapter".to_string(),
            "SourceSection".to_string(),
        ],
        css: CARD_CSS.to_string(),
        is_cloze: true,
        card_templates: vec![CardTemplateSpec {
            name: "Cloze 1".to_string(),
            front: CLOZE_FRONT.to_string(),
            back: CLOZE_BACK.to_string(),
        }],
    }
}

fn build_note(card: &Card, deck_name: &str, base_deck_name: &str) -> NoteInput {
    let mut fields = HashMap::new();
    let model_name = match card.format {
        CardFormat::Qa => {
            fields.insert(
                "Question".to_string(),
                card.question.clone().unwrap_or_default(),
            );
            fields.insert("Answer".to_string(), card.answer.clone().unwrap_or_default());
            qa_model_name(base_deck_name)
        }
        CardFormat::Cloze => {
            fields.insert("Text".to_string(), card.cloze_text.clone().unwrap_or_default());
            cloze_model_name(base_deck_name)
        }
    };
    fields.insert("SourceChapter".to_string(), card.source_chapter.clone());
    fields.insert(
        "SourceSection".to_string(),
        card.source_section.clone().unwrap_or_default(),
    );

    NoteInput {
        deck_name: deck_name.to_string(),
        model_name,
        fields,
        tags: card.tags.clone(),
        options: NoteOptions { allow_duplicate: false },
    }
}

/// Pushes the included cards of every finalized chapter into Anki through
/// AnkiConnect. The deck artifact itself is Anki's concern; nothing here
/// inspects it.
pub struct AnkiExporter {
    config: DeckConfig,
}

impl AnkiExporter {
    pub fn new(config: DeckConfig) -> Self {
        Self { config }
    }

    pub async fn export(&self, state: &BookState) -> Result<ExportSummary, AnkimineError> {
        let cards = state.included_cards();
        if cards.is_empty() {
            return Err(AnkimineError::Custom(
                "no included cards in any finalized chapter; nothing to export".to_string(),
            ));
        }

        let base_deck_name = self.config.full_deck_name(&state.title, &state.author);

        let existing = api::model_names().await?;
        if !existing.contains(&qa_model_name(&base_deck_name)) {
            api::create_model(&qa_model(&base_deck_name)).await?;
        }
        if !existing.contains(&cloze_model_name(&base_deck_name)) {
            api::create_model(&cloze_model(&base_deck_name)).await?;
        }

        api::create_deck(&base_deck_name).await?;

        let mut notes = Vec::with_capacity(cards.len());
        let mut subdecks: Vec<String> = Vec::new();
        for card in &cards {
            let deck_name = self.config.chapter_deck_name(
                &base_deck_name,
                &card.source_chapter,
                card.source_chapter_index,
            );
            if deck_name != base_deck_name && !subdecks.contains(&deck_name) {
                subdecks.push(deck_name.clone());
            }
            notes.push(build_note(card, &deck_name, &base_deck_name));
        }

        for result in
            futures::future::join_all(subdecks.iter().map(|name| api::create_deck(name))).await
        {
            result?;
        }

        let results = api::add_notes(&notes).await?;
        let notes_added = results.iter().filter(|r| r.is_some()).count();
        let notes_failed = notes.len() - notes_added;
        log::info!("exported {notes_added} notes to deck {base_deck_name} ({notes_failed} rejected)");

        Ok(ExportSummary { deck_name: base_deck_name, notes_added, notes_failed })
    }
}

/// Sidecar export of the reviewable card set, included and excluded alike,
/// for tooling outside Anki.
pub fn export_cards_to_json(state: &BookState, path: &Path) -> Result<(), AnkimineError> {
    let chapters: Vec<serde_json::Value> = state
        .chapters
        .iter()
        .map(|chapter| {
            serde_json::json!({
                "index": chapter.index,
                "title": chapter.title,
                "stage": chapter.stage,
                "threshold": chapter.threshold,
                "included": chapter.included().collect::<Vec<_>>(),
                "excluded": chapter.excluded().collect::<Vec<_>>(),
                "duplicates": chapter.duplicates,
            })
        })
        .collect();

    let doc = serde_json::json!({
        "title": state.title,
        "author": state.author,
        "chapters": chapters,
    });

    fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}
