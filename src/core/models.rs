use std::{
    fmt,
    str::FromStr,
};

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use super::text::normalize_text;

/// Format version written into every checkpoint. Bumped on breaking layout
/// changes; unknown versions are refused on load instead of migrated.
pub const STATE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardFormat {
    Qa,
    Cloze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Concept,
    Fact,
    Process,
    Term,
    Relationship,
    Example,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Concept => "concept",
            CardType::Fact => "fact",
            CardType::Process => "process",
            CardType::Term => "term",
            CardType::Relationship => "relationship",
            CardType::Example => "example",
        }
    }
}

/// Which side of the threshold a card currently sits on. Cards are never
/// removed when the threshold moves, only flipped between these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Included,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Light,
    Medium,
    Thorough,
}

impl Default for Density {
    fn default() -> Self {
        Density::Medium
    }
}

impl Density {
    pub fn as_str(&self) -> &'static str {
        match self {
            Density::Light => "light",
            Density::Medium => "medium",
            Density::Thorough => "thorough",
        }
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Density {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Density::Light),
            "medium" => Ok(Density::Medium),
            "thorough" => Ok(Density::Thorough),
            other => Err(format!("unknown density: {other} (expected light, medium or thorough)")),
        }
    }
}

/// Per-chapter pipeline position. Ordered so barrier checks can compare
/// stages directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    Generated,
    Deduplicated,
    Ranked,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub fingerprint: String,                // Content-derived identity, see Card::compute_fingerprint
    pub format: CardFormat,
    pub card_type: CardType,
    pub question: Option<String>,           // QA format
    pub answer: Option<String>,             // QA format
    pub cloze_text: Option<String>,         // Cloze format, {{c1::...}} markup
    pub importance: u8,                     // 1-10
    pub difficulty: u8,                     // 1-10
    pub priority: f32,                      // (importance*2 + difficulty)/3, set by the ranker
    pub source_chapter: String,             // Chapter title
    pub source_chapter_index: usize,
    pub source_section: Option<String>,     // Section heading if the generator identified one
    pub source_quote: Option<String>,       // Text the card is based on
    pub status: CardStatus,
    pub tags: Vec<String>,
}

impl Card {
    /// Deterministic identity over the normalized card content. Two cards
    /// with the same normalized text get the same fingerprint regardless of
    /// chapter or scoring.
    pub fn compute_fingerprint(
        format: CardFormat,
        question: Option<&str>,
        answer: Option<&str>,
        cloze_text: Option<&str>,
    ) -> String {
        let text = match format {
            CardFormat::Qa => {
                format!("qa|{}|{}", question.unwrap_or_default(), answer.unwrap_or_default())
            }
            CardFormat::Cloze => format!("cloze|{}", cloze_text.unwrap_or_default()),
        };
        let hash = blake3::hash(normalize_text(&text).as_bytes());
        hash.to_hex()[..16].to_string()
    }

    /// Text used for similarity comparison. None when the required fields
    /// are absent, which the deduplicator treats as "unique" (fail-open).
    pub fn comparison_text(&self) -> Option<String> {
        match self.format {
            CardFormat::Qa => match (&self.question, &self.answer) {
                (None, None) => None,
                (q, a) => Some(format!(
                    "{} {}",
                    q.as_deref().unwrap_or_default(),
                    a.as_deref().unwrap_or_default()
                )),
            },
            CardFormat::Cloze => self.cloze_text.clone(),
        }
    }

    pub fn display_text(&self) -> String {
        match self.format {
            CardFormat::Qa => format!(
                "Q: {}\nA: {}",
                self.question.as_deref().unwrap_or_default(),
                self.answer.as_deref().unwrap_or_default()
            ),
            CardFormat::Cloze => {
                format!("Cloze: {}", self.cloze_text.as_deref().unwrap_or_default())
            }
        }
    }
}

/// A card dropped by deduplication. Kept for auditability: the card leaves
/// the active set but its content and the survivor's identity are retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub kept_fingerprint: String,
    pub dropped: Card,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterState {
    pub index: usize,
    pub title: String,
    pub stage: Stage,
    pub threshold: Option<f32>,             // None until first classification
    pub density: Density,                   // Density used for generation
    pub cards: Vec<Card>,                   // Active set; status partitions it
    pub duplicates: Vec<DuplicateRecord>,
}

impl ChapterState {
    pub fn new(index: usize, title: &str, density: Density) -> Self {
        Self {
            index,
            title: title.to_string(),
            stage: Stage::NotStarted,
            threshold: None,
            density,
            cards: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn included(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter().filter(|c| c.status == CardStatus::Included)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter().filter(|c| c.status == CardStatus::Excluded)
    }

    pub fn included_count(&self) -> usize {
        self.included().count()
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded().count()
    }

    /// Active cards plus dedup-dropped cards. Constant across threshold
    /// changes and dedup passes; shrinks only on an explicit regenerate.
    pub fn total_cards(&self) -> usize {
        self.cards.len() + self.duplicates.len()
    }

    pub fn has_progress(&self) -> bool {
        self.stage != Stage::NotStarted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookState {
    pub version: String,
    pub title: String,
    pub author: String,
    pub chapter_count: usize,
    pub default_density: Density,
    pub chapters: Vec<ChapterState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookState {
    pub fn new(book: &Book, default_density: Density) -> Self {
        let chapters = book
            .chapters
            .iter()
            .map(|ch| ChapterState::new(ch.index, &ch.title, default_density))
            .collect();

        Self {
            version: STATE_VERSION.to_string(),
            title: book.title.clone(),
            author: book.author.clone(),
            chapter_count: book.chapters.len(),
            default_density,
            chapters,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn chapter(&self, index: usize) -> Option<&ChapterState> {
        self.chapters.iter().find(|c| c.index == index)
    }

    pub fn chapter_mut(&mut self, index: usize) -> Option<&mut ChapterState> {
        self.chapters.iter_mut().find(|c| c.index == index)
    }

    pub fn has_progress(&self, index: usize) -> bool {
        self.chapter(index).map(|c| c.has_progress()).unwrap_or(false)
    }

    pub fn finalized_indices(&self) -> Vec<usize> {
        self.chapters.iter().filter(|c| c.stage == Stage::Finalized).map(|c| c.index).collect()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.chapters.iter().filter(|c| c.stage != Stage::Finalized).map(|c| c.index).collect()
    }

    /// All included cards across finalized chapters, in chapter order. This
    /// is the set the exporter consumes.
    pub fn included_cards(&self) -> Vec<&Card> {
        self.chapters
            .iter()
            .filter(|c| c.stage == Stage::Finalized)
            .flat_map(|c| c.included())
            .collect()
    }

    pub fn total_cards(&self) -> usize {
        self.chapters.iter().map(|c| c.total_cards()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub content: String,        // Plain text, HTML already stripped
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub language: Option<String>,
    pub identifier: Option<String>,     // ISBN or other identifier
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn total_words(&self) -> usize {
        self.chapters.iter().map(|ch| ch.word_count).sum()
    }
}
