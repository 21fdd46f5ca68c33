use crate::core::models::{
    Book,
    Chapter,
    Density,
};

// Claude Sonnet pricing, USD per million tokens.
pub const INPUT_PRICE_PER_1M: f64 = 3.00;
pub const OUTPUT_PRICE_PER_1M: f64 = 15.00;

const CHARS_PER_TOKEN: usize = 4; // Rough estimate for English text
const SYSTEM_PROMPT_TOKENS: usize = 1500;
const PROMPT_TEMPLATE_TOKENS: usize = 500;
const TOKENS_PER_CARD: usize = 150; // Average card JSON size

fn cards_per_1000_words(density: Density) -> usize {
    match density {
        Density::Light => 2,    // ~1 card per 500 words
        Density::Medium => 4,   // ~1 card per 250 words
        Density::Thorough => 8, // ~1 card per 125 words
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterEstimate {
    pub chapter_index: usize,
    pub chapter_title: String,
    pub word_count: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub estimated_cards: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub estimated_cost_usd: f64,
    pub chapters_count: usize,
    pub total_words: usize,
    pub density: Density,
    pub chapter_estimates: Vec<ChapterEstimate>,
}

/// Pre-generation cost projection so the user can pick a density before
/// spending anything.
pub struct CostEstimator {
    input_price: f64,
    output_price: f64,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self { input_price: INPUT_PRICE_PER_1M, output_price: OUTPUT_PRICE_PER_1M }
    }
}

impl CostEstimator {
    pub fn new(input_price: f64, output_price: f64) -> Self {
        Self { input_price, output_price }
    }

    pub fn estimate_chapter(&self, chapter: &Chapter, density: Density) -> ChapterEstimate {
        let content_tokens = chapter.content.len() / CHARS_PER_TOKEN;
        let input_tokens = content_tokens + SYSTEM_PROMPT_TOKENS + PROMPT_TEMPLATE_TOKENS;

        let estimated_cards =
            ((chapter.word_count * cards_per_1000_words(density)) / 1000).max(1);
        let output_tokens = estimated_cards * TOKENS_PER_CARD;

        ChapterEstimate {
            chapter_index: chapter.index,
            chapter_title: chapter.title.clone(),
            word_count: chapter.word_count,
            input_tokens,
            output_tokens,
            estimated_cards,
        }
    }

    pub fn estimate_book(
        &self,
        book: &Book,
        density: Density,
        chapter_indices: Option<&[usize]>,
    ) -> CostEstimate {
        let chapters: Vec<&Chapter> = book
            .chapters
            .iter()
            .filter(|ch| chapter_indices.map(|sel| sel.contains(&ch.index)).unwrap_or(true))
            .collect();

        let chapter_estimates: Vec<ChapterEstimate> =
            chapters.iter().map(|ch| self.estimate_chapter(ch, density)).collect();

        let total_input: usize = chapter_estimates.iter().map(|e| e.input_tokens).sum();
        let total_output: usize = chapter_estimates.iter().map(|e| e.output_tokens).sum();
        let total_words: usize = chapters.iter().map(|ch| ch.word_count).sum();

        let input_cost = (total_input as f64 / 1_000_000.0) * self.input_price;
        let output_cost = (total_output as f64 / 1_000_000.0) * self.output_price;

        CostEstimate {
            total_input_tokens: total_input,
            total_output_tokens: total_output,
            estimated_cost_usd: ((input_cost + output_cost) * 10_000.0).round() / 10_000.0,
            chapters_count: chapters.len(),
            total_words,
            density,
            chapter_estimates,
        }
    }

    /// Cost of what is left, for resumed runs.
    pub fn estimate_remaining(
        &self,
        book: &Book,
        density: Density,
        processed_indices: &[usize],
    ) -> CostEstimate {
        let remaining: Vec<usize> = book
            .chapters
            .iter()
            .map(|ch| ch.index)
            .filter(|i| !processed_indices.contains(i))
            .collect();
        self.estimate_book(book, density, Some(&remaining))
    }
}

pub fn format_estimate(estimate: &CostEstimate, verbose: bool) -> String {
    let mut lines = vec![
        format!("Cost Estimate ({} density)", estimate.density),
        "-".repeat(40),
        format!("Chapters to process: {}", estimate.chapters_count),
        format!("Total words: {}", estimate.total_words),
        String::new(),
        "Token estimates:".to_string(),
        format!("  Input:  ~{} tokens", estimate.total_input_tokens),
        format!("  Output: ~{} tokens", estimate.total_output_tokens),
        String::new(),
        format!("Estimated cost: ${:.4} USD", estimate.estimated_cost_usd),
    ];

    if verbose && !estimate.chapter_estimates.is_empty() {
        lines.push(String::new());
        lines.push("Per-chapter breakdown:".to_string());
        for ch in &estimate.chapter_estimates {
            lines.push(format!(
                "  Ch {}: {} (~{} cards)",
                ch.chapter_index + 1,
                ch.chapter_title,
                ch.estimated_cards
            ));
        }
    }

    lines.join("\n")
}
