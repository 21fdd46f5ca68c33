use crate::core::{
    models::{
        Card,
        CardStatus,
        ChapterState,
        Density,
    },
    AnkimineError,
};

pub const LIGHT_THRESHOLD: f32 = 7.0; // Only high-importance cards
pub const MEDIUM_THRESHOLD: f32 = 5.0;
pub const THOROUGH_THRESHOLD: f32 = 3.0; // Include most cards

pub fn default_threshold(density: Density) -> f32 {
    match density {
        Density::Light => LIGHT_THRESHOLD,
        Density::Medium => MEDIUM_THRESHOLD,
        Density::Thorough => THOROUGH_THRESHOLD,
    }
}

/// Priority is a pure function of (importance, difficulty), weighting
/// importance twice as heavily. Always in [1, 10] for valid inputs.
pub fn score(card: &Card) -> Result<f32, AnkimineError> {
    if !(1..=10).contains(&card.importance) || !(1..=10).contains(&card.difficulty) {
        return Err(AnkimineError::InvalidScore {
            fingerprint: card.fingerprint.clone(),
            importance: card.importance as i64,
            difficulty: card.difficulty as i64,
        });
    }
    Ok((card.importance as f32 * 2.0 + card.difficulty as f32) / 3.0)
}

/// Score every card in place and sort by priority descending. The sort is
/// stable, so equal-priority cards keep their generation order.
///
/// A card with out-of-range scores is reported and left at priority 0.0 /
/// excluded; the rest of the chapter is unaffected.
pub fn rank_cards(cards: &mut Vec<Card>) -> Vec<AnkimineError> {
    let mut failures = Vec::new();

    for card in cards.iter_mut() {
        match score(card) {
            Ok(priority) => card.priority = priority,
            Err(e) => {
                card.priority = 0.0;
                card.status = CardStatus::Excluded;
                failures.push(e);
            }
        }
    }

    cards.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
    failures
}

/// Partition cards by threshold. Inclusive: a card at exactly the threshold
/// is included. Pure reclassification, no rescoring.
pub fn classify(cards: &mut [Card], threshold: f32) {
    for card in cards.iter_mut() {
        card.status = if card.priority >= threshold {
            CardStatus::Included
        } else {
            CardStatus::Excluded
        };
    }
}

/// Re-partition a chapter's full card set under a new threshold. Idempotent
/// and safe to call any number of times; never regenerates or rescores.
pub fn reclassify(chapter: &mut ChapterState, threshold: f32) -> Result<(), AnkimineError> {
    if chapter.cards.is_empty() {
        chapter.threshold = Some(threshold);
        return Err(AnkimineError::EmptyChapter(chapter.index));
    }
    chapter.threshold = Some(threshold);
    classify(&mut chapter.cards, threshold);
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDistribution {
    pub total: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
    pub low: usize,      // priority < 4
    pub medium: usize,   // 4 <= priority < 6
    pub high: usize,     // 6 <= priority < 8
    pub critical: usize, // priority >= 8
}

pub fn score_distribution(chapter: &ChapterState) -> ScoreDistribution {
    if chapter.cards.is_empty() {
        return ScoreDistribution {
            total: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
            low: 0,
            medium: 0,
            high: 0,
            critical: 0,
        };
    }

    let mut scores: Vec<f32> = chapter.cards.iter().map(|c| c.priority).collect();
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = scores.len();
    let median = if n % 2 == 1 { scores[n / 2] } else { (scores[n / 2 - 1] + scores[n / 2]) / 2.0 };

    ScoreDistribution {
        total: n,
        min: scores[0],
        max: scores[n - 1],
        mean: scores.iter().sum::<f32>() / n as f32,
        median,
        low: scores.iter().filter(|s| **s < 4.0).count(),
        medium: scores.iter().filter(|s| (4.0..6.0).contains(*s)).count(),
        high: scores.iter().filter(|s| (6.0..8.0).contains(*s)).count(),
        critical: scores.iter().filter(|s| **s >= 8.0).count(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdPreview {
    pub threshold: f32,
    pub would_include: usize,
    pub would_exclude: usize,
    pub total: usize,
}

/// What a threshold would do, without applying it.
pub fn preview_threshold(chapter: &ChapterState, threshold: f32) -> ThresholdPreview {
    let would_include = chapter.cards.iter().filter(|c| c.priority >= threshold).count();
    ThresholdPreview {
        threshold,
        would_include,
        would_exclude: chapter.cards.len() - would_include,
        total: chapter.cards.len(),
    }
}
