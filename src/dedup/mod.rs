use rayon::iter::{
    IntoParallelRefIterator,
    ParallelIterator,
};

use crate::{
    core::{
        models::{
            BookState,
            Card,
            CardStatus,
            ChapterState,
            DuplicateRecord,
            Stage,
        },
        text::{
            normalize_text,
            similarity_ratio,
        },
        AnkimineError,
    },
    ranker,
};

/// Normalized-text similarity at or above this collapses two cards into one.
pub const SIMILARITY_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DedupSummary {
    pub total: usize,
    pub survivors: usize,
    pub dropped: usize,
    pub exact: usize,
    pub similar: usize,
}

pub struct Deduplicator {
    similarity_threshold: f32,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self { similarity_threshold: SIMILARITY_THRESHOLD }
    }
}

/// One similarity group over card positions. `members[0]` is the seed; each
/// member carries its similarity to the seed.
struct Group {
    members: Vec<(usize, f32)>,
}

impl Deduplicator {
    pub fn new(similarity_threshold: f32) -> Self {
        Self { similarity_threshold }
    }

    /// Collapse near-duplicates within a single chapter's candidate set.
    /// Dropped cards move to the chapter's duplicate records; survivors keep
    /// their generation order.
    pub fn dedupe_chapter(&self, chapter: &mut ChapterState) -> DedupSummary {
        let (drops, summary) = self.plan_drops(&chapter.cards);
        apply_drops(chapter, drops);
        summary
    }

    /// Explicit cross-chapter pass over the accumulated included sets. Every
    /// chapter that has begun processing must have reached at least the
    /// ranked stage, because the pass needs final per-card priorities.
    pub fn dedupe_book(&self, book: &mut BookState) -> Result<DedupSummary, AnkimineError> {
        for chapter in &book.chapters {
            if matches!(chapter.stage, Stage::Generated | Stage::Deduplicated) {
                return Err(AnkimineError::StageViolation {
                    chapter: chapter.index,
                    stage: chapter.stage,
                    operation: "cross-chapter dedup",
                });
            }
        }

        // Flatten included cards across chapters, in chapter order, keeping
        // (chapter position, card position) so drops land on their owners.
        let mut origins: Vec<(usize, usize)> = Vec::new();
        let mut pool: Vec<Card> = Vec::new();
        for (chapter_pos, chapter) in book.chapters.iter().enumerate() {
            for (card_pos, card) in chapter.cards.iter().enumerate() {
                if card.status == CardStatus::Included {
                    origins.push((chapter_pos, card_pos));
                    pool.push(card.clone());
                }
            }
        }

        let (drops, summary) = self.plan_drops(&pool);

        // Regroup planned drops per owning chapter before applying.
        let mut per_chapter: Vec<Vec<(usize, String, f32)>> =
            vec![Vec::new(); book.chapters.len()];
        for (pool_pos, kept_fingerprint, similarity) in drops {
            let (chapter_pos, card_pos) = origins[pool_pos];
            per_chapter[chapter_pos].push((card_pos, kept_fingerprint, similarity));
        }
        for (chapter_pos, drops) in per_chapter.into_iter().enumerate() {
            apply_drops(&mut book.chapters[chapter_pos], drops);
        }

        Ok(summary)
    }

    /// Decide which cards to drop. Returns (position, kept fingerprint,
    /// similarity) triples plus counters; does not mutate anything.
    fn plan_drops(&self, cards: &[Card]) -> (Vec<(usize, String, f32)>, DedupSummary) {
        let normalized: Vec<Option<String>> = cards
            .par_iter()
            .map(|card| card.comparison_text().map(|t| normalize_text(&t)))
            .collect();

        for (card, text) in cards.iter().zip(&normalized) {
            if text.is_none() {
                // Fail-open: a card we cannot compare is treated as unique.
                log::warn!(
                    "{}",
                    AnkimineError::SimilarityComputation(card.fingerprint.clone())
                );
            }
        }

        let mut assigned = vec![false; cards.len()];
        let mut groups: Vec<Group> = Vec::new();
        let mut exact = 0usize;
        let mut similar = 0usize;

        for i in 0..cards.len() {
            if assigned[i] || normalized[i].is_none() {
                continue;
            }
            assigned[i] = true;
            let mut group = Group { members: vec![(i, 1.0)] };

            for j in (i + 1)..cards.len() {
                if assigned[j] {
                    continue;
                }
                let (Some(text_i), Some(text_j)) =
                    (normalized[i].as_deref(), normalized[j].as_deref())
                else {
                    continue;
                };
                if text_i == text_j {
                    assigned[j] = true;
                    group.members.push((j, 1.0));
                    exact += 1;
                } else {
                    let sim = similarity_ratio(text_i, text_j);
                    if sim >= self.similarity_threshold {
                        assigned[j] = true;
                        group.members.push((j, sim));
                        similar += 1;
                    }
                }
            }

            if group.members.len() > 1 {
                groups.push(group);
            }
        }

        let mut drops: Vec<(usize, String, f32)> = Vec::new();
        for group in &groups {
            let keeper = self.pick_keeper(cards, group);
            let kept_fingerprint = cards[keeper].fingerprint.clone();
            for (pos, sim) in &group.members {
                if *pos != keeper {
                    drops.push((*pos, kept_fingerprint.clone(), *sim));
                }
            }
        }
        drops.sort_by_key(|(pos, _, _)| *pos);

        let dropped = drops.len();
        let summary = DedupSummary {
            total: cards.len(),
            survivors: cards.len() - dropped,
            dropped,
            exact,
            similar,
        };
        (drops, summary)
    }

    /// Keep the higher-priority card; ties go to the more detailed (longer
    /// normalized) answer, then to the earlier card, so the pass is
    /// deterministic for a fixed input order.
    fn pick_keeper(&self, cards: &[Card], group: &Group) -> usize {
        let mut best = group.members[0].0;
        for &(pos, _) in &group.members[1..] {
            let best_score = ranker::score(&cards[best]).unwrap_or(0.0);
            let score = ranker::score(&cards[pos]).unwrap_or(0.0);
            if score > best_score {
                best = pos;
            } else if score == best_score
                && answer_detail(&cards[pos]) > answer_detail(&cards[best])
            {
                best = pos;
            }
        }
        best
    }
}

fn answer_detail(card: &Card) -> usize {
    let answer = card.answer.as_deref().or(card.cloze_text.as_deref()).unwrap_or_default();
    normalize_text(answer).chars().count()
}

/// Remove planned drop positions from the chapter's active set and record
/// them as duplicates. Positions must refer to the chapter's current card
/// vector.
fn apply_drops(chapter: &mut ChapterState, mut drops: Vec<(usize, String, f32)>) {
    if drops.is_empty() {
        return;
    }
    drops.sort_by_key(|(pos, _, _)| std::cmp::Reverse(*pos));
    for (pos, kept_fingerprint, similarity) in drops {
        let dropped = chapter.cards.remove(pos);
        chapter.duplicates.push(DuplicateRecord { kept_fingerprint, dropped, similarity });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{
        Book,
        CardFormat,
        CardType,
        Chapter,
        Density,
    };

    fn test_card(question: &str, answer: &str, importance: u8, difficulty: u8) -> Card {
        Card {
            fingerprint: Card::compute_fingerprint(
                CardFormat::Qa,
                Some(question),
                Some(answer),
                None,
            ),
            format: CardFormat::Qa,
            card_type: CardType::Concept,
            question: Some(question.to_string()),
            answer: Some(answer.to_string()),
            cloze_text: None,
            importance,
            difficulty,
            priority: 0.0,
            source_chapter: "Test".to_string(),
            source_chapter_index: 0,
            source_section: None,
            source_quote: None,
            status: CardStatus::Included,
            tags: Vec::new(),
        }
    }

    fn chapter_with(cards: Vec<Card>) -> ChapterState {
        let mut chapter = ChapterState::new(0, "Test", Density::Medium);
        chapter.cards = cards;
        chapter
    }

    #[test]
    fn exact_duplicates_collapse_to_one_survivor() {
        let mut chapter = chapter_with(vec![
            test_card("What is X?", "X is Y", 5, 5),
            test_card("What is X?", "X is Y", 5, 5),
            test_card("What is Z?", "Z is W", 5, 5),
        ]);

        let summary = Deduplicator::default().dedupe_chapter(&mut chapter);

        assert_eq!(summary.exact, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(chapter.cards.len(), 2);
        assert_eq!(chapter.duplicates.len(), 1);
        // Conservation: survivors + duplicates == input
        assert_eq!(chapter.total_cards(), 3);
    }

    #[test]
    fn punctuation_only_difference_keeps_higher_priority() {
        // Scenario C: same content modulo punctuation; the second card
        // scores higher and must survive.
        let weak = test_card("What is the mitochondria", "The powerhouse of the cell", 4, 4);
        let strong = test_card("What is the mitochondria?", "The powerhouse of the cell!", 9, 8);
        let strong_fp = strong.fingerprint.clone();
        let mut chapter = chapter_with(vec![weak, strong]);

        let summary = Deduplicator::default().dedupe_chapter(&mut chapter);

        assert_eq!(summary.dropped, 1);
        assert_eq!(chapter.cards.len(), 1);
        assert_eq!(chapter.cards[0].fingerprint, strong_fp);
        assert_eq!(chapter.duplicates[0].kept_fingerprint, strong_fp);
    }

    #[test]
    fn equal_scores_keep_longer_answer() {
        let short = test_card("What is DNS?", "A name system", 5, 5);
        let long = test_card("What is DNS!", "A name system that maps hostnames to addresses", 5, 5);
        let long_fp = long.fingerprint.clone();
        let mut chapter = chapter_with(vec![short, long]);

        // Lower the bar so the two differing answers still group.
        let summary = Deduplicator::new(0.4).dedupe_chapter(&mut chapter);

        assert_eq!(summary.dropped, 1);
        assert_eq!(chapter.cards[0].fingerprint, long_fp);
    }

    #[test]
    fn incomparable_card_is_left_alone() {
        let mut blank = test_card("x", "y", 5, 5);
        blank.question = None;
        blank.answer = None;
        let mut chapter = chapter_with(vec![
            blank,
            test_card("What is X?", "X is Y", 5, 5),
            test_card("What is X?", "X is Y", 5, 5),
        ]);

        let summary = Deduplicator::default().dedupe_chapter(&mut chapter);

        // The blank card survives untouched; only the real pair collapses.
        assert_eq!(summary.dropped, 1);
        assert_eq!(chapter.cards.len(), 2);
        assert!(chapter.cards[0].question.is_none());
    }

    #[test]
    fn deterministic_across_runs() {
        let cards = vec![
            test_card("What is X?", "X is Y", 5, 5),
            test_card("What is X!", "X is Y", 5, 5),
            test_card("What is Q?", "Q is R", 7, 3),
        ];
        let mut first = chapter_with(cards.clone());
        let mut second = chapter_with(cards);

        Deduplicator::default().dedupe_chapter(&mut first);
        Deduplicator::default().dedupe_chapter(&mut second);

        assert_eq!(first, second);
    }

    fn two_chapter_book() -> BookState {
        let book = Book {
            title: "T".to_string(),
            author: "A".to_string(),
            language: None,
            identifier: None,
            chapters: vec![
                Chapter { index: 0, title: "One".to_string(), content: String::new(), word_count: 0 },
                Chapter { index: 1, title: "Two".to_string(), content: String::new(), word_count: 0 },
            ],
        };
        BookState::new(&book, Density::Medium)
    }

    #[test]
    fn cross_chapter_requires_ranked_barrier() {
        let mut state = two_chapter_book();
        state.chapters[0].stage = Stage::Finalized;
        state.chapters[1].stage = Stage::Generated;

        let result = Deduplicator::default().dedupe_book(&mut state);
        assert!(matches!(
            result,
            Err(AnkimineError::StageViolation { chapter: 1, operation: "cross-chapter dedup", .. })
        ));
    }

    #[test]
    fn cross_chapter_drop_lands_on_owning_chapter() {
        let mut state = two_chapter_book();

        let mut kept = test_card("What is entropy?", "Disorder of a system", 8, 6);
        kept.priority = crate::ranker::score(&kept).unwrap();
        let kept_fp = kept.fingerprint.clone();

        let mut dup = test_card("What is entropy", "Disorder of a system.", 5, 5);
        dup.priority = crate::ranker::score(&dup).unwrap();
        dup.source_chapter_index = 1;

        state.chapters[0].stage = Stage::Finalized;
        state.chapters[0].cards.push(kept);
        state.chapters[1].stage = Stage::Finalized;
        state.chapters[1].cards.push(dup);

        let summary = Deduplicator::default().dedupe_book(&mut state).unwrap();

        assert_eq!(summary.dropped, 1);
        assert_eq!(state.chapters[0].cards.len(), 1);
        assert!(state.chapters[1].cards.is_empty());
        assert_eq!(state.chapters[1].duplicates.len(), 1);
        assert_eq!(state.chapters[1].duplicates[0].kept_fingerprint, kept_fp);
        assert_eq!(state.total_cards(), 2);
    }

    #[test]
    fn excluded_cards_do_not_participate_cross_chapter() {
        let mut state = two_chapter_book();

        let mut a = test_card("What is entropy?", "Disorder of a system", 8, 6);
        a.priority = crate::ranker::score(&a).unwrap();
        let mut b = test_card("What is entropy", "Disorder of a system.", 8, 6);
        b.priority = crate::ranker::score(&b).unwrap();
        b.status = CardStatus::Excluded;

        state.chapters[0].stage = Stage::Finalized;
        state.chapters[0].cards.push(a);
        state.chapters[1].stage = Stage::Finalized;
        state.chapters[1].cards.push(b);

        let summary = Deduplicator::default().dedupe_book(&mut state).unwrap();
        assert_eq!(summary.dropped, 0);
        assert_eq!(state.chapters[1].cards.len(), 1);
    }
}
