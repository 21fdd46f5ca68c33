use super::{
    models::{
        Book,
        BookState,
        Stage,
    },
    AnkimineError,
};
use crate::{
    checkpoint::CheckpointManager,
    dedup::{
        DedupSummary,
        Deduplicator,
    },
    generation::CardSource,
    ranker,
};

/// Drives chapters through the stage machine
/// not_started -> generated -> deduplicated -> ranked -> finalized,
/// checkpointing after every transition so an interrupted run resumes at
/// the exact stage it reached. Generation is the only suspension point.
pub struct ChapterPipeline<'a> {
    source: &'a dyn CardSource,
    checkpoint: &'a CheckpointManager,
    dedup: Deduplicator,
}

impl<'a> ChapterPipeline<'a> {
    pub fn new(source: &'a dyn CardSource, checkpoint: &'a CheckpointManager) -> Self {
        Self { source, checkpoint, dedup: Deduplicator::default() }
    }

    /// Advance one chapter from wherever it stands to finalized.
    ///
    /// `threshold` overrides the chapter's stored threshold for the final
    /// classification; otherwise the stored one, or the density default,
    /// applies. A failed generation leaves the chapter at not_started with
    /// nothing persisted; a failed save leaves the new stage in memory so
    /// the save can be retried without recomputation.
    pub async fn process_chapter(
        &self,
        book: &Book,
        state: &mut BookState,
        index: usize,
        threshold: Option<f32>,
    ) -> Result<(), AnkimineError> {
        let chapter_content = book
            .chapters
            .iter()
            .find(|c| c.index == index)
            .ok_or_else(|| AnkimineError::Custom(format!("no chapter with index {index}")))?;

        loop {
            let stage = state
                .chapter(index)
                .ok_or_else(|| AnkimineError::Custom(format!("no chapter state for {index}")))?
                .stage;

            match stage {
                Stage::NotStarted => {
                    let density = state
                        .chapter(index)
                        .map(|c| c.density)
                        .unwrap_or(state.default_density);
                    let cards = self
                        .source
                        .generate(&state.title, &state.author, chapter_content, density)
                        .await?;

                    let chapter = state.chapter_mut(index).ok_or_else(|| {
                        AnkimineError::Custom(format!("no chapter state for {index}"))
                    })?;

                    if cards.is_empty() {
                        // A chapter can legitimately produce zero cards.
                        chapter.stage = Stage::Finalized;
                        chapter.threshold =
                            Some(threshold.unwrap_or(ranker::default_threshold(density)));
                        log::info!("chapter {index}: no candidates, finalized empty");
                    } else {
                        log::info!("chapter {index}: {} candidates generated", cards.len());
                        chapter.cards = cards;
                        chapter.stage = Stage::Generated;
                    }
                    self.checkpoint.save(state)?;
                }
                Stage::Generated => {
                    let chapter = state.chapter_mut(index).ok_or_else(|| {
                        AnkimineError::Custom(format!("no chapter state for {index}"))
                    })?;
                    let summary = self.dedup.dedupe_chapter(chapter);
                    log::info!(
                        "chapter {index}: dedup kept {} of {} cards",
                        summary.survivors,
                        summary.total
                    );
                    chapter.stage = Stage::Deduplicated;
                    self.checkpoint.save(state)?;
                }
                Stage::Deduplicated => {
                    let chapter = state.chapter_mut(index).ok_or_else(|| {
                        AnkimineError::Custom(format!("no chapter state for {index}"))
                    })?;
                    for failure in ranker::rank_cards(&mut chapter.cards) {
                        log::warn!("chapter {index}: {failure}");
                    }
                    chapter.stage = Stage::Ranked;
                    self.checkpoint.save(state)?;
                }
                Stage::Ranked => {
                    let chapter = state.chapter_mut(index).ok_or_else(|| {
                        AnkimineError::Custom(format!("no chapter state for {index}"))
                    })?;
                    let resolved = threshold
                        .or(chapter.threshold)
                        .unwrap_or(ranker::default_threshold(chapter.density));
                    if let Err(e) = ranker::reclassify(chapter, resolved) {
                        // Reported, not fatal: the chapter finalizes empty.
                        log::info!("chapter {index}: {e}");
                    }
                    chapter.stage = Stage::Finalized;
                    log::info!(
                        "chapter {index}: finalized at threshold {resolved} ({} included, {} excluded)",
                        chapter.included_count(),
                        chapter.excluded_count()
                    );
                    self.checkpoint.save(state)?;
                }
                Stage::Finalized => return Ok(()),
            }
        }
    }

    /// Process every unfinalized chapter in order. Chapters that already
    /// reached finalized are skipped untouched (resume). A failing chapter
    /// is reported and does not stop the rest of the run.
    pub async fn process_book(
        &self,
        book: &Book,
        state: &mut BookState,
        threshold: Option<f32>,
        only: Option<&[usize]>,
    ) -> Vec<AnkimineError> {
        let mut failures = Vec::new();

        let indices: Vec<usize> = book
            .chapters
            .iter()
            .map(|c| c.index)
            .filter(|i| only.map(|sel| sel.contains(i)).unwrap_or(true))
            .collect();

        for index in indices {
            if state.chapter(index).map(|c| c.stage == Stage::Finalized).unwrap_or(false) {
                log::info!("chapter {index}: already finalized, skipping");
                continue;
            }
            if state.has_progress(index) {
                let stage = state.chapter(index).map(|c| c.stage);
                log::info!("chapter {index}: resuming from {stage:?}");
            }
            if let Err(e) = self.process_chapter(book, state, index, threshold).await {
                log::warn!("chapter {index} failed: {e}");
                failures.push(e);
            }
        }

        failures
    }

    /// Re-partition a finalized chapter under a new threshold. Touches
    /// classification only: no rescoring, no dedup, no generation.
    pub fn apply_threshold(
        &self,
        state: &mut BookState,
        index: usize,
        threshold: f32,
    ) -> Result<(usize, usize), AnkimineError> {
        let chapter = state
            .chapter_mut(index)
            .ok_or_else(|| AnkimineError::Custom(format!("no chapter state for {index}")))?;

        if chapter.stage != Stage::Finalized {
            return Err(AnkimineError::StageViolation {
                chapter: index,
                stage: chapter.stage,
                operation: "apply threshold",
            });
        }

        if let Err(e) = ranker::reclassify(chapter, threshold) {
            log::info!("chapter {index}: {e}");
        }
        let counts = (chapter.included_count(), chapter.excluded_count());
        self.checkpoint.save(state)?;
        Ok(counts)
    }

    /// Throw away a chapter's entire card set and return it to not_started.
    /// Destructive, so the caller must pass an explicit confirmation.
    pub fn regenerate(
        &self,
        state: &mut BookState,
        index: usize,
        confirmed: bool,
    ) -> Result<(), AnkimineError> {
        if !confirmed {
            return Err(AnkimineError::Custom(format!(
                "regenerating chapter {index} discards its cards and must be confirmed"
            )));
        }

        let chapter = state
            .chapter_mut(index)
            .ok_or_else(|| AnkimineError::Custom(format!("no chapter state for {index}")))?;

        chapter.cards.clear();
        chapter.duplicates.clear();
        chapter.threshold = None;
        chapter.stage = Stage::NotStarted;
        self.checkpoint.save(state)?;
        Ok(())
    }

    /// Cross-chapter duplicate pass over the included sets. Requires every
    /// in-progress chapter to be at least ranked (barrier).
    pub fn dedupe_across_chapters(
        &self,
        state: &mut BookState,
    ) -> Result<DedupSummary, AnkimineError> {
        let summary = self.dedup.dedupe_book(state)?;
        self.checkpoint.save(state)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        core::models::{
            Card,
            CardStatus,
            Chapter,
            Density,
        },
        generation::MockSource,
    };

    fn test_book(chapters: usize) -> Book {
        Book {
            title: "Test Book".to_string(),
            author: "Test Author".to_string(),
            language: None,
            identifier: None,
            chapters: (0..chapters)
                .map(|i| Chapter {
                    index: i,
                    title: format!("Chapter {}", i + 1),
                    content: format!("Content of chapter {}", i + 1),
                    word_count: 4,
                })
                .collect(),
        }
    }

    struct FailingSource;

    #[async_trait]
    impl CardSource for FailingSource {
        async fn generate(
            &self,
            _book_title: &str,
            _book_author: &str,
            chapter: &Chapter,
            _density: Density,
        ) -> Result<Vec<Card>, AnkimineError> {
            Err(AnkimineError::Generation {
                chapter: chapter.index,
                reason: "capability did not respond".to_string(),
            })
        }
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CardSource for CountingSource {
        async fn generate(
            &self,
            book_title: &str,
            book_author: &str,
            chapter: &Chapter,
            density: Density,
        ) -> Result<Vec<Card>, AnkimineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MockSource.generate(book_title, book_author, chapter, density).await
        }
    }

    #[tokio::test]
    async fn full_run_reaches_finalized_with_partition() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();

        let chapter = state.chapter(0).unwrap();
        assert_eq!(chapter.stage, Stage::Finalized);
        assert_eq!(chapter.threshold, Some(5.0));
        // Mock spread: 8.0 and 5.67 make the cut at 5.0, 3.33 does not.
        assert_eq!(chapter.included_count(), 2);
        assert_eq!(chapter.excluded_count(), 1);

        // The checkpoint reflects the finalized state.
        let loaded = manager.load().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn empty_generation_finalizes_empty_without_error() {
        // Scenario B: zero raw candidates advance straight to finalized.
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let mut book = test_book(1);
        book.chapters[0].content = "  ".to_string();
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();

        let chapter = state.chapter(0).unwrap();
        assert_eq!(chapter.stage, Stage::Finalized);
        assert_eq!(chapter.cards.len(), 0);
        assert_eq!(chapter.included_count(), 0);
        assert_eq!(chapter.excluded_count(), 0);
    }

    #[tokio::test]
    async fn generation_failure_leaves_chapter_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&FailingSource, &manager);

        let result = pipeline.process_chapter(&book, &mut state, 0, None).await;

        assert!(matches!(result, Err(AnkimineError::Generation { chapter: 0, .. })));
        assert_eq!(state.chapter(0).unwrap().stage, Stage::NotStarted);
        assert!(state.chapter(0).unwrap().cards.is_empty());
        // Nothing was persisted for the failed attempt.
        assert!(!manager.exists());
    }

    #[tokio::test]
    async fn resume_does_not_rerun_generation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let source = CountingSource { calls: AtomicUsize::new(0) };
        let pipeline = ChapterPipeline::new(&source, &manager);

        pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Reload from the checkpoint and run again: already finalized, so
        // the capability must not be invoked a second time.
        let mut resumed = manager.load().unwrap();
        let failures = pipeline.process_book(&book, &mut resumed, None, None).await;
        assert!(failures.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resume_mid_stage_continues_without_regenerating() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);

        // First run only up to "generated", as if the process died there.
        let source = CountingSource { calls: AtomicUsize::new(0) };
        {
            let pipeline = ChapterPipeline::new(&source, &manager);
            pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();
        }
        let mut interrupted = manager.load().unwrap();
        let chapter = interrupted.chapter_mut(0).unwrap();
        chapter.stage = Stage::Generated;
        for card in chapter.cards.iter_mut() {
            card.priority = 0.0;
            card.status = CardStatus::Included;
        }

        // A failing source proves the generation stage is not re-entered.
        let pipeline = ChapterPipeline::new(&FailingSource, &manager);
        pipeline.process_chapter(&book, &mut interrupted, 0, None).await.unwrap();
        assert_eq!(interrupted.chapter(0).unwrap().stage, Stage::Finalized);
    }

    #[tokio::test]
    async fn apply_threshold_reclassifies_only() {
        // Scenario E: lowering the threshold moves previously excluded
        // cards into the included set without regenerating anything.
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();
        let before: Vec<(String, f32)> = state
            .chapter(0)
            .unwrap()
            .cards
            .iter()
            .map(|c| (c.fingerprint.clone(), c.priority))
            .collect();
        assert_eq!(state.chapter(0).unwrap().included_count(), 2);

        let (included, excluded) = pipeline.apply_threshold(&mut state, 0, 3.0).unwrap();
        assert_eq!((included, excluded), (3, 0));

        let chapter = state.chapter(0).unwrap();
        assert_eq!(chapter.stage, Stage::Finalized);
        assert_eq!(chapter.threshold, Some(3.0));
        let after: Vec<(String, f32)> =
            chapter.cards.iter().map(|c| (c.fingerprint.clone(), c.priority)).collect();
        // Same cards, same priorities: nothing was rescored or regenerated.
        assert_eq!(before, after);

        // Raising it back is idempotent with the original partition.
        let (included, excluded) = pipeline.apply_threshold(&mut state, 0, 5.0).unwrap();
        assert_eq!((included, excluded), (2, 1));
    }

    #[tokio::test]
    async fn apply_threshold_rejected_before_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        let result = pipeline.apply_threshold(&mut state, 0, 4.0);
        assert!(matches!(
            result,
            Err(AnkimineError::StageViolation { chapter: 0, operation: "apply threshold", .. })
        ));
    }

    #[tokio::test]
    async fn regenerate_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(1);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        pipeline.process_chapter(&book, &mut state, 0, None).await.unwrap();
        assert!(pipeline.regenerate(&mut state, 0, false).is_err());
        assert_eq!(state.chapter(0).unwrap().stage, Stage::Finalized);

        pipeline.regenerate(&mut state, 0, true).unwrap();
        let chapter = state.chapter(0).unwrap();
        assert_eq!(chapter.stage, Stage::NotStarted);
        assert!(chapter.cards.is_empty());
        assert!(chapter.duplicates.is_empty());
        assert_eq!(chapter.threshold, None);
    }

    #[tokio::test]
    async fn card_union_is_stable_across_threshold_changes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let book = test_book(2);
        let mut state = BookState::new(&book, Density::Medium);
        let pipeline = ChapterPipeline::new(&MockSource, &manager);

        let failures = pipeline.process_book(&book, &mut state, None, None).await;
        assert!(failures.is_empty());
        let total = state.total_cards();

        for threshold in [1.0, 9.0, 5.0, 5.0] {
            pipeline.apply_threshold(&mut state, 0, threshold).unwrap();
            pipeline.apply_threshold(&mut state, 1, threshold).unwrap();
            assert_eq!(state.total_cards(), total);
        }
    }
}
