use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};

use ankimine::{
    anki::{
        api as anki_api,
        export_cards_to_json,
        AnkiExporter,
        DeckConfig,
    },
    checkpoint::{
        resume_summary,
        CheckpointManager,
    },
    core::{
        text::slugify,
        AnkimineError,
        Book,
        BookState,
        ChapterPipeline,
        Density,
    },
    estimate::{
        format_estimate,
        CostEstimator,
    },
    generation::{
        CardSource,
        ClaudeSource,
        MockSource,
    },
    parser::parse_epub,
};

#[derive(Parser)]
#[command(name = "ankimine")]
#[command(about = "Mine Anki flashcards out of EPUB books", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show book structure and cost estimates without generating anything.
    Info { epub: PathBuf },

    /// Generate, dedupe, rank and threshold cards chapter by chapter.
    Generate {
        epub: PathBuf,
        /// Output directory (default: output/<book-title>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Card generation density
        #[arg(short, long, default_value = "medium")]
        density: Density,
        /// Chapters to process, 1-indexed (e.g. "1,2,5" or "3-7")
        #[arg(short, long)]
        chapters: Option<String>,
        /// Per-chapter density override, repeatable (e.g. "2:thorough", "4-6:light")
        #[arg(long = "chapter-density")]
        chapter_densities: Vec<String>,
        /// Score threshold for inclusion (default: by density)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Resume from an existing checkpoint
        #[arg(short, long)]
        resume: bool,
        /// Use the offline mock source instead of the API
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-apply a new inclusion threshold to a finalized chapter.
    Threshold {
        /// Output directory holding the checkpoint
        output: PathBuf,
        /// Chapter number, 1-indexed
        chapter: usize,
        /// New score threshold (1-10)
        value: f32,
    },

    /// Cross-chapter duplicate pass over the included sets.
    Dedupe { output: PathBuf },

    /// Discard a chapter's cards and regenerate it from scratch.
    Regenerate {
        epub: PathBuf,
        output: PathBuf,
        /// Chapter number, 1-indexed
        chapter: usize,
        /// Confirm the destructive restart
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Push included cards to Anki via AnkiConnect.
    Export {
        output: PathBuf,
        /// Custom deck name (default: "<title> - <author>")
        #[arg(long)]
        deck_name: Option<String>,
        /// Nest the deck under a parent deck
        #[arg(long)]
        parent_deck: Option<String>,
        /// Create one subdeck per chapter
        #[arg(long)]
        subdecks: bool,
        /// Also write the full card set to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Show checkpoint progress for a book.
    Status { output: PathBuf },

    /// Delete a book's checkpoint.
    Clear {
        output: PathBuf,
        #[arg(long)]
        yes: bool,
    },
}

/// "1,2,5" or "3-7" to 0-indexed chapter indices.
fn parse_chapters(spec: &str) -> Result<Vec<usize>, AnkimineError> {
    let mut indices = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().map_err(|_| bad_chapter_spec(spec))?;
            let end: usize = end.trim().parse().map_err(|_| bad_chapter_spec(spec))?;
            if start == 0 || end < start {
                return Err(bad_chapter_spec(spec));
            }
            indices.extend((start - 1)..end);
        } else {
            let n: usize = part.parse().map_err(|_| bad_chapter_spec(spec))?;
            if n == 0 {
                return Err(bad_chapter_spec(spec));
            }
            indices.push(n - 1);
        }
    }
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

fn bad_chapter_spec(spec: &str) -> AnkimineError {
    AnkimineError::Custom(format!("invalid chapter selection: {spec} (expected \"1,2,5\" or \"3-7\")"))
}

/// "2:thorough" or "4-6:light" to (0-indexed chapter, density) pairs.
fn parse_chapter_densities(specs: &[String]) -> Result<Vec<(usize, Density)>, AnkimineError> {
    let mut overrides = Vec::new();
    for spec in specs {
        let (chapters, density) = spec.split_once(':').ok_or_else(|| {
            AnkimineError::Custom(format!("invalid chapter density: {spec} (expected \"2:thorough\")"))
        })?;
        let density: Density = density
            .trim()
            .parse()
            .map_err(AnkimineError::Custom)?;
        for index in parse_chapters(chapters)? {
            overrides.push((index, density));
        }
    }
    Ok(overrides)
}

fn default_output_dir(book: &Book) -> PathBuf {
    PathBuf::from("output").join(slugify(&book.title))
}

fn print_book_info(book: &Book) {
    println!("Title:    {}", book.title);
    println!("Author:   {}", book.author);
    if let Some(language) = &book.language {
        println!("Language: {}", language);
    }
    println!("Chapters: {} ({} words)", book.chapters.len(), book.total_words());
    for chapter in &book.chapters {
        println!("  {:>3}. {} ({} words)", chapter.index + 1, chapter.title, chapter.word_count);
    }
}

fn print_state_summary(state: &BookState) {
    let summary = resume_summary(state);
    println!(
        "{} by {}: {}/{} chapters finalized, {} cards tracked (updated {})",
        summary.title,
        summary.author,
        summary.chapters_finalized,
        summary.chapters_total,
        summary.total_cards,
        summary.updated_at.format("%Y-%m-%d %H:%M")
    );
    for chapter in &state.chapters {
        println!(
            "  {:>3}. {:<40} {:?} (threshold {}, {} in / {} out / {} dup)",
            chapter.index + 1,
            chapter.title,
            chapter.stage,
            chapter.threshold.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            chapter.included_count(),
            chapter.excluded_count(),
            chapter.duplicates.len()
        );
    }
}

fn build_source(dry_run: bool) -> Result<Box<dyn CardSource>, AnkimineError> {
    if dry_run {
        return Ok(Box::new(MockSource));
    }
    let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
        AnkimineError::Custom(
            "ANTHROPIC_API_KEY is not set (use --dry-run for an offline run)".to_string(),
        )
    })?;
    let model = std::env::var("ANKIMINE_MODEL").ok();
    Ok(Box::new(ClaudeSource::new(api_key, model)?))
}

async fn run() -> Result<(), AnkimineError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Info { epub } => {
            let book = parse_epub(&epub)?;
            print_book_info(&book);

            println!("\nCost estimates by density:");
            let estimator = CostEstimator::default();
            for density in [Density::Light, Density::Medium, Density::Thorough] {
                let estimate = estimator.estimate_book(&book, density, None);
                println!("  {:<10} ~${:.4} USD", density.to_string(), estimate.estimated_cost_usd);
            }
        }

        Command::Generate {
            epub,
            output,
            density,
            chapters,
            chapter_densities,
            threshold,
            resume,
            dry_run,
        } => {
            let book = parse_epub(&epub)?;
            print_book_info(&book);

            let output_dir = output.unwrap_or_else(|| default_output_dir(&book));
            let manager = CheckpointManager::new(&output_dir);

            let mut state = if manager.exists() {
                if !resume {
                    return Err(AnkimineError::Custom(format!(
                        "a checkpoint already exists in {}; pass --resume to continue it or run `ankimine clear` first",
                        output_dir.display()
                    )));
                }
                let state = manager.load()?;
                if state.title != book.title {
                    return Err(AnkimineError::Custom(format!(
                        "checkpoint in {} belongs to {:?}, not {:?}",
                        output_dir.display(),
                        state.title,
                        book.title
                    )));
                }
                println!("\nResuming from checkpoint:");
                print_state_summary(&state);
                state
            } else {
                let mut state = BookState::new(&book, density);
                for (index, density) in parse_chapter_densities(&chapter_densities)? {
                    if let Some(chapter) = state.chapter_mut(index) {
                        chapter.density = density;
                    }
                }
                state
            };

            let selection = chapters.as_deref().map(parse_chapters).transpose()?;

            if !dry_run {
                let estimator = CostEstimator::default();
                let processed = state.finalized_indices();
                let estimate = match selection.as_deref() {
                    Some(sel) => estimator.estimate_book(&book, density, Some(sel)),
                    None => estimator.estimate_remaining(&book, density, &processed),
                };
                println!("\n{}\n", format_estimate(&estimate, false));
            }

            let source = build_source(dry_run)?;
            let pipeline = ChapterPipeline::new(source.as_ref(), &manager);
            let failures =
                pipeline.process_book(&book, &mut state, threshold, selection.as_deref()).await;

            println!();
            print_state_summary(&state);

            if !failures.is_empty() {
                for failure in &failures {
                    eprintln!("warning: {failure}");
                }
                return Err(AnkimineError::Custom(format!(
                    "{} chapter(s) failed; re-run with --resume to retry them",
                    failures.len()
                )));
            }
            println!("\nCheckpoint: {}", manager.path().display());
        }

        Command::Threshold { output, chapter, value } => {
            if chapter == 0 {
                return Err(AnkimineError::Custom("chapters are numbered from 1".to_string()));
            }
            let manager = CheckpointManager::new(&output);
            let mut state = manager.load()?;

            let pipeline = ChapterPipeline::new(&MockSource, &manager);
            let (included, excluded) = pipeline.apply_threshold(&mut state, chapter - 1, value)?;
            println!(
                "Chapter {} reclassified at threshold {}: {} included, {} excluded",
                chapter, value, included, excluded
            );
        }

        Command::Dedupe { output } => {
            let manager = CheckpointManager::new(&output);
            let mut state = manager.load()?;

            let pipeline = ChapterPipeline::new(&MockSource, &manager);
            let summary = pipeline.dedupe_across_chapters(&mut state)?;
            println!(
                "Cross-chapter dedup: {} cards checked, {} dropped ({} exact, {} similar)",
                summary.total, summary.dropped, summary.exact, summary.similar
            );
        }

        Command::Regenerate { epub, output, chapter, yes, dry_run } => {
            if chapter == 0 {
                return Err(AnkimineError::Custom("chapters are numbered from 1".to_string()));
            }
            let book = parse_epub(&epub)?;
            let manager = CheckpointManager::new(&output);
            let mut state = manager.load()?;

            let source = build_source(dry_run)?;
            let pipeline = ChapterPipeline::new(source.as_ref(), &manager);
            pipeline.regenerate(&mut state, chapter - 1, yes)?;
            pipeline.process_chapter(&book, &mut state, chapter - 1, None).await?;

            print_state_summary(&state);
        }

        Command::Export { output, deck_name, parent_deck, subdecks, json } => {
            let manager = CheckpointManager::new(&output);
            let state = manager.load()?;

            let pending = state.pending_indices();
            if !pending.is_empty() {
                println!(
                    "note: {} chapter(s) not finalized yet and will be skipped: {:?}",
                    pending.len(),
                    pending.iter().map(|i| i + 1).collect::<Vec<_>>()
                );
            }

            if let Some(json_path) = &json {
                export_cards_to_json(&state, json_path)?;
                println!("Card set written to {}", json_path.display());
            }

            if !anki_api::wait_awake(2, 3).await? {
                return Err(AnkimineError::AnkiConnect(
                    "Anki is not reachable on localhost:8765 (is Anki running with AnkiConnect?)"
                        .to_string(),
                ));
            }

            let exporter = AnkiExporter::new(DeckConfig {
                deck_name,
                parent_deck,
                create_subdecks: subdecks,
            });
            let summary = exporter.export(&state).await?;
            println!(
                "Exported {} notes to deck {:?} ({} rejected as duplicates)",
                summary.notes_added, summary.deck_name, summary.notes_failed
            );
        }

        Command::Status { output } => {
            let manager = CheckpointManager::new(&output);
            let state = manager.load()?;
            print_state_summary(&state);
        }

        Command::Clear { output, yes } => {
            if !yes {
                return Err(AnkimineError::Custom(
                    "clearing a checkpoint discards all generated cards; pass --yes to confirm"
                        .to_string(),
                ));
            }
            let manager = CheckpointManager::new(&output);
            if manager.delete()? {
                println!("Checkpoint deleted: {}", manager.path().display());
            } else {
                println!("No checkpoint at {}", manager.path().display());
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
