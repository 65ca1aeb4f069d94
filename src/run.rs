use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::book::{Book, BookStatus, Chapter, ChapterStatus, ChapterSummary};
use crate::cli::RunArgs;
use crate::config::RunConfig;
use crate::ollama::{Client, InferenceError};
use crate::state::WriteState;
use crate::{chunk, document, source, state, summarize, toc};

/// Outcome of one book, rolled up into the run tally.
#[derive(Debug, Default)]
struct BookOutcome {
    chapters_written: usize,
    chapters_skipped: usize,
    chapters_failed: usize,
    finalized: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = RunConfig::from_args(&args)?;

    let mut book_paths = match (&args.book, &args.books) {
        (Some(book), None) => vec![PathBuf::from(book)],
        (None, Some(dir)) => source::discover(Path::new(dir))?,
        (None, None) => anyhow::bail!("one of --book or --books is required"),
        (Some(_), Some(_)) => unreachable!("rejected by clap"),
    };
    if book_paths.is_empty() {
        anyhow::bail!("no *.book.json files found");
    }
    if config.only_first_book && book_paths.len() > 1 {
        tracing::info!(
            first = %book_paths[0].display(),
            skipped = book_paths.len() - 1,
            "processing only the first book"
        );
        book_paths.truncate(1);
    }

    let client = Client::new(&config)?;

    let mut books_ok = 0usize;
    let mut books_failed = 0usize;
    let mut chapters_written = 0usize;
    let mut chapters_skipped = 0usize;
    let mut chapters_failed = 0usize;
    for path in &book_paths {
        match process_book(&client, &config, path).await {
            Ok(outcome) => {
                chapters_written += outcome.chapters_written;
                chapters_skipped += outcome.chapters_skipped;
                chapters_failed += outcome.chapters_failed;
                if outcome.finalized && outcome.chapters_failed == 0 {
                    books_ok += 1;
                } else {
                    books_failed += 1;
                }
            }
            Err(err) => {
                tracing::error!(
                    book = %path.display(),
                    error = format!("{err:#}"),
                    "book failed"
                );
                books_failed += 1;
            }
        }
    }

    tracing::info!(
        books_ok,
        books_failed,
        chapters_written,
        chapters_skipped,
        chapters_failed,
        "run complete"
    );
    if books_ok == 0 {
        anyhow::bail!("no book completed successfully");
    }
    Ok(())
}

async fn process_book(
    client: &Client,
    config: &RunConfig,
    path: &Path,
) -> anyhow::Result<BookOutcome> {
    let parsed = source::load(path)?;
    let out_md = source::output_path(path);
    tracing::info!(book = %parsed.title, out = %out_md.display(), "processing book");

    let policy = toc::FilterPolicy {
        min_words: config.min_chapter_words,
        extra_keywords: config.extra_skip_keywords.clone(),
    };
    let mut chapters = toc::resolve(&parsed, &policy);
    if !config.meta_only {
        // Headings must be clean before they are written or matched against
        // the document: glued titles repaired, reasoning tags stripped.
        for chapter in &mut chapters {
            let sanitized = summarize::sanitize_title(client, config, &chapter.title).await;
            if sanitized != chapter.title {
                tracing::info!(from = %chapter.title, to = %sanitized, "title sanitized");
                chapter.title = sanitized;
            }
        }
    }
    if let Some(only) = &config.only_chapter {
        chapters.retain(|ch| &ch.title == only);
        if chapters.is_empty() {
            anyhow::bail!("no chapter titled {only:?} survives table-of-contents filtering");
        }
    }
    if chapters.is_empty() {
        anyhow::bail!("no substantive chapters in: {}", path.display());
    }

    let state_file = state::state_path(&out_md);
    let mut write_state = match state::load(&state_file) {
        Ok(Some(loaded)) => loaded,
        Ok(None) => WriteState::new(path),
        Err(err) => {
            tracing::warn!(error = %err, "discarding unreadable state; reprocessing from scratch");
            WriteState::new(path)
        }
    };

    document::ensure_skeleton(&out_md)
        .with_context(|| format!("create output document: {}", out_md.display()))?;

    let mut book = Book {
        title: parsed.title.clone(),
        chapters,
        out_md,
        status: BookStatus::InProgress,
    };

    if config.meta_only {
        compose_general_summary(client, config, &mut book, &mut write_state, &state_file).await?;
        finalize(config, &mut book, &write_state)?;
        return Ok(BookOutcome {
            finalized: true,
            ..BookOutcome::default()
        });
    }

    // Resumption: a chapter counts as written if its heading is already in
    // the document or the persisted state remembers it.
    let already_written: BTreeSet<String> = if config.skip_written {
        let mut titles = document::written_chapter_titles(&book.out_md)?;
        titles.extend(write_state.written_chapters.iter().cloned());
        titles
    } else {
        BTreeSet::new()
    };

    let mut outcome = BookOutcome::default();
    let total = book.chapters.len();
    for chapter in &mut book.chapters {
        if already_written.contains(&chapter.title) {
            tracing::info!(chapter = %chapter.title, "already summarized, skipping");
            chapter.status = ChapterStatus::Appended;
            outcome.chapters_skipped += 1;
            continue;
        }

        tracing::info!(
            chapter = chapter.id + 1,
            total,
            title = %chapter.title,
            words = chapter.word_count,
            "summarizing chapter"
        );
        match summarize_chapter(client, config, chapter).await {
            Ok(Some(summary)) => {
                document::append_chapter(&book.out_md, &chapter.title, &summary.text)?;
                chapter.status = ChapterStatus::Appended;
                write_state.mark_written(&chapter.title);
                state::save(&state_file, &write_state)?;
                outcome.chapters_written += 1;
            }
            Ok(None) => {
                tracing::warn!(chapter = %chapter.title, "chapter skipped: no usable text");
                // Nothing will ever be written for this chapter; it must not
                // hold up the metasummary.
                chapter.status = ChapterStatus::Appended;
                outcome.chapters_skipped += 1;
            }
            Err(err) => {
                chapter.status = ChapterStatus::Failed;
                outcome.chapters_failed += 1;
                tracing::error!(
                    chapter = %chapter.title,
                    attempts = err.attempts,
                    error = %err,
                    "chapter failed, continuing with the next"
                );
            }
        }
    }

    match summarize::ensure_composable(&book.chapters, config.meta_only) {
        Ok(()) => {
            book.status = BookStatus::AllChaptersDone;
            compose_general_summary(client, config, &mut book, &mut write_state, &state_file)
                .await?;
            finalize(config, &mut book, &write_state)?;
            outcome.finalized = true;
        }
        Err(gated) => {
            tracing::error!(book = %book.title, error = %gated, "metasummary deferred");
        }
    }

    Ok(outcome)
}

/// Chunk, map, and fuse one chapter. The status field tracks progress so the
/// metasummary gate can tell finished chapters from failed ones. `None`
/// means the chapter produced no blocks at all (no usable text).
async fn summarize_chapter(
    client: &Client,
    config: &RunConfig,
    chapter: &mut Chapter,
) -> Result<Option<ChapterSummary>, InferenceError> {
    let blocks = chunk::chunk_chapter(
        chapter.id,
        &chapter.text,
        config.block_budget_tokens(),
        config.overlap_tokens,
    );
    if blocks.is_empty() {
        return Ok(None);
    }
    chapter.status = ChapterStatus::Chunked;

    let fragments = summarize::map_blocks(client, config, chapter, &blocks).await?;
    chapter.status = ChapterStatus::Mapped;

    let summary = summarize::fuse_fragments(client, config, chapter, &fragments).await?;
    chapter.status = ChapterStatus::Reduced;
    Ok(summary)
}

async fn compose_general_summary(
    client: &Client,
    config: &RunConfig,
    book: &mut Book,
    write_state: &mut WriteState,
    state_file: &Path,
) -> anyhow::Result<()> {
    let section = document::chapter_summaries_section(&book.out_md)?;
    if section.is_empty() {
        anyhow::bail!(
            "no chapter summaries to compose from: {}",
            book.out_md.display()
        );
    }

    tracing::info!(book = %book.title, "composing general summary");
    let general = summarize::compose_metasummary(client, config, &section)
        .await
        .context("compose general summary")?;
    document::write_general_summary(&book.out_md, &general)?;
    book.status = BookStatus::MetasummaryComposed;

    write_state.metasummary_written = true;
    state::save(state_file, write_state)?;
    Ok(())
}

fn finalize(config: &RunConfig, book: &mut Book, write_state: &WriteState) -> anyhow::Result<()> {
    if config.audit_footer {
        document::append_audit_footer(&book.out_md, config)?;
    }
    book.status = BookStatus::Finalized;
    tracing::info!(
        book = %book.title,
        out = %book.out_md.display(),
        chapters = write_state.written_chapters.len(),
        "book finished"
    );
    Ok(())
}
