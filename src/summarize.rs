use thiserror::Error;

use crate::book::{Block, Chapter, ChapterStatus, ChapterSummary, SummaryFragment};
use crate::chunk::split_sentences;
use crate::config::RunConfig;
use crate::ollama::{Client, InferenceError, Phase};

pub fn map_prompt(title: &str, index: usize, total: usize, block_text: &str) -> String {
    format!(
        "Resume en prosa y en español el siguiente contenido del capítulo «{title}». \
Evita fórmulas como «El autor explica…» o «El texto dice…» y no uses primera persona. \
Escribe directamente las ideas en tercera persona, sin listas.\n\n\
--- CONTENIDO ({n}/{total}) ---\n{block_text}\n",
        n = index + 1,
    )
}

pub fn fusion_prompt(fragments: &[SummaryFragment]) -> String {
    let joined = fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n");
    format!(
        "Fusiona en un único resumen en prosa los sub-resúmenes de un mismo capítulo, \
eliminando redundancias y manteniendo la coherencia. Escribe entre 2 y 5 párrafos, \
separando ideas mayores con salto de párrafo. Evita fórmulas tipo «El autor…» o \
«El texto…» y escribe directamente las ideas, en voz activa y sin listas.\n\n{joined}"
    )
}

pub fn meta_prompt(chapter_summaries: &str) -> String {
    format!(
        "A partir de los resúmenes por capítulo siguientes, escribe un «Resumen general» \
del libro en 1 a 3 párrafos, en prosa clara y fiel, sin listas. Evita expresiones como \
«El autor…» o «El libro dice…»; presenta directamente las ideas y conclusiones en \
tercera persona.\n\n{chapter_summaries}"
    )
}

pub fn title_repair_prompt(title: &str) -> String {
    format!(
        "Corrige el espaciado y las mayúsculas de esta frase para que quede \
como un título normal en español. Devuelve SOLO el título corregido:\n\n{title}"
    )
}

/// Extractors sometimes glue a title into one run of letters
/// ("ElJardínDeLosSenderos"). A run of 15 or more letters marks it for
/// repair.
pub fn needs_title_repair(title: &str) -> bool {
    const GLUED_RUN: usize = 15;

    let mut run = 0usize;
    for ch in title.chars() {
        if ch.is_alphabetic() {
            run += 1;
            if run >= GLUED_RUN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Cleans an extractor title before it becomes a `##` heading: strips any
/// residual reasoning tags and respaces glued titles through the model.
/// Repair is best effort; on failure the original title is kept.
pub async fn sanitize_title(client: &Client, config: &RunConfig, title: &str) -> String {
    let cleaned = crate::ollama::strip_think(title);
    let mut title = if cleaned.is_empty() {
        title.trim().to_owned()
    } else {
        cleaned
    };

    if needs_title_repair(&title) {
        let prompt = title_repair_prompt(&title);
        match client.generate(config, Phase::Meta, &prompt, "título").await {
            Ok(fixed) => title = fixed,
            Err(err) => {
                tracing::warn!(title = %title, error = %err, "title repair failed; keeping original");
            }
        }
    }

    title
}

/// Reflows single-paragraph output into paragraphs of 3 to 5 sentences.
/// Text that already has paragraph breaks is returned unchanged.
pub fn normalize_paragraphs(text: &str) -> String {
    const MIN_SENTENCES: usize = 3;
    const MAX_SENTENCES: usize = 5;

    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains("\n\n") {
        return trimmed.to_owned();
    }

    let sentences = split_sentences(trimmed);
    if sentences.is_empty() {
        return trimmed.to_owned();
    }

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for sentence in sentences {
        current.push(sentence);
        if current.len() >= MAX_SENTENCES {
            paragraphs.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        // A short trailing paragraph reads better merged into the previous one.
        if current.len() < MIN_SENTENCES && !paragraphs.is_empty() {
            let last = paragraphs.last_mut().expect("non-empty");
            last.push(' ');
            last.push_str(&current.join(" "));
        } else {
            paragraphs.push(current.join(" "));
        }
    }

    paragraphs.join("\n\n")
}

/// Map phase: one inference call per block, in chunk order.
pub async fn map_blocks(
    client: &Client,
    config: &RunConfig,
    chapter: &Chapter,
    blocks: &[Block],
) -> Result<Vec<SummaryFragment>, InferenceError> {
    let mut fragments = Vec::with_capacity(blocks.len());
    for block in blocks {
        let prompt = map_prompt(&chapter.title, block.index, blocks.len(), &block.text);
        tracing::info!(
            chapter = %chapter.title,
            block = block.index + 1,
            blocks = blocks.len(),
            approx_tokens = block.approx_tokens,
            "map block"
        );
        let tag = format!("{} · bloque {}/{}", chapter.title, block.index + 1, blocks.len());
        let text = client.generate(config, Phase::Map, &prompt, &tag).await?;
        fragments.push(SummaryFragment {
            block_index: block.index,
            text,
            model: config.model.clone(),
        });
    }
    Ok(fragments)
}

/// Reduce phase. A single fragment is normalized and reused directly; the
/// fusion call only happens when there is something to fuse. No fragments
/// means the chapter yielded no usable text, so there is no summary to
/// write.
pub async fn fuse_fragments(
    client: &Client,
    config: &RunConfig,
    chapter: &Chapter,
    fragments: &[SummaryFragment],
) -> Result<Option<ChapterSummary>, InferenceError> {
    let text = match fragments {
        [] => return Ok(None),
        [only] => normalize_paragraphs(&only.text),
        many => {
            tracing::info!(chapter = %chapter.title, fragments = many.len(), "fusing fragments");
            let prompt = fusion_prompt(many);
            let tag = format!("{} · fusión", chapter.title);
            let fused = client.generate(config, Phase::Fuse, &prompt, &tag).await?;
            normalize_paragraphs(&fused)
        }
    };

    Ok(Some(ChapterSummary {
        chapter_id: chapter.id,
        text,
    }))
}

/// Raised when metasummary composition is requested while chapters are still
/// pending and the metasummary-only override is not set.
#[derive(Debug, Error)]
#[error("metasummary requires every chapter appended; {pending} pending (use --meta-only to override)")]
pub struct MetasummaryGated {
    pub pending: usize,
}

pub fn ensure_composable(chapters: &[Chapter], meta_only: bool) -> Result<(), MetasummaryGated> {
    if meta_only {
        return Ok(());
    }
    let pending = chapters
        .iter()
        .filter(|ch| ch.status != ChapterStatus::Appended)
        .count();
    if pending > 0 {
        return Err(MetasummaryGated { pending });
    }
    Ok(())
}

/// Composes the book-level summary from the already-written chapter section.
pub async fn compose_metasummary(
    client: &Client,
    config: &RunConfig,
    chapter_summaries: &str,
) -> Result<String, InferenceError> {
    let prompt = meta_prompt(chapter_summaries);
    let text = client
        .generate(config, Phase::Meta, &prompt, "resumen general")
        .await?;
    Ok(normalize_paragraphs(&text))
}
