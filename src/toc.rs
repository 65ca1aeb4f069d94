use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::book::Chapter;
use crate::cli::TocFilterArgs;
use crate::source::{self, BookSource, SourceTocEntry};

/// Front/back-matter titles that never carry summarizable prose. Bilingual by
/// design: extractors emit either language depending on the edition.
pub const DEFAULT_SKIP_TITLES: &[&str] = &[
    // EN
    "cover",
    "title",
    "title page",
    "copyright",
    "acknowledgments",
    "acknowledgements",
    "contents",
    "table of contents",
    "index",
    "dedication",
    "preface",
    "front matter",
    "foreword",
    "about the author",
    "bibliography",
    "glossary",
    "colophon",
    "legal",
    "credits",
    // ES
    "cubierta",
    "portada",
    "créditos",
    "agradecimientos",
    "índice",
    "tabla de contenido",
    "dedicatoria",
    "prefacio",
    "prólogo",
    "epílogo",
    "sobre el autor",
    "acerca del autor",
    "biografía",
    "bibliografía",
    "glosario",
    "colofón",
    "licencia",
    "nota del autor",
    "nota de la autora",
    "nota del editor",
    "nota de la editorial",
];

/// Path fragments that mark a reference as navigation or front matter.
const SKIP_REFERENCE_FRAGMENTS: &[&str] = &[
    "toc.",
    "nav.",
    "title",
    "cover",
    "copyright",
    "acknowledg",
    "front",
    "colophon",
    "about",
    "dedic",
    "preface",
    "foreword",
    "prolog",
    "epilog",
    "gloss",
    "biblio",
    "legal",
    "index.",
];

/// Title used for the single synthetic chapter when filtering removes every
/// TOC entry.
pub const WHOLE_BOOK_TITLE: &str = "Libro completo";

/// Heuristic knobs for chapter filtering. The keyword list and word floor are
/// language-dependent policy, exposed as configuration rather than hard-coded.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub min_words: usize,
    /// Lowercased keywords added to [`DEFAULT_SKIP_TITLES`].
    pub extra_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub reference: String,
    pub order: usize,
    pub substantive: bool,
}

/// Flattens the extractor's TOC tree into an ordered list, dropping duplicate
/// (title, reference) pairs while preserving first-seen order.
pub fn flatten(entries: &[SourceTocEntry]) -> Vec<TocEntry> {
    fn walk(
        entries: &[SourceTocEntry],
        seen: &mut HashSet<(String, String)>,
        out: &mut Vec<TocEntry>,
    ) {
        for entry in entries {
            let key = (
                entry.title.trim().to_owned(),
                entry.reference.trim().to_owned(),
            );
            if seen.insert(key.clone()) {
                out.push(TocEntry {
                    title: key.0,
                    reference: key.1,
                    order: out.len(),
                    substantive: false,
                });
            }
            walk(&entry.children, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(entries, &mut seen, &mut out);
    out
}

fn normalized_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn is_substantive_title(title: &str, extra_keywords: &[String]) -> bool {
    let t = normalized_title(title);
    if t.is_empty() {
        return false;
    }
    DEFAULT_SKIP_TITLES
        .iter()
        .all(|keyword| !t.contains(keyword))
        && extra_keywords.iter().all(|keyword| !t.contains(keyword))
}

pub fn is_skippable_reference(reference: &str) -> bool {
    let r = reference.to_lowercase();
    // Only the final path segment is judged; directory names are unreliable.
    // Keywords are anchored at the segment start: `title01.xhtml` is front
    // matter, `subtitle.xhtml` is not.
    let segment = r.rsplit('/').next().unwrap_or(&r);
    SKIP_REFERENCE_FRAGMENTS
        .iter()
        .any(|fragment| segment.starts_with(fragment))
}

/// True when the text consists only of Markdown image links (a common shape
/// for cover and illustration-only chapters).
pub fn is_images_only(text: &str) -> bool {
    let mut rest = text.trim();
    if rest.is_empty() {
        return false;
    }
    let mut saw_image = false;
    while !rest.is_empty() {
        if !rest.starts_with("![") {
            return false;
        }
        let Some(mid) = rest.find("](") else {
            return false;
        };
        let Some(end_rel) = rest[mid + 2..].find(')') else {
            return false;
        };
        saw_image = true;
        rest = rest[mid + 2 + end_rel + 1..].trim_start();
    }
    saw_image
}

fn reference_base(reference: &str) -> &str {
    reference.split('#').next().unwrap_or(reference)
}

/// Resolves the extractor output into the ordered list of substantive
/// chapters. Falls back to one whole-book chapter when filtering removes
/// every entry.
pub fn resolve(source: &BookSource, policy: &FilterPolicy) -> Vec<Chapter> {
    let texts: HashMap<&str, &str> = source
        .chapters
        .iter()
        .map(|ch| (reference_base(&ch.reference), ch.text.as_str()))
        .collect();

    let mut entries = flatten(&source.toc);
    for entry in &mut entries {
        entry.substantive = is_substantive_title(&entry.title, &policy.extra_keywords)
            && !entry.reference.is_empty()
            && !is_skippable_reference(&entry.reference);
    }

    let mut chapters = Vec::new();
    for entry in entries.iter().filter(|e| e.substantive) {
        let Some(text) = texts.get(reference_base(&entry.reference)) else {
            tracing::warn!(
                title = %entry.title,
                reference = %entry.reference,
                "chapter skipped: extractor provided no text"
            );
            continue;
        };
        let words = text.split_whitespace().count();
        if words < policy.min_words {
            tracing::info!(
                title = %entry.title,
                words,
                floor = policy.min_words,
                "chapter skipped: below word floor"
            );
            continue;
        }
        if is_images_only(text) {
            tracing::info!(title = %entry.title, "chapter skipped: images only");
            continue;
        }
        let title = if entry.title.trim().is_empty() {
            "Capítulo".to_owned()
        } else {
            entry.title.trim().to_owned()
        };
        chapters.push(Chapter::new(chapters.len(), title, *text));
    }

    if chapters.is_empty() {
        let full = source
            .chapters
            .iter()
            .map(|ch| ch.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !full.trim().is_empty() {
            tracing::warn!("no substantive chapters; summarizing the whole book as one");
            chapters.push(Chapter::new(0, WHOLE_BOOK_TITLE, full));
        }
    }

    chapters
}

/// `toc filter` subcommand: prints the chapter list that `run` would process.
pub fn filter_preview(args: TocFilterArgs) -> anyhow::Result<()> {
    let path = PathBuf::from(&args.book);
    let source = source::load(&path)?;

    let policy = FilterPolicy {
        min_words: args.min_chapter_words,
        extra_keywords: args
            .skip_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect(),
    };
    let chapters = resolve(&source, &policy);

    println!("{}", source.title);
    for chapter in &chapters {
        println!(
            "{:>3}. {} ({} palabras)",
            chapter.id + 1,
            chapter.title,
            chapter.word_count
        );
    }
    if chapters.is_empty() {
        println!("(sin capítulos sustantivos)");
    }

    Ok(())
}
