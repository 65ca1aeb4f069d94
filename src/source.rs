use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Output of the external chapter-text extractor: a TOC tree plus the prose
/// text of each spine document, keyed by reference. The pipeline performs no
/// container-format parsing of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSource {
    pub title: String,
    #[serde(default)]
    pub toc: Vec<SourceTocEntry>,
    #[serde(default)]
    pub chapters: Vec<SourceChapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceTocEntry {
    pub title: String,
    pub reference: String,
    #[serde(default)]
    pub children: Vec<SourceTocEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceChapter {
    pub reference: String,
    pub text: String,
}

pub const BOOK_FILE_SUFFIX: &str = ".book.json";

pub fn load(path: &Path) -> anyhow::Result<BookSource> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read book file: {}", path.display()))?;
    let source: BookSource = serde_json::from_str(&raw)
        .with_context(|| format!("parse book file: {}", path.display()))?;
    if source.title.trim().is_empty() {
        anyhow::bail!("book title is empty: {}", path.display());
    }
    Ok(source)
}

/// Lists `*.book.json` files directly under `dir`, sorted by file name.
pub fn discover(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut books = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))?
    {
        let entry = entry.context("read dir entry")?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && name.ends_with(BOOK_FILE_SUFFIX) {
            books.push(path);
        }
    }
    books.sort();
    Ok(books)
}

/// Companion document path: `foo.book.json` -> `foo-RESUMEN.md`, next to the
/// source file.
pub fn output_path(book_path: &Path) -> PathBuf {
    let name = book_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("libro");
    let stem = name.strip_suffix(BOOK_FILE_SUFFIX).unwrap_or_else(|| {
        Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
    });
    book_path.with_file_name(format!("{stem}-RESUMEN.md"))
}
