use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::write_atomic;

/// Durable per-book progress, persisted as JSON next to the output document.
/// Monotonic: titles are only ever added, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteState {
    pub book_path: String,
    #[serde(default)]
    pub written_chapters: BTreeSet<String>,
    #[serde(default)]
    pub metasummary_written: bool,
}

impl WriteState {
    pub fn new(book_path: &Path) -> Self {
        Self {
            book_path: book_path.display().to_string(),
            written_chapters: BTreeSet::new(),
            metasummary_written: false,
        }
    }

    pub fn mark_written(&mut self, title: &str) {
        self.written_chapters.insert(title.to_owned());
    }
}

/// Persisted WriteState exists but cannot be read. Fatal only for resumption:
/// the caller falls back to full reprocessing of that book.
#[derive(Debug, Error)]
#[error("write state is unreadable ({path}): {reason}")]
pub struct StateCorruptionError {
    pub path: PathBuf,
    pub reason: String,
}

/// State file lives next to the output document: `.{name}.state.json`.
pub fn state_path(out_md: &Path) -> PathBuf {
    let name = out_md
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("RESUMEN.md");
    out_md.with_file_name(format!(".{name}.state.json"))
}

pub fn load(path: &Path) -> Result<Option<WriteState>, StateCorruptionError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(StateCorruptionError {
                path: path.to_path_buf(),
                reason: format!("{err}"),
            });
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => Ok(Some(state)),
        Err(err) => Err(StateCorruptionError {
            path: path.to_path_buf(),
            reason: format!("{err}"),
        }),
    }
}

pub fn save(path: &Path, state: &WriteState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state).context("serialize write state")?;
    write_atomic(path, &json)
        .with_context(|| format!("persist write state: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_progress() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let out_md = dir.path().join("libro-RESUMEN.md");
        let path = state_path(&out_md);

        let mut state = WriteState::new(Path::new("/books/libro.book.json"));
        state.mark_written("Capítulo 1");
        state.mark_written("Capítulo 2");
        state.mark_written("Capítulo 1");
        save(&path, &state)?;

        let loaded = load(&path).expect("readable").expect("present");
        assert_eq!(loaded.written_chapters.len(), 2);
        assert!(loaded.written_chapters.contains("Capítulo 2"));
        assert!(!loaded.metasummary_written);
        Ok(())
    }

    #[test]
    fn missing_state_is_not_an_error() {
        let loaded = load(Path::new("/nonexistent/.x.state.json")).expect("missing is ok");
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupted_state_reports_corruption() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join(".libro-RESUMEN.md.state.json");
        std::fs::write(&path, "{not json")?;

        let err = load(&path).unwrap_err();
        assert_eq!(err.path, path);
        Ok(())
    }

    #[test]
    fn state_path_is_hidden_sibling() {
        let path = state_path(Path::new("/books/libro-RESUMEN.md"));
        assert_eq!(
            path,
            PathBuf::from("/books/.libro-RESUMEN.md.state.json")
        );
    }
}
