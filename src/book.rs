use std::path::PathBuf;

/// Per-chapter pipeline state. Chapters advance strictly forward; `Failed` is
/// terminal for the current run only (a later run retries the chapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    Unstarted,
    Chunked,
    Mapped,
    Reduced,
    Appended,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: usize,
    pub title: String,
    pub text: String,
    pub word_count: usize,
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn new(id: usize, title: impl Into<String>, text: impl Into<String>) -> Self {
        let title = title.into();
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self {
            id,
            title,
            text,
            word_count,
            status: ChapterStatus::Unstarted,
        }
    }
}

/// Per-book pipeline state, advanced by the driver once every chapter has
/// been appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    InProgress,
    AllChaptersDone,
    MetasummaryComposed,
    Finalized,
}

#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub chapters: Vec<Chapter>,
    pub out_md: PathBuf,
    pub status: BookStatus,
}

/// One bounded text segment sized for a single inference call. Derived
/// deterministically from a chapter; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub chapter_id: usize,
    pub index: usize,
    pub text: String,
    pub approx_tokens: usize,
    /// Bytes of this block's text carried over from the previous block.
    pub overlap_len: usize,
}

/// Summary of one block, as returned by the map phase.
#[derive(Debug, Clone)]
pub struct SummaryFragment {
    pub block_index: usize,
    pub text: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ChapterSummary {
    pub chapter_id: usize,
    pub text: String,
}
