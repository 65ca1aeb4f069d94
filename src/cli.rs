use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunArgs),
    Toc {
        #[command(subcommand)]
        command: TocCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum TocCommand {
    Filter(TocFilterArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Extracted book file (`*.book.json`, produced by the extractor).
    #[arg(long, conflicts_with = "books")]
    pub book: Option<String>,

    /// Directory scanned for `*.book.json` files (processed in sorted order).
    #[arg(long)]
    pub books: Option<String>,

    /// Model identifier sent to the inference service.
    #[arg(long, default_value = "qwen3:14b")]
    pub model: String,

    /// Base URL of the inference service.
    #[arg(long, default_value = "http://localhost:11434")]
    pub base_url: String,

    /// Context window (input + output tokens) of the model.
    #[arg(long, default_value_t = 32768)]
    pub num_ctx: usize,

    /// Maximum output tokens for per-block (map) summaries.
    #[arg(long, default_value_t = 2048)]
    pub num_predict_map: u32,

    /// Maximum output tokens for chapter fusion.
    #[arg(long, default_value_t = 2048)]
    pub num_predict_fuse: u32,

    /// Maximum output tokens for the book-level metasummary.
    #[arg(long, default_value_t = 1024)]
    pub num_predict_meta: u32,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.1)]
    pub temperature: f32,

    /// Fraction of the context window budgeted for each block's text.
    #[arg(long, default_value_t = 0.5)]
    pub chunk_fraction: f64,

    /// Approximate tokens carried from the end of one block into the next.
    #[arg(long, default_value_t = 200)]
    pub overlap_tokens: usize,

    /// Seconds allowed to establish a connection to the inference service.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Seconds allowed between response bytes (unset = unbounded).
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Maximum retries per inference call after the first attempt.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Disable streamed responses; request the full text in one exchange.
    #[arg(long)]
    pub no_stream: bool,

    /// Minimum word count for a chapter to be considered substantive.
    #[arg(long, default_value_t = 60)]
    pub min_chapter_words: usize,

    /// Extra non-substantive title keyword (repeatable; extends the built-in
    /// bilingual set).
    #[arg(long = "skip-keyword")]
    pub skip_keywords: Vec<String>,

    /// Reprocess chapters even when their heading is already in the output.
    #[arg(long)]
    pub no_skip_written: bool,

    /// Process only the first book found under `--books`.
    #[arg(long)]
    pub only_first_book: bool,

    /// Process only the chapter with this exact title.
    #[arg(long)]
    pub only_chapter: Option<String>,

    /// Recompose only the book-level metasummary of an already-summarized book.
    #[arg(long)]
    pub meta_only: bool,

    /// Do not append the audit footer (model, parameters, timestamp).
    #[arg(long)]
    pub no_audit_footer: bool,
}

#[derive(Debug, Args)]
pub struct TocFilterArgs {
    /// Extracted book file (`*.book.json`).
    #[arg(long)]
    pub book: String,

    /// Minimum word count for a chapter to be considered substantive.
    #[arg(long, default_value_t = 60)]
    pub min_chapter_words: usize,

    /// Extra non-substantive title keyword (repeatable).
    #[arg(long = "skip-keyword")]
    pub skip_keywords: Vec<String>,
}
