use std::time::Duration;

use crate::cli::RunArgs;

/// Immutable run configuration, built once from the CLI and passed explicitly
/// into every component. No component reads the environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: String,
    pub base_url: String,
    pub num_ctx: usize,
    pub temperature: f32,
    pub num_predict_map: u32,
    pub num_predict_fuse: u32,
    pub num_predict_meta: u32,
    pub chunk_fraction: f64,
    pub overlap_tokens: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub stream: bool,
    pub retries: u32,
    pub min_chapter_words: usize,
    pub extra_skip_keywords: Vec<String>,
    pub skip_written: bool,
    pub only_first_book: bool,
    pub only_chapter: Option<String>,
    pub meta_only: bool,
    pub audit_footer: bool,
}

impl RunConfig {
    pub fn from_args(args: &RunArgs) -> anyhow::Result<Self> {
        if !(args.chunk_fraction > 0.0 && args.chunk_fraction <= 1.0) {
            anyhow::bail!(
                "--chunk-fraction must be in (0, 1], got {}",
                args.chunk_fraction
            );
        }
        if args.num_ctx == 0 {
            anyhow::bail!("--num-ctx must be > 0");
        }
        if args.temperature < 0.0 {
            anyhow::bail!("--temperature must be >= 0, got {}", args.temperature);
        }

        Ok(Self {
            model: args.model.clone(),
            base_url: args.base_url.trim_end_matches('/').to_owned(),
            num_ctx: args.num_ctx,
            temperature: args.temperature,
            num_predict_map: args.num_predict_map,
            num_predict_fuse: args.num_predict_fuse,
            num_predict_meta: args.num_predict_meta,
            chunk_fraction: args.chunk_fraction,
            overlap_tokens: args.overlap_tokens,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            read_timeout: args.read_timeout_secs.map(Duration::from_secs),
            stream: !args.no_stream,
            retries: args.retries,
            min_chapter_words: args.min_chapter_words,
            extra_skip_keywords: args
                .skip_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            skip_written: !args.no_skip_written,
            only_first_book: args.only_first_book,
            only_chapter: args.only_chapter.clone(),
            meta_only: args.meta_only,
            audit_footer: !args.no_audit_footer,
        })
    }

    /// Token budget for one block's own text.
    pub fn block_budget_tokens(&self) -> usize {
        ((self.num_ctx as f64 * self.chunk_fraction) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RunArgs;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["resumidor", "--book", "b.book.json"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).args
    }

    #[test]
    fn defaults_match_documented_values() -> anyhow::Result<()> {
        let config = RunConfig::from_args(&parse(&[]))?;

        assert_eq!(config.model, "qwen3:14b");
        assert_eq!(config.num_ctx, 32768);
        assert_eq!(config.overlap_tokens, 200);
        assert_eq!(config.min_chapter_words, 60);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, None);
        assert!(config.stream);
        assert!(config.skip_written);
        assert_eq!(config.block_budget_tokens(), 16384);

        Ok(())
    }

    #[test]
    fn rejects_invalid_chunk_fraction() {
        let result = RunConfig::from_args(&parse(&["--chunk-fraction", "1.5"]));
        assert!(result.is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() -> anyhow::Result<()> {
        let config = RunConfig::from_args(&parse(&["--base-url", "http://host:11434/"]))?;
        assert_eq!(config.base_url, "http://host:11434");
        Ok(())
    }
}
