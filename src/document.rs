use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::config::RunConfig;

pub const GENERAL_HEADING: &str = "# Resumen general";
pub const CHAPTERS_HEADING: &str = "# Resumen por capítulos";

fn skeleton() -> String {
    format!("{GENERAL_HEADING}\n\n{CHAPTERS_HEADING}\n")
}

/// Creates the output document with its two fixed sections when missing.
pub fn ensure_skeleton(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    write_atomic(path, &skeleton())
}

fn read_or_skeleton(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(skeleton()),
        Err(err) => {
            Err(err).with_context(|| format!("read output document: {}", path.display()))
        }
    }
}

/// Chapter headings already present in the document. Missing file = empty.
pub fn written_chapter_titles(path: &Path) -> anyhow::Result<BTreeSet<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read output document: {}", path.display()));
        }
    };

    let mut titles = BTreeSet::new();
    for line in contents.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            titles.insert(title.trim().to_owned());
        }
    }
    Ok(titles)
}

/// Appends one chapter summary as a `##` block, atomically replacing the
/// document, then re-reads it to verify the heading landed. Verification
/// failure is a warning, not an error: the atomic replace already committed.
/// When the audit footer is already present (resumed run), the chapter is
/// inserted above it so the footer stays last.
pub fn append_chapter(path: &Path, title: &str, summary: &str) -> anyhow::Result<()> {
    let contents = read_or_skeleton(path)?;
    let block = format!("\n\n## {title}\n\n{}\n", summary.trim());

    let (body, footer) = match footer_start(&contents) {
        Some(pos) => (&contents[..pos], &contents[pos..]),
        None => (contents.as_str(), ""),
    };
    let mut next = body.trim_end_matches('\n').to_owned();
    next.push('\n');
    next.push_str(&block);
    next.push_str(footer);
    write_atomic(path, &next)?;

    verify_heading(path, title);
    Ok(())
}

/// Byte offset where the audit footer (separator line included) begins, if
/// the document carries one.
fn footer_start(contents: &str) -> Option<usize> {
    let marker = contents.find(AUDIT_MARKER)?;
    Some(contents[..marker].rfind("\n---").unwrap_or(marker))
}

fn verify_heading(path: &Path, title: &str) {
    let heading = format!("## {title}");
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.contains(&heading) => {}
        Ok(_) => {
            tracing::warn!(
                title,
                path = %path.display(),
                "post-write verification did not find the chapter heading"
            );
        }
        Err(err) => {
            tracing::warn!(
                title,
                path = %path.display(),
                error = %err,
                "post-write verification could not re-read the document"
            );
        }
    }
}

/// Everything after the `# Resumen por capítulos` heading, up to the audit
/// footer when one is present.
pub fn chapter_summaries_section(path: &Path) -> anyhow::Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read output document: {}", path.display()))?;
    let Some(pos) = contents.find(CHAPTERS_HEADING) else {
        return Ok(String::new());
    };
    let rest = &contents[pos + CHAPTERS_HEADING.len()..];
    let rest = match footer_start(rest) {
        Some(end) => &rest[..end],
        None => rest,
    };
    Ok(rest.trim().to_owned())
}

/// Replaces the block under `# Resumen general` without touching the rest.
pub fn write_general_summary(path: &Path, general: &str) -> anyhow::Result<()> {
    let contents = read_or_skeleton(path)?;
    let new_block = format!("{GENERAL_HEADING}\n\n{}\n\n", general.trim());

    let next = match contents.find(GENERAL_HEADING) {
        Some(start) => {
            let after = start + GENERAL_HEADING.len();
            // The general section runs until the next top-level heading.
            let rest = &contents[after..];
            let end = rest
                .find("\n#")
                .map(|rel| after + rel + 1)
                .unwrap_or(contents.len());
            format!("{}{}{}", &contents[..start], new_block, &contents[end..])
        }
        None => format!("{new_block}{contents}"),
    };

    write_atomic(path, &next)
}

const AUDIT_MARKER: &str = "<!-- resumidor:audit -->";

/// Appends the audit footer once: model, context length, per-phase output
/// budgets, temperature, and timestamp.
pub fn append_audit_footer(path: &Path, config: &RunConfig) -> anyhow::Result<()> {
    let contents = read_or_skeleton(path)?;
    if contents.contains(AUDIT_MARKER) {
        return Ok(());
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let footer = format!(
        "\n\n---\n\n{AUDIT_MARKER}\n_Modelo: {model} · num_ctx: {ctx} · num_predict: \
{map}/{fuse}/{meta} · temperatura: {temp} · generado: {timestamp}_\n",
        model = config.model,
        ctx = config.num_ctx,
        map = config.num_predict_map,
        fuse = config.num_predict_fuse,
        meta = config.num_predict_meta,
        temp = config.temperature,
    );

    let mut next = contents.trim_end_matches('\n').to_owned();
    next.push('\n');
    next.push_str(&footer);
    write_atomic(path, &next)
}

/// Writes the complete replacement content to a temporary file in the target
/// directory, then atomically renames it over the target. Readers never see a
/// partially-written document.
pub fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("create temp file in: {}", parent.display()))?;
    temp.write_all(contents.as_bytes())
        .with_context(|| format!("write temp file for: {}", path.display()))?;
    temp.flush()
        .with_context(|| format!("flush temp file for: {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("replace output document: {}", path.display()))?;

    Ok(())
}
