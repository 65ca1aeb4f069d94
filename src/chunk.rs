use crate::book::Block;

/// Fast token estimate: one token per four bytes of text.
pub fn approx_token_count(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Splits `text` after sentence-ending punctuation (`.`, `!`, `?`, `…`)
/// followed by whitespace. Returns the whole text as one sentence when no
/// boundary is found.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut prev_end: Option<char> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() && matches!(prev_end, Some('.' | '!' | '?' | '…')) {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_owned());
            }
            start = idx + ch.len_utf8();
        }
        if !ch.is_whitespace() {
            prev_end = Some(ch);
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .flat_map(|p| p.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Paragraphs form the chunking units; a paragraph over the block budget is
/// split further at sentence boundaries so blocks never cut mid-sentence.
fn split_units(text: &str, max_tokens: usize) -> Vec<String> {
    let mut units = Vec::new();
    for paragraph in split_paragraphs(text) {
        if approx_token_count(paragraph) <= max_tokens {
            units.push(paragraph.to_owned());
            continue;
        }

        let mut current = String::new();
        for sentence in split_sentences(paragraph) {
            let tokens = approx_token_count(&sentence);
            if !current.is_empty()
                && approx_token_count(&current) + tokens > max_tokens
            {
                units.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
        }
        if !current.is_empty() {
            units.push(current);
        }
    }
    units
}

/// Splits one chapter into bounded blocks of at most `max_tokens` (estimated),
/// each block after the first prefixed with roughly `overlap_tokens` of the
/// previous block's trailing text. Deterministic: identical input and
/// parameters yield identical blocks.
pub fn chunk_chapter(
    chapter_id: usize,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Block> {
    let units = split_units(text, max_tokens);

    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut current_overlap_len = 0usize;

    for unit in units {
        let tokens = approx_token_count(&unit);
        if current_tokens + tokens > max_tokens && !current.is_empty() {
            // Carry trailing units into the next block as overlap.
            let mut overlap: Vec<String> = Vec::new();
            if overlap_tokens > 0 {
                let mut overlap_token_total = 0usize;
                for carried in current.iter().rev() {
                    overlap_token_total += approx_token_count(carried);
                    overlap.push(carried.clone());
                    if overlap_token_total >= overlap_tokens {
                        break;
                    }
                }
                overlap.reverse();
            }

            push_block(&mut blocks, chapter_id, &current, current_overlap_len);

            current_overlap_len = if overlap.is_empty() {
                0
            } else {
                overlap.iter().map(String::len).sum::<usize>() + 2 * (overlap.len() - 1)
            };
            current_tokens = overlap.iter().map(|u| approx_token_count(u)).sum();
            current = overlap;
        }
        current.push(unit);
        current_tokens += tokens;
    }

    push_block(&mut blocks, chapter_id, &current, current_overlap_len);

    blocks
}

fn push_block(blocks: &mut Vec<Block>, chapter_id: usize, units: &[String], overlap_len: usize) {
    if units.is_empty() {
        return;
    }
    let text = units.join("\n\n");
    blocks.push(Block {
        chapter_id,
        index: blocks.len(),
        approx_tokens: approx_token_count(&text),
        overlap_len,
        text,
    });
}
