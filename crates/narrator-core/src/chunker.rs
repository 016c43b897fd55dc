//! Utterance-sized chunking of plain text.
//!
//! Speech backends handle long requests poorly, so plain text is cut into
//! chunks of at most `max_chars` chars. Cuts prefer sentence boundaries; a
//! single sentence longer than the bound is kept whole.

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1200;

/// Lightweight sentence splitter: a fragment ends at `.`, `!` or `?` when
/// whitespace follows. Fragments are trimmed and never empty.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') && chars.peek().is_some_and(|next| next.is_whitespace())
        {
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            push_fragment(&mut sentences, &mut current);
        }
    }
    push_fragment(&mut sentences, &mut current);

    sentences
}

fn push_fragment(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Greedily pack sentence fragments into chunks of at most `max_chars`.
///
/// Joining the result with single spaces reproduces `text` when `text` is
/// already whitespace-collapsed. Non-empty input never yields an empty list.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    for fragment in split_sentences(text) {
        let fragment_len = fragment.chars().count();
        if !buffer.is_empty() && buffer_len + 1 + fragment_len > max_chars {
            chunks.push(buffer.trim().to_string());
            buffer.clear();
            buffer_len = 0;
        }

        if buffer.is_empty() {
            buffer.push_str(&fragment);
            buffer_len = fragment_len;
        } else {
            buffer.push(' ');
            buffer.push_str(&fragment);
            buffer_len += 1 + fragment_len;
        }
    }

    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }

    if chunks.is_empty() && !text.trim().is_empty() {
        chunks.push(text.trim().to_string());
    }

    chunks
}

/// Char position where each chunk starts in the space-joined text.
pub fn chunk_starts(chunks: &[String]) -> Vec<usize> {
    let mut starts = Vec::with_capacity(chunks.len());
    let mut cursor = 0usize;
    for chunk in chunks {
        starts.push(cursor);
        cursor += chunk.chars().count() + 1;
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(words: usize, tag: char) -> String {
        let mut out = vec![tag.to_string().repeat(4); words].join(" ");
        out.push('.');
        out
    }

    #[test]
    fn splits_after_terminal_punctuation_followed_by_space() {
        let fragments = split_sentences("One. Two! Three? Four 3.5 stays. Tail");
        assert_eq!(
            fragments,
            vec!["One.", "Two!", "Three?", "Four 3.5 stays.", "Tail"]
        );
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("Hello there. General Kenobi.", DEFAULT_MAX_CHUNK_CHARS);
        assert_eq!(chunks, vec!["Hello there. General Kenobi."]);
    }

    #[test]
    fn chunks_respect_bound_and_rejoin_to_source() {
        let text = (0..60)
            .map(|idx| sentence(8, char::from(b'a' + (idx % 26) as u8)))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 200);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 200));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn oversized_sentence_stays_whole() {
        let long = sentence(400, 'x');
        let text = format!("Short one. {long} After.");
        let chunks = chunk_text(&text, DEFAULT_MAX_CHUNK_CHARS);

        assert_eq!(chunks, vec!["Short one.".to_string(), long, "After.".to_string()]);
        assert!(chunks[1].chars().count() > DEFAULT_MAX_CHUNK_CHARS);
    }

    #[test]
    fn text_without_boundaries_is_one_chunk() {
        let chunks = chunk_text("no punctuation at all here", 10);
        assert_eq!(chunks, vec!["no punctuation at all here"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   ", DEFAULT_MAX_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn chunk_starts_account_for_join_separator() {
        let chunks = vec!["ab.".to_string(), "cde.".to_string(), "f".to_string()];
        assert_eq!(chunk_starts(&chunks), vec![0, 4, 9]);
    }
}
