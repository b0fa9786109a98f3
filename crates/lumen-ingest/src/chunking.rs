//! Text chunking with overlap.
//!
//! Text is split recursively on paragraph, line, sentence and word
//! boundaries into windows no longer than the body budget, then each window
//! after the first is prefixed with the tail of its predecessor. Sizes are
//! measured in characters, never bytes, so multi-byte text is never cut
//! inside a code point.

use once_cell::sync::Lazy;
use regex::Regex;

/// `(split on, rejoin with)`, coarsest first.
const SEPARATORS: &[(&str, &str)] = &[("\n\n", "\n\n"), ("\n", "\n"), (". ", " "), (" ", " ")];

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters, consecutive
/// chunks sharing up to `chunk_overlap` characters.
///
/// Pure and deterministic. Empty or whitespace-only input yields no chunks.
/// An overlap that leaves no room for new text is reduced to zero.
pub fn create_chunks(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let unified = text.replace("\r\n", "\n");
    let normalized = EXCESS_NEWLINES.replace_all(&unified, "\n\n");
    let text = normalized.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    // One extra char for the space joining the overlap tail to the body.
    let overlap = if chunk_overlap + 1 < chunk_size {
        chunk_overlap
    } else {
        0
    };
    let body_size = if overlap > 0 {
        chunk_size - overlap - 1
    } else {
        chunk_size
    };

    let bodies = split_recursive(text, body_size, SEPARATORS);
    if overlap == 0 {
        return bodies;
    }

    let mut chunks = Vec::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        match i.checked_sub(1).map(|p| overlap_tail(&bodies[p], overlap)) {
            Some(tail) if !tail.is_empty() => chunks.push(format!("{} {}", tail, body)),
            _ => chunks.push(body.clone()),
        }
    }
    chunks
}

/// The last `max_chars` characters of `s`, starting on a word boundary when one exists.
fn overlap_tail(s: &str, max_chars: usize) -> &str {
    let total = char_len(s);
    if total <= max_chars {
        return s;
    }
    let start = s
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &s[start..];
    let cut_mid_word = !s[..start].ends_with(char::is_whitespace);
    match tail.find(char::is_whitespace) {
        Some(ws) if cut_mid_word => tail[ws..].trim_start(),
        _ => tail.trim_start(),
    }
}

fn split_recursive(text: &str, max_chars: usize, separators: &[(&str, &str)]) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }
    let Some(((sep, joiner), rest)) = separators.split_first() else {
        return hard_split(text, max_chars);
    };

    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let joiner_len = char_len(joiner);

    for part in text.split_inclusive(sep) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let part_len = char_len(part);

        if part_len > max_chars {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            out.extend(split_recursive(part, max_chars, rest));
            continue;
        }

        if current.is_empty() {
            current.push_str(part);
            current_len = part_len;
        } else if current_len + joiner_len + part_len <= max_chars {
            current.push_str(joiner);
            current.push_str(part);
            current_len += joiner_len + part_len;
        } else {
            out.push(std::mem::replace(&mut current, part.to_string()));
            current_len = part_len;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Fixed-width split for text with no usable separator (e.g. one very long token).
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Rust is a systems programming language. It guarantees memory safety \
        without a garbage collector. Ownership rules are checked at compile time.\n\n\
        Cargo is the package manager. It builds code, downloads dependencies, and runs tests.\n\n\
        Crates are published to crates.io. Anyone can depend on them with one line.";

    #[test]
    fn test_short_text_single_chunk() {
        assert_eq!(create_chunks("  Hello, world!  ", 500, 50), vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(create_chunks("", 500, 50).is_empty());
        assert!(create_chunks(" \n\n\t ", 500, 50).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        for (size, overlap) in [(60, 0), (60, 15), (120, 30), (25, 24)] {
            let chunks = create_chunks(SAMPLE, size, overlap);
            assert!(chunks.len() > 1);
            for c in &chunks {
                assert!(char_len(c) <= size, "{:?} exceeds {}", c, size);
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = create_chunks(SAMPLE, 80, 20);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "{:?} does not carry over into {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_zero_overlap_loses_no_words() {
        let chunks = create_chunks(SAMPLE, 70, 0);
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        let original: Vec<&str> = SAMPLE.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(create_chunks(SAMPLE, 90, 25), create_chunks(SAMPLE, 90, 25));
    }

    #[test]
    fn test_long_token_and_multibyte() {
        let text = "é".repeat(25);
        let chunks = create_chunks(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(char_len(&chunks[2]), 5);
    }
}
