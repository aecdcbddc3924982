//! Overlapping text chunker.
//!
//! Splits document text into segments bounded by `chunk_size` characters,
//! preferring paragraph boundaries (`\n\n`) so each chunk stays semantically
//! coherent. Consecutive chunks share `overlap` characters so content
//! straddling a boundary is not silently lost.
//!
//! Empty or whitespace-only input yields an empty sequence; the ingestion
//! manager treats that as a reported failure, never a silent success.

use sha2::{Digest, Sha256};

/// A chunk of a document's text, positioned by its index.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, used for staleness and dedup checks.
    pub hash: String,
}

/// Split text into ordered chunks of at most `chunk_size` characters.
///
/// `overlap` characters are carried between consecutive chunks; it must be
/// smaller than `chunk_size` (larger values are clamped). Returns an empty
/// Vec for input with no extractable content.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    let flush = |buf: &mut String, buf_chars: &mut usize, chunks: &mut Vec<TextChunk>| {
        if !buf.trim().is_empty() {
            chunks.push(make_chunk(chunks.len() as i64, buf.trim()));
        }
        buf.clear();
        *buf_chars = 0;
    };

    for para in trimmed.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_chars = para.chars().count();

        if para_chars > chunk_size {
            // Oversized paragraph: flush the buffer, then window over it.
            flush(&mut buf, &mut buf_chars, &mut chunks);
            for piece in split_windows(para, chunk_size, overlap) {
                chunks.push(make_chunk(chunks.len() as i64, piece.trim()));
            }
            continue;
        }

        let sep = if buf.is_empty() { 0 } else { 2 };
        if buf_chars + sep + para_chars > chunk_size {
            flush(&mut buf, &mut buf_chars, &mut chunks);
            // Seed the next chunk with the tail of the previous one so the
            // boundary is covered, budget permitting.
            if overlap > 0 {
                if let Some(last) = chunks.last() {
                    let tail = tail_chars(&last.text, overlap);
                    if tail.chars().count() + 2 + para_chars <= chunk_size {
                        buf.push_str(tail);
                        buf_chars = tail.chars().count();
                    }
                }
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(para);
        buf_chars += para_chars;
    }

    flush(&mut buf, &mut buf_chars, &mut chunks);
    chunks
}

/// Window an oversized paragraph into pieces of at most `chunk_size` chars,
/// stepping back `overlap` chars between windows. Splits at whitespace when
/// one exists inside the window, always on a char boundary.
fn split_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = boundaries.len() - 1; // number of chars

    let mut pieces = Vec::new();
    let mut start = 0usize; // char offset
    loop {
        let end = (start + chunk_size).min(total);
        let window = &text[boundaries[start]..boundaries[end]];
        if end == total {
            pieces.push(window);
            break;
        }

        // Prefer a whitespace break in the back half of the window.
        let piece = match window.rfind(|c: char| c.is_whitespace()) {
            Some(pos) if pos > window.len() / 2 => &window[..pos],
            _ => window,
        };
        pieces.push(piece);

        let piece_chars = piece.chars().count();
        start += piece_chars.saturating_sub(overlap).max(1);
    }
    pieces
}

/// Last `n` characters of `s`, on a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    let byte = s
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[byte..]
}

fn make_chunk(index: i64, text: &str) -> TextChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    TextChunk {
        index,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}
