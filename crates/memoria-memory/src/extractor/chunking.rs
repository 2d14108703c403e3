// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting long input into chunks of at most `chunk_size` characters.
//!
//! Paragraphs are packed first. A paragraph that alone exceeds the limit
//! is split into sentences (and lines), and a sentence that still exceeds
//! it is hard-split on character boundaries.

use crate::text::split_sentences;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks no longer than `chunk_size` characters.
///
/// Text within the limit is returned as a single chunk. Blank input
/// yields no chunks.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }
    let chunk_size = chunk_size.max(1);
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) <= chunk_size {
            pieces.push(paragraph.to_string());
            continue;
        }
        let sentences: Vec<String> = split_sentences(paragraph)
            .into_iter()
            .flat_map(|sentence| hard_split(sentence, chunk_size))
            .collect();
        pieces.extend(pack(sentences, " ", chunk_size));
    }
    pack(pieces, "\n\n", chunk_size)
}

/// Greedily join pieces with `sep` while the result stays within the limit.
fn pack(pieces: Vec<String>, sep: &str, chunk_size: usize) -> Vec<String> {
    let sep_len = char_len(sep);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for piece in pieces {
        let piece_len = char_len(&piece);
        if current.is_empty() {
            current = piece;
            current_len = piece_len;
        } else if current_len + sep_len + piece_len <= chunk_size {
            current.push_str(sep);
            current.push_str(&piece);
            current_len += sep_len + piece_len;
        } else {
            chunks.push(std::mem::replace(&mut current, piece));
            current_len = piece_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split on character boundaries into pieces of at most `chunk_size` characters.
fn hard_split(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}
