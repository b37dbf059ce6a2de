use tracing::debug;

/// Split plain text into segments of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are packed together while they fit.
/// Longer paragraphs are split at sentence boundaries, and sentences that are
/// still too long are split between words.
#[inline]
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = collapse_whitespace(paragraph);
        if paragraph.is_empty() {
            continue;
        }

        if char_len(&paragraph) > max_chars {
            for piece in split_long_paragraph(&paragraph, max_chars) {
                push_piece(&mut segments, &mut current, &piece, max_chars);
            }
        } else {
            push_piece(&mut segments, &mut current, &paragraph, max_chars);
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    debug!(
        "Segmented {} characters into {} segments",
        text.chars().count(),
        segments.len()
    );
    segments
}

fn push_piece(segments: &mut Vec<String>, current: &mut String, piece: &str, max_chars: usize) {
    if !current.is_empty() && char_len(current) + 1 + char_len(piece) > max_chars {
        segments.push(std::mem::take(current));
    }
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(piece);
}

fn split_long_paragraph(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut sentence = String::new();

    for c in paragraph.chars() {
        sentence.push(c);
        if matches!(c, '.' | '!' | '?') {
            pieces.extend(split_long_sentence(sentence.trim(), max_chars));
            sentence.clear();
        }
    }
    if !sentence.trim().is_empty() {
        pieces.extend(split_long_sentence(sentence.trim(), max_chars));
    }

    pieces
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.is_empty() {
        return Vec::new();
    }
    if char_len(sentence) <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && char_len(&current) + 1 + char_len(word) > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if char_len(word) > max_chars {
            // A single word longer than a segment is hard-split
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(max_chars) {
                pieces.push(chunk.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
