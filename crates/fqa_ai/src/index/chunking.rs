use fqa_core::domain::OffsetRange;

/// Upper bound on chunk length in bytes. Longer paragraphs are split.
pub const MAX_CHUNK_CHARS: usize = 1600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub ordinal: u32,
    pub text: String,
    pub offset_range: OffsetRange,
}

pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let seg = &text[start..end];
    let lead = seg.len() - seg.trim_start().len();
    let trimmed = seg.trim();
    if !trimmed.is_empty() {
        let s = start + lead;
        out.push((s, s + trimmed.len()));
    }
}

/// Byte ranges of blank-line separated paragraphs, trimmed.
fn paragraph_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (sep, _) in text.match_indices("\n\n") {
        if sep >= start {
            push_trimmed(text, start, sep, &mut out);
            start = sep + 2;
        }
    }
    push_trimmed(text, start, text.len(), &mut out);
    out
}

/// Push `text[start..end]` as trimmed pieces of at most `max` bytes, cutting at the last
/// whitespace of each window or at a char boundary when the window has none.
fn split_long(text: &str, start: usize, end: usize, max: usize, out: &mut Vec<(usize, usize)>) {
    let mut s = start;
    while end - s > max {
        let mut cut = s + max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(ws) = text[s..cut].rfind(char::is_whitespace) {
            if ws > 0 {
                cut = s + ws;
            }
        }
        if cut == s {
            cut += text[s..].chars().next().map_or(1, char::len_utf8);
        }
        push_trimmed(text, s, cut, out);
        s = cut;
    }
    push_trimmed(text, s, end, out);
}

fn to_u32(v: usize) -> u32 {
    v.min(u32::MAX as usize) as u32
}

/// Group paragraphs of already-normalised `text` into chunks of at most `max_chars`.
///
/// Offsets index into `text`; each chunk's text is exactly `text[start..end]`.
pub fn chunk_by_paragraphs(text: &str, max_chars: usize) -> Vec<ChunkSpan> {
    let mut out = Vec::new();
    let mut ordinal = 0u32;
    let mut current: Option<(usize, usize)> = None;

    let flush = |range: (usize, usize), ordinal: &mut u32, out: &mut Vec<ChunkSpan>| {
        out.push(ChunkSpan {
            ordinal: *ordinal,
            text: text[range.0..range.1].to_string(),
            offset_range: OffsetRange {
                start: to_u32(range.0),
                end: to_u32(range.1),
            },
        });
        *ordinal += 1;
    };

    let mut pieces = Vec::new();
    for (p_start, p_end) in paragraph_ranges(text) {
        split_long(text, p_start, p_end, max_chars, &mut pieces);
    }

    for (p_start, p_end) in pieces {
        current = match current {
            None => Some((p_start, p_end)),
            Some((c_start, c_end)) if p_end - c_start > max_chars => {
                flush((c_start, c_end), &mut ordinal, &mut out);
                Some((p_start, p_end))
            }
            Some((c_start, _)) => Some((c_start, p_end)),
        };
    }
    if let Some(range) = current {
        flush(range, &mut ordinal, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_slice_back_to_chunk_text() {
        let text = normalize_text("Revenue rose.\r\n\r\n\r\nAssets grew.\n\n  Debt fell.  ");
        let chunks = chunk_by_paragraphs(&text, 26);
        assert_eq!(chunks.len(), 2);
        for c in chunks.iter() {
            let r = c.offset_range;
            assert_eq!(&text[r.start as usize..r.end as usize], c.text);
        }
        assert_eq!(chunks[0].text, "Revenue rose.");
        assert!(chunks[1].text.starts_with("Assets grew."));
        assert!(chunks[1].text.ends_with("Debt fell."));
        assert_eq!(chunks[1].ordinal, 1);
    }

    fn assert_slices_back(text: &str, chunks: &[ChunkSpan], max: usize) {
        for c in chunks {
            let r = c.offset_range;
            assert_eq!(&text[r.start as usize..r.end as usize], c.text);
            assert!(c.text.len() <= max, "chunk of {} bytes", c.text.len());
        }
    }

    #[test]
    fn long_paragraph_is_split_at_the_limit() {
        let para = "x".repeat(2000);
        let chunks = chunk_by_paragraphs(&para, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.len(), 1600);
        assert_eq!(chunks[1].text.len(), 400);
        assert_eq!(chunks[1].ordinal, 1);
        assert_slices_back(&para, &chunks, MAX_CHUNK_CHARS);
    }

    #[test]
    fn long_paragraph_splits_between_words() {
        let para = "revenue ".repeat(500);
        let para = para.trim_end();
        let chunks = chunk_by_paragraphs(para, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 3);
        for c in chunks.iter() {
            assert!(c.text.starts_with("revenue") && c.text.ends_with("revenue"));
        }
        assert_slices_back(para, &chunks, MAX_CHUNK_CHARS);
    }

    #[test]
    fn split_never_lands_inside_a_character() {
        // 3-byte characters: 1600 is not a boundary.
        let para = "€".repeat(700);
        let chunks = chunk_by_paragraphs(&para, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.len(), 1599);
        assert_slices_back(&para, &chunks, MAX_CHUNK_CHARS);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_by_paragraphs("\n\n  \n", MAX_CHUNK_CHARS).is_empty());
    }
}
