use sha2::{ Digest, Sha256 };

/// Fragments shorter than this merge into the previous chunk instead of
/// standing alone.
const MIN_CHUNK_CHARS: usize = 40;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: u32,
    pub text: String,
}

/// Chunk ids embed a content hash so re-chunked text never collides with
/// stale vectors from an earlier version of the same source.
pub fn chunk_id(source_id: &str, index: u32, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{}:{:03}:{}", source_id, index, &hex::encode(digest)[..8])
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits transcript text into sentence-like units. A unit ends after
/// `.`, `!` or `?` followed by whitespace, or at a line break.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
            continue;
        }

        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = match chars.peek() {
                Some(next) => next.is_whitespace(),
                None => true,
            };
            if boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Hard split for a single sentence that exceeds the chunk size on its own.
fn split_oversized(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect::<String>().trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Greedy sentence packing with trailing-sentence overlap between
/// consecutive chunks.
pub fn split_into_chunks(text: &str, config: &ChunkerConfig) -> Vec<TextChunk> {
    let normalized = text.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    let mut units = Vec::new();
    for sentence in split_sentences(&normalized) {
        if char_len(&sentence) > config.max_chars {
            units.extend(split_oversized(&sentence, config.max_chars));
        } else {
            units.push(sentence);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for unit in units {
        let unit_len = char_len(&unit);
        let joined_len = if current.is_empty() { unit_len } else { current_len + 1 + unit_len };

        if joined_len > config.max_chars && !current.is_empty() {
            chunks.push(current.join(" "));

            // Seed the next chunk with the tail of this one. The budget is
            // capped so the overlap plus the incoming sentence still fits.
            let budget = config.overlap_chars
                .min(config.max_chars / 2)
                .min(config.max_chars.saturating_sub(unit_len + 1));
            let mut overlap: Vec<String> = Vec::new();
            let mut overlap_len = 0usize;
            for sentence in current.iter().rev() {
                let len = char_len(sentence);
                let needed = if overlap.is_empty() { len } else { overlap_len + 1 + len };
                if needed > budget {
                    break;
                }
                overlap.push(sentence.clone());
                overlap_len = needed;
            }
            overlap.reverse();

            current = overlap;
            current_len = overlap_len;
        }

        current_len = if current.is_empty() { unit_len } else { current_len + 1 + unit_len };
        current.push(unit);
    }

    if !current.is_empty() {
        let last = current.join(" ");
        match chunks.last_mut() {
            Some(previous) if char_len(&last) < MIN_CHUNK_CHARS => {
                previous.push(' ');
                previous.push_str(&last);
            }
            _ => chunks.push(last),
        }
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index: index as u32, text })
        .collect()
}
