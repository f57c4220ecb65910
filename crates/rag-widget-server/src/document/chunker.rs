use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use super::tokenizer;

/// Words that end with a period without terminating a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "fig", "no", "inc", "ltd",
    "dept", "est", "approx", "col", "gen", "rev", "hon", "jan", "feb", "mar", "apr", "jun", "jul",
    "aug", "sep", "sept", "oct", "nov", "dec",
];

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub target_tokens: usize,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            min_tokens: 100,
            max_tokens: 1200,
            overlap_tokens: 100,
        }
    }
}

/// One chunk of source text, ready for embedding and persistence.
/// `char_start..char_end` is the untruncated character range in the original
/// text, including the overlap tail carried over from the previous chunk.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub index: usize,
    pub excerpt: String,
    pub heading: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
    pub tokens_estimate: usize,
}

#[derive(Debug, Clone)]
struct SentenceSpan {
    text: String,
    char_start: usize,
    char_end: usize,
    tokens: usize,
}

pub struct TextChunker {
    config: ChunkerConfig,
    counting_model: String,
}

impl TextChunker {
    pub fn new() -> Self {
        Self::with_config(ChunkerConfig::default())
    }

    pub fn with_config(config: ChunkerConfig) -> Self {
        Self {
            config,
            counting_model: "gpt-4".to_string(),
        }
    }

    /// Split `text` into overlapping, sentence-aligned chunks.
    /// Empty input yields no chunks; the caller treats that as a parse failure.
    pub fn chunk(&self, text: &str, title: Option<&str>, url: Option<&str>) -> Vec<ChunkPiece> {
        let sentences = self.split_sentences(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut packs: Vec<Vec<SentenceSpan>> = Vec::new();
        let mut current: Vec<SentenceSpan> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in sentences {
            if current.is_empty() {
                current_tokens = sentence.tokens;
                current.push(sentence);
                continue;
            }

            let would_be = current_tokens + sentence.tokens;
            let past_target = would_be > self.config.target_tokens
                && current_tokens >= self.config.min_tokens;
            let past_max = would_be > self.config.max_tokens;

            if past_target || past_max {
                let tail = self.overlap_tail(&current);
                packs.push(std::mem::take(&mut current));
                current_tokens = tail.iter().map(|s| s.tokens).sum::<usize>() + sentence.tokens;
                current = tail;
                current.push(sentence);
            } else {
                current_tokens = would_be;
                current.push(sentence);
            }
        }

        if !current.is_empty() {
            packs.push(current);
        }

        let chunks: Vec<ChunkPiece> = packs
            .into_iter()
            .enumerate()
            .map(|(index, pack)| self.build_piece(index, text, &pack, title, url))
            .collect();

        debug!(chunks = chunks.len(), "chunked text");
        chunks
    }

    /// Trailing sentences of the previous pack, up to the overlap budget.
    fn overlap_tail(&self, pack: &[SentenceSpan]) -> Vec<SentenceSpan> {
        let mut tail: Vec<SentenceSpan> = Vec::new();
        let mut tokens = 0usize;

        for sentence in pack.iter().rev() {
            if tokens + sentence.tokens > self.config.overlap_tokens {
                break;
            }
            tokens += sentence.tokens;
            tail.push(sentence.clone());
        }

        tail.reverse();
        tail
    }

    fn build_piece(
        &self,
        index: usize,
        text: &str,
        pack: &[SentenceSpan],
        title: Option<&str>,
        url: Option<&str>,
    ) -> ChunkPiece {
        let char_start = pack.first().map(|s| s.char_start).unwrap_or(0);
        let char_end = pack.last().map(|s| s.char_end).unwrap_or(0);

        // Sentences in a pack are contiguous in the source (the overlap tail
        // directly precedes the new sentences), so the excerpt is a plain
        // slice; this keeps line structure intact for heading detection.
        let excerpt: String = text
            .chars()
            .skip(char_start)
            .take(char_end.saturating_sub(char_start))
            .collect();

        let tokens_estimate = tokenizer::count_tokens(&excerpt, &self.counting_model);
        let heading = extract_heading(&excerpt, title, url);

        ChunkPiece {
            index,
            heading,
            char_start,
            char_end,
            tokens_estimate,
            excerpt,
        }
    }

    /// Sentence segmentation: UAX#29 sentence boundaries, then a merge pass
    /// that glues segments back together after abbreviations and initials
    /// ("Dr. Smith", "J. R. Tolkien"). Newlines still force a break so
    /// heading lines stay intact.
    fn split_sentences(&self, text: &str) -> Vec<SentenceSpan> {
        let mut spans: Vec<SentenceSpan> = Vec::new();
        let mut char_pos = 0usize;
        let mut prev_ended_with_newline = true;

        for (_, segment) in text.split_sentence_bound_indices() {
            let segment_chars = segment.chars().count();
            let trimmed = segment.trim();

            if trimmed.is_empty() {
                prev_ended_with_newline =
                    prev_ended_with_newline || segment.contains('\n');
                char_pos += segment_chars;
                continue;
            }

            let leading = &segment[..segment.len() - segment.trim_start().len()];
            let char_start = char_pos + leading.chars().count();
            let char_end = char_pos + segment.trim_end().chars().count();
            let trailing = &segment[segment.trim_end().len()..];

            let merge = !prev_ended_with_newline
                && spans
                    .last()
                    .is_some_and(|prev| ends_with_abbreviation(&prev.text));

            if merge {
                let prev = spans.last_mut().unwrap();
                prev.text.push(' ');
                prev.text.push_str(trimmed);
                prev.char_end = char_end;
                prev.tokens = tokenizer::count_tokens(&prev.text, &self.counting_model);
            } else {
                spans.push(SentenceSpan {
                    text: trimmed.to_string(),
                    char_start,
                    char_end,
                    tokens: tokenizer::count_tokens(trimmed, &self.counting_model),
                });
            }

            prev_ended_with_newline = trailing.contains('\n');
            char_pos += segment_chars;
        }

        spans
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// A segment ending in a known abbreviation or a single initial ("J.") did
/// not really terminate its sentence.
fn ends_with_abbreviation(text: &str) -> bool {
    let Some(body) = text.trim_end().strip_suffix('.') else {
        return false;
    };
    let word: String = body
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    if word.is_empty() {
        return false;
    }
    if word.chars().count() == 1 {
        return true;
    }
    ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

fn extract_heading(excerpt: &str, title: Option<&str>, url: Option<&str>) -> Option<String> {
    for line in excerpt.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('#') {
            let heading = stripped.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return Some(heading.to_string());
            }
        }
        if line.len() <= 80
            && line.chars().any(|c| c.is_alphabetic())
            && !line.chars().any(|c| c.is_lowercase())
        {
            return Some(line.to_string());
        }
    }

    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        return Some(title.trim().to_string());
    }

    if let Some(url) = url {
        let segment = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
            .trim();
        if !segment.is_empty() && !segment.contains(':') {
            return Some(segment.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = TextChunker::new();
        assert!(chunker.chunk("", None, None).is_empty());
        assert!(chunker.chunk("   \n  ", None, None).is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunker = TextChunker::new();
        let chunks = chunker.chunk("One sentence only.", None, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].excerpt, "One sentence only.");
        assert!(chunks[0].tokens_estimate > 0);
    }

    #[test]
    fn abbreviations_do_not_split_sentences() {
        let chunker = TextChunker::new();
        let spans = chunker.split_sentences("Dr. Smith went home. He slept well.");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Dr. Smith went home.");
    }

    #[test]
    fn initials_do_not_split_sentences() {
        let chunker = TextChunker::new();
        let spans = chunker.split_sentences("J. R. Tolkien wrote books. They sold well.");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn decimals_do_not_split_sentences() {
        let chunker = TextChunker::new();
        let spans = chunker.split_sentences("Pi is roughly 3.14 in value. Tau is larger.");
        assert_eq!(spans.len(), 2);
        assert!(spans[0].text.contains("3.14"));
    }

    #[test]
    fn repeated_text_chunks_with_dense_indexes_and_overlap() {
        let chunker = TextChunker::new();
        let text = "Alpha is the first letter. Beta follows alpha closely. Gamma is third. "
            .repeat(400);
        let chunks = chunker.chunk(&text, None, None);

        assert!(chunks.len() >= 4, "expected several chunks, got {}", chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.tokens_estimate <= 1300, "chunk grossly over max");
        }
        // Overlap: each later chunk starts before the previous one ends.
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end);
            assert!(pair[1].char_start > pair[0].char_start);
        }
    }

    #[test]
    fn oversized_single_sentence_is_emitted_whole() {
        let chunker = TextChunker::with_config(ChunkerConfig {
            target_tokens: 20,
            min_tokens: 5,
            max_tokens: 30,
            overlap_tokens: 5,
        });
        let giant = format!("{} end.", "word ".repeat(200));
        let chunks = chunker.chunk(&giant, None, None);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].tokens_estimate > 30);
    }

    #[test]
    fn markdown_heading_wins() {
        let heading = extract_heading("# Getting Started\nSome body text.", Some("Title"), None);
        assert_eq!(heading.as_deref(), Some("Getting Started"));
    }

    #[test]
    fn all_caps_line_is_a_heading() {
        let heading = extract_heading("CHAPTER ONE\nIt was a dark night.", None, None);
        assert_eq!(heading.as_deref(), Some("CHAPTER ONE"));
    }

    #[test]
    fn title_then_url_fallbacks() {
        let heading = extract_heading("plain body text here.", Some("Page Title"), None);
        assert_eq!(heading.as_deref(), Some("Page Title"));

        let heading = extract_heading(
            "plain body text here.",
            None,
            Some("https://example.com/docs/getting-started"),
        );
        assert_eq!(heading.as_deref(), Some("getting-started"));

        assert_eq!(extract_heading("plain body text here.", None, None), None);
    }
}
