
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A piece of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    /// Position of this chunk within its document, starting at 0
    pub chunk_index: u32,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for text chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Overlap size in tokens between adjacent chunks
    pub overlap_size: usize,
    /// Whether to break at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 300,
            max_chunk_size: 500,
            min_chunk_size: 50,
            overlap_size: 30,
            sentence_boundary_splitting: true,
        }
    }
}

/// Split a document's text into embedding-ready chunks, indexed 0..n in order
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let text = text.replace("\r\n", "\n");
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Vec::new();
    }

    let token_count = estimate_token_count(trimmed);
    let splits = if token_count <= config.target_chunk_size {
        vec![trimmed.to_string()]
    } else {
        split_by_semantics(trimmed, config)
    };

    let chunks = splits
        .into_iter()
        .filter(|split| !split.trim().is_empty())
        .map(|split| TextChunk {
            token_count: estimate_token_count(&split),
            content: split,
            chunk_index: 0,
        })
        .collect();

    let processed = post_process_chunks(chunks, config);

    debug!(
        "Chunked {} tokens into {} chunks (avg {} tokens)",
        token_count,
        processed.len(),
        processed.iter().map(|c| c.token_count).sum::<usize>() / processed.len().max(1)
    );

    processed
}

/// Accumulates pieces into splits no larger than the target size
struct SplitBuilder<'a> {
    config: &'a ChunkingConfig,
    splits: Vec<String>,
    current: String,
    current_tokens: usize,
}

impl<'a> SplitBuilder<'a> {
    fn new(config: &'a ChunkingConfig) -> Self {
        Self {
            config,
            splits: Vec::new(),
            current: String::new(),
            current_tokens: 0,
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let tokens = estimate_token_count(piece);

        if self.current_tokens + tokens > self.config.target_chunk_size
            && !self.current.trim().is_empty()
        {
            self.flush();
        }

        self.current.push_str(piece);
        self.current.push_str(separator);
        self.current_tokens += tokens;
    }

    fn flush(&mut self) {
        let split = self.current.trim();
        if !split.is_empty() {
            self.splits.push(split.to_string());
        }
        self.current.clear();
        self.current_tokens = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.splits
    }
}

/// Split text at paragraph boundaries, breaking oversized paragraphs further
fn split_by_semantics(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut builder = SplitBuilder::new(config);

    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if estimate_token_count(paragraph) > config.max_chunk_size {
            let pieces = if config.sentence_boundary_splitting {
                split_by_sentences(paragraph, config)
            } else {
                split_by_words(paragraph, config)
            };

            for piece in pieces {
                builder.push(&piece, "\n\n");
            }
        } else {
            builder.push(paragraph, "\n\n");
        }
    }

    builder.finish()
}

/// Split text into sentences and group them; a single sentence longer than the
/// maximum size is split by words
fn split_by_sentences(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut builder = SplitBuilder::new(config);

    for sentence in sentences(text) {
        if estimate_token_count(&sentence) > config.max_chunk_size {
            for piece in split_by_words(&sentence, config) {
                builder.push(&piece, " ");
            }
        } else {
            builder.push(&sentence, " ");
        }
    }

    builder.finish()
}

/// Sentences of `text`, keeping their terminating punctuation
fn sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());

        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// Split text by words as a last resort
fn split_by_words(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut builder = SplitBuilder::new(config);

    for word in text.split_whitespace() {
        builder.push(word, " ");
    }

    builder.finish()
}

/// Merge undersized chunks into their predecessor, add overlap and assign indexes
fn post_process_chunks(chunks: Vec<TextChunk>, config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut processed: Vec<TextChunk> = Vec::with_capacity(chunks.len());
    let mut pending_merge: Option<TextChunk> = None;

    for chunk in chunks {
        if let Some(mut pending) = pending_merge.take() {
            if chunk.token_count < config.min_chunk_size
                && pending.token_count + chunk.token_count <= config.max_chunk_size
            {
                pending.content.push_str("\n\n");
                pending.content.push_str(&chunk.content);
                pending.token_count += chunk.token_count;
                pending_merge = Some(pending);
                continue;
            }
            processed.push(pending);
        }

        if chunk.token_count < config.min_chunk_size {
            pending_merge = Some(chunk);
        } else {
            processed.push(chunk);
        }
    }

    if let Some(pending) = pending_merge {
        // A trailing fragment joins the previous chunk when it fits
        match processed.last_mut() {
            Some(last) if last.token_count + pending.token_count <= config.max_chunk_size => {
                last.content.push_str("\n\n");
                last.content.push_str(&pending.content);
                last.token_count += pending.token_count;
            }
            _ => processed.push(pending),
        }
    }

    if config.overlap_size > 0 {
        add_overlap(&mut processed, config.overlap_size);
    }

    for (i, chunk) in processed.iter_mut().enumerate() {
        chunk.chunk_index = u32::try_from(i).unwrap_or(u32::MAX);
    }

    processed
}

/// Prefix each chunk with the tail of the chunk before it
fn add_overlap(chunks: &mut [TextChunk], overlap_size: usize) {
    for i in (1..chunks.len()).rev() {
        let overlap_text = extract_overlap_text(&chunks[i - 1].content, overlap_size);
        if !overlap_text.is_empty() {
            let current = &mut chunks[i];
            current.content = format!("{}\n\n{}", overlap_text, current.content);
            current.token_count += estimate_token_count(&overlap_text);
        }
    }
}

/// Extract overlap text from the end of a chunk
fn extract_overlap_text(content: &str, overlap_tokens: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = (overlap_tokens as f64 * 0.75) as usize;

    if word_count == 0 || words.len() <= word_count {
        return String::new();
    }

    words[words.len() - word_count..].join(" ")
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
