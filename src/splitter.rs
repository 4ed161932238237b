use regex::Regex;
use std::sync::LazyLock;
use text_splitter::{ChunkConfig, TextSplitter};
use tokenizers::tokenizer::Tokenizer;

// A sentence ends at terminal punctuation followed by whitespace.
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"));

pub enum Chunker {
    Sentences { max_chars: usize },
    Tokens { tokenizer: Tokenizer, max_tokens: usize },
}

impl Chunker {
    pub fn split(&self, text: &str) -> Vec<String> {
        match self {
            Chunker::Sentences { max_chars } => split_into_chunks(text, *max_chars),
            Chunker::Tokens {
                tokenizer,
                max_tokens,
            } => split_by_tokens(text, tokenizer, *max_tokens),
        }
    }
}

/// Greedily packs whole sentences into chunks of at most `max_chunk_size` characters.
pub fn split_into_chunks(text: &str, max_chunk_size: usize) -> Vec<String> {
    let max = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        for piece in fit_to_limit(sentence, max) {
            let piece_len = piece.chars().count();
            if current.is_empty() {
                current = piece;
                current_len = piece_len;
            } else if current_len + 1 + piece_len <= max {
                current.push(' ');
                current.push_str(&piece);
                current_len += 1 + piece_len;
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
                current_len = piece_len;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn split_by_tokens(text: &str, tokenizer: &Tokenizer, max_tokens: usize) -> Vec<String> {
    let splitter = TextSplitter::new(ChunkConfig::new(max_tokens).with_sizer(tokenizer));
    splitter.chunks(text).map(|s| s.to_string()).collect()
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // the punctuation is a single ASCII byte
        pieces.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    pieces.push(&text[start..]);
    pieces.into_iter().map(str::trim).filter(|s| !s.is_empty())
}

// Breaks a sentence longer than `max` characters on whitespace, falling back to
// character boundaries for words that are themselves too long.
fn fit_to_limit(sentence: &str, max: usize) -> Vec<String> {
    if sentence.chars().count() <= max {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max) {
                pieces.push(part.iter().collect());
            }
        } else if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            pieces.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
