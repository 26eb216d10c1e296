//! # Quarry Chunker
//!
//! Deterministic text windowing for embedding. A file's content is cut into
//! overlapping character windows; consecutive windows share `overlap`
//! characters so that semantic matches near a boundary are not lost. The
//! chunker is pure: the same input always yields the same chunks.

use serde::{Deserialize, Serialize};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default number of characters shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 50;
/// Default byte cap applied before windowing.
pub const DEFAULT_MAX_FILE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Clamped below
    /// `chunk_size` at construction.
    pub overlap: usize,
    /// Files larger than this are truncated at a UTF-8 boundary.
    pub max_file_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
        .normalized()
    }

    fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        if self.overlap >= self.chunk_size {
            self.overlap = self.chunk_size - 1;
        }
        self
    }
}

/// One window of a file's text. The chunk id used by the vector backend is
/// `"{file_path}:{index}"`, see [`chunk_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Wire-level chunk id: `"{file_path}:{chunk_index}"`.
#[must_use]
pub fn chunk_id(file_path: &str, index: usize) -> String {
    format!("{file_path}:{index}")
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Decode raw bytes (lossy), apply the byte cap at a UTF-8 boundary, and
    /// window the result.
    #[must_use]
    pub fn chunk_bytes(&self, bytes: &[u8]) -> Vec<Chunk> {
        self.chunk_str(&decode_capped(bytes, self.config.max_file_bytes))
    }

    /// Window already-decoded text. Empty input yields zero chunks.
    #[must_use]
    pub fn chunk_str(&self, content: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, plus the end sentinel.
        let mut boundaries: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
        boundaries.push(content.len());
        let n_chars = boundaries.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;
        loop {
            let end = (start + self.config.chunk_size).min(n_chars);
            let text = content[boundaries[start]..boundaries[end]].to_string();
            chunks.push(Chunk { index, text });

            if end == n_chars {
                break;
            }
            index += 1;
            start = end - self.config.overlap;
        }

        chunks
    }
}

/// Lossily decode `bytes` after capping them at `max_bytes`. The cap steps
/// back to a UTF-8 boundary; both index writers feed files through this so
/// the lexical document and the embedded chunks see identical text.
#[must_use]
pub fn decode_capped(bytes: &[u8], max_bytes: usize) -> String {
    String::from_utf8_lossy(truncate_at_char_boundary_bytes(bytes, max_bytes)).into_owned()
}

/// Truncate `bytes` to at most `max_bytes`, stepping back to a UTF-8
/// character boundary so lossy decoding does not invent a replacement
/// character at the cut.
fn truncate_at_char_boundary_bytes(bytes: &[u8], max_bytes: usize) -> &[u8] {
    if bytes.len() <= max_bytes {
        return bytes;
    }
    let mut end = max_bytes;
    // A UTF-8 continuation byte is 0b10xx_xxxx.
    while end > 0 && bytes[end] & 0b1100_0000 == 0b1000_0000 {
        end -= 1;
    }
    &bytes[..end]
}
