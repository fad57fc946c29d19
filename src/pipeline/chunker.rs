//! Assembles streamed generation fragments into speakable chunks.
//!
//! Backends emit fragments at whatever granularity they like (often single
//! tokens). The assembler buffers them and flushes a chunk downstream when
//! enough complete words have accumulated, when a sentence ends, or when the
//! buffer hits a byte ceiling. Applied inside the generation stage so a
//! backend with odd fragmentation still yields sane chunks.

use crate::defaults;

/// Flush rules for the chunk assembler.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Completed words that trigger a flush.
    pub words_per_chunk: usize,
    /// Buffer size that forces a flush, even mid-word.
    pub max_chunk_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            words_per_chunk: defaults::WORDS_PER_CHUNK,
            max_chunk_bytes: defaults::MAX_CHUNK_BYTES,
        }
    }
}

/// Streaming word/sentence chunk assembler.
///
/// A word boundary is any transition from a word byte (alphanumeric,
/// apostrophe, or any non-ASCII byte) to whitespace or `,;:.!?`. A flush on
/// a sentence terminator resets the in-word state; a byte-ceiling flush
/// mid-word keeps it, so the continuation still counts as the same word.
pub struct ChunkAssembler {
    config: ChunkerConfig,
    buffer: String,
    word_count: usize,
    in_word: bool,
}

impl ChunkAssembler {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            word_count: 0,
            in_word: false,
        }
    }

    /// Feed one backend fragment, emitting zero or one chunk.
    pub fn feed(&mut self, fragment: &str, emit: &mut dyn FnMut(String)) {
        if fragment.is_empty() {
            return;
        }

        self.buffer.push_str(fragment);

        for &byte in fragment.as_bytes() {
            let is_word_byte =
                byte.is_ascii_alphanumeric() || byte == b'\'' || byte >= 0x80;
            let is_boundary_byte = byte.is_ascii_whitespace()
                || matches!(byte, b'.' | b'!' | b'?' | b',' | b';' | b':');

            if is_word_byte {
                self.in_word = true;
            } else if self.in_word && is_boundary_byte {
                self.word_count += 1;
                self.in_word = false;
            }
        }

        let sentence_ended = fragment.contains(['.', '!', '?']);

        if self.word_count >= self.config.words_per_chunk
            || sentence_ended
            || self.buffer.len() >= self.config.max_chunk_bytes
        {
            emit(std::mem::take(&mut self.buffer));
            if sentence_ended {
                self.in_word = false;
            }
            self.word_count = 0;
        }
    }

    /// Flush whatever remains after the stream ends.
    pub fn finish(&mut self, emit: &mut dyn FnMut(String)) {
        if !self.buffer.is_empty() {
            emit(std::mem::take(&mut self.buffer));
        }
        self.word_count = 0;
        self.in_word = false;
    }

    /// Bytes currently buffered.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(config: ChunkerConfig, fragments: &[&str]) -> Vec<String> {
        let mut assembler = ChunkAssembler::new(config);
        let mut chunks = Vec::new();
        for fragment in fragments {
            assembler.feed(fragment, &mut |chunk| chunks.push(chunk));
        }
        assembler.finish(&mut |chunk| chunks.push(chunk));
        chunks
    }

    fn with_words(words_per_chunk: usize) -> ChunkerConfig {
        ChunkerConfig {
            words_per_chunk,
            max_chunk_bytes: 96,
        }
    }

    #[test]
    fn test_sentence_terminator_flushes() {
        let chunks = collect(
            with_words(3),
            &["Hi ", "there", ".", " How are you?"],
        );
        assert_eq!(chunks, vec!["Hi there.", " How are you?"]);
    }

    #[test]
    fn test_word_count_flush() {
        let chunks = collect(with_words(4), &["one two three four ", "five six"]);
        assert_eq!(chunks, vec!["one two three four ", "five six"]);
    }

    #[test]
    fn test_token_sized_fragments_accumulate() {
        let chunks = collect(
            with_words(4),
            &["Al", "pha", " be", "ta ", "gam", "ma ", "del", "ta ", "rest"],
        );
        assert_eq!(chunks, vec!["Alpha beta gamma delta ", "rest"]);
    }

    #[test]
    fn test_byte_ceiling_flushes_mid_word() {
        let config = ChunkerConfig {
            words_per_chunk: 100,
            max_chunk_bytes: 10,
        };
        let chunks = collect(config, &["abcdefgh", "ijklmnop", "qr end"]);
        assert_eq!(chunks, vec!["abcdefghijklmnop", "qr end"]);
    }

    #[test]
    fn test_ceiling_flush_keeps_word_state() {
        // "extraordinarily" split across a ceiling flush is one word, so a
        // two-word threshold only fires after a genuinely new word ends.
        let config = ChunkerConfig {
            words_per_chunk: 2,
            max_chunk_bytes: 8,
        };
        let mut assembler = ChunkAssembler::new(config);
        let mut chunks = Vec::new();

        assembler.feed("extraordi", &mut |c| chunks.push(c)); // ceiling flush mid-word
        assert_eq!(chunks, vec!["extraordi"]);

        assembler.feed("narily w", &mut |c| chunks.push(c)); // completes word 1, starts word 2
        assert_eq!(chunks.len(), 2, "ceiling flush again, still under 2 words");

        assembler.feed("x y", &mut |c| chunks.push(c));
        assembler.finish(&mut |c| chunks.push(c));
        assert_eq!(chunks.concat(), "extraordinarily wx y");
    }

    #[test]
    fn test_sentence_flush_resets_word_state() {
        let mut assembler = ChunkAssembler::new(with_words(2));
        let mut chunks = Vec::new();

        assembler.feed("Done.", &mut |c| chunks.push(c));
        assert_eq!(chunks, vec!["Done."]);

        // The next fragment starts a fresh word count
        assembler.feed("a b", &mut |c| chunks.push(c));
        assembler.finish(&mut |c| chunks.push(c));
        assert_eq!(chunks[1..].concat(), "a b");
    }

    #[test]
    fn test_punctuation_counts_word_boundary() {
        // "one, two" has a word ending at the comma
        let chunks = collect(with_words(2), &["one, two "]);
        assert_eq!(chunks, vec!["one, two "]);
    }

    #[test]
    fn test_non_ascii_counts_as_word_bytes() {
        let chunks = collect(with_words(2), &["héllo wörld "]);
        assert_eq!(chunks, vec!["héllo wörld "]);
    }

    #[test]
    fn test_apostrophes_stay_inside_words() {
        // "don't stop" is two words, not three
        let mut assembler = ChunkAssembler::new(with_words(3));
        let mut chunks = Vec::new();
        assembler.feed("don't stop ", &mut |c| chunks.push(c));
        assert!(chunks.is_empty(), "two words must not trigger a 3-word flush");
        assembler.finish(&mut |c| chunks.push(c));
        assert_eq!(chunks, vec!["don't stop "]);
    }

    #[test]
    fn test_finish_flushes_remainder() {
        let mut assembler = ChunkAssembler::new(with_words(10));
        let mut chunks = Vec::new();
        assembler.feed("trailing bits", &mut |c| chunks.push(c));
        assert!(chunks.is_empty());
        assert_eq!(assembler.pending_bytes(), 13);

        assembler.finish(&mut |c| chunks.push(c));
        assert_eq!(chunks, vec!["trailing bits"]);
        assert_eq!(assembler.pending_bytes(), 0);

        // finish on an empty buffer emits nothing
        assembler.finish(&mut |c| chunks.push(c));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_fragments_are_ignored() {
        let chunks = collect(with_words(2), &["", "", "a b ", ""]);
        assert_eq!(chunks, vec!["a b "]);
    }

    #[test]
    fn test_no_fragment_is_lost() {
        let fragments = ["The ", "quick brown ", "fox. ", "Jumps", "!", " Over"];
        let chunks = collect(with_words(3), &fragments);
        assert_eq!(chunks.concat(), fragments.concat());
    }
}
