//! Sentence chunking for streamed answers
//!
//! Text is split at terminal punctuation (ASCII `. ! ?` and full-width
//! `。！？`, each optionally followed by whitespace). A buffer accumulates
//! characters and flushes at every sentence boundary or once it reaches the
//! flush threshold, whichever comes first; any residue flushes at the end.
//! Concatenating the chunks always reproduces the input exactly.

/// Terminal punctuation that closes a sentence
const TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

pub struct SentenceChunker {
    flush_chars: usize,
}

impl SentenceChunker {
    pub fn new(flush_chars: usize) -> Self {
        Self {
            flush_chars: flush_chars.max(1),
        }
    }

    /// Split text into emission-ready chunks
    pub fn chunks(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut buffered_chars = 0usize;
        let mut iter = text.chars().peekable();

        while let Some(ch) = iter.next() {
            buffer.push(ch);
            buffered_chars += 1;

            if TERMINALS.contains(&ch) {
                // Trailing whitespace belongs to the closing sentence
                while let Some(&next) = iter.peek() {
                    if next.is_whitespace() {
                        buffer.push(next);
                        iter.next();
                    } else {
                        break;
                    }
                }
                chunks.push(std::mem::take(&mut buffer));
                buffered_chars = 0;
            } else if buffered_chars >= self.flush_chars {
                chunks.push(std::mem::take(&mut buffer));
                buffered_chars = 0;
            }
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> SentenceChunker {
        SentenceChunker::new(40)
    }

    #[test]
    fn test_splits_on_ascii_terminals() {
        let chunks = chunker().chunks("A is B. B is C! Is C A?");
        assert_eq!(chunks, vec!["A is B. ", "B is C! ", "Is C A?"]);
    }

    #[test]
    fn test_splits_on_fullwidth_terminals() {
        let chunks = chunker().chunks("第一句。第二句！第三句？");
        assert_eq!(chunks, vec!["第一句。", "第二句！", "第三句？"]);
    }

    #[test]
    fn test_long_sentence_flushes_at_threshold() {
        let text = "x".repeat(100);
        let chunks = chunker().chunks(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 40);
        assert_eq!(chunks[1].chars().count(), 40);
        assert_eq!(chunks[2].chars().count(), 20);
    }

    #[test]
    fn test_residue_is_flushed() {
        let chunks = chunker().chunks("No terminal here");
        assert_eq!(chunks, vec!["No terminal here"]);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunker().chunks("").is_empty());
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let texts = [
            "A is B. B is C.",
            "One long sentence without any terminal punctuation that keeps going and going",
            "Mixed。ASCII. And full-width！ Done?",
            "Trailing whitespace after terminal.   next sentence starts later.",
        ];
        for text in texts {
            let rebuilt: String = chunker().chunks(text).concat();
            assert_eq!(rebuilt, text);
        }
    }

    #[test]
    fn test_whitespace_rides_with_terminal() {
        let chunks = chunker().chunks("First.  Second.");
        assert_eq!(chunks, vec!["First.  ", "Second."]);
    }
}
