//! Incremental byte-to-line decoding for captured output.
//!
//! Bytes arrive in arbitrary chunks from pipe reads or sink writes, so a
//! multi-byte character can be split across a chunk boundary. The decoder
//! holds such trailing bytes until the rest arrives; a genuinely invalid
//! sequence decodes to U+FFFD instead of being dropped. Lines split on `\n`
//! or `\r`, with `\r\n` counting as a single break even across chunks.

use std::str;

/// Stored-output bound for one run.
pub const DEFAULT_CAPTURE_LIMIT_BYTES: usize = 1_000_000;

const REPLACEMENT: &str = "\u{FFFD}";

/// Streaming decoder that accumulates logical lines of text.
///
/// The last element of [`lines`](Self::lines) is always the partially-filled
/// current line.
#[derive(Debug)]
pub struct LineDecoder {
    lines: Vec<String>,
    carry: Vec<u8>,
    pending_cr: bool,
    limit: usize,
    stored: usize,
    dropped: u64,
    finished: bool,
}

impl LineDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: vec![String::new()],
            carry: Vec::new(),
            pending_cr: false,
            limit,
            stored: 0,
            dropped: 0,
            finished: false,
        }
    }

    /// Feed one chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let owned;
        let mut bytes: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            self.carry.extend_from_slice(chunk);
            owned = std::mem::take(&mut self.carry);
            &owned
        };
        while !bytes.is_empty() {
            match str::from_utf8(bytes) {
                Ok(text) => {
                    self.append_text(text);
                    break;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    if let Ok(text) = str::from_utf8(valid) {
                        self.append_text(text);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.append_text(REPLACEMENT);
                            bytes = &rest[bad..];
                        }
                        None => {
                            // Incomplete trailing sequence; wait for more data.
                            self.carry = rest.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Flush held bytes and append the truncation marker if output was
    /// dropped. Call once when the byte source is exhausted.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.carry.is_empty() {
            self.carry.clear();
            self.append_text(REPLACEMENT);
        }
        if self.dropped > 0 {
            self.lines
                .push(format!("[output truncated, {} bytes dropped]", self.dropped));
        }
    }

    /// Decoded lines so far; the last element is the current partial line.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.clone()
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    fn append_text(&mut self, text: &str) {
        for ch in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                if ch == '\n' {
                    continue;
                }
            }
            if self.stored >= self.limit {
                self.dropped += ch.len_utf8() as u64;
                continue;
            }
            match ch {
                '\n' => self.break_line(),
                '\r' => {
                    self.break_line();
                    self.pending_cr = true;
                }
                _ => {
                    self.stored += ch.len_utf8();
                    if let Some(line) = self.lines.last_mut() {
                        line.push(ch);
                    }
                }
            }
        }
    }

    fn break_line(&mut self) {
        self.stored += 1;
        self.lines.push(String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = LineDecoder::new(DEFAULT_CAPTURE_LIMIT_BYTES);
        for chunk in chunks {
            decoder.push(chunk);
        }
        decoder.finish();
        decoder.snapshot()
    }

    #[test]
    fn plain_lines_split_on_newline() {
        assert_eq!(decode_all(&[b"one\ntwo\n"]), vec!["one", "two", ""]);
    }

    #[test]
    fn last_element_is_the_partial_line() {
        assert_eq!(decode_all(&[b"one\ntwo"]), vec!["one", "two"]);
    }

    #[test]
    fn multibyte_character_split_across_chunks_decodes_intact() {
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'.
        assert_eq!(decode_all(&[&bytes[..2], &bytes[2..]]), vec!["héllo"]);
    }

    #[test]
    fn invalid_byte_becomes_replacement_character() {
        assert_eq!(decode_all(&[b"ab\xffcd"]), vec!["ab\u{FFFD}cd"]);
    }

    #[test]
    fn incomplete_tail_flushes_as_replacement_on_finish() {
        // First two bytes of a three-byte sequence, then end of stream.
        let euro = "€".as_bytes();
        assert_eq!(decode_all(&[&euro[..2]]), vec!["\u{FFFD}"]);
    }

    #[test]
    fn crlf_split_across_chunks_is_one_break() {
        assert_eq!(decode_all(&[b"a\r", b"\nb"]), vec!["a", "b"]);
    }

    #[test]
    fn lone_carriage_return_breaks_a_line() {
        assert_eq!(decode_all(&[b"a\rb"]), vec!["a", "b"]);
    }

    #[test]
    fn consecutive_carriage_returns_break_twice() {
        assert_eq!(decode_all(&[b"a\r\rb"]), vec!["a", "", "b"]);
    }

    #[test]
    fn snapshot_mid_stream_sees_held_bytes_excluded() {
        let mut decoder = LineDecoder::new(DEFAULT_CAPTURE_LIMIT_BYTES);
        let bytes = "x€".as_bytes();
        decoder.push(&bytes[..2]); // 'x' plus one byte of '€'
        assert_eq!(decoder.snapshot(), vec!["x"]);
        decoder.push(&bytes[2..]);
        decoder.finish();
        assert_eq!(decoder.snapshot(), vec!["x€"]);
    }

    #[test]
    fn limit_drops_overflow_and_marks_truncation() {
        let mut decoder = LineDecoder::new(4);
        decoder.push(b"abcdefgh\n");
        decoder.finish();
        assert_eq!(
            decoder.snapshot(),
            vec!["abcd", "[output truncated, 5 bytes dropped]"]
        );
        assert_eq!(decoder.dropped_bytes(), 5);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut decoder = LineDecoder::new(2);
        decoder.push(b"abcd");
        decoder.finish();
        decoder.finish();
        assert_eq!(
            decoder.snapshot(),
            vec!["ab", "[output truncated, 2 bytes dropped]"]
        );
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut decoder = LineDecoder::new(DEFAULT_CAPTURE_LIMIT_BYTES);
        decoder.push(b"");
        assert_eq!(decoder.snapshot(), vec![""]);
    }
}
