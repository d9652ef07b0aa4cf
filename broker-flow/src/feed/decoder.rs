//! Newline framing of the raw socket byte stream
//!
//! Reads may end mid-line or carry several lines; the decoder keeps the unterminated
//! tail until a later read completes it.

use tracing::warn;

/// Default bound on bytes held for an unterminated line
pub const DEFAULT_MAX_PENDING: usize = 1 << 20;

/// Accumulates socket bytes and yields complete `\n` terminated lines
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that drops an unterminated line once it exceeds `max_pending` bytes
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Append `bytes` and return every line completed by them, in arrival order.
    ///
    /// The terminating `\n` (and a preceding `\r`) is stripped. Empty input yields nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = &self.buffer[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_pending {
            warn!(
                bytes = self.buffer.len(),
                max = self.max_pending,
                "unterminated line exceeds limit, discarding"
            );
            self.buffer.clear();
        }

        lines
    }

    /// Number of buffered bytes belonging to an unterminated line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_read_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&[]).is_empty());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_multiple_lines_per_read() {
        let mut decoder = FrameDecoder::new();
        let lines = decoder.feed(b"SQT\x01x\x01LAST\x01500\nBRKSLD\x01a\nSQT\x01");

        assert_eq!(lines, vec!["SQT\x01x\x01LAST\x01500", "BRKSLD\x01a"]);
        assert_eq!(decoder.pending(), 4);
    }

    #[test]
    fn test_line_split_across_reads() {
        let line = "BRKSLD\x010\x010\x01C1\x01XP\x01";
        let mut decoder = FrameDecoder::new();

        // Every split point reassembles to exactly one line
        for split in 0..=line.len() {
            let (head, tail) = line.as_bytes().split_at(split);
            let mut lines = decoder.feed(head);
            lines.extend(decoder.feed(tail));
            lines.extend(decoder.feed(b"\n"));

            assert_eq!(lines, vec![line.to_string()], "split at {split}");
            assert_eq!(decoder.pending(), 0);
        }
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(b"SQT\x01x\x01LAST\x01500\r\n"), vec!["SQT\x01x\x01LAST\x01500"]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        let bytes = "ÁGORA\n".as_bytes();

        assert!(decoder.feed(&bytes[..1]).is_empty());
        assert_eq!(decoder.feed(&bytes[1..]), vec!["ÁGORA"]);
    }

    #[test]
    fn test_clear_discards_partial_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"BRKSLD\x01partial").is_empty());

        decoder.clear();
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.feed(b"SQT\n"), vec!["SQT"]);
    }

    #[test]
    fn test_unterminated_line_is_bounded() {
        let mut decoder = FrameDecoder::with_max_pending(16);

        assert!(decoder.feed(b"0123456789").is_empty());
        assert_eq!(decoder.pending(), 10);

        // Limit exceeded without a terminator: the partial line is dropped
        assert!(decoder.feed(b"0123456789").is_empty());
        assert_eq!(decoder.pending(), 0);

        // Complete lines in the same read are still yielded
        assert_eq!(decoder.feed(b"SQT\nxxxxxxxxxxxxxxxxxxxx"), vec!["SQT".to_string()]);
        assert_eq!(decoder.pending(), 0);

        assert_eq!(decoder.feed(b"BRKSLD\n"), vec!["BRKSLD".to_string()]);
    }
}
