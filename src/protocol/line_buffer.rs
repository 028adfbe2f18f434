//! Line buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Transport chunks arrive with
//! arbitrary boundaries; the buffer keeps the trailing incomplete fragment and
//! hands out every complete `\n`-terminated message.
//!
//! # Example
//!
//! ```
//! use iac_link::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.feed(b"CAN1:du").unwrap().is_empty());
//! let lines = buffer.feed(b"rum:1\nGNS:RUN").unwrap();
//! assert_eq!(lines, vec!["CAN1:durum:1".to_string()]);
//! assert_eq!(buffer.len(), 7);
//! ```

use bytes::BytesMut;

use crate::error::{LinkError, Result};

/// Message delimiter on the wire.
pub const DELIMITER: u8 = b'\n';

/// Default initial capacity of the accumulation buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// Default longest incomplete line kept while waiting for its delimiter.
pub const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    /// Bytes after the last delimiter seen so far. Never contains a delimiter
    /// between calls.
    buffer: BytesMut,
    max_line_len: usize,
}

impl LineBuffer {
    /// Create a new line buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new line buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// Create a new line buffer with a custom incomplete-line limit.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            ..Self::new()
        }
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Push a transport chunk and extract all complete lines.
    ///
    /// Returns the complete lines in arrival order, skipping empty ones.
    /// The incomplete tail stays buffered for the next call.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Encoding`] if the chunk is not valid UTF-8. The chunk is
    ///   dropped and the buffer is left unchanged.
    /// - [`LinkError::LineTooLong`] if the incomplete line would grow past
    ///   `max_line_len`. The chunk and the buffered partial line are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        std::str::from_utf8(chunk)?;

        let tail = match chunk.iter().rposition(|&b| b == DELIMITER) {
            Some(last) => chunk.len() - last - 1,
            None => self.buffer.len() + chunk.len(),
        };
        if tail > self.max_line_len {
            self.buffer.clear();
            return Err(LinkError::LineTooLong {
                len: tail,
                max: self.max_line_len,
            });
        }

        // Bytes already buffered hold no delimiter; only the new ones are scanned.
        let mut from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == DELIMITER) {
            let pos = from + offset;
            from = 0;
            let line = self.buffer.split_to(pos + 1);
            let line = &line[..pos];
            if line.is_empty() {
                continue;
            }
            // Every chunk was validated on the way in and the delimiter is ASCII,
            // so each line is a run of whole UTF-8 sequences.
            lines.push(String::from_utf8_lossy(line).into_owned());
        }

        Ok(lines)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Peek at the buffered incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut buffer = LineBuffer::new();

        let lines = buffer.feed(b"CAN1:durum:1\n").unwrap();

        assert_eq!(lines, vec!["CAN1:durum:1"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.feed(b"AB").unwrap().is_empty());

        let lines = buffer.feed(b"C\nDEF\nG").unwrap();
        assert_eq!(lines, vec!["ABC", "DEF"]);
        assert_eq!(buffer.pending(), b"G");

        let lines = buffer.feed(b"\n").unwrap();
        assert_eq!(lines, vec!["G"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut buffer = LineBuffer::new();

        let lines = buffer.feed(b"\n\nGNS:READY\n\n").unwrap();

        assert_eq!(lines, vec!["GNS:READY"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_carriage_return_kept() {
        let mut buffer = LineBuffer::new();

        let lines = buffer.feed(b"MSJ:hello\r\n").unwrap();

        assert_eq!(lines, vec!["MSJ:hello\r"]);
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut buffer = LineBuffer::new();
        buffer.feed(b"CAN").unwrap();

        let result = buffer.feed(&[0xFF, 0xFE, b'\n']);

        assert!(matches!(result, Err(LinkError::Encoding(_))));
        assert_eq!(buffer.pending(), b"CAN");

        let lines = buffer.feed(b"2:durum:0\n").unwrap();
        assert_eq!(lines, vec!["CAN2:durum:0"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = LineBuffer::new();
        let mut all_lines = Vec::new();

        for byte in b"CAN1:isim:Pump\nCAN2:hata:3\n" {
            all_lines.extend(buffer.feed(&[*byte]).unwrap());
        }

        assert_eq!(all_lines, vec!["CAN1:isim:Pump", "CAN2:hata:3"]);
    }

    #[test]
    fn test_unterminated_line_limited() {
        let mut buffer = LineBuffer::with_max_line_len(8);
        buffer.feed(b"GNS:OK\nCAN1").unwrap();

        let result = buffer.feed(b":durum");

        assert!(matches!(
            result,
            Err(LinkError::LineTooLong { len: 10, max: 8 })
        ));
        assert!(buffer.is_empty());

        let lines = buffer.feed(b"CAN2:hata:1\nMSJ:x").unwrap();
        assert_eq!(lines, vec!["CAN2:hata:1"]);
        assert_eq!(buffer.pending(), b"MSJ:x");
    }

    #[test]
    fn test_long_complete_lines_allowed() {
        let mut buffer = LineBuffer::with_max_line_len(4);

        let lines = buffer.feed(b"MSJ:long message\n").unwrap();

        assert_eq!(lines, vec!["MSJ:long message"]);
        assert_eq!(buffer.max_line_len(), 4);
    }

    #[test]
    fn test_clear_drops_partial_line() {
        let mut buffer = LineBuffer::new();
        buffer.feed(b"half a mess").unwrap();
        assert_eq!(buffer.len(), 11);

        buffer.clear();

        assert!(buffer.is_empty());
        let lines = buffer.feed(b"age\n").unwrap();
        assert_eq!(lines, vec!["age"]);
    }
}
