//! Line framing over the inbound byte stream
//!
//! The framer owns the inbound buffer. It is only ever touched by the reader
//! thread, so it carries no lock of its own.

use super::delimiter::Delimiter;
use serde::{Deserialize, Serialize};

/// How inbound bytes are turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Buffer raw bytes and decode each extracted segment.
    ///
    /// A multi-byte character split across two reads is reassembled.
    #[default]
    Segment,
    /// Decode every read chunk on arrival.
    ///
    /// A character split across two reads turns into replacement characters;
    /// lines around it are unaffected.
    Chunk,
}

/// Result of one scan pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Non-empty segments handed to the sink
    pub lines: usize,
    /// Empty segments dropped
    pub dropped: usize,
}

/// Inbound buffer plus delimiter splitting
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    mode: DecodeMode,
    /// Offset below which `buffer` holds no occurrence of `scanned_with`
    scanned: usize,
    scanned_with: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            mode,
            scanned: 0,
            scanned_with: Vec::new(),
        }
    }

    /// Append freshly read bytes
    pub fn push(&mut self, data: &[u8]) {
        match self.mode {
            DecodeMode::Segment => self.buffer.extend_from_slice(data),
            DecodeMode::Chunk => self
                .buffer
                .extend_from_slice(String::from_utf8_lossy(data).as_bytes()),
        }
    }

    /// Extract every complete segment terminated by `delimiter`.
    ///
    /// Occurrences are taken leftmost first until none remain. Non-empty
    /// segments go to `emit` in stream order; empty ones are dropped. Bytes
    /// after the last occurrence stay buffered. With a non-framing delimiter
    /// nothing is extracted.
    ///
    /// A retained partial segment is not searched again from its start: the
    /// next pass resumes just before where this one stopped, unless the
    /// delimiter changed in between.
    pub fn drain_lines<F>(&mut self, delimiter: &Delimiter, mut emit: F) -> ScanSummary
    where
        F: FnMut(String),
    {
        let mut summary = ScanSummary::default();
        let Some(delim) = delimiter.as_bytes() else {
            return summary;
        };

        if self.scanned_with != delim {
            self.scanned_with = delim.to_vec();
            self.scanned = 0;
        }

        let mut start = 0;
        let mut search_from = self.scanned.min(self.buffer.len());
        while let Some(pos) = find(&self.buffer[search_from..], delim) {
            let end = search_from + pos;
            let segment = &self.buffer[start..end];
            if segment.is_empty() {
                summary.dropped += 1;
            } else {
                emit(String::from_utf8_lossy(segment).into_owned());
                summary.lines += 1;
            }
            start = end + delim.len();
            search_from = start;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        // The tail may hold the first bytes of a delimiter still in flight.
        self.scanned = self.buffer.len().saturating_sub(delim.len() - 1);
        summary
    }

    /// Number of buffered bytes not yet framed
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered bytes not yet framed
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(framer: &mut LineFramer, delimiter: &Delimiter) -> Vec<String> {
        let mut lines = Vec::new();
        framer.drain_lines(delimiter, |l| lines.push(l));
        lines
    }

    #[test]
    fn test_splits_burst_into_all_lines() {
        let mut framer = LineFramer::default();
        framer.push(b"one\r\ntwo\r\nthree\r\npart");
        assert_eq!(frame(&mut framer, &Delimiter::CrLf), ["one", "two", "three"]);
        assert_eq!(framer.pending(), b"part");
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        let mut framer = LineFramer::default();
        framer.push(b"\r\n\r\nA\r\n");
        let mut lines = Vec::new();
        let summary = framer.drain_lines(&Delimiter::CrLf, |l| lines.push(l));
        assert_eq!(lines, ["A"]);
        assert_eq!(summary, ScanSummary { lines: 1, dropped: 2 });
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_no_framing_keeps_everything() {
        let mut framer = LineFramer::default();
        framer.push(b"a\r\nb\nc\r");
        assert!(frame(&mut framer, &Delimiter::None).is_empty());
        assert_eq!(framer.buffered_len(), 7);
    }

    #[test]
    fn test_delimiter_split_across_pushes() {
        let mut framer = LineFramer::default();
        framer.push(b"abc\r");
        assert!(frame(&mut framer, &Delimiter::CrLf).is_empty());
        framer.push(b"\ndef");
        assert_eq!(frame(&mut framer, &Delimiter::CrLf), ["abc"]);
        assert_eq!(framer.pending(), b"def");
    }

    #[test]
    fn test_leftmost_overlapping_occurrence() {
        let mut framer = LineFramer::default();
        framer.push(b"xaaay");
        let delimiter = Delimiter::Custom("aa".into());
        assert_eq!(frame(&mut framer, &delimiter), ["x"]);
        assert_eq!(framer.pending(), b"ay");
    }

    #[test]
    fn test_partial_segment_is_not_rescanned() {
        let mut framer = LineFramer::default();
        for _ in 0..1000 {
            framer.push(b"0123456789");
            assert!(frame(&mut framer, &Delimiter::CrLf).is_empty());
            assert_eq!(framer.scanned, framer.buffered_len() - 1);
        }
        framer.push(b"\r\nnext");
        let lines = frame(&mut framer, &Delimiter::CrLf);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 10_000);
        assert_eq!(framer.pending(), b"next");
        assert_eq!(framer.scanned, 3);
    }

    #[test]
    fn test_delimiter_change_rescans_retained_bytes() {
        let mut framer = LineFramer::default();
        framer.push(b"x\ry\rz");
        assert!(frame(&mut framer, &Delimiter::Lf).is_empty());
        assert_eq!(frame(&mut framer, &Delimiter::Cr), ["x", "y"]);
        assert_eq!(framer.pending(), b"z");
    }

    #[test]
    fn test_segment_mode_reassembles_split_character() {
        let mut framer = LineFramer::new(DecodeMode::Segment);
        let bytes = "héllo\n".as_bytes();
        framer.push(&bytes[..2]);
        framer.push(&bytes[2..]);
        assert_eq!(frame(&mut framer, &Delimiter::Lf), ["héllo"]);
    }

    #[test]
    fn test_chunk_mode_replaces_split_character() {
        let mut framer = LineFramer::new(DecodeMode::Chunk);
        let bytes = "héllo\nnext\n".as_bytes();
        framer.push(&bytes[..2]);
        framer.push(&bytes[2..]);
        let lines = frame(&mut framer, &Delimiter::Lf);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains('\u{FFFD}'));
        assert_eq!(lines[1], "next");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = LineFramer::default();
        framer.push(b"ok\xff\n");
        assert_eq!(frame(&mut framer, &Delimiter::Lf), ["ok\u{FFFD}"]);
    }
}
