//! Line reassembly over decoded output chunks
//!
//! Chunk boundaries are arbitrary; a line may span any number of chunks.
//! The trailing unterminated segment is kept as the pending buffer, capped
//! so a pathologically long line cannot grow memory without bound - the
//! overflowed prefix is dropped, not retained.

use crate::frame::{Frame, StreamChannel};

/// Default cap on the pending buffer, in characters
pub const DEFAULT_PENDING_CAP: usize = 5000;

/// Reassembles discrete lines from a chunked text stream
#[derive(Debug)]
pub struct LineReassembler {
    pending: String,
    cap: usize,
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_PENDING_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            pending: String::new(),
            cap,
        }
    }

    /// Append a chunk; returns every line completed by it.
    ///
    /// Lines are split on `\n` with a trailing `\r` stripped.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop(); // the '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        // Bound the unterminated tail, keeping the most recent characters
        if self.pending.len() > self.cap {
            let mut cut = self.pending.len() - self.cap;
            while !self.pending.is_char_boundary(cut) {
                cut += 1;
            }
            self.pending.drain(..cut);
        }

        lines
    }

    /// The current unterminated segment
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// One reassembler per output channel
#[derive(Debug, Default)]
pub struct ChannelLines {
    stdout: LineReassembler,
    stderr: LineReassembler,
}

impl ChannelLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            stdout: LineReassembler::with_cap(cap),
            stderr: LineReassembler::with_cap(cap),
        }
    }

    /// Feed one decoded frame; returns completed lines tagged by channel
    pub fn push(&mut self, frame: &Frame) -> Vec<(StreamChannel, String)> {
        let reassembler = match frame.channel {
            StreamChannel::Stdout => &mut self.stdout,
            StreamChannel::Stderr => &mut self.stderr,
        };
        reassembler
            .push(&frame.text())
            .into_iter()
            .map(|line| (frame.channel, line))
            .collect()
    }

    pub fn pending(&self, channel: StreamChannel) -> &str {
        match channel {
            StreamChannel::Stdout => self.stdout.pending(),
            StreamChannel::Stderr => self.stderr.pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.push("hello\nworld"), vec!["hello"]);
        assert_eq!(lines.pending(), "world");
    }

    #[test]
    fn test_reassembly_is_chunking_independent() {
        let mut split = LineReassembler::new();
        let mut emitted = split.push("hel");
        emitted.extend(split.push("lo\nworld"));

        assert_eq!(emitted, vec!["hello"]);
        assert_eq!(split.pending(), "world");
    }

    #[test]
    fn test_carriage_return_stripped() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.push("one\r\ntwo\n"), vec!["one", "two"]);
    }

    #[test]
    fn test_pending_buffer_is_capped() {
        let mut lines = LineReassembler::new();
        let chunk: String = std::iter::repeat('x').take(6000).collect();

        assert!(lines.push(&chunk).is_empty());
        assert_eq!(lines.pending().len(), 5000);
        // The dropped content is the oldest; the tail survives
        assert!(lines.pending().chars().all(|c| c == 'x'));
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        let mut lines = LineReassembler::with_cap(5);
        lines.push("abcd\u{00e9}"); // 'é' is two bytes

        assert!(lines.pending().len() <= 6);
        assert!(lines.pending().ends_with('\u{00e9}'));
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.push("a\nb\nc\n"), vec!["a", "b", "c"]);
        assert_eq!(lines.pending(), "");
    }

    #[test]
    fn test_channel_lines_keeps_channels_independent() {
        let mut channels = ChannelLines::new();

        let out = channels.push(&Frame::stdout(b"out-".to_vec()));
        assert!(out.is_empty());

        let err = channels.push(&Frame::stderr(b"err line\n".to_vec()));
        assert_eq!(err, vec![(StreamChannel::Stderr, "err line".to_string())]);

        let out = channels.push(&Frame::stdout(b"line\n".to_vec()));
        assert_eq!(out, vec![(StreamChannel::Stdout, "out-line".to_string())]);
    }
}
