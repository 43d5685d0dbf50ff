//! Multiplexed stdout/stderr frame codec
//!
//! The container daemon multiplexes a container's output channels onto one
//! byte stream. Each frame is an 8-byte header followed by its payload:
//! byte 0 is the stream type (stdout = 1, stderr = 2), bytes 4-7 are the
//! payload length as a big-endian u32.
//!
//! Live streams arrive pre-demultiplexed through the daemon client's typed
//! output; `Frame::from_log_output` converts those. Non-follow log fetches
//! may instead yield one raw framed buffer, which `decode_buffer` or the
//! incremental [`FrameDecoder`] handle.

use bollard::container::LogOutput;

/// Length of the multiplexing header
pub const FRAME_HEADER_LEN: usize = 8;

/// Output channel of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

impl StreamChannel {
    /// Parse the header's stream-type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(StreamChannel::Stdout),
            2 => Some(StreamChannel::Stderr),
            _ => None,
        }
    }

    /// Stream-type byte for the header
    pub fn byte(&self) -> u8 {
        match self {
            StreamChannel::Stdout => 1,
            StreamChannel::Stderr => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamChannel::Stdout => "stdout",
            StreamChannel::Stderr => "stderr",
        }
    }
}

/// One demultiplexed chunk of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: StreamChannel,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn stdout(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: StreamChannel::Stdout,
            payload: payload.into(),
        }
    }

    pub fn stderr(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: StreamChannel::Stderr,
            payload: payload.into(),
        }
    }

    /// Convert the daemon client's typed log output.
    ///
    /// TTY console output counts as stdout; stdin echo frames are dropped.
    pub fn from_log_output(output: LogOutput) -> Option<Self> {
        match output {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                Some(Frame::stdout(message.to_vec()))
            }
            LogOutput::StdErr { message } => Some(Frame::stderr(message.to_vec())),
            LogOutput::StdIn { .. } => None,
        }
    }

    /// Payload as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Wire form: header + payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.push(self.channel.byte());
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decode a complete framed buffer.
///
/// Decoding stops at the first frame whose declared payload would overrun
/// the buffer; frames with an unknown stream type are consumed but not
/// emitted.
pub fn decode_buffer(buf: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while buf.len() - offset >= FRAME_HEADER_LEN {
        let header = &buf[offset..offset + FRAME_HEADER_LEN];
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let start = offset + FRAME_HEADER_LEN;
        let end = match start.checked_add(len) {
            Some(end) if end <= buf.len() => end,
            _ => break,
        };

        if let Some(channel) = StreamChannel::from_byte(header[0]) {
            frames.push(Frame {
                channel,
                payload: buf[start..end].to_vec(),
            });
        }
        offset = end;
    }

    frames
}

/// Incremental frame decoder for chunked streams.
///
/// Headers and payloads may be split across arbitrary chunk boundaries; the
/// decoder buffers the unfinished tail between calls.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0;

        while self.buf.len() - offset >= FRAME_HEADER_LEN {
            let header = &self.buf[offset..offset + FRAME_HEADER_LEN];
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

            let start = offset + FRAME_HEADER_LEN;
            let end = match start.checked_add(len) {
                Some(end) if end <= self.buf.len() => end,
                _ => break,
            };

            if let Some(channel) = StreamChannel::from_byte(header[0]) {
                frames.push(Frame {
                    channel,
                    payload: self.buf[start..end].to_vec(),
                });
            }
            offset = end;
        }

        self.buf.drain(..offset);
        frames
    }

    /// Bytes buffered awaiting a complete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
