//! # dockhand-stream
//!
//! Stream plumbing for Dockhand:
//! - Frame codec for the daemon's multiplexed stdout/stderr protocol
//! - Line reassembly with bounded pending buffers
//! - Server-push event framing and subscriber sinks
//! - Keyed subscriber-set fan-out
//!
//! The codec and reassembler are pure state machines over byte/text chunks;
//! sessions compose them with the fan-out to serve any number of observers.

pub mod fanout;
pub mod frame;
pub mod line;
pub mod push;

pub use fanout::Fanout;
pub use frame::{decode_buffer, Frame, FrameDecoder, StreamChannel, FRAME_HEADER_LEN};
pub use line::{ChannelLines, LineReassembler, DEFAULT_PENDING_CAP};
pub use push::{PushEvent, Subscriber};
