//! Framing protocols.
//!
//! # Data Flow
//! ```text
//! socket read half
//!     → BufReader
//!     → Protocol::read_packet (exactly one frame or an error)
//!     → Packet (owned by the receive queue, then the handler)
//!
//! Packet::serialize
//!     → send queue (Bytes)
//!     → write task → socket write half
//! ```
//!
//! # Design Decisions
//! - A protocol error is always fatal to its connection; no partial-frame recovery
//! - Protocols are stateless, so one instance is shared by every connection
//! - Packets serialize themselves, so handlers can echo or forward them directly

use std::future::Future;

use bytes::Bytes;
use tokio::io::AsyncBufRead;

pub mod delimited;
pub mod length_prefixed;

pub use delimited::{DelimitedPacket, DelimitedProtocol};
pub use length_prefixed::{LengthPrefixedPacket, LengthPrefixedProtocol, LengthWidth};

/// Error produced while reading a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the stream on a frame boundary.
    #[error("stream closed by peer")]
    Closed,
    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame after {0} bytes")]
    Truncated(usize),
    /// A frame exceeded the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    /// An outbound payload contains the frame delimiter.
    #[error("payload contains delimiter {delimiter:#04x} at offset {offset}")]
    DelimiterInPayload { delimiter: u8, offset: usize },
}

/// A protocol-defined unit of application data.
pub trait Packet: Send + Sync + 'static {
    /// Wire representation of this packet, including any framing.
    fn serialize(&self) -> Bytes;
}

/// Splits a byte stream into packets.
pub trait Protocol: Send + Sync + 'static {
    type Packet: Packet;

    /// Read exactly one complete frame from `reader`.
    fn read_packet<R>(
        &self,
        reader: &mut R,
    ) -> impl Future<Output = Result<Self::Packet, ProtocolError>> + Send
    where
        R: AsyncBufRead + Unpin + Send;
}
