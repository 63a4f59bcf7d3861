//! Length-prefixed frames with a big-endian header.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncReadExt};

use super::{Packet, Protocol, ProtocolError};

/// Size of the length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWidth {
    U8,
    U16,
    U32,
}

impl LengthWidth {
    /// Header width for a byte count of 1, 2 or 4.
    pub fn from_bytes(width: u8) -> Option<Self> {
        match width {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest payload length the header can express.
    pub fn max_len(self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::U16 => u16::MAX as usize,
            Self::U32 => usize::try_from(u32::MAX).unwrap_or(usize::MAX),
        }
    }

    // Callers guarantee `len <= self.max_len()`.
    fn put(self, buf: &mut BytesMut, len: usize) {
        let header = (len as u64).to_be_bytes();
        buf.put_slice(&header[header.len() - self.bytes()..]);
    }
}

#[derive(Debug, Clone)]
pub struct LengthPrefixedProtocol {
    width: LengthWidth,
    max_frame_len: usize,
}

impl LengthPrefixedProtocol {
    pub fn new(width: LengthWidth, max_frame_len: usize) -> Self {
        Self {
            width,
            max_frame_len,
        }
    }

    /// Largest payload this protocol reads or writes.
    pub fn frame_limit(&self) -> usize {
        self.max_frame_len.min(self.width.max_len())
    }

    /// Build an outbound packet, rejecting payloads over [`frame_limit`](Self::frame_limit).
    pub fn packet(
        &self,
        payload: impl Into<Bytes>,
    ) -> Result<LengthPrefixedPacket, ProtocolError> {
        let payload = payload.into();
        let max = self.frame_limit();
        if payload.len() > max {
            return Err(ProtocolError::FrameTooLarge {
                len: payload.len(),
                max,
            });
        }
        Ok(LengthPrefixedPacket::new(payload, self.width))
    }

    async fn read_header<R>(&self, reader: &mut R) -> Result<usize, ProtocolError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut header = [0u8; 4];
        let header = &mut header[..self.width.bytes()];

        // A clean EOF before the first header byte closes the stream on a boundary.
        let first = reader.read(&mut header[..1]).await?;
        if first == 0 {
            return Err(ProtocolError::Closed);
        }
        read_full(reader, &mut header[1..], 1).await?;

        Ok(header
            .iter()
            .fold(0usize, |len, &byte| (len << 8) | usize::from(byte)))
    }
}

/// Fill `buf`, reporting EOF as `Truncated` with the frame bytes seen so far.
async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
    already_read: usize,
) -> Result<(), ProtocolError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated(already_read + filled));
        }
        filled += n;
    }
    Ok(())
}

impl Protocol for LengthPrefixedProtocol {
    type Packet = LengthPrefixedPacket;

    async fn read_packet<R>(&self, reader: &mut R) -> Result<LengthPrefixedPacket, ProtocolError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let len = self.read_header(reader).await?;
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        read_full(reader, &mut payload, self.width.bytes()).await?;
        Ok(LengthPrefixedPacket::new(payload.into(), self.width))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthPrefixedPacket {
    payload: Bytes,
    width: LengthWidth,
}

impl LengthPrefixedPacket {
    fn new(payload: Bytes, width: LengthWidth) -> Self {
        Self { payload, width }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl Packet for LengthPrefixedPacket {
    fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.width.bytes() + self.payload.len());
        self.width.put(&mut buf, self.payload.len());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
