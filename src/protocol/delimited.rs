//! Delimiter-terminated frames.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{Packet, Protocol, ProtocolError};

/// Frames are the bytes preceding a delimiter byte (default `\n`).
#[derive(Debug, Clone)]
pub struct DelimitedProtocol {
    delimiter: u8,
    max_frame_len: usize,
}

impl DelimitedProtocol {
    pub fn new(delimiter: u8, max_frame_len: usize) -> Self {
        Self {
            delimiter,
            max_frame_len,
        }
    }

    /// Newline-delimited frames.
    pub fn lines(max_frame_len: usize) -> Self {
        Self::new(b'\n', max_frame_len)
    }

    /// Build an outbound packet terminated by this protocol's delimiter.
    ///
    /// The payload must fit the frame limit and must not contain the
    /// delimiter, otherwise the peer would read it back as several frames.
    pub fn packet(&self, payload: impl Into<Bytes>) -> Result<DelimitedPacket, ProtocolError> {
        let payload = payload.into();
        self.check_len(payload.len())?;
        if let Some(offset) = payload.iter().position(|&b| b == self.delimiter) {
            return Err(ProtocolError::DelimiterInPayload {
                delimiter: self.delimiter,
                offset,
            });
        }
        Ok(DelimitedPacket::new(payload, self.delimiter))
    }

    fn check_len(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        Ok(())
    }
}

impl Protocol for DelimitedProtocol {
    type Packet = DelimitedPacket;

    async fn read_packet<R>(&self, reader: &mut R) -> Result<DelimitedPacket, ProtocolError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut frame = BytesMut::new();
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(if frame.is_empty() {
                    ProtocolError::Closed
                } else {
                    ProtocolError::Truncated(frame.len())
                });
            }

            match available.iter().position(|&b| b == self.delimiter) {
                Some(end) => {
                    self.check_len(frame.len() + end)?;
                    frame.extend_from_slice(&available[..end]);
                    reader.consume(end + 1);
                    return Ok(DelimitedPacket::new(frame.freeze(), self.delimiter));
                }
                None => {
                    let len = available.len();
                    self.check_len(frame.len() + len)?;
                    frame.extend_from_slice(available);
                    reader.consume(len);
                }
            }
        }
    }
}

/// A frame payload without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedPacket {
    payload: Bytes,
    delimiter: u8,
}

impl DelimitedPacket {
    fn new(payload: Bytes, delimiter: u8) -> Self {
        Self { payload, delimiter }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl Packet for DelimitedPacket {
    fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 1);
        buf.put_slice(&self.payload);
        buf.put_u8(self.delimiter);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn splits_on_delimiter() {
        let protocol = DelimitedProtocol::lines(1024);
        let mut reader: &[u8] = b"hello\nworld\n";

        let first = protocol.read_packet(&mut reader).await.unwrap();
        let second = protocol.read_packet(&mut reader).await.unwrap();
        assert_eq!(first.payload().as_ref(), b"hello");
        assert_eq!(second.payload().as_ref(), b"world");
        assert!(matches!(
            protocol.read_packet(&mut reader).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn frame_spanning_buffer_refills() {
        let protocol = DelimitedProtocol::lines(1024);
        // A 2-byte buffer forces the frame to be assembled across several fills.
        let mut reader = BufReader::with_capacity(2, &b"abcdefg\n"[..]);

        let packet = protocol.read_packet(&mut reader).await.unwrap();
        assert_eq!(packet.payload().as_ref(), b"abcdefg");
    }

    #[tokio::test]
    async fn partial_frame_at_eof_is_truncated() {
        let protocol = DelimitedProtocol::lines(1024);
        let mut reader: &[u8] = b"partial";

        match protocol.read_packet(&mut reader).await {
            Err(ProtocolError::Truncated(7)) => {}
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let protocol = DelimitedProtocol::lines(4);
        let mut reader: &[u8] = b"toolong\n";

        assert!(matches!(
            protocol.read_packet(&mut reader).await,
            Err(ProtocolError::FrameTooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn custom_delimiter_and_empty_frame() {
        let protocol = DelimitedProtocol::new(b'|', 16);
        let mut reader: &[u8] = b"|a|";

        assert!(protocol.read_packet(&mut reader).await.unwrap().payload().is_empty());
        assert_eq!(protocol.read_packet(&mut reader).await.unwrap().payload().as_ref(), b"a");
    }

    #[test]
    fn serialize_appends_delimiter() {
        let packet = DelimitedProtocol::lines(16).packet("hi").unwrap();
        assert_eq!(packet.serialize().as_ref(), b"hi\n");
    }

    #[test]
    fn payload_containing_delimiter_rejected() {
        let protocol = DelimitedProtocol::lines(64);

        assert!(matches!(
            protocol.packet("a\nb"),
            Err(ProtocolError::DelimiterInPayload {
                delimiter: b'\n',
                offset: 1
            })
        ));
    }

    #[test]
    fn outbound_payload_over_limit_rejected() {
        let protocol = DelimitedProtocol::lines(4);

        assert!(matches!(
            protocol.packet("toolong"),
            Err(ProtocolError::FrameTooLarge { len: 7, max: 4 })
        ));
    }

    #[tokio::test]
    async fn built_packet_reads_back_as_one_frame() {
        let protocol = DelimitedProtocol::new(b'|', 64);
        let wire = protocol.packet("a\nb").unwrap().serialize();
        let mut reader: &[u8] = &wire;

        let packet = protocol.read_packet(&mut reader).await.unwrap();
        assert_eq!(packet.payload().as_ref(), b"a\nb");
        assert!(reader.is_empty());
    }
}
