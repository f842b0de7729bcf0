//! Two-phase packet codec for `tokio_util::codec::Framed`.
//!
//! Decoding first waits for the fixed header, validates the kind and size,
//! then waits for exactly `header.size` payload bytes. The payload is split
//! off into its own `Bytes`, so no reply buffer is ever managed by hand.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::packet::{Packet, PacketHeader, PacketKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::ProtocolError;

/// Codec for header+payload packets.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload: usize,
    /// Header of a packet whose payload has not fully arrived yet.
    pending: Option<(PacketKind, usize)>,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload,
            pending: None,
        }
    }

    fn decode_header(&self, src: &mut BytesMut) -> Result<Option<(PacketKind, usize)>, ProtocolError> {
        let Some(raw) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(raw);
        let header = PacketHeader::from_bytes(header_bytes);

        let kind = PacketKind::try_from(header.cmd)?;
        let size = header.size as usize;
        if size > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }

        src.advance(HEADER_SIZE);
        Ok(Some((kind, size)))
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (kind, size) = match self.pending {
            Some(pending) => pending,
            None => match self.decode_header(src)? {
                Some(header) => {
                    self.pending = Some(header);
                    header
                }
                None => return Ok(None),
            },
        };

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(size).freeze();
        Ok(Some(Packet { kind, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: packet.payload.len(),
                max: self.max_payload,
            });
        }
        dst.reserve(HEADER_SIZE + packet.payload.len());
        dst.put_slice(&packet.header().to_bytes());
        dst.put_slice(&packet.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encoded(packet: Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        PacketCodec::new().encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_decode_waits_for_header() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[3u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_waits_for_payload() {
        let full = encoded(Packet::new(PacketKind::Hello, Bytes::from_static(&[1, 2, 3, 4])));
        let mut codec = PacketCodec::new();

        let mut partial = BytesMut::from(&full[..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[HEADER_SIZE + 2..]);
        let packet = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(packet.kind, PacketKind::Hello);
        assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_packets() {
        let mut buf = encoded(Packet::empty(PacketKind::Start));
        buf.extend_from_slice(&encoded(Packet::empty(PacketKind::Stop)));

        let mut codec = PacketCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().kind, PacketKind::Start);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().kind, PacketKind::Stop);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let header = PacketHeader {
            cmd: PacketKind::SetAttributeStr.as_i32(),
            size: 64,
        };
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        let mut codec = PacketCodec::with_max_payload(16);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { size: 64, max: 16 })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let header = PacketHeader { cmd: 77, size: 0 };
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(
            PacketCodec::new().decode(&mut buf),
            Err(ProtocolError::UnknownKind(77))
        ));
    }
}
