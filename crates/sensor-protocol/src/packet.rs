//! Packet header and kinds.

use bytes::Bytes;

use crate::ProtocolError;

/// Size of the fixed header: `cmd: i32` + `size: u32`.
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size accepted by the decoder (1 MB).
pub const MAX_PAYLOAD_SIZE: usize = 1_048_576;

/// Every kind of packet that may appear on either socket.
///
/// Requests are answered by exactly one reply: the generic `Done` status or
/// the command's dedicated `*Done` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketKind {
    GetId = 1,
    GetSensorList = 2,
    Hello = 3,
    ByeBye = 4,
    Done = 5,
    Start = 6,
    Stop = 7,
    Reg = 8,
    Unreg = 9,
    SetOption = 10,
    SetBatch = 11,
    UnsetBatch = 12,
    GetData = 13,
    SetAttributeInt = 14,
    SetAttributeStr = 15,
    Flush = 16,
    GetIdDone = 17,
    GetSensorListDone = 18,
    GetDataDone = 19,
    EventChannelHello = 0x100,
    EventChannelReady = 0x101,
    Event = 0x102,
}

impl PacketKind {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for PacketKind {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let kind = match value {
            1 => Self::GetId,
            2 => Self::GetSensorList,
            3 => Self::Hello,
            4 => Self::ByeBye,
            5 => Self::Done,
            6 => Self::Start,
            7 => Self::Stop,
            8 => Self::Reg,
            9 => Self::Unreg,
            10 => Self::SetOption,
            11 => Self::SetBatch,
            12 => Self::UnsetBatch,
            13 => Self::GetData,
            14 => Self::SetAttributeInt,
            15 => Self::SetAttributeStr,
            16 => Self::Flush,
            17 => Self::GetIdDone,
            18 => Self::GetSensorListDone,
            19 => Self::GetDataDone,
            0x100 => Self::EventChannelHello,
            0x101 => Self::EventChannelReady,
            0x102 => Self::Event,
            other => return Err(ProtocolError::UnknownKind(other)),
        };
        Ok(kind)
    }
}

/// Fixed-size header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub cmd: i32,
    pub size: u32,
}

impl PacketHeader {
    /// Parses a header from exactly [`HEADER_SIZE`] bytes.
    pub fn from_bytes(raw: [u8; HEADER_SIZE]) -> Self {
        let [c0, c1, c2, c3, s0, s1, s2, s3] = raw;
        Self {
            cmd: i32::from_ne_bytes([c0, c1, c2, c3]),
            size: u32::from_ne_bytes([s0, s1, s2, s3]),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let [c0, c1, c2, c3] = self.cmd.to_ne_bytes();
        let [s0, s1, s2, s3] = self.size.to_ne_bytes();
        [c0, c1, c2, c3, s0, s1, s2, s3]
    }
}

/// A decoded packet: its kind and an owned payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A packet with no payload.
    pub fn empty(kind: PacketKind) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            cmd: self.kind.as_i32(),
            size: self.payload.len() as u32,
        }
    }

    /// Fails unless this packet is of the `expected` kind.
    pub fn expect_kind(&self, expected: PacketKind) -> Result<(), ProtocolError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedPacket {
                expected,
                got: self.kind,
            })
        }
    }
}
