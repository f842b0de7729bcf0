//! Sensor Protocol - Wire protocol for daemon communication
//!
//! Every message on either socket is a fixed header followed by a payload:
//!
//! ```text
//! +-------------+--------------+---------------------+
//! | cmd: i32    | size: u32    | payload (size bytes)|
//! +-------------+--------------+---------------------+
//! ```
//!
//! Integers are native-endian; both ends run on the same host. The payload
//! length travels in the header, so variable-length payloads (attribute
//! strings, sensor-list blobs) need no per-command framing.
//!
//! - `packet` / `codec` - header, packet kinds and the two-phase decoder
//! - `message` - typed command-channel requests and replies
//! - `event` - event-channel handshake and sensor event frames
//! - `status` - errno-style status values carried by `DONE`

pub mod codec;
pub mod error;
pub mod event;
pub mod message;
pub mod packet;
pub mod status;

mod wire;

pub use codec::PacketCodec;
pub use error::ProtocolError;
pub use event::{
    decode_event, encode_event, encode_event_frame, EventChannelHello, EventChannelReady,
    EVENT_CHANNEL_MAGIC,
};
pub use message::{Reply, Request};
pub use packet::{Packet, PacketHeader, PacketKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Default path of the command socket.
pub const DEFAULT_COMMAND_SOCKET: &str = "/tmp/sensord.sock";

/// Default path of the event socket.
pub const DEFAULT_EVENT_SOCKET: &str = "/tmp/sensord_event.sock";
