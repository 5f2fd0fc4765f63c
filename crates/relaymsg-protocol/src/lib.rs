//! The relaymsg wire protocol: a versioned, length-prefixed binary framing
//! over a byte stream, plus the ten packet types that ride it.
//!
//! Layout of one frame: `[fixed header: 1 byte][remaining length: varint]
//! [body: remaining length bytes]`. The fixed header packs the packet type
//! into the high nibble and four boolean flags into the low nibble. Strings
//! in a body are length-prefixed with a big-endian `u16`; integers are
//! big-endian; a trailing `Payload` field consumes whatever bytes remain in
//! the frame rather than carrying its own length prefix.
//!
//! Field *presence* within a body is gated by the negotiated protocol
//! version (1..=4); see [`Packet`] and its per-variant `decode_body`.

mod buf;
mod codec;
mod error;
mod fixed_header;
mod packet;
mod reason_code;

pub use codec::Codec;
pub use error::CodecError;
pub use fixed_header::{FixedHeader, PacketType};
pub use packet::{
    ConnackPacket, ConnectPacket, DisconnectPacket, Packet, PingPacket, PongPacket, RecvPacket,
    SendPacket, SendackPacket, SubPacket, SubackPacket,
};
pub use reason_code::ReasonCode;
