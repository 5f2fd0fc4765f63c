use crate::buf::{BodyReader, BodyWriterExt};
use crate::error::CodecError;
use crate::fixed_header::{FixedHeader, PacketType};
use bytes::{BufMut, BytesMut};

/// One decoded frame: fixed header plus a typed body. `Packet` is the
/// boundary type between the codec and everything above it.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    Connack(ConnackPacket),
    Send(SendPacket),
    Sendack(SendackPacket),
    Recv(RecvPacket),
    Disconnect(DisconnectPacket),
    Ping(PingPacket),
    Pong(PongPacket),
    Sub(SubPacket),
    Suback(SubackPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::Connack(_) => PacketType::Connack,
            Self::Send(_) => PacketType::Send,
            Self::Sendack(_) => PacketType::Sendack,
            Self::Recv(_) => PacketType::Recv,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Ping(_) => PacketType::Ping,
            Self::Pong(_) => PacketType::Pong,
            Self::Sub(_) => PacketType::Sub,
            Self::Suback(_) => PacketType::Suback,
        }
    }

    pub fn fixed_header(&self) -> FixedHeader {
        match self {
            Self::Send(p) => FixedHeader {
                red_dot: p.red_dot,
                sync_once: p.sync_once,
                no_persist: p.no_persist,
                dup: p.dup,
            },
            Self::Recv(p) => FixedHeader {
                red_dot: p.red_dot,
                sync_once: p.sync_once,
                no_persist: p.no_persist,
                dup: false,
            },
            _ => FixedHeader::default(),
        }
    }

    pub fn encode_body(&self, version: u8, out: &mut BytesMut) {
        match self {
            Self::Connect(p) => p.encode_body(version, out),
            Self::Connack(p) => p.encode_body(version, out),
            Self::Send(p) => p.encode_body(version, out),
            Self::Sendack(p) => p.encode_body(version, out),
            Self::Recv(p) => p.encode_body(version, out),
            Self::Disconnect(p) => p.encode_body(version, out),
            Self::Ping(p) => p.encode_body(version, out),
            Self::Pong(p) => p.encode_body(version, out),
            Self::Sub(p) => p.encode_body(version, out),
            Self::Suback(p) => p.encode_body(version, out),
        }
    }

    pub fn decode_body(
        packet_type: PacketType,
        header: FixedHeader,
        version: u8,
        body: &[u8],
    ) -> Result<Self, CodecError> {
        Ok(match packet_type {
            PacketType::Connect => Self::Connect(ConnectPacket::decode_body(version, body)?),
            PacketType::Connack => Self::Connack(ConnackPacket::decode_body(version, body)?),
            PacketType::Send => Self::Send(SendPacket::decode_body(version, header, body)?),
            PacketType::Sendack => Self::Sendack(SendackPacket::decode_body(version, body)?),
            PacketType::Recv => Self::Recv(RecvPacket::decode_body(version, header, body)?),
            PacketType::Disconnect => {
                Self::Disconnect(DisconnectPacket::decode_body(version, body)?)
            }
            PacketType::Ping => Self::Ping(PingPacket::decode_body(version, body)?),
            PacketType::Pong => Self::Pong(PongPacket::decode_body(version, body)?),
            PacketType::Sub => Self::Sub(SubPacket::decode_body(version, body)?),
            PacketType::Suback => Self::Suback(SubackPacket::decode_body(version, body)?),
        })
    }
}

/// First packet on every connection: carries the protocol version itself,
/// so its own gating reads `version` off the wire rather than trusting a
/// value passed in by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub version: u8,
    pub device_flag: u8,
    pub client_timestamp: i64,
    pub uid: String,
    pub token: String,
    /// Base64-encoded 32-byte X25519 public key. Present for `version >= 3`.
    pub client_key: Option<String>,
}

impl ConnectPacket {
    fn encode_body(&self, version: u8, out: &mut BytesMut) {
        out.put_u8(self.version);
        out.put_u8(self.device_flag);
        out.put_i64(self.client_timestamp);
        out.write_string(&self.uid);
        out.write_string(&self.token);
        if version > 2 {
            out.write_string(self.client_key.as_deref().unwrap_or_default());
        }
    }

    fn decode_body(_version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let version = r.read_u8("version")?;
        let device_flag = r.read_u8("device_flag")?;
        let client_timestamp = r.read_i64("client_timestamp")?;
        let uid = r.read_string("uid")?;
        let token = r.read_string("token")?;
        let client_key = if version > 2 {
            Some(r.read_string("client_key")?)
        } else {
            None
        };
        Ok(Self {
            version,
            device_flag,
            client_timestamp,
            uid,
            token,
            client_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnackPacket {
    pub reason_code: u8,
    pub time_diff: i64,
    /// Base64-encoded ephemeral server public key. Present for `version >= 3`.
    pub server_key: Option<String>,
    /// The session's `aesIV`, doubling as a nonce/"salt". Present for `version >= 3`.
    pub salt: Option<String>,
}

impl ConnackPacket {
    fn encode_body(&self, version: u8, out: &mut BytesMut) {
        out.put_u8(self.reason_code);
        out.put_i64(self.time_diff);
        if version > 2 {
            out.write_string(self.server_key.as_deref().unwrap_or_default());
            out.write_string(self.salt.as_deref().unwrap_or_default());
        }
    }

    fn decode_body(version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let reason_code = r.read_u8("reason_code")?;
        let time_diff = r.read_i64("time_diff")?;
        let (server_key, salt) = if version > 2 {
            (Some(r.read_string("server_key")?), Some(r.read_string("salt")?))
        } else {
            (None, None)
        };
        Ok(Self {
            reason_code,
            time_diff,
            server_key,
            salt,
        })
    }
}

/// A client-originated message. Field order on the wire: Setting, MsgKey,
/// ClientSeq, ClientMsgNo, Timestamp, ChannelID, ChannelType, Payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPacket {
    pub red_dot: bool,
    pub sync_once: bool,
    pub no_persist: bool,
    /// Bit 7 of the v4 Setting byte; remaining bits reserved.
    pub receipt: bool,
    /// Present for `version >= 3`; verifies payload integrity for this hop.
    pub msg_key: Option<String>,
    pub client_seq: u32,
    /// Present for `version >= 2`; client-supplied idempotency key.
    pub client_msg_no: Option<String>,
    pub timestamp: i32,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: Vec<u8>,
}

impl SendPacket {
    fn encode_body(&self, version: u8, out: &mut BytesMut) {
        if version > 3 {
            let setting = if self.receipt { 1u8 << 7 } else { 0 };
            out.put_u8(setting);
        }
        if version > 2 {
            out.write_string(self.msg_key.as_deref().unwrap_or_default());
        }
        out.put_u32(self.client_seq);
        if version > 1 {
            out.write_string(self.client_msg_no.as_deref().unwrap_or_default());
        }
        out.put_i32(self.timestamp);
        out.write_string(&self.channel_id);
        out.put_u8(self.channel_type);
        out.put_slice(&self.payload);
    }

    fn decode_body(version: u8, header: FixedHeader, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let receipt = if version > 3 {
            (r.read_u8("setting")? >> 7) & 0x01 != 0
        } else {
            false
        };
        let msg_key = if version > 2 {
            Some(r.read_string("msg_key")?)
        } else {
            None
        };
        let client_seq = r.read_u32("client_seq")?;
        let client_msg_no = if version > 1 {
            Some(r.read_string("client_msg_no")?)
        } else {
            None
        };
        let timestamp = r.read_i32("timestamp")?;
        let channel_id = r.read_string("channel_id")?;
        let channel_type = r.read_u8("channel_type")?;
        let payload = r.read_remaining();
        Ok(Self {
            red_dot: header.red_dot,
            sync_once: header.sync_once,
            no_persist: header.no_persist,
            receipt,
            msg_key,
            client_seq,
            client_msg_no,
            timestamp,
            channel_id,
            channel_type,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendackPacket {
    pub reason_code: u8,
    pub client_seq: u32,
    pub client_msg_no: Option<String>,
    pub message_id: i64,
    pub message_seq: u32,
}

impl SendackPacket {
    fn encode_body(&self, version: u8, out: &mut BytesMut) {
        out.put_u8(self.reason_code);
        out.put_u32(self.client_seq);
        if version > 1 {
            out.write_string(self.client_msg_no.as_deref().unwrap_or_default());
        }
        out.put_i64(self.message_id);
        out.put_u32(self.message_seq);
    }

    fn decode_body(version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let reason_code = r.read_u8("reason_code")?;
        let client_seq = r.read_u32("client_seq")?;
        let client_msg_no = if version > 1 {
            Some(r.read_string("client_msg_no")?)
        } else {
            None
        };
        let message_id = r.read_i64("message_id")?;
        let message_seq = r.read_u32("message_seq")?;
        Ok(Self {
            reason_code,
            client_seq,
            client_msg_no,
            message_id,
            message_seq,
        })
    }
}

/// A server-routed, subscriber-bound delivery. Field order on the wire:
/// Setting, MsgKey, MessageID, MessageSeq, ClientMsgNo, Timestamp,
/// ChannelID, ChannelType, FromUID, Payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvPacket {
    pub red_dot: bool,
    pub sync_once: bool,
    pub no_persist: bool,
    pub receipt: bool,
    pub msg_key: Option<String>,
    pub message_id: i64,
    pub message_seq: u32,
    pub client_msg_no: Option<String>,
    pub timestamp: i32,
    pub channel_id: String,
    pub channel_type: u8,
    pub from_uid: String,
    pub payload: Vec<u8>,
}

impl RecvPacket {
    fn encode_body(&self, version: u8, out: &mut BytesMut) {
        if version > 3 {
            let setting = if self.receipt { 1u8 << 7 } else { 0 };
            out.put_u8(setting);
        }
        if version > 2 {
            out.write_string(self.msg_key.as_deref().unwrap_or_default());
        }
        out.put_i64(self.message_id);
        out.put_u32(self.message_seq);
        if version > 1 {
            out.write_string(self.client_msg_no.as_deref().unwrap_or_default());
        }
        out.put_i32(self.timestamp);
        out.write_string(&self.channel_id);
        out.put_u8(self.channel_type);
        out.write_string(&self.from_uid);
        out.put_slice(&self.payload);
    }

    fn decode_body(version: u8, header: FixedHeader, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let receipt = if version > 3 {
            (r.read_u8("setting")? >> 7) & 0x01 != 0
        } else {
            false
        };
        let msg_key = if version > 2 {
            Some(r.read_string("msg_key")?)
        } else {
            None
        };
        let message_id = r.read_i64("message_id")?;
        let message_seq = r.read_u32("message_seq")?;
        let client_msg_no = if version > 1 {
            Some(r.read_string("client_msg_no")?)
        } else {
            None
        };
        let timestamp = r.read_i32("timestamp")?;
        let channel_id = r.read_string("channel_id")?;
        let channel_type = r.read_u8("channel_type")?;
        let from_uid = r.read_string("from_uid")?;
        let payload = r.read_remaining();
        Ok(Self {
            red_dot: header.red_dot,
            sync_once: header.sync_once,
            no_persist: header.no_persist,
            receipt,
            msg_key,
            message_id,
            message_seq,
            client_msg_no,
            timestamp,
            channel_id,
            channel_type,
            from_uid,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub reason_code: u8,
    pub reason: String,
}

impl DisconnectPacket {
    fn encode_body(&self, _version: u8, out: &mut BytesMut) {
        out.put_u8(self.reason_code);
        out.write_string(&self.reason);
    }

    fn decode_body(_version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        Ok(Self {
            reason_code: r.read_u8("reason_code")?,
            reason: r.read_string("reason")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingPacket;

impl PingPacket {
    fn encode_body(&self, _version: u8, _out: &mut BytesMut) {}

    fn decode_body(_version: u8, _body: &[u8]) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PongPacket;

impl PongPacket {
    fn encode_body(&self, _version: u8, _out: &mut BytesMut) {}

    fn decode_body(_version: u8, _body: &[u8]) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPacket {
    pub channel_id: String,
    pub channel_type: u8,
}

impl SubPacket {
    fn encode_body(&self, _version: u8, out: &mut BytesMut) {
        out.write_string(&self.channel_id);
        out.put_u8(self.channel_type);
    }

    fn decode_body(_version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        Ok(Self {
            channel_id: r.read_string("channel_id")?,
            channel_type: r.read_u8("channel_type")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubackPacket {
    pub reason_code: u8,
    pub channel_id: String,
    pub channel_type: u8,
}

impl SubackPacket {
    fn encode_body(&self, _version: u8, out: &mut BytesMut) {
        out.put_u8(self.reason_code);
        out.write_string(&self.channel_id);
        out.put_u8(self.channel_type);
    }

    fn decode_body(_version: u8, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        Ok(Self {
            reason_code: r.read_u8("reason_code")?,
            channel_id: r.read_string("channel_id")?,
            channel_type: r.read_u8("channel_type")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet, version: u8) {
        let header = packet.fixed_header();
        let mut body = BytesMut::new();
        packet.encode_body(version, &mut body);
        let decoded = Packet::decode_body(packet.packet_type(), header, version, &body)
            .expect("decode of freshly-encoded body must succeed");
        assert_eq!(decoded, packet, "round trip mismatch at version {version}");
    }

    #[test]
    fn connect_round_trips_across_versions() {
        for version in [1u8, 2, 3, 4] {
            let packet = Packet::Connect(ConnectPacket {
                version,
                device_flag: 1,
                client_timestamp: 1_700_000_000_000,
                uid: "u1".into(),
                token: "T1".into(),
                client_key: if version > 2 {
                    Some("Y2xpZW50a2V5MzJieXRlcw==".into())
                } else {
                    None
                },
            });
            roundtrip(packet, version);
        }
    }

    #[test]
    fn connack_round_trips_across_versions() {
        for version in [1u8, 2, 3, 4] {
            let packet = Packet::Connack(ConnackPacket {
                reason_code: 1,
                time_diff: 42,
                server_key: if version > 2 { Some("c2Vydmtl".into()) } else { None },
                salt: if version > 2 { Some("!!!!!!!!!!!!!!!!".into()) } else { None },
            });
            roundtrip(packet, version);
        }
    }

    #[test]
    fn send_round_trips_across_versions() {
        for version in [1u8, 2, 3, 4] {
            let packet = Packet::Send(SendPacket {
                red_dot: true,
                sync_once: false,
                no_persist: false,
                receipt: version > 3,
                msg_key: if version > 2 { Some("deadbeef".into()) } else { None },
                client_seq: 7,
                client_msg_no: if version > 1 { Some("cmn-1".into()) } else { None },
                timestamp: 1_700_000_000,
                channel_id: "b".into(),
                channel_type: 1,
                payload: b"hello world".to_vec(),
            });
            roundtrip(packet, version);
        }
    }

    #[test]
    fn sendack_round_trips_across_versions() {
        for version in [1u8, 2, 3, 4] {
            let packet = Packet::Sendack(SendackPacket {
                reason_code: 1,
                client_seq: 7,
                client_msg_no: if version > 1 { Some("cmn-1".into()) } else { None },
                message_id: 123456789,
                message_seq: 5,
            });
            roundtrip(packet, version);
        }
    }

    #[test]
    fn recv_round_trips_across_versions() {
        for version in [1u8, 2, 3, 4] {
            let packet = Packet::Recv(RecvPacket {
                red_dot: false,
                sync_once: true,
                no_persist: false,
                receipt: version > 3,
                msg_key: if version > 2 { Some("deadbeef".into()) } else { None },
                message_id: 987654321,
                message_seq: 9,
                client_msg_no: if version > 1 { Some("cmn-2".into()) } else { None },
                timestamp: 1_700_000_001,
                channel_id: "a@b".into(),
                channel_type: 1,
                from_uid: "a".into(),
                payload: b"decrypted payload".to_vec(),
            });
            roundtrip(packet, version);
        }
    }

    #[test]
    fn disconnect_ping_pong_sub_suback_round_trip() {
        for version in [1u8, 2, 3, 4] {
            roundtrip(
                Packet::Disconnect(DisconnectPacket {
                    reason_code: 0,
                    reason: "Account login on other devices".into(),
                }),
                version,
            );
            roundtrip(Packet::Ping(PingPacket), version);
            roundtrip(Packet::Pong(PongPacket), version);
            roundtrip(
                Packet::Sub(SubPacket {
                    channel_id: "g1".into(),
                    channel_type: 2,
                }),
                version,
            );
            roundtrip(
                Packet::Suback(SubackPacket {
                    reason_code: 1,
                    channel_id: "g1".into(),
                    channel_type: 2,
                }),
                version,
            );
        }
    }

    #[test]
    fn decode_reports_field_overrun_on_truncated_body() {
        let mut body = BytesMut::new();
        body.put_u8(1); // reason_code
                        // missing time_diff entirely
        let err = Packet::decode_body(PacketType::Connack, FixedHeader::default(), 1, &body)
            .unwrap_err();
        assert!(matches!(err, CodecError::FieldOverrun { field: "time_diff" }));
    }
}
