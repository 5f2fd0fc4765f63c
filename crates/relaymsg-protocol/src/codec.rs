use crate::error::CodecError;
use crate::fixed_header::{
    decode_remaining_length, encode_remaining_length, remaining_length_encoded_size, FixedHeader,
};
use crate::packet::Packet;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Guards against a malicious or corrupt peer announcing an enormous
/// remaining-length and starving the connection's read buffer.
const MAX_FRAME_LEN: usize = 1 << 20;

/// The `tokio_util::codec::{Decoder, Encoder}` for one connection.
///
/// `version` is not negotiated by the codec itself — the packet handler
/// reads the client's declared version off the first `ConnectPacket` and
/// calls [`Codec::set_version`] before decoding anything that depends on
/// version-gated fields. Until then, the codec defaults to version 1 (the
/// narrowest field set), which is exactly what's needed to decode a
/// `ConnectPacket` itself, since that packet carries its own version byte.
#[derive(Debug, Clone)]
pub struct Codec {
    version: u8,
}

impl Default for Codec {
    fn default() -> Self {
        Self { version: 1 }
    }
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    pub fn version(&self) -> u8 {
        self.version
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        let header_byte = src[0];
        let (packet_type, header) = FixedHeader::from_byte(header_byte)?;

        let Some((remaining_len, varint_len)) = decode_remaining_length(&src[1..])? else {
            return Ok(None);
        };
        let remaining_len = remaining_len as usize;
        if remaining_len > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge { max: MAX_FRAME_LEN });
        }

        let frame_len = 1 + varint_len + remaining_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(1 + varint_len);
        let body = src.split_to(remaining_len);
        let packet = Packet::decode_body(packet_type, header, self.version, &body)?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for Codec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        item.encode_body(self.version, &mut body);

        if body.len() > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge { max: MAX_FRAME_LEN });
        }

        dst.reserve(1 + remaining_length_encoded_size(body.len() as u32) + body.len());
        dst.extend_from_slice(&[item.fixed_header().to_byte(item.packet_type())]);
        encode_remaining_length(body.len() as u32, dst);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PingPacket, SendPacket};

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::Ping(PingPacket), &mut buf)
            .expect("ping encodes");
        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn encode_then_decode_round_trips_through_framed_buffer() {
        let mut codec = Codec::new();
        codec.set_version(4);
        let packet = Packet::Send(SendPacket {
            red_dot: false,
            sync_once: false,
            no_persist: true,
            receipt: true,
            msg_key: Some("abc123".into()),
            client_seq: 1,
            client_msg_no: Some("cmn".into()),
            timestamp: 1_700_000_000,
            channel_id: "chan".into(),
            channel_type: 2,
            payload: b"ciphertext".to_vec(),
        });
        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        codec.encode(Packet::Ping(PingPacket), &mut buf).unwrap();
        codec.encode(Packet::Ping(PingPacket), &mut buf).unwrap();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Ping(PingPacket))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Ping(PingPacket))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[(crate::PacketType::Send as u8) << 4]);
        // Remaining-length varint encoding a value > MAX_FRAME_LEN.
        crate::fixed_header::encode_remaining_length((MAX_FRAME_LEN as u32) + 1, &mut buf);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
    }
}
