use crate::error::CodecError;
use bytes::{Buf, BufMut};

/// The ten packet kinds that ride the wire, packed into the high nibble of
/// the fixed header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Send = 3,
    Sendack = 4,
    Recv = 5,
    Disconnect = 6,
    Ping = 7,
    Pong = 8,
    Sub = 9,
    Suback = 10,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Connack),
            3 => Ok(Self::Send),
            4 => Ok(Self::Sendack),
            5 => Ok(Self::Recv),
            6 => Ok(Self::Disconnect),
            7 => Ok(Self::Ping),
            8 => Ok(Self::Pong),
            9 => Ok(Self::Sub),
            10 => Ok(Self::Suback),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }
}

const RED_DOT: u8 = 0b1000;
const SYNC_ONCE: u8 = 0b0100;
const NO_PERSIST: u8 = 0b0010;
const DUP: u8 = 0b0001;

/// The one-byte frame header: packet type in the high nibble, four flags in
/// the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedHeader {
    pub red_dot: bool,
    pub sync_once: bool,
    pub no_persist: bool,
    pub dup: bool,
}

impl FixedHeader {
    pub fn to_byte(self, packet_type: PacketType) -> u8 {
        let mut flags = 0u8;
        if self.red_dot {
            flags |= RED_DOT;
        }
        if self.sync_once {
            flags |= SYNC_ONCE;
        }
        if self.no_persist {
            flags |= NO_PERSIST;
        }
        if self.dup {
            flags |= DUP;
        }
        ((packet_type as u8) << 4) | flags
    }

    pub fn from_byte(byte: u8) -> Result<(PacketType, Self), CodecError> {
        let packet_type = PacketType::from_u8(byte >> 4)?;
        let flags = byte & 0x0F;
        let header = FixedHeader {
            red_dot: flags & RED_DOT != 0,
            sync_once: flags & SYNC_ONCE != 0,
            no_persist: flags & NO_PERSIST != 0,
            dup: flags & DUP != 0,
        };
        Ok((packet_type, header))
    }
}

/// Maximum representable remaining-length value: 4 continuation-bit bytes,
/// 7 payload bits each, MQTT-style.
pub const MAX_REMAINING_LENGTH: u32 = (1 << 28) - 1;

/// Encode `len` as a continuation-bit varint (little-endian 7-bit groups,
/// high bit set on every byte but the last).
pub fn encode_remaining_length(mut len: u32, out: &mut impl BufMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Attempt to decode a remaining-length varint from the front of `buf`
/// without consuming it on failure/incompleteness. Returns `Ok(None)` if
/// more bytes are needed.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(u32, usize)>, CodecError> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;
    for (i, &byte) in buf.iter().enumerate().take(4) {
        value += (byte as u32 & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(CodecError::RemainingLengthTooLarge);
    }
    Ok(None)
}

pub fn remaining_length_encoded_size(len: u32) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Peek the first byte of `buf` (the fixed header) without consuming it.
pub fn peek_u8(buf: &[u8]) -> Option<u8> {
    buf.first().copied()
}

pub fn advance(buf: &mut impl Buf, n: usize) {
    buf.advance(n);
}
