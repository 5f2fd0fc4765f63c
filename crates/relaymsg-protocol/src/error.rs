use thiserror::Error;

/// Everything that can go wrong turning bytes into a [`crate::Packet`], or
/// vice versa. Encoding a well-formed `Packet` never fails — only decoding
/// untrusted bytes off the wire can.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("field `{field}` length prefix overruns the remaining frame")]
    FieldOverrun { field: &'static str },

    #[error("field `{field}` requires protocol version >= {min_version}")]
    MissingForVersion { field: &'static str, min_version: u8 },

    #[error("unknown packet type byte {0}")]
    UnknownPacketType(u8),

    #[error("remaining-length varint exceeds the 4-byte / 2^28-1 limit")]
    RemainingLengthTooLarge,

    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("frame exceeds the maximum permitted size of {max} bytes")]
    FrameTooLarge { max: usize },
}
