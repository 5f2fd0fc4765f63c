//! Centralized error taxonomy for relaymsg.
//!
//! Errors are recovered locally whenever they are attributable to one
//! packet, and each variant here maps to exactly one wire-level outcome
//! via [`BrokerError::kind`].

use thiserror::Error;

/// Coarse classification used to decide how a failed packet handler reacts:
/// whether the connection stays open (most errors) or is torn down
/// (protocol corruption, auth failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed frame, unknown packet type, length overrun. Fatal for the
    /// connection.
    Protocol,
    /// Token lookup failed or token mismatch. Surfaced as CONNACK(AuthFail);
    /// connection closed.
    Auth,
    /// Bad client public key, MsgKey mismatch, payload decode failure.
    /// Surfaced per-message; connection remains open.
    Crypto,
    /// Not subscribed, blacklisted. Surfaced per-message; connection stays
    /// open.
    Acl,
    /// Any store call failure. Surfaced as SENDACK(Error); connection stays
    /// open.
    Store,
    /// Bounded queue exhausted or other transient resource error. Client is
    /// expected to retry with the same ClientMsgNo.
    Transient,
}

/// Core application error type used across the broker and store crates.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("user token lookup failed")]
    TokenLookupFailed,

    #[error("token mismatch")]
    TokenMismatch,

    #[error("invalid client ECDH public key")]
    InvalidClientKey,

    #[error("MsgKey verification failed")]
    MsgKeyMismatch,

    #[error("payload decode failed: {0}")]
    PayloadDecode(String),

    #[error("sender is blacklisted or not whitelisted")]
    InBlacklist,

    #[error("channel or subscription does not exist")]
    SubscriberNotExist,

    #[error("channel delivery queue is full")]
    QueueFull,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::TokenLookupFailed | Self::TokenMismatch => ErrorKind::Auth,
            Self::InvalidClientKey | Self::MsgKeyMismatch | Self::PayloadDecode(_) => {
                ErrorKind::Crypto
            }
            Self::InBlacklist | Self::SubscriberNotExist => ErrorKind::Acl,
            Self::QueueFull => ErrorKind::Transient,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
