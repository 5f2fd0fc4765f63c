//! The broker core: connection/session state machine, packet-handling
//! pipeline, and channel fan-out. Everything this crate depends on outside
//! itself — persistence, webhooks, counters, the ACL/subscriber data
//! source — is reached only through the trait objects in
//! `relaymsg-store`, kept as external collaborators rather than concrete
//! types.

pub mod channel;
pub mod channel_manager;
pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
pub mod timing_wheel;

pub use channel::{Channel, QueueFull};
pub use channel_manager::ChannelManager;
pub use connection::{run_connection, BrokerState};
pub use handler::PacketHandler;
pub use registry::ClientRegistry;
pub use session::{Session, WriterClosed};
pub use timing_wheel::TimingWheel;

use relaymsg_common::error::BrokerError;
use relaymsg_common::model::Message;
use relaymsg_protocol::RecvPacket;

pub(crate) const FLAG_RED_DOT: u8 = 0b1000;
pub(crate) const FLAG_SYNC_ONCE: u8 = 0b0100;
pub(crate) const FLAG_NO_PERSIST: u8 = 0b0010;
pub(crate) const SETTING_RECEIPT: u8 = 0b1000_0000;

/// Turn a persisted [`Message`] into the [`RecvPacket`] written to one
/// particular recipient session, re-encrypting the plaintext payload under
/// that session's own `aesKey`/`aesIV` (the hop cipher is per-session, not
/// per-message).
pub fn to_recv_packet(
    msg: &Message,
    version: u8,
    aes_key: &str,
    aes_iv: &str,
) -> Result<RecvPacket, BrokerError> {
    let (payload, msg_key) = if version > 2 {
        let ciphertext = relaymsg_common::crypto::aes_cbc_pkcs7_encrypt(&msg.payload, aes_key, aes_iv)
            .map_err(|e| BrokerError::PayloadDecode(e.to_string()))?;
        let verify = relaymsg_common::crypto::recv_verify_bytes(
            msg.message_id,
            msg.message_seq,
            &msg.client_msg_no,
            msg.timestamp,
            &msg.from_uid,
            &msg.channel_id,
            msg.channel_type.as_u8(),
            &ciphertext,
        );
        let key = relaymsg_common::crypto::msg_key(&verify, aes_key, aes_iv)
            .map_err(|e| BrokerError::PayloadDecode(e.to_string()))?;
        (ciphertext, Some(key))
    } else {
        (msg.payload.clone(), None)
    };

    Ok(RecvPacket {
        red_dot: msg.header & FLAG_RED_DOT != 0,
        sync_once: msg.header & FLAG_SYNC_ONCE != 0,
        no_persist: msg.header & FLAG_NO_PERSIST != 0,
        receipt: msg.setting & SETTING_RECEIPT != 0,
        msg_key,
        message_id: msg.message_id,
        message_seq: msg.message_seq,
        client_msg_no: Some(msg.client_msg_no.clone()),
        timestamp: msg.timestamp,
        channel_id: msg.channel_id.clone(),
        channel_type: msg.channel_type.as_u8(),
        from_uid: msg.from_uid.clone(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymsg_common::model::ChannelType;

    fn sample_message() -> Message {
        Message {
            message_id: 42,
            message_seq: 3,
            client_msg_no: "cmn-1".into(),
            timestamp: 1_700_000_000,
            from_uid: "a".into(),
            channel_id: "a@b".into(),
            channel_type: ChannelType::Person,
            setting: SETTING_RECEIPT,
            header: 0,
            payload: b"plaintext".to_vec(),
        }
    }

    #[test]
    fn v1_recv_packet_carries_payload_unencrypted() {
        let msg = sample_message();
        let packet = to_recv_packet(&msg, 1, "0123456789abcdef", "fedcba9876543210").unwrap();
        assert_eq!(packet.payload, msg.payload);
        assert!(packet.msg_key.is_none());
    }

    #[test]
    fn v4_recv_packet_is_encrypted_and_carries_a_msg_key() {
        let msg = sample_message();
        let packet = to_recv_packet(&msg, 4, "0123456789abcdef", "fedcba9876543210").unwrap();
        assert_ne!(packet.payload, msg.payload);
        assert!(packet.msg_key.is_some());
        assert!(packet.receipt);
    }

    #[test]
    fn different_session_keys_produce_different_ciphertext_for_the_same_message() {
        let msg = sample_message();
        let a = to_recv_packet(&msg, 4, "0123456789abcdef", "fedcba9876543210").unwrap();
        let b = to_recv_packet(&msg, 4, "ffffffffffffffff", "0000000000000000").unwrap();
        assert_ne!(a.payload, b.payload);
    }
}
