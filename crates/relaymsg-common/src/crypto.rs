//! Session-handshake crypto helpers.
//!
//! The hop cipher is session-scoped, not message-scoped and not end-to-end:
//! it protects the wire between one client and this broker, nothing more.
//! This module covers:
//!
//! - Curve25519 (X25519) ephemeral keypair + shared-secret derivation for
//!   the CONNECT/CONNACK handshake (v≥3).
//! - AES-128-CBC/PKCS7 encrypt/decrypt of SEND/RECV payloads.
//! - MD5-based MsgKey computation used to detect in-flight tampering.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use md5::{Digest, Md5};
use rand::Rng;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("client public key must decode to exactly 32 bytes")]
    BadClientKey,
    #[error("ciphertext is not valid base64")]
    BadBase64,
    #[error("AES padding/length error")]
    BadPadding,
}

/// An ephemeral X25519 keypair generated for one handshake.
pub struct EcdhKeypair {
    pub public: [u8; 32],
    secret: EphemeralSecret,
}

/// Generate a fresh ephemeral Curve25519 keypair.
pub fn ecdh_keypair() -> EcdhKeypair {
    let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
    let public = PublicKey::from(&secret);
    EcdhKeypair {
        public: *public.as_bytes(),
        secret,
    }
}

/// Derive the 32-byte shared secret from our ephemeral secret and the
/// peer's public key bytes (as decoded from the wire).
pub fn ecdh_shared(keypair: EcdhKeypair, peer_public: &[u8; 32]) -> [u8; 32] {
    let peer = PublicKey::from(*peer_public);
    *keypair.secret.diffie_hellman(&peer).as_bytes()
}

/// Decode a Base64-encoded 32-byte X25519 public key as sent in
/// `ConnectPacket::client_key`.
pub fn decode_client_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = B64.decode(encoded).map_err(|_| CryptoError::BadClientKey)?;
    bytes.try_into().map_err(|_| CryptoError::BadClientKey)
}

/// Encode our ephemeral public key for `ConnackPacket::server_key`.
pub fn encode_server_key(public: &[u8; 32]) -> String {
    B64.encode(public)
}

/// Derive the session's AES key/IV from the ECDH shared secret:
/// `aesKey = first16Hex(MD5(Base64(shared)))`, `aesIV = 16 random
/// printable ASCII bytes`. Both are treated as ASCII strings when passed
/// to AES.
pub fn derive_session_key(shared: &[u8; 32]) -> (String, String) {
    let shared_b64 = B64.encode(shared);
    let digest = md5_hex(shared_b64.as_bytes());
    let aes_key = digest[..16].to_string();
    let aes_iv = random_printable_ascii(16);
    (aes_key, aes_iv)
}

/// 16 random printable ASCII characters ('!'..='~'), used for `aesIV`.
pub fn random_printable_ascii(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let c = rng.random_range(b'!'..=b'~');
            c as char
        })
        .collect()
}

/// Lower-hex MD5 digest of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// AES-128-CBC encrypt with PKCS7 padding. `key` and `iv` are treated as
/// raw ASCII byte strings (both must be exactly 16 bytes).
pub fn aes_cbc_pkcs7_encrypt(data: &[u8], key: &str, iv: &str) -> Result<Vec<u8>, CryptoError> {
    let key16: [u8; 16] = key.as_bytes().try_into().map_err(|_| CryptoError::BadPadding)?;
    let iv16: [u8; 16] = iv.as_bytes().try_into().map_err(|_| CryptoError::BadPadding)?;
    let enc = Aes128CbcEnc::new(&key16.into(), &iv16.into());
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
}

/// AES-128-CBC decrypt with PKCS7 unpadding.
pub fn aes_cbc_pkcs7_decrypt(data: &[u8], key: &str, iv: &str) -> Result<Vec<u8>, CryptoError> {
    let key16: [u8; 16] = key.as_bytes().try_into().map_err(|_| CryptoError::BadPadding)?;
    let iv16: [u8; 16] = iv.as_bytes().try_into().map_err(|_| CryptoError::BadPadding)?;
    let dec = Aes128CbcDec::new(&key16.into(), &iv16.into());
    dec.decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::BadPadding)
}

/// `VerifyString` for an already server-assigned `RecvPacket`, in field
/// order `MessageID, MessageSeq, ClientMsgNo, Timestamp, FromUID,
/// ChannelID, ChannelType, Payload`.
pub fn recv_verify_bytes(
    message_id: i64,
    message_seq: u32,
    client_msg_no: &str,
    timestamp: i32,
    from_uid: &str,
    channel_id: &str,
    channel_type: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = format!(
        "{message_id}{message_seq}{client_msg_no}{timestamp}{from_uid}{channel_id}{channel_type}"
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out
}

/// `VerifyString` for a client-supplied `SendPacket`. Since `SendPacket`
/// carries neither `MessageID` nor `MessageSeq` (both are assigned by the
/// server only after this check), the verify string drops those two
/// leading fields relative to [`recv_verify_bytes`]: `ClientMsgNo,
/// Timestamp, FromUID, ChannelID, ChannelType, Payload` — using the
/// client's own `Timestamp`, not a server-assigned one.
pub fn send_verify_bytes(
    client_msg_no: &str,
    timestamp: i32,
    from_uid: &str,
    channel_id: &str,
    channel_type: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = format!("{client_msg_no}{timestamp}{from_uid}{channel_id}{channel_type}").into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Encrypt-then-Base64-then-MD5 a verify string:
/// `MD5(Base64(AES_CBC_PKCS7(verify_bytes, key, iv)))`.
///
/// Takes raw bytes rather than `&str`: the verify string's trailing
/// `Payload` component is itself AES ciphertext, which is not guaranteed
/// to be valid UTF-8.
pub fn msg_key(verify_bytes: &[u8], key: &str, iv: &str) -> Result<String, CryptoError> {
    let cipher = aes_cbc_pkcs7_encrypt(verify_bytes, key, iv)?;
    let cipher_b64 = B64.encode(cipher);
    Ok(md5_hex(cipher_b64.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_round_trip_produces_matching_shared_secret() {
        let client = ecdh_keypair();
        let server = ecdh_keypair();
        let client_pub = client.public;
        let server_pub = server.public;
        let client_shared = ecdh_shared(client, &server_pub);
        let server_shared = ecdh_shared(server, &client_pub);
        assert_eq!(client_shared, server_shared);
    }

    #[test]
    fn aes_cbc_round_trips() {
        let key = "0123456789abcdef";
        let iv = "fedcba9876543210";
        let plain = b"hello, relaymsg";
        let cipher = aes_cbc_pkcs7_encrypt(plain, key, iv).unwrap();
        assert_ne!(cipher, plain);
        let back = aes_cbc_pkcs7_decrypt(&cipher, key, iv).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn msg_key_is_deterministic_and_sensitive_to_payload() {
        let key = "0123456789abcdef";
        let iv = "fedcba9876543210";
        let k1 = msg_key(b"a1b2c3", key, iv).unwrap();
        let k2 = msg_key(b"a1b2c3", key, iv).unwrap();
        assert_eq!(k1, k2);
        let k3 = msg_key(b"a1b2c4", key, iv).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn derive_session_key_produces_16_byte_ascii_key_and_iv() {
        let shared = [7u8; 32];
        let (key, iv) = derive_session_key(&shared);
        assert_eq!(key.len(), 16);
        assert_eq!(iv.len(), 16);
        assert!(iv.bytes().all(|b| (b'!'..=b'~').contains(&b)));
    }

    #[test]
    fn send_and_recv_verify_bytes_agree_once_message_id_and_seq_are_dropped() {
        let recv = recv_verify_bytes(0, 0, "cmn-1", 1_700_000_000, "a", "a@b", 1, b"cipher");
        let send = send_verify_bytes("cmn-1", 1_700_000_000, "a", "a@b", 1, b"cipher");
        assert_eq!(recv, send);
    }

    #[test]
    fn verify_bytes_tampering_changes_the_output() {
        let base = send_verify_bytes("cmn-1", 1_700_000_000, "a", "a@b", 1, b"cipher");
        let tampered = send_verify_bytes("cmn-1", 1_700_000_000, "a", "a@b", 1, b"ciphex");
        assert_ne!(base, tampered);
    }
}
