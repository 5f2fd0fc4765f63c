//! Wire-independent domain model: devices, channels, persisted messages.
//!
//! These types are shared by the protocol codec, the broker's core state
//! machine, and the store layer, so they live in the foundation crate rather
//! than any one of those.

use serde::{Deserialize, Serialize};

/// Process-unique connection identifier, monotonic for the lifetime of the
/// process. Assigned on accept.
pub type ConnId = u64;

/// Client-category partition of the "one session per user" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceFlag {
    App = 1,
    Web = 2,
    Pc = 3,
}

impl DeviceFlag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::App),
            2 => Some(Self::Web),
            3 => Some(Self::Pc),
            _ => None,
        }
    }
}

/// Master/Slave tier governing whether a device may preempt others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceLevel {
    Slave,
    Master,
}

/// Distinguishes a 1:1 conversation from a multi-subscriber group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    Person = 1,
    Group = 2,
}

impl ChannelType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Person),
            2 => Some(Self::Group),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Given the two participants of a Person channel, derive the canonical,
/// order-independent channel id so both directions share one sequence
/// space. Lexicographic ordering of the two uids, per the resolution of
/// Open Question 3.
pub fn fake_channel_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}@{b}")
    } else {
        format!("{b}@{a}")
    }
}

/// A persisted message row. `message_seq == 0` denotes "not stored".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub message_seq: u32,
    pub client_msg_no: String,
    pub timestamp: i32,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub setting: u8,
    pub header: u8,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_channel_id_is_order_independent() {
        assert_eq!(fake_channel_id("a", "b"), "a@b");
        assert_eq!(fake_channel_id("b", "a"), "a@b");
    }

    #[test]
    fn device_flag_round_trips() {
        for v in [1u8, 2, 3] {
            assert_eq!(DeviceFlag::from_u8(v).unwrap() as u8, v);
        }
        assert!(DeviceFlag::from_u8(0).is_none());
    }
}
