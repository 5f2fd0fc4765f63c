/// Wire-level outcome codes carried by CONNACK, SENDACK, and SUBACK.
///
/// Values are frozen as an external contract: once a client at any
/// supported version has shipped against these, they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReasonCode {
    Success = 1,
    Error = 2,
    AuthFail = 3,
    InBlacklist = 4,
    SubscriberNotExist = 5,
    MsgKeyError = 6,
    PayloadDecodeError = 7,
    ConnackInProgress = 8,
}

impl ReasonCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Success),
            2 => Some(Self::Error),
            3 => Some(Self::AuthFail),
            4 => Some(Self::InBlacklist),
            5 => Some(Self::SubscriberNotExist),
            6 => Some(Self::MsgKeyError),
            7 => Some(Self::PayloadDecodeError),
            8 => Some(Self::ConnackInProgress),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}
