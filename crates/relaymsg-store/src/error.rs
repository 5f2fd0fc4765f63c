use thiserror::Error;

/// Failures surfaced by the `Store`/`Webhook`/`Monitor` collaborators.
/// `relaymsg-broker` only ever sees this through `BrokerError::Store`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user token lookup failed for {uid}/{device_flag:?}")]
    TokenLookup { uid: String, device_flag: u8 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("channel sequence allocation failed for {channel_id}")]
    SequenceAllocation { channel_id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
