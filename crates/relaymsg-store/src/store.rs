//! The `Store` collaborator: user-token lookup, per-channel sequence
//! allocation, and message persistence. The broker core only ever depends
//! on the trait below, never on a concrete backend.

use async_trait::async_trait;
use relaymsg_common::model::{ChannelType, DeviceLevel, Message};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{StoreError, StoreResult};

/// Persistence and sequencing, consumed by `relaymsg-broker::handler`.
///
/// `get_next_message_seq` and `append_message` are called from the same
/// critical section in the packet handler, so a correct implementation
/// only needs monotonicity per `(channel_id, channel_type)`, not
/// gap-freedom.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_token(
        &self,
        uid: &str,
        device_flag: u8,
    ) -> StoreResult<(String, DeviceLevel)>;

    async fn get_next_message_seq(
        &self,
        channel_id: &str,
        channel_type: ChannelType,
    ) -> StoreResult<u32>;

    /// Persists `msg`, returning the storage offset (implementation-defined;
    /// the broker only logs it).
    async fn append_message(&self, msg: &Message) -> StoreResult<i64>;

    /// Appends to each subscriber's offline notify queue. Only called when
    /// the webhook subsystem is enabled.
    async fn append_message_of_notify_queue(&self, msg: &Message) -> StoreResult<()>;
}

/// Postgres-backed `Store`. Table layout (see `relaymsg-server/migrations/`):
/// `user_tokens(uid, device_flag, token, device_level)`,
/// `channel_sequences(channel_id, channel_type, next_seq)`,
/// `messages(..)`, `notify_queue(..)`.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32, min_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_user_token(
        &self,
        uid: &str,
        device_flag: u8,
    ) -> StoreResult<(String, DeviceLevel)> {
        let row: (String, i16) = sqlx::query_as(
            "SELECT token, device_level FROM user_tokens WHERE uid = $1 AND device_flag = $2",
        )
        .bind(uid)
        .bind(device_flag as i16)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::TokenLookup {
            uid: uid.to_string(),
            device_flag,
        })?;
        let level = if row.1 > 0 {
            DeviceLevel::Master
        } else {
            DeviceLevel::Slave
        };
        Ok((row.0, level))
    }

    async fn get_next_message_seq(
        &self,
        channel_id: &str,
        channel_type: ChannelType,
    ) -> StoreResult<u32> {
        let (seq,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO channel_sequences (channel_id, channel_type, next_seq)
            VALUES ($1, $2, 1)
            ON CONFLICT (channel_id, channel_type)
            DO UPDATE SET next_seq = channel_sequences.next_seq + 1
            RETURNING next_seq
            "#,
        )
        .bind(channel_id)
        .bind(channel_type.as_u8() as i16)
        .fetch_one(&self.pool)
        .await
        .map_err(|_| StoreError::SequenceAllocation {
            channel_id: channel_id.to_string(),
        })?;
        Ok(seq as u32)
    }

    async fn append_message(&self, msg: &Message) -> StoreResult<i64> {
        let (offset,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO messages
                (message_id, message_seq, client_msg_no, ts, from_uid,
                 channel_id, channel_type, setting, header, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING message_id
            "#,
        )
        .bind(msg.message_id)
        .bind(msg.message_seq as i64)
        .bind(&msg.client_msg_no)
        .bind(msg.timestamp)
        .bind(&msg.from_uid)
        .bind(&msg.channel_id)
        .bind(msg.channel_type.as_u8() as i16)
        .bind(msg.setting as i16)
        .bind(msg.header as i16)
        .bind(&msg.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(offset)
    }

    async fn append_message_of_notify_queue(&self, msg: &Message) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notify_queue (message_id, channel_id, channel_type, from_uid, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(msg.message_id)
        .bind(&msg.channel_id)
        .bind(msg.channel_type.as_u8() as i16)
        .bind(&msg.from_uid)
        .bind(&msg.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-process `Store` fake for tests: per-channel sequence counters and an
/// append-only log, guarded by a single mutex since tests never need more
/// than uncontended throughput.
pub struct InMemoryStore {
    tokens: parking_lot::Mutex<HashMap<(String, u8), (String, DeviceLevel)>>,
    sequences: parking_lot::Mutex<HashMap<(String, u8), u32>>,
    pub messages: parking_lot::Mutex<Vec<Message>>,
    pub notify_queue: parking_lot::Mutex<Vec<Message>>,
    next_offset: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tokens: parking_lot::Mutex::new(HashMap::new()),
            sequences: parking_lot::Mutex::new(HashMap::new()),
            messages: parking_lot::Mutex::new(Vec::new()),
            notify_queue: parking_lot::Mutex::new(Vec::new()),
            next_offset: AtomicI64::new(1),
        }
    }

    pub fn set_token(&self, uid: &str, device_flag: u8, token: &str, level: DeviceLevel) {
        self.tokens
            .lock()
            .insert((uid.to_string(), device_flag), (token.to_string(), level));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user_token(
        &self,
        uid: &str,
        device_flag: u8,
    ) -> StoreResult<(String, DeviceLevel)> {
        self.tokens
            .lock()
            .get(&(uid.to_string(), device_flag))
            .cloned()
            .ok_or_else(|| StoreError::TokenLookup {
                uid: uid.to_string(),
                device_flag,
            })
    }

    async fn get_next_message_seq(
        &self,
        channel_id: &str,
        channel_type: ChannelType,
    ) -> StoreResult<u32> {
        let mut sequences = self.sequences.lock();
        let seq = sequences
            .entry((channel_id.to_string(), channel_type.as_u8()))
            .or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn append_message(&self, msg: &Message) -> StoreResult<i64> {
        self.messages.lock().push(msg.clone());
        Ok(self.next_offset.fetch_add(1, Ordering::Relaxed))
    }

    async fn append_message_of_notify_queue(&self, msg: &Message) -> StoreResult<()> {
        self.notify_queue.lock().push(msg.clone());
        Ok(())
    }
}
