//! Per-channel message queue with single-writer fan-out to subscribers.
//! A `Channel` owns a bounded inbound queue and spawns exactly one delivery
//! task on creation; that task is the ordering point and the backpressure
//! point for everything addressed to this channel.

use std::sync::Arc;

use relaymsg_common::model::{ChannelType, Message};
use relaymsg_protocol::Packet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::ClientRegistry;
use crate::to_recv_packet;
use relaymsg_store::AclSource;

pub struct Channel {
    pub channel_id: String,
    pub channel_type: ChannelType,
    tx: mpsc::Sender<Message>,
}

/// Returned by `put_message` when the bounded inbound queue is full. A
/// transient condition: the client is expected to retry with the same
/// ClientMsgNo.
#[derive(Debug, thiserror::Error)]
#[error("channel {channel_id} delivery queue is full")]
pub struct QueueFull {
    pub channel_id: String,
}

impl Channel {
    pub fn new(
        channel_id: String,
        channel_type: ChannelType,
        capacity: usize,
        registry: Arc<ClientRegistry>,
        acl: Arc<dyn AclSource>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let delivery_channel_id = channel_id.clone();
        tokio::spawn(delivery_loop(
            delivery_channel_id,
            channel_type,
            rx,
            registry,
            acl,
        ));
        Self {
            channel_id,
            channel_type,
            tx,
        }
    }

    /// Non-blocking enqueue. Fails with [`QueueFull`] if the delivery
    /// worker is behind; never blocks the caller on subscriber I/O.
    pub fn put_message(&self, msg: Message) -> Result<(), QueueFull> {
        self.tx.try_send(msg).map_err(|_| QueueFull {
            channel_id: self.channel_id.clone(),
        })
    }
}

async fn delivery_loop(
    channel_id: String,
    channel_type: ChannelType,
    mut rx: mpsc::Receiver<Message>,
    registry: Arc<ClientRegistry>,
    acl: Arc<dyn AclSource>,
) {
    while let Some(msg) = rx.recv().await {
        let subscribers = acl.subscribers(&channel_id, channel_type).await;
        for subscriber in subscribers {
            // Default fan-out policy excludes the sender.
            if subscriber == msg.from_uid {
                continue;
            }
            for session in registry.sessions_for_uid(&subscriber) {
                // The hop cipher is per-session, so the
                // plaintext payload is re-encrypted under each recipient's
                // own aesKey/aesIV rather than forwarded as one shared
                // ciphertext.
                match to_recv_packet(&msg, session.version, &session.aes_key, &session.aes_iv) {
                    Ok(recv) => {
                        if let Err(e) = session.send(Packet::Recv(recv)) {
                            warn!(uid = %subscriber, conn_id = session.conn_id, error = %e, "failed to queue RECV for subscriber");
                        }
                    }
                    Err(e) => {
                        warn!(uid = %subscriber, conn_id = session.conn_id, error = %e, "failed to encrypt RECV payload for subscriber");
                    }
                }
            }
        }
        debug!(channel_id = %channel_id, message_seq = msg.message_seq, "delivered to subscribers");
    }
}
