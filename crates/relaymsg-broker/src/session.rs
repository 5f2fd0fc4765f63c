//! A `Session` is the registry-owned half of an authenticated connection:
//! everything needed to address and write to a client after CONNECT
//! succeeds. The read task and delivery workers only ever see an
//! `Arc<Session>` obtained from the [`crate::registry::ClientRegistry`];
//! the socket itself is owned by the per-connection write task, so a
//! `Session` never holds a strong handle back to its `Connection` and the
//! two can't form a reference cycle.

use relaymsg_common::model::{ConnId, DeviceFlag, DeviceLevel};
use relaymsg_protocol::Packet;
use tokio::sync::mpsc;

/// One authenticated client, as seen by everything except its own read
/// task. Writing to a session never blocks the caller on socket I/O: it
/// only pushes onto this session's serialized writer queue.
pub struct Session {
    pub conn_id: ConnId,
    pub uid: String,
    pub device_flag: DeviceFlag,
    pub device_level: DeviceLevel,
    pub version: u8,
    pub aes_key: String,
    pub aes_iv: String,
    writer: mpsc::UnboundedSender<Packet>,
}

/// Returned when a write is attempted against a session whose writer task
/// has already exited (socket closed, preemption in flight).
#[derive(Debug, thiserror::Error)]
#[error("session {0} writer has shut down")]
pub struct WriterClosed(pub ConnId);

impl Session {
    pub fn new(
        conn_id: ConnId,
        uid: String,
        device_flag: DeviceFlag,
        device_level: DeviceLevel,
        version: u8,
        aes_key: String,
        aes_iv: String,
        writer: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            conn_id,
            uid,
            device_flag,
            device_level,
            version,
            aes_key,
            aes_iv,
            writer,
        }
    }

    /// Enqueue `packet` onto this session's writer task. Multiple callers
    /// (the packet handler itself, and channel fan-out workers) may call
    /// this concurrently; the underlying channel serializes delivery so
    /// frames on the wire are never interleaved.
    pub fn send(&self, packet: Packet) -> Result<(), WriterClosed> {
        self.writer
            .send(packet)
            .map_err(|_| WriterClosed(self.conn_id))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("uid", &self.uid)
            .field("device_flag", &self.device_flag)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
