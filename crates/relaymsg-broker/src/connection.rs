//! The per-connection task: decode frames, dispatch through the shared
//! [`PacketHandler`], and drain this connection's own session writer queue
//! back onto the wire. A connection is a single actor that owns its socket;
//! we keep that shape as one combined read/write loop rather than splitting
//! `Framed` into independent halves, since a split would let the read side's
//! negotiated `Codec::version` drift out of sync with the write side after
//! CONNECT.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relaymsg_common::config::Mode;
use relaymsg_common::model::{ConnId, DeviceFlag, DeviceLevel};
use relaymsg_common::snowflake::SnowflakeGenerator;
use relaymsg_protocol::{Codec, Packet};
use relaymsg_store::{AclSource, Monitor, OnlineStatusWebhook, Store};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::channel_manager::ChannelManager;
use crate::handler::{Outcome, PacketHandler};
use crate::registry::ClientRegistry;

/// Where a connection sits in the CONNECT state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    New,
    Authed,
    Closed,
}

/// Per-connection mutable state, owned by the connection task and handed to
/// the shared [`PacketHandler`] by mutable reference on every call.
pub struct ConnState {
    pub conn_id: ConnId,
    pub status: ConnStatus,
    pub version: u8,
    pub uid: Option<String>,
    pub device_flag: Option<DeviceFlag>,
    pub device_level: Option<DeviceLevel>,
    pub aes_key: String,
    pub aes_iv: String,
    pub writer: mpsc::UnboundedSender<Packet>,
}

impl ConnState {
    pub fn new(conn_id: ConnId, writer: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            conn_id,
            status: ConnStatus::New,
            version: 1,
            uid: None,
            device_flag: None,
            device_level: None,
            aes_key: String::new(),
            aes_iv: String::new(),
            writer,
        }
    }
}

/// Out-of-band signal used to force-close a preempted connection's socket
/// once the grace period elapses, independent of its writer channel (the
/// evicted `Session` has already been removed from `ClientRegistry` by then,
/// so nothing would otherwise wake a read loop blocked in `framed.next()`).
#[derive(Default)]
pub struct ShutdownSignals {
    inner: parking_lot::Mutex<HashMap<ConnId, Arc<Notify>>>,
}

impl ShutdownSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn_id: ConnId) -> Arc<Notify> {
        self.inner
            .lock()
            .entry(conn_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn signal(&self, conn_id: ConnId) {
        if let Some(notify) = self.inner.lock().get(&conn_id) {
            notify.notify_one();
        }
    }

    pub fn clear(&self, conn_id: ConnId) {
        self.inner.lock().remove(&conn_id);
    }
}

/// Everything the packet handler needs beyond one connection's own state:
/// the session registry, channel cache, and the external collaborators,
/// reached only through their trait objects.
pub struct BrokerState {
    pub registry: Arc<ClientRegistry>,
    pub channels: Arc<ChannelManager>,
    pub store: Arc<dyn Store>,
    pub webhook: Arc<dyn OnlineStatusWebhook>,
    pub monitor: Arc<dyn Monitor>,
    pub acl: Arc<dyn AclSource>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub mode: Mode,
    pub webhook_enabled: bool,
    pub preemption_grace: Duration,
    pub read_timeout: Duration,
    pub shutdowns: Arc<ShutdownSignals>,
}

enum Event {
    Shutdown,
    Outgoing(Packet),
    WriterClosed,
    Incoming(Result<Option<Result<Packet, relaymsg_protocol::CodecError>>, tokio::time::error::Elapsed>),
}

/// Drive one accepted connection end to end. Generic over the byte stream so
/// integration tests can exercise the full pipeline over an in-memory
/// `tokio::io::duplex` instead of a real `TcpStream`.
pub async fn run_connection<S>(conn_id: ConnId, socket: S, state: Arc<BrokerState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
    let mut conn = ConnState::new(conn_id, writer_tx);
    let handler = PacketHandler::new(state.clone());
    let shutdown = state.shutdowns.register(conn_id);
    let mut framed = Framed::new(socket, Codec::new());

    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.notified() => Event::Shutdown,

            maybe_out = writer_rx.recv() => match maybe_out {
                Some(packet) => Event::Outgoing(packet),
                None => Event::WriterClosed,
            },

            incoming = tokio::time::timeout(state.read_timeout, framed.next()) => Event::Incoming(incoming),
        };

        match event {
            Event::Shutdown => {
                debug!(conn_id, "forced shutdown after preemption grace period");
                break;
            }
            Event::WriterClosed => {
                // Only reachable if this session's own writer sender was
                // dropped without a replacement queued; nothing left to flush.
                break;
            }
            Event::Outgoing(packet) => {
                state.monitor.downstream_packet_inc();
                if let Err(e) = framed.send(packet).await {
                    warn!(conn_id, error = %e, "write failed, closing connection");
                    break;
                }
            }
            Event::Incoming(Ok(Some(Ok(packet)))) => {
                state.monitor.upstream_packet_inc();
                match handler.handle_packet(&mut conn, packet).await {
                    Outcome::Continue => {
                        if conn.status == ConnStatus::Authed {
                            framed.codec_mut().set_version(conn.version);
                        }
                    }
                    Outcome::Close => break,
                }
            }
            Event::Incoming(Ok(Some(Err(e)))) => {
                warn!(conn_id, error = %e, "frame decode error, closing connection");
                break;
            }
            Event::Incoming(Ok(None)) => {
                debug!(conn_id, "peer closed connection");
                break;
            }
            Event::Incoming(Err(_elapsed)) => {
                debug!(conn_id, "idle read timeout, closing connection");
                break;
            }
        }
    }

    conn.status = ConnStatus::Closed;
    handler.handle_disconnect(&conn).await;
    state.shutdowns.clear(conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;
    use relaymsg_common::config::Mode;
    use relaymsg_protocol::{ConnackPacket, ConnectPacket, ReasonCode};
    use relaymsg_store::{AtomicMonitor, InMemoryAclSource, InMemoryStore, RecordingWebhook};
    use std::time::Duration as StdDuration;
    use tokio_util::codec::Framed as ClientFramed;

    fn test_state() -> Arc<BrokerState> {
        let registry = Arc::new(ClientRegistry::new());
        let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());
        let channels = Arc::new(ChannelManager::new(registry.clone(), acl.clone(), 16));
        Arc::new(BrokerState {
            registry,
            channels,
            store: Arc::new(InMemoryStore::new()),
            webhook: Arc::new(RecordingWebhook::new()),
            monitor: Arc::new(AtomicMonitor::new()),
            acl,
            snowflake: Arc::new(SnowflakeGenerator::new(1)),
            mode: Mode::Test,
            webhook_enabled: false,
            preemption_grace: StdDuration::from_millis(20),
            read_timeout: StdDuration::from_secs(5),
            shutdowns: Arc::new(ShutdownSignals::new()),
        })
    }

    #[tokio::test]
    async fn connect_over_a_duplex_stream_yields_a_connack_success() {
        let state = test_state();
        let (server_side, client_side) = tokio::io::duplex(4096);

        tokio::spawn(run_connection(1, server_side, state));

        let mut client = ClientFramed::new(client_side, Codec::new());
        client
            .send(Packet::Connect(ConnectPacket {
                version: 1,
                device_flag: 1,
                client_timestamp: 1_700_000_000_000,
                uid: "u1".into(),
                token: String::new(),
                client_key: None,
            }))
            .await
            .unwrap();

        let reply = tokio::time::timeout(StdDuration::from_secs(1), client.next())
            .await
            .expect("reply within deadline")
            .expect("stream not closed")
            .expect("frame decodes");
        match reply {
            Packet::Connack(ConnackPacket { reason_code, .. }) => {
                assert_eq!(reason_code, ReasonCode::Success.as_u8());
            }
            other => panic!("expected Connack, got {other:?}"),
        }
    }
}
