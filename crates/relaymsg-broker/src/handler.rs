//! The state machine that ties the whole broker together: CONNECT →
//! handshake → SEND → route. One `PacketHandler` is shared (behind `Arc`)
//! across every connection; all per-connection mutable state lives in
//! [`crate::connection::ConnState`], passed in by reference on every call.

use std::time::{SystemTime, UNIX_EPOCH};

use relaymsg_common::crypto;
use relaymsg_common::model::{fake_channel_id, ChannelType, DeviceFlag, DeviceLevel, Message};
use relaymsg_protocol::{
    ConnackPacket, ConnectPacket, DisconnectPacket, Packet, PongPacket, ReasonCode, SendPacket,
    SendackPacket, SubPacket, SubackPacket,
};
use tracing::warn;

use crate::connection::{BrokerState, ConnState, ConnStatus};
use crate::session::Session;
use crate::timing_wheel::TimingWheel;
use crate::{FLAG_NO_PERSIST, FLAG_RED_DOT, FLAG_SYNC_ONCE, SETTING_RECEIPT};

/// What the connection task should do after a packet has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Close,
}

pub struct PacketHandler {
    state: std::sync::Arc<BrokerState>,
}

impl PacketHandler {
    pub fn new(state: std::sync::Arc<BrokerState>) -> Self {
        Self { state }
    }

    /// Dispatch one decoded frame against the connection's current state.
    pub async fn handle_packet(&self, conn: &mut ConnState, packet: Packet) -> Outcome {
        match (conn.status, packet) {
            (ConnStatus::New, Packet::Connect(p)) => self.handle_connect(conn, p).await,
            (ConnStatus::New, _) => {
                warn!(conn_id = conn.conn_id, "packet received before CONNECT");
                Outcome::Close
            }
            (ConnStatus::Authed, Packet::Send(p)) => self.handle_send(conn, p).await,
            (ConnStatus::Authed, Packet::Sub(p)) => self.handle_sub(conn, p).await,
            (ConnStatus::Authed, Packet::Ping(_)) => {
                let _ = conn.writer.send(Packet::Pong(PongPacket));
                Outcome::Continue
            }
            (ConnStatus::Authed, Packet::Disconnect(_)) => Outcome::Close,
            (ConnStatus::Authed, _) => {
                warn!(conn_id = conn.conn_id, "unexpected packet type after CONNECT");
                Outcome::Close
            }
            (ConnStatus::Closed, _) => Outcome::Close,
        }
    }

    async fn handle_connect(&self, conn: &mut ConnState, packet: ConnectPacket) -> Outcome {
        conn.version = packet.version;
        let time_diff = now_millis() - packet.client_timestamp;

        let device_flag = match DeviceFlag::from_u8(packet.device_flag) {
            Some(f) => f,
            None => {
                self.send_connack(conn, ReasonCode::Error, time_diff, None, None);
                return Outcome::Close;
            }
        };

        let device_level = if self.state.mode.is_test_mode() {
            DeviceLevel::Master
        } else {
            match self
                .state
                .store
                .get_user_token(&packet.uid, packet.device_flag)
                .await
            {
                Ok((expected_token, level)) if expected_token == packet.token => level,
                Ok(_) => {
                    self.send_connack(conn, ReasonCode::AuthFail, time_diff, None, None);
                    return Outcome::Close;
                }
                Err(e) => {
                    warn!(uid = %packet.uid, error = %e, "token lookup failed");
                    self.send_connack(conn, ReasonCode::Error, time_diff, None, None);
                    return Outcome::Close;
                }
            }
        };

        let (aes_key, aes_iv, server_key_b64) = if packet.version > 2 {
            let client_key = match packet.client_key.as_deref().map(crypto::decode_client_key) {
                Some(Ok(k)) => k,
                _ => {
                    self.send_connack(conn, ReasonCode::Error, time_diff, None, None);
                    return Outcome::Close;
                }
            };
            let keypair = crypto::ecdh_keypair();
            let server_pub = keypair.public;
            let shared = crypto::ecdh_shared(keypair, &client_key);
            let (aes_key, aes_iv) = crypto::derive_session_key(&shared);
            (aes_key, aes_iv, Some(crypto::encode_server_key(&server_pub)))
        } else {
            (String::new(), String::new(), None::<String>)
        };
        let salt = if packet.version > 2 { Some(aes_iv.clone()) } else { None };

        conn.uid = Some(packet.uid.clone());
        conn.device_flag = Some(device_flag);
        conn.device_level = Some(device_level);
        conn.aes_key = aes_key.clone();
        conn.aes_iv = aes_iv.clone();
        conn.status = ConnStatus::Authed;

        let session = std::sync::Arc::new(Session::new(
            conn.conn_id,
            packet.uid.clone(),
            device_flag,
            device_level,
            packet.version,
            aes_key.clone(),
            aes_iv.clone(),
            conn.writer.clone(),
        ));

        // `add` evicts any prior session for (uid, deviceFlag) atomically
        // with the insertion, so the new CONNECT observes its own entry
        // only once the old one is gone.
        if let Some(prior) = self.state.registry.add(session) {
            let _ = prior.send(Packet::Disconnect(DisconnectPacket {
                reason_code: 0,
                reason: "Account login on other devices".into(),
            }));
            let shutdowns = self.state.shutdowns.clone();
            let prior_conn_id = prior.conn_id;
            let grace = self.state.preemption_grace;
            TimingWheel::after(grace, async move {
                shutdowns.signal(prior_conn_id);
            });
        }

        self.send_connack(conn, ReasonCode::Success, time_diff, server_key_b64, salt);
        self.state.webhook.online(&packet.uid, packet.device_flag).await;
        Outcome::Continue
    }

    async fn handle_send(&self, conn: &mut ConnState, packet: SendPacket) -> Outcome {
        let from_uid = match conn.uid.clone() {
            Some(uid) => uid,
            None => return Outcome::Close,
        };

        let mut payload = packet.payload;
        if conn.version > 2 {
            let verify = crypto::send_verify_bytes(
                packet.client_msg_no.as_deref().unwrap_or_default(),
                packet.timestamp,
                &from_uid,
                &packet.channel_id,
                packet.channel_type,
                &payload,
            );
            let expected = match crypto::msg_key(&verify, &conn.aes_key, &conn.aes_iv) {
                Ok(k) => k,
                Err(_) => {
                    self.sendack(conn, ReasonCode::MsgKeyError, &packet.client_msg_no, packet.client_seq, 0, 0);
                    return Outcome::Continue;
                }
            };
            if packet.msg_key.as_deref() != Some(expected.as_str()) {
                self.sendack(conn, ReasonCode::MsgKeyError, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
            payload = match crypto::aes_cbc_pkcs7_decrypt(&payload, &conn.aes_key, &conn.aes_iv) {
                Ok(p) => p,
                Err(_) => {
                    self.sendack(conn, ReasonCode::PayloadDecodeError, &packet.client_msg_no, packet.client_seq, 0, 0);
                    return Outcome::Continue;
                }
            };
        }

        let channel_type = match ChannelType::from_u8(packet.channel_type) {
            Some(t) => t,
            None => {
                self.sendack(conn, ReasonCode::Error, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
        };

        let channel_id = if channel_type == ChannelType::Person {
            fake_channel_id(&from_uid, &packet.channel_id)
        } else {
            packet.channel_id.clone()
        };

        let channel = match self.state.channels.get_channel(&channel_id, channel_type).await {
            Some(c) => c,
            None => {
                self.sendack(conn, ReasonCode::SubscriberNotExist, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
        };

        if !self.state.mode.is_test_mode() {
            if !self.state.acl.allow(&channel_id, channel_type, &from_uid).await {
                self.sendack(conn, ReasonCode::InBlacklist, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
            if channel_type != ChannelType::Person
                && !self.state.acl.is_subscriber(&channel_id, channel_type, &from_uid).await
            {
                self.sendack(conn, ReasonCode::SubscriberNotExist, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
        }

        let persist = !packet.no_persist && !packet.sync_once;
        let message_seq = if persist {
            match self.state.store.get_next_message_seq(&channel_id, channel_type).await {
                Ok(seq) => seq,
                Err(e) => {
                    warn!(channel_id = %channel_id, error = %e, "sequence allocation failed");
                    self.sendack(conn, ReasonCode::Error, &packet.client_msg_no, packet.client_seq, 0, 0);
                    return Outcome::Continue;
                }
            }
        } else {
            0
        };

        let message_id = self.state.snowflake.next_id();
        let header = (if packet.red_dot { FLAG_RED_DOT } else { 0 })
            | (if packet.sync_once { FLAG_SYNC_ONCE } else { 0 })
            | (if packet.no_persist { FLAG_NO_PERSIST } else { 0 });
        let setting = if packet.receipt { SETTING_RECEIPT } else { 0 };

        let message = Message {
            message_id,
            message_seq,
            client_msg_no: packet.client_msg_no.clone().unwrap_or_default(),
            timestamp: now_unix_seconds(),
            from_uid: from_uid.clone(),
            channel_id: channel_id.clone(),
            channel_type,
            setting,
            header,
            payload,
        };

        if persist {
            if let Err(e) = self.state.store.append_message(&message).await {
                warn!(channel_id = %channel_id, message_seq, error = %e, "message persistence failed");
                self.sendack(conn, ReasonCode::Error, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
        }

        if self.state.webhook_enabled {
            if let Err(e) = self.state.store.append_message_of_notify_queue(&message).await {
                warn!(channel_id = %channel_id, error = %e, "notify-queue append failed");
                self.sendack(conn, ReasonCode::Error, &packet.client_msg_no, packet.client_seq, 0, 0);
                return Outcome::Continue;
            }
        }

        if let Err(e) = channel.put_message(message) {
            warn!(channel_id = %channel_id, error = %e, "channel delivery queue full");
            self.sendack(conn, ReasonCode::Error, &packet.client_msg_no, packet.client_seq, 0, 0);
            return Outcome::Continue;
        }

        self.sendack(conn, ReasonCode::Success, &packet.client_msg_no, packet.client_seq, message_id, message_seq);
        Outcome::Continue
    }

    async fn handle_sub(&self, conn: &ConnState, packet: SubPacket) -> Outcome {
        let Some(uid) = conn.uid.clone() else {
            return Outcome::Close;
        };
        let reason = match ChannelType::from_u8(packet.channel_type) {
            Some(channel_type) => {
                if self.state.acl.is_subscriber(&packet.channel_id, channel_type, &uid).await {
                    ReasonCode::Success
                } else {
                    ReasonCode::SubscriberNotExist
                }
            }
            None => ReasonCode::Error,
        };
        let _ = conn.writer.send(Packet::Suback(SubackPacket {
            reason_code: reason.as_u8(),
            channel_id: packet.channel_id,
            channel_type: packet.channel_type,
        }));
        Outcome::Continue
    }

    /// Tear down a connection's session on DISCONNECT, read timeout, or
    /// socket close. Fires `offline` only if this was the last session for
    /// the uid — a uid with sessions on other devices stays online.
    pub async fn handle_disconnect(&self, conn: &ConnState) {
        let (Some(uid), Some(device_flag)) = (conn.uid.clone(), conn.device_flag) else {
            return;
        };
        self.state.registry.remove(conn.conn_id);
        if !self.state.registry.has_any_session(&uid) {
            self.state.webhook.offline(&uid, device_flag as u8).await;
        }
    }

    fn send_connack(
        &self,
        conn: &ConnState,
        reason: ReasonCode,
        time_diff: i64,
        server_key: Option<String>,
        salt: Option<String>,
    ) {
        let _ = conn.writer.send(Packet::Connack(ConnackPacket {
            reason_code: reason.as_u8(),
            time_diff,
            server_key,
            salt,
        }));
    }

    fn sendack(
        &self,
        conn: &ConnState,
        reason: ReasonCode,
        client_msg_no: &Option<String>,
        client_seq: u32,
        message_id: i64,
        message_seq: u32,
    ) {
        let _ = conn.writer.send(Packet::Sendack(SendackPacket {
            reason_code: reason.as_u8(),
            client_seq,
            client_msg_no: client_msg_no.clone(),
            message_id,
            message_seq,
        }));
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

fn now_unix_seconds() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_manager::ChannelManager;
    use crate::connection::ShutdownSignals;
    use crate::registry::ClientRegistry;
    use relaymsg_common::config::Mode;
    use relaymsg_common::model::ConnId;
    use relaymsg_store::{AclSource, InMemoryAclSource, InMemoryStore, NoopWebhook, OnlineStatusWebhook, RecordingWebhook, Store};
    use relaymsg_common::snowflake::SnowflakeGenerator;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_state(
        store: Arc<dyn Store>,
        webhook: Arc<dyn OnlineStatusWebhook>,
        mode: Mode,
    ) -> Arc<BrokerState> {
        let registry = Arc::new(ClientRegistry::new());
        let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());
        let channels = Arc::new(ChannelManager::new(registry.clone(), acl.clone(), 16));
        Arc::new(BrokerState {
            registry,
            channels,
            store,
            webhook,
            monitor: Arc::new(relaymsg_store::AtomicMonitor::new()),
            acl,
            snowflake: Arc::new(SnowflakeGenerator::new(1)),
            mode,
            webhook_enabled: false,
            preemption_grace: Duration::from_millis(20),
            read_timeout: Duration::from_secs(60),
            shutdowns: Arc::new(ShutdownSignals::new()),
        })
    }

    fn new_conn(conn_id: ConnId) -> (ConnState, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnState::new(conn_id, tx), rx)
    }

    #[tokio::test]
    async fn successful_connect_in_test_mode_sends_connack_success_and_fires_online() {
        let webhook = Arc::new(RecordingWebhook::new());
        let state = test_state(Arc::new(InMemoryStore::new()), webhook.clone(), Mode::Test);
        let handler = PacketHandler::new(state.clone());
        let (mut conn, mut rx) = new_conn(1);

        let outcome = handler
            .handle_connect(
                &mut conn,
                ConnectPacket {
                    version: 4,
                    device_flag: 1,
                    client_timestamp: 1_700_000_000_000,
                    uid: "u1".into(),
                    token: "ignored-in-test-mode".into(),
                    client_key: Some(base64::Engine::encode(
                        &base64::engine::general_purpose::STANDARD,
                        [7u8; 32],
                    )),
                },
            )
            .await;
        assert_eq!(outcome, Outcome::Continue);

        let reply = rx.try_recv().expect("a CONNACK was queued");
        match reply {
            Packet::Connack(p) => assert_eq!(p.reason_code, ReasonCode::Success.as_u8()),
            other => panic!("expected Connack, got {other:?}"),
        }
        assert!(state.registry.get_by_user_device("u1", DeviceFlag::App).is_some());
        assert_eq!(webhook.calls(), vec![("u1".to_string(), 1, "online")]);
    }

    #[tokio::test]
    async fn wrong_token_in_normal_mode_sends_authfail_and_inserts_no_session() {
        let store = Arc::new(InMemoryStore::new());
        store.set_token("u1", 1, "T1", DeviceLevel::Master);
        let state = test_state(store, Arc::new(relaymsg_store::NoopWebhook), Mode::Normal);
        let handler = PacketHandler::new(state.clone());
        let (mut conn, mut rx) = new_conn(1);

        handler
            .handle_connect(
                &mut conn,
                ConnectPacket {
                    version: 1,
                    device_flag: 1,
                    client_timestamp: 1_700_000_000_000,
                    uid: "u1".into(),
                    token: "WRONG".into(),
                    client_key: None,
                },
            )
            .await;

        match rx.try_recv().unwrap() {
            Packet::Connack(p) => assert_eq!(p.reason_code, ReasonCode::AuthFail.as_u8()),
            other => panic!("expected Connack, got {other:?}"),
        }
        assert!(state.registry.get_by_user_device("u1", DeviceFlag::App).is_none());
    }

    #[tokio::test]
    async fn second_connect_preempts_the_first_with_a_disconnect_frame() {
        let state = test_state(Arc::new(InMemoryStore::new()), Arc::new(relaymsg_store::NoopWebhook), Mode::Test);
        let handler = PacketHandler::new(state.clone());
        let (mut first, mut first_rx) = new_conn(1);
        let (mut second, _second_rx) = new_conn(2);

        let connect = |uid: &str| ConnectPacket {
            version: 1,
            device_flag: 1,
            client_timestamp: 1_700_000_000_000,
            uid: uid.into(),
            token: String::new(),
            client_key: None,
        };

        handler.handle_connect(&mut first, connect("u1")).await;
        let _ = first_rx.try_recv().unwrap(); // CONNACK(Success)

        handler.handle_connect(&mut second, connect("u1")).await;

        let disconnect = first_rx.try_recv().expect("prior session receives a DISCONNECT");
        assert!(matches!(disconnect, Packet::Disconnect(_)));
        assert_eq!(
            state.registry.get_by_user_device("u1", DeviceFlag::App).unwrap().conn_id,
            2
        );
    }

    #[tokio::test]
    async fn send_to_a_person_channel_persists_and_fans_out() {
        let store = Arc::new(InMemoryStore::new());
        let state = test_state(store.clone(), Arc::new(relaymsg_store::NoopWebhook), Mode::Test);
        let handler = PacketHandler::new(state.clone());
        let (mut conn_a, _rx_a) = new_conn(1);
        let (mut conn_b, mut rx_b) = new_conn(2);

        let connect = |uid: &str| ConnectPacket {
            version: 1,
            device_flag: 1,
            client_timestamp: 1_700_000_000_000,
            uid: uid.into(),
            token: String::new(),
            client_key: None,
        };
        handler.handle_connect(&mut conn_a, connect("a")).await;
        handler.handle_connect(&mut conn_b, connect("b")).await;
        let _ = rx_b.try_recv().unwrap(); // CONNACK for b

        let outcome = handler
            .handle_send(
                &mut conn_a,
                SendPacket {
                    red_dot: false,
                    sync_once: false,
                    no_persist: false,
                    receipt: false,
                    msg_key: None,
                    client_seq: 1,
                    client_msg_no: Some("cmn-1".into()),
                    timestamp: 1_700_000_000,
                    channel_id: "b".into(),
                    channel_type: 1,
                    payload: b"hello".to_vec(),
                },
            )
            .await;
        assert_eq!(outcome, Outcome::Continue);

        let sendack = _rx_a.try_recv();
        let _ = sendack;

        let recv = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(recv, Packet::Recv(_)));

        let persisted = store.messages.lock();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].channel_id, "a@b");
        assert_eq!(persisted[0].payload, b"hello");
    }
}
