//! The Client Registry: index of authenticated sessions keyed by
//! connection-id and by (uid, deviceFlag), enforcing at most one session
//! per (uid, deviceFlag) at any instant.
//!
//! Both indices live behind one `parking_lot::RwLock` so all mutations are
//! atomic with respect to each other; no lock here ever spans an `.await`,
//! so every method is synchronous.

use relaymsg_common::model::{ConnId, DeviceFlag};
use std::collections::HashMap;
use std::sync::Arc;

use crate::session::Session;

struct Inner {
    by_conn: HashMap<ConnId, Arc<Session>>,
    by_uid: HashMap<String, HashMap<DeviceFlag, Arc<Session>>>,
}

pub struct ClientRegistry {
    inner: parking_lot::RwLock<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(Inner {
                by_conn: HashMap::new(),
                by_uid: HashMap::new(),
            }),
        }
    }

    /// Insert `session`, evicting and returning any prior session for the
    /// same (uid, deviceFlag). The caller is responsible for notifying and
    /// tearing down the evicted session (`handle_connect`'s preemption
    /// step) — this method only guarantees the registry itself never holds
    /// two entries for one key.
    pub fn add(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let evicted = inner
            .by_uid
            .entry(session.uid.clone())
            .or_default()
            .insert(session.device_flag, session.clone());
        if let Some(old) = &evicted {
            inner.by_conn.remove(&old.conn_id);
        }
        inner.by_conn.insert(session.conn_id, session);
        evicted
    }

    pub fn get(&self, conn_id: ConnId) -> Option<Arc<Session>> {
        self.inner.read().by_conn.get(&conn_id).cloned()
    }

    pub fn get_by_user_device(&self, uid: &str, device_flag: DeviceFlag) -> Option<Arc<Session>> {
        self.inner
            .read()
            .by_uid
            .get(uid)
            .and_then(|devices| devices.get(&device_flag))
            .cloned()
    }

    /// Every active session for `uid`, across all device flags — used by
    /// channel fan-out to reach every device a subscriber is logged into.
    pub fn sessions_for_uid(&self, uid: &str) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .by_uid
            .get(uid)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_any_session(&self, uid: &str) -> bool {
        self.inner
            .read()
            .by_uid
            .get(uid)
            .is_some_and(|devices| !devices.is_empty())
    }

    /// Remove by connection-id, keeping both indices consistent. Returns
    /// the removed session, or `None` if it was already evicted by a
    /// subsequent CONNECT for the same (uid, deviceFlag) (stale remove from
    /// a preempted connection's own teardown path).
    pub fn remove(&self, conn_id: ConnId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let session = inner.by_conn.remove(&conn_id)?;
        if let Some(devices) = inner.by_uid.get_mut(&session.uid) {
            // Only remove the uid-index entry if it still points at this
            // exact connection — a newer session may have already replaced
            // it via `add`.
            if devices
                .get(&session.device_flag)
                .is_some_and(|s| s.conn_id == conn_id)
            {
                devices.remove(&session.device_flag);
            }
            if devices.is_empty() {
                inner.by_uid.remove(&session.uid);
            }
        }
        Some(session)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
