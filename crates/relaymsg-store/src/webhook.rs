//! Online/offline presence webhook client.
//!
//! Fire-and-forget by design — the packet handler spawns the call and
//! moves on, so a slow or down webhook target never adds latency to the
//! CONNECT/DISCONNECT path. One `reqwest::Client` is built once with a
//! timeout, held behind `Arc`, and reused across calls.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait OnlineStatusWebhook: Send + Sync {
    async fn online(&self, uid: &str, device_flag: u8);
    async fn offline(&self, uid: &str, device_flag: u8);
}

#[derive(Debug, Serialize)]
struct PresenceEvent<'a> {
    uid: &'a str,
    device_flag: u8,
    status: &'static str,
}

/// `reqwest`-backed webhook client. Every call is spawned onto its own task
/// so the caller never awaits network I/O.
pub struct ReqwestWebhook {
    http: reqwest::Client,
    url: Arc<str>,
}

impl ReqwestWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            http,
            url: url.into().into(),
        }
    }

    async fn post_with_retry(http: reqwest::Client, url: Arc<str>, event: PresenceEvent<'_>) {
        let body = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize presence webhook event");
                return;
            }
        };
        let mut backoff = Duration::from_millis(200);
        for attempt in 1..=MAX_ATTEMPTS {
            match http
                .post(url.as_ref())
                .header("content-type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt, "presence webhook returned non-success");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "presence webhook request failed");
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

#[async_trait]
impl OnlineStatusWebhook for ReqwestWebhook {
    async fn online(&self, uid: &str, device_flag: u8) {
        let http = self.http.clone();
        let url = self.url.clone();
        let uid = uid.to_string();
        tokio::spawn(async move {
            Self::post_with_retry(
                http,
                url,
                PresenceEvent {
                    uid: &uid,
                    device_flag,
                    status: "online",
                },
            )
            .await;
        });
    }

    async fn offline(&self, uid: &str, device_flag: u8) {
        let http = self.http.clone();
        let url = self.url.clone();
        let uid = uid.to_string();
        tokio::spawn(async move {
            Self::post_with_retry(
                http,
                url,
                PresenceEvent {
                    uid: &uid,
                    device_flag,
                    status: "offline",
                },
            )
            .await;
        });
    }
}

/// Webhook client used when `config.webhook.enabled == false` or in tests
/// that don't care about presence delivery.
pub struct NoopWebhook;

#[async_trait]
impl OnlineStatusWebhook for NoopWebhook {
    async fn online(&self, _uid: &str, _device_flag: u8) {}
    async fn offline(&self, _uid: &str, _device_flag: u8) {}
}

/// Records calls in-process for assertions in `relaymsg-broker`'s
/// integration tests.
#[derive(Default)]
pub struct RecordingWebhook {
    pub events: parking_lot::Mutex<Vec<(String, u8, &'static str)>>,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, u8, &'static str)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl OnlineStatusWebhook for RecordingWebhook {
    async fn online(&self, uid: &str, device_flag: u8) {
        self.events
            .lock()
            .push((uid.to_string(), device_flag, "online"));
    }

    async fn offline(&self, uid: &str, device_flag: u8) {
        self.events
            .lock()
            .push((uid.to_string(), device_flag, "offline"));
    }
}
