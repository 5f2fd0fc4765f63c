//! External collaborators the broker core depends on through traits:
//! persistence/sequencing (`Store`), presence notification (`Webhook`),
//! the channel ACL/subscriber source, and byte/packet counters
//! (`Monitor`). Kept out of the broker core so each can be swapped for a
//! real backend or a test fake without touching the state machine.

pub mod acl;
pub mod error;
pub mod monitor;
pub mod store;
pub mod webhook;

pub use acl::{AclSource, InMemoryAclSource};
pub use error::{StoreError, StoreResult};
pub use monitor::{AtomicMonitor, Monitor, MonitorSnapshot};
pub use store::{InMemoryStore, PostgresStore, Store};
pub use webhook::{NoopWebhook, OnlineStatusWebhook, RecordingWebhook, ReqwestWebhook};
