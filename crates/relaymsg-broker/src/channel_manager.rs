//! Channel lookup/cache with single-flight creation. Two concurrent SENDs
//! that both miss the cache for the same `(channelId, channelType)` must
//! not spawn two delivery workers for that channel.

use std::collections::HashMap;
use std::sync::Arc;

use relaymsg_common::model::ChannelType;
use relaymsg_store::AclSource;
use tokio::sync::OnceCell;

use crate::channel::Channel;
use crate::registry::ClientRegistry;

type CacheKey = (String, u8);
type Slot = Arc<OnceCell<Option<Arc<Channel>>>>;

pub struct ChannelManager {
    registry: Arc<ClientRegistry>,
    acl: Arc<dyn AclSource>,
    queue_capacity: usize,
    cache: parking_lot::Mutex<HashMap<CacheKey, Slot>>,
}

impl ChannelManager {
    pub fn new(registry: Arc<ClientRegistry>, acl: Arc<dyn AclSource>, queue_capacity: usize) -> Self {
        Self {
            registry,
            acl,
            queue_capacity,
            cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `(channel_id, channel_type)` to a `Channel`, creating and
    /// caching it on first lookup if the ACL source confirms it exists.
    /// Concurrent callers racing on the same key share one `OnceCell`, so
    /// only one of them actually constructs the `Channel` (and spawns its
    /// delivery worker); the rest await that result.
    pub async fn get_channel(&self, channel_id: &str, channel_type: ChannelType) -> Option<Arc<Channel>> {
        let key: CacheKey = (channel_id.to_string(), channel_type.as_u8());
        let slot = self
            .cache
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        slot.get_or_init(|| async {
            if !self.acl.channel_exists(channel_id, channel_type).await {
                return None;
            }
            Some(Arc::new(Channel::new(
                channel_id.to_string(),
                channel_type,
                self.queue_capacity,
                self.registry.clone(),
                self.acl.clone(),
            )))
        })
        .await
        .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymsg_store::InMemoryAclSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn person_channel_is_created_on_first_lookup_and_cached_thereafter() {
        let registry = Arc::new(ClientRegistry::new());
        let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());
        let manager = ChannelManager::new(registry, acl, 16);

        let a = manager.get_channel("a@b", ChannelType::Person).await.unwrap();
        let b = manager.get_channel("a@b", ChannelType::Person).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unprovisioned_group_channel_resolves_to_none() {
        let registry = Arc::new(ClientRegistry::new());
        let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());
        let manager = ChannelManager::new(registry, acl, 16);
        assert!(manager.get_channel("ghost", ChannelType::Group).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_lookups_for_the_same_key_single_flight_to_one_channel() {
        let registry = Arc::new(ClientRegistry::new());
        let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());
        let manager = Arc::new(ChannelManager::new(registry, acl, 16));
        let hits = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let hits = hits.clone();
            handles.push(tokio::spawn(async move {
                let channel = manager.get_channel("x@y", ChannelType::Person).await;
                if channel.is_some() {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
                channel
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 16);
        let first = results[0].clone().unwrap();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&first, r.as_ref().unwrap()));
        }
    }
}
