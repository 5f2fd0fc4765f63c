//! Channel subscriber/ACL data source, reached only through this trait.
//! The broker's `ChannelManager` consults it to decide whether a channel
//! exists, who may send into it, and who receives fan-out.

use async_trait::async_trait;
use relaymsg_common::model::ChannelType;
use std::collections::{HashMap, HashSet};

#[async_trait]
pub trait AclSource: Send + Sync {
    /// Whether `(channel_id, channel_type)` is known. Person channels are
    /// implicitly created by the first SEND between two uids; Group
    /// channels must be provisioned out-of-band.
    async fn channel_exists(&self, channel_id: &str, channel_type: ChannelType) -> bool;

    /// `true` unless `uid` is blacklisted (and, if a whitelist is
    /// configured for the channel, `uid` is in it).
    async fn allow(&self, channel_id: &str, channel_type: ChannelType, uid: &str) -> bool;

    /// Subscription membership check for a single uid.
    async fn is_subscriber(&self, channel_id: &str, channel_type: ChannelType, uid: &str) -> bool;

    /// All current subscribers of a channel, for fan-out.
    async fn subscribers(&self, channel_id: &str, channel_type: ChannelType) -> Vec<String>;
}

#[derive(Default, Clone)]
struct ChannelAcl {
    subscribers: HashSet<String>,
    blacklist: HashSet<String>,
    whitelist: Option<HashSet<String>>,
}

/// In-memory ACL source. Person channels are auto-provisioned on first
/// lookup with both participants as subscribers (derivable from the
/// `fake_channel_id`'s two halves); Group channels must be registered via
/// [`InMemoryAclSource::provision_group`].
pub struct InMemoryAclSource {
    channels: parking_lot::Mutex<HashMap<(String, u8), ChannelAcl>>,
}

impl InMemoryAclSource {
    pub fn new() -> Self {
        Self {
            channels: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn provision_group(&self, channel_id: &str, subscribers: impl IntoIterator<Item = String>) {
        let mut channels = self.channels.lock();
        channels
            .entry((channel_id.to_string(), ChannelType::Group.as_u8()))
            .or_default()
            .subscribers
            .extend(subscribers);
    }

    pub fn blacklist(&self, channel_id: &str, channel_type: ChannelType, uid: &str) {
        let mut channels = self.channels.lock();
        channels
            .entry((channel_id.to_string(), channel_type.as_u8()))
            .or_default()
            .blacklist
            .insert(uid.to_string());
    }

    fn ensure_person_channel(&self, channel_id: &str) {
        let mut channels = self.channels.lock();
        let entry = channels
            .entry((channel_id.to_string(), ChannelType::Person.as_u8()))
            .or_default();
        if let Some((a, b)) = channel_id.split_once('@') {
            entry.subscribers.insert(a.to_string());
            entry.subscribers.insert(b.to_string());
        }
    }
}

impl Default for InMemoryAclSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AclSource for InMemoryAclSource {
    async fn channel_exists(&self, channel_id: &str, channel_type: ChannelType) -> bool {
        if channel_type == ChannelType::Person {
            self.ensure_person_channel(channel_id);
            return true;
        }
        self.channels
            .lock()
            .contains_key(&(channel_id.to_string(), channel_type.as_u8()))
    }

    async fn allow(&self, channel_id: &str, channel_type: ChannelType, uid: &str) -> bool {
        let channels = self.channels.lock();
        match channels.get(&(channel_id.to_string(), channel_type.as_u8())) {
            Some(acl) => {
                if acl.blacklist.contains(uid) {
                    return false;
                }
                match &acl.whitelist {
                    Some(whitelist) => whitelist.contains(uid),
                    None => true,
                }
            }
            None => true,
        }
    }

    async fn is_subscriber(&self, channel_id: &str, channel_type: ChannelType, uid: &str) -> bool {
        if channel_type == ChannelType::Person {
            return channel_id.split('@').any(|half| half == uid);
        }
        self.channels
            .lock()
            .get(&(channel_id.to_string(), channel_type.as_u8()))
            .is_some_and(|acl| acl.subscribers.contains(uid))
    }

    async fn subscribers(&self, channel_id: &str, channel_type: ChannelType) -> Vec<String> {
        if channel_type == ChannelType::Person {
            self.ensure_person_channel(channel_id);
        }
        self.channels
            .lock()
            .get(&(channel_id.to_string(), channel_type.as_u8()))
            .map(|acl| acl.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn person_channels_are_implicitly_provisioned_from_the_fake_id() {
        let acl = InMemoryAclSource::new();
        assert!(acl.channel_exists("a@b", ChannelType::Person).await);
        assert!(acl.is_subscriber("a@b", ChannelType::Person, "a").await);
        assert!(acl.is_subscriber("a@b", ChannelType::Person, "b").await);
        assert!(!acl.is_subscriber("a@b", ChannelType::Person, "c").await);
    }

    #[tokio::test]
    async fn blacklist_overrides_default_allow() {
        let acl = InMemoryAclSource::new();
        acl.provision_group("g1", ["a".to_string(), "b".to_string()]);
        acl.blacklist("g1", ChannelType::Group, "a");
        assert!(!acl.allow("g1", ChannelType::Group, "a").await);
        assert!(acl.allow("g1", ChannelType::Group, "b").await);
    }

    #[tokio::test]
    async fn unprovisioned_group_channel_does_not_exist() {
        let acl = InMemoryAclSource::new();
        assert!(!acl.channel_exists("ghost", ChannelType::Group).await);
    }
}
