//! Recording in-memory platform for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::id::{ChannelId, GuildId, UserId};
use crate::permissions::{Overwrite, OverwriteTarget, Permissions};
use crate::platform::Platform;
use crate::registry::VoiceRegistry;
use crate::types::{ParentChannel, RosterMember};

pub const GUILD: GuildId = GuildId::new(1);
pub const TEXT: ChannelId = ChannelId::new(500);
pub const OWNER: UserId = UserId::new(7);

#[derive(Debug, Default)]
pub struct MockState {
    pub parents: HashMap<ChannelId, ParentChannel>,
    pub roster: Vec<RosterMember>,
    pub occupancy: HashMap<ChannelId, usize>,
    pub next_channel_id: u64,

    pub created: Vec<(GuildId, String, ChannelId)>,
    pub deleted: Vec<ChannelId>,
    pub overwrites: Vec<(ChannelId, Overwrite)>,
    pub messages: Vec<(ChannelId, String)>,

    /// Deletes of channels still present in `watched_registry`
    pub deleted_while_registered: Vec<ChannelId>,
    pub watched_registry: Option<Arc<VoiceRegistry>>,

    pub create_delay: Option<Duration>,
    pub fail_roster: bool,
    pub fail_create: bool,
    pub fail_overwrites: HashSet<OverwriteTarget>,
    pub fail_delete: bool,
    pub delete_not_found: bool,
    pub fail_occupancy: HashSet<ChannelId>,
    /// Number of upcoming occupancy calls that panic
    pub panic_occupancy: usize,
    pub fail_messages: bool,
}

#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    /// A guild with one text channel (`TEXT`, named "general") and an owner
    /// who can see it.
    pub fn new() -> Self {
        let platform = Self::default();
        {
            let mut state = platform.state();
            state.next_channel_id = 1000;
            state.parents.insert(
                TEXT,
                ParentChannel {
                    id: TEXT,
                    guild_id: Some(GUILD),
                    name: "general".to_string(),
                    is_guild_text: true,
                },
            );
            state.roster.push(RosterMember {
                user_id: OWNER,
                permissions: Permissions::VIEW_CHANNEL | Permissions::CONNECT,
            });
        }
        platform
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_member(&self, user_id: u64, permissions: Permissions) {
        self.state().roster.push(RosterMember {
            user_id: UserId::new(user_id),
            permissions,
        });
    }

    pub fn add_text_channel(&self, id: ChannelId, name: &str) {
        self.state().parents.insert(
            id,
            ParentChannel {
                id,
                guild_id: Some(GUILD),
                name: name.to_string(),
                is_guild_text: true,
            },
        );
    }

    pub fn set_occupancy(&self, channel_id: ChannelId, count: usize) {
        self.state().occupancy.insert(channel_id, count);
    }

    pub fn messages_to(&self, channel_id: ChannelId) -> Vec<String> {
        self.state()
            .messages
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn parent_channel(&self, channel_id: ChannelId) -> Result<Option<ParentChannel>> {
        Ok(self.state().parents.get(&channel_id).cloned())
    }

    async fn create_voice_channel(&self, guild_id: GuildId, name: &str) -> Result<ChannelId> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_create {
            return Err(Error::platform("create failed"));
        }
        state.next_channel_id += 1;
        let id = ChannelId::new(state.next_channel_id);
        state.created.push((guild_id, name.to_string(), id));
        Ok(id)
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        let mut state = self.state();
        if state.delete_not_found {
            return Err(Error::NotFound(format!("/channels/{}", channel_id)));
        }
        if state.fail_delete {
            return Err(Error::platform("delete failed"));
        }
        let registered = state
            .watched_registry
            .as_ref()
            .is_some_and(|registry| registry.contains(channel_id));
        if registered {
            state.deleted_while_registered.push(channel_id);
        }
        state.deleted.push(channel_id);
        Ok(())
    }

    async fn set_permission(&self, channel_id: ChannelId, overwrite: Overwrite) -> Result<()> {
        let mut state = self.state();
        if state.fail_overwrites.contains(&overwrite.target) {
            return Err(Error::platform("overwrite failed"));
        }
        state.overwrites.push((channel_id, overwrite));
        Ok(())
    }

    async fn roster(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> Result<Vec<RosterMember>> {
        let state = self.state();
        if state.fail_roster {
            return Err(Error::platform("roster unavailable"));
        }
        Ok(state.roster.clone())
    }

    async fn occupancy(&self, _guild_id: GuildId, channel_id: ChannelId) -> Result<usize> {
        let panic_now = {
            let mut state = self.state();
            let panic_now = state.panic_occupancy > 0;
            state.panic_occupancy = state.panic_occupancy.saturating_sub(1);
            panic_now
        };
        // The state lock is released first so it is not poisoned
        if panic_now {
            panic!("occupancy lookup panicked");
        }

        let state = self.state();
        if state.fail_occupancy.contains(&channel_id) {
            return Err(Error::platform("guild not cached"));
        }
        Ok(state.occupancy.get(&channel_id).copied().unwrap_or(0))
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_messages {
            return Err(Error::platform("message failed"));
        }
        state.messages.push((channel_id, content.to_string()));
        Ok(())
    }
}
