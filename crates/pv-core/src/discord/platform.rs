//! [`Platform`] backed by the Discord REST API and the gateway cache.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::cache::GuildCache;
use super::rest::RestClient;
use crate::error::{Error, Result};
use crate::id::{ChannelId, GuildId};
use crate::permissions::Overwrite;
use crate::platform::Platform;
use crate::types::{ParentChannel, RosterMember};

/// Reads come from the cache, writes go over REST.
pub struct DiscordPlatform {
    rest: RestClient,
    cache: Arc<GuildCache>,
}

impl DiscordPlatform {
    pub fn new(rest: RestClient, cache: Arc<GuildCache>) -> Self {
        Self { rest, cache }
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn parent_channel(&self, channel_id: ChannelId) -> Result<Option<ParentChannel>> {
        if let Some(channel) = self.cache.channel(channel_id) {
            return Ok(Some(channel));
        }

        debug!(channel_id = %channel_id, "Channel not cached, asking the API");
        Ok(self.rest.get_channel(channel_id).await?.map(|c| ParentChannel {
            id: c.id,
            guild_id: c.guild_id,
            is_guild_text: c.is_guild_text(),
            name: c.name.unwrap_or_default(),
        }))
    }

    async fn create_voice_channel(&self, guild_id: GuildId, name: &str) -> Result<ChannelId> {
        let channel = self.rest.create_voice_channel(guild_id, name).await?;
        Ok(channel.id)
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.rest.delete_channel(channel_id).await
    }

    async fn set_permission(&self, channel_id: ChannelId, overwrite: Overwrite) -> Result<()> {
        self.rest.put_overwrite(channel_id, overwrite).await
    }

    async fn roster(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Vec<RosterMember>> {
        self.cache.roster(guild_id, channel_id).ok_or_else(|| {
            Error::platform(format!("guild {} or channel {} not cached", guild_id, channel_id))
        })
    }

    async fn occupancy(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<usize> {
        self.cache
            .occupancy(guild_id, channel_id)
            .ok_or_else(|| Error::platform(format!("guild {} not cached", guild_id)))
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        self.rest.create_message(channel_id, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::model::Guild;

    fn platform() -> DiscordPlatform {
        let cache = Arc::new(GuildCache::new());
        let guild: Guild = serde_json::from_value(serde_json::json!({
            "id": "1",
            "owner_id": "2",
            "roles": [{"id": "1", "permissions": "1024"}],
            "channels": [
                {"id": "10", "type": 0, "name": "general"},
                {"id": "20", "type": 2, "name": "PV: general"}
            ],
            "members": [{"user": {"id": "2"}}, {"user": {"id": "3"}}],
            "voice_states": [{"channel_id": "20", "user_id": "3"}]
        }))
        .unwrap();
        cache.upsert_guild(&guild);
        let rest = RestClient::with_base_url("token", "http://127.0.0.1:9").unwrap();
        DiscordPlatform::new(rest, cache)
    }

    #[tokio::test]
    async fn test_cached_reads_need_no_api() {
        let platform = platform();

        let parent = platform.parent_channel(ChannelId::new(10)).await.unwrap().unwrap();
        assert_eq!(parent.name, "general");
        assert!(parent.is_guild_text);

        let roster = platform.roster(GuildId::new(1), ChannelId::new(10)).await.unwrap();
        assert_eq!(roster.len(), 2);

        let occupancy = platform.occupancy(GuildId::new(1), ChannelId::new(20)).await.unwrap();
        assert_eq!(occupancy, 1);
    }

    #[tokio::test]
    async fn test_unknown_guild_is_platform_error() {
        let platform = platform();

        let err = platform.roster(GuildId::new(9), ChannelId::new(10)).await.unwrap_err();
        assert!(matches!(err, Error::Platform(_)));
        let err = platform.occupancy(GuildId::new(9), ChannelId::new(20)).await.unwrap_err();
        assert!(matches!(err, Error::Platform(_)));
    }
}
