//! Platform trait defining what the lifecycle manager needs from the chat service.

use async_trait::async_trait;

use crate::error::Result;
use crate::id::{ChannelId, GuildId};
use crate::permissions::Overwrite;
use crate::types::{ParentChannel, RosterMember};

/// Operations the core performs against the chat platform.
///
/// Implementations handle the actual transport (Discord REST + gateway
/// cache in production, an in-memory recorder in tests). Every method is a
/// potential suspension point; callers never hold registry locks across them.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Look up the channel a command was issued in. `None` if unknown.
    async fn parent_channel(&self, channel_id: ChannelId) -> Result<Option<ParentChannel>>;

    /// Create a guild voice channel and return its id.
    async fn create_voice_channel(&self, guild_id: GuildId, name: &str) -> Result<ChannelId>;

    /// Delete a channel. Returns `Error::NotFound` if it is already gone.
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()>;

    /// Create or replace one permission overwrite on a channel.
    async fn set_permission(&self, channel_id: ChannelId, overwrite: Overwrite) -> Result<()>;

    /// Guild members with their resolved permissions on `channel_id`.
    async fn roster(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Vec<RosterMember>>;

    /// Number of members currently connected to a voice channel.
    async fn occupancy(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<usize>;

    /// Post a plain text message to a channel.
    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<()>;
}
