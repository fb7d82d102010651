//! In-memory mirror of the guild state the gateway streams to us.
//!
//! The cache answers the three questions the lifecycle manager asks of the
//! platform without a REST round trip: what is this channel, who can see it,
//! and how many members are connected to a voice channel.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use super::model::{
    Channel, Guild, GuildMemberEvent, GuildMembersChunk, Member, RawOverwrite, Role, VoiceState,
    CHANNEL_TYPE_GUILD_ANNOUNCEMENT, CHANNEL_TYPE_GUILD_TEXT,
};
use crate::id::{ChannelId, GuildId, RoleId, UserId};
use crate::permissions::{GuildPermissionContext, Overwrite, Permissions};
use crate::types::{ParentChannel, RosterMember};

#[derive(Debug, Clone)]
struct CachedChannel {
    kind: u8,
    name: String,
    overwrites: Vec<Overwrite>,
}

impl CachedChannel {
    fn from_model(channel: &Channel) -> Self {
        Self {
            kind: channel.kind,
            name: channel.name.clone().unwrap_or_default(),
            overwrites: channel
                .permission_overwrites
                .iter()
                .filter_map(RawOverwrite::to_overwrite)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CachedGuild {
    owner_id: Option<UserId>,
    roles: HashMap<RoleId, Permissions>,
    channels: HashMap<ChannelId, CachedChannel>,
    members: HashMap<UserId, Vec<RoleId>>,
    voice_states: HashMap<UserId, ChannelId>,
    member_count: Option<u64>,
}

impl CachedGuild {
    fn add_member(&mut self, member: &Member) {
        if let Some(user) = &member.user {
            self.members.insert(user.id, member.roles.clone());
        }
    }
}

/// Thread-safe guild state cache
#[derive(Debug, Default)]
pub struct GuildCache {
    guilds: RwLock<HashMap<GuildId, CachedGuild>>,
    channel_guild: RwLock<HashMap<ChannelId, GuildId>>,
}

impl GuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guilds(&self) -> RwLockReadGuard<'_, HashMap<GuildId, CachedGuild>> {
        self.guilds.read().unwrap_or_else(|poisoned| {
            warn!("Guild cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_guilds(&self) -> RwLockWriteGuard<'_, HashMap<GuildId, CachedGuild>> {
        self.guilds.write().unwrap_or_else(|poisoned| {
            warn!("Guild cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, GuildId>> {
        self.channel_guild
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn guild_of(&self, channel_id: ChannelId) -> Option<GuildId> {
        self.channel_guild
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&channel_id)
            .copied()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Updates from gateway dispatches
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace everything known about a guild (GUILD_CREATE).
    pub fn upsert_guild(&self, guild: &Guild) {
        let mut cached = CachedGuild {
            owner_id: guild.owner_id,
            roles: guild.roles.iter().map(|r| (r.id, r.permissions)).collect(),
            member_count: guild.member_count,
            ..CachedGuild::default()
        };
        for channel in &guild.channels {
            cached.channels.insert(channel.id, CachedChannel::from_model(channel));
        }
        for member in &guild.members {
            cached.add_member(member);
        }
        for state in &guild.voice_states {
            if let Some(channel_id) = state.channel_id {
                cached.voice_states.insert(state.user_id, channel_id);
            }
        }

        {
            let mut index = self.write_index();
            index.retain(|_, g| *g != guild.id);
            for channel_id in cached.channels.keys() {
                index.insert(*channel_id, guild.id);
            }
        }

        debug!(
            guild_id = %guild.id,
            channels = cached.channels.len(),
            members = cached.members.len(),
            "Guild cached"
        );
        self.write_guilds().insert(guild.id, cached);
    }

    /// GUILD_UPDATE carries owner and roles but no channels or members.
    pub fn update_guild(&self, guild: &Guild) {
        if let Some(cached) = self.write_guilds().get_mut(&guild.id) {
            if guild.owner_id.is_some() {
                cached.owner_id = guild.owner_id;
            }
            if !guild.roles.is_empty() {
                cached.roles = guild.roles.iter().map(|r| (r.id, r.permissions)).collect();
            }
        }
    }

    pub fn remove_guild(&self, guild_id: GuildId) {
        self.write_guilds().remove(&guild_id);
        self.write_index().retain(|_, g| *g != guild_id);
    }

    /// CHANNEL_CREATE / CHANNEL_UPDATE
    pub fn upsert_channel(&self, channel: &Channel) {
        let Some(guild_id) = channel.guild_id else {
            return;
        };
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            guild.channels.insert(channel.id, CachedChannel::from_model(channel));
            self.write_index().insert(channel.id, guild_id);
        }
    }

    pub fn remove_channel(&self, channel_id: ChannelId) {
        let Some(guild_id) = self.write_index().remove(&channel_id) else {
            return;
        };
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            guild.channels.remove(&channel_id);
            guild.voice_states.retain(|_, c| *c != channel_id);
        }
    }

    /// GUILD_ROLE_CREATE / GUILD_ROLE_UPDATE
    pub fn upsert_role(&self, guild_id: GuildId, role: &Role) {
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            guild.roles.insert(role.id, role.permissions);
        }
    }

    pub fn remove_role(&self, guild_id: GuildId, role_id: RoleId) {
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            guild.roles.remove(&role_id);
            for roles in guild.members.values_mut() {
                roles.retain(|r| *r != role_id);
            }
        }
    }

    /// GUILD_MEMBER_ADD / GUILD_MEMBER_UPDATE
    pub fn upsert_member(&self, event: &GuildMemberEvent) {
        if let Some(guild) = self.write_guilds().get_mut(&event.guild_id) {
            guild.members.insert(event.user.id, event.roles.clone());
        }
    }

    pub fn remove_member(&self, guild_id: GuildId, user_id: UserId) {
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            guild.members.remove(&user_id);
            guild.voice_states.remove(&user_id);
        }
    }

    pub fn add_member_chunk(&self, chunk: &GuildMembersChunk) {
        if let Some(guild) = self.write_guilds().get_mut(&chunk.guild_id) {
            for member in &chunk.members {
                guild.add_member(member);
            }
        }
    }

    /// VOICE_STATE_UPDATE: a member joined, moved between, or left voice channels.
    pub fn update_voice_state(&self, state: &VoiceState) {
        let Some(guild_id) = state.guild_id else {
            return;
        };
        if let Some(guild) = self.write_guilds().get_mut(&guild_id) {
            match state.channel_id {
                Some(channel_id) => {
                    guild.voice_states.insert(state.user_id, channel_id);
                }
                None => {
                    guild.voice_states.remove(&state.user_id);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_guild(&self, guild_id: GuildId) -> bool {
        self.read_guilds().contains_key(&guild_id)
    }

    /// Whether the member list is shorter than the guild's member count, in
    /// which case the rest must be requested over the gateway.
    pub fn needs_member_chunk(&self, guild_id: GuildId) -> bool {
        self.read_guilds()
            .get(&guild_id)
            .and_then(|g| g.member_count.map(|count| (g.members.len() as u64) < count))
            .unwrap_or(false)
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<ParentChannel> {
        let guild_id = self.guild_of(channel_id)?;
        let guilds = self.read_guilds();
        let channel = guilds.get(&guild_id)?.channels.get(&channel_id)?;
        Some(ParentChannel {
            id: channel_id,
            guild_id: Some(guild_id),
            name: channel.name.clone(),
            is_guild_text: matches!(
                channel.kind,
                CHANNEL_TYPE_GUILD_TEXT | CHANNEL_TYPE_GUILD_ANNOUNCEMENT
            ),
        })
    }

    /// Every cached member with its effective permissions on `channel_id`.
    ///
    /// `None` when the guild, its owner, or the channel is unknown.
    pub fn roster(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<Vec<RosterMember>> {
        let guilds = self.read_guilds();
        let guild = guilds.get(&guild_id)?;
        let channel = guild.channels.get(&channel_id)?;
        let ctx = GuildPermissionContext {
            guild_id,
            owner_id: guild.owner_id?,
            roles: &guild.roles,
        };

        let mut roster: Vec<RosterMember> = guild
            .members
            .iter()
            .map(|(user_id, roles)| RosterMember {
                user_id: *user_id,
                permissions: ctx.channel_permissions(*user_id, roles, &channel.overwrites),
            })
            .collect();
        roster.sort_by_key(|m| m.user_id);
        Some(roster)
    }

    /// Members currently connected to `channel_id`.
    pub fn occupancy(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
        let guilds = self.read_guilds();
        let guild = guilds.get(&guild_id)?;
        Some(guild.voice_states.values().filter(|c| **c == channel_id).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::model::User;

    const GUILD: GuildId = GuildId::new(1);
    const TEXT: ChannelId = ChannelId::new(10);
    const SECRET: ChannelId = ChannelId::new(11);
    const VOICE: ChannelId = ChannelId::new(20);
    const STAFF: RoleId = RoleId::new(50);

    fn guild() -> Guild {
        serde_json::from_value(serde_json::json!({
            "id": "1",
            "owner_id": "2",
            "member_count": 4,
            "roles": [
                {"id": "1", "permissions": "1024"},
                {"id": "50", "permissions": "0"}
            ],
            "channels": [
                {"id": "10", "type": 0, "name": "general"},
                {"id": "11", "type": 0, "name": "staff", "permission_overwrites": [
                    {"id": "1", "type": 0, "allow": "0", "deny": "1024"},
                    {"id": "50", "type": 0, "allow": "1024", "deny": "0"}
                ]},
                {"id": "20", "type": 2, "name": "voice"}
            ],
            "members": [
                {"user": {"id": "2"}, "roles": []},
                {"user": {"id": "3"}, "roles": []},
                {"user": {"id": "4"}, "roles": ["50"]}
            ],
            "voice_states": [
                {"channel_id": "20", "user_id": "3"},
                {"channel_id": "20", "user_id": "4"}
            ]
        }))
        .unwrap()
    }

    fn cache() -> GuildCache {
        let cache = GuildCache::new();
        cache.upsert_guild(&guild());
        cache
    }

    fn viewers(roster: &[RosterMember]) -> Vec<u64> {
        roster
            .iter()
            .filter(|m| m.permissions.contains(Permissions::VIEW_CHANNEL))
            .map(|m| m.user_id.get())
            .collect()
    }

    #[test]
    fn test_channel_lookup() {
        let cache = cache();

        let text = cache.channel(TEXT).unwrap();
        assert_eq!(text.name, "general");
        assert_eq!(text.guild_id, Some(GUILD));
        assert!(text.is_guild_text);

        assert!(!cache.channel(VOICE).unwrap().is_guild_text);
        assert!(cache.channel(ChannelId::new(999)).is_none());
    }

    #[test]
    fn test_roster_respects_overwrites() {
        let cache = cache();

        let open = cache.roster(GUILD, TEXT).unwrap();
        assert_eq!(viewers(&open), vec![2, 3, 4]);

        // Owner always sees; everyone else only with the staff role
        let staff = cache.roster(GUILD, SECRET).unwrap();
        assert_eq!(viewers(&staff), vec![2, 4]);
    }

    #[test]
    fn test_role_update_changes_roster() {
        let cache = cache();
        cache.remove_role(GUILD, STAFF);

        let staff = cache.roster(GUILD, SECRET).unwrap();
        assert_eq!(viewers(&staff), vec![2]);
    }

    #[test]
    fn test_occupancy_tracks_voice_states() {
        let cache = cache();
        assert_eq!(cache.occupancy(GUILD, VOICE), Some(2));

        cache.update_voice_state(&VoiceState {
            guild_id: Some(GUILD),
            channel_id: None,
            user_id: UserId::new(3),
        });
        assert_eq!(cache.occupancy(GUILD, VOICE), Some(1));

        cache.remove_channel(VOICE);
        assert_eq!(cache.occupancy(GUILD, VOICE), Some(0));
        assert!(cache.occupancy(GuildId::new(9), VOICE).is_none());
    }

    #[test]
    fn test_member_chunk_fills_roster() {
        let cache = cache();
        assert!(cache.needs_member_chunk(GUILD));

        cache.add_member_chunk(&GuildMembersChunk {
            guild_id: GUILD,
            members: vec![Member {
                user: Some(User { id: UserId::new(5), bot: false }),
                roles: vec![],
            }],
        });

        assert!(!cache.needs_member_chunk(GUILD));
        assert_eq!(cache.roster(GUILD, TEXT).unwrap().len(), 4);
    }

    #[test]
    fn test_remove_guild_clears_channels() {
        let cache = cache();
        cache.remove_guild(GUILD);

        assert!(!cache.has_guild(GUILD));
        assert!(cache.channel(TEXT).is_none());
    }
}
