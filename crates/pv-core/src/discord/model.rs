//! Discord API v10 payloads, trimmed to the fields privoice reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ChannelId, GuildId, RoleId, Snowflake, UserId};
use crate::permissions::{Overwrite, OverwriteTarget, Permissions};

// ─────────────────────────────────────────────────────────────────────────────
// Channel types and gateway constants
// ─────────────────────────────────────────────────────────────────────────────

pub const CHANNEL_TYPE_GUILD_TEXT: u8 = 0;
pub const CHANNEL_TYPE_GUILD_VOICE: u8 = 2;
pub const CHANNEL_TYPE_GUILD_ANNOUNCEMENT: u8 = 5;

pub const OVERWRITE_TYPE_ROLE: u8 = 0;
pub const OVERWRITE_TYPE_MEMBER: u8 = 1;

/// Gateway opcodes.
pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway intents.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MEMBERS: u64 = 1 << 1;
    pub const GUILD_VOICE_STATES: u64 = 1 << 7;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Everything privoice needs: guild/channel/role state, members for
    /// permission resolution, voice states for occupancy, and message bodies.
    pub const DEFAULT: u64 =
        GUILDS | GUILD_MEMBERS | GUILD_VOICE_STATES | GUILD_MESSAGES | MESSAGE_CONTENT;
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn new(op: u8, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    pub url: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOverwrite {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl RawOverwrite {
    pub fn to_overwrite(&self) -> Option<Overwrite> {
        let target = match self.kind {
            OVERWRITE_TYPE_ROLE => OverwriteTarget::Role(RoleId::new(self.id.get())),
            OVERWRITE_TYPE_MEMBER => OverwriteTarget::Member(UserId::new(self.id.get())),
            _ => return None,
        };
        Some(Overwrite {
            target,
            allow: self.allow,
            deny: self.deny,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permission_overwrites: Vec<RawOverwrite>,
}

impl Channel {
    pub fn is_guild_text(&self) -> bool {
        matches!(self.kind, CHANNEL_TYPE_GUILD_TEXT | CHANNEL_TYPE_GUILD_ANNOUNCEMENT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
    #[serde(default)]
    pub member_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default)]
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch bodies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleEvent {
    pub guild_id: GuildId,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: GuildId,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberEvent {
    pub guild_id: GuildId,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: GuildId,
    pub members: Vec<Member>,
}

// ─────────────────────────────────────────────────────────────────────────────
// REST bodies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateChannelRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Serialize)]
pub struct EditOverwriteRequest {
    #[serde(rename = "type")]
    pub kind: u8,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl From<Overwrite> for EditOverwriteRequest {
    fn from(overwrite: Overwrite) -> Self {
        let kind = match overwrite.target {
            OverwriteTarget::Role(_) => OVERWRITE_TYPE_ROLE,
            OverwriteTarget::Member(_) => OVERWRITE_TYPE_MEMBER,
        };
        Self {
            kind,
            allow: overwrite.allow,
            deny: overwrite.deny,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub content: &'a str,
    pub allowed_mentions: AllowedMentions,
}

/// Only user mentions ping; `@everyone` in a title never does.
#[derive(Debug, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<&'static str>,
}

impl Default for AllowedMentions {
    fn default() -> Self {
        Self {
            parse: vec!["users"],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}
