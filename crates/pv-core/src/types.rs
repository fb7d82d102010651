//! Shared types for pv-core.
//!
//! These types flow between the lifecycle manager, the registry and the
//! platform implementations.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::id::{ChannelId, GuildId, UserId};
use crate::permissions::Permissions;

// ─────────────────────────────────────────────────────────────────────────────
// Private voice record
// ─────────────────────────────────────────────────────────────────────────────

/// A voice channel created and owned by this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateVoice {
    /// Platform-assigned channel id; registry key.
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    /// Text channel the `meet` command was issued in.
    pub parent_channel_id: ChannelId,
    pub owner_id: UserId,
    /// Full channel name, voice prefix included.
    pub name: String,
    /// Reserved for operator promotion; always empty today.
    pub operators: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl PrivateVoice {
    /// A room is expired once `created_at + ttl` lies strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = TimeDelta::from_std(ttl) else {
            return false;
        };
        match self.created_at.checked_add_signed(ttl) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform views
// ─────────────────────────────────────────────────────────────────────────────

/// The channel a command was issued in, as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChannel {
    pub id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub name: String,
    /// Only guild text channels can parent a private voice room.
    pub is_guild_text: bool,
}

/// A guild member together with its resolved permissions on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterMember {
    pub user_id: UserId,
    pub permissions: Permissions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_at(created_at: DateTime<Utc>) -> PrivateVoice {
        PrivateVoice {
            channel_id: ChannelId::new(10),
            guild_id: GuildId::new(1),
            parent_channel_id: ChannelId::new(2),
            owner_id: UserId::new(3),
            name: "PV: standup".to_string(),
            operators: Vec::new(),
            created_at,
        }
    }

    #[test]
    fn test_not_expired_at_creation() {
        let now = Utc::now();
        let voice = voice_at(now);
        assert!(!voice.is_expired(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_expires_strictly_after_ttl() {
        let t0 = Utc::now();
        let voice = voice_at(t0);
        let ttl = Duration::from_secs(30);

        assert!(!voice.is_expired(t0 + TimeDelta::seconds(29), ttl));
        assert!(!voice.is_expired(t0 + TimeDelta::seconds(30), ttl));
        assert!(voice.is_expired(t0 + TimeDelta::seconds(31), ttl));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let t0 = Utc::now();
        let voice = voice_at(t0);
        assert!(!voice.is_expired(t0 + TimeDelta::days(365), Duration::MAX));
    }
}
