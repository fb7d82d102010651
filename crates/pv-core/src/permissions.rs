//! Permission bits, channel permission computation and grant resolution.
//!
//! A private voice room starts closed: `@everyone` is denied view and
//! connect. Every member who can already see the parent text channel then
//! receives a member overwrite with the full voice set. Seeing the parent is
//! the only criterion; roles are not consulted beyond how they shape that
//! visibility.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

use crate::id::{DecimalU64Visitor, GuildId, RoleId, UserId};
use crate::types::RosterMember;

bitflags! {
    /// A Discord permission bitset.
    ///
    /// Only the bits this crate reasons about are named; every other bit is
    /// carried through untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const ADMINISTRATOR = 1 << 3;
        const PRIORITY_SPEAKER = 1 << 8;
        const STREAM = 1 << 9;
        const VIEW_CHANNEL = 1 << 10;
        const CONNECT = 1 << 20;
        const SPEAK = 1 << 21;
        const MUTE_MEMBERS = 1 << 22;
        const DEAFEN_MEMBERS = 1 << 23;
        const MOVE_MEMBERS = 1 << 24;
        const USE_VAD = 1 << 25;

        const _ = !0;
    }
}

impl Permissions {
    /// Every bit set; what owners and administrators resolve to.
    pub const ALL: Self = Self::from_bits_retain(u64::MAX);

    /// What `@everyone` loses on a fresh room.
    pub const DEFAULT_DENY: Self = Self::VIEW_CHANNEL
        .union(Self::CONNECT)
        .union(Self::SPEAK)
        .union(Self::MUTE_MEMBERS)
        .union(Self::DEAFEN_MEMBERS)
        .union(Self::MOVE_MEMBERS)
        .union(Self::USE_VAD);

    /// Full control of a voice channel, granted to every visible member.
    pub const ALL_VOICE: Self = Self::DEFAULT_DENY
        .union(Self::PRIORITY_SPEAKER)
        .union(Self::STREAM);

    /// Clear `deny`, then set `allow`, the way an overwrite applies.
    pub const fn apply(self, allow: Self, deny: Self) -> Self {
        self.difference(deny).union(allow)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_any(DecimalU64Visitor)
            .map(Self::from_bits_retain)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Overwrites
// ─────────────────────────────────────────────────────────────────────────────

/// Who a channel overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverwriteTarget {
    Role(RoleId),
    Member(UserId),
}

/// A per-channel permission adjustment for one role or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl Overwrite {
    pub fn role(role_id: RoleId, allow: Permissions, deny: Permissions) -> Self {
        Self {
            target: OverwriteTarget::Role(role_id),
            allow,
            deny,
        }
    }

    pub fn member(user_id: UserId, allow: Permissions, deny: Permissions) -> Self {
        Self {
            target: OverwriteTarget::Member(user_id),
            allow,
            deny,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission computation
// ─────────────────────────────────────────────────────────────────────────────

/// Guild-level facts needed to resolve a member's permissions.
#[derive(Debug, Clone, Copy)]
pub struct GuildPermissionContext<'a> {
    pub guild_id: GuildId,
    pub owner_id: UserId,
    pub roles: &'a HashMap<RoleId, Permissions>,
}

impl GuildPermissionContext<'_> {
    /// Guild-wide permissions of a member before channel overwrites.
    pub fn base_permissions(&self, user_id: UserId, member_roles: &[RoleId]) -> Permissions {
        if user_id == self.owner_id {
            return Permissions::ALL;
        }

        let mut permissions = self
            .roles
            .get(&self.guild_id.everyone_role())
            .copied()
            .unwrap_or(Permissions::empty());
        for role_id in member_roles {
            if let Some(role) = self.roles.get(role_id) {
                permissions |= *role;
            }
        }

        if permissions.contains(Permissions::ADMINISTRATOR) {
            return Permissions::ALL;
        }
        permissions
    }

    /// Permissions of a member on a channel carrying `overwrites`.
    ///
    /// Order: `@everyone` overwrite, then the union of the member's role
    /// overwrites, then the member's own overwrite.
    pub fn channel_permissions(
        &self,
        user_id: UserId,
        member_roles: &[RoleId],
        overwrites: &[Overwrite],
    ) -> Permissions {
        let base = self.base_permissions(user_id, member_roles);
        if base.contains(Permissions::ADMINISTRATOR) {
            return Permissions::ALL;
        }

        let everyone = self.guild_id.everyone_role();
        let mut permissions = base;

        if let Some(ow) = overwrites
            .iter()
            .find(|ow| ow.target == OverwriteTarget::Role(everyone))
        {
            permissions = permissions.apply(ow.allow, ow.deny);
        }

        let mut allow = Permissions::empty();
        let mut deny = Permissions::empty();
        for ow in overwrites {
            if let OverwriteTarget::Role(role_id) = ow.target {
                if role_id != everyone && member_roles.contains(&role_id) {
                    allow |= ow.allow;
                    deny |= ow.deny;
                }
            }
        }
        permissions = permissions.apply(allow, deny);

        if let Some(ow) = overwrites
            .iter()
            .find(|ow| ow.target == OverwriteTarget::Member(user_id))
        {
            permissions = permissions.apply(ow.allow, ow.deny);
        }

        permissions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grant resolution
// ─────────────────────────────────────────────────────────────────────────────

/// The overwrites to apply to a freshly created room, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPlan {
    /// `@everyone` loses view and connect.
    pub default_deny: Overwrite,
    /// One full-voice allow per member who can see the parent channel.
    pub member_grants: Vec<Overwrite>,
}

/// Resolve the grants for a new room from the parent channel's roster.
pub fn resolve_grants(guild_id: GuildId, roster: &[RosterMember]) -> GrantPlan {
    let default_deny = Overwrite::role(
        guild_id.everyone_role(),
        Permissions::empty(),
        Permissions::DEFAULT_DENY,
    );

    let mut seen = HashSet::new();
    let member_grants = roster
        .iter()
        .filter(|m| m.permissions.contains(Permissions::VIEW_CHANNEL))
        .filter(|m| seen.insert(m.user_id))
        .map(|m| Overwrite::member(m.user_id, Permissions::ALL_VOICE, Permissions::empty()))
        .collect();

    GrantPlan {
        default_deny,
        member_grants,
    }
}
