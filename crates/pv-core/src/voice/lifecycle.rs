//! Lifecycle manager: creation, expiry and teardown of private voice rooms.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::id::{ChannelId, GuildId, UserId};
use crate::permissions::{resolve_grants, OverwriteTarget};
use crate::platform::Platform;
use crate::registry::{ClaimConflict, VoiceRegistry};
use crate::types::PrivateVoice;

/// Tunables of the room lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Marker prepended to every room name.
    pub voice_prefix: String,
    /// Platform limit on channel name length, in characters.
    pub name_limit: usize,
    /// How long a room may sit unjoined before the sweep may delete it.
    pub ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            voice_prefix: "PV: ".to_string(),
            name_limit: 100,
            ttl: Duration::from_secs(30),
        }
    }
}

/// A `meet` command, already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVoiceRequest {
    pub guild_id: GuildId,
    pub parent_channel_id: ChannelId,
    pub owner_id: UserId,
    /// Requested title; empty means "use the parent channel's name".
    pub title: String,
}

/// Result of a successful creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedVoice {
    pub voice: PrivateVoice,
    /// Members that received the full-voice allow.
    pub granted: Vec<UserId>,
    /// Members whose allow could not be applied.
    pub failed_grants: Vec<UserId>,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub deleted: Vec<ChannelId>,
    /// Expired but someone is connected.
    pub occupied: usize,
    /// Occupancy or delete calls that failed; retried next tick.
    pub failures: usize,
}

/// Orchestrates room creation, expiry and teardown over a shared registry.
pub struct LifecycleManager {
    platform: Arc<dyn Platform>,
    registry: Arc<VoiceRegistry>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        platform: Arc<dyn Platform>,
        registry: Arc<VoiceRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            platform,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<VoiceRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle a `meet` command end to end, replying to the issuer.
    ///
    /// Validation failures and platform failures are both reported in the
    /// parent channel and returned; nothing is left in the registry unless
    /// a channel exists on the platform.
    pub async fn create_voice(&self, request: &CreateVoiceRequest) -> Result<CreatedVoice> {
        match self.try_create(request).await {
            Ok(created) => {
                self.notify(request.parent_channel_id, &confirmation_message(&created))
                    .await;
                Ok(created)
            }
            Err(e) => {
                if e.is_validation() {
                    info!(
                        parent_channel_id = %request.parent_channel_id,
                        owner_id = %request.owner_id,
                        reason = %e,
                        "Rejected voice channel request"
                    );
                } else {
                    error!(
                        parent_channel_id = %request.parent_channel_id,
                        error = %e,
                        "Voice channel creation failed"
                    );
                }
                self.notify(request.parent_channel_id, &rejection_message(&e, request.owner_id))
                    .await;
                Err(e)
            }
        }
    }

    async fn try_create(&self, request: &CreateVoiceRequest) -> Result<CreatedVoice> {
        let prefix = &self.config.voice_prefix;
        let length = prefix.chars().count() + request.title.chars().count();
        if length > self.config.name_limit {
            return Err(Error::NameTooLong {
                length,
                limit: self.config.name_limit,
            });
        }

        let parent = self
            .platform
            .parent_channel(request.parent_channel_id)
            .await?
            .filter(|p| p.is_guild_text && p.guild_id == Some(request.guild_id))
            .ok_or_else(|| Error::InvalidParent(request.parent_channel_id.to_string()))?;

        let claim = match self.registry.claim_parent(parent.id) {
            Ok(claim) => claim,
            Err(ClaimConflict::Live(existing)) => {
                return Err(Error::DuplicateParent {
                    existing: existing.name,
                });
            }
            Err(ClaimConflict::Pending) => {
                return Err(Error::CreationInProgress(parent.id.to_string()));
            }
        };

        let title = if request.title.is_empty() {
            // The parent's own name may not leave room for the prefix
            let room = self.config.name_limit.saturating_sub(prefix.chars().count());
            parent.name.chars().take(room).collect()
        } else {
            request.title.clone()
        };
        let name = format!("{}{}", prefix, title);

        let roster = self.platform.roster(request.guild_id, parent.id).await?;
        let plan = resolve_grants(request.guild_id, &roster);

        let channel_id = self
            .platform
            .create_voice_channel(request.guild_id, &name)
            .await?;

        let voice = PrivateVoice {
            channel_id,
            guild_id: request.guild_id,
            parent_channel_id: parent.id,
            owner_id: request.owner_id,
            name,
            operators: Vec::new(),
            created_at: Utc::now(),
        };
        claim.commit(voice.clone());
        info!(
            channel_id = %channel_id,
            parent_channel_id = %parent.id,
            name = %voice.name,
            "Created private voice channel"
        );

        if let Err(e) = self.platform.set_permission(channel_id, plan.default_deny).await {
            self.roll_back(&voice).await;
            return Err(e);
        }

        let mut granted = Vec::with_capacity(plan.member_grants.len());
        let mut failed_grants = Vec::new();
        for grant in plan.member_grants {
            let OverwriteTarget::Member(user_id) = grant.target else {
                continue;
            };
            match self.platform.set_permission(channel_id, grant).await {
                Ok(()) => granted.push(user_id),
                Err(e) => {
                    warn!(
                        channel_id = %channel_id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to grant voice access"
                    );
                    failed_grants.push(user_id);
                }
            }
        }
        debug!(
            channel_id = %channel_id,
            granted = granted.len(),
            failed = failed_grants.len(),
            "Applied member grants"
        );

        Ok(CreatedVoice {
            voice,
            granted,
            failed_grants,
        })
    }

    /// Undo a creation whose default-deny could not be applied.
    ///
    /// The record leaves the registry before the delete, so the echoed
    /// deletion event is not announced. If the channel cannot be deleted,
    /// the record goes back so the sweep reclaims it later.
    async fn roll_back(&self, voice: &PrivateVoice) {
        let removed = self.registry.remove_claimed(voice.channel_id);

        match self.platform.delete_channel(voice.channel_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(
                    channel_id = %voice.channel_id,
                    error = %e,
                    "Rollback delete failed, leaving channel to the sweep"
                );
                if let Some((voice, claim)) = removed {
                    claim.commit(voice);
                }
                return;
            }
        }
        info!(channel_id = %voice.channel_id, "Rolled back private voice channel");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expiry
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete every room that is expired at `now` and has nobody connected.
    ///
    /// Works on a snapshot of the registry. Someone joining between the
    /// occupancy check and the delete does not save the room; that window
    /// is accepted.
    pub async fn evaluate_expiry(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for voice in self.registry.values() {
            report.checked += 1;
            if !voice.is_expired(now, self.config.ttl) {
                continue;
            }

            let connected = match self
                .platform
                .occupancy(voice.guild_id, voice.channel_id)
                .await
            {
                Ok(count) => count,
                Err(e) => {
                    warn!(channel_id = %voice.channel_id, error = %e, "Occupancy check failed");
                    report.failures += 1;
                    continue;
                }
            };
            if connected > 0 {
                debug!(channel_id = %voice.channel_id, connected, "Expired channel still in use");
                report.occupied += 1;
                continue;
            }

            match self.platform.delete_channel(voice.channel_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(channel_id = %voice.channel_id, "Channel already gone");
                }
                Err(e) => {
                    warn!(
                        channel_id = %voice.channel_id,
                        error = %e,
                        "Failed to delete expired channel"
                    );
                    report.failures += 1;
                    continue;
                }
            }

            if self.reclaim(voice.channel_id).await.is_some() {
                report.deleted.push(voice.channel_id);
            }
        }

        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// The platform reports `channel_id` deleted. Idempotent: unknown ids
    /// and repeated notifications do nothing.
    pub async fn handle_channel_delete(&self, channel_id: ChannelId) -> Option<PrivateVoice> {
        let removed = self.reclaim(channel_id).await;
        if removed.is_none() {
            debug!(channel_id = %channel_id, "Ignoring delete of untracked channel");
        }
        removed
    }

    /// Drop the record and tell the parent channel, once.
    async fn reclaim(&self, channel_id: ChannelId) -> Option<PrivateVoice> {
        let voice = self.registry.remove(channel_id)?;
        info!(channel_id = %channel_id, name = %voice.name, "Removed private voice channel");
        self.notify(
            voice.parent_channel_id,
            &format!("Deleted voice channel `{}`", voice.name),
        )
        .await;
        Some(voice)
    }

    async fn notify(&self, channel_id: ChannelId, content: &str) {
        if let Err(e) = self.platform.send_message(channel_id, content).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to send notification");
        }
    }
}

fn confirmation_message(created: &CreatedVoice) -> String {
    let mut message = format!("Created voice channel `{}`", created.voice.name);
    if !created.failed_grants.is_empty() {
        message.push_str(&format!(
            "\n(could not grant access to {} member(s))",
            created.failed_grants.len()
        ));
    }
    message
}

fn rejection_message(error: &Error, owner_id: UserId) -> String {
    match error {
        Error::NameTooLong { .. } => format!("<@{}>, that does not fit!", owner_id),
        Error::InvalidParent(_) => "Cannot create channel here.".to_string(),
        Error::DuplicateParent { existing } => {
            format!("There is already a voice channel `{}`", existing)
        }
        Error::CreationInProgress(_) => {
            "A voice channel is already being created here.".to_string()
        }
        _ => format!("<@{}>, the voice channel could not be created.", owner_id),
    }
}
