//! In-memory registry of the private voice rooms this process owns.
//!
//! The registry is the only shared mutable state in the core. All access
//! goes through its methods, each of which takes the internal lock for the
//! duration of a single map operation and never across an await point.
//! Snapshots returned by [`VoiceRegistry::values`] are owned clones, so the
//! sweep can iterate while commands and deletion events mutate the map.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::id::ChannelId;
use crate::types::PrivateVoice;

#[derive(Debug, Default)]
struct RegistryInner {
    voices: HashMap<ChannelId, PrivateVoice>,
    /// Parent channels with a creation in flight.
    claims: HashSet<ChannelId>,
}

impl RegistryInner {
    /// The live room created from `parent`, if any.
    fn find_by_parent(&self, parent: ChannelId) -> Option<&PrivateVoice> {
        self.voices.values().find(|v| v.parent_channel_id == parent)
    }
}

/// Why a parent channel could not be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimConflict {
    /// A live room already belongs to this parent.
    Live(PrivateVoice),
    /// Another creation for this parent is still talking to the platform.
    Pending,
}

/// Thread-safe registry of private voice rooms keyed by channel id.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    inner: Mutex<RegistryInner>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Every operation leaves the map consistent, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("Voice registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Insert or replace a record. Returns the previous record for that id.
    pub fn insert(&self, voice: PrivateVoice) -> Option<PrivateVoice> {
        self.lock().voices.insert(voice.channel_id, voice)
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<PrivateVoice> {
        self.lock().voices.get(&channel_id).cloned()
    }

    pub fn remove(&self, channel_id: ChannelId) -> Option<PrivateVoice> {
        self.lock().voices.remove(&channel_id)
    }

    /// Owned snapshot of every record, ordered by creation time.
    pub fn values(&self) -> Vec<PrivateVoice> {
        let mut voices: Vec<_> = self.lock().voices.values().cloned().collect();
        voices.sort_by_key(|v| (v.created_at, v.channel_id));
        voices
    }

    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.lock().voices.contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.lock().voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().voices.is_empty()
    }

    /// Reserve `parent` for a creation in progress.
    ///
    /// Fails if a live room or another in-flight creation already holds the
    /// parent. The claim is released when dropped, or turned into a live
    /// record by [`ParentClaim::commit`].
    pub fn claim_parent(&self, parent: ChannelId) -> Result<ParentClaim<'_>, ClaimConflict> {
        let mut inner = self.lock();

        if let Some(existing) = inner.find_by_parent(parent) {
            return Err(ClaimConflict::Live(existing.clone()));
        }
        if !inner.claims.insert(parent) {
            return Err(ClaimConflict::Pending);
        }

        Ok(ParentClaim {
            registry: self,
            parent,
            released: false,
        })
    }

    /// Remove a record but keep its parent claimed, so the removal can be
    /// undone with [`ParentClaim::commit`] before another creation takes the
    /// parent. Dropping the claim makes the removal final.
    pub fn remove_claimed(&self, channel_id: ChannelId) -> Option<(PrivateVoice, ParentClaim<'_>)> {
        let mut inner = self.lock();
        let voice = inner.voices.remove(&channel_id)?;
        inner.claims.insert(voice.parent_channel_id);

        let claim = ParentClaim {
            registry: self,
            parent: voice.parent_channel_id,
            released: false,
        };
        Some((voice, claim))
    }
}

/// Exclusive right to create the room for one parent channel.
#[derive(Debug)]
pub struct ParentClaim<'a> {
    registry: &'a VoiceRegistry,
    parent: ChannelId,
    released: bool,
}

impl ParentClaim<'_> {
    /// Insert the record and release the claim under one lock.
    pub fn commit(mut self, voice: PrivateVoice) {
        let mut inner = self.registry.lock();
        inner.claims.remove(&self.parent);
        inner.voices.insert(voice.channel_id, voice);
        self.released = true;
    }
}

impl Drop for ParentClaim<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.registry.lock().claims.remove(&self.parent);
        }
    }
}
