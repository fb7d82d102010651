//! pv-core - Core library for privoice
//!
//! privoice provisions short-lived private voice channels on request and
//! reclaims them once they are unused:
//!
//! - **registry**: In-memory table of the voice channels this process owns
//! - **permissions**: Permission bits, overwrite computation and grant resolution
//! - **voice**: Lifecycle manager (create / expire / delete) and the expiry sweep
//! - **ingress**: Command parsing and event dispatch into the lifecycle manager
//! - **platform**: Trait for the chat platform the core drives
//! - **task**: Panic-containing task spawning
//! - **discord**: Discord REST client, gateway and state cache (feature `discord`)

pub mod error;
pub mod id;
pub mod ingress;
pub mod permissions;
pub mod platform;
pub mod registry;
pub mod task;
pub mod types;
pub mod voice;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{Error, Result};
pub use id::{ChannelId, GuildId, RoleId, UserId};
pub use platform::Platform;
pub use registry::VoiceRegistry;
pub use types::PrivateVoice;
pub use voice::{LifecycleConfig, LifecycleManager, SweepScheduler};
