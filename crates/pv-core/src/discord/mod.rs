//! Discord plumbing.
//!
//! - **model**: Wire payloads for the REST API and the gateway
//! - **rest**: HTTP client with rate-limit retries
//! - **gateway**: Websocket session that feeds the cache and the ingress
//! - **cache**: Guild state mirror used to resolve permissions and occupancy
//! - **platform**: [`crate::Platform`] implementation over the above

pub mod cache;
pub mod gateway;
pub mod model;
pub mod platform;
pub mod rest;

pub use cache::GuildCache;
pub use gateway::{CloseAction, Gateway};
pub use platform::DiscordPlatform;
pub use rest::RestClient;
