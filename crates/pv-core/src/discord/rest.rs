//! Discord REST client.
//!
//! Thin wrapper over the v10 HTTP API covering the handful of routes privoice
//! calls. Rate-limited requests (429) are retried after the delay Discord
//! asks for, a bounded number of times.

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::model::{
    AllowedMentions, Channel, CreateChannelRequest, CreateMessageRequest, EditOverwriteRequest,
    GatewayBot, RateLimitBody, CHANNEL_TYPE_GUILD_VOICE,
};
use crate::error::{Error, Result};
use crate::id::{ChannelId, GuildId};
use crate::permissions::{Overwrite, OverwriteTarget};

/// Default API base
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Retries after a 429 before giving up
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest we are willing to wait on a single rate limit
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// REST client for the Discord API
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl RestClient {
    /// Create a client authenticating as the bot with `token`
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Create a client against a custom API base
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/privoice/privoice, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gateway
    // ─────────────────────────────────────────────────────────────────────────

    /// Websocket URL to connect the gateway to
    pub async fn gateway_url(&self) -> Result<String> {
        let bot: GatewayBot = self.get("/gateway/bot").await?;
        Ok(bot.url)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a channel by ID
    pub async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>> {
        match self.get(&format!("/channels/{}", channel_id)).await {
            Ok(c) => Ok(Some(c)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a voice channel at the top level of a guild
    pub async fn create_voice_channel(&self, guild_id: GuildId, name: &str) -> Result<Channel> {
        let req = CreateChannelRequest {
            name,
            kind: CHANNEL_TYPE_GUILD_VOICE,
        };
        self.post(&format!("/guilds/{}/channels", guild_id), &req).await
    }

    /// Delete a channel. `Error::NotFound` when it is already gone.
    pub async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.delete(&format!("/channels/{}", channel_id)).await
    }

    /// Create or replace one permission overwrite on a channel
    pub async fn put_overwrite(&self, channel_id: ChannelId, overwrite: Overwrite) -> Result<()> {
        let target = match overwrite.target {
            OverwriteTarget::Role(id) => id.get(),
            OverwriteTarget::Member(id) => id.get(),
        };
        let body = EditOverwriteRequest::from(overwrite);
        self.send(
            Method::PUT,
            &format!("/channels/{}/permissions/{}", channel_id, target),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Post a message to a channel
    pub async fn create_message(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        let req = CreateMessageRequest {
            content,
            allowed_mentions: AllowedMentions::default(),
        };
        self.send(Method::POST, &format!("/channels/{}/messages", channel_id), Some(&req))
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP plumbing
    // ─────────────────────────────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.send(Method::GET, path, Option::<&()>::None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let text = self.send(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, Option::<&()>::None).await?;
        Ok(())
    }

    /// Send a request and return the raw response body.
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            debug!("API request: {} {}", method, url);

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(b) = body {
                req = req.json(b);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();

            if status.is_success() {
                return Ok(text);
            }

            match status {
                StatusCode::NOT_FOUND => return Err(Error::NotFound(path.to_string())),
                StatusCode::TOO_MANY_REQUESTS => {
                    let limit = RateLimit::from_body(&text);
                    if attempt >= MAX_RATE_LIMIT_RETRIES || limit.delay > MAX_RETRY_AFTER {
                        return Err(Error::RateLimited {
                            route: path.to_string(),
                            retry_after_ms: limit.delay_ms(),
                        });
                    }
                    attempt += 1;
                    warn!(
                        route = %path,
                        retry_after_ms = limit.delay_ms(),
                        global = limit.global,
                        attempt,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(limit.delay).await;
                }
                _ => {
                    return Err(Error::Api {
                        status: status.as_u16(),
                        body: text,
                    });
                }
            }
        }
    }
}

/// What a 429 response asks of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimit {
    delay: Duration,
    global: bool,
}

impl RateLimit {
    /// Parse a 429 body. An unparseable or negative delay means one second;
    /// one too large for a `Duration` saturates.
    fn from_body(body: &str) -> Self {
        match serde_json::from_str::<RateLimitBody>(body) {
            Ok(b) if b.retry_after.is_finite() && b.retry_after >= 0.0 => Self {
                delay: Duration::try_from_secs_f64(b.retry_after).unwrap_or(Duration::MAX),
                global: b.global,
            },
            Ok(b) => Self {
                delay: Duration::from_secs(1),
                global: b.global,
            },
            Err(_) => Self {
                delay: Duration::from_secs(1),
                global: false,
            },
        }
    }

    fn delay_ms(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }
}
