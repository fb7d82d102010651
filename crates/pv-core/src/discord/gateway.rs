//! Discord gateway session.
//!
//! Keeps one websocket connection alive: identifies (or resumes), heartbeats,
//! mirrors guild state into the [`GuildCache`], and forwards the events the
//! core reacts to as [`IngressEvent`]s.
//!
//! ```text
//!   connect ──► HELLO ──► IDENTIFY / RESUME ──► READY / RESUMED ──► dispatch loop
//!      ▲                                                               │
//!      └──────────── backoff ◄── dropped / RECONNECT / INVALID ◄───────┘
//! ```

use futures::{Sink, SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::cache::GuildCache;
use super::model::{
    intents, op, Channel, GatewayPayload, Guild, GuildMemberEvent, GuildMembersChunk,
    GuildRoleDelete, GuildRoleEvent, Hello, Message, Ready, UnavailableGuild, VoiceState,
};
use super::rest::RestClient;
use crate::error::{Error, Result};
use crate::ingress::{InboundMessage, IngressEvent};

const GATEWAY_VERSION: u8 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What to do after the server closes the connection with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the session.
    Resume,
    /// Reconnect with a fresh IDENTIFY.
    Reidentify,
    /// Stop: retrying cannot succeed (bad token, bad intents, ...).
    Fatal,
}

impl CloseAction {
    pub fn for_code(code: u16) -> Self {
        match code {
            // Authentication failed, invalid shard, sharding required,
            // invalid API version, invalid intents, disallowed intents
            4004 | 4010 | 4011 | 4012 | 4013 | 4014 => CloseAction::Fatal,
            // Invalid seq, session timed out
            4007 | 4009 => CloseAction::Reidentify,
            _ => CloseAction::Resume,
        }
    }
}

/// How one connection ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Reconnect,
    Fatal(u16),
}

/// Resume state carried across connections.
#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_url: Option<String>,
    seq: Option<u64>,
}

impl SessionState {
    fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.resume_url.is_some()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Gateway client.
#[derive(Clone)]
pub struct Gateway {
    token: String,
    intents: u64,
    rest: RestClient,
    cache: Arc<GuildCache>,
    events: mpsc::Sender<IngressEvent>,
    connected: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(
        token: impl Into<String>,
        rest: RestClient,
        cache: Arc<GuildCache>,
        events: mpsc::Sender<IngressEvent>,
    ) -> Self {
        Self {
            token: token.into(),
            intents: intents::DEFAULT,
            rest,
            cache,
            events,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that is true while a session is established
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Run until shutdown is signalled or the gateway refuses us for good.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut session = SessionState::default();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let url = match session.resume_url.clone().filter(|_| session.can_resume()) {
                Some(url) => url,
                None => match self.rest.gateway_url().await {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(error = %e, "Failed to fetch gateway URL");
                        if wait_or_shutdown(backoff, &mut shutdown).await {
                            return Ok(());
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                },
            };

            let outcome = self.connect(&url, &mut session, &mut shutdown).await;
            self.connected.store(false, Ordering::SeqCst);

            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    info!("Gateway stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Fatal(code)) => {
                    error!(code, "Gateway closed with a fatal code");
                    return Err(Error::gateway(format!("closed with fatal code {}", code)));
                }
                Ok(SessionEnd::Reconnect) => {
                    backoff = INITIAL_BACKOFF;
                    debug!(resume = session.can_resume(), "Reconnecting to gateway");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Gateway connection failed"
                    );
                    if wait_or_shutdown(backoff, &mut shutdown).await {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect(
        &self,
        url: &str,
        session: &mut SessionState,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let url = format!("{}/?v={}&encoding=json", url.trim_end_matches('/'), GATEWAY_VERSION);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::gateway(format!("connect failed: {}", e)))?;
        let (mut sink, mut stream) = ws.split();

        let hello: Hello = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload: GatewayPayload = serde_json::from_str(&text)?;
                    if payload.op == op::HELLO {
                        break serde_json::from_value(payload.d)?;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::gateway(e.to_string())),
                None => return Err(Error::gateway("closed before HELLO")),
            }
        };
        let interval = Duration::from_millis(hello.heartbeat_interval);

        if session.can_resume() {
            debug!("Resuming gateway session");
            send_payload(&mut sink, &self.resume_payload(session)).await?;
        } else {
            debug!("Identifying to gateway");
            send_payload(&mut sink, &self.identify_payload()).await?;
        }

        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let mut next_beat = Instant::now() + interval.mul_f64(jitter);
        let mut acked = true;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutting down".into(),
                        })))
                        .await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = sleep_until(next_beat) => {
                    if !acked {
                        warn!("Heartbeat not acknowledged, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    }
                    send_payload(&mut sink, &heartbeat_payload(session.seq)).await?;
                    acked = false;
                    next_beat += interval;
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                            return Ok(self.on_close(code, session));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "Gateway read failed");
                            return Ok(SessionEnd::Reconnect);
                        }
                        None => {
                            warn!("Gateway stream ended");
                            return Ok(SessionEnd::Reconnect);
                        }
                    };

                    let payload: GatewayPayload = match serde_json::from_str(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "Unparseable gateway payload");
                            continue;
                        }
                    };

                    match payload.op {
                        op::DISPATCH => {
                            if payload.s.is_some() {
                                session.seq = payload.s;
                            }
                            let Some(kind) = payload.t else { continue };
                            let reply = self.handle_dispatch(&kind, payload.d, session).await;
                            if let Some(reply) = reply {
                                send_payload(&mut sink, &reply).await?;
                            }
                        }
                        op::HEARTBEAT => {
                            send_payload(&mut sink, &heartbeat_payload(session.seq)).await?;
                        }
                        op::HEARTBEAT_ACK => acked = true,
                        op::RECONNECT => {
                            info!("Gateway requested reconnect");
                            return Ok(SessionEnd::Reconnect);
                        }
                        op::INVALID_SESSION => {
                            let resumable = payload.d.as_bool().unwrap_or(false);
                            warn!(resumable, "Gateway session invalidated");
                            if !resumable {
                                session.reset();
                            }
                            let pause = rand::thread_rng().gen_range(1..=5);
                            sleep(Duration::from_secs(pause)).await;
                            return Ok(SessionEnd::Reconnect);
                        }
                        other => debug!(op = other, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }

    fn on_close(&self, code: u16, session: &mut SessionState) -> SessionEnd {
        match CloseAction::for_code(code) {
            CloseAction::Fatal => SessionEnd::Fatal(code),
            CloseAction::Reidentify => {
                warn!(code, "Gateway closed, starting a new session");
                session.reset();
                SessionEnd::Reconnect
            }
            CloseAction::Resume => {
                info!(code, "Gateway closed, resuming");
                SessionEnd::Reconnect
            }
        }
    }

    /// Apply one dispatch. Returns a payload to send back, if any.
    async fn handle_dispatch(
        &self,
        kind: &str,
        data: Value,
        session: &mut SessionState,
    ) -> Option<GatewayPayload> {
        match self.apply_dispatch(kind, data, session).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(event = kind, error = %e, "Failed to handle dispatch");
                None
            }
        }
    }

    async fn apply_dispatch(
        &self,
        kind: &str,
        data: Value,
        session: &mut SessionState,
    ) -> Result<Option<GatewayPayload>> {
        match kind {
            "READY" => {
                let ready: Ready = serde_json::from_value(data)?;
                info!(user_id = %ready.user.id, "Gateway ready");
                session.session_id = Some(ready.session_id);
                session.resume_url = Some(ready.resume_gateway_url);
                self.connected.store(true, Ordering::SeqCst);
            }
            "RESUMED" => {
                info!("Gateway session resumed");
                self.connected.store(true, Ordering::SeqCst);
            }
            "GUILD_CREATE" => {
                let guild: Guild = serde_json::from_value(data)?;
                if guild.unavailable {
                    return Ok(None);
                }
                self.cache.upsert_guild(&guild);
                if self.cache.needs_member_chunk(guild.id) {
                    debug!(guild_id = %guild.id, "Requesting guild members");
                    return Ok(Some(GatewayPayload::new(
                        op::REQUEST_GUILD_MEMBERS,
                        json!({ "guild_id": guild.id, "query": "", "limit": 0 }),
                    )));
                }
            }
            "GUILD_UPDATE" => {
                let guild: Guild = serde_json::from_value(data)?;
                self.cache.update_guild(&guild);
            }
            "GUILD_DELETE" => {
                let guild: UnavailableGuild = serde_json::from_value(data)?;
                debug!(guild_id = %guild.id, unavailable = guild.unavailable, "Guild gone");
                self.cache.remove_guild(guild.id);
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                let channel: Channel = serde_json::from_value(data)?;
                self.cache.upsert_channel(&channel);
            }
            "CHANNEL_DELETE" => {
                let channel: Channel = serde_json::from_value(data)?;
                self.cache.remove_channel(channel.id);
                self.forward(IngressEvent::ChannelDeleted(channel.id)).await;
            }
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                let event: GuildRoleEvent = serde_json::from_value(data)?;
                self.cache.upsert_role(event.guild_id, &event.role);
            }
            "GUILD_ROLE_DELETE" => {
                let event: GuildRoleDelete = serde_json::from_value(data)?;
                self.cache.remove_role(event.guild_id, event.role_id);
            }
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
                let event: GuildMemberEvent = serde_json::from_value(data)?;
                self.cache.upsert_member(&event);
            }
            "GUILD_MEMBER_REMOVE" => {
                let event: GuildMemberEvent = serde_json::from_value(data)?;
                self.cache.remove_member(event.guild_id, event.user.id);
            }
            "GUILD_MEMBERS_CHUNK" => {
                let chunk: GuildMembersChunk = serde_json::from_value(data)?;
                self.cache.add_member_chunk(&chunk);
            }
            "VOICE_STATE_UPDATE" => {
                let state: VoiceState = serde_json::from_value(data)?;
                self.cache.update_voice_state(&state);
            }
            "MESSAGE_CREATE" => {
                let message: Message = serde_json::from_value(data)?;
                self.forward(IngressEvent::Message(InboundMessage {
                    guild_id: message.guild_id,
                    channel_id: message.channel_id,
                    author_id: message.author.id,
                    author_is_bot: message.author.bot,
                    content: message.content,
                }))
                .await;
            }
            _ => {}
        }
        Ok(None)
    }

    async fn forward(&self, event: IngressEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Ingress receiver dropped, event lost");
        }
    }

    fn identify_payload(&self) -> GatewayPayload {
        GatewayPayload::new(
            op::IDENTIFY,
            json!({
                "token": self.token,
                "intents": self.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "privoice",
                    "device": "privoice",
                },
            }),
        )
    }

    fn resume_payload(&self, session: &SessionState) -> GatewayPayload {
        GatewayPayload::new(
            op::RESUME,
            json!({
                "token": self.token,
                "session_id": session.session_id,
                "seq": session.seq,
            }),
        )
    }
}

fn heartbeat_payload(seq: Option<u64>) -> GatewayPayload {
    GatewayPayload::new(op::HEARTBEAT, json!(seq))
}

async fn send_payload<S>(sink: &mut S, payload: &GatewayPayload) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let text = serde_json::to_string(payload)?;
    sink.send(WsMessage::Text(text))
        .await
        .map_err(|e| Error::gateway(format!("send failed: {}", e)))
}

/// Sleep for `delay`, returning true if shutdown was signalled meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ChannelId, GuildId, UserId};

    fn gateway() -> (Gateway, Arc<GuildCache>, mpsc::Receiver<IngressEvent>) {
        let cache = Arc::new(GuildCache::new());
        let (tx, rx) = mpsc::channel(8);
        let rest = RestClient::with_base_url("token", "http://127.0.0.1:9").unwrap();
        (Gateway::new("token", rest, cache.clone(), tx), cache, rx)
    }

    fn guild_json(member_count: u64) -> Value {
        json!({
            "id": "1",
            "owner_id": "2",
            "member_count": member_count,
            "roles": [{"id": "1", "permissions": "1024"}],
            "channels": [{"id": "10", "type": 0, "name": "general"}],
            "members": [{"user": {"id": "2"}, "roles": []}]
        })
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseAction::for_code(4004), CloseAction::Fatal);
        assert_eq!(CloseAction::for_code(4014), CloseAction::Fatal);
        assert_eq!(CloseAction::for_code(4007), CloseAction::Reidentify);
        assert_eq!(CloseAction::for_code(4009), CloseAction::Reidentify);
        assert_eq!(CloseAction::for_code(4000), CloseAction::Resume);
        assert_eq!(CloseAction::for_code(1001), CloseAction::Resume);
    }

    #[test]
    fn test_identify_payload() {
        let (gateway, _, _) = gateway();
        let payload = gateway.identify_payload();

        assert_eq!(payload.op, op::IDENTIFY);
        assert_eq!(payload.d["token"], "token");
        assert_eq!(payload.d["intents"], intents::DEFAULT);
        assert_eq!(intents::DEFAULT, 1 | 2 | 128 | 512 | 32768);
    }

    #[test]
    fn test_reidentify_close_clears_session() {
        let (gateway, _, _) = gateway();
        let mut session = SessionState {
            session_id: Some("abc".into()),
            resume_url: Some("wss://resume".into()),
            seq: Some(42),
        };

        assert!(matches!(gateway.on_close(4000, &mut session), SessionEnd::Reconnect));
        assert!(session.can_resume());

        assert!(matches!(gateway.on_close(4009, &mut session), SessionEnd::Reconnect));
        assert!(!session.can_resume());
        assert_eq!(session.seq, None);

        assert!(matches!(gateway.on_close(4004, &mut session), SessionEnd::Fatal(4004)));
    }

    #[tokio::test]
    async fn test_ready_records_session() {
        let (gateway, _, _) = gateway();
        let flag = gateway.connected_flag();
        let mut session = SessionState::default();

        let ready = json!({
            "user": {"id": "99", "bot": true},
            "session_id": "abc",
            "resume_gateway_url": "wss://resume.example"
        });
        gateway.handle_dispatch("READY", ready, &mut session).await;

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(session.session_id.as_deref(), Some("abc"));
        assert!(session.can_resume());
    }

    #[tokio::test]
    async fn test_guild_create_requests_missing_members() {
        let (gateway, cache, _) = gateway();
        let mut session = SessionState::default();

        let reply = gateway.handle_dispatch("GUILD_CREATE", guild_json(5), &mut session).await;
        let reply = reply.expect("member request");
        assert_eq!(reply.op, op::REQUEST_GUILD_MEMBERS);
        assert_eq!(reply.d["guild_id"], "1");
        assert!(cache.has_guild(GuildId::new(1)));

        let reply = gateway.handle_dispatch("GUILD_CREATE", guild_json(1), &mut session).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_message_create_forwarded() {
        let (gateway, _, mut rx) = gateway();
        let mut session = SessionState::default();

        let message = json!({
            "id": "500",
            "channel_id": "10",
            "guild_id": "1",
            "author": {"id": "7", "username": "someone"},
            "content": "!meet standup"
        });
        gateway.handle_dispatch("MESSAGE_CREATE", message, &mut session).await;

        let IngressEvent::Message(inbound) = rx.recv().await.unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(inbound.guild_id, Some(GuildId::new(1)));
        assert_eq!(inbound.channel_id, ChannelId::new(10));
        assert_eq!(inbound.author_id, UserId::new(7));
        assert!(!inbound.author_is_bot);
        assert_eq!(inbound.content, "!meet standup");
    }

    #[tokio::test]
    async fn test_channel_delete_updates_cache_and_forwards() {
        let (gateway, cache, mut rx) = gateway();
        let mut session = SessionState::default();
        gateway.handle_dispatch("GUILD_CREATE", guild_json(1), &mut session).await;
        assert!(cache.channel(ChannelId::new(10)).is_some());

        let deleted = json!({"id": "10", "type": 0, "guild_id": "1"});
        gateway.handle_dispatch("CHANNEL_DELETE", deleted, &mut session).await;

        assert!(cache.channel(ChannelId::new(10)).is_none());
        assert_eq!(rx.recv().await, Some(IngressEvent::ChannelDeleted(ChannelId::new(10))));
    }

    #[tokio::test]
    async fn test_bad_dispatch_is_ignored() {
        let (gateway, _, _) = gateway();
        let mut session = SessionState::default();

        let reply = gateway
            .handle_dispatch("GUILD_CREATE", json!({"nonsense": true}), &mut session)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_wait_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_millis(1), &mut rx).await);

        tx.send(true).unwrap();
        assert!(wait_or_shutdown(Duration::from_secs(60), &mut rx).await);
    }
}
