//! Event ingress: turns platform events into lifecycle operations.
//!
//! Two kinds of events matter: chat messages that may carry a `meet`
//! command, and notifications that a channel was deleted. Each event is
//! handled in its own task so a slow platform call never blocks the gateway
//! reader, and a panic while handling one event never takes down another.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::id::{ChannelId, GuildId, UserId};
use crate::task::spawn_guarded;
use crate::voice::{CreateVoiceRequest, LifecycleManager};

/// Commands the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `meet [title...]`: create a private voice room for this channel.
    Meet { title: String },
}

/// Recognizes `<prefix><command> [args...]` messages.
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: String,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Parse a message body. `None` for anything that is not one of our commands.
    pub fn parse(&self, content: &str) -> Option<Command> {
        let body = content.strip_prefix(self.prefix.as_str())?;

        let mut words = body.split(' ');
        let command = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        match command.as_str() {
            "meet" => Some(Command::Meet {
                title: args.join(" ").trim().to_string(),
            }),
            _ => None,
        }
    }
}

/// A chat message as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// `None` for direct messages.
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
}

/// Events the core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressEvent {
    Message(InboundMessage),
    ChannelDeleted(ChannelId),
}

/// What handling an event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Not for us.
    Ignored,
    Created(ChannelId),
    /// The command was refused or failed; the issuer has been told.
    Rejected,
    Removed(ChannelId),
    /// Delete of a channel we do not track.
    Untracked,
}

/// Dispatches platform events into the lifecycle manager.
pub struct EventIngress {
    manager: Arc<LifecycleManager>,
    parser: CommandParser,
}

impl EventIngress {
    pub fn new(manager: Arc<LifecycleManager>, parser: CommandParser) -> Self {
        Self { manager, parser }
    }

    /// Handle one event to completion.
    pub async fn handle(&self, event: IngressEvent) -> IngressOutcome {
        match event {
            IngressEvent::Message(message) => self.handle_message(message).await,
            IngressEvent::ChannelDeleted(channel_id) => {
                match self.manager.handle_channel_delete(channel_id).await {
                    Some(_) => IngressOutcome::Removed(channel_id),
                    None => IngressOutcome::Untracked,
                }
            }
        }
    }

    async fn handle_message(&self, message: InboundMessage) -> IngressOutcome {
        if message.author_is_bot || message.content.is_empty() {
            return IngressOutcome::Ignored;
        }
        let Some(guild_id) = message.guild_id else {
            return IngressOutcome::Ignored;
        };
        let Some(command) = self.parser.parse(&message.content) else {
            return IngressOutcome::Ignored;
        };

        match command {
            Command::Meet { title } => {
                info!(
                    channel_id = %message.channel_id,
                    author_id = %message.author_id,
                    "meet command"
                );
                let request = CreateVoiceRequest {
                    guild_id,
                    parent_channel_id: message.channel_id,
                    owner_id: message.author_id,
                    title,
                };
                match self.manager.create_voice(&request).await {
                    Ok(created) => IngressOutcome::Created(created.voice.channel_id),
                    Err(_) => IngressOutcome::Rejected,
                }
            }
        }
    }

    /// Handle an event in its own guarded task.
    pub fn dispatch(self: &Arc<Self>, event: IngressEvent) -> JoinHandle<()> {
        let ingress = Arc::clone(self);
        spawn_guarded("ingress", async move {
            let outcome = ingress.handle(event).await;
            debug!(?outcome, "Event handled");
        })
    }

    /// Consume events until the sender side closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<IngressEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        debug!("Event stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VoiceRegistry;
    use crate::testing::{MockPlatform, GUILD, OWNER, TEXT};
    use crate::voice::LifecycleConfig;

    fn parser() -> CommandParser {
        CommandParser::new("!")
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            guild_id: Some(GUILD),
            channel_id: TEXT,
            author_id: OWNER,
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    fn ingress() -> (Arc<MockPlatform>, Arc<EventIngress>) {
        let platform = Arc::new(MockPlatform::new());
        let manager = Arc::new(LifecycleManager::new(
            platform.clone(),
            Arc::new(VoiceRegistry::new()),
            LifecycleConfig::default(),
        ));
        (platform, Arc::new(EventIngress::new(manager, parser())))
    }

    fn meet(title: &str) -> Option<Command> {
        Some(Command::Meet {
            title: title.to_string(),
        })
    }

    #[test]
    fn test_parse_meet_with_title() {
        assert_eq!(parser().parse("!meet sprint planning"), meet("sprint planning"));
    }

    #[test]
    fn test_parse_meet_without_title() {
        assert_eq!(parser().parse("!meet"), meet(""));
        assert_eq!(parser().parse("!meet "), meet(""));
    }

    #[test]
    fn test_parse_is_case_insensitive_on_command_only() {
        assert_eq!(parser().parse("!MEET Team Sync"), meet("Team Sync"));
    }

    #[test]
    fn test_parse_ignores_other_input() {
        assert_eq!(parser().parse("meet"), None);
        assert_eq!(parser().parse("?meet"), None);
        assert_eq!(parser().parse("!meeting"), None);
        assert_eq!(parser().parse("!help"), None);
        assert_eq!(parser().parse("!"), None);
    }

    #[test]
    fn test_parse_multichar_prefix() {
        let parser = CommandParser::new("pv!");
        assert!(parser.parse("pv!meet x").is_some());
        assert!(parser.parse("!meet x").is_none());
    }

    #[tokio::test]
    async fn test_meet_message_creates_room() {
        let (platform, ingress) = ingress();

        let outcome = ingress.handle(IngressEvent::Message(message("!meet retro"))).await;

        let IngressOutcome::Created(channel_id) = outcome else {
            panic!("expected creation, got {:?}", outcome);
        };
        assert_eq!(platform.state().created[0].2, channel_id);
        assert_eq!(platform.state().created[0].1, "PV: retro");
    }

    #[tokio::test]
    async fn test_bot_and_dm_and_empty_messages_ignored() {
        let (platform, ingress) = ingress();

        let mut from_bot = message("!meet x");
        from_bot.author_is_bot = true;
        let mut dm = message("!meet x");
        dm.guild_id = None;

        for msg in [from_bot, dm, message(""), message("hello")] {
            assert_eq!(ingress.handle(IngressEvent::Message(msg)).await, IngressOutcome::Ignored);
        }
        assert!(platform.state().created.is_empty());
        assert!(platform.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_meet_rejected() {
        let (_platform, ingress) = ingress();
        ingress.handle(IngressEvent::Message(message("!meet a"))).await;

        let outcome = ingress.handle(IngressEvent::Message(message("!meet b"))).await;

        assert_eq!(outcome, IngressOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_channel_delete_events() {
        let (_platform, ingress) = ingress();
        let IngressOutcome::Created(channel_id) =
            ingress.handle(IngressEvent::Message(message("!meet a"))).await
        else {
            panic!("expected creation");
        };

        assert_eq!(
            ingress.handle(IngressEvent::ChannelDeleted(channel_id)).await,
            IngressOutcome::Removed(channel_id)
        );
        assert_eq!(
            ingress.handle(IngressEvent::ChannelDeleted(channel_id)).await,
            IngressOutcome::Untracked
        );
    }

    #[tokio::test]
    async fn test_run_dispatches_until_closed() {
        let (platform, ingress) = ingress();
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(Arc::clone(&ingress).run(rx));

        tx.send(IngressEvent::Message(message("!meet a"))).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        // Dispatched tasks finish shortly after the runner returns
        for _ in 0..100 {
            if !platform.state().created.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(platform.state().created.len(), 1);
    }
}
