//! The bot itself: gateway session, event ingress and expiry sweep.

use anyhow::{anyhow, Context, Result};
use pv_core::discord::{DiscordPlatform, Gateway, GuildCache, RestClient};
use pv_core::ingress::{CommandParser, EventIngress};
use pv_core::task::supervise;
use pv_core::voice::{SweepHandle, SweepScheduler};
use pv_core::{LifecycleManager, VoiceRegistry};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Bound on events waiting for dispatch
const INGRESS_QUEUE: usize = 256;

/// Running bot tasks
pub struct BotService {
    gateway: Option<JoinHandle<pv_core::Result<()>>>,
    ingress: JoinHandle<()>,
    sweep: SweepHandle,
    connected: Arc<AtomicBool>,
}

impl BotService {
    /// Wire the Discord platform into the lifecycle manager and start the
    /// gateway, ingress and sweep tasks. The gateway stops when `shutdown`
    /// flips to true.
    pub fn start(
        config: &crate::config::Config,
        registry: Arc<VoiceRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let rest = RestClient::new(config.token.clone()).context("Failed to build REST client")?;
        let cache = Arc::new(GuildCache::new());
        let platform = Arc::new(DiscordPlatform::new(rest.clone(), cache.clone()));

        let manager = Arc::new(LifecycleManager::new(platform, registry, config.lifecycle()));

        let (events_tx, events_rx) = mpsc::channel(INGRESS_QUEUE);
        let ingress = Arc::new(EventIngress::new(
            manager.clone(),
            CommandParser::new(config.command_prefix.clone()),
        ));
        let ingress = tokio::spawn(ingress.run(events_rx));

        let sweep = SweepScheduler::new(manager, config.sweep_interval()).spawn();

        let gateway = Gateway::new(config.token.clone(), rest, cache, events_tx);
        let connected = gateway.connected_flag();
        // A panicking session is restarted; only a fatal close ends the task
        let gateway = tokio::spawn(async move {
            let stop = shutdown.clone();
            supervise("gateway", move || gateway.clone().run(shutdown.clone()), stop)
                .await
                .unwrap_or(Ok(()))
        });

        info!(
            prefix = %config.command_prefix,
            ttl_secs = config.channel_ttl_secs,
            "Bot started"
        );

        Ok(Self {
            gateway: Some(gateway),
            ingress,
            sweep,
            connected,
        })
    }

    /// Flag that is true while the gateway session is established
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Resolves when the gateway gives up for good, which only a fatal close
    /// code or shutdown causes. Pending forever once it has been observed.
    pub async fn gateway_exit(&mut self) -> Result<()> {
        let Some(handle) = self.gateway.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.gateway = None;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e).context("Gateway stopped")),
            Err(e) => Err(anyhow!("Gateway task failed: {}", e)),
        }
    }

    /// Stop the sweep and wait for the gateway and ingress to wind down.
    /// The gateway must already have been told to shut down.
    pub async fn stop(self) {
        self.sweep.shutdown().await;

        if let Some(gateway) = self.gateway {
            match gateway.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Gateway ended with error"),
                Err(e) => error!(error = %e, "Gateway task failed"),
            }
        }

        // The ingress loop ends once the gateway drops its sender
        if let Err(e) = self.ingress.await {
            error!(error = %e, "Ingress task failed");
        }
        info!("Bot stopped");
    }
}
