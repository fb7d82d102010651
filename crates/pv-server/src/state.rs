//! Application state.

use pv_core::VoiceRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Rooms this process owns
    pub registry: Arc<VoiceRegistry>,
    /// True while the gateway session is established
    pub gateway_connected: Arc<AtomicBool>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<VoiceRegistry>,
        gateway_connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            registry,
            gateway_connected,
            start_time: Instant::now(),
        }
    }

    pub fn is_gateway_connected(&self) -> bool {
        self.gateway_connected.load(Ordering::SeqCst)
    }
}
