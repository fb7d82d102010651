//! Background services.

pub mod bot;

pub use bot::BotService;
