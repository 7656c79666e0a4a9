//! Core runtime services
//!
//! Contains configuration and the message bus

mod config;
mod events;

pub use config::{AppConfig, ConfigError, EventBusConfig, RegistryConfig};
pub use events::{ListenerId, MessageBus};
