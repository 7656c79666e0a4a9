//! Asset registry for a ring-toss game
//!
//! This crate provides:
//! - A key-addressed cache of loaded assets, scenes and spawned prefabs
//! - Async and blocking loads over a pluggable asset backend
//! - A type-keyed message bus for decoupled game systems
//! - RON/JSON configuration

pub mod assets;
pub mod core;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::assets::{
        AssetBackend, AssetError, AssetHandle, AssetRegistry, ExceptionPolicy, InMemoryBackend,
        InstanceHandle, InstantiateParams, LoadSceneMode, SceneHandle, SceneLoadParams,
    };
    pub use crate::core::{AppConfig, EventBusConfig, MessageBus, RegistryConfig};
}
