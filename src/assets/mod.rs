//! Asset registry and its backend seam
//!
//! Provides cached, key-addressed resource management with:
//! - Type-safe asset handles over type-erased storage
//! - Scene and prefab instance tracking
//! - Async (per-frame) and blocking call forms
//! - An in-memory backend for demos and tests

mod backend;
mod error;
mod handle;
mod key;
mod memory;
mod registry;
mod router;
mod storage;

pub use backend::{
    AssetBackend, AssetRequest, BackendError, Completion, InstantiateParams, LoadSceneMode,
    Operation, OperationStatus, SceneLoadParams, wait_for_completion,
};
pub use error::{AssetError, ExceptionPolicy};
pub use handle::{AssetHandle, ErasedAsset, InstanceHandle, InstanceId, SceneHandle};
pub use key::validate_key;
pub use memory::InMemoryBackend;
pub use registry::AssetRegistry;
pub use storage::{AssetTable, InstanceList, InstanceTable, KeySet, PutOutcome, SceneTable};
