//! Asset, scene and instance handles
//!
//! Handles compare by identity: every handle carries a process-unique id,
//! so two structurally identical values are still distinct handles.

use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique handle IDs
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique handle ID
fn next_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Typed Asset Handle
// ============================================================================

/// A strong, typed handle to a cached asset of type `T`.
#[derive(Debug)]
pub struct AssetHandle<T> {
    /// Unique identifier shared with the cache entry
    id: u64,
    /// Reference-counted pointer to the asset
    inner: Arc<T>,
}

impl<T> AssetHandle<T> {
    /// Get the unique ID of this asset
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Get a reference to the underlying asset
    #[must_use]
    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Whether both handles point at the very same allocation
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get the strong reference count
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for AssetHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AssetHandle<T> {}

impl<T> Hash for AssetHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> std::ops::Deref for AssetHandle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// ============================================================================
// Type-Erased Asset
// ============================================================================

/// A type-erased asset tagged with its runtime type.
///
/// This is what the backend produces and what the asset table stores.
/// Retrieval goes through [`ErasedAsset::downcast`], which checks the tag.
#[derive(Clone)]
pub struct ErasedAsset {
    /// Unique identifier for this asset
    id: u64,
    /// Runtime type tag
    type_id: TypeId,
    /// Human readable type name, for diagnostics
    type_name: &'static str,
    /// The asset data
    value: Arc<dyn Any + Send + Sync>,
}

impl ErasedAsset {
    /// Wrap a freshly loaded value
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            id: next_id(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Get the unique ID of this asset
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Runtime type of the stored value
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the stored value's type
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the stored value is a `T`
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Recover a typed handle, or `None` if the value is not a `T`
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<AssetHandle<T>> {
        Arc::clone(&self.value)
            .downcast::<T>()
            .ok()
            .map(|inner| AssetHandle { id: self.id, inner })
    }
}

impl std::fmt::Debug for ErasedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedAsset")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl PartialEq for ErasedAsset {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ErasedAsset {}

// ============================================================================
// Scene Handle
// ============================================================================

/// Handle to a scene loaded by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    /// Unique identifier for this scene instance
    id: u64,
    /// Key the scene was loaded from
    key: String,
}

impl SceneHandle {
    /// Create a handle for a scene freshly loaded under `key`
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            key: key.into(),
        }
    }

    /// Get the unique ID of this scene instance
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Key the scene was loaded from
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

// ============================================================================
// Instance Handle
// ============================================================================

/// Identity of a spawned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Get the raw id value
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to an object instantiated from a prefab key.
///
/// Equality is by [`InstanceId`] only.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    /// Unique identity of the spawned object
    id: InstanceId,
    /// Prefab key the object was spawned from
    key: String,
}

impl InstanceHandle {
    /// Create a handle for a new object spawned from `key`
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            id: InstanceId(next_id()),
            key: key.into(),
        }
    }

    /// Identity of the spawned object
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Prefab key the object was spawned from
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for InstanceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InstanceHandle {}

impl Hash for InstanceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Texture {
        width: u32,
    }

    #[test]
    fn test_downcast_matching_type() {
        let erased = ErasedAsset::new(Texture { width: 64 });
        let handle = erased.downcast::<Texture>().unwrap();
        assert_eq!(handle.width, 64);
        assert_eq!(handle.id(), erased.id());
        assert!(erased.is::<Texture>());
    }

    #[test]
    fn test_downcast_wrong_type() {
        let erased = ErasedAsset::new(42_u32);
        assert!(erased.downcast::<String>().is_none());
        assert!(!erased.is::<String>());
    }

    #[test]
    fn test_handles_share_allocation() {
        let erased = ErasedAsset::new("ring".to_string());
        let a = erased.downcast::<String>().unwrap();
        let b = erased.downcast::<String>().unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_eq!(a.strong_count(), 3);
    }

    #[test]
    fn test_instances_compare_by_identity() {
        let a = InstanceHandle::new("ring");
        let b = InstanceHandle::new("ring");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.key(), "ring");
    }
}
