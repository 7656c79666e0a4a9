//! Cache tables
//!
//! Four independent tables back the registry:
//! - [`AssetTable`]: key → type-erased asset, one entry per key
//! - [`SceneTable`]: key → loaded scene, one entry per key
//! - [`InstanceTable`]: key → spawned objects, many per key
//! - [`KeySet`]: keys marked by the game, unrelated to the other tables
//!
//! The tables only do bookkeeping. Telling the backend to release what was
//! removed is the registry's job.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::error::AssetError;
use super::handle::{AssetHandle, ErasedAsset, InstanceHandle, SceneHandle};

// ============================================================================
// Asset Table
// ============================================================================

/// Result of a non-overwriting insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was free and now holds the new asset
    Inserted,
    /// The key already held an asset of the same type, which is kept
    AlreadyPresent(ErasedAsset),
}

/// Type-erased asset cache.
#[derive(Debug, Default)]
pub struct AssetTable {
    /// Assets indexed by key
    entries: FxHashMap<String, ErasedAsset>,
}

impl AssetTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup.
    ///
    /// # Errors
    ///
    /// [`AssetError::NotFound`] if the key is absent,
    /// [`AssetError::TypeMismatch`] if it holds something other than a `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<AssetHandle<T>, AssetError> {
        let entry = self.entries.get(key).ok_or_else(|| AssetError::NotFound {
            key: key.to_string(),
        })?;

        entry.downcast::<T>().ok_or_else(|| AssetError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
            found: entry.type_name(),
        })
    }

    /// Untyped lookup
    #[must_use]
    pub fn get_erased(&self, key: &str) -> Option<&ErasedAsset> {
        self.entries.get(key)
    }

    /// Insert without ever overwriting.
    ///
    /// # Errors
    ///
    /// [`AssetError::Collision`] if the key holds an asset of another type.
    pub fn put(&mut self, key: &str, asset: ErasedAsset) -> Result<PutOutcome, AssetError> {
        match self.entries.get(key) {
            Some(existing) if existing.type_id() == asset.type_id() => {
                Ok(PutOutcome::AlreadyPresent(existing.clone()))
            }
            Some(existing) => Err(AssetError::Collision {
                key: key.to_string(),
                existing: existing.type_name(),
                incoming: asset.type_name(),
            }),
            None => {
                self.entries.insert(key.to_string(), asset);
                Ok(PutOutcome::Inserted)
            }
        }
    }

    /// Remove an entry, returning it so the caller can release it
    pub fn remove(&mut self, key: &str) -> Option<ErasedAsset> {
        self.entries.remove(key)
    }

    /// Check if a key is cached
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of cached assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, returning them for release
    pub fn drain(&mut self) -> impl Iterator<Item = (String, ErasedAsset)> + '_ {
        self.entries.drain()
    }

    /// Forget every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Scene Table
// ============================================================================

/// Loaded scenes by key.
#[derive(Debug, Default)]
pub struct SceneTable {
    scenes: FxHashMap<String, SceneHandle>,
}

impl SceneTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the scene loaded under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SceneHandle> {
        self.scenes.get(key)
    }

    /// Track a scene. An already tracked scene under the same key wins and
    /// is returned.
    pub fn insert(&mut self, key: &str, scene: SceneHandle) -> Result<(), SceneHandle> {
        match self.scenes.get(key) {
            Some(existing) => Err(existing.clone()),
            None => {
                self.scenes.insert(key.to_string(), scene);
                Ok(())
            }
        }
    }

    /// Stop tracking a scene
    pub fn remove(&mut self, key: &str) -> Option<SceneHandle> {
        self.scenes.remove(key)
    }

    /// Check if a scene is tracked
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.scenes.contains_key(key)
    }

    /// Get the number of tracked scenes
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Remove every scene
    pub fn drain(&mut self) -> impl Iterator<Item = (String, SceneHandle)> + '_ {
        self.scenes.drain()
    }

    /// Forget every scene
    pub fn clear(&mut self) {
        self.scenes.clear();
    }
}

// ============================================================================
// Instance Table
// ============================================================================

/// Per-key list of spawned objects. Most prefabs only have a handful alive.
pub type InstanceList = SmallVec<[InstanceHandle; 4]>;

/// Spawned objects grouped by prefab key.
#[derive(Debug, Default)]
pub struct InstanceTable {
    lists: FxHashMap<String, InstanceList>,
}

impl InstanceTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instance, creating the list on first use
    pub fn push(&mut self, key: &str, instance: InstanceHandle) {
        self.lists.entry(key.to_string()).or_default().push(instance);
    }

    /// Instances spawned under `key`, empty if none
    #[must_use]
    pub fn get(&self, key: &str) -> &[InstanceHandle] {
        match self.lists.get(key) {
            Some(list) => list.as_slice(),
            None => &[],
        }
    }

    /// Remove exactly one instance by identity.
    ///
    /// The list is dropped once it becomes empty.
    ///
    /// # Errors
    ///
    /// [`AssetError::UntrackedRelease`] if the key or the instance is unknown.
    pub fn remove_one(
        &mut self,
        key: &str,
        instance: &InstanceHandle,
    ) -> Result<InstanceHandle, AssetError> {
        let untracked = || AssetError::UntrackedRelease {
            key: key.to_string(),
        };

        let list = self.lists.get_mut(key).ok_or_else(untracked)?;
        let index = list
            .iter()
            .position(|tracked| tracked.id() == instance.id())
            .ok_or_else(untracked)?;

        let removed = list.remove(index);
        if list.is_empty() {
            self.lists.remove(key);
        }
        Ok(removed)
    }

    /// Remove and return every instance under `key`
    pub fn remove_all(&mut self, key: &str) -> InstanceList {
        self.lists.remove(key).unwrap_or_default()
    }

    /// Check if any instance is tracked under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lists.contains_key(key)
    }

    /// Number of keys with live instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Remove every list, returning the instances for release
    pub fn drain(&mut self) -> impl Iterator<Item = InstanceHandle> + '_ {
        self.lists.drain().flat_map(|(_, list)| list)
    }

    /// Forget every instance
    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

// ============================================================================
// Key Set
// ============================================================================

/// Keys marked by the game, independent of what is loaded.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: FxHashSet<String>,
}

impl KeySet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key. Returns `false` if it was already marked.
    pub fn insert(&mut self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    /// Unmark a key. Returns `false` if it was not marked.
    pub fn remove(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    /// Check if a key is marked
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Get the number of marked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Unmark every key
    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Texture;

    #[derive(Debug)]
    struct AudioClip;

    #[test]
    fn test_get_distinguishes_missing_and_wrong_type() {
        let mut table = AssetTable::new();
        table.put("tex", ErasedAsset::new(Texture)).unwrap();

        assert!(table.get::<Texture>("tex").is_ok());
        assert!(matches!(
            table.get::<Texture>("missing"),
            Err(AssetError::NotFound { .. })
        ));
        assert!(matches!(
            table.get::<AudioClip>("tex"),
            Err(AssetError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_put_never_overwrites() {
        let mut table = AssetTable::new();
        let first = ErasedAsset::new(Texture);
        assert_eq!(table.put("tex", first.clone()), Ok(PutOutcome::Inserted));

        let again = table.put("tex", ErasedAsset::new(Texture)).unwrap();
        assert_eq!(again, PutOutcome::AlreadyPresent(first.clone()));

        let clash = table.put("tex", ErasedAsset::new(AudioClip));
        assert!(matches!(clash, Err(AssetError::Collision { .. })));
        assert_eq!(table.get_erased("tex"), Some(&first));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let mut table = AssetTable::new();
        assert!(table.remove("tex").is_none());
        table.put("tex", ErasedAsset::new(Texture)).unwrap();
        assert!(table.remove("tex").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_scene_table_keeps_first() {
        let mut scenes = SceneTable::new();
        let first = SceneHandle::new("Game");
        assert!(scenes.insert("Game", first.clone()).is_ok());
        assert_eq!(scenes.insert("Game", SceneHandle::new("Game")), Err(first));
        assert_eq!(scenes.len(), 1);
    }

    #[test]
    fn test_instance_remove_one_by_identity() {
        let mut instances = InstanceTable::new();
        let a = InstanceHandle::new("ring");
        let b = InstanceHandle::new("ring");
        instances.push("ring", a.clone());
        instances.push("ring", b.clone());

        assert_eq!(instances.remove_one("ring", &a), Ok(a.clone()));
        assert_eq!(instances.get("ring"), &[b.clone()]);
        assert!(matches!(
            instances.remove_one("ring", &a),
            Err(AssetError::UntrackedRelease { .. })
        ));

        instances.remove_one("ring", &b).unwrap();
        assert!(!instances.contains("ring"));
        assert!(instances.get("ring").is_empty());
    }

    #[test]
    fn test_instance_remove_all() {
        let mut instances = InstanceTable::new();
        instances.push("ring", InstanceHandle::new("ring"));
        instances.push("ring", InstanceHandle::new("ring"));

        assert_eq!(instances.remove_all("ring").len(), 2);
        assert!(instances.is_empty());
        assert!(instances.remove_all("ring").is_empty());
    }

    #[test]
    fn test_key_set() {
        let mut keys = KeySet::new();
        assert!(keys.insert("ring"));
        assert!(!keys.insert("ring"));
        assert!(keys.contains("ring"));
        assert!(keys.remove("ring"));
        assert!(!keys.contains("ring"));
    }
}
