//! In-memory asset backend
//!
//! A frame-stepped stand-in for a real asset pipeline. Assets, prefabs and
//! scenes are registered up front; every request resolves after a fixed
//! number of [`AssetBackend::pump`] calls. Faults and failures can be
//! scripted per key, which is what the registry tests lean on.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::backend::{
    AssetBackend, AssetRequest, BackendError, InstantiateParams, LoadSceneMode, Operation,
    SceneLoadParams,
};
use super::handle::{ErasedAsset, InstanceHandle, InstanceId, SceneHandle};

type AssetFactory = Arc<dyn Fn() -> ErasedAsset + Send + Sync>;

/// What the backend knows about an asset key
#[derive(Clone)]
enum AssetSource {
    /// Produces a fresh value of a known type per load
    Value {
        type_name: &'static str,
        type_id: std::any::TypeId,
        factory: AssetFactory,
    },
    /// Loads "successfully" but yields nothing
    Empty,
}

/// Deferred resolution of one operation
struct Job {
    /// Pumps left before the job runs
    remaining: u32,
    /// Resolves the operation
    resolve: Box<dyn FnOnce() + Send>,
}

/// Backend state of a loaded scene
#[derive(Debug, Clone)]
struct LoadedScene {
    key: String,
    active: bool,
}

/// Frame-stepped, in-process [`AssetBackend`].
pub struct InMemoryBackend {
    /// Pumps before a request resolves
    latency: u32,
    /// Loadable assets
    assets: FxHashMap<String, AssetSource>,
    /// Instantiable prefabs
    prefabs: FxHashSet<String>,
    /// Loadable scenes
    scenes: FxHashSet<String>,
    /// Keys whose requests are refused when issued
    faults: FxHashMap<String, String>,
    /// Keys whose operations end in `Failed`
    failures: FxHashMap<String, String>,
    /// Scene keys whose unload fails
    unload_failures: FxHashSet<String>,
    /// Operations waiting to resolve
    jobs: Vec<Job>,
    /// Scenes currently loaded, by scene id
    loaded_scenes: FxHashMap<u64, LoadedScene>,
    /// Objects currently alive
    live_instances: FxHashMap<InstanceId, String>,
    /// Keys of every released asset, in order
    released_assets: Vec<String>,
    /// Issued requests per key
    request_counts: FxHashMap<String, usize>,
}

impl InMemoryBackend {
    /// Create a backend whose requests resolve on the first pump
    #[must_use]
    pub fn new() -> Self {
        Self::with_latency(1)
    }

    /// Create a backend whose requests resolve after `latency` pumps.
    /// Zero resolves requests as soon as they are issued.
    #[must_use]
    pub fn with_latency(latency: u32) -> Self {
        Self {
            latency,
            assets: FxHashMap::default(),
            prefabs: FxHashSet::default(),
            scenes: FxHashSet::default(),
            faults: FxHashMap::default(),
            failures: FxHashMap::default(),
            unload_failures: FxHashSet::default(),
            jobs: Vec::new(),
            loaded_scenes: FxHashMap::default(),
            live_instances: FxHashMap::default(),
            released_assets: Vec::new(),
            request_counts: FxHashMap::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Make `value` loadable under `key`. Each load yields a fresh copy.
    pub fn register_asset<T: Clone + Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        let factory: AssetFactory = Arc::new(move || ErasedAsset::new(value.clone()));
        self.assets.insert(
            key.into(),
            AssetSource::Value {
                type_name: std::any::type_name::<T>(),
                type_id: std::any::TypeId::of::<T>(),
                factory,
            },
        );
    }

    /// Make `key` load successfully without a payload
    pub fn register_empty_asset(&mut self, key: impl Into<String>) {
        self.assets.insert(key.into(), AssetSource::Empty);
    }

    /// Make `key` instantiable
    pub fn register_prefab(&mut self, key: impl Into<String>) {
        self.prefabs.insert(key.into());
    }

    /// Make `key` loadable as a scene
    pub fn register_scene(&mut self, key: impl Into<String>) {
        self.scenes.insert(key.into());
    }

    /// Refuse every request for `key` at issue time
    pub fn inject_fault(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.faults.insert(key.into(), message.into());
    }

    /// Resolve every operation for `key` as failed
    pub fn inject_failure(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.failures.insert(key.into(), reason.into());
    }

    /// Fail unloads of the scene loaded from `key`
    pub fn fail_unload(&mut self, key: impl Into<String>) {
        self.unload_failures.insert(key.into());
    }

    /// Remove every scripted fault and failure
    pub fn clear_injections(&mut self) {
        self.faults.clear();
        self.failures.clear();
        self.unload_failures.clear();
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Number of requests issued for `key`
    #[must_use]
    pub fn request_count(&self, key: &str) -> usize {
        self.request_counts.get(key).copied().unwrap_or(0)
    }

    /// Keys of released assets, in release order
    #[must_use]
    pub fn released_assets(&self) -> &[String] {
        &self.released_assets
    }

    /// Number of live spawned objects
    #[must_use]
    pub fn live_instance_count(&self) -> usize {
        self.live_instances.len()
    }

    /// Whether an instance is still alive
    #[must_use]
    pub fn is_instance_alive(&self, id: InstanceId) -> bool {
        self.live_instances.contains_key(&id)
    }

    /// Whether any scene loaded from `key` is still loaded
    #[must_use]
    pub fn is_scene_loaded(&self, key: &str) -> bool {
        self.loaded_scenes.values().any(|scene| scene.key == key)
    }

    /// Whether a scene loaded from `key` is active
    #[must_use]
    pub fn is_scene_active(&self, key: &str) -> bool {
        self.loaded_scenes
            .values()
            .any(|scene| scene.key == key && scene.active)
    }

    /// Number of operations that have not resolved yet
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Count the request and apply scripted faults and failures.
    ///
    /// Returns the failure reason if the operation is scripted to fail.
    fn admit(&mut self, key: &str) -> Result<Option<String>, BackendError> {
        *self.request_counts.entry(key.to_string()).or_default() += 1;

        if let Some(message) = self.faults.get(key) {
            return Err(BackendError::new(message.clone()));
        }
        Ok(self.failures.get(key).cloned())
    }

    /// Schedule `op` to resolve with `outcome` after the configured latency
    fn schedule<T: Send + 'static>(&mut self, op: &Operation<T>, outcome: Result<Option<T>, String>) {
        let target = op.clone();
        let resolve: Box<dyn FnOnce() + Send> = Box::new(move || {
            match outcome {
                Ok(payload) => target.succeed(payload),
                Err(reason) => target.fail(reason),
            };
        });

        if self.latency == 0 {
            resolve();
        } else {
            self.jobs.push(Job {
                remaining: self.latency,
                resolve,
            });
        }
    }

    /// Start an operation that resolves with `outcome`
    fn start<T: Send + 'static>(&mut self, outcome: Result<Option<T>, String>) -> Operation<T> {
        let op = Operation::new();
        self.schedule(&op, outcome);
        op
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetBackend for InMemoryBackend {
    fn load_asset(&mut self, request: &AssetRequest) -> Result<Operation<ErasedAsset>, BackendError> {
        if let Some(reason) = self.admit(&request.key)? {
            return Ok(self.start(Err(reason)));
        }

        let outcome = match self.assets.get(&request.key) {
            None => Err(format!("unknown asset key `{}`", request.key)),
            Some(AssetSource::Empty) => Ok(None),
            Some(AssetSource::Value {
                type_id, type_name, ..
            }) if *type_id != request.type_id => Err(format!(
                "`{}` is a `{type_name}`, not a `{}`",
                request.key, request.type_name
            )),
            Some(AssetSource::Value { factory, .. }) => Ok(Some(factory())),
        };
        Ok(self.start(outcome))
    }

    fn load_scene(
        &mut self,
        key: &str,
        params: &SceneLoadParams,
    ) -> Result<Operation<SceneHandle>, BackendError> {
        if let Some(reason) = self.admit(key)? {
            return Ok(self.start(Err(reason)));
        }
        if !self.scenes.contains(key) {
            return Ok(self.start(Err(format!("unknown scene key `{key}`"))));
        }

        if params.mode == LoadSceneMode::Single {
            self.loaded_scenes.clear();
        }
        let scene = SceneHandle::new(key);
        self.loaded_scenes.insert(
            scene.id(),
            LoadedScene {
                key: key.to_string(),
                active: params.activate_on_load,
            },
        );
        Ok(self.start(Ok(Some(scene))))
    }

    fn activate_scene(
        &mut self,
        scene: &SceneHandle,
        _priority: i32,
    ) -> Result<Operation<SceneHandle>, BackendError> {
        let Some(loaded) = self.loaded_scenes.get_mut(&scene.id()) else {
            return Ok(self.start(Err(format!("scene `{}` is not loaded", scene.key()))));
        };
        loaded.active = true;
        Ok(self.start(Ok(Some(scene.clone()))))
    }

    fn unload_scene(
        &mut self,
        scene: &SceneHandle,
        _auto_release_handle: bool,
    ) -> Result<Operation<SceneHandle>, BackendError> {
        if let Some(reason) = self.admit(scene.key())? {
            return Ok(self.start(Err(reason)));
        }
        if self.unload_failures.contains(scene.key()) {
            return Ok(self.start(Err(format!("scene `{}` refused to unload", scene.key()))));
        }
        if self.loaded_scenes.remove(&scene.id()).is_none() {
            return Ok(self.start(Err(format!("scene `{}` is not loaded", scene.key()))));
        }
        Ok(self.start(Ok(Some(scene.clone()))))
    }

    fn instantiate(
        &mut self,
        key: &str,
        params: &InstantiateParams,
    ) -> Result<Operation<InstanceHandle>, BackendError> {
        if let Some(reason) = self.admit(key)? {
            return Ok(self.start(Err(reason)));
        }
        if !self.prefabs.contains(key) {
            return Ok(self.start(Err(format!("unknown prefab key `{key}`"))));
        }
        if let Some(parent) = params.parent
            && !self.live_instances.contains_key(&parent)
        {
            return Ok(self.start(Err(format!("parent {} is not alive", parent.raw()))));
        }

        let instance = InstanceHandle::new(key);
        self.live_instances.insert(instance.id(), key.to_string());
        Ok(self.start(Ok(Some(instance))))
    }

    fn release_asset(&mut self, key: &str, _asset: &ErasedAsset) {
        self.released_assets.push(key.to_string());
    }

    fn release_instance(&mut self, instance: &InstanceHandle) {
        if self.live_instances.remove(&instance.id()).is_none() {
            log::warn!("Released instance {} twice", instance.id().raw());
        }
    }

    fn pump(&mut self) -> bool {
        for job in &mut self.jobs {
            job.remaining = job.remaining.saturating_sub(1);
        }

        // Resolve in issue order
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.remaining == 0);
        self.jobs = waiting;

        for job in ready {
            (job.resolve)();
        }
        !self.jobs.is_empty()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("latency", &self.latency)
            .field("assets", &self.assets.len())
            .field("prefabs", &self.prefabs.len())
            .field("scenes", &self.scenes.len())
            .field("pending_jobs", &self.jobs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::backend::OperationStatus;

    #[derive(Debug, Clone, PartialEq)]
    struct Texture(u32);

    #[test]
    fn test_asset_resolves_after_latency() {
        let mut backend = InMemoryBackend::with_latency(2);
        backend.register_asset("tex", Texture(1));

        let op = backend.load_asset(&AssetRequest::of::<Texture>("tex")).unwrap();
        assert!(!op.is_done());
        assert!(backend.pump());
        assert!(!op.is_done());
        assert!(!backend.pump());
        assert_eq!(op.status(), OperationStatus::Succeeded);
        assert!(op.payload().unwrap().is::<Texture>());
    }

    #[test]
    fn test_zero_latency_resolves_immediately() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_empty_asset("void");
        let op = backend.load_asset(&AssetRequest::of::<Texture>("void")).unwrap();
        assert_eq!(op.status(), OperationStatus::Succeeded);
        assert!(op.payload().is_none());
    }

    #[test]
    fn test_wrong_type_and_unknown_key_fail() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_asset("tex", Texture(1));

        let wrong = backend.load_asset(&AssetRequest::of::<String>("tex")).unwrap();
        assert_eq!(wrong.status(), OperationStatus::Failed);

        let unknown = backend.load_asset(&AssetRequest::of::<Texture>("nope")).unwrap();
        assert_eq!(unknown.status(), OperationStatus::Failed);
    }

    #[test]
    fn test_injected_fault_and_failure() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_asset("tex", Texture(1));
        backend.inject_fault("tex", "malformed key");

        let err = backend.load_asset(&AssetRequest::of::<Texture>("tex")).unwrap_err();
        assert_eq!(err.message(), "malformed key");

        backend.clear_injections();
        backend.inject_failure("tex", "bundle missing");
        let op = backend.load_asset(&AssetRequest::of::<Texture>("tex")).unwrap();
        assert_eq!(op.failure_reason().as_deref(), Some("bundle missing"));
        assert_eq!(backend.request_count("tex"), 2);
    }

    #[test]
    fn test_scene_lifecycle() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_scene("Game");

        let params = SceneLoadParams::default().with_activate_on_load(false);
        let scene = backend.load_scene("Game", &params).unwrap().payload().unwrap();
        assert!(backend.is_scene_loaded("Game"));
        assert!(!backend.is_scene_active("Game"));

        backend.activate_scene(&scene, 100).unwrap();
        assert!(backend.is_scene_active("Game"));

        let op = backend.unload_scene(&scene, true).unwrap();
        assert_eq!(op.status(), OperationStatus::Succeeded);
        assert!(!backend.is_scene_loaded("Game"));
    }

    #[test]
    fn test_single_mode_replaces_scenes() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_scene("Home");
        backend.register_scene("Game");

        let additive = SceneLoadParams::default().with_mode(LoadSceneMode::Additive);
        backend.load_scene("Home", &additive).unwrap();
        backend.load_scene("Game", &additive).unwrap();
        assert!(backend.is_scene_loaded("Home"));

        backend.load_scene("Game", &SceneLoadParams::default()).unwrap();
        assert!(!backend.is_scene_loaded("Home"));
        assert!(backend.is_scene_loaded("Game"));
    }

    #[test]
    fn test_instances() {
        let mut backend = InMemoryBackend::with_latency(0);
        backend.register_prefab("ring");

        let ring = backend
            .instantiate("ring", &InstantiateParams::default())
            .unwrap()
            .payload()
            .unwrap();
        assert!(backend.is_instance_alive(ring.id()));

        let child_params = InstantiateParams {
            parent: Some(ring.id()),
            in_world_space: true,
        };
        let child = backend.instantiate("ring", &child_params).unwrap();
        assert_eq!(child.status(), OperationStatus::Succeeded);
        assert_eq!(backend.live_instance_count(), 2);

        backend.release_instance(&ring);
        assert!(!backend.is_instance_alive(ring.id()));

        let orphan = backend.instantiate("ring", &child_params).unwrap();
        assert_eq!(orphan.status(), OperationStatus::Failed);
    }
}
