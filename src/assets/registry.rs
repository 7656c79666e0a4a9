//! Asset registry
//!
//! The registry is the game's single entry point for loading assets,
//! scenes and prefab instances. It deduplicates loads through its cache
//! tables, tracks ownership so everything can be released again, and
//! reconciles backend results through the completion router.
//!
//! # Call forms
//!
//! Every loading operation comes in two forms:
//!
//! - **Async** (`*_async`): issues the backend request and returns at once.
//!   Continuations run from [`AssetRegistry::update`], which the host calls
//!   once per frame, or immediately when the answer is already cached.
//! - **Sync**: issues the same request and blocks until the backend
//!   finishes, pumping it from the calling thread.
//!
//! # In-flight requests
//!
//! A second request for an asset or scene key that is still loading does not
//! reach the backend. It attaches to the first request and receives the
//! same outcome, type-checked against what it asked for.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = AssetRegistry::new(backend, RegistryConfig::default());
//!
//! registry.load_asset_async::<Texture, _, _>(
//!     "ring_texture",
//!     |key, texture| log::info!("{key}: {}x{}", texture.width, texture.height),
//!     |key, err| log::warn!("{key}: {err}"),
//! )?;
//!
//! // Each frame
//! registry.update();
//! ```

use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::core::RegistryConfig;

use super::backend::{
    self, AssetBackend, AssetRequest, BackendError, InstantiateParams, Operation, SceneLoadParams,
};
use super::error::{AssetError, ExceptionPolicy};
use super::handle::{AssetHandle, ErasedAsset, InstanceHandle, SceneHandle};
use super::key::validate_key;
use super::router;
use super::storage::{AssetTable, InstanceTable, KeySet, SceneTable};

// ============================================================================
// Continuations
// ============================================================================

type SceneWaiter = Box<dyn FnOnce(&str, Result<SceneHandle, AssetError>)>;
type InstanceWaiter = Box<dyn FnOnce(&str, Result<InstanceHandle, AssetError>)>;
type UnloadWaiter = Box<dyn FnOnce(&str, Result<(), AssetError>)>;

/// A caller waiting on an asset load, with the type it asked for.
struct AssetWaiter {
    type_id: TypeId,
    type_name: &'static str,
    deliver: Box<dyn FnOnce(&str, Result<ErasedAsset, AssetError>)>,
}

impl AssetWaiter {
    fn new<T, S, F>(on_succeeded: S, on_failed: F) -> Self
    where
        T: Send + Sync + 'static,
        S: FnOnce(&str, AssetHandle<T>) + 'static,
        F: FnOnce(&str, AssetError) + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            deliver: Box::new(move |key: &str, result: Result<ErasedAsset, AssetError>| {
                match result {
                    Ok(asset) => match asset.downcast::<T>() {
                        Some(handle) => on_succeeded(key, handle),
                        None => on_failed(
                            key,
                            AssetError::TypeMismatch {
                                key: key.to_string(),
                                expected: std::any::type_name::<T>(),
                                found: asset.type_name(),
                            },
                        ),
                    },
                    Err(err) => on_failed(key, err),
                }
            }),
        }
    }
}

fn scene_waiter<S, F>(on_succeeded: S, on_failed: F) -> SceneWaiter
where
    S: FnOnce(&str, SceneHandle) + 'static,
    F: FnOnce(&str, AssetError) + 'static,
{
    Box::new(
        move |key: &str, result: Result<SceneHandle, AssetError>| match result {
            Ok(scene) => on_succeeded(key, scene),
            Err(err) => on_failed(key, err),
        },
    )
}

/// Single-slot mailbox the sync call forms use to read back the outcome a
/// continuation delivered.
type Slot<T> = Rc<RefCell<Option<Result<T, AssetError>>>>;

fn slot<T>() -> Slot<T> {
    Rc::new(RefCell::new(None))
}

fn fill<T>(slot: &Slot<T>, result: Result<T, AssetError>) {
    *slot.borrow_mut() = Some(result);
}

// ============================================================================
// In-Flight Bookkeeping
// ============================================================================

struct InFlightAsset {
    /// Issue order, shared by every attached waiter
    seq: u64,
    op: Operation<ErasedAsset>,
    /// Type of the request that reached the backend
    requested: &'static str,
    waiters: Vec<AssetWaiter>,
}

struct InFlightScene {
    seq: u64,
    op: Operation<SceneHandle>,
    waiters: Vec<SceneWaiter>,
}

/// Operations that are never coalesced
enum PendingOp {
    Instantiate {
        key: String,
        op: Operation<InstanceHandle>,
        done: InstanceWaiter,
    },
    Activate {
        key: String,
        scene: SceneHandle,
        op: Operation<SceneHandle>,
        done: SceneWaiter,
    },
    Unload {
        key: String,
        op: Operation<SceneHandle>,
        done: UnloadWaiter,
    },
}

impl PendingOp {
    fn is_done(&self) -> bool {
        match self {
            Self::Instantiate { op, .. } => op.is_done(),
            Self::Activate { op, .. } | Self::Unload { op, .. } => op.is_done(),
        }
    }
}

/// A finished operation waiting to be routed
enum Ready {
    Asset(String),
    Scene(String),
    Pending(PendingOp),
}

/// Outcome of handing a request to the backend
enum Issued<T> {
    Started(Operation<T>),
    /// The backend refused the request and the policy swallowed the fault
    Faulted(AssetError),
}

// ============================================================================
// Registry
// ============================================================================

/// Cache and lifecycle manager in front of an [`AssetBackend`].
///
/// The registry is meant to live on the thread that runs the frame loop.
/// Continuations are invoked on that thread and never re-enter the registry.
pub struct AssetRegistry<B: AssetBackend> {
    /// The loading service
    backend: B,
    /// Live logging and fault policy
    config: RegistryConfig,
    /// Loaded assets
    assets: AssetTable,
    /// Loaded scenes
    scenes: SceneTable,
    /// Spawned objects
    instances: InstanceTable,
    /// Keys marked by the game
    keys: KeySet,
    /// Asset loads waiting on the backend
    loading_assets: FxHashMap<String, InFlightAsset>,
    /// Scene loads waiting on the backend
    loading_scenes: FxHashMap<String, InFlightScene>,
    /// Activations, unloads and instantiations waiting on the backend,
    /// tagged with their issue order
    pending: Vec<(u64, PendingOp)>,
    /// Issue order of the next backend request
    next_seq: u64,
}

impl<B: AssetBackend> AssetRegistry<B> {
    /// Create an empty registry in front of `backend`
    pub fn new(backend: B, config: RegistryConfig) -> Self {
        Self {
            backend,
            config,
            assets: AssetTable::new(),
            scenes: SceneTable::new(),
            instances: InstanceTable::new(),
            keys: KeySet::new(),
            loading_assets: FxHashMap::default(),
            loading_scenes: FxHashMap::default(),
            pending: Vec::new(),
            next_seq: 0,
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Change configuration; takes effect on the next call
    pub fn config_mut(&mut self) -> &mut RegistryConfig {
        &mut self.config
    }

    /// Set the exception policy
    pub fn set_exception_policy(&mut self, policy: ExceptionPolicy) {
        self.config.exception_policy = policy;
    }

    /// The backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ------------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------------

    /// Validate a key on a sync or query path. `Ok(None)` means the invalid
    /// key was logged or suppressed by the policy.
    fn check_key<'k>(&self, key: &'k str) -> Result<Option<&'k str>, AssetError> {
        match validate_key(Some(key)) {
            Ok(key) => Ok(Some(key)),
            Err(err) => {
                self.config.exception_policy.raise(err)?;
                Ok(None)
            }
        }
    }

    fn issue<T>(
        &self,
        key: &str,
        request: Result<Operation<T>, BackendError>,
    ) -> Result<Issued<T>, AssetError> {
        match request {
            Ok(op) => Ok(Issued::Started(op)),
            Err(source) => {
                let err = AssetError::BackendFault {
                    key: key.to_string(),
                    source,
                };
                self.config.exception_policy.raise(err.clone())?;
                Ok(Issued::Faulted(err))
            }
        }
    }

    fn wait<T>(&mut self, op: &Operation<T>) {
        let status = backend::wait_for_completion(&mut self.backend, op);
        log::trace!("Blocking wait finished with {status:?}");
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn push_pending(&mut self, op: PendingOp) {
        let seq = self.next_seq();
        self.pending.push((seq, op));
    }

    /// Advance the backend and route every operation that finished.
    ///
    /// Call once per frame. Continuations run in the order their requests
    /// were issued. Returns the number of operations routed.
    pub fn update(&mut self) -> usize {
        self.backend.pump();

        let mut ready: Vec<(u64, Ready)> = self
            .loading_assets
            .iter()
            .filter(|(_, load)| load.op.is_done())
            .map(|(key, load)| (load.seq, Ready::Asset(key.clone())))
            .collect();
        ready.extend(
            self.loading_scenes
                .iter()
                .filter(|(_, load)| load.op.is_done())
                .map(|(key, load)| (load.seq, Ready::Scene(key.clone()))),
        );

        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, op)| op.is_done());
        self.pending = waiting;
        ready.extend(done.into_iter().map(|(seq, op)| (seq, Ready::Pending(op))));

        ready.sort_by_key(|(seq, _)| *seq);
        let routed = ready.len();
        for (_, item) in ready {
            match item {
                Ready::Asset(key) => self.finish_asset_load(&key),
                Ready::Scene(key) => self.finish_scene_load(&key),
                Ready::Pending(op) => self.finish_pending(op),
            }
        }

        routed
    }

    /// Number of backend operations still waiting to be routed
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.loading_assets.len() + self.loading_scenes.len() + self.pending.len()
    }

    /// Whether nothing is waiting on the backend
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_operations() == 0
    }

    fn finish_pending(&mut self, pending: PendingOp) {
        match pending {
            PendingOp::Instantiate { key, op, done } => {
                let result = router::route_instantiate(&mut self.instances, &self.config, &key, &op);
                done(&key, result);
            }
            PendingOp::Activate {
                key,
                scene,
                op,
                done,
            } => {
                let result = router::route_scene_transition(&key, &op).map(|_| scene);
                done(&key, result);
            }
            PendingOp::Unload { key, op, done } => {
                let result = router::route_scene_transition(&key, &op).map(|_| ());
                done(&key, result);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------------

    /// Start loading an asset of type `T`.
    ///
    /// A cached `T` is delivered immediately. A cached value of another type
    /// is a warning and a failure.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::BackendFault`] if the backend refuses the request
    /// under [`ExceptionPolicy::Throw`]. Otherwise faults go to `on_failed`.
    pub fn load_asset_async<T, S, F>(&mut self, key: &str, on_succeeded: S, on_failed: F) -> Result<(), AssetError>
    where
        T: Send + Sync + 'static,
        S: FnOnce(&str, AssetHandle<T>) + 'static,
        F: FnOnce(&str, AssetError) + 'static,
    {
        let key = match validate_key(Some(key)) {
            Ok(key) => key,
            Err(err) => {
                on_failed(key, err);
                return Ok(());
            }
        };

        match self.assets.get::<T>(key) {
            Ok(handle) => {
                on_succeeded(key, handle);
                return Ok(());
            }
            Err(err @ AssetError::TypeMismatch { .. }) => {
                router::warn(&self.config, &err);
                on_failed(key, err);
                return Ok(());
            }
            Err(_) => {}
        }

        let waiter = AssetWaiter::new::<T, S, F>(on_succeeded, on_failed);
        self.begin_asset_load(key, &AssetRequest::of::<T>(key), waiter)
            .map(|_| ())
    }

    /// Load an asset of type `T`, blocking until the backend answers.
    ///
    /// Returns `Ok(None)` when the asset cannot be produced; the reason has
    /// been logged according to the configuration.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] or [`AssetError::BackendFault`] under
    /// [`ExceptionPolicy::Throw`].
    pub fn load_asset<T: Send + Sync + 'static>(
        &mut self,
        key: &str,
    ) -> Result<Option<AssetHandle<T>>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        match self.assets.get::<T>(key) {
            Ok(handle) => return Ok(Some(handle)),
            Err(err @ AssetError::TypeMismatch { .. }) => {
                router::warn(&self.config, &err);
                return Ok(None);
            }
            Err(_) => {}
        }

        let outcome = slot::<AssetHandle<T>>();
        let (on_ok, on_err) = (Rc::clone(&outcome), Rc::clone(&outcome));
        let waiter = AssetWaiter::new::<T, _, _>(
            move |_: &str, handle: AssetHandle<T>| fill(&on_ok, Ok(handle)),
            move |_: &str, err: AssetError| fill(&on_err, Err(err)),
        );

        if let Some(op) = self.begin_asset_load(key, &AssetRequest::of::<T>(key), waiter)? {
            self.wait(&op);
            self.finish_asset_load(key);
        }

        let result = outcome.take();
        Ok(Self::settle(key, result))
    }

    fn begin_asset_load(
        &mut self,
        key: &str,
        request: &AssetRequest,
        waiter: AssetWaiter,
    ) -> Result<Option<Operation<ErasedAsset>>, AssetError> {
        if let Some(load) = self.loading_assets.get_mut(key) {
            log::debug!("Attaching to in-flight load of `{key}`");
            load.waiters.push(waiter);
            return Ok(Some(load.op.clone()));
        }

        let request_result = self.backend.load_asset(request);
        match self.issue(key, request_result)? {
            Issued::Started(op) => {
                let seq = self.next_seq();
                self.loading_assets.insert(
                    key.to_string(),
                    InFlightAsset {
                        seq,
                        op: op.clone(),
                        requested: request.type_name,
                        waiters: vec![waiter],
                    },
                );
                Ok(Some(op))
            }
            Issued::Faulted(err) => {
                (waiter.deliver)(key, Err(err));
                Ok(None)
            }
        }
    }

    fn finish_asset_load(&mut self, key: &str) {
        let Some(load) = self.loading_assets.remove(key) else {
            return;
        };

        let routed = router::route_asset_load(
            &mut self.assets,
            &self.config,
            key,
            load.requested,
            &load.op,
        );
        if let Some(discarded) = &routed.discarded {
            self.backend.release_asset(key, discarded);
        }

        for waiter in load.waiters {
            let result = match &routed.result {
                Ok(asset) if asset.type_id() != waiter.type_id => {
                    let err = AssetError::Collision {
                        key: key.to_string(),
                        existing: asset.type_name(),
                        incoming: waiter.type_name,
                    };
                    router::error(&self.config, &err);
                    Err(err)
                }
                other => other.clone(),
            };
            (waiter.deliver)(key, result);
        }
    }

    fn settle<T>(key: &str, result: Option<Result<T, AssetError>>) -> Option<T> {
        match result {
            Some(Ok(value)) => Some(value),
            Some(Err(err)) => {
                log::debug!("Request for `{key}` failed: {err}");
                None
            }
            None => None,
        }
    }

    /// Get a cached asset.
    ///
    /// Missing keys and type mismatches are logged as warnings and yield
    /// `None`. Use [`AssetRegistry::lookup_asset`] to tell them apart.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn get_asset<T: Send + Sync + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<AssetHandle<T>>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        match self.assets.get::<T>(key) {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                router::warn(&self.config, &err);
                Ok(None)
            }
        }
    }

    /// Look up a cached asset without logging.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`], [`AssetError::NotFound`] or
    /// [`AssetError::TypeMismatch`].
    pub fn lookup_asset<T: Send + Sync + 'static>(&self, key: &str) -> Result<AssetHandle<T>, AssetError> {
        let key = validate_key(Some(key))?;
        self.assets.get::<T>(key)
    }

    /// Check if an asset is cached under `key`
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn contains_asset(&self, key: &str) -> Result<bool, AssetError> {
        Ok(self
            .check_key(key)?
            .is_some_and(|key| self.assets.contains(key)))
    }

    /// Drop a cached asset and let the backend reclaim it. No-op if absent.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn release_asset(&mut self, key: &str) -> Result<(), AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(());
        };

        if let Some(asset) = self.assets.remove(key) {
            log::debug!("Releasing asset `{key}`");
            self.backend.release_asset(key, &asset);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Scenes
    // ------------------------------------------------------------------------

    /// Start loading a scene.
    ///
    /// A scene already tracked under `key` is reused: it is activated first
    /// when `params.activate_on_load` is set, otherwise delivered at once.
    ///
    /// # Errors
    ///
    /// [`AssetError::BackendFault`] under [`ExceptionPolicy::Throw`].
    pub fn load_scene_async<S, F>(
        &mut self,
        key: &str,
        params: SceneLoadParams,
        on_succeeded: S,
        on_failed: F,
    ) -> Result<(), AssetError>
    where
        S: FnOnce(&str, SceneHandle) + 'static,
        F: FnOnce(&str, AssetError) + 'static,
    {
        let key = match validate_key(Some(key)) {
            Ok(key) => key,
            Err(err) => {
                on_failed(key, err);
                return Ok(());
            }
        };

        if let Some(scene) = self.scenes.get(key).cloned() {
            if !params.activate_on_load {
                on_succeeded(key, scene);
                return Ok(());
            }

            let request = self.backend.activate_scene(&scene, params.priority);
            match self.issue(key, request)? {
                Issued::Started(op) => self.push_pending(PendingOp::Activate {
                    key: key.to_string(),
                    scene,
                    op,
                    done: scene_waiter(on_succeeded, on_failed),
                }),
                Issued::Faulted(err) => on_failed(key, err),
            }
            return Ok(());
        }

        self.begin_scene_load(key, &params, scene_waiter(on_succeeded, on_failed))
            .map(|_| ())
    }

    /// Load a scene, blocking until the backend answers.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] or [`AssetError::BackendFault`] under
    /// [`ExceptionPolicy::Throw`].
    pub fn load_scene(&mut self, key: &str, params: SceneLoadParams) -> Result<Option<SceneHandle>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        if let Some(scene) = self.scenes.get(key).cloned() {
            if !params.activate_on_load {
                return Ok(Some(scene));
            }

            let request = self.backend.activate_scene(&scene, params.priority);
            let Issued::Started(op) = self.issue(key, request)? else {
                return Ok(None);
            };
            self.wait(&op);
            return match router::route_scene_transition(key, &op) {
                Ok(_) => Ok(Some(scene)),
                Err(err) => {
                    router::warn(&self.config, &err);
                    Ok(None)
                }
            };
        }

        let outcome = slot::<SceneHandle>();
        let (on_ok, on_err) = (Rc::clone(&outcome), Rc::clone(&outcome));
        let waiter = scene_waiter(
            move |_: &str, scene: SceneHandle| fill(&on_ok, Ok(scene)),
            move |_: &str, err: AssetError| fill(&on_err, Err(err)),
        );

        if let Some(op) = self.begin_scene_load(key, &params, waiter)? {
            self.wait(&op);
            self.finish_scene_load(key);
        }

        let result = outcome.take();
        Ok(Self::settle(key, result))
    }

    fn begin_scene_load(
        &mut self,
        key: &str,
        params: &SceneLoadParams,
        waiter: SceneWaiter,
    ) -> Result<Option<Operation<SceneHandle>>, AssetError> {
        if let Some(load) = self.loading_scenes.get_mut(key) {
            log::debug!("Attaching to in-flight load of scene `{key}`");
            load.waiters.push(waiter);
            return Ok(Some(load.op.clone()));
        }

        let request = self.backend.load_scene(key, params);
        match self.issue(key, request)? {
            Issued::Started(op) => {
                let seq = self.next_seq();
                self.loading_scenes.insert(
                    key.to_string(),
                    InFlightScene {
                        seq,
                        op: op.clone(),
                        waiters: vec![waiter],
                    },
                );
                Ok(Some(op))
            }
            Issued::Faulted(err) => {
                waiter(key, Err(err));
                Ok(None)
            }
        }
    }

    fn finish_scene_load(&mut self, key: &str) {
        let Some(load) = self.loading_scenes.remove(key) else {
            return;
        };

        let routed = router::route_scene_load(&mut self.scenes, &self.config, key, &load.op);
        if let Some(discarded) = &routed.discarded
            && let Err(err) = self.backend.unload_scene(discarded, true)
        {
            log::warn!("Could not unload duplicate scene `{key}`: {err}");
        }

        for waiter in load.waiters {
            waiter(key, routed.result.clone());
        }
    }

    /// Stop tracking a scene and start unloading it.
    ///
    /// The scene leaves the table before the backend answers, so a failed
    /// unload leaves a scene that is still loaded in the backend but no
    /// longer tracked here. Reconciling that is up to `on_failed`.
    ///
    /// # Errors
    ///
    /// [`AssetError::BackendFault`] under [`ExceptionPolicy::Throw`].
    pub fn unload_scene_async<S, F>(
        &mut self,
        key: &str,
        auto_release_handle: bool,
        on_succeeded: S,
        on_failed: F,
    ) -> Result<(), AssetError>
    where
        S: FnOnce(&str) + 'static,
        F: FnOnce(&str, AssetError) + 'static,
    {
        let key = match validate_key(Some(key)) {
            Ok(key) => key,
            Err(err) => {
                on_failed(key, err);
                return Ok(());
            }
        };

        let Some(scene) = self.scenes.remove(key) else {
            on_failed(
                key,
                AssetError::NotFound {
                    key: key.to_string(),
                },
            );
            return Ok(());
        };

        let request = self.backend.unload_scene(&scene, auto_release_handle);
        match self.issue(key, request)? {
            Issued::Started(op) => self.push_pending(PendingOp::Unload {
                key: key.to_string(),
                op,
                done: Box::new(move |key: &str, result: Result<(), AssetError>| match result {
                    Ok(()) => on_succeeded(key),
                    Err(err) => on_failed(key, err),
                }),
            }),
            Issued::Faulted(err) => on_failed(key, err),
        }
        Ok(())
    }

    /// Stop tracking a scene and unload it, blocking until the backend
    /// answers. Returns the unloaded scene, or `None` if nothing was
    /// tracked or the unload failed.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] or [`AssetError::BackendFault`] under
    /// [`ExceptionPolicy::Throw`].
    pub fn unload_scene(&mut self, key: &str, auto_release_handle: bool) -> Result<Option<SceneHandle>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        let Some(scene) = self.scenes.remove(key) else {
            router::warn(
                &self.config,
                &AssetError::NotFound {
                    key: key.to_string(),
                },
            );
            return Ok(None);
        };

        let request = self.backend.unload_scene(&scene, auto_release_handle);
        let Issued::Started(op) = self.issue(key, request)? else {
            return Ok(None);
        };
        self.wait(&op);

        match router::route_scene_transition(key, &op) {
            Ok(_) => Ok(Some(scene)),
            Err(err) => {
                router::warn(&self.config, &err);
                Ok(None)
            }
        }
    }

    /// Get the scene tracked under `key`, warning if there is none.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn try_get_scene(&self, key: &str) -> Result<Option<SceneHandle>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        match self.scenes.get(key) {
            Some(scene) => Ok(Some(scene.clone())),
            None => {
                router::warn(
                    &self.config,
                    &AssetError::NotFound {
                        key: key.to_string(),
                    },
                );
                Ok(None)
            }
        }
    }

    /// Check if a scene is tracked under `key`
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn contains_scene(&self, key: &str) -> Result<bool, AssetError> {
        Ok(self
            .check_key(key)?
            .is_some_and(|key| self.scenes.contains(key)))
    }

    // ------------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------------

    /// Start spawning an object from a prefab key. Every call spawns a new
    /// object; requests are never coalesced.
    ///
    /// # Errors
    ///
    /// [`AssetError::BackendFault`] under [`ExceptionPolicy::Throw`].
    pub fn instantiate_async<S, F>(
        &mut self,
        key: &str,
        params: InstantiateParams,
        on_succeeded: S,
        on_failed: F,
    ) -> Result<(), AssetError>
    where
        S: FnOnce(&str, InstanceHandle) + 'static,
        F: FnOnce(&str, AssetError) + 'static,
    {
        let key = match validate_key(Some(key)) {
            Ok(key) => key,
            Err(err) => {
                on_failed(key, err);
                return Ok(());
            }
        };

        let request = self.backend.instantiate(key, &params);
        match self.issue(key, request)? {
            Issued::Started(op) => self.push_pending(PendingOp::Instantiate {
                key: key.to_string(),
                op,
                done: Box::new(
                    move |key: &str, result: Result<InstanceHandle, AssetError>| match result {
                        Ok(instance) => on_succeeded(key, instance),
                        Err(err) => on_failed(key, err),
                    },
                ),
            }),
            Issued::Faulted(err) => on_failed(key, err),
        }
        Ok(())
    }

    /// Spawn an object from a prefab key, blocking until the backend answers.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] or [`AssetError::BackendFault`] under
    /// [`ExceptionPolicy::Throw`].
    pub fn instantiate(
        &mut self,
        key: &str,
        params: InstantiateParams,
    ) -> Result<Option<InstanceHandle>, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(None);
        };

        let request = self.backend.instantiate(key, &params);
        let Issued::Started(op) = self.issue(key, request)? else {
            return Ok(None);
        };
        self.wait(&op);

        let result = router::route_instantiate(&mut self.instances, &self.config, key, &op);
        Ok(Self::settle(key, Some(result)))
    }

    /// Objects spawned from `key` that are still tracked
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn get_instances(&self, key: &str) -> Result<&[InstanceHandle], AssetError> {
        match self.check_key(key)? {
            Some(key) => Ok(self.instances.get(key)),
            None => Ok(&[]),
        }
    }

    /// Release every object spawned from `key`. Returns how many were
    /// released.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn release_instances(&mut self, key: &str) -> Result<usize, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(0);
        };

        let released = self.instances.remove_all(key);
        for instance in &released {
            self.backend.release_instance(instance);
        }
        Ok(released.len())
    }

    /// Release one spawned object. Untracked keys or objects are a warning.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn release_instance(&mut self, key: &str, instance: &InstanceHandle) -> Result<(), AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(());
        };

        match self.instances.remove_one(key, instance) {
            Ok(removed) => self.backend.release_instance(&removed),
            Err(err) => router::warn(&self.config, &err),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Key set
    // ------------------------------------------------------------------------

    /// Mark a key. Returns `false` if it was already marked.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn register_key(&mut self, key: &str) -> Result<bool, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(false);
        };
        Ok(self.keys.insert(key))
    }

    /// Unmark a key. Returns `false` if it was not marked.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn unregister_key(&mut self, key: &str) -> Result<bool, AssetError> {
        let Some(key) = self.check_key(key)? else {
            return Ok(false);
        };
        Ok(self.keys.remove(key))
    }

    /// Check if a key is marked
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidKey`] under [`ExceptionPolicy::Throw`].
    pub fn contains_key(&self, key: &str) -> Result<bool, AssetError> {
        Ok(self
            .check_key(key)?
            .is_some_and(|key| self.keys.contains(key)))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Forget everything without telling the backend.
    ///
    /// Continuations of operations still in flight are dropped unrun.
    pub fn clear(&mut self) {
        log::debug!(
            "Clearing registry: {} asset(s), {} scene(s), {} instance key(s)",
            self.assets.len(),
            self.scenes.len(),
            self.instances.len()
        );
        self.keys.clear();
        self.assets.clear();
        self.scenes.clear();
        self.instances.clear();
        self.loading_assets.clear();
        self.loading_scenes.clear();
        self.pending.clear();
    }

    /// Release every asset and instance, start unloading every tracked
    /// scene, then clear.
    ///
    /// Unloads are not awaited and their outcome is not reported.
    pub fn shutdown(&mut self) {
        let assets: Vec<_> = self.assets.drain().collect();
        for (key, asset) in &assets {
            self.backend.release_asset(key, asset);
        }

        let instances: Vec<_> = self.instances.drain().collect();
        for instance in &instances {
            self.backend.release_instance(instance);
        }

        let scenes: Vec<_> = self.scenes.drain().collect();
        for (key, scene) in &scenes {
            if let Err(err) = self.backend.unload_scene(scene, true) {
                log::warn!("Could not unload scene `{key}` on shutdown: {err}");
            }
        }

        log::info!(
            "Registry shut down, released {} asset(s) and {} instance(s), unloaded {} scene(s)",
            assets.len(),
            instances.len(),
            scenes.len()
        );
        self.clear();
    }
}

impl<B: AssetBackend> std::fmt::Debug for AssetRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("assets", &self.assets.len())
            .field("scenes", &self.scenes.len())
            .field("instance_keys", &self.instances.len())
            .field("keys", &self.keys.len())
            .field("pending", &self.pending_operations())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
