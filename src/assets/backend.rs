//! Backend seam and asynchronous operation handles
//!
//! The registry never loads anything itself. It issues requests to an
//! [`AssetBackend`] and observes the returned [`Operation`]s until they reach
//! a terminal state.
//!
//! # Operation lifecycle
//!
//! ```text
//! InProgress ──succeed(Some(payload))──▶ Succeeded (payload)
//!            ──succeed(None)───────────▶ Succeeded (no payload)
//!            ──fail(reason)────────────▶ Failed
//! ```
//!
//! An operation is resolved at most once. The backend keeps a clone of the
//! handle and resolves it, possibly from another thread; the registry holds
//! the other clone and is woken through the registered [`Waker`].

use std::any::TypeId;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use serde::{Deserialize, Serialize};

use super::handle::{ErasedAsset, InstanceHandle, InstanceId, SceneHandle};

// ============================================================================
// Operation
// ============================================================================

/// State of a backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running
    InProgress,
    /// Finished; the payload may still be empty
    Succeeded,
    /// Finished with an error
    Failed,
}

impl OperationStatus {
    /// Whether the operation reached a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Debug)]
struct OperationState<T> {
    status: OperationStatus,
    payload: Option<T>,
    reason: Option<String>,
    waker: Option<Waker>,
}

/// A shared handle to an asynchronous backend operation.
///
/// Cloning yields another handle to the same operation.
#[derive(Debug)]
pub struct Operation<T> {
    shared: Arc<Mutex<OperationState<T>>>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Operation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Operation<T> {
    /// Create an operation that is still in progress
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(OperationState {
                status: OperationStatus::InProgress,
                payload: None,
                reason: None,
                waker: None,
            })),
        }
    }

    /// Create an operation that already succeeded
    #[must_use]
    pub fn succeeded(payload: Option<T>) -> Self {
        let op = Self::new();
        op.succeed(payload);
        op
    }

    /// Create an operation that already failed
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        let op = Self::new();
        op.fail(reason);
        op
    }

    // A panicking completer cannot leave the state half-written, so a
    // poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, OperationState<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve as succeeded. `None` models a success without a payload.
    ///
    /// Returns `false` if the operation was already resolved.
    pub fn succeed(&self, payload: Option<T>) -> bool {
        self.resolve(OperationStatus::Succeeded, payload, None)
    }

    /// Resolve as failed.
    ///
    /// Returns `false` if the operation was already resolved.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.resolve(OperationStatus::Failed, None, Some(reason.into()))
    }

    fn resolve(&self, status: OperationStatus, payload: Option<T>, reason: Option<String>) -> bool {
        let waker = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                log::warn!("Ignoring second resolution of a finished operation");
                return false;
            }
            state.status = status;
            state.payload = payload;
            state.reason = reason;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.lock().status
    }

    /// Whether the operation reached a terminal state
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Failure reason, if the operation failed
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Register the waker to notify on resolution.
    ///
    /// Returns `true` if the operation is already done, in which case the
    /// waker is not stored.
    pub fn register_waker(&self, waker: &Waker) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return true;
        }
        match &state.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => state.waker = Some(waker.clone()),
        }
        false
    }
}

impl<T: Clone> Operation<T> {
    /// Clone of the payload, if any
    #[must_use]
    pub fn payload(&self) -> Option<T> {
        self.lock().payload.clone()
    }
}

// ============================================================================
// Blocking Wait
// ============================================================================

/// Future that completes once `op` is done, pumping `backend` on every poll.
///
/// While the backend reports pending work the future wakes itself so the
/// executor keeps pumping. Once the backend is idle it parks until the
/// operation's waker fires, which covers backends that finish work on
/// another thread.
pub struct Completion<'a, B: ?Sized, T> {
    backend: &'a mut B,
    op: &'a Operation<T>,
}

impl<'a, B: AssetBackend + ?Sized, T> Completion<'a, B, T> {
    /// Wait for `op`, driving `backend`
    pub fn new(backend: &'a mut B, op: &'a Operation<T>) -> Self {
        Self { backend, op }
    }
}

impl<B: AssetBackend + ?Sized, T> Future for Completion<'_, B, T> {
    type Output = OperationStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.op.is_done() {
            return Poll::Ready(this.op.status());
        }

        let busy = this.backend.pump();

        if this.op.register_waker(cx.waker()) {
            return Poll::Ready(this.op.status());
        }
        if busy {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

/// Block the calling thread until `op` is done.
pub fn wait_for_completion<B: AssetBackend + ?Sized, T>(
    backend: &mut B,
    op: &Operation<T>,
) -> OperationStatus {
    pollster::block_on(Completion::new(backend, op))
}

// ============================================================================
// Requests
// ============================================================================

/// Request to load one asset, tagged with the type the caller expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    /// Asset key
    pub key: String,
    /// Expected runtime type
    pub type_id: TypeId,
    /// Expected type name, for diagnostics
    pub type_name: &'static str,
}

impl AssetRequest {
    /// Request `key` as a `T`
    #[must_use]
    pub fn of<T: 'static>(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// How a loaded scene joins the running ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadSceneMode {
    /// Replace every loaded scene
    #[default]
    Single,
    /// Load alongside the loaded scenes
    Additive,
}

/// Parameters for a scene load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneLoadParams {
    /// Single or additive load
    pub mode: LoadSceneMode,
    /// Activate the scene as soon as it is loaded
    pub activate_on_load: bool,
    /// Backend scheduling priority
    pub priority: i32,
}

impl Default for SceneLoadParams {
    fn default() -> Self {
        Self {
            mode: LoadSceneMode::Single,
            activate_on_load: true,
            priority: 100,
        }
    }
}

impl SceneLoadParams {
    /// Set the load mode
    #[must_use]
    pub fn with_mode(mut self, mode: LoadSceneMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable activation on load
    #[must_use]
    pub fn with_activate_on_load(mut self, activate: bool) -> Self {
        self.activate_on_load = activate;
        self
    }

    /// Set the scheduling priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Parameters for spawning an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstantiateParams {
    /// Object to parent the new instance under
    pub parent: Option<InstanceId>,
    /// Keep the world-space pose when parenting
    pub in_world_space: bool,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Synchronous fault raised while issuing a backend request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    /// Create a backend error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The asynchronous loading service the registry sits in front of.
///
/// Request methods return an [`Operation`] that the backend resolves later,
/// or a [`BackendError`] if the request cannot even be issued.
pub trait AssetBackend {
    /// Start loading an asset
    fn load_asset(&mut self, request: &AssetRequest) -> Result<Operation<ErasedAsset>, BackendError>;

    /// Start loading a scene
    fn load_scene(
        &mut self,
        key: &str,
        params: &SceneLoadParams,
    ) -> Result<Operation<SceneHandle>, BackendError>;

    /// Activate an already loaded scene
    fn activate_scene(
        &mut self,
        scene: &SceneHandle,
        priority: i32,
    ) -> Result<Operation<SceneHandle>, BackendError>;

    /// Start unloading a scene
    fn unload_scene(
        &mut self,
        scene: &SceneHandle,
        auto_release_handle: bool,
    ) -> Result<Operation<SceneHandle>, BackendError>;

    /// Start spawning an object from a prefab key
    fn instantiate(
        &mut self,
        key: &str,
        params: &InstantiateParams,
    ) -> Result<Operation<InstanceHandle>, BackendError>;

    /// Reclaim the native resource behind a released asset
    fn release_asset(&mut self, key: &str, asset: &ErasedAsset);

    /// Destroy a spawned object
    fn release_instance(&mut self, instance: &InstanceHandle);

    /// Advance in-flight work by one step.
    ///
    /// Returns `true` while the backend still has work it can advance from
    /// this thread.
    fn pump(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// Backend that resolves its single operation after a fixed number of pumps
    struct CountdownBackend {
        op: Operation<u32>,
        remaining: u32,
        pumps: u32,
    }

    impl AssetBackend for CountdownBackend {
        fn load_asset(&mut self, _: &AssetRequest) -> Result<Operation<ErasedAsset>, BackendError> {
            Err(BackendError::new("unsupported"))
        }
        fn load_scene(
            &mut self,
            _: &str,
            _: &SceneLoadParams,
        ) -> Result<Operation<SceneHandle>, BackendError> {
            Err(BackendError::new("unsupported"))
        }
        fn activate_scene(
            &mut self,
            _: &SceneHandle,
            _: i32,
        ) -> Result<Operation<SceneHandle>, BackendError> {
            Err(BackendError::new("unsupported"))
        }
        fn unload_scene(
            &mut self,
            _: &SceneHandle,
            _: bool,
        ) -> Result<Operation<SceneHandle>, BackendError> {
            Err(BackendError::new("unsupported"))
        }
        fn instantiate(
            &mut self,
            _: &str,
            _: &InstantiateParams,
        ) -> Result<Operation<InstanceHandle>, BackendError> {
            Err(BackendError::new("unsupported"))
        }
        fn release_asset(&mut self, _: &str, _: &ErasedAsset) {}
        fn release_instance(&mut self, _: &InstanceHandle) {}

        fn pump(&mut self) -> bool {
            self.pumps += 1;
            if self.remaining == 0 {
                return false;
            }
            self.remaining -= 1;
            if self.remaining == 0 {
                self.op.succeed(Some(7));
            }
            self.remaining > 0
        }
    }

    #[test]
    fn test_operation_resolves_once() {
        let op = Operation::<u32>::new();
        assert!(!op.is_done());
        assert!(op.succeed(Some(1)));
        assert!(!op.fail("late"));
        assert_eq!(op.status(), OperationStatus::Succeeded);
        assert_eq!(op.payload(), Some(1));
        assert_eq!(op.failure_reason(), None);
    }

    #[test]
    fn test_failed_operation_keeps_reason() {
        let op = Operation::<u32>::failed("missing");
        assert_eq!(op.status(), OperationStatus::Failed);
        assert_eq!(op.failure_reason().as_deref(), Some("missing"));
        assert_eq!(op.payload(), None);
    }

    #[test]
    fn test_wait_pumps_until_done() {
        let op = Operation::new();
        let mut backend = CountdownBackend {
            op: op.clone(),
            remaining: 3,
            pumps: 0,
        };

        let status = wait_for_completion(&mut backend, &op);
        assert_eq!(status, OperationStatus::Succeeded);
        assert_eq!(op.payload(), Some(7));
        assert_eq!(backend.pumps, 3);
    }

    #[test]
    fn test_wait_parks_until_other_thread_resolves() {
        let op = Operation::new();
        let mut backend = CountdownBackend {
            op: Operation::new(),
            remaining: 0,
            pumps: 0,
        };

        let remote = op.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.succeed(Some(9));
        });

        let status = wait_for_completion(&mut backend, &op);
        worker.join().unwrap();
        assert_eq!(status, OperationStatus::Succeeded);
        assert_eq!(op.payload(), Some(9));
    }
}
