//! Completion router
//!
//! Reconciles a finished backend operation with the cache tables. Each
//! function here runs exactly once per operation, after it reached a
//! terminal state, and decides between success and failure:
//!
//! 1. `Failed` status → failure, tables untouched
//! 2. `Succeeded` without payload → error log, failure
//! 3. key already cached → idempotent success for a same-typed value,
//!    collision failure otherwise
//! 4. otherwise → insert, success
//!
//! Async and sync call forms share these functions; only the way the
//! registry waits for the operation differs.

use crate::core::RegistryConfig;

use super::backend::{Operation, OperationStatus};
use super::error::AssetError;
use super::handle::{ErasedAsset, InstanceHandle, SceneHandle};
use super::storage::{AssetTable, InstanceTable, PutOutcome, SceneTable};

/// Outcome of routing one operation.
#[derive(Debug)]
pub struct Routed<T> {
    /// What the caller gets
    pub result: Result<T, AssetError>,
    /// A successfully loaded payload that lost against an existing cache
    /// entry and must be handed back to the backend
    pub discarded: Option<T>,
}

impl<T> Routed<T> {
    fn ok(value: T) -> Self {
        Self {
            result: Ok(value),
            discarded: None,
        }
    }

    fn err(error: AssetError) -> Self {
        Self {
            result: Err(error),
            discarded: None,
        }
    }
}

/// Log an advisory condition unless warnings are suppressed
pub(crate) fn warn(config: &RegistryConfig, error: &AssetError) {
    if !config.suppress_warning_logs {
        log::warn!("{error}");
    }
}

/// Log a failure unless errors are suppressed
pub(crate) fn error(config: &RegistryConfig, error: &AssetError) {
    if !config.suppress_error_logs {
        log::error!("{error}");
    }
}

/// Turn a non-successful terminal status into an error, or hand back the
/// payload of a successful one. The payload may still be empty.
fn settle<T: Clone>(key: &str, op: &Operation<T>) -> Result<Option<T>, AssetError> {
    match op.status() {
        OperationStatus::Succeeded => Ok(op.payload()),
        OperationStatus::Failed => Err(AssetError::backend_failure(
            key,
            op.failure_reason()
                .unwrap_or_else(|| "operation failed".to_string()),
        )),
        OperationStatus::InProgress => Err(AssetError::backend_failure(
            key,
            "operation routed before it finished",
        )),
    }
}

/// Route a finished asset load requested as `requested` (a type name).
pub fn route_asset_load(
    assets: &mut AssetTable,
    config: &RegistryConfig,
    key: &str,
    requested: &'static str,
    op: &Operation<ErasedAsset>,
) -> Routed<ErasedAsset> {
    let payload = match settle(key, op) {
        Ok(payload) => payload,
        Err(err) => return Routed::err(err),
    };

    let Some(asset) = payload else {
        let err = AssetError::backend_failure(key, format!("cannot load asset as `{requested}`"));
        error(config, &err);
        return Routed::err(err);
    };

    match assets.put(key, asset.clone()) {
        Ok(PutOutcome::Inserted) => {
            log::debug!("Cached asset `{key}` ({})", asset.type_name());
            Routed::ok(asset)
        }
        Ok(PutOutcome::AlreadyPresent(existing)) => {
            log::debug!("Asset `{key}` already cached, keeping the existing value");
            Routed {
                result: Ok(existing),
                discarded: Some(asset),
            }
        }
        Err(err) => {
            error(config, &err);
            Routed {
                result: Err(err),
                discarded: Some(asset),
            }
        }
    }
}

/// Route a finished scene load.
pub fn route_scene_load(
    scenes: &mut SceneTable,
    config: &RegistryConfig,
    key: &str,
    op: &Operation<SceneHandle>,
) -> Routed<SceneHandle> {
    let payload = match settle(key, op) {
        Ok(payload) => payload,
        Err(err) => return Routed::err(err),
    };

    let Some(scene) = payload else {
        let err = AssetError::backend_failure(key, "scene load produced no scene");
        error(config, &err);
        return Routed::err(err);
    };

    match scenes.insert(key, scene.clone()) {
        Ok(()) => {
            log::debug!("Tracking scene `{key}`");
            Routed::ok(scene)
        }
        Err(existing) => {
            log::debug!("Scene `{key}` already tracked, keeping the existing instance");
            Routed {
                result: Ok(existing),
                discarded: Some(scene),
            }
        }
    }
}

/// Route a finished instantiation.
pub fn route_instantiate(
    instances: &mut InstanceTable,
    config: &RegistryConfig,
    key: &str,
    op: &Operation<InstanceHandle>,
) -> Result<InstanceHandle, AssetError> {
    let Some(instance) = settle(key, op)? else {
        let err = AssetError::backend_failure(key, "cannot instantiate prefab");
        error(config, &err);
        return Err(err);
    };

    instances.push(key, instance.clone());
    Ok(instance)
}

/// Route a finished scene activation or unload. Tables are not involved:
/// unloads update the scene table before they are issued.
pub fn route_scene_transition(
    key: &str,
    op: &Operation<SceneHandle>,
) -> Result<Option<SceneHandle>, AssetError> {
    settle(key, op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Texture;

    #[derive(Debug)]
    struct AudioClip;

    fn quiet() -> RegistryConfig {
        RegistryConfig::default()
            .with_suppress_warning_logs(true)
            .with_suppress_error_logs(true)
    }

    #[test]
    fn test_failed_status_leaves_table_alone() {
        let mut assets = AssetTable::new();
        let op = Operation::failed("missing bundle");

        let routed = route_asset_load(&mut assets, &quiet(), "tex", "Texture", &op);
        assert!(matches!(
            routed.result,
            Err(AssetError::BackendFailure { ref reason, .. }) if reason == "missing bundle"
        ));
        assert!(assets.is_empty());
    }

    #[test]
    fn test_empty_payload_is_failure() {
        let mut assets = AssetTable::new();
        let op = Operation::succeeded(None);

        let routed = route_asset_load(&mut assets, &quiet(), "tex", "Texture", &op);
        assert!(matches!(routed.result, Err(AssetError::BackendFailure { .. })));
        assert!(assets.is_empty());
    }

    #[test]
    fn test_insert_on_success() {
        let mut assets = AssetTable::new();
        let texture = ErasedAsset::new(Texture);
        let op = Operation::succeeded(Some(texture.clone()));

        let routed = route_asset_load(&mut assets, &quiet(), "tex", "Texture", &op);
        assert_eq!(routed.result, Ok(texture.clone()));
        assert!(routed.discarded.is_none());
        assert_eq!(assets.get_erased("tex"), Some(&texture));
    }

    #[test]
    fn test_same_type_reentry_is_idempotent() {
        let mut assets = AssetTable::new();
        let first = ErasedAsset::new(Texture);
        assets.put("tex", first.clone()).unwrap();

        let second = ErasedAsset::new(Texture);
        let op = Operation::succeeded(Some(second.clone()));
        let routed = route_asset_load(&mut assets, &quiet(), "tex", "Texture", &op);

        assert_eq!(routed.result, Ok(first));
        assert_eq!(routed.discarded, Some(second));
    }

    #[test]
    fn test_different_type_is_collision() {
        let mut assets = AssetTable::new();
        let first = ErasedAsset::new(Texture);
        assets.put("tex", first.clone()).unwrap();

        let op = Operation::succeeded(Some(ErasedAsset::new(AudioClip)));
        let routed = route_asset_load(&mut assets, &quiet(), "tex", "AudioClip", &op);

        assert!(matches!(routed.result, Err(AssetError::Collision { .. })));
        assert!(routed.discarded.is_some());
        assert_eq!(assets.get_erased("tex"), Some(&first));
    }

    #[test]
    fn test_scene_load_keeps_tracked_scene() {
        let mut scenes = SceneTable::new();
        let first = SceneHandle::new("Game");
        scenes.insert("Game", first.clone()).unwrap();

        let op = Operation::succeeded(Some(SceneHandle::new("Game")));
        let routed = route_scene_load(&mut scenes, &quiet(), "Game", &op);
        assert_eq!(routed.result, Ok(first));
        assert!(routed.discarded.is_some());
    }

    #[test]
    fn test_instantiate_appends() {
        let mut instances = InstanceTable::new();
        for _ in 0..2 {
            let op = Operation::succeeded(Some(InstanceHandle::new("ring")));
            route_instantiate(&mut instances, &quiet(), "ring", &op).unwrap();
        }
        assert_eq!(instances.get("ring").len(), 2);

        let op = Operation::succeeded(None);
        assert!(route_instantiate(&mut instances, &quiet(), "ring", &op).is_err());
        assert_eq!(instances.get("ring").len(), 2);
    }

    #[test]
    fn test_scene_transition_reports_status() {
        let ok = Operation::succeeded(Some(SceneHandle::new("Game")));
        assert!(route_scene_transition("Game", &ok).is_ok());

        let failed = Operation::<SceneHandle>::failed("still referenced");
        assert!(route_scene_transition("Game", &failed).is_err());
    }
}
