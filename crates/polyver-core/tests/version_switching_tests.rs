//! Integration tests for switching and overriding versions through the
//! public API.
//!
//! Bindings here come from an in-process loader whose payload records the
//! location it was "loaded" from, so assertions can tell versions apart.

use polyver_core::{
    Binding, LoadRequest, Loader, Location, ManagerConfig, PolyverError, Registry,
    VersionManager,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Payload produced by the test loader.
#[derive(Debug)]
struct Widget {
    origin: String,
}

struct WidgetLoader;

impl Loader for WidgetLoader {
    fn load(&self, request: &LoadRequest<'_>) -> polyver_core::Result<Binding> {
        Ok(Binding::new(
            request.component,
            request.version(),
            request.alias(),
            Widget {
                origin: request.spec.location().descriptor(),
            },
        ))
    }
}

fn origin(binding: &Binding) -> String {
    binding.downcast_ref::<Widget>().unwrap().origin.clone()
}

/// `widgets` with `main` (primary) and `legacy` (/opt/legacy), defaulting to `main`.
fn widgets() -> Arc<VersionManager> {
    let registry = Registry::new();
    let manager = registry
        .get_or_create("widgets", |name| VersionManager::new(name, WidgetLoader))
        .unwrap();
    manager.register_primary().unwrap();
    manager.register_version("legacy", "/opt/legacy").unwrap();
    manager.use_version("main").unwrap();
    manager
}

#[test]
fn test_widgets_scenario() {
    let manager = widgets();
    assert_eq!(origin(&manager.current().unwrap()), "<primary>");

    // Process-wide switch.
    let binding = manager.use_version("legacy").unwrap();
    assert_eq!(origin(&binding), "/opt/legacy");
    assert_eq!(origin(&manager.current().unwrap()), "/opt/legacy");
    assert_ne!(
        manager.get_version("main").unwrap().identity(),
        binding.identity()
    );

    // Scoped override back to main.
    {
        let _guard = manager.temporary_version("main").unwrap();
        assert_eq!(origin(&manager.current().unwrap()), "<primary>");
    }
    assert_eq!(origin(&manager.current().unwrap()), "/opt/legacy");

    // main is no longer active, so it may go; legacy may not.
    assert!(matches!(
        manager.unregister_version("legacy"),
        Err(PolyverError::InvalidOperation { .. })
    ));
    manager.unregister_version("main").unwrap();
    assert!(manager
        .temporary_version("main")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_override_is_thread_local() {
    let manager = widgets();
    let _guard = manager.temporary_version("legacy").unwrap();
    assert_eq!(manager.resolved_version().unwrap(), "legacy");

    let other = manager.clone();
    let seen = std::thread::spawn(move || other.resolved_version().unwrap())
        .join()
        .unwrap();
    assert_eq!(seen, "main");
    assert_eq!(manager.active_version().as_deref(), Some("main"));
}

#[test]
fn test_overrides_nest_lifo() {
    let manager = widgets();
    manager.register_version("next", "/opt/next").unwrap();

    let outer = manager.temporary_version("legacy").unwrap();
    {
        let _inner = manager.temporary_version("next").unwrap();
        assert_eq!(manager.resolved_version().unwrap(), "next");
    }
    assert_eq!(manager.resolved_version().unwrap(), "legacy");
    drop(outer);
    assert_eq!(manager.resolved_version().unwrap(), "main");
}

#[test]
fn test_override_released_when_scope_errors() {
    let manager = widgets();

    let result: Result<(), PolyverError> = manager
        .with_version("legacy", || {
            assert_eq!(manager.resolved_version().unwrap(), "legacy");
            Err(PolyverError::Config {
                message: "caller failed".into(),
            })
        })
        .unwrap();

    assert!(result.is_err());
    assert_eq!(manager.resolved_version().unwrap(), "main");
}

#[test]
fn test_register_then_unregister_leaves_manager_unchanged() {
    let manager = widgets();
    let listing = manager.list_versions();
    let cached = manager.cached_count();

    manager.register_version("scratch", "/tmp/scratch").unwrap();
    manager.unregister_version("scratch").unwrap();

    assert_eq!(manager.list_versions(), listing);
    assert_eq!(manager.cached_count(), cached);
}

#[test]
fn test_store_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = ManagerConfig::in_memory()
        .with_store_path(temp_dir.path().join(".widgets_versions.json"))
        .with_store_backup(true);

    {
        let manager =
            VersionManager::with_config("widgets", Arc::new(WidgetLoader), config.clone())
                .unwrap();
        manager.register_primary().unwrap();
        manager.register_version("legacy", "/opt/legacy").unwrap();
        manager.use_version("legacy").unwrap();
    }

    let manager =
        VersionManager::with_config("widgets", Arc::new(WidgetLoader), config).unwrap();
    let names: Vec<_> = manager
        .list_versions()
        .into_iter()
        .map(|v| (v.name, v.active))
        .collect();
    assert_eq!(
        names,
        vec![("main".to_string(), false), ("legacy".to_string(), true)]
    );
    assert_eq!(
        manager.version_spec("legacy").unwrap().location(),
        &Location::from("/opt/legacy")
    );
    assert!(temp_dir.path().join(".widgets_versions.json.bak").exists());
}

#[tokio::test(flavor = "current_thread")]
async fn test_scope_does_not_leak_between_tasks() {
    let manager = widgets();

    let scoped = {
        let m = manager.clone();
        manager
            .scope("legacy", async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                m.resolved_version().unwrap()
            })
            .unwrap()
    };
    let plain = {
        let m = manager.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            m.resolved_version().unwrap()
        }
    };

    // Both tasks run interleaved on the single test thread.
    let scoped = tokio::spawn(scoped);
    let plain = tokio::spawn(plain);

    assert_eq!(plain.await.unwrap(), "main");
    assert_eq!(scoped.await.unwrap(), "legacy");
    assert_eq!(manager.resolved_version().unwrap(), "main");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_current_async_honours_scope() {
    let manager = widgets();

    let m = manager.clone();
    let binding = manager
        .scope("legacy", async move { m.current_async().await })
        .unwrap()
        .await
        .unwrap();

    assert_eq!(origin(&binding), "/opt/legacy");
    assert_eq!(origin(&manager.current_async().await.unwrap()), "<primary>");
}
