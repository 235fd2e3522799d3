//! End-to-end tests for the appbox runtime on the in-memory backend.
//!
//! These tests drive the engine the way the broker does:
//! 1. Create application and service containers from create options
//! 2. Scale scaling groups up and refuse scale-down
//! 3. Find containers again through the registry
//! 4. Run commands inside containers and collect their output
//! 5. Carry operation output over a framed log stream

#![allow(clippy::expect_used, clippy::unwrap_used)]

use appbox_common::config::{AppboxConfig, BackendKind};
use appbox_common::error::AppboxError;
use appbox_common::types::{Category, ContainerState, PluginInfo};
use appbox_runtime::container::Container;
use appbox_runtime::engine::{CreateOptions, Engine};
use appbox_runtime::exec::{ExecIo, SharedBuffer};
use appbox_runtime::logs::{FramedLog, LogSink};
use appbox_runtime::stdcopy;

const NAMESPACE: &str = "container_create_test";

fn plugin(name: &str, category: Category) -> PluginInfo {
    PluginInfo {
        tag: format!("{name}:1.0"),
        name: name.to_string(),
        display_name: format!("Mock {name}"),
        category,
        path: format!("/usr/share/appbox/plugins/{name}"),
        logo: String::new(),
        exposed_ports: vec![8080],
    }
}

fn engine(dir: &std::path::Path) -> Engine {
    let config = AppboxConfig {
        data_dir: dir.to_path_buf(),
        backend: BackendKind::Memory,
        ..AppboxConfig::default()
    };
    Engine::from_config(&config).expect("memory engine")
}

fn options() -> CreateOptions {
    CreateOptions {
        name: "test".into(),
        namespace: NAMESPACE.into(),
        plugin: Some(plugin("mock", Category::Framework)),
        scaling: 1,
        ..CreateOptions::default()
    }
}

fn service_options(service_name: Option<&str>) -> CreateOptions {
    CreateOptions {
        plugin: Some(plugin("mockdb", Category::Service)),
        service_name: service_name.map(String::from),
        ..options()
    }
}

// ── Create ───────────────────────────────────────────────────────────

#[test]
fn create_succeeds_with_correct_options() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let containers = engine.create(&options()).unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].state(), ContainerState::Created);
}

#[test]
fn create_fails_without_name() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let opts = CreateOptions {
        name: String::new(),
        ..options()
    };
    assert!(matches!(engine.create(&opts), Err(AppboxError::InvalidInput { .. })));
}

#[test]
fn create_fails_without_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let opts = CreateOptions {
        namespace: String::new(),
        ..options()
    };
    assert!(matches!(engine.create(&opts), Err(AppboxError::InvalidInput { .. })));
}

#[test]
#[should_panic(expected = "carry no plugin")]
fn create_panics_without_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let opts = CreateOptions {
        plugin: None,
        ..options()
    };
    let _ = engine.create(&opts);
}

#[test]
fn create_fails_for_second_unnamed_service() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let first = engine.create(&service_options(None)).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].service_name(), Some("mockdb"));

    let err = engine.create(&service_options(None)).unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn create_allows_services_with_different_names() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let _ = engine.create(&service_options(Some("db1"))).unwrap();
    let _ = engine.create(&service_options(Some("db2"))).unwrap();
    assert_eq!(engine.registry().find_all("test", NAMESPACE).unwrap().len(), 2);
}

// ── Scaling ──────────────────────────────────────────────────────────

#[test]
fn scaling_fails_when_already_at_level() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    assert_eq!(engine.create(&options()).unwrap().len(), 1);
    assert!(engine.create(&options()).unwrap_err().is_already_exists());
}

#[test]
fn scaling_up_returns_only_new_containers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    assert_eq!(engine.create(&options()).unwrap().len(), 1);

    let more = engine
        .create(&CreateOptions {
            scaling: 3,
            ..options()
        })
        .unwrap();
    assert_eq!(more.len(), 2);
    assert_eq!(engine.registry().find("test-container_create_test").unwrap().len(), 3);
}

#[test]
fn scaling_down_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let three = CreateOptions {
        scaling: 3,
        ..options()
    };
    assert_eq!(engine.create(&three).unwrap().len(), 3);

    let two = CreateOptions {
        scaling: 2,
        ..options()
    };
    assert!(matches!(engine.create(&two), Err(AppboxError::InvalidInput { .. })));
    assert_eq!(engine.registry().find_applications("test", NAMESPACE).unwrap().len(), 3);
}

#[test]
fn scaling_rejects_zero_and_negative() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    for scaling in [0, -2] {
        let opts = CreateOptions { scaling, ..options() };
        assert!(matches!(engine.create(&opts), Err(AppboxError::InvalidInput { .. })));
    }
    assert!(engine.registry().list().unwrap().is_empty());
}

// ── Exec ─────────────────────────────────────────────────────────────

#[test]
fn exec_streams_output_of_a_running_container() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let c = engine.create(&options()).unwrap().remove(0);
    c.start().unwrap();
    c.set_env("MOTD", "welcome").unwrap();

    let (out, err) = (SharedBuffer::new(), SharedBuffer::new());
    let io = ExecIo {
        stdout: Some(Box::new(out.clone())),
        stderr: Some(Box::new(err.clone())),
        ..ExecIo::default()
    };
    c.exec(None, io, &["sh", "-c", "echo $MOTD; echo $APPBOX_APP_NAME >&2"])
        .unwrap();
    assert_eq!(out.chomp(), "welcome");
    assert_eq!(err.chomp(), "test");

    let status = c.exec_q(None, &["sh", "-c", "echo broken >&2; exit 7"]).unwrap_err();
    assert!(matches!(status, AppboxError::Status { code: 7, .. }));
    assert_eq!(status.to_string(), "broken, Code: 7");
}

#[test]
fn exec_output_can_be_framed_into_a_log() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let c = engine.create(&options()).unwrap().remove(0);

    let wire = SharedBuffer::new();
    let log = FramedLog::new(wire.clone());
    let io = ExecIo {
        stdout: Some(log.stdout()),
        stderr: Some(log.stderr()),
        ..ExecIo::default()
    };
    c.exec(None, io, &["sh", "-c", "echo built; echo careful >&2"]).unwrap();
    log.send_object(&serde_json::json!({"id": c.id().as_str()})).unwrap();

    let (mut out, mut err, mut data) = (Vec::new(), Vec::new(), Vec::new());
    let raw = wire.bytes();
    let _ = stdcopy::copy(Some(&mut out), Some(&mut err), Some(&mut data), &mut &raw[..]).unwrap();
    assert_eq!(out, b"built\n");
    assert_eq!(err, b"careful\n");
    let result: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(result["id"], c.id().as_str());
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[test]
fn destroyed_containers_disappear_from_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let created = engine
        .create(&CreateOptions {
            scaling: 2,
            ..options()
        })
        .unwrap();
    for c in &created {
        c.start().unwrap();
    }
    let running = engine.registry().find_all("test", NAMESPACE).unwrap();
    assert!(running.iter().all(|c| c.state() == ContainerState::Running));

    created.iter().try_for_each(Container::destroy).unwrap();
    assert!(engine.registry().find_all("test", NAMESPACE).unwrap().is_empty());
}

#[test]
fn identity_string_finds_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let c = engine.create(&options()).unwrap().remove(0);
    let key = c.identity().to_string();
    assert_eq!(key, "test-container_create_test");
    assert_eq!(engine.registry().find(&key).unwrap()[0].id(), c.id());
    assert_eq!(engine.registry().find(c.id().as_str()).unwrap()[0].name(), "test");
}
