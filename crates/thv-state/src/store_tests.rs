use super::*;
use std::collections::HashMap;
use thv_core::{ProxyMode, TransportType};
use thv_runconfig::SCHEMA_VERSION;

fn config(name: &str) -> RunConfig {
    RunConfig {
        schema_version: SCHEMA_VERSION,
        name: name.to_string(),
        image: Some("ghcr.io/example/mcp-echo:1".to_string()),
        protocol_scheme: None,
        remote_url: None,
        cmd_args: vec!["--quiet".to_string()],
        env_vars: HashMap::from([("LOG_LEVEL".to_string(), "info".to_string())]),
        secrets: Vec::new(),
        permission_profile: None,
        volumes: Vec::new(),
        authz_config: None,
        audit_config: None,
        enable_audit: false,
        oidc: None,
        remote_auth: None,
        token_exchange: None,
        otel: None,
        transport: TransportType::Stdio,
        proxy_mode: Some(ProxyMode::Sse),
        host: "127.0.0.1".to_string(),
        proxy_port: 40000,
        target_port: 0,
        target_host: "127.0.0.1".to_string(),
        group: None,
        tools_filter: Vec::new(),
        k8s_pod_patch: None,
        network_isolation: false,
        labels: HashMap::new(),
        created_at: Utc::now(),
    }
}

fn store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    (dir, store)
}

#[test]
fn test_create_then_load_round_trips() {
    let (_dir, store) = store();
    let config = config("echo");
    store.create_run_config(&config).unwrap();
    assert_eq!(store.load_run_config("echo").unwrap(), config);
}

#[test]
fn test_create_collision_is_already_exists() {
    let (_dir, store) = store();
    store.create_run_config(&config("echo")).unwrap();
    assert!(matches!(
        store.create_run_config(&config("echo")),
        Err(ThvError::AlreadyExists { .. })
    ));
    // Upsert flavor still works.
    store.save_run_config(&config("echo")).unwrap();
}

#[test]
fn test_load_missing_is_not_found() {
    let (_dir, store) = store();
    assert!(matches!(
        store.load_run_config("ghost"),
        Err(ThvError::NotFound { .. })
    ));
}

#[test]
fn test_corrupt_file_surfaces_state_corrupt() {
    let (_dir, store) = store();
    store.create_run_config(&config("echo")).unwrap();
    std::fs::write(store.runconfig_path("echo"), "{truncated").unwrap();
    assert!(matches!(
        store.load_run_config("echo"),
        Err(ThvError::StateCorrupt { .. })
    ));
}

#[test]
fn test_delete_is_idempotent_and_clears_status() {
    let (_dir, store) = store();
    store.create_run_config(&config("echo")).unwrap();
    store.save_status("echo", WorkloadStatus::Running).unwrap();

    store.delete_run_config("echo").unwrap();
    assert!(store.load_status("echo").is_none());
    assert!(matches!(
        store.load_run_config("echo"),
        Err(ThvError::NotFound { .. })
    ));
    // Deleting again is not an error.
    store.delete_run_config("echo").unwrap();
}

#[test]
fn test_list_names_sorted() {
    let (_dir, store) = store();
    store.create_run_config(&config("bravo")).unwrap();
    store.create_run_config(&config("alpha")).unwrap();
    assert_eq!(store.list_names().unwrap(), vec!["alpha", "bravo"]);
}

#[test]
fn test_group_lifecycle() {
    let (_dir, store) = store();
    assert!(!store.group_exists("g1"));

    store.create_group(&Group::new("g1")).unwrap();
    assert!(store.group_exists("g1"));
    assert!(matches!(
        store.create_group(&Group::new("g1")),
        Err(ThvError::AlreadyExists { .. })
    ));

    let mut group = store.load_group("g1").unwrap();
    group.registered_clients.push("cursor".to_string());
    store.save_group(&group).unwrap();
    assert_eq!(
        store.load_group("g1").unwrap().registered_clients,
        vec!["cursor"]
    );

    assert_eq!(store.list_groups().unwrap(), vec!["g1"]);
    store.delete_group("g1").unwrap();
    assert!(!store.group_exists("g1"));
    store.delete_group("g1").unwrap();
}

#[test]
fn test_status_cache_round_trip() {
    let (_dir, store) = store();
    assert!(store.load_status("echo").is_none());
    store.save_status("echo", WorkloadStatus::Running).unwrap();
    assert_eq!(store.load_status("echo"), Some(WorkloadStatus::Running));
}

#[test]
fn test_prune_logs_removes_only_dead_workloads() {
    let (_dir, store) = store();
    std::fs::write(store.proxy_log_path("alive"), "log").unwrap();
    std::fs::write(store.proxy_log_path("dead"), "log").unwrap();

    let live = HashSet::from(["alive".to_string()]);
    let pruned = store.prune_logs(&live).unwrap();
    assert_eq!(pruned.len(), 1);
    assert!(store.proxy_log_path("alive").exists());
    assert!(!store.proxy_log_path("dead").exists());
}
