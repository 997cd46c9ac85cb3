//! Scanning, switching, locking and deleting through the orchestrator.
//!
//! Run with: cargo test -p tvm-toolchain --test manager

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tvm_config::{ConfigStore, EnvRule, MemoryConfigStore, Settings, ToolTemplate};
use tvm_toolchain::{Environment, KnownTool, MemoryEnvironment, VersionManager};

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    store: Arc<MemoryConfigStore>,
    env: Arc<MemoryEnvironment>,
    manager: VersionManager,
}

fn fixture(tool: &str, dirs: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join(tool);
    for name in dirs {
        std::fs::create_dir_all(root.join(name)).unwrap();
    }

    let store = Arc::new(MemoryConfigStore::new(Settings::default(), dir.path().join("data")));
    store.set_template(
        tool,
        ToolTemplate {
            tool_root: root.to_string_lossy().into_owned(),
            env_rule: Some(EnvRule {
                home_var: "TVM_TEST_DEMO_HOME".to_string(),
                path_entries: vec!["bin".to_string()],
            }),
            ..ToolTemplate::default()
        },
    );
    let env = Arc::new(MemoryEnvironment::new());
    let manager = VersionManager::new(store.clone(), env.clone()).unwrap();
    Fixture {
        _dir: dir,
        root,
        store,
        env,
        manager,
    }
}

fn versions(store: &MemoryConfigStore, tool: &str) -> Vec<(String, bool)> {
    store
        .tool_metadata(tool)
        .installed_versions
        .into_iter()
        .map(|v| (v.version, v.is_system))
        .collect()
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

#[tokio::test]
async fn test_scan_reads_compact_python_folder() {
    let fx = fixture("python", &[]);
    let install = fx.root.join("python310");
    touch(&KnownTool::Python.executable(&install));
    std::fs::create_dir_all(fx.root.join("not-python")).unwrap();

    let scanned = fx.manager.scan_local_versions("python").await;

    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].version, "3.10");
    assert_eq!(scanned[0].path, install);
    assert_eq!(versions(&fx.store, "python"), vec![("3.10".to_string(), false)]);
}

#[tokio::test]
async fn test_scan_ignores_hidden_scratch_dirs() {
    let fx = fixture("demo", &["demo-1.2.3"]);
    std::fs::create_dir_all(fx.root.join(".extract-k7Qx2a").join("bin")).unwrap();

    let scanned = fx.manager.scan_local_versions("demo").await;

    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].version, "1.2.3");
    assert_eq!(versions(&fx.store, "demo"), vec![("1.2.3".to_string(), false)]);
}

#[tokio::test]
async fn test_scan_keeps_flags_across_rescans() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0"]);
    assert_eq!(fx.manager.scan_local_versions("demo").await.len(), 2);
    assert!(fx.manager.lock_version("demo", "1.0.0", true).await);

    std::fs::remove_dir_all(fx.root.join("demo-2.0.0")).unwrap();
    let scanned = fx.manager.scan_local_versions("demo").await;

    assert_eq!(scanned.len(), 1);
    assert!(scanned[0].locked);
    assert!(fx.store.tool_metadata("demo").installed_versions[0].locked);
}

#[tokio::test]
async fn test_switch_sets_env_and_flags() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0", "demo-3.0.0"]);
    fx.manager.scan_local_versions("demo").await;

    assert!(fx.manager.switch_version("demo", "2.0.0").await);

    assert_eq!(
        fx.env.get_var("TVM_TEST_DEMO_HOME").map(PathBuf::from),
        Some(fx.root.join("demo-2.0.0"))
    );
    assert_eq!(fx.env.path_entries().len(), 1);
    assert_eq!(fx.env.broadcasts(), 1);
    assert_eq!(
        versions(&fx.store, "demo"),
        vec![
            ("1.0.0".to_string(), false),
            ("2.0.0".to_string(), true),
            ("3.0.0".to_string(), false),
        ]
    );

    assert!(fx.manager.switch_version("demo", "3.0.0").await);

    assert_eq!(fx.env.path_entries().len(), 1);
    assert_eq!(fx.manager.get_current_version("demo").await.as_deref(), Some("3.0.0"));
    assert_eq!(
        versions(&fx.store, "demo"),
        vec![
            ("1.0.0".to_string(), false),
            ("2.0.0".to_string(), false),
            ("3.0.0".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn test_switch_leaves_env_alone_when_metadata_save_fails() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0"]);
    fx.manager.scan_local_versions("demo").await;
    assert!(fx.manager.switch_version("demo", "1.0.0").await);
    let before = fx.store.tool_metadata("demo");

    fx.store.fail_metadata_saves(true);
    assert!(!fx.manager.switch_version("demo", "2.0.0").await);

    assert_eq!(
        fx.env.get_var("TVM_TEST_DEMO_HOME").map(PathBuf::from),
        Some(fx.root.join("demo-1.0.0"))
    );
    assert_eq!(fx.env.broadcasts(), 1);
    assert_eq!(fx.store.tool_metadata("demo"), before);
}

#[tokio::test]
async fn test_switch_scans_unknown_version() {
    let fx = fixture("demo", &["demo-1.0.0"]);
    assert!(fx.manager.switch_version("demo", "1.0.0").await);
    assert_eq!(versions(&fx.store, "demo"), vec![("1.0.0".to_string(), true)]);
}

#[tokio::test]
async fn test_switch_rejects_bad_input_and_missing_versions() {
    let fx = fixture("demo", &["demo-1.0.0"]);
    assert!(!fx.manager.switch_version("../demo", "1.0.0").await);
    assert!(!fx.manager.switch_version("demo", "1.0.0; rm -rf /").await);
    assert!(!fx.manager.switch_version("demo", "9.9.9").await);
    assert!(fx.env.get_var("TVM_TEST_DEMO_HOME").is_none());
    assert_eq!(fx.env.broadcasts(), 0);
}

#[tokio::test]
async fn test_switch_requires_env_rule() {
    let fx = fixture("demo", &["demo-1.0.0"]);
    fx.store.set_template(
        "demo",
        ToolTemplate {
            tool_root: fx.root.to_string_lossy().into_owned(),
            ..ToolTemplate::default()
        },
    );
    assert!(!fx.manager.switch_version("demo", "1.0.0").await);
    assert!(fx.store.tool_metadata("demo").current_version.is_none());
}

#[tokio::test]
async fn test_delete_refuses_locked_and_system() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0"]);
    fx.manager.scan_local_versions("demo").await;
    assert!(fx.manager.switch_version("demo", "2.0.0").await);
    assert!(fx.manager.lock_version("demo", "1.0.0", true).await);
    let before = fx.store.tool_metadata("demo");

    assert!(!fx.manager.delete_version("demo", "1.0.0").await);
    assert!(!fx.manager.delete_version("demo", "2.0.0").await);

    assert!(fx.root.join("demo-1.0.0").is_dir());
    assert!(fx.root.join("demo-2.0.0").is_dir());
    assert_eq!(fx.store.tool_metadata("demo"), before);
}

#[tokio::test]
async fn test_delete_removes_dir_and_entry() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0"]);
    fx.manager.scan_local_versions("demo").await;

    assert!(fx.manager.delete_version("demo", "1.0.0").await);

    assert!(!fx.root.join("demo-1.0.0").exists());
    assert_eq!(versions(&fx.store, "demo"), vec![("2.0.0".to_string(), false)]);
    assert!(!fx.manager.delete_version("demo", "1.0.0").await);
}

#[tokio::test]
async fn test_lock_unknown_version_fails() {
    let fx = fixture("demo", &[]);
    assert!(!fx.manager.lock_version("demo", "1.0.0", true).await);
}

#[tokio::test]
async fn test_system_version_follows_env() {
    let fx = fixture("demo", &["demo-1.0.0", "demo-2.0.0"]);
    fx.manager.scan_local_versions("demo").await;
    let home = format!("{}/", fx.root.join("demo-1.0.0").display());
    fx.env.set_var("TVM_TEST_DEMO_HOME", &home).unwrap();
    let saves = fx.store.metadata_saves();

    let system = fx.manager.check_and_update_system_version("demo").await.unwrap();

    assert_eq!(system.version.as_deref(), Some("1.0.0"));
    assert_eq!(
        versions(&fx.store, "demo"),
        vec![("1.0.0".to_string(), true), ("2.0.0".to_string(), false)]
    );
    assert_eq!(fx.store.metadata_saves(), saves + 1);

    fx.manager.check_and_update_system_version("demo").await.unwrap();
    assert_eq!(fx.store.metadata_saves(), saves + 1);
}

#[tokio::test]
async fn test_sort_and_group_helpers() {
    let fx = fixture("demo", &[]);
    let sorted = fx
        .manager
        .sort_versions_desc(vec!["1.9.0", "1.10", "2.0.0", "1.10.0"]);
    assert_eq!(sorted, vec!["2.0.0", "1.10.0", "1.10", "1.9.0"]);

    let groups = fx.manager.group_versions_by_major(sorted);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].major_value(), 2);
    assert_eq!(groups[1].versions.len(), 3);
}
