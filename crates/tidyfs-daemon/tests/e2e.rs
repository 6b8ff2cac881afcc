//! End-to-end daemon scenarios
//!
//! Each test writes a real config, starts the controller against the real
//! filesystem watcher, mutates a temp directory, and polls for the
//! expected outcome. Generous deadlines keep these stable on slow CI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tidyfs_core::config::Config;
use tidyfs_core::state::StateStore;
use tidyfs_daemon::Controller;
use tidyfs_ipc::{Request, Response};
use tokio_util::sync::CancellationToken;

struct TestDaemon {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    control_tx: tokio::sync::mpsc::Sender<tidyfs_daemon::ControlRequest>,
}

impl TestDaemon {
    /// Starts a controller for the given config and waits for the
    /// watcher to settle.
    async fn start(dir: &Path, config_yaml: &str) -> Self {
        let config_path = dir.join("config.yaml");
        std::fs::write(&config_path, config_yaml).unwrap();
        let config = Config::load(&config_path).unwrap();
        assert!(config.validate().is_empty(), "test config must be valid");

        let state = Arc::new(StateStore::load(dir.join("state.json")));
        let cancel = CancellationToken::new();
        let (mut controller, control_tx) =
            Controller::new(config_path, config, state, cancel.clone());
        let handle = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        Self { cancel, handle, control_tx }
    }

    /// Graceful shutdown, asserting the 5-second deadline.
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon must stop within 5 seconds")
            .expect("daemon task must not panic")
            .expect("daemon must exit cleanly");
    }
}

/// Polls `cond` until it holds or `deadline` elapses.
async fn wait_for<F: Fn() -> bool>(deadline: Duration, what: &str, cond: F) {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out after {deadline:?} waiting for: {what}");
}

fn move_config(source: &Path, dest: &Path) -> String {
    format!(
        r#"
rules:
  - name: mover
    locations: {source}
    actions:
      - move: {dest}
daemon:
  debounce: 200ms
"#,
        source = source.display(),
        dest = dest.display(),
    )
}

// ----------------------------------------------------------------------
// Scenario: move on create
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn move_on_create() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;

    std::fs::write(source.join("test.txt"), b"payload").unwrap();

    let expected = dest.join("test.txt");
    wait_for(Duration::from_secs(2), "file moved to dest", || expected.exists()).await;
    assert!(!source.join("test.txt").exists());

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: not-filter exclusion
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn not_filter_excludes_bak_files() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let config = format!(
        r#"
rules:
  - name: mover
    locations: {source}
    filters:
      - not:
          - name: "*.bak"
    actions:
      - move: {dest}
daemon:
  debounce: 200ms
"#,
        source = source.display(),
        dest = dest.display(),
    );
    let daemon = TestDaemon::start(tmp.path(), &config).await;

    std::fs::write(source.join("test.txt"), b"keepable").unwrap();
    std::fs::write(source.join("backup.bak"), b"excluded").unwrap();

    wait_for(Duration::from_secs(2), "test.txt moved", || dest.join("test.txt").exists()).await;
    // Settle time so a wrong move of the .bak would be visible.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(source.join("backup.bak").exists());
    assert!(!dest.join("backup.bak").exists());

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: any with nested not
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn any_group_with_nested_not() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let config = format!(
        r#"
rules:
  - name: mover
    locations: {source}
    filters:
      - any:
          - extension: txt
            not:
              - name: "*_draft*"
          - extension: pdf
          - extension: doc
      - not:
          - name: "*_skip*"
    actions:
      - move: {dest}
daemon:
  debounce: 200ms
"#,
        source = source.display(),
        dest = dest.display(),
    );
    let daemon = TestDaemon::start(tmp.path(), &config).await;

    for name in ["report.txt", "document.pdf", "letter.doc", "notes_skip_me.txt", "memo_draft.txt"]
    {
        std::fs::write(source.join(name), b"content").unwrap();
    }

    for moved in ["report.txt", "document.pdf", "letter.doc"] {
        let expected = dest.join(moved);
        wait_for(Duration::from_secs(3), moved, move || expected.exists()).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    for kept in ["notes_skip_me.txt", "memo_draft.txt"] {
        assert!(source.join(kept).exists(), "{kept} must stay in source");
        assert!(!dest.join(kept).exists(), "{kept} must not reach dest");
    }

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: delayed directory
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn delayed_source_directory() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&dest).unwrap();
    // source deliberately does not exist yet.

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::create_dir(&source).unwrap();
    std::fs::write(source.join("test.txt"), b"late arrival").unwrap();

    let expected = dest.join("test.txt");
    wait_for(Duration::from_secs(3), "file from recreated root", || expected.exists()).await;

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: nested delayed directory
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn nested_delayed_source_directory() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("a/b/c");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&dest).unwrap();

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    for step in [tmp.path().join("a"), tmp.path().join("a/b"), source.clone()] {
        std::fs::create_dir(&step).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    std::fs::write(source.join("test.txt"), b"deep").unwrap();

    let expected = dest.join("test.txt");
    wait_for(Duration::from_secs(5), "file from nested recreated root", || expected.exists())
        .await;

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: delete and recreate source
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn delete_and_recreate_source() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;

    std::fs::write(source.join("first.txt"), b"one").unwrap();
    let first = dest.join("first.txt");
    wait_for(Duration::from_secs(2), "first file processed", || first.exists()).await;

    std::fs::remove_dir(&source).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::create_dir(&source).unwrap();

    // Let the recreation settle and the cooldown window pass.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    std::fs::write(source.join("second.txt"), b"two").unwrap();

    let second = dest.join("second.txt");
    wait_for(Duration::from_secs(3), "second file processed", || second.exists()).await;
    assert!(!source.join("second.txt").exists());

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Scenario: action chain with conflict-producing copies
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn action_chain_renames_copies_and_moves() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let config = format!(
        r#"
rules:
  - name: chain
    locations: {source}
    actions:
      - log: "processing ${{name}}${{ext}}"
      - rename: ${{name}}_renamed${{ext}}
      - copy: ${{name}}_backup${{ext}}
      - move: {dest}
daemon:
  debounce: 200ms
"#,
        source = source.display(),
        dest = dest.display(),
    );
    let daemon = TestDaemon::start(tmp.path(), &config).await;

    std::fs::write(source.join("document.txt"), b"text").unwrap();
    std::fs::write(source.join("largefile.bin"), vec![0u8; 200]).unwrap();

    let expectations: Vec<PathBuf> = vec![
        source.join("document_renamed.txt"),
        source.join("largefile_renamed.bin"),
        dest.join("document_renamed_backup.txt"),
        dest.join("largefile_renamed_backup.bin"),
    ];
    for path in &expectations {
        let path = path.clone();
        let label = path.display().to_string();
        wait_for(Duration::from_secs(3), &label, move || path.exists()).await;
    }
    assert!(!source.join("document.txt").exists());

    daemon.stop().await;
}

// ----------------------------------------------------------------------
// Control plane
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn control_socket_roundtrips() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;

    // Wire a real control socket to the running controller.
    let socket = tmp.path().join("tidyfs.sock");
    let ipc = tidyfs_daemon::IpcServer::bind(
        socket.clone(),
        daemon.control_tx.clone(),
        daemon.cancel.clone(),
    )
    .unwrap();
    let ipc_task = tokio::spawn(ipc.run());

    let status = tidyfs_ipc::request(&socket, &Request::Status).await.unwrap();
    match status {
        Response::Status(report) => {
            assert!(report.enabled);
            assert!(report.watch_count >= 1);
            assert!(report.rules.contains_key("mover"));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let disabled = tidyfs_ipc::request(&socket, &Request::Disable).await.unwrap();
    assert!(matches!(disabled, Response::Ok { .. }));
    match tidyfs_ipc::request(&socket, &Request::Status).await.unwrap() {
        Response::Status(report) => {
            assert!(!report.enabled);
            assert_eq!(report.watch_count, 0);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // While disabled, new files are ignored.
    std::fs::write(source.join("ignored.txt"), b"x").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(source.join("ignored.txt").exists());
    assert!(!dest.join("ignored.txt").exists());

    let enabled = tidyfs_ipc::request(&socket, &Request::Enable).await.unwrap();
    assert!(matches!(enabled, Response::Ok { .. }));

    // Watching again: a fresh file gets processed.
    std::fs::write(source.join("after.txt"), b"y").unwrap();
    let after = dest.join("after.txt");
    wait_for(Duration::from_secs(3), "file processed after enable", || after.exists()).await;

    daemon.stop().await;
    let _ = ipc_task.await;
}

// ----------------------------------------------------------------------
// Shutdown deadline
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_is_prompt() {
    let tmp = tempfile::TempDir::new().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();

    let daemon = TestDaemon::start(tmp.path(), &move_config(&source, &dest)).await;
    // TestDaemon::stop asserts the 5-second deadline.
    daemon.stop().await;
}
