use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chatvault_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chatvault");
    path
}

/// Temp root holding a chat export, a config pointing at it, and room
/// for the database and site output.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let export_dir = root.join("export");
    fs::create_dir_all(export_dir.join("photos")).unwrap();
    fs::write(export_dir.join("photos/p1.jpg"), b"jpeg bytes").unwrap();

    let result = serde_json::json!({
        "name": "My Group",
        "type": "private_supergroup",
        "id": 10,
        "messages": [
            {"id": 1, "type": "message", "date": "2024-03-05T10:00:00",
             "from": "Ada", "from_id": "user1", "text": "hello world"},
            {"id": 2, "type": "message", "date": "2024-03-05T10:05:00",
             "from": "Bob", "from_id": "user2", "text": "hi!",
             "reply_to_message_id": 1},
            {"id": 3, "type": "message", "date": "2024-03-06T09:00:00",
             "from": "Ada", "from_id": "user1", "text": "",
             "photo": "photos/p1.jpg"},
            {"id": 4, "type": "service", "date": "2024-03-06T09:30:00",
             "actor": "Carol", "actor_id": "user3",
             "action": "join_group_by_link", "text": ""},
            {"id": 5, "type": "message", "date": "2024-03-20T18:00:00",
             "from": "Bob", "from_id": "user2", "text": "late march"},
            {"id": 6, "type": "message", "date": "2024-04-02T08:00:00",
             "from": "Ada", "from_id": "user1", "text": "april"}
        ]
    });
    fs::write(export_dir.join("result.json"), result.to_string()).unwrap();

    let config_content = format!(
        r#"[archive]
group = "My Group"
timezone = "+00:00"

[source]
kind = "export"
export_path = "{root}/export"

[db]
path = "{root}/data/vault.db"
blob_dir = "{root}/data/blobs"

[sync]
fetch_batch_size = 2
fetch_wait_secs = 0

[build]
output_dir = "{root}/site"
page_size = 3
site_url = "https://example.org/archive"
site_title = "Test Archive"
feed_size = 100
"#,
        root = root.display()
    );

    let config_path = root.join("chatvault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chatvault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chatvault_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chatvault binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_writes_starter_config() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("fresh.toml");

    let (stdout, stderr, success) =
        run_chatvault(&path, &["init", path.to_str().unwrap()]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Wrote starter config"));
    assert!(fs::read_to_string(&path).unwrap().contains("[archive]"));

    // Refuses to clobber an existing file
    let (_, stderr, success) = run_chatvault(&path, &["init", path.to_str().unwrap()]);
    assert!(!success, "second init should fail");
    assert!(stderr.contains("already exists"));
}

#[test]
fn test_sync_archives_the_export() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chatvault(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("6 new messages archived"),
        "Expected 6 messages, got: {}",
        stdout
    );
}

#[test]
fn test_resync_archives_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_chatvault(&config_path, &["sync"]);
    let (stdout, _, success) = run_chatvault(&config_path, &["sync"]);
    assert!(success);
    assert!(
        stdout.contains("0 new messages archived"),
        "Expected an empty resync, got: {}",
        stdout
    );
}

#[test]
fn test_explicit_ids_refetch() {
    let (_tmp, config_path) = setup_test_env();

    run_chatvault(&config_path, &["sync"]);
    let (stdout, _, success) = run_chatvault(&config_path, &["sync", "--id", "2"]);
    assert!(success);
    assert!(
        stdout.contains("1 new messages archived"),
        "Expected a single refetch, got: {}",
        stdout
    );
}

#[test]
fn test_build_writes_site() {
    let (tmp, config_path) = setup_test_env();

    run_chatvault(&config_path, &["sync"]);
    let (stdout, stderr, success) = run_chatvault(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Built"));

    let site = tmp.path().join("site");
    // Five March messages at page size 3 make two pages; April gets one.
    let march_1 = fs::read_to_string(site.join("2024-03.html")).unwrap();
    let march_2 = fs::read_to_string(site.join("2024-03_2.html")).unwrap();
    assert!(march_1.contains("hello world"));
    // Same-page reply resolves to a deep link
    assert!(march_1.contains(r##"href="2024-03.html#1""##));
    assert!(march_2.contains("joined the group"));

    // The landing page is the newest page
    let index = fs::read(site.join("index.html")).unwrap();
    let april = fs::read(site.join("2024-04.html")).unwrap();
    assert_eq!(index, april);

    // Media from the export landed under media/
    assert!(site.join("media/10_3.jpg").exists());

    let feed = fs::read_to_string(site.join("index.rss")).unwrap();
    assert!(feed.contains(r#"<rss version="2.0">"#));
    assert!(feed.contains("2024-04.html#6"));
    assert!(feed.contains("april"));
}

#[test]
fn test_build_is_a_full_rebuild() {
    let (tmp, config_path) = setup_test_env();

    run_chatvault(&config_path, &["sync"]);

    // A stale page from an earlier layout must not survive the rebuild
    let site = tmp.path().join("site");
    fs::create_dir_all(&site).unwrap();
    fs::write(site.join("2019-01.html"), "stale").unwrap();

    let (_, _, success) = run_chatvault(&config_path, &["build"]);
    assert!(success);
    assert!(!site.join("2019-01.html").exists());
    assert!(site.join("2024-03.html").exists());
}

#[test]
fn test_build_before_sync_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_chatvault(&config_path, &["build"]);
    assert!(!success, "build without a sync should fail");
    assert!(
        stderr.contains("not in the archive yet"),
        "Should point at sync, got: {}",
        stderr
    );
}

#[test]
fn test_stats_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    run_chatvault(&config_path, &["sync"]);
    let (stdout, _, success) = run_chatvault(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Messages:"));
    assert!(stdout.contains("My Group"));
}

#[test]
fn test_unknown_progress_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_chatvault(&config_path, &["sync", "--progress", "loud"]);
    assert!(!success, "Unknown progress mode should fail");
    assert!(
        stderr.contains("unknown progress mode"),
        "Should mention the bad mode, got: {}",
        stderr
    );
}

#[test]
fn test_completions_cover_the_binary() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("unused.toml");

    let (stdout, _, success) = run_chatvault(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("chatvault"));
}
