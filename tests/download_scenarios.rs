//! End-to-end scenarios against a mocked archive.org, covering the
//! download protocol, backoff, retries, sync mode, and filtering.

use std::time::Duration;

use grab_ia::{Config, Engine, Status};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_until<F>(engine: &Engine, mut predicate: F, timeout: Duration)
where
    F: FnMut(&grab_ia::Stats) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = engine.stats().await;
        if predicate(&stats) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}, last stats: {stats:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_file_happy_path_downloads_and_verifies() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/demo-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                {"name": "a.txt", "size": 3, "md5": "900150983cd24fb0d6963f7d28e17f72"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/demo-item/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .mount(&server)
        .await;

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .max_workers(2)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine.start(vec!["demo-item".to_string()]).await.unwrap();

    wait_until(
        &engine,
        |s| !s.scanner_active && s.items_done >= 1,
        Duration::from_secs(10),
    )
    .await;

    engine.stop().await;

    let content = tokio::fs::read_to_string(out_dir.path().join("demo-item/a.txt"))
        .await
        .unwrap();
    assert_eq!(content, "abc");

    let record = engine
        .database()
        .get("demo-item", "a.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, Status::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumes_a_partial_download_via_range() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    // "abcdef", md5 of the full body.
    let full_md5 = format!("{:x}", md5::compute(b"abcdef"));

    Mock::given(method("GET"))
        .and(path("/metadata/resume-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"name": "b.txt", "size": 6, "md5": full_md5}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/resume-item/b.txt"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(b"def".to_vec())
                .insert_header("content-range", "bytes 3-5/6"),
        )
        .mount(&server)
        .await;

    let item_dir = out_dir.path().join("resume-item");
    tokio::fs::create_dir_all(&item_dir).await.unwrap();
    tokio::fs::write(item_dir.join("b.txt.part"), b"abc")
        .await
        .unwrap();

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .max_workers(1)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine
        .start(vec!["resume-item".to_string()])
        .await
        .unwrap();

    wait_until(
        &engine,
        |s| !s.scanner_active && (s.items_done >= 1 || s.failed_files >= 1),
        Duration::from_secs(10),
    )
    .await;

    engine.stop().await;

    let content = tokio::fs::read_to_string(item_dir.join("b.txt"))
        .await
        .unwrap();
    assert_eq!(content, "abcdef");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_pressure_triggers_backoff_and_exhausts_retries() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/throttled-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"name": "c.txt", "size": 3}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/throttled-item/c.txt"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .max_workers(1)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine
        .start(vec!["throttled-item".to_string()])
        .await
        .unwrap();

    // The backoff window is 30-60s per trigger, far too long to wait out
    // three times in a test; just confirm the first 429 is recognized and
    // routed into the retry path, then shut down without waiting it out.
    wait_until(
        &engine,
        |s| s.backoff_active,
        Duration::from_secs(10),
    )
    .await;

    let record = engine
        .database()
        .get("throttled-item", "c.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, Status::Retrying);
    assert_eq!(record.attempt_count, 1);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn md5_mismatch_is_retried_then_marked_failed() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/corrupt-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"name": "d.txt", "size": 3, "md5": "0000000000000000000000000000000"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/corrupt-item/d.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .mount(&server)
        .await;

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .max_workers(1)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine
        .start(vec!["corrupt-item".to_string()])
        .await
        .unwrap();

    wait_until(&engine, |s| s.failed_files >= 1, Duration::from_secs(60)).await;

    let record = engine
        .database()
        .get("corrupt-item", "d.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.attempt_count, 3);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_mode_skips_a_file_already_verified_on_disk() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/sync-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                {"name": "e.txt", "size": 3, "md5": "900150983cd24fb0d6963f7d28e17f72"}
            ]
        })))
        .mount(&server)
        .await;

    // No /download mock registered at all: the only way the file ends up
    // `done` is via the sync fast-path recognizing the on-disk MD5 match.

    let item_dir = out_dir.path().join("sync-item");
    tokio::fs::create_dir_all(&item_dir).await.unwrap();
    tokio::fs::write(item_dir.join("e.txt"), b"abc").await.unwrap();

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .sync_mode(true)
        .max_workers(1)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine.start(vec!["sync-item".to_string()]).await.unwrap();

    wait_until(
        &engine,
        |s| !s.scanner_active && s.items_done >= 1,
        Duration::from_secs(10),
    )
    .await;

    engine.stop().await;

    let record = engine
        .database()
        .get("sync-item", "e.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, Status::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metadata_only_filter_keeps_xml_and_json_but_drops_media() {
    let server = MockServer::start().await;
    let out_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/mixed-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                {"name": "mixed_meta.xml", "size": 10},
                {"name": "notes.json", "size": 5},
                {"name": "movie.mp4", "size": 1000},
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/mixed-item/notes.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .mount(&server)
        .await;

    let config = Config::builder(out_dir.path())
        .api_base_url(server.uri())
        .metadata_only(true)
        .max_workers(1)
        .build()
        .unwrap();

    let engine = Engine::new(config).await.unwrap();
    engine.start(vec!["mixed-item".to_string()]).await.unwrap();

    wait_until(&engine, |s| !s.scanner_active, Duration::from_secs(10)).await;
    wait_until(&engine, |s| s.total_files >= 1, Duration::from_secs(10)).await;

    engine.stop().await;

    // mixed_meta.xml is a system file (`_meta.xml` suffix) and is dropped
    // regardless of the metadata-only filter; only notes.json survives.
    let stats = engine.stats().await;
    assert_eq!(stats.total_files, 1);

    assert!(engine
        .database()
        .get("mixed-item", "notes.json")
        .await
        .unwrap()
        .is_some());
    assert!(engine
        .database()
        .get("mixed-item", "movie.mp4")
        .await
        .unwrap()
        .is_none());
}
