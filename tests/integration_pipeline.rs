//! End-to-end pipeline scenarios: artifact download, staging, port
//! negotiation, child launch and readiness, against a mocked upgrade API and
//! a scripted server payload.

#![cfg(unix)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use launchpad::config::{LauncherConfig, UpdatePolicy};
use launchpad::events::{ChannelSink, ShellEvent};
use launchpad::fetch::ArtifactFetcher;
use launchpad::net::{self, ReadinessProbe};
use launchpad::orchestrator::Orchestrator;
use launchpad::process::ProcessSupervisor;
use launchpad::remote::RemoteVersionClient;
use launchpad::store::VersionStore;

/// Payload script: records the negotiated port, then stays alive.
const SERVER_SCRIPT: &str = "#!/bin/sh\necho \"$PORT\" > port.txt\nsleep 30\n";

fn server_archive(marker: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("server/index.sh", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(SERVER_SCRIPT.as_bytes()).unwrap();
    writer
        .start_file("server/version.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(marker.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Pick a port the OS just handed out and release it for the scenario. The
/// ephemeral allocator will not hand the same port out again right away, so
/// this avoids colliding with anything else running on the host.
async fn reserve_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Reserve a run of three consecutive ports: the first two stay bound so the
/// scan has to walk past them, the third is verified free for the child.
async fn reserve_port_run() -> (u16, TcpListener, TcpListener) {
    loop {
        let start = reserve_port().await;
        if start > u16::MAX - 2 {
            continue;
        }
        let Ok(a) = TcpListener::bind(("127.0.0.1", start)).await else {
            continue;
        };
        let Ok(b) = TcpListener::bind(("127.0.0.1", start + 1)).await else {
            continue;
        };
        if !net::is_port_free(start + 2).await {
            continue;
        }
        return (start, a, b);
    }
}

fn test_config(app_dir: &Path, api: &str, port: u16, policy: UpdatePolicy) -> LauncherConfig {
    LauncherConfig {
        access_key: "test-ak".to_string(),
        access_secret: "test-sk".to_string(),
        artifact_key: "fk".to_string(),
        target_url: format!("http://127.0.0.1:{port}"),
        update_policy: policy,
        app_dir: Some(app_dir.to_path_buf()),
        upgrade_api: api.to_string(),
        entrypoint: "server/index.sh".to_string(),
        runtime: Some("/bin/sh".to_string()),
        ..Default::default()
    }
}

fn fast_probe() -> ReadinessProbe {
    ReadinessProbe {
        max_retries: 30,
        attempt_timeout: Duration::from_millis(500),
        retry_delay: Duration::from_millis(250),
    }
}

async fn build_orchestrator_with_probe(
    config: LauncherConfig,
    probe: ReadinessProbe,
) -> (Orchestrator, Arc<Mutex<ProcessSupervisor>>) {
    let (tx, _rx) = std::sync::mpsc::channel();
    let sink = Arc::new(ChannelSink::new(tx));
    let store = VersionStore::load(&config.store_path()).await.unwrap();
    let client = RemoteVersionClient::new(
        config.upgrade_api.clone(),
        config.access_key.clone(),
        config.access_secret.clone(),
    );
    let fetcher = ArtifactFetcher::new(sink.clone(), config.allow_insecure_retry);
    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(sink.clone())));
    let orchestrator = Orchestrator::new(
        config,
        store,
        client,
        fetcher,
        Arc::clone(&supervisor),
        probe,
        sink,
    );
    (orchestrator, supervisor)
}

async fn build_orchestrator(
    config: LauncherConfig,
) -> (Orchestrator, Arc<Mutex<ProcessSupervisor>>) {
    build_orchestrator_with_probe(config, fast_probe()).await
}

/// Answer HTTP 200 on `port`, binding only after the orchestrator has had
/// time to negotiate the port (it must look free at negotiation time).
fn spawn_delayed_responder(port: u16) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await else {
            return;
        };
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        }
    });
}

async fn recorded_port(config: &LauncherConfig) -> String {
    let path = config.staging_dir().join("server/port.txt");
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    content.trim().to_string()
}

#[tokio::test]
#[serial_test::serial]
async fn scenario_first_run_downloads_base_artifact_and_launches() {
    let app_dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/file/download"))
        .and(query_param("fileKey", "fk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(server_archive("base")))
        .expect(1)
        .mount(&api)
        .await;

    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::OnStart);
    let (mut orchestrator, _supervisor) = build_orchestrator(config.clone()).await;
    spawn_delayed_responder(port);

    let final_url = orchestrator.run().await.unwrap();
    // The desired port was free: the configured URL is handed back
    // unmodified.
    assert_eq!(final_url, format!("http://127.0.0.1:{port}"));
    assert_eq!(recorded_port(&config).await, port.to_string());
    assert!(orchestrator.store().server_running());
    assert_eq!(orchestrator.store().final_url(), Some(final_url.as_str()));
    assert_eq!(orchestrator.store().artifact_version(), 1);
    assert!(config.archive_path().exists());

    orchestrator.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn scenario_equal_remote_version_launches_without_refetch() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v3"))
        .await
        .unwrap();

    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/file/upgrade"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 200,
            "data": { "versionCode": 3, "urlPath": "unused" }
        })))
        .expect(1)
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/file/download"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&api)
        .await;

    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::OnStart);

    // Pre-seed the store at version 3.
    let mut store = VersionStore::load(&config.store_path()).await.unwrap();
    store.bump_artifact_version(3);
    store.save().await.unwrap();

    let (mut orchestrator, _supervisor) = build_orchestrator(config.clone()).await;
    spawn_delayed_responder(port);

    let final_url = orchestrator.run().await.unwrap();
    assert_eq!(final_url, format!("http://127.0.0.1:{port}"));
    assert_eq!(orchestrator.store().artifact_version(), 3);
    assert!(orchestrator.store().server_running());

    orchestrator.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn scenario_occupied_ports_rewrite_the_final_url() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v1"))
        .await
        .unwrap();

    // Desired port and its successor are taken.
    let (start, _a, _b) = reserve_port_run().await;
    let free = start + 2;

    let api = MockServer::start().await;
    let config = test_config(app_dir.path(), &api.uri(), start, UpdatePolicy::Never);
    let (mut orchestrator, _supervisor) = build_orchestrator(config.clone()).await;
    spawn_delayed_responder(free);

    let final_url = orchestrator.run().await.unwrap();
    assert_eq!(final_url, format!("http://127.0.0.1:{free}/"));
    assert_eq!(recorded_port(&config).await, free.to_string());
    assert_eq!(orchestrator.store().final_url(), Some(final_url.as_str()));

    orchestrator.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn newer_remote_version_wipes_and_restages_before_launch() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v1"))
        .await
        .unwrap();

    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/file/upgrade"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 200,
            "data": {
                "versionCode": 2,
                "urlPath": format!("{}/dist-2.zip", api.uri()),
                "promptUpgradeContent": "v2"
            }
        })))
        .expect(1)
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/dist-2.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(server_archive("v2")))
        .expect(1)
        .mount(&api)
        .await;

    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::OnStart);

    // A stale staged tree that must disappear with the wipe.
    let staging = config.staging_dir();
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("stale.txt"), b"leftover").await.unwrap();

    let (mut orchestrator, _supervisor) = build_orchestrator(config.clone()).await;
    spawn_delayed_responder(port);

    orchestrator.run().await.unwrap();

    assert_eq!(orchestrator.store().artifact_version(), 2);
    assert!(!staging.join("stale.txt").exists());
    let marker = tokio::fs::read_to_string(staging.join("server/version.txt"))
        .await
        .unwrap();
    assert_eq!(marker, "v2");

    // The bumped version survives a reload from disk.
    let reloaded = VersionStore::load(&config.store_path()).await.unwrap();
    assert_eq!(reloaded.artifact_version(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn missing_entrypoint_after_staging_is_fatal() {
    let app_dir = TempDir::new().unwrap();

    // Archive without a server entry point.
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("readme.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"no server here").unwrap();
    let broken = writer.finish().unwrap().into_inner();
    tokio::fs::write(app_dir.path().join("dist.zip"), broken)
        .await
        .unwrap();

    let api = MockServer::start().await;
    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::Never);
    let (mut orchestrator, _supervisor) = build_orchestrator(config).await;

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(
        err,
        launchpad::core::LaunchError::EntrypointMissing { .. }
    ));
    assert!(!orchestrator.store().server_running());
}

#[tokio::test]
#[serial_test::serial]
async fn shutdown_request_during_launch_stops_the_child() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v1"))
        .await
        .unwrap();

    let api = MockServer::start().await;
    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::Never);
    let (mut orchestrator, supervisor) = build_orchestrator(config.clone()).await;

    // Nothing ever answers the probe, so the shutdown request arrives while
    // the pipeline is still waiting for readiness with the child running.
    let outcome = orchestrator
        .run_until_shutdown(async {
            tokio::time::sleep(Duration::from_millis(3500)).await;
        })
        .await
        .unwrap();

    assert_eq!(outcome, None);
    assert!(!supervisor.lock().await.is_running());
    // The child really was spawned before the interrupt.
    assert_eq!(recorded_port(&config).await, port.to_string());
    assert!(!orchestrator.store().server_running());
}

#[tokio::test]
#[serial_test::serial]
async fn failed_readiness_stops_the_child_gracefully() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v1"))
        .await
        .unwrap();

    let api = MockServer::start().await;
    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::Never);
    let probe = ReadinessProbe {
        max_retries: 3,
        attempt_timeout: Duration::from_millis(200),
        retry_delay: Duration::from_millis(100),
    };
    let (mut orchestrator, supervisor) = build_orchestrator_with_probe(config, probe).await;

    let err = orchestrator
        .run_until_shutdown(std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        launchpad::core::LaunchError::ReadinessTimeout { attempts: 3, .. }
    ));
    assert!(!supervisor.lock().await.is_running());
}

#[tokio::test]
async fn log_lines_flow_to_the_injected_sink() {
    let app_dir = TempDir::new().unwrap();
    tokio::fs::write(app_dir.path().join("dist.zip"), server_archive("v1"))
        .await
        .unwrap();

    let api = MockServer::start().await;
    let port = reserve_port().await;
    let config = test_config(app_dir.path(), &api.uri(), port, UpdatePolicy::Never);

    let (tx, rx) = std::sync::mpsc::channel();
    let sink = Arc::new(ChannelSink::new(tx));
    let store = VersionStore::load(&config.store_path()).await.unwrap();
    let client = RemoteVersionClient::new(config.upgrade_api.clone(), "ak", "sk");
    let fetcher = ArtifactFetcher::new(sink.clone(), true);
    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(sink.clone())));
    let mut orchestrator = Orchestrator::new(
        config,
        store,
        client,
        fetcher,
        supervisor,
        fast_probe(),
        sink,
    );

    spawn_delayed_responder(port);
    orchestrator.run().await.unwrap();
    orchestrator.shutdown().await;

    let lines: Vec<String> = rx
        .try_iter()
        .filter_map(|event| match event {
            ShellEvent::Log(line) => Some(line),
            ShellEvent::Progress(_) => None,
        })
        .collect();
    assert!(
        lines.iter().any(|l| l.contains("server is ready")),
        "pipeline log lines missing: {lines:?}"
    );
}
