use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use pretty_assertions::assert_eq;
use reveille_core::models::{AlarmId, DeviceId, SyncState};
use reveille_core::events::HubFrame;
use reveille_core::queue::QUEUE_STATE_KEY;
use reveille_core::services::StateStore;
use reveille_core::sync::{SyncLedger, SYNC_STATE_KEY};
use reveille_core::transport::{Transport, TransportError, TransportLink};
use serde_json::json;

use crate::cli::{Cli, Commands};
use crate::commands::common::{
    format_queue_lines, format_status_lines, format_timestamp, load_local_state, status_items,
};
use crate::commands::sync::sync_once;
use crate::config::{CliConfig, ENV_AUTH_TOKEN, ENV_DB_PATH, ENV_HUB_URL, ENV_USER_ID};
use crate::error::CliError;
use crate::runtime::{load_device_id, open_state, Runtime, DEVICE_ID_KEY};

fn temp_config(dir: &tempfile::TempDir) -> CliConfig {
    CliConfig {
        db_path: Some(dir.path().join("reveille.db")),
        ..CliConfig::default()
    }
}

fn hub_config(dir: &tempfile::TempDir) -> CliConfig {
    CliConfig {
        auth_token: Some("token".to_string()),
        user_id: Some("user-1".to_string()),
        ..temp_config(dir)
    }
}

/// In-process hub that answers `RequestSync` with `SyncComplete` when `confirm` is set
struct FakeHub {
    confirm: bool,
}

#[async_trait]
impl Transport for FakeHub {
    async fn open(&self, _auth_token: &str) -> Result<TransportLink, TransportError> {
        let (link, mut from_client, to_client) = TransportLink::pair();
        let confirm = self.confirm;
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                if confirm && frame.target == "RequestSync" {
                    let _ = to_client.send(HubFrame::new(
                        "SyncComplete",
                        json!({
                            "userId": "user-1",
                            "deviceId": "hub",
                            "timestamp": 1_700_000_000_000_i64,
                            "type": "sync_completed",
                            "syncType": "all"
                        }),
                    ));
                }
            }
        });
        Ok(link)
    }
}

#[test]
fn env_overrides_file_values_and_ignores_blanks() {
    let mut config = CliConfig {
        hub_url: Some("wss://file.example.com/hub".to_string()),
        user_id: Some("from-file".to_string()),
        ..CliConfig::default()
    };
    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_HUB_URL, " wss://env.example.com/hub "),
        (ENV_AUTH_TOKEN, "token-abc"),
        (ENV_USER_ID, "   "),
        (ENV_DB_PATH, "/tmp/reveille-test.db"),
    ]);

    config.apply_env(|key| env.get(key).map(ToString::to_string));

    assert_eq!(config.hub_url.as_deref(), Some("wss://env.example.com/hub"));
    assert_eq!(config.auth_token.as_deref(), Some("token-abc"));
    assert_eq!(config.user_id.as_deref(), Some("from-file"));
    assert_eq!(config.db_path, Some(PathBuf::from("/tmp/reveille-test.db")));
}

#[test]
fn flags_override_env() {
    let mut config = CliConfig {
        hub_url: Some("wss://env.example.com/hub".to_string()),
        ..CliConfig::default()
    };
    config.apply_flags(
        Some("ws://localhost:5000/hub".to_string()),
        Some(PathBuf::from("local.db")),
    );
    assert_eq!(config.hub_url.as_deref(), Some("ws://localhost:5000/hub"));
    assert_eq!(config.db_path, Some(PathBuf::from("local.db")));

    config.apply_flags(Some("  ".to_string()), None);
    assert_eq!(config.hub_url.as_deref(), Some("ws://localhost:5000/hub"));
}

#[test]
fn debug_output_redacts_auth_token() {
    let config = CliConfig {
        auth_token: Some("super-secret".to_string()),
        ..CliConfig::default()
    };
    let rendered = format!("{config:?}");
    assert!(rendered.contains("<redacted>"));
    assert!(!rendered.contains("super-secret"));
}

#[test]
fn load_from_path_normalizes_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        json!({
            "hubUrl": " wss://hub.example.com/alarms ",
            "userId": "user-1",
            "deviceName": "  ",
            "sync": { "conflictWindowMs": 10000 }
        })
        .to_string(),
    )
    .unwrap();

    let config = CliConfig::load_from_path(&path).unwrap();
    assert_eq!(config.hub_url.as_deref(), Some("wss://hub.example.com/alarms"));
    assert_eq!(config.device_name, None);
    assert_eq!(config.sync.conflict_window_ms, 10_000);
    assert_eq!(config.sync.heartbeat_interval_secs, 30);

    std::fs::write(&path, r#"{"sync": {"heartbeatIntervalSecs": 0}}"#).unwrap();
    assert!(matches!(
        CliConfig::load_from_path(&path),
        Err(CliError::SyncConfig(_))
    ));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        CliConfig::load_from_path(&path),
        Err(CliError::Config(_))
    ));
}

#[test]
fn explicit_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    assert!(matches!(
        CliConfig::load(Some(&missing)),
        Err(CliError::Config(_))
    ));
}

#[test]
fn cli_parses_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "reveille",
        "status",
        "--json",
        "--db-path",
        "alarms.db",
        "-v",
    ])
    .unwrap();

    assert!(matches!(cli.command, Commands::Status { json: true }));
    assert_eq!(cli.db_path, Some(PathBuf::from("alarms.db")));
    assert!(cli.verbose);
    assert!(Cli::try_parse_from(["reveille"]).is_err());
}

#[tokio::test]
async fn device_id_is_generated_once_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reveille.db");

    let first = {
        let (_db, state) = open_state(&db_path).unwrap();
        load_device_id(&state).await.unwrap()
    };
    let (_db, state) = open_state(&db_path).unwrap();
    let second = load_device_id(&state).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        state.load(DEVICE_ID_KEY).await.unwrap().as_deref(),
        Some(first.as_str())
    );
}

#[tokio::test]
async fn blank_stored_device_id_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, state) = open_state(&dir.path().join("reveille.db")).unwrap();
    state.save(DEVICE_ID_KEY, "  ").await.unwrap();

    let id = load_device_id(&state).await.unwrap();
    assert!(!id.as_str().trim().is_empty());
}

#[tokio::test]
async fn runtime_requires_hub_url_and_user() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = temp_config(&dir);
    config.hub_url = Some("ws://localhost:5000/hub".to_string());

    assert!(matches!(
        Runtime::build(&config).await,
        Err(CliError::HubNotConfigured)
    ));
}

#[tokio::test]
async fn local_state_reads_ledger_and_tolerates_bad_queue() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir);

    let mut ledger = SyncLedger::default();
    let status = ledger.status_mut(&AlarmId::new("wake-up"));
    status.state = SyncState::Synced;
    status.version = 3;
    status.last_sync_time = 1_700_000_000_000;
    status.last_modified_by = Some(DeviceId::new("device-b"));
    ledger.record_device_sync(&DeviceId::new("device-b"), true, 1_700_000_000_000);
    ledger.last_full_sync = Some(1_700_000_000_000);
    {
        let (_db, state) = open_state(&config.resolve_db_path().unwrap()).unwrap();
        state
            .save(SYNC_STATE_KEY, &ledger.encode().unwrap())
            .await
            .unwrap();
        state.save(QUEUE_STATE_KEY, "[{\"broken\":").await.unwrap();
    }

    let (loaded, queue) = load_local_state(&config).await.unwrap();
    assert_eq!(loaded, ledger);
    assert!(queue.is_empty());

    let items = status_items(&loaded);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].alarm_id, "wake-up");
    assert_eq!(items[0].version, 3);
    assert_eq!(items[0].last_modified_by.as_deref(), Some("device-b"));

    let lines = format_status_lines(&loaded);
    assert_eq!(lines[0], "Last full sync: 2023-11-14 22:13:20 UTC");
    assert!(lines[1].starts_with("wake-up"));
    assert!(lines[1].contains("synced"));
    assert!(lines.iter().any(|line| line.contains("device-b online")));
}

#[tokio::test]
async fn empty_database_reports_nothing_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let (ledger, queue) = load_local_state(&temp_config(&dir)).await.unwrap();

    assert_eq!(
        format_status_lines(&ledger),
        vec!["Last full sync: never", "No alarms tracked yet."]
    );
    assert!(format_queue_lines(&queue).is_empty());
}

#[test]
fn queue_lines_show_action_and_kind() {
    let operations: Vec<reveille_core::queue::QueuedOperation> = serde_json::from_value(json!([
        {
            "id": "alarm-event-update-1700000000000",
            "action": "update",
            "entityKind": "alarm-event",
            "payload": { "alarmId": "wake-up" },
            "enqueuedAt": 1_700_000_000_000_i64
        }
    ]))
    .unwrap();

    let lines = format_queue_lines(&operations);
    assert_eq!(
        lines,
        vec!["alarm-event-update-1700000000000 update alarm-event  queued 2023-11-14 22:13:20 UTC"]
    );
}

#[test]
fn unset_timestamps_render_as_never() {
    assert_eq!(format_timestamp(0), "never");
    assert_eq!(format_timestamp(-5), "never");
}

#[test]
fn sync_timeout_defaults_and_overrides() {
    let cli = Cli::try_parse_from(["reveille", "sync"]).unwrap();
    assert!(matches!(cli.command, Commands::Sync { timeout: 30 }));
    let cli = Cli::try_parse_from(["reveille", "sync", "--timeout", "5"]).unwrap();
    assert!(matches!(cli.command, Commands::Sync { timeout: 5 }));
}

#[tokio::test]
async fn sync_waits_for_hub_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::with_transport(&hub_config(&dir), Arc::new(FakeHub { confirm: true }))
        .await
        .unwrap();

    let report = sync_once(&runtime, Duration::from_secs(10)).await.unwrap();

    assert!(report.confirmed);
    assert!(report.last_full_sync.is_some());
    assert_eq!(report.queued, 0);
    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sync_reports_unconfirmed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::with_transport(&hub_config(&dir), Arc::new(FakeHub { confirm: false }))
        .await
        .unwrap();

    let report = sync_once(&runtime, Duration::from_secs(5)).await.unwrap();

    assert!(!report.confirmed);
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn sync_without_token_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = hub_config(&dir);
    config.auth_token = None;
    let runtime = Runtime::with_transport(&config, Arc::new(FakeHub { confirm: true }))
        .await
        .unwrap();

    assert!(matches!(
        sync_once(&runtime, Duration::from_secs(1)).await,
        Err(CliError::HubUnavailable)
    ));
    runtime.shutdown().await.unwrap();
}
