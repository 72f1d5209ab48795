//! 端到端：内置工具 + 调用客户端 + 参考 handler 跑完 research → derive → review

use std::sync::Arc;

use hive::agents::reference_handlers;
use hive::blackboard::{EventKind, FileStateStore, StateStore, StoreOptions, SubtaskStatus};
use hive::client::{CallClient, EndpointRegistry, JsonFilePersistence};
use hive::config::AppConfig;
use hive::core::SystemClock;
use hive::supervisor::{Directive, StopReason, Supervisor};
use hive::tools::builtin_registry;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn client(dir: &TempDir, cfg: &AppConfig) -> Arc<CallClient> {
    let tools = builtin_registry(&cfg.tools, dir.path(), "out", Arc::new(SystemClock));
    let client = CallClient::builder(EndpointRegistry::builtin())
        .config(cfg.client.client_config())
        .persistence(Arc::new(JsonFilePersistence::new(
            dir.path().join("client_state"),
        )))
        .local_tools(Arc::new(tools))
        .build()
        .unwrap();
    Arc::new(client)
}

fn open(dir: &TempDir, cfg: &AppConfig, fresh: bool) -> FileStateStore {
    FileStateStore::create(
        StoreOptions::new(dir.path()).fresh(fresh),
        cfg.task.task_spec(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_full_run_reaches_acceptance() {
    let dir = TempDir::new().unwrap();
    let cfg = AppConfig::default();
    let mut store = open(&dir, &cfg, true);
    let sup = Supervisor::new(reference_handlers(client(&dir, &cfg)));

    for tick in 1..=6 {
        assert_eq!(
            sup.tick(&mut store).await.unwrap(),
            Directive::Continue,
            "tick {tick}"
        );
    }
    assert_eq!(
        sup.tick(&mut store).await.unwrap(),
        Directive::Stop(StopReason::Ok)
    );

    let run = store.run();
    let kinds: Vec<&str> = run.artifacts.iter().map(|a| a.kind.as_str()).collect();
    assert_eq!(kinds, vec!["notes", "derived", "review"]);
    assert!(run.subtasks.iter().all(|s| s.status == SubtaskStatus::Done));
    assert!(run.locks.is_empty());
    assert!(run.events_of(EventKind::Io).count() >= 3);
    assert!(run.events_of(EventKind::StateChange).count() >= 6);
    assert!(run.metrics.tool_calls >= 5);

    let review = std::fs::read_to_string(dir.path().join("out/review.md")).unwrap();
    assert!(review.contains("- result: PASS"), "{review}");
    let derived = std::fs::read_to_string(dir.path().join("out/mcp.md")).unwrap();
    assert!(derived.contains("Sources: https://"));
    assert!(dir.path().join("client_state/cache.json").exists());

    // 验收已满足后再 tick 不产生任何变更
    let before = std::fs::read_to_string(store.storage_path()).unwrap();
    assert_eq!(
        sup.tick(&mut store).await.unwrap(),
        Directive::Stop(StopReason::Ok)
    );
    assert_eq!(std::fs::read_to_string(store.storage_path()).unwrap(), before);
}

#[tokio::test]
async fn test_resume_after_acceptance_stops_immediately() {
    let dir = TempDir::new().unwrap();
    let cfg = AppConfig::default();
    {
        let mut store = open(&dir, &cfg, true);
        let outcome = Supervisor::new(reference_handlers(client(&dir, &cfg)))
            .run(&mut store, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.reason, StopReason::Ok);
    }

    let mut store = open(&dir, &cfg, false);
    let run_id = store.run().run_id.clone();
    let outcome = Supervisor::new(reference_handlers(client(&dir, &cfg)))
        .run(&mut store, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Ok);
    assert_eq!(outcome.ticks, 1);
    assert_eq!(store.run().run_id, run_id);
    assert_eq!(store.run().subtasks.len(), 3);
}

#[tokio::test]
async fn test_snapshot_copies_record() {
    let dir = TempDir::new().unwrap();
    let cfg = AppConfig::default();
    let mut store = open(&dir, &cfg, true);
    Supervisor::new(reference_handlers(client(&dir, &cfg)))
        .run(&mut store, &CancellationToken::new())
        .await
        .unwrap();
    let snap = store.snapshot("final").unwrap();
    assert_eq!(
        std::fs::read_to_string(&snap).unwrap(),
        std::fs::read_to_string(store.storage_path()).unwrap()
    );
}
