//! Hive - 黑板式多 Agent 调度
//!
//! 入口：初始化日志、加载配置、构建工具 / 客户端 / handler，创建或续跑黑板，驱动调度器直到停止，
//! 最后写一份 final 快照。第一个命令行参数可指定额外的配置文件。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::agents::reference_handlers;
use hive::blackboard::{FileStateStore, StateStore, StoreOptions};
use hive::client::{CallClient, JsonFilePersistence};
use hive::config::load_config;
use hive::core::{Clock, SystemClock};
use hive::supervisor::Supervisor;
use hive::tools::builtin_registry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let base = cfg.app.base_dir.clone();
    std::fs::create_dir_all(&base).context("Failed to create base dir")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tools = builtin_registry(&cfg.tools, &base, &cfg.app.output_prefix, clock.clone());
    let registry = cfg.registry.build().context("Invalid tool registry")?;
    let state_dir = cfg
        .client
        .state_dir
        .clone()
        .unwrap_or_else(|| base.join("client_state"));
    let client = CallClient::builder(registry)
        .config(cfg.client.client_config())
        .persistence(Arc::new(JsonFilePersistence::new(state_dir)))
        .clock(clock.clone())
        .local_tools(Arc::new(tools))
        .build()
        .context("Failed to build call client")?;
    let client = Arc::new(client);

    // 健康检查：每个 server 一次 list_tools
    for server in client.server_ids() {
        match client.list_tools(&server).await {
            Ok(s) => tracing::info!(server = %server, latency_ms = s.latency_ms, "server healthy"),
            Err(f) => tracing::warn!(server = %server, code = %f.code, error = %f.message, "server unhealthy"),
        }
    }

    let options = StoreOptions::new(&base)
        .fresh(cfg.app.fresh)
        .output_prefix(cfg.app.output_prefix.clone())
        .clock(clock);
    let mut store =
        FileStateStore::create(options, cfg.task.task_spec()).context("Failed to open blackboard")?;

    let supervisor = Supervisor::new(reference_handlers(client.clone()));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current tick");
                cancel.cancel();
            }
        });
    }

    let outcome = supervisor.run(&mut store, &cancel).await?;
    let snapshot = store.snapshot("final")?;

    println!("status: {}", outcome.reason);
    println!("ticks: {}", outcome.ticks);
    for artifact in &store.run().artifacts {
        println!("{}: {}", artifact.kind, artifact.path);
    }
    println!("snapshot: {}", snapshot.display());
    Ok(())
}
