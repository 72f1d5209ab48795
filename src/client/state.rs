//! 熔断 / 缓存状态及其持久化
//!
//! 状态归客户端实例所有；持久化通过 ClientStatePersistence 注入，测试用 MemoryPersistence，
//! 二进制用 JsonFilePersistence（`breaker.json` / `cache.json`）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::breaker::Breaker;
use crate::client::cache::CacheEntry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    /// 工具名 → 熔断器
    pub breakers: HashMap<String, Breaker>,
    /// 缓存键 → 条目
    pub cache: HashMap<String, CacheEntry>,
}

impl ClientState {
    pub fn breaker_mut(&mut self, tool: &str) -> &mut Breaker {
        self.breakers.entry(tool.to_string()).or_default()
    }

    /// 加载后整理：遗留的 half_open 退回 open
    pub fn settle(mut self) -> Self {
        for breaker in self.breakers.values_mut() {
            breaker.settle_after_load();
        }
        self
    }
}

pub trait ClientStatePersistence: Send + Sync {
    fn load(&self) -> anyhow::Result<ClientState>;

    fn save(&self, state: &ClientState) -> anyhow::Result<()>;
}

/// 进程内持久化：保存最后一次写入的副本
#[derive(Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<ClientState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<ClientState> {
        self.saved.lock().ok().and_then(|s| s.clone())
    }
}

impl ClientStatePersistence for MemoryPersistence {
    fn load(&self) -> anyhow::Result<ClientState> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, state: &ClientState) -> anyhow::Result<()> {
        let mut slot = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory persistence poisoned"))?;
        *slot = Some(state.clone());
        Ok(())
    }
}

/// 目录下两个 JSON 文件；文件损坏时告警并从空状态开始
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn breaker_path(&self) -> PathBuf {
        self.dir.join("breaker.json")
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join("cache.json")
    }
}

impl ClientStatePersistence for JsonFilePersistence {
    fn load(&self) -> anyhow::Result<ClientState> {
        Ok(ClientState {
            breakers: read_or_default(&self.breaker_path()),
            cache: read_or_default(&self.cache_path()),
        })
    }

    fn save(&self, state: &ClientState) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_json(&self.breaker_path(), &state.breakers)?;
        write_json(&self.cache_path(), &state.cache)?;
        Ok(())
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(data) = std::fs::read_to_string(path) else {
        return T::default();
    };
    match serde_json::from_str(&data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "client state unreadable, starting empty");
            T::default()
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
