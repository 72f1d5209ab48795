//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__CLIENT__REQUEST_TIMEOUT_SECS=5`）。

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::blackboard::{AcceptanceCheck, Budget, TaskSpec};
use crate::client::{
    BreakerConfig, CacheConfig, ClientConfig, EndpointRegistry, RegistryError, ServerSpec,
    ToolSpec,
};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub client: ClientSection,
    pub tools: ToolsSection,
    pub task: TaskSection,
    pub registry: RegistrySection,
}

/// [app] 段：工作目录、输出前缀、是否重新开始
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 黑板、产物、客户端状态都放在这里
    pub base_dir: PathBuf,
    pub output_prefix: String,
    /// false 时续跑已有记录
    pub fresh: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("workspace"),
            output_prefix: "out".to_string(),
            fresh: true,
        }
    }
}

/// [client] 段：熔断、缓存、超时、状态目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub breaker_threshold: usize,
    pub breaker_window_secs: i64,
    pub breaker_cooldown_secs: i64,
    pub cache_ttl_secs: i64,
    /// 允许缓存的只读工具
    pub cache_tools: Vec<String>,
    pub request_timeout_secs: u64,
    /// 熔断 / 缓存状态目录；未设置时为 `{base_dir}/client_state`
    pub state_dir: Option<PathBuf>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            breaker_threshold: 3,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
            cache_ttl_secs: 60,
            cache_tools: vec!["web_search".into(), "search_local_docs".into()],
            request_timeout_secs: 10,
            state_dir: None,
        }
    }
}

impl ClientSection {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            breaker: BreakerConfig {
                threshold: self.breaker_threshold,
                window: chrono::Duration::seconds(self.breaker_window_secs),
                cooldown: chrono::Duration::seconds(self.breaker_cooldown_secs),
            },
            cache: CacheConfig {
                ttl: chrono::Duration::seconds(self.cache_ttl_secs),
                tools: self.cache_tools.iter().cloned().collect::<HashSet<_>>(),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// [tools] 段：进程内工具的文档目录与每分钟限额
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// search_local_docs 的搜索目录（相对 base_dir 或绝对路径）
    pub docs_dirs: Vec<PathBuf>,
    pub rate_limits: RateLimitSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            docs_dirs: vec![PathBuf::from("docs")],
            rate_limits: RateLimitSection::default(),
        }
    }
}

/// [tools.rate_limits] 段：每个工具每分钟的调用上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub file_write_safe: u32,
    pub file_read_safe: u32,
    pub search_local_docs: u32,
    pub web_search: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            file_write_safe: 60,
            file_read_safe: 120,
            search_local_docs: 10,
            web_search: 3,
        }
    }
}

/// [task] 段：本次运行的任务说明
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskSection {
    pub id: String,
    pub goal: String,
    pub topic: String,
    pub acceptance: Vec<AcceptanceCheck>,
    pub budget: Budget,
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            id: "hive-rdr".to_string(),
            goal: "Research, derive and review via tool servers".to_string(),
            topic: "What is MCP?".to_string(),
            acceptance: vec![
                AcceptanceCheck::FileExists {
                    path: "out/mcp.md".into(),
                },
                AcceptanceCheck::FileExists {
                    path: "out/review.md".into(),
                },
            ],
            budget: Budget {
                max_steps: 80,
                max_tool_calls: 50,
                max_seconds: 300,
            },
        }
    }
}

impl TaskSection {
    pub fn task_spec(&self) -> TaskSpec {
        TaskSpec {
            constraints: json!({
                "topic": self.topic,
                "paths_allowed": ["out/**"],
                "max_file_kb": 256
            }),
            acceptance: self.acceptance.clone(),
            budget: self.budget.clone(),
            ..TaskSpec::new(self.id.clone(), self.goal.clone())
        }
    }
}

/// [registry] 段：`[[registry.servers]]` 与 `[[registry.tools]]`；都为空时使用内置进程内 server
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RegistrySection {
    pub servers: Vec<ServerSpec>,
    pub tools: Vec<ToolSpec>,
}

impl RegistrySection {
    pub fn build(&self) -> Result<EndpointRegistry, RegistryError> {
        if self.servers.is_empty() && self.tools.is_empty() {
            return Ok(EndpointRegistry::builtin());
        }
        EndpointRegistry::new(self.servers.clone(), self.tools.clone())
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
