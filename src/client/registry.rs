//! 静态工具注册表：工具名 → (server id, 参数形状)，server id → 端点
//!
//! 从配置加载，客户端构造时解析一次；运行期间不变。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate server id: {0}")]
    DuplicateServer(String),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("tool {tool} refers to unknown server {server}")]
    UnknownServer { tool: String, server: String },

    #[error("server {0} is in_process but no local tools were supplied")]
    MissingLocalTools(String),
}

/// 端点描述；`transport` 字段区分类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum EndpointSpec {
    InProcess,
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: String,
    #[serde(flatten)]
    pub endpoint: EndpointSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub server: String,
    /// 参数名 → 类型说明，仅作声明
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ToolSpec {
    pub fn new(name: &str, server: &str) -> Self {
        Self {
            name: name.to_string(),
            server: server.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, ty: &str) -> Self {
        self.params.insert(name.to_string(), ty.to_string());
        self
    }
}

/// 已校验的注册表
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    servers: BTreeMap<String, EndpointSpec>,
    tools: HashMap<String, ToolSpec>,
}

impl EndpointRegistry {
    pub fn new(servers: Vec<ServerSpec>, tools: Vec<ToolSpec>) -> Result<Self, RegistryError> {
        let mut by_id = BTreeMap::new();
        for s in servers {
            if by_id.contains_key(&s.id) {
                return Err(RegistryError::DuplicateServer(s.id));
            }
            by_id.insert(s.id, s.endpoint);
        }
        let mut by_name = HashMap::new();
        for t in tools {
            if !by_id.contains_key(&t.server) {
                return Err(RegistryError::UnknownServer {
                    tool: t.name,
                    server: t.server,
                });
            }
            if by_name.contains_key(&t.name) {
                return Err(RegistryError::DuplicateTool(t.name));
            }
            by_name.insert(t.name.clone(), t);
        }
        Ok(Self {
            servers: by_id,
            tools: by_name,
        })
    }

    /// 单个进程内 server（id `local`）承载全部内置工具
    pub fn builtin() -> Self {
        let servers = vec![ServerSpec {
            id: "local".into(),
            endpoint: EndpointSpec::InProcess,
        }];
        let tools = default_tools("local");
        Self::new(servers, tools).unwrap_or_default()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn endpoint(&self, server_id: &str) -> Option<&EndpointSpec> {
        self.servers.get(server_id)
    }

    pub fn servers(&self) -> impl Iterator<Item = (&String, &EndpointSpec)> {
        self.servers.iter()
    }

    pub fn tools_of(&self, server_id: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .values()
            .filter(|t| t.server == server_id)
            .map(|t| t.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// 内置工具的声明
pub fn default_tools(server: &str) -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("file_write_safe", server)
            .param("path", "string")
            .param("text", "string"),
        ToolSpec::new("file_read_safe", server).param("path", "string"),
        ToolSpec::new("search_local_docs", server)
            .param("query", "string")
            .param("top_k", "integer"),
        ToolSpec::new("web_search", server)
            .param("query", "string")
            .param("top_k", "integer"),
    ]
}
