//! 黑板数据模型
//!
//! Run 是唯一的持久化根：任务说明、子任务、产物、消息、事件日志、锁、计数器都挂在它下面，
//! 每次变更整体序列化写盘。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 记录格式版本
pub const RECORD_VERSION: &str = "1";

/// 任务说明：目标、约束、验收谓词与预算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub goal: String,
    /// 自由格式约束（如 paths_allowed、max_file_kb），调度器不解释
    #[serde(default)]
    pub constraints: Value,
    #[serde(default)]
    pub acceptance: Vec<AcceptanceCheck>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub notes: String,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            constraints: Value::Null,
            acceptance: Vec::new(),
            budget: Budget::default(),
            notes: String::new(),
        }
    }

    pub fn with_acceptance(mut self, check: AcceptanceCheck) -> Self {
        self.acceptance.push(check);
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }
}

/// 验收谓词：由调度器对外部文件系统求值，而不是对黑板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptanceCheck {
    /// base_dir 下是否存在该相对路径的文件
    FileExists { path: String },
}

/// 资源预算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

fn default_max_steps() -> u64 {
    200
}

fn default_max_tool_calls() -> u64 {
    50
}

fn default_max_seconds() -> u64 {
    300
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_calls: default_max_tool_calls(),
            max_seconds: default_max_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Queued,
    InProgress,
    Done,
    Failed,
}

impl SubtaskStatus {
    /// 终态：done / failed
    pub fn is_terminal(self) -> bool {
        matches!(self, SubtaskStatus::Done | SubtaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutput {
    pub summary: String,
    /// 产物 id 列表
    pub artifacts: Vec<String>,
    pub citations: Vec<String>,
}

/// 可调度的工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    /// 负责的 handler 角色
    pub owner: String,
    /// 由对应 handler 解释的类型标签
    pub kind: String,
    pub status: SubtaskStatus,
    pub input: Value,
    pub output: SubtaskOutput,
    pub attempts: u32,
    pub depends_on: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// 读取 input 中的字符串字段
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// 读取 input 中的整数字段
    pub fn input_u64(&self, key: &str) -> Option<u64> {
        self.input.get(key).and_then(Value::as_u64)
    }

    fn trace(&self) -> SubtaskTrace {
        SubtaskTrace {
            status: self.status,
            attempts: self.attempts,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// update_subtask 的合并字段；None 表示保持原值
#[derive(Debug, Clone, Default)]
pub struct SubtaskUpdate {
    pub status: Option<SubtaskStatus>,
    pub attempts: Option<u32>,
    pub output: Option<SubtaskOutput>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubtaskUpdate {
    pub fn status(status: SubtaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_output(mut self, output: SubtaskOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn finished(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    /// 合并到子任务上，返回变更前后的追踪字段
    pub(crate) fn apply(self, st: &mut Subtask) -> Delta {
        let before = st.trace();
        if let Some(status) = self.status {
            st.status = status;
        }
        if let Some(attempts) = self.attempts {
            st.attempts = attempts;
        }
        if let Some(output) = self.output {
            st.output = output;
        }
        if let Some(at) = self.started_at {
            st.started_at = Some(at);
        }
        if let Some(at) = self.finished_at {
            st.finished_at = Some(at);
        }
        Delta {
            before,
            after: st.trace(),
        }
    }
}

/// 已登记的产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// 相对 base_dir，且以输出前缀开头（如 out/notes.md）
    pub path: String,
    pub content_ref: Option<String>,
    pub owner: String,
    pub version: u32,
}

/// add_artifact 的入参
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub kind: String,
    pub name: String,
    pub path: String,
    pub content_ref: Option<String>,
    pub owner: String,
}

impl NewArtifact {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            path: path.into(),
            content_ref: None,
            owner: owner.into(),
        }
    }
}

/// Agent 间通信日志（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub refs: Vec<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Checkpoint,
    StateChange,
    Io,
    Message,
}

/// 子任务变更前后的状态追踪字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskTrace {
    pub status: SubtaskStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub before: SubtaskTrace,
    pub after: SubtaskTrace,
}

/// 因果事件日志条目，供回放与审计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub actor: String,
    pub description: String,
    pub refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    pub at: DateTime<Utc>,
}

/// 各类 id 的单调计数器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub e: u64,
    pub st: u64,
    pub m: u64,
    pub a: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum IdKind {
    Event,
    Subtask,
    Message,
    Artifact,
}

impl Counters {
    pub(crate) fn next(&mut self, kind: IdKind) -> String {
        let (prefix, counter) = match kind {
            IdKind::Event => ("e", &mut self.e),
            IdKind::Subtask => ("st", &mut self.st),
            IdKind::Message => ("m", &mut self.m),
            IdKind::Artifact => ("a", &mut self.a),
        };
        *counter += 1;
        format!("{prefix}-{:03}", *counter)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// 已执行的调度步数（派发或规划）
    pub steps: u64,
    pub tool_calls: u64,
}

/// 一次执行上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task: TaskSpec,
    pub subtasks: Vec<Subtask>,
    pub artifacts: Vec<Artifact>,
    pub messages: Vec<Message>,
    pub events: Vec<Event>,
    /// 资源 key -> 持有者角色
    pub locks: BTreeMap<String, String>,
    pub metrics: Metrics,
    pub counters: Counters,
}

impl Run {
    pub(crate) fn new(run_id: String, task: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            version: RECORD_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            task,
            subtasks: Vec::new(),
            artifacts: Vec::new(),
            messages: Vec::new(),
            events: Vec::new(),
            locks: BTreeMap::new(),
            metrics: Metrics::default(),
            counters: Counters::default(),
        }
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|st| st.id == id)
    }

    pub(crate) fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|st| st.id == id)
    }

    /// 可运行：status == queued 且所有依赖均为 done（未知依赖视为未完成）
    pub fn is_runnable(&self, st: &Subtask) -> bool {
        st.status == SubtaskStatus::Queued
            && st.depends_on.iter().all(|dep| {
                self.subtask(dep)
                    .map(|d| d.status == SubtaskStatus::Done)
                    .unwrap_or(false)
            })
    }

    /// 按创建顺序返回第一个可运行的子任务
    pub fn first_runnable(&self) -> Option<&Subtask> {
        self.subtasks.iter().find(|st| self.is_runnable(st))
    }

    pub fn has_artifact_type(&self, kind: &str) -> bool {
        self.artifacts.iter().any(|a| a.kind == kind)
    }

    pub fn last_artifact_of_type(&self, kind: &str) -> Option<&Artifact> {
        self.artifacts.iter().rev().find(|a| a.kind == kind)
    }

    pub fn has_subtask_kind(&self, kind: &str) -> bool {
        self.subtasks.iter().any(|st| st.kind == kind)
    }

    /// 产出某个产物的子任务（output.artifacts 中包含该 id）
    pub fn producer_of(&self, artifact_id: &str) -> Option<&Subtask> {
        self.subtasks
            .iter()
            .find(|st| st.output.artifacts.iter().any(|a| a == artifact_id))
    }

    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    pub fn lock_owner(&self, key: &str) -> Option<&str> {
        self.locks.get(key).map(String::as_str)
    }
}
