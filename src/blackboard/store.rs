//! 文件持久化黑板
//!
//! 目录布局：
//! - `{base}/blackboard/storage.json`：当前记录（每次变更整体覆盖，临时文件 + rename）
//! - `{base}/blackboard/snapshots/*.json`：时间点副本
//! - `{base}/out/`：产物输出根目录
//!
//! 所有变更先作用在 Run 的副本上，写盘成功后再替换内存状态，因此任何错误都不会留下半成品。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::blackboard::path::OutputRoot;
use crate::blackboard::types::{
    Delta, Event, EventKind, IdKind, Message, NewArtifact, Run, Subtask, SubtaskOutput,
    SubtaskStatus, SubtaskUpdate, TaskSpec, RECORD_VERSION,
};
use crate::blackboard::Artifact;
use crate::core::{Clock, StoreError, SystemClock};

/// 黑板接口：调度器与 handler 共用同一套变更 API
pub trait StateStore: Send {
    fn run(&self) -> &Run;

    /// base_dir：验收谓词相对此目录求值
    fn base_dir(&self) -> &Path;

    fn output_root(&self) -> &OutputRoot;

    fn now(&self) -> DateTime<Utc>;

    fn subtask(&self, id: &str) -> Result<&Subtask, StoreError> {
        self.run()
            .subtask(id)
            .ok_or_else(|| StoreError::NotFound(format!("subtask {id}")))
    }

    fn add_subtask(
        &mut self,
        owner: &str,
        kind: &str,
        input: Value,
        depends_on: Vec<String>,
    ) -> Result<String, StoreError>;

    fn update_subtask(&mut self, id: &str, update: SubtaskUpdate) -> Result<(), StoreError>;

    fn add_artifact(&mut self, artifact: NewArtifact) -> Result<String, StoreError>;

    fn add_message(
        &mut self,
        role: &str,
        kind: &str,
        content: &str,
        refs: Vec<String>,
    ) -> Result<String, StoreError>;

    /// 非阻塞加锁：被其他角色持有时立即返回 LockHeld
    fn lock(&mut self, key: &str, owner: &str) -> Result<(), StoreError>;

    /// 解锁；调用方不是持有者时什么也不做
    fn unlock(&mut self, key: &str, owner: &str) -> Result<(), StoreError>;

    /// 调度步数 +1，返回新值
    fn record_step(&mut self) -> Result<u64, StoreError>;

    fn bump_tool_calls(&mut self, n: u64) -> Result<(), StoreError>;

    /// 写出一份与当前记录分离的副本，不修改当前状态；同名时追加 `-2`、`-3`…
    fn snapshot(&self, label: &str) -> Result<PathBuf, StoreError>;
}

/// 打开 / 创建存储的参数
#[derive(Clone)]
pub struct StoreOptions {
    pub base_dir: PathBuf,
    /// 产物路径前缀（相对 base_dir），默认 out
    pub output_prefix: String,
    /// true：忽略已有记录重新初始化；false：存在则续跑
    pub fresh: bool,
    pub clock: Arc<dyn Clock>,
}

impl StoreOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            output_prefix: "out".to_string(),
            fresh: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// 单文件 JSON 黑板
pub struct FileStateStore {
    base_dir: PathBuf,
    storage_path: PathBuf,
    snapshots_dir: PathBuf,
    output: OutputRoot,
    clock: Arc<dyn Clock>,
    run: Run,
}

impl FileStateStore {
    /// 创建或续跑：fresh 或记录不存在时初始化（写一条 checkpoint 事件），否则加载已有记录
    pub fn create(options: StoreOptions, task: TaskSpec) -> Result<Self, StoreError> {
        let bb_dir = options.base_dir.join("blackboard");
        let snapshots_dir = bb_dir.join("snapshots");
        std::fs::create_dir_all(&snapshots_dir)?;
        let output = OutputRoot::new(&options.base_dir, &options.output_prefix);
        std::fs::create_dir_all(output.out_dir())?;

        let storage_path = bb_dir.join("storage.json");
        let run = if options.fresh || !storage_path.exists() {
            let now = options.clock.now();
            let run_id = format!(
                "run-{}-{}",
                now.format("%Y%m%d-%H%M%S"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            );
            let mut run = Run::new(run_id, task, now);
            push_event(
                &mut run,
                EventKind::Checkpoint,
                "supervisor",
                "Initialized blackboard".to_string(),
                Vec::new(),
                None,
                now,
            );
            write_atomic(&storage_path, &serde_json::to_vec_pretty(&run)?)?;
            tracing::info!(run_id = %run.run_id, path = %storage_path.display(), "blackboard initialized");
            run
        } else {
            let run = load_record(&storage_path)?;
            tracing::info!(run_id = %run.run_id, subtasks = run.subtasks.len(), "blackboard reopened");
            run
        };

        Ok(Self {
            base_dir: options.base_dir,
            storage_path,
            snapshots_dir,
            output,
            clock: options.clock,
            run,
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// 在副本上执行变更并写盘，成功后替换当前状态
    fn commit<T>(
        &mut self,
        f: impl FnOnce(&mut Run, DateTime<Utc>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let now = self.clock.now();
        let mut next = self.run.clone();
        let out = f(&mut next, now)?;
        next.updated_at = now;
        write_atomic(&self.storage_path, &serde_json::to_vec_pretty(&next)?)?;
        self.run = next;
        Ok(out)
    }
}

impl StateStore for FileStateStore {
    fn run(&self) -> &Run {
        &self.run
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn output_root(&self) -> &OutputRoot {
        &self.output
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn add_subtask(
        &mut self,
        owner: &str,
        kind: &str,
        input: Value,
        depends_on: Vec<String>,
    ) -> Result<String, StoreError> {
        self.commit(|run, now| {
            // 依赖只能指向已存在的子任务，因此依赖图天然无环
            if let Some(missing) = depends_on.iter().find(|d| run.subtask(d).is_none()) {
                return Err(StoreError::NotFound(format!("dependency {missing}")));
            }
            let id = run.counters.next(IdKind::Subtask);
            run.subtasks.push(Subtask {
                id: id.clone(),
                owner: owner.to_string(),
                kind: kind.to_string(),
                status: SubtaskStatus::Queued,
                input,
                output: SubtaskOutput::default(),
                attempts: 0,
                depends_on,
                started_at: None,
                finished_at: None,
            });
            push_event(
                run,
                EventKind::StateChange,
                "supervisor",
                format!("Added subtask {id}"),
                vec![id.clone()],
                None,
                now,
            );
            Ok(id)
        })
    }

    fn update_subtask(&mut self, id: &str, update: SubtaskUpdate) -> Result<(), StoreError> {
        self.commit(|run, now| {
            let st = run
                .subtask_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("subtask {id}")))?;
            let delta = update.apply(st);
            let owner = st.owner.clone();
            push_event(
                run,
                EventKind::StateChange,
                &owner,
                format!("Updated subtask {id}"),
                vec![id.to_string()],
                Some(delta),
                now,
            );
            Ok(())
        })
    }

    fn add_artifact(&mut self, artifact: NewArtifact) -> Result<String, StoreError> {
        let path = self.output.validate(&artifact.path)?;
        self.commit(|run, now| {
            let id = run.counters.next(IdKind::Artifact);
            push_event(
                run,
                EventKind::Io,
                &artifact.owner,
                format!("Registered artifact {}", artifact.name),
                vec![id.clone(), path.clone()],
                None,
                now,
            );
            run.artifacts.push(Artifact {
                id: id.clone(),
                kind: artifact.kind,
                name: artifact.name,
                path,
                content_ref: artifact.content_ref,
                owner: artifact.owner,
                version: 1,
            });
            Ok(id)
        })
    }

    fn add_message(
        &mut self,
        role: &str,
        kind: &str,
        content: &str,
        refs: Vec<String>,
    ) -> Result<String, StoreError> {
        self.commit(|run, now| {
            let id = run.counters.next(IdKind::Message);
            let mut event_refs = vec![id.clone()];
            event_refs.extend(refs.iter().cloned());
            run.messages.push(Message {
                id: id.clone(),
                role: role.to_string(),
                kind: kind.to_string(),
                content: content.to_string(),
                refs,
                ts: now,
            });
            push_event(
                run,
                EventKind::Message,
                role,
                format!("{kind}: {content}"),
                event_refs,
                None,
                now,
            );
            Ok(id)
        })
    }

    fn lock(&mut self, key: &str, owner: &str) -> Result<(), StoreError> {
        match self.run.lock_owner(key) {
            Some(holder) if holder == owner => return Ok(()),
            Some(holder) => {
                return Err(StoreError::LockHeld {
                    key: key.to_string(),
                    owner: holder.to_string(),
                })
            }
            None => {}
        }
        self.commit(|run, now| {
            run.locks.insert(key.to_string(), owner.to_string());
            push_event(
                run,
                EventKind::StateChange,
                owner,
                format!("Lock acquired: {key}"),
                vec![key.to_string()],
                None,
                now,
            );
            Ok(())
        })
    }

    fn unlock(&mut self, key: &str, owner: &str) -> Result<(), StoreError> {
        if self.run.lock_owner(key) != Some(owner) {
            return Ok(());
        }
        self.commit(|run, now| {
            run.locks.remove(key);
            push_event(
                run,
                EventKind::StateChange,
                owner,
                format!("Lock released: {key}"),
                vec![key.to_string()],
                None,
                now,
            );
            Ok(())
        })
    }

    fn record_step(&mut self) -> Result<u64, StoreError> {
        self.commit(|run, _| {
            run.metrics.steps += 1;
            Ok(run.metrics.steps)
        })
    }

    fn bump_tool_calls(&mut self, n: u64) -> Result<(), StoreError> {
        self.commit(|run, _| {
            run.metrics.tool_calls += n;
            Ok(())
        })
    }

    fn snapshot(&self, label: &str) -> Result<PathBuf, StoreError> {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let stamp = self.clock.now().format("%Y%m%d-%H%M%S%.3f");
        let mut path = self.snapshots_dir.join(format!("{stamp}-{label}.json"));
        let mut n = 1;
        while path.exists() {
            n += 1;
            path = self.snapshots_dir.join(format!("{stamp}-{label}-{n}.json"));
        }
        write_atomic(&path, &serde_json::to_vec_pretty(&self.run)?)?;
        tracing::info!(path = %path.display(), "snapshot written");
        Ok(path)
    }
}

fn push_event(
    run: &mut Run,
    kind: EventKind,
    actor: &str,
    description: String,
    refs: Vec<String>,
    delta: Option<Delta>,
    at: DateTime<Utc>,
) {
    let id = run.counters.next(IdKind::Event);
    run.events.push(Event {
        id,
        kind,
        actor: actor.to_string(),
        description,
        refs,
        delta,
        at,
    });
}

fn load_record(path: &Path) -> Result<Run, StoreError> {
    let data = std::fs::read_to_string(path)?;
    let run: Run = serde_json::from_str(&data).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if run.version != RECORD_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported record version {}", run.version),
        });
    }
    Ok(run)
}

/// 临时文件 + rename，避免写到一半的记录
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, data)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::AcceptanceCheck;
    use crate::core::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    fn task() -> TaskSpec {
        TaskSpec::new("t-1", "write notes").with_acceptance(AcceptanceCheck::FileExists {
            path: "out/notes.md".into(),
        })
    }

    fn fresh_store(dir: &TempDir) -> FileStateStore {
        FileStateStore::create(StoreOptions::new(dir.path()).fresh(true), task()).unwrap()
    }

    fn reload(dir: &TempDir) -> FileStateStore {
        FileStateStore::create(StoreOptions::new(dir.path()), task()).unwrap()
    }

    #[test]
    fn test_create_writes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let run = store.run();
        assert!(run.subtasks.is_empty() && run.artifacts.is_empty() && run.messages.is_empty());
        assert_eq!(run.counters.st, 0);
        assert_eq!(run.events.len(), 1);
        assert_eq!(run.events[0].kind, EventKind::Checkpoint);
        assert!(dir.path().join("blackboard/storage.json").exists());
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn test_reopen_continues_existing_run() {
        let dir = TempDir::new().unwrap();
        let run_id = {
            let mut store = fresh_store(&dir);
            store
                .add_subtask("researcher", "research_request", json!({"topic": "x"}), vec![])
                .unwrap();
            store.run().run_id.clone()
        };
        let mut store = reload(&dir);
        assert_eq!(store.run().run_id, run_id);
        assert_eq!(store.run().subtasks.len(), 1);
        // 计数器随记录持久化，不会复用 id
        let id = store
            .add_subtask("coder", "derive_request", json!({}), vec![])
            .unwrap();
        assert_eq!(id, "st-002");
    }

    #[test]
    fn test_fresh_discards_existing_run() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = fresh_store(&dir);
            store
                .add_subtask("researcher", "research_request", json!({}), vec![])
                .unwrap();
        }
        let store = fresh_store(&dir);
        assert!(store.run().subtasks.is_empty());
    }

    #[test]
    fn test_corrupt_record_is_fatal() {
        let dir = TempDir::new().unwrap();
        fresh_store(&dir);
        std::fs::write(dir.path().join("blackboard/storage.json"), "{not json").unwrap();
        let err = FileStateStore::create(StoreOptions::new(dir.path()), task())
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_add_and_update_subtask_events() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let id = store
            .add_subtask("researcher", "research_request", json!({}), vec![])
            .unwrap();
        assert_eq!(id, "st-001");
        let st = store.subtask(&id).unwrap();
        assert_eq!(st.status, SubtaskStatus::Queued);
        assert_eq!(st.attempts, 0);

        let now = store.now();
        store
            .update_subtask(
                &id,
                SubtaskUpdate::status(SubtaskStatus::Done)
                    .with_attempts(1)
                    .finished(now),
            )
            .unwrap();

        let run = store.run();
        let last = run.events.last().unwrap();
        assert_eq!(last.kind, EventKind::StateChange);
        assert_eq!(last.actor, "researcher");
        let delta = last.delta.as_ref().unwrap();
        assert_eq!(delta.before.status, SubtaskStatus::Queued);
        assert_eq!(delta.after.status, SubtaskStatus::Done);
        assert_eq!(delta.after.attempts, 1);
        assert_eq!(run.events_of(EventKind::StateChange).count(), 2);
    }

    #[test]
    fn test_update_unknown_subtask_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let before = store.run().clone();
        let err = store
            .update_subtask("st-042", SubtaskUpdate::status(SubtaskStatus::Done))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.run(), &before);
        assert_eq!(reload(&dir).run(), &before);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let err = store
            .add_subtask("coder", "derive_request", json!({}), vec!["st-009".into()])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.run().subtasks.is_empty());
    }

    #[test]
    fn test_runnable_follows_dependency_updates() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let a = store.add_subtask("r", "k", json!({}), vec![]).unwrap();
        let b = store.add_subtask("r", "k", json!({}), vec![a.clone()]).unwrap();
        assert_eq!(store.run().first_runnable().unwrap().id, a);

        store
            .update_subtask(&a, SubtaskUpdate::status(SubtaskStatus::InProgress))
            .unwrap();
        assert!(store.run().first_runnable().is_none());

        store
            .update_subtask(&a, SubtaskUpdate::status(SubtaskStatus::Failed))
            .unwrap();
        assert!(store.run().first_runnable().is_none());

        store
            .update_subtask(&a, SubtaskUpdate::status(SubtaskStatus::Done))
            .unwrap();
        assert_eq!(store.run().first_runnable().unwrap().id, b);
    }

    #[test]
    fn test_add_artifact_validates_path() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let before = store.run().clone();

        let err = store
            .add_artifact(NewArtifact::new("notes", "p", "a/../../etc/passwd", "researcher"))
            .unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        let err = store
            .add_artifact(NewArtifact::new("notes", "n", "notes.md", "researcher"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Shape(_)));
        assert_eq!(store.run(), &before);

        let id = store
            .add_artifact(NewArtifact::new("notes", "notes.md", "out/notes.md", "researcher"))
            .unwrap();
        let run = store.run();
        assert_eq!(id, "a-001");
        assert_eq!(run.artifacts[0].version, 1);
        assert_eq!(run.events.last().unwrap().kind, EventKind::Io);
        assert_eq!(
            run.events.last().unwrap().refs,
            vec!["a-001".to_string(), "out/notes.md".to_string()]
        );
    }

    #[test]
    fn test_add_message_appends_message_event() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        let id = store
            .add_message("supervisor", "plan", "Seeded research", vec!["st-001".into()])
            .unwrap();
        let run = store.run();
        assert_eq!(run.messages.len(), 1);
        let event = run.events.last().unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.refs, vec![id, "st-001".to_string()]);
        assert_eq!(event.description, "plan: Seeded research");
    }

    #[test]
    fn test_lock_contention() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        store.lock("x", "roleA").unwrap();
        let err = store.lock("x", "roleB").unwrap_err();
        assert!(matches!(err, StoreError::LockHeld { ref owner, .. } if owner == "roleA"));

        // 非持有者解锁无效
        let events = store.run().events.len();
        store.unlock("x", "roleB").unwrap();
        assert_eq!(store.run().lock_owner("x"), Some("roleA"));
        assert_eq!(store.run().events.len(), events);

        store.unlock("x", "roleA").unwrap();
        store.lock("x", "roleB").unwrap();
        assert_eq!(store.run().lock_owner("x"), Some("roleB"));
    }

    #[test]
    fn test_relock_by_holder_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        store.lock("x", "roleA").unwrap();
        let events = store.run().events.len();
        store.lock("x", "roleA").unwrap();
        assert_eq!(store.run().events.len(), events);
    }

    #[test]
    fn test_mutations_touch_updated_at() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::default();
        let mut store = FileStateStore::create(
            StoreOptions::new(dir.path())
                .fresh(true)
                .clock(Arc::new(clock.clone())),
            task(),
        )
        .unwrap();
        let created = store.run().updated_at;
        clock.advance_secs(5);
        store.add_message("r", "status", "hi", vec![]).unwrap();
        assert_eq!((store.run().updated_at - created).num_seconds(), 5);
        assert_eq!(store.run().created_at, created);
    }

    #[test]
    fn test_snapshot_is_separate_copy() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        store.add_message("r", "status", "before", vec![]).unwrap();
        let before = store.run().clone();
        let path = store.snapshot("mid run").unwrap();
        assert!(path.starts_with(dir.path().join("blackboard/snapshots")));
        assert!(path.to_string_lossy().ends_with("-mid-run.json"));
        assert_eq!(store.run(), &before);

        store.add_message("r", "status", "after", vec![]).unwrap();
        let snap: Run = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(store.run().messages.len(), 2);
    }

    #[test]
    fn test_snapshots_with_same_stamp_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(Utc::now());
        let mut store = FileStateStore::create(
            StoreOptions::new(dir.path()).fresh(true).clock(Arc::new(clock)),
            task(),
        )
        .unwrap();
        let first = store.snapshot("final").unwrap();
        store.add_message("r", "status", "later", vec![]).unwrap();
        let second = store.snapshot("final").unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-final-2.json"));
        let a: Run = serde_json::from_str(&std::fs::read_to_string(&first).unwrap()).unwrap();
        let b: Run = serde_json::from_str(&std::fs::read_to_string(&second).unwrap()).unwrap();
        assert!(a.messages.is_empty());
        assert_eq!(b.messages.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_artifact_through_outside_symlink_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        std::fs::create_dir_all(dir.path().join("outside")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside"), dir.path().join("out/link")).unwrap();
        let before = store.run().clone();
        let err = store
            .add_artifact(NewArtifact::new("notes", "new.md", "out/link/new.md", "researcher"))
            .unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        assert_eq!(store.run(), &before);
    }

    #[test]
    fn test_metrics_counters() {
        let dir = TempDir::new().unwrap();
        let mut store = fresh_store(&dir);
        assert_eq!(store.record_step().unwrap(), 1);
        assert_eq!(store.record_step().unwrap(), 2);
        store.bump_tool_calls(3).unwrap();
        assert_eq!(reload(&dir).run().metrics.tool_calls, 3);
    }
}
