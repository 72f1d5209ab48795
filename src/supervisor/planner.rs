//! 计划规则
//!
//! 有序的 PlanRule 列表；调度器在没有可运行子任务时取第一条适用的规则追加一个子任务。
//! 规则适用条件：前置产物类型已在本次运行中出现、尚无该 kind 的子任务、尚无其产出类型的产物。

use serde_json::{json, Value};

use crate::blackboard::Run;

type InputBuilder = Box<dyn Fn(&Run) -> Value + Send + Sync>;

pub struct PlanRule {
    pub kind: String,
    pub owner: String,
    /// 前置产物类型；None 表示随时可用（种子规则）
    pub requires: Option<String>,
    pub produces: String,
    build_input: InputBuilder,
}

impl PlanRule {
    pub fn new(
        kind: &str,
        owner: &str,
        produces: &str,
        build_input: impl Fn(&Run) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            owner: owner.to_string(),
            requires: None,
            produces: produces.to_string(),
            build_input: Box::new(build_input),
        }
    }

    pub fn requires(mut self, artifact_type: &str) -> Self {
        self.requires = Some(artifact_type.to_string());
        self
    }

    pub fn applies(&self, run: &Run) -> bool {
        let ready = self
            .requires
            .as_deref()
            .map_or(true, |t| run.has_artifact_type(t));
        ready && !run.has_subtask_kind(&self.kind) && !run.has_artifact_type(&self.produces)
    }

    pub fn input(&self, run: &Run) -> Value {
        (self.build_input)(run)
    }

    /// 依赖产出前置产物的那个子任务
    pub fn depends_on(&self, run: &Run) -> Vec<String> {
        self.requires
            .as_deref()
            .and_then(|t| run.last_artifact_of_type(t))
            .and_then(|a| run.producer_of(&a.id))
            .map(|st| vec![st.id.clone()])
            .unwrap_or_default()
    }

    /// plan 消息正文
    pub fn describe(&self, run: &Run) -> String {
        match self
            .requires
            .as_deref()
            .and_then(|t| run.last_artifact_of_type(t))
        {
            Some(a) => format!("Queued {} from {}", self.kind, a.path),
            None => format!("Seeded {}", self.kind),
        }
    }
}

fn last_path(run: &Run, artifact_type: &str, fallback: &str) -> String {
    run.last_artifact_of_type(artifact_type)
        .map(|a| a.path.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// research → derive → review
pub fn default_rules() -> Vec<PlanRule> {
    vec![
        PlanRule::new("research_request", "researcher", "notes", |run| {
            let topic = run
                .task
                .constraints
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or(&run.task.goal);
            json!({ "topic": topic, "num_sources": 2, "notes_path": "notes.md" })
        }),
        PlanRule::new("derive_request", "coder", "derived", |run| {
            json!({
                "out_path": "mcp.md",
                "source_path": last_path(run, "notes", "out/notes.md"),
                "summary_words": 120
            })
        })
        .requires("notes"),
        PlanRule::new("review_request", "critic", "review", |run| {
            json!({
                "target_path": last_path(run, "derived", "out/mcp.md"),
                "out_path": "review.md",
                "rubric": { "max_words": 120, "min_citations": 2 }
            })
        })
        .requires("derived"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{Artifact, Subtask, SubtaskOutput, SubtaskStatus, TaskSpec};
    use chrono::Utc;

    fn run() -> Run {
        let task = TaskSpec {
            constraints: json!({"topic": "What is MCP?"}),
            ..TaskSpec::new("t", "goal text")
        };
        Run::new("run-test".into(), task, Utc::now())
    }

    fn done_with(run: &mut Run, id: &str, kind: &str, artifact: &str, ty: &str, path: &str) {
        run.subtasks.push(Subtask {
            id: id.into(),
            owner: "x".into(),
            kind: kind.into(),
            status: SubtaskStatus::Done,
            input: json!({}),
            output: SubtaskOutput {
                summary: String::new(),
                artifacts: vec![artifact.into()],
                citations: vec![],
            },
            attempts: 0,
            depends_on: vec![],
            started_at: None,
            finished_at: None,
        });
        run.artifacts.push(Artifact {
            id: artifact.into(),
            kind: ty.into(),
            name: path.rsplit('/').next().unwrap_or(path).into(),
            path: path.into(),
            content_ref: None,
            owner: "x".into(),
            version: 1,
        });
    }

    #[test]
    fn test_first_applicable_rule_in_order() {
        let rules = default_rules();
        let mut run = run();
        let first = rules.iter().find(|r| r.applies(&run)).unwrap();
        assert_eq!(first.kind, "research_request");
        assert!(first.depends_on(&run).is_empty());
        assert_eq!(first.input(&run)["topic"], "What is MCP?");
        assert_eq!(first.describe(&run), "Seeded research_request");

        done_with(&mut run, "st-001", "research_request", "a-001", "notes", "out/notes.md");
        let next = rules.iter().find(|r| r.applies(&run)).unwrap();
        assert_eq!(next.kind, "derive_request");
        assert_eq!(next.depends_on(&run), vec!["st-001".to_string()]);
        assert_eq!(next.input(&run)["source_path"], "out/notes.md");
        assert_eq!(next.describe(&run), "Queued derive_request from out/notes.md");
    }

    #[test]
    fn test_rule_skipped_when_product_exists() {
        let rules = default_rules();
        let mut run = run();
        // 产出已存在（例如手工登记），即便没有对应 kind 的子任务也不再计划
        done_with(&mut run, "st-001", "manual", "a-001", "notes", "out/notes.md");
        assert!(!rules[0].applies(&run));
        assert!(rules[1].applies(&run));
    }
}
