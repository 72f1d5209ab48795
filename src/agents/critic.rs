//! Critic：读取目标文件，按 rubric（最大词数、最少引用数）打分，写出 review

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::support::{count_urls, sandbox_relative, ToolSession};
use crate::blackboard::{NewArtifact, StateStore, SubtaskOutput, SubtaskStatus, SubtaskUpdate};
use crate::client::CallClient;
use crate::supervisor::Handler;

const ROLE: &str = "critic";

pub struct Critic {
    client: Arc<CallClient>,
}

impl Critic {
    pub fn new(client: Arc<CallClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Verdict {
    pub words: usize,
    pub citations: usize,
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn pass(&self) -> bool {
        self.reasons.is_empty()
    }
}

pub(crate) fn grade(text: &str, max_words: Option<u64>, min_citations: u64) -> Verdict {
    let words = text.split_whitespace().count();
    let citations = count_urls(text);
    let mut reasons = Vec::new();
    if let Some(max) = max_words {
        if words as u64 > max {
            reasons.push(format!("word_count {words} > {max}"));
        }
    }
    if (citations as u64) < min_citations {
        reasons.push(format!("citations {citations} < {min_citations}"));
    }
    Verdict {
        words,
        citations,
        reasons,
    }
}

fn review_text(target: &str, v: &Verdict, max_words: Option<u64>, min_citations: u64) -> String {
    format!(
        "# Review of {target}\n- exists: yes\n- word_count: {}\n- citations: {}\n- max_words: {}\n- min_citations: {min_citations}\n- result: {}\n",
        v.words,
        v.citations,
        max_words.map(|m| m.to_string()).unwrap_or_else(|| "n/a".into()),
        if v.pass() { "PASS" } else { "FAIL" },
    )
}

#[async_trait]
impl Handler for Critic {
    fn role(&self) -> &str {
        ROLE
    }

    async fn handle(&self, store: &mut dyn StateStore, subtask_id: &str) -> anyhow::Result<()> {
        let st = store.subtask(subtask_id)?;
        let target = st.input_str("target_path").unwrap_or("out/mcp.md").to_string();
        let out_rel = st.input_str("out_path").unwrap_or("review.md").to_string();
        let rubric = st.input.get("rubric").cloned().unwrap_or(Value::Null);
        let max_words = rubric.get("max_words").and_then(Value::as_u64);
        let min_citations = rubric.get("min_citations").and_then(Value::as_u64).unwrap_or(0);
        let prefix = store.output_root().prefix().to_string();

        let session = ToolSession {
            client: &self.client,
            role: ROLE,
            subtask: subtask_id,
        };

        let read = session
            .call(store, "file_read_safe", json!({ "path": sandbox_relative(&target, &prefix) }))
            .await?;
        let text = match read {
            Ok(s) => s
                .result
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Err(f) => return session.fail(store, "review_error", &format!("read failed: {}", f.message)),
        };

        let verdict = grade(&text, max_words, min_citations);
        let written = session
            .write_locked(store, &out_rel, &review_text(&target, &verdict, max_words, min_citations))
            .await?;
        let out_path = match written {
            Ok(s) => match s.result.get("path").and_then(Value::as_str) {
                Some(p) => p.to_string(),
                None => return session.fail(store, "review_error", "write failed: no path in response"),
            },
            Err(f) => return session.fail(store, "review_error", &format!("write failed: {}", f.message)),
        };

        let name = out_rel.rsplit('/').next().unwrap_or(&out_rel).to_string();
        let aid = store.add_artifact(NewArtifact::new("review", name, &out_path, ROLE))?;
        let summary = format!(
            "Review {}: {}",
            if verdict.pass() { "PASS" } else { "FAIL" },
            if verdict.pass() { "ok".to_string() } else { verdict.reasons.join(", ") }
        );
        let now = store.now();
        store.update_subtask(
            subtask_id,
            SubtaskUpdate::status(SubtaskStatus::Done)
                .with_output(SubtaskOutput {
                    summary: summary.clone(),
                    artifacts: vec![aid.clone()],
                    citations: Vec::new(),
                })
                .finished(now),
        )?;
        store.add_message(ROLE, "review_result", &summary, vec![subtask_id.to_string(), aid])?;
        Ok(())
    }
}
