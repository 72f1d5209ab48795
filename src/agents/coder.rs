//! Coder：读 notes，把要点压缩成限定词数的摘要并附最多两条出处，写到 out_path

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::support::{extract_urls, sandbox_relative, ToolSession};
use crate::blackboard::{NewArtifact, StateStore, SubtaskOutput, SubtaskStatus, SubtaskUpdate};
use crate::client::CallClient;
use crate::supervisor::Handler;

const ROLE: &str = "coder";

pub struct Coder {
    client: Arc<CallClient>,
}

impl Coder {
    pub fn new(client: Arc<CallClient>) -> Self {
        Self { client }
    }
}

/// 取 `- ` 开头的行作为要点，截断到 max_words 个词，再追加出处行
pub(crate) fn summarize(notes: &str, max_words: usize) -> (String, Vec<String>) {
    let bullets: Vec<&str> = notes
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("- "))
        .map(|l| l.trim_start_matches(['-', ' ']).trim())
        .collect();
    let words: Vec<&str> = bullets.iter().flat_map(|b| b.split_whitespace()).collect();
    let mut summary = words
        .iter()
        .take(max_words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let cites = extract_urls(notes, 2);
    if !cites.is_empty() {
        summary.push_str("\n\nSources: ");
        summary.push_str(&cites.join("; "));
    }
    summary.push('\n');
    (summary, cites)
}

#[async_trait]
impl Handler for Coder {
    fn role(&self) -> &str {
        ROLE
    }

    async fn handle(&self, store: &mut dyn StateStore, subtask_id: &str) -> anyhow::Result<()> {
        let st = store.subtask(subtask_id)?;
        let out_rel = st.input_str("out_path").unwrap_or("mcp.md").to_string();
        let source_path = st.input_str("source_path").map(String::from);
        let summary_words = st.input_u64("summary_words").unwrap_or(120) as usize;
        let content = st.input_str("content").map(String::from);
        let prefix = store.output_root().prefix().to_string();

        let session = ToolSession {
            client: &self.client,
            role: ROLE,
            subtask: subtask_id,
        };

        let (text, citations) = match source_path {
            Some(source) => {
                let rel = sandbox_relative(&source, &prefix);
                let read = session
                    .call(store, "file_read_safe", json!({ "path": rel }))
                    .await?;
                let notes = match read {
                    Ok(s) => s
                        .result
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    Err(f) => {
                        return session.fail(store, "derive_error", &format!("read failed: {}", f.message))
                    }
                };
                summarize(&notes, summary_words)
            }
            None => (content.unwrap_or_else(|| "Hello from Coder!\n".to_string()), Vec::new()),
        };

        let written = session.write_locked(store, &out_rel, &text).await?;
        let out_path = match written {
            Ok(s) => match s.result.get("path").and_then(Value::as_str) {
                Some(p) => p.to_string(),
                None => return session.fail(store, "derive_error", "write failed: no path in response"),
            },
            Err(f) => return session.fail(store, "derive_error", &format!("write failed: {}", f.message)),
        };

        let name = out_rel.rsplit('/').next().unwrap_or(&out_rel).to_string();
        let aid = store.add_artifact(NewArtifact::new("derived", name, &out_path, ROLE))?;
        let now = store.now();
        store.update_subtask(
            subtask_id,
            SubtaskUpdate::status(SubtaskStatus::Done)
                .with_output(SubtaskOutput {
                    summary: format!("Wrote {out_path}"),
                    artifacts: vec![aid.clone()],
                    citations,
                })
                .finished(now),
        )?;
        store.add_message(
            ROLE,
            "derive_result",
            &format!("Created {out_path}"),
            vec![subtask_id.to_string(), aid],
        )?;
        Ok(())
    }
}
