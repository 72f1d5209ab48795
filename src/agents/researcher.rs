//! Researcher：先查 web_search，没有结果再查本地文档，写出带来源列表的 notes

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::support::ToolSession;
use crate::blackboard::{NewArtifact, StateStore, SubtaskOutput, SubtaskStatus, SubtaskUpdate};
use crate::client::CallClient;
use crate::supervisor::Handler;

const ROLE: &str = "researcher";

const BULLETS: [&str; 3] = [
    "MCP standardizes how AI apps/agents connect to tools.",
    "It defines message schemas and transport for plug-and-play tools.",
    "Benefits include portability and safer, auditable tool use.",
];

const FALLBACK_SOURCES: [&str; 2] = [
    "https://github.com/modelcontextprotocol/spec",
    "https://openai.com/index/model-context-protocol/",
];

pub struct Researcher {
    client: Arc<CallClient>,
}

impl Researcher {
    pub fn new(client: Arc<CallClient>) -> Self {
        Self { client }
    }
}

fn hits_of(result: &Value) -> Vec<Value> {
    result
        .get("hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn notes_text(topic: &str, urls: &[String]) -> String {
    let mut lines = vec![format!("# Notes: {topic}"), String::new()];
    lines.extend(BULLETS.iter().map(|b| format!("- {b}")));
    lines.push(String::new());
    lines.push("Sources:".to_string());
    lines.extend(urls.iter().map(|u| format!("- {u}")));
    lines.join("\n") + "\n"
}

#[async_trait]
impl Handler for Researcher {
    fn role(&self) -> &str {
        ROLE
    }

    async fn handle(&self, store: &mut dyn StateStore, subtask_id: &str) -> anyhow::Result<()> {
        let st = store.subtask(subtask_id)?;
        let topic = st.input_str("topic").unwrap_or("What is MCP?").to_string();
        let num_sources = st.input_u64("num_sources").unwrap_or(2) as usize;
        let notes_rel = st.input_str("notes_path").unwrap_or("notes.md").to_string();
        let top_k = num_sources.max(2);

        let session = ToolSession {
            client: &self.client,
            role: ROLE,
            subtask: subtask_id,
        };

        let web = session
            .call(store, "web_search", json!({ "query": topic.to_lowercase(), "top_k": top_k }))
            .await?;
        let mut hits = web.map(|s| hits_of(&s.result)).unwrap_or_default();

        if hits.is_empty() {
            let docs = session
                .call(store, "search_local_docs", json!({ "query": topic, "top_k": top_k }))
                .await?;
            hits = docs
                .map(|s| hits_of(&s.result))
                .unwrap_or_default()
                .into_iter()
                .map(|h| {
                    let path = h.get("path").and_then(Value::as_str).unwrap_or_default();
                    json!({ "title": path, "url": format!("file://{path}"), "snippet": h.get("snippet") })
                })
                .collect();
        }

        let mut urls: Vec<String> = hits
            .iter()
            .filter_map(|h| h.get("url").and_then(Value::as_str))
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
        if urls.is_empty() {
            urls = FALLBACK_SOURCES
                .iter()
                .take(num_sources)
                .map(|u| u.to_string())
                .collect();
        }

        let written = session
            .write_locked(store, &notes_rel, &notes_text(&topic, &urls))
            .await?;
        let out_path = match written {
            Ok(s) => match s.result.get("path").and_then(Value::as_str) {
                Some(p) => p.to_string(),
                None => return session.fail(store, "research_error", "write failed: no path in response"),
            },
            Err(f) => return session.fail(store, "research_error", &format!("write failed: {}", f.message)),
        };

        let name = notes_rel.rsplit('/').next().unwrap_or(&notes_rel).to_string();
        let aid = store.add_artifact(NewArtifact::new("notes", name, &out_path, ROLE))?;
        let now = store.now();
        store.update_subtask(
            subtask_id,
            SubtaskUpdate::status(SubtaskStatus::Done)
                .with_output(SubtaskOutput {
                    summary: format!("Wrote {out_path} with {} sources", urls.len()),
                    artifacts: vec![aid.clone()],
                    citations: urls,
                })
                .finished(now),
        )?;
        store.add_message(
            ROLE,
            "research_result",
            &format!("Created {out_path}"),
            vec![subtask_id.to_string(), aid],
        )?;
        tracing::info!(subtask = %subtask_id, path = %out_path, "notes written");
        Ok(())
    }
}
