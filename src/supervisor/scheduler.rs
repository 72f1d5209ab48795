//! 单线程调度器
//!
//! tick 每次只做一件事，优先级：预算 → 验收 → 派发 → 计划 → 停机。
//! 除预算的墙钟检查外没有任何不确定分支；已验收的运行再次 tick 不产生任何变更。

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::blackboard::{StateStore, SubtaskStatus, SubtaskUpdate};
use crate::core::clock::secs_between;
use crate::core::StoreError;
use crate::supervisor::acceptance::acceptance_met;
use crate::supervisor::handler::HandlerRegistry;
use crate::supervisor::planner::{default_rules, PlanRule};

const ACTOR: &str = "supervisor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Ok,
    BudgetExceeded,
    HaltedNoAcceptance,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Ok => "ok",
            StopReason::BudgetExceeded => "budget_exceeded",
            StopReason::HaltedNoAcceptance => "halted_no_acceptance",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Stop(StopReason),
}

/// run 的结果：停止原因与执行的 tick 数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub ticks: u64,
}

pub struct Supervisor {
    handlers: HandlerRegistry,
    rules: Vec<PlanRule>,
}

impl Supervisor {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self::with_rules(handlers, default_rules())
    }

    pub fn with_rules(handlers: HandlerRegistry, rules: Vec<PlanRule>) -> Self {
        Self { handlers, rules }
    }

    pub async fn tick(&self, store: &mut dyn StateStore) -> Result<Directive, StoreError> {
        if let Some(reason) = self.budget_exhausted(store) {
            tracing::warn!(reason = %reason, "budget exceeded, stopping");
            store.add_message(ACTOR, "status", &format!("Budget exceeded: {reason}"), Vec::new())?;
            return Ok(Directive::Stop(StopReason::BudgetExceeded));
        }

        if acceptance_met(store.base_dir(), &store.run().task.acceptance) {
            tracing::info!(run_id = %store.run().run_id, "acceptance met");
            return Ok(Directive::Stop(StopReason::Ok));
        }

        if let Some(id) = store.run().first_runnable().map(|st| st.id.clone()) {
            self.dispatch(store, &id).await?;
            return Ok(Directive::Continue);
        }

        let planned = self.rules.iter().find(|r| r.applies(store.run()));
        if let Some(rule) = planned {
            let run = store.run();
            let input = rule.input(run);
            let depends_on = rule.depends_on(run);
            let note = rule.describe(run);
            let id = store.add_subtask(&rule.owner, &rule.kind, input, depends_on)?;
            store.add_message(ACTOR, "plan", &note, vec![id.clone()])?;
            store.record_step()?;
            tracing::info!(subtask = %id, kind = %rule.kind, owner = %rule.owner, "planned");
            return Ok(Directive::Continue);
        }

        store.add_message(
            ACTOR,
            "status",
            "No acceptance and no more work to plan; halting",
            Vec::new(),
        )?;
        tracing::warn!("no runnable or plannable work, halting");
        Ok(Directive::Stop(StopReason::HaltedNoAcceptance))
    }

    /// 反复 tick 直到停止；取消只在两次 tick 之间生效
    pub async fn run(
        &self,
        store: &mut dyn StateStore,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, StoreError> {
        let mut ticks = 0;
        loop {
            if cancel.is_cancelled() {
                store.add_message(ACTOR, "status", "Cancelled by driver", Vec::new())?;
                return Ok(RunOutcome {
                    reason: StopReason::Cancelled,
                    ticks,
                });
            }
            let directive = self.tick(store).await?;
            ticks += 1;
            if let Directive::Stop(reason) = directive {
                tracing::info!(reason = %reason, ticks, "run stopped");
                return Ok(RunOutcome { reason, ticks });
            }
        }
    }

    fn budget_exhausted(&self, store: &dyn StateStore) -> Option<String> {
        let run = store.run();
        let budget = &run.task.budget;
        if run.metrics.steps >= budget.max_steps {
            return Some(format!("steps {} >= {}", run.metrics.steps, budget.max_steps));
        }
        if run.metrics.tool_calls >= budget.max_tool_calls {
            return Some(format!(
                "tool_calls {} >= {}",
                run.metrics.tool_calls, budget.max_tool_calls
            ));
        }
        let elapsed = secs_between(run.created_at, store.now());
        if elapsed >= budget.max_seconds as f64 {
            return Some(format!("elapsed {elapsed:.1}s >= {}s", budget.max_seconds));
        }
        None
    }

    async fn dispatch(&self, store: &mut dyn StateStore, id: &str) -> Result<(), StoreError> {
        store.record_step()?;
        let now = store.now();
        store.update_subtask(id, SubtaskUpdate::status(SubtaskStatus::InProgress).started(now))?;
        let owner = store.subtask(id)?.owner.clone();

        let Some(handler) = self.handlers.get(&owner) else {
            tracing::error!(subtask = %id, owner = %owner, "no handler registered");
            store.add_message(ACTOR, "error", &format!("No handler for role {owner}"), vec![id.to_string()])?;
            return self.fail(store, id);
        };

        tracing::info!(subtask = %id, owner = %owner, "dispatching");
        match handler.handle(store, id).await {
            Ok(()) => {
                // handler 必须把子任务推进到终态
                if !store.subtask(id)?.status.is_terminal() {
                    store.add_message(
                        ACTOR,
                        "error",
                        &format!("Handler {owner} left {id} in progress"),
                        vec![id.to_string()],
                    )?;
                    self.fail(store, id)?;
                }
                Ok(())
            }
            Err(e) => {
                // 存储本身坏了（I/O、序列化、损坏）时无法再记账，直接中止
                let e = match e.downcast::<StoreError>() {
                    Ok(err) if !err.is_structural() => {
                        tracing::error!(subtask = %id, owner = %owner, error = %err, "store failure inside handler");
                        return Err(err);
                    }
                    Ok(err) => anyhow::Error::new(err),
                    Err(e) => e,
                };
                tracing::error!(subtask = %id, owner = %owner, error = %e, "handler failed");
                self.fail(store, id)?;
                store.add_message(ACTOR, "error", &format!("Handler error: {e:#}"), vec![id.to_string()])?;
                Ok(())
            }
        }
    }

    fn fail(&self, store: &mut dyn StateStore, id: &str) -> Result<(), StoreError> {
        let attempts = store.subtask(id)?.attempts + 1;
        let now = store.now();
        store.update_subtask(
            id,
            SubtaskUpdate::status(SubtaskStatus::Failed)
                .with_attempts(attempts)
                .finished(now),
        )
    }
}
