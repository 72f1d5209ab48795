//! 调度器：检查黑板状态，派发一个可运行子任务、计划下一个子任务，或停止
//!
//! - **handler**: Handler 接口与 role → Handler 注册表
//! - **planner**: 有序计划规则（research → derive → review）
//! - **acceptance**: 验收谓词求值
//! - **scheduler**: Supervisor::tick / run

pub mod acceptance;
pub mod handler;
pub mod planner;
pub mod scheduler;

pub use acceptance::acceptance_met;
pub use handler::{Handler, HandlerRegistry};
pub use planner::{default_rules, PlanRule};
pub use scheduler::{Directive, RunOutcome, StopReason, Supervisor};
