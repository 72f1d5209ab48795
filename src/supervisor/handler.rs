//! Handler 接口与按角色注册表
//!
//! 调度器把子任务置为 in_progress 后交给 owner 对应的 handler；handler 负责把它推进到 done（填好 output）
//! 或 failed（附带一条错误消息）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::blackboard::StateStore;

#[async_trait]
pub trait Handler: Send + Sync {
    /// 注册用的角色名，与 Subtask.owner 对应
    fn role(&self) -> &str;

    async fn handle(&self, store: &mut dyn StateStore, subtask_id: &str) -> anyhow::Result<()>;
}

/// role → Handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        let role = handler.role().to_string();
        self.handlers.insert(role, Arc::new(handler));
    }

    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, role: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(role).cloned()
    }
}
