//! 按分钟计数的工具限流器
//!
//! 与端点侧限流一致：同一自然分钟内调用数达到上限即拒绝，返回 RATE_LIMIT。

use std::sync::{Arc, Mutex};

use crate::core::Clock;
use crate::tools::ToolError;

pub struct RateLimiter {
    tool: String,
    per_minute: u32,
    clock: Arc<dyn Clock>,
    /// (分钟键, 已用次数)
    window: Mutex<(String, u32)>,
}

impl RateLimiter {
    pub fn new(tool: &str, per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            tool: tool.to_string(),
            per_minute,
            clock,
            window: Mutex::new((String::new(), 0)),
        }
    }

    /// 占用一次配额；超限返回 RateLimited
    pub fn acquire(&self) -> Result<(), ToolError> {
        let key = self.clock.now().format("%Y%m%d%H%M").to_string();
        let mut window = self
            .window
            .lock()
            .map_err(|_| ToolError::Failed("rate limiter poisoned".into()))?;
        if window.0 != key {
            *window = (key, 0);
        }
        if window.1 >= self.per_minute {
            tracing::debug!(tool = %self.tool, limit = self.per_minute, "rate limited");
            return Err(ToolError::RateLimited(self.tool.clone()));
        }
        window.1 += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_limit_resets_next_minute() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 10).unwrap());
        let limiter = RateLimiter::new("web_search", 3, Arc::new(clock.clone()));
        for _ in 0..3 {
            limiter.acquire().unwrap();
        }
        assert_eq!(
            limiter.acquire().unwrap_err(),
            ToolError::RateLimited("web_search".into())
        );
        clock.advance_secs(60);
        assert!(limiter.acquire().is_ok());
    }
}
