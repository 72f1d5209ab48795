//! 单工具熔断器
//!
//! closed → open → half_open → closed。窗口内失败次数达到阈值即打开；冷却期内本地拒绝且不重复计数；
//! 冷却结束后只放行一次试探调用，成功则关闭并清空窗口，失败则重新打开并重置打开时间。

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// 窗口内失败多少次打开
    pub threshold: usize,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::seconds(60),
            cooldown: Duration::seconds(30),
        }
    }
}

/// 预检结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// closed：正常放行
    Allow,
    /// 冷却结束后的唯一一次试探
    Trial,
    /// 本地拒绝，不发起网络请求
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breaker {
    /// 窗口内的失败时间戳
    pub failures: Vec<DateTime<Utc>>,
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Breaker {
    pub fn admit(&mut self, now: DateTime<Utc>, cfg: &BreakerConfig) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allow,
            // 试探仍在进行中，其余调用一律拒绝
            BreakerState::HalfOpen => Admission::Reject,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .map(|at| now - at >= cfg.cooldown)
                    .unwrap_or(true);
                if cooled {
                    self.state = BreakerState::HalfOpen;
                    Admission::Trial
                } else {
                    Admission::Reject
                }
            }
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, cfg: &BreakerConfig) -> BreakerState {
        self.failures.retain(|t| now - *t <= cfg.window);
        self.failures.push(now);
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
            }
            BreakerState::Closed if self.failures.len() >= cfg.threshold => {
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
            }
            _ => {}
        }
        self.state
    }

    pub fn record_success(&mut self) -> BreakerState {
        self.failures.clear();
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.state
    }

    /// 试探调用被中途丢弃：按失败处理，重新进入冷却
    pub fn abandon_trial(&mut self, now: DateTime<Utc>) {
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
        }
    }

    /// 从持久化状态恢复时，上个进程遗留的 half_open 没有在途试探，退回 open
    pub fn settle_after_load(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_opens_at_threshold() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker::default();
        assert_eq!(b.record_failure(t0(), &cfg), BreakerState::Closed);
        assert_eq!(b.record_failure(t0(), &cfg), BreakerState::Closed);
        assert_eq!(b.record_failure(t0(), &cfg), BreakerState::Open);
        assert_eq!(b.opened_at, Some(t0()));
        assert_eq!(b.admit(t0() + Duration::seconds(29), &cfg), Admission::Reject);
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker::default();
        b.record_failure(t0(), &cfg);
        b.record_failure(t0() + Duration::seconds(10), &cfg);
        let state = b.record_failure(t0() + Duration::seconds(61), &cfg);
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(b.failures.len(), 2);
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker::default();
        for _ in 0..3 {
            b.record_failure(t0(), &cfg);
        }
        let later = t0() + Duration::seconds(30);
        assert_eq!(b.admit(later, &cfg), Admission::Trial);
        assert_eq!(b.state, BreakerState::HalfOpen);
        assert_eq!(b.admit(later, &cfg), Admission::Reject);
        assert_eq!(b.admit(later, &cfg), Admission::Reject);
    }

    #[test]
    fn test_trial_failure_reopens_with_new_timestamp() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker::default();
        for _ in 0..3 {
            b.record_failure(t0(), &cfg);
        }
        let later = t0() + Duration::seconds(31);
        assert_eq!(b.admit(later, &cfg), Admission::Trial);
        assert_eq!(b.record_failure(later, &cfg), BreakerState::Open);
        assert_eq!(b.opened_at, Some(later));
        assert_eq!(b.admit(later + Duration::seconds(29), &cfg), Admission::Reject);
        assert_eq!(b.admit(later + Duration::seconds(30), &cfg), Admission::Trial);
    }

    #[test]
    fn test_trial_success_closes() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker::default();
        for _ in 0..3 {
            b.record_failure(t0(), &cfg);
        }
        b.admit(t0() + Duration::seconds(30), &cfg);
        assert_eq!(b.record_success(), BreakerState::Closed);
        assert!(b.failures.is_empty());
        assert_eq!(b.admit(t0() + Duration::seconds(30), &cfg), Admission::Allow);
    }

    #[test]
    fn test_abandoned_trial_reopens() {
        let cfg = BreakerConfig::default();
        let mut b = Breaker {
            state: BreakerState::Open,
            opened_at: Some(t0()),
            ..Breaker::default()
        };
        let later = t0() + Duration::seconds(40);
        assert_eq!(b.admit(later, &cfg), Admission::Trial);
        b.abandon_trial(later);
        assert_eq!(b.state, BreakerState::Open);
        assert_eq!(b.opened_at, Some(later));
    }
}
