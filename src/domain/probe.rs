//! 依赖就绪探测相关领域模型

use serde::Serialize;
use std::time::Duration;

/// 被探测的依赖类型
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Database,
    Cache,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Database => write!(f, "database"),
            DependencyKind::Cache => write!(f, "cache"),
        }
    }
}

/// 探测状态机: Idle → Probing → {Ready, Exhausted}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Probing,
    Ready,
    Exhausted,
}

impl ProbeState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProbeState::Ready | ProbeState::Exhausted)
    }
}

/// 单次探测尝试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub kind: DependencyKind,
    /// 从 1 开始
    pub attempt: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ProbeAttempt {
    pub fn first(kind: DependencyKind, max_attempts: u32, interval: Duration) -> Self {
        Self {
            kind,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// 是否为最后一次尝试
    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// 下一次尝试；已到上限时返回 None
    pub fn next(&self) -> Option<Self> {
        if self.is_last() {
            return None;
        }
        Some(Self {
            attempt: self.attempt + 1,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_progression() {
        let first = ProbeAttempt::first(DependencyKind::Cache, 3, Duration::from_secs(2));
        assert_eq!(first.attempt, 1);
        let second = first.next().unwrap();
        let third = second.next().unwrap();
        assert!(third.is_last());
        assert!(third.next().is_none());
    }

    #[test]
    fn test_zero_max_attempts_is_coerced() {
        let attempt = ProbeAttempt::first(DependencyKind::Database, 0, Duration::ZERO);
        assert_eq!(attempt.max_attempts, 1);
        assert!(attempt.is_last());
    }

    #[test]
    fn test_probe_state_terminal() {
        assert!(!ProbeState::Idle.is_terminal());
        assert!(!ProbeState::Probing.is_terminal());
        assert!(ProbeState::Ready.is_terminal());
        assert!(ProbeState::Exhausted.is_terminal());
    }
}
