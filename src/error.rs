//! 统一错误处理
//!
//! 提供 `OrchestratorError` 枚举，所有阶段的失败都归入这里，并映射为进程退出码

use thiserror::Error;

use crate::domain::probe::DependencyKind;

/// 配置错误退出码
pub const EXIT_CONFIG: i32 = 2;
/// 一般致命错误退出码
pub const EXIT_FAILURE: i32 = 1;

/// 编排错误类型
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// 必需的配置缺失（在任何副作用之前失败）
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// 连接字符串格式错误
    #[error("Malformed connection string: {0}")]
    MalformedConnectionString(String),

    /// 依赖在重试次数内不可达
    #[error("{kind} unavailable after {attempts} attempts")]
    DependencyUnavailable { kind: DependencyKind, attempts: u32 },

    /// 备份失败
    #[error("Backup failed: {cause}")]
    BackupFailed { cause: String },

    /// 外部命令以非零状态退出
    #[error("{stage} failed (exit code: {code}){}", format_stderr(.stderr))]
    CommandFailed {
        stage: String,
        code: i32,
        stderr: String,
    },

    /// 用户取消（干净退出）
    #[error("Aborted by user at {stage}")]
    UserAborted { stage: String },

    /// 用户拒绝覆盖失败的阶段
    #[error("{stage} failed and override was declined")]
    OverrideDeclined { stage: String },

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl OrchestratorError {
    /// 创建缺失配置错误
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingConfiguration(what.into())
    }

    /// 创建格式错误
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedConnectionString(reason.into())
    }

    /// 创建备份失败错误
    pub fn backup(cause: impl Into<String>) -> Self {
        Self::BackupFailed {
            cause: cause.into(),
        }
    }

    /// 创建命令失败错误
    pub fn command(stage: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            stage: stage.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// 是否为用户主动取消（退出码 0）
    pub fn is_clean_abort(&self) -> bool {
        matches!(self, Self::UserAborted { .. })
    }

    /// 映射为进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UserAborted { .. } => 0,
            Self::MissingConfiguration(_) | Self::MalformedConnectionString(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}

/// 便捷类型别名
pub type Result<T> = std::result::Result<T, OrchestratorError>;
