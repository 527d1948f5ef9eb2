//! 发布相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发布环境
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Staging,
    Production,
}

impl Environment {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// 需要检出的 Git 分支
    pub fn branch(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "main",
        }
    }

    /// 是否运行测试（生产环境跳过）
    pub fn runs_tests(&self) -> bool {
        !matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "invalid environment '{}', expected 'staging' or 'production'",
                other
            )),
        }
    }
}

/// 发布整体状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Success | DeployStatus::Failed)
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

/// 发布阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "backup", "source_sync", "migrate")
    pub name: String,
    /// 显示名称 (e.g., "Database Backup", "Source Sync")
    pub display_name: String,
    /// 开始时间
    pub started_at: Option<DateTime<Utc>>,
    /// 结束时间
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    /// 阶段状态
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 一次发布运行记录
///
/// 只存在于本次运行的生命周期内，不做持久化
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentRun {
    pub environment: Environment,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub branch: String,
    pub commit: Option<String>,
    pub status: DeployStatus,
    pub stages: Vec<DeployStage>,
}

impl DeploymentRun {
    /// 创建新的发布记录
    pub fn new(environment: Environment, host: impl Into<String>, stages: Vec<DeployStage>) -> Self {
        Self {
            environment,
            host: host.into(),
            started_at: Utc::now(),
            finished_at: None,
            branch: environment.branch().to_string(),
            commit: None,
            status: DeployStatus::Running,
            stages,
        }
    }

    /// 按名称查找阶段
    pub fn stage(&self, name: &str) -> Option<&DeployStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// 按名称查找阶段（可变）
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut DeployStage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// 设置发布完成
    pub fn complete(&mut self, status: DeployStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// 是否有阶段失败
    pub fn has_failures(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }
}
