//! 发布上下文
//!
//! 持有本次发布的阶段记录，统一阶段状态的变更与日志

use tracing::{error, info, warn};

use crate::domain::deploy::{DeployStage, DeployStatus, DeploymentRun, Environment, StageStatus};

/// 阶段标识
pub mod stage {
    pub const CONFIRM: &str = "confirm";
    pub const BACKUP: &str = "backup";
    pub const SOURCE_SYNC: &str = "source_sync";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const MIGRATE: &str = "migrate";
    pub const COLLECT_STATIC: &str = "collect_static";
    pub const TESTS: &str = "tests";
    pub const RESTART: &str = "restart";
    pub const HEALTH: &str = "health";
}

/// 初始化全部阶段（均为 Pending）
pub fn initial_stages() -> Vec<DeployStage> {
    vec![
        DeployStage::new(stage::CONFIRM, "Confirmation"),
        DeployStage::new(stage::BACKUP, "Database Backup"),
        DeployStage::new(stage::SOURCE_SYNC, "Source Sync"),
        DeployStage::new(stage::DEPENDENCIES, "Install Dependencies"),
        DeployStage::new(stage::MIGRATE, "Migrate"),
        DeployStage::new(stage::COLLECT_STATIC, "Collect Static"),
        DeployStage::new(stage::TESTS, "Run Tests"),
        DeployStage::new(stage::RESTART, "Restart Service"),
        DeployStage::new(stage::HEALTH, "Health Check"),
    ]
}

/// 发布执行上下文
pub struct ReleaseContext {
    pub run: DeploymentRun,
}

impl ReleaseContext {
    pub fn new(environment: Environment, host: impl Into<String>) -> Self {
        Self {
            run: DeploymentRun::new(environment, host, initial_stages()),
        }
    }

    /// 阶段显示名称
    pub fn display_name(&self, name: &str) -> String {
        self.run
            .stage(name)
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// 开始阶段
    pub fn begin(&mut self, name: &str) {
        if let Some(s) = self.run.stage_mut(name) {
            s.start();
            info!(stage = %s.display_name, "==> {}", s.display_name);
        }
    }

    /// 阶段成功
    pub fn succeed(&mut self, name: &str, message: Option<String>) {
        if let Some(s) = self.run.stage_mut(name) {
            s.finish(true, message);
            info!(stage = %s.display_name, duration_ms = s.duration_ms, "Stage succeeded");
        }
    }

    /// 阶段失败（是否致命由调用方决定）
    pub fn fail(&mut self, name: &str, message: impl Into<String>) {
        if let Some(s) = self.run.stage_mut(name) {
            let message = message.into();
            error!(stage = %s.display_name, reason = %message, "Stage failed");
            s.finish(false, Some(message));
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, name: &str, reason: &str) {
        if let Some(s) = self.run.stage_mut(name) {
            info!(stage = %s.display_name, reason = reason, "Stage skipped");
            s.skip(Some(reason.to_string()));
        }
    }

    /// 致命错误：结束发布，未执行的阶段保持 Pending
    pub fn abort(&mut self) {
        self.run.complete(DeployStatus::Failed);
        let pending: Vec<&str> = self
            .run
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Pending)
            .map(|s| s.display_name.as_str())
            .collect();
        warn!(not_run = ?pending, "Release stopped");
    }

    /// 正常结束（非致命阶段的失败仍保留在阶段记录中）
    pub fn finish(mut self) -> DeploymentRun {
        self.run.complete(DeployStatus::Success);
        self.run
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.run.stage(name).map(|s| s.status.clone())
    }
}
