//! systemd 服务控制
//!
//! 重启与状态检查都通过 `systemctl` 完成，可选 sudo

use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::infra::command::{CommandExecutor, CommandSpec};

/// 重启结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    Failed(String),
}

pub struct ServiceController<'a> {
    config: &'a ServiceConfig,
    executor: &'a dyn CommandExecutor,
}

impl<'a> ServiceController<'a> {
    pub fn new(config: &'a ServiceConfig, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }

    /// `[sudo] systemctl restart <service>`，不会让调用方失败
    pub async fn restart(&self, service: &str) -> RestartOutcome {
        info!(service = %service, "Restarting service");
        let spec = self.systemctl(&["restart", service]);

        match self.executor.run(&spec).await {
            Ok(output) if output.success() => {
                info!(service = %service, "Service restarted");
                RestartOutcome::Restarted
            }
            Ok(output) => {
                let reason = format!("exit code {}: {}", output.code, output.stderr.trim());
                warn!(service = %service, reason = %reason, "Service restart failed");
                RestartOutcome::Failed(reason)
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Service restart could not run");
                RestartOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn restart_primary(&self) -> RestartOutcome {
        self.restart(&self.config.primary).await
    }

    /// `systemctl is-active --quiet <service>`
    pub async fn is_active(&self, service: &str) -> bool {
        let spec = CommandSpec::new("systemctl").args(["is-active", "--quiet", service]);
        match self.executor.run(&spec).await {
            Ok(output) => output.success(),
            Err(e) => {
                warn!(service = %service, error = %e, "Cannot query service state");
                false
            }
        }
    }

    fn systemctl(&self, args: &[&str]) -> CommandSpec {
        if self.config.use_sudo {
            CommandSpec::new("sudo").arg("systemctl").args(args.iter().copied())
        } else {
            CommandSpec::new("systemctl").args(args.iter().copied())
        }
    }
}
