//! 容器启动编排
//!
//! 解析连接 → 等待数据库 →（等待缓存）→ 迁移 →（管理员账户）→
//! collectstatic → 将进程交给服务器命令

use tracing::{error, info, warn};

use crate::config::EnvConfig;
use crate::domain::connection::{CacheTarget, ConnectionTarget};
use crate::error::{OrchestratorError, Result};
use crate::infra::command::{run_checked, CommandExecutor, CommandSpec};
use crate::services::readiness::{ConnectivityCheck, PostgresCheck, ReadinessProbe, RedisCheck};

/// 启动编排的最终动作：用服务器命令替换当前进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub program: String,
    pub args: Vec<String>,
}

impl Handoff {
    pub fn from_command(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| OrchestratorError::missing("server command to hand off to"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// 替换当前进程映像，只有失败时才会返回
    #[cfg(unix)]
    pub fn exec(self) -> OrchestratorError {
        use std::os::unix::process::CommandExt;

        info!(program = %self.program, args = ?self.args, "Handing off to server process");
        let err = std::process::Command::new(&self.program)
            .args(&self.args)
            .exec();
        OrchestratorError::command("Server Handoff", -1, format!("exec failed: {}", err))
    }

    /// 没有 exec 时以子进程运行服务器，并以其退出码退出
    #[cfg(not(unix))]
    pub fn exec(self) -> OrchestratorError {
        info!(program = %self.program, "Starting server process");
        match std::process::Command::new(&self.program).args(&self.args).status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(e) => OrchestratorError::command("Server Handoff", -1, e.to_string()),
        }
    }
}

pub struct BootstrapSequencer<'a> {
    config: &'a EnvConfig,
    executor: &'a dyn CommandExecutor,
}

impl<'a> BootstrapSequencer<'a> {
    pub fn new(config: &'a EnvConfig, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }

    /// 第 1 步：解析主数据库目标，在任何副作用之前失败
    pub fn database_target(&self) -> Result<ConnectionTarget> {
        let url = self
            .config
            .database_url
            .as_deref()
            .ok_or_else(|| OrchestratorError::missing("DATABASE_URL is not set"))?;
        ConnectionTarget::parse(url)
    }

    /// 可选的缓存目标；URL 格式错误只会关闭缓存探测
    pub fn cache_target(&self) -> Option<CacheTarget> {
        let url = self.config.cache_url.as_deref()?;
        match CacheTarget::parse(url) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid cache URL, continuing without cache");
                None
            }
        }
    }

    /// 针对真实依赖执行完整序列
    pub async fn run(&self, server_command: Vec<String>) -> Result<Handoff> {
        let handoff = Handoff::from_command(server_command)?;
        let target = self.database_target()?;
        info!(database = %target, "Bootstrapping");

        let timeout = self.config.probe.timeout;
        let database_check = PostgresCheck::new(&target, timeout);
        let cache_check = self.cache_target().map(|c| RedisCheck::new(&c, timeout));

        self.run_with_checks(
            handoff,
            &database_check,
            cache_check.as_ref().map(|c| c as &dyn ConnectivityCheck),
        )
        .await
    }

    /// 解析之后的全部步骤，连通性检查由调用方注入
    pub async fn run_with_checks(
        &self,
        handoff: Handoff,
        database_check: &dyn ConnectivityCheck,
        cache_check: Option<&dyn ConnectivityCheck>,
    ) -> Result<Handoff> {
        let probe_config = &self.config.probe;

        // 第 2 步：数据库必须就绪
        let mut database_probe = ReadinessProbe::for_database(probe_config);
        if let Err(e) = database_probe.wait_until_ready(database_check).await {
            error!(error = %e, "Database never became ready, aborting bootstrap");
            return Err(e);
        }

        // 第 3 步：缓存可选
        match cache_check {
            Some(check) => {
                let mut cache_probe = ReadinessProbe::for_cache(probe_config);
                if let Err(e) = cache_probe.wait_until_ready(check).await {
                    warn!(error = %e, "Cache unavailable, continuing in degraded mode");
                }
            }
            None => info!("No cache configured, skipping cache probe"),
        }

        // 第 4 步：迁移
        info!("Applying database migrations");
        run_checked(self.executor, "Migrate", &self.manage(&["migrate", "--noinput"])).await?;

        // 第 5 步：管理员账户
        self.provision_admin().await;

        // 第 6 步：静态文件
        info!("Collecting static files");
        run_checked(
            self.executor,
            "Collect Static",
            &self.manage(&["collectstatic", "--noinput", "--clear"]),
        )
        .await?;

        info!(program = %handoff.program, "Bootstrap complete");
        Ok(handoff)
    }

    /// 凭据不全则跳过；账户已存在视为成功
    async fn provision_admin(&self) {
        let Some((username, password)) = self.config.admin.credentials() else {
            info!("Admin credentials not configured, skipping admin provisioning");
            return;
        };

        info!(username = username, "Provisioning admin account");
        let spec = self
            .manage(&[
                "createsuperuser",
                "--username",
                username,
                "--email",
                self.config.admin.email.as_str(),
            ])
            .env("DJANGO_SUPERUSER_USERNAME", username)
            .env("DJANGO_SUPERUSER_PASSWORD", password)
            .env("DJANGO_SUPERUSER_EMAIL", &self.config.admin.email);

        match self.executor.run(&spec).await {
            Ok(output) if already_exists(&output.combined()) => {
                info!(username = username, "Admin account already exists");
            }
            Ok(output) if output.success() => {
                info!(username = username, "Admin account created");
            }
            Ok(output) => {
                warn!(
                    code = output.code,
                    stderr = %output.stderr.trim(),
                    "Admin provisioning failed, continuing"
                );
            }
            Err(e) => {
                warn!(error = %e, "Admin provisioning could not run, continuing");
            }
        }
    }

    fn manage(&self, args: &[&str]) -> CommandSpec {
        let (program, prefix) = self.config.manage_program();
        CommandSpec::new(program).args(prefix).args(args.iter().copied())
    }
}

fn already_exists(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("already exists") || lower.contains("already taken")
}
