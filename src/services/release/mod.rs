//! 发布流水线
//!
//! 严格按顺序执行主机发布阶段，遇到第一个致命失败即停止。
//! 备份、重启与健康检查阶段只报告结果

pub mod context;
pub mod summary;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::EnvConfig;
use crate::domain::backup::BackupRecord;
use crate::domain::deploy::{DeploymentRun, Environment};
use crate::error::{OrchestratorError, Result};
use crate::infra::command::{run_checked, CommandExecutor, CommandOutput, CommandSpec};
use crate::infra::prompt::Prompter;
use crate::services::backup::{BackupManager, BackupRequest};
use crate::services::confirm::{Confirmation, ConfirmationGate};
use crate::services::health::{HealthChecker, HealthReport};
use crate::services::service_control::{RestartOutcome, ServiceController};

pub use context::{stage, ReleaseContext};

/// `showmigrations --plan` 中未应用迁移的标记
const PENDING_MIGRATION_MARKER: &str = "[ ]";

/// 走到摘要阶段的发布结果
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub run: DeploymentRun,
    pub backup: Option<BackupRecord>,
    pub health: Option<HealthReport>,
}

pub struct ReleasePipeline<'a> {
    config: &'a EnvConfig,
    executor: &'a dyn CommandExecutor,
    prompter: &'a dyn Prompter,
    host: String,
}

impl<'a> ReleasePipeline<'a> {
    pub fn new(
        config: &'a EnvConfig,
        executor: &'a dyn CommandExecutor,
        prompter: &'a dyn Prompter,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            config,
            executor,
            prompter,
            host,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub async fn run(&self, environment: Environment) -> Result<ReleaseReport> {
        let mut ctx = ReleaseContext::new(environment, &self.host);
        info!(
            environment = %environment,
            branch = environment.branch(),
            host = %self.host,
            "Starting release"
        );

        match self.execute(&mut ctx, environment).await {
            Ok((backup, health)) => {
                let report = ReleaseReport {
                    run: ctx.finish(),
                    backup,
                    health,
                };
                summary::log(&report);
                Ok(report)
            }
            Err(e) => {
                if !e.is_clean_abort() {
                    ctx.abort();
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut ReleaseContext,
        environment: Environment,
    ) -> Result<(Option<BackupRecord>, Option<HealthReport>)> {
        let gate = ConfirmationGate::new(self.prompter);

        ctx.begin(stage::CONFIRM);
        if gate.confirm(environment).await == Confirmation::Aborted {
            ctx.skip(stage::CONFIRM, "aborted by user");
            return Err(OrchestratorError::UserAborted {
                stage: ctx.display_name(stage::CONFIRM),
            });
        }
        ctx.succeed(stage::CONFIRM, None);

        let backup = self.backup(ctx).await;

        let branch = environment.branch();
        let sync = [
            self.git(&["reset", "--hard", "HEAD"]),
            self.git(&["checkout", branch]),
            self.git(&["pull", "origin", branch]),
        ];
        self.checked(ctx, stage::SOURCE_SYNC, &sync).await?;
        ctx.run.commit = self.current_commit().await;

        let install = self.pip(&["install", "-r", "requirements.txt"]);
        self.checked(ctx, stage::DEPENDENCIES, &[install]).await?;

        ctx.begin(stage::MIGRATE);
        let plan = self.step(ctx, stage::MIGRATE, &self.manage(&["showmigrations", "--plan"])).await?;
        let pending = pending_migrations(&plan.stdout);
        if pending.is_empty() {
            info!("No pending migrations");
        } else {
            println!("Pending migrations:");
            for line in &pending {
                println!("  {}", line);
            }
        }
        self.step(ctx, stage::MIGRATE, &self.manage(&["migrate", "--noinput"])).await?;
        ctx.succeed(stage::MIGRATE, Some(format!("{} pending applied", pending.len())));

        let collect = self.manage(&["collectstatic", "--noinput", "--clear"]);
        self.checked(ctx, stage::COLLECT_STATIC, &[collect]).await?;

        if environment.runs_tests() {
            self.run_tests(ctx, &gate).await?;
        } else {
            ctx.skip(stage::TESTS, "not run in production");
        }

        ctx.begin(stage::RESTART);
        let controller = ServiceController::new(&self.config.services, self.executor);
        match controller.restart_primary().await {
            RestartOutcome::Restarted => ctx.succeed(stage::RESTART, None),
            RestartOutcome::Failed(reason) => ctx.fail(stage::RESTART, reason),
        }

        ctx.begin(stage::HEALTH);
        let health = HealthChecker::new(&self.config.services, self.executor, &self.config.health_url)
            .check()
            .await;
        if health.all_passed() {
            ctx.succeed(stage::HEALTH, None);
        } else {
            ctx.fail(stage::HEALTH, format!("failed: {}", health.failures().join(", ")));
        }

        Ok((backup, Some(health)))
    }

    /// 发布前备份；失败只记录，发布继续
    async fn backup(&self, ctx: &mut ReleaseContext) -> Option<BackupRecord> {
        ctx.begin(stage::BACKUP);
        let result = match BackupRequest::from_config(self.config) {
            Ok(request) => BackupManager::new(self.executor).create(&request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => {
                ctx.succeed(stage::BACKUP, Some(record.path.display().to_string()));
                Some(record)
            }
            Err(e) => {
                warn!(error = %e, "Continuing release without a fresh backup");
                ctx.fail(stage::BACKUP, e.to_string());
                None
            }
        }
    }

    /// 预发环境测试；失败后需显式确认才能继续
    async fn run_tests(&self, ctx: &mut ReleaseContext, gate: &ConfirmationGate<'_>) -> Result<()> {
        ctx.begin(stage::TESTS);
        let name = ctx.display_name(stage::TESTS);
        match run_checked(self.executor, &name, &self.manage(&["test"])).await {
            Ok(_) => {
                ctx.succeed(stage::TESTS, None);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Tests failed");
                if gate.ask_yes_no("Tests failed. Continue anyway? [y/N]:").await {
                    warn!("Test failure overridden by operator");
                    ctx.fail(stage::TESTS, "overridden");
                    Ok(())
                } else {
                    ctx.fail(stage::TESTS, e.to_string());
                    Err(OrchestratorError::OverrideDeclined { stage: name })
                }
            }
        }
    }

    /// 将 `specs` 作为一个致命阶段执行
    async fn checked(&self, ctx: &mut ReleaseContext, name: &str, specs: &[CommandSpec]) -> Result<()> {
        ctx.begin(name);
        for spec in specs {
            self.step(ctx, name, spec).await?;
        }
        ctx.succeed(name, None);
        Ok(())
    }

    /// 在已开始的阶段内执行一条命令，失败则标记该阶段
    async fn step(
        &self,
        ctx: &mut ReleaseContext,
        name: &str,
        spec: &CommandSpec,
    ) -> Result<CommandOutput> {
        info!(stage = name, command = %spec.display(), ">>> {}", spec.display());
        match run_checked(self.executor, &ctx.display_name(name), spec).await {
            Ok(output) => Ok(output),
            Err(e) => {
                ctx.fail(name, e.to_string());
                Err(e)
            }
        }
    }

    async fn current_commit(&self) -> Option<String> {
        let output = self
            .executor
            .run(&self.git(&["rev-parse", "--short", "HEAD"]))
            .await
            .ok()?;
        let commit = output.stdout.trim();
        (output.success() && !commit.is_empty()).then(|| commit.to_string())
    }

    fn git(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(&self.config.project_dir)
    }

    fn pip(&self, args: &[&str]) -> CommandSpec {
        let mut parts = self.config.pip_command.split_whitespace();
        let program = parts.next().unwrap_or("pip");
        CommandSpec::new(program)
            .args(parts)
            .args(args.iter().copied())
            .current_dir(&self.config.project_dir)
    }

    fn manage(&self, args: &[&str]) -> CommandSpec {
        let (program, prefix) = self.config.manage_program();
        CommandSpec::new(program)
            .args(prefix)
            .args(args.iter().copied())
            .current_dir(&self.config.project_dir)
    }
}

/// `showmigrations --plan` 输出中尚未应用的行
pub fn pending_migrations(plan: &str) -> Vec<String> {
    plan.lines()
        .filter(|line| line.contains(PENDING_MIGRATION_MARKER))
        .map(|line| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::{DeployStatus, StageStatus};
    use crate::infra::command::testing::FakeExecutor;
    use crate::infra::prompt::testing::ScriptedPrompter;
    use crate::services::health::testing::serve_status;
    use std::collections::HashMap;

    const PLAN: &str = "[X]  shop.0001_initial\n[ ]  shop.0002_add_sku\n[ ]  shop.0003_price_index\n";

    fn config(backup_dir: &std::path::Path, health_url: &str) -> EnvConfig {
        let dir = backup_dir.to_string_lossy().to_string();
        let map: HashMap<&str, String> = HashMap::from([
            ("DATABASE_URL", "postgresql://app:pw@db:5432/shop".to_string()),
            ("BACKUP_DIR", dir),
            ("HEALTH_URL", health_url.to_string()),
        ]);
        EnvConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_pending_migrations() {
        assert_eq!(
            pending_migrations(PLAN),
            vec!["[ ]  shop.0002_add_sku", "[ ]  shop.0003_price_index"]
        );
        assert!(pending_migrations("[X]  shop.0001_initial\n").is_empty());
    }

    #[tokio::test]
    async fn test_staging_release_all_stages_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_status("200 OK").await;
        let config = config(dir.path(), &url);
        let executor = FakeExecutor::new()
            .succeed_with("python manage.py showmigrations --plan", PLAN)
            .succeed_with("git rev-parse --short HEAD", "abc1234\n");
        let prompter = ScriptedPrompter::new(&["y"]);

        let report = ReleasePipeline::new(&config, &executor, &prompter)
            .with_host("web-1")
            .run(Environment::Staging)
            .await
            .unwrap();

        assert_eq!(report.run.status, DeployStatus::Success);
        assert!(report
            .run
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Success));
        assert_eq!(report.run.commit.as_deref(), Some("abc1234"));
        assert_eq!(report.run.branch, "staging");
        assert!(report.backup.as_ref().is_some_and(|b| b.path.exists()));
        assert!(report.health.is_some_and(|h| h.all_passed()));

        let calls = executor.calls();
        let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
        assert!(position("pg_dump") < position("git reset --hard HEAD"));
        assert!(position("git checkout staging") < position("git pull origin staging"));
        assert!(position("pip install -r requirements.txt") < position("python manage.py migrate --noinput"));
        assert!(position("python manage.py collectstatic --noinput --clear") < position("python manage.py test"));
        assert!(position("python manage.py test") < position("sudo systemctl restart gunicorn"));

        let text = summary::render(&report);
        assert!(text.contains("Environment : staging"));
        assert!(text.contains("Commit      : abc1234"));
        assert!(text.contains("Host        : web-1"));
        let json: serde_json::Value = serde_json::from_str(&summary::to_json(&report).unwrap()).unwrap();
        assert_eq!(json["run"]["environment"], "staging");
        assert_eq!(json["run"]["stages"][0]["status"], "success");
    }

    #[tokio::test]
    async fn test_declined_override_stops_before_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "http://127.0.0.1:9/");
        let executor = FakeExecutor::new().fail("python manage.py test", 1, "FAILED (failures=2)");
        let prompter = ScriptedPrompter::new(&["y", "n"]);

        let err = ReleasePipeline::new(&config, &executor, &prompter)
            .run(Environment::Staging)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::OverrideDeclined { .. }));
        assert_ne!(err.exit_code(), 0);
        assert!(!executor.called("sudo systemctl restart"));
        assert!(!executor.called("systemctl is-active"));
        assert_eq!(prompter.questions().len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_override_marks_tests_failed() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_status("200 OK").await;
        let config = config(dir.path(), &url);
        let executor = FakeExecutor::new().fail("python manage.py test", 1, "FAILED");
        let prompter = ScriptedPrompter::new(&["Y", "y"]);

        let report = ReleasePipeline::new(&config, &executor, &prompter)
            .run(Environment::Staging)
            .await
            .unwrap();

        let tests = report.run.stage(stage::TESTS).unwrap();
        assert_eq!(tests.status, StageStatus::Failed);
        assert_eq!(tests.message.as_deref(), Some("overridden"));
        assert!(executor.called("sudo systemctl restart gunicorn"));
        assert!(report.run.has_failures());
    }

    #[tokio::test]
    async fn test_confirmation_abort_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "http://127.0.0.1:9/");
        let executor = FakeExecutor::new();
        let prompter = ScriptedPrompter::new(&["y"]);

        let err = ReleasePipeline::new(&config, &executor, &prompter)
            .run(Environment::Production)
            .await
            .unwrap_err();

        assert!(err.is_clean_abort());
        assert_eq!(err.exit_code(), 0);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_stop_release() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_status("200 OK").await;
        let config = config(dir.path(), &url);
        let executor = FakeExecutor::new().fail("pg_dump", 1, "connection refused");
        let prompter = ScriptedPrompter::new(&["yes"]);

        let report = ReleasePipeline::new(&config, &executor, &prompter)
            .run(Environment::Production)
            .await
            .unwrap();

        assert!(report.backup.is_none());
        assert_eq!(report.run.stage(stage::BACKUP).unwrap().status, StageStatus::Failed);
        assert_eq!(report.run.stage(stage::TESTS).unwrap().status, StageStatus::Skipped);
        assert_eq!(report.run.branch, "main");
        assert!(executor.called("git checkout main"));
        assert!(!executor.called("python manage.py test"));
    }

    #[tokio::test]
    async fn test_restart_failure_still_reaches_health() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_status("200 OK").await;
        let config = config(dir.path(), &url);
        let executor = FakeExecutor::new()
            .fail("sudo systemctl restart", 1, "Job for gunicorn.service failed")
            .fail("systemctl is-active --quiet gunicorn", 3, "");
        let prompter = ScriptedPrompter::new(&["y"]);

        let report = ReleasePipeline::new(&config, &executor, &prompter)
            .run(Environment::Staging)
            .await
            .unwrap();

        assert_eq!(report.run.stage(stage::RESTART).unwrap().status, StageStatus::Failed);
        let health = report.health.unwrap();
        assert!(!health.primary_active);
        assert!(health.proxy_active);
        assert_eq!(report.run.stage(stage::HEALTH).unwrap().status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_fatal_stage_leaves_later_stages_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "http://127.0.0.1:9/");
        let executor = FakeExecutor::new().fail("python manage.py migrate", 1, "relation already exists");
        let prompter = ScriptedPrompter::new(&["y"]);

        let mut ctx = ReleaseContext::new(Environment::Staging, "web-1");
        let pipeline = ReleasePipeline::new(&config, &executor, &prompter);
        let err = pipeline.execute(&mut ctx, Environment::Staging).await.unwrap_err();

        match err {
            OrchestratorError::CommandFailed { ref stage, code, .. } => {
                assert_eq!(stage, "Migrate");
                assert_eq!(code, 1);
            }
            ref other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ctx.status_of(stage::MIGRATE), Some(StageStatus::Failed));
        assert_eq!(ctx.status_of(stage::COLLECT_STATIC), Some(StageStatus::Pending));
        assert_eq!(ctx.status_of(stage::RESTART), Some(StageStatus::Pending));
        assert!(!executor.called("python manage.py collectstatic"));
    }
}
