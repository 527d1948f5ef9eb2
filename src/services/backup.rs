//! 数据库备份的创建与列举
//!
//! `pg_dump` 先写入隐藏的 `.sql.partial`，成功后重命名为 `{db}_backup_{ts}.sql`；
//! `gzip -c` 输出到隐藏的 `.sql.gz.partial`，成功后才重命名为最终的 `.sql.gz`。
//! 任一步骤被中断，目录里都不会出现匹配备份模式的残缺文件

use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

use crate::config::EnvConfig;
use crate::domain::backup::{
    backup_file_name, compressing_file_name, dump_file_name, format_timestamp, parse_backup_file_name,
    partial_file_name, BackupRecord,
};
use crate::domain::connection::{ConnectionTarget, DEFAULT_POSTGRES_PORT};
use crate::error::{OrchestratorError, Result};
use crate::infra::command::{CommandExecutor, CommandSpec};
use crate::services::retention::RetentionCleaner;

/// 一次备份所需的连接信息与输出目录
#[derive(Clone)]
pub struct BackupRequest {
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
}

impl BackupRequest {
    /// `DB_*` 优先，缺失项回退到 `DATABASE_URL`
    pub fn from_config(config: &EnvConfig) -> Result<Self> {
        let backup = &config.backup;
        let from_url = match config.database_url.as_deref() {
            Some(url) => Some(ConnectionTarget::parse(url)?),
            None => None,
        };

        let database = backup
            .database
            .clone()
            .or_else(|| from_url.as_ref().map(|t| t.database.clone()))
            .ok_or_else(|| OrchestratorError::missing("DB_NAME or DATABASE_URL is required for backups"))?;
        let user = backup
            .user
            .clone()
            .or_else(|| from_url.as_ref().map(|t| t.user.clone()))
            .ok_or_else(|| OrchestratorError::missing("DB_USER or DATABASE_URL is required for backups"))?;
        let password = backup
            .password
            .clone()
            .or_else(|| from_url.as_ref().map(|t| t.password.clone()))
            .unwrap_or_default();
        let host = backup
            .host
            .clone()
            .or_else(|| from_url.as_ref().map(|t| t.host.clone()))
            .unwrap_or_else(|| "localhost".to_string());
        let port = backup
            .port
            .or_else(|| from_url.as_ref().map(|t| t.port))
            .unwrap_or(DEFAULT_POSTGRES_PORT);

        Ok(Self {
            database,
            user,
            password,
            host,
            port,
            output_dir: backup.dir.clone(),
        })
    }
}

impl std::fmt::Debug for BackupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRequest")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

pub struct BackupManager<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> BackupManager<'a> {
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    /// 转储并压缩数据库，返回最终的备份记录
    pub async fn create(&self, request: &BackupRequest) -> Result<BackupRecord> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| {
                OrchestratorError::backup(format!(
                    "cannot create {}: {}",
                    request.output_dir.display(),
                    e
                ))
            })?;

        let now = Local::now();
        let timestamp = format_timestamp(now);
        let dir = &request.output_dir;
        let partial = dir.join(partial_file_name(&request.database, &timestamp));
        let dump = dir.join(dump_file_name(&request.database, &timestamp));
        let compressing = dir.join(compressing_file_name(&request.database, &timestamp));
        let compressed = dir.join(backup_file_name(&request.database, &timestamp));

        info!(database = %request.database, path = %dump.display(), "Creating database backup");

        // PGPASSWORD 只传给子进程
        let port = request.port.to_string();
        let partial_arg = partial.to_string_lossy().into_owned();
        let mut spec = CommandSpec::new("pg_dump").args([
            "-h",
            request.host.as_str(),
            "-p",
            port.as_str(),
            "-U",
            request.user.as_str(),
            "-d",
            request.database.as_str(),
            "-F",
            "p",
            "--no-password",
            "-f",
            partial_arg.as_str(),
        ]);
        if !request.password.is_empty() {
            spec = spec.env("PGPASSWORD", request.password.as_str());
        }

        let dump_result = self.executor.run(&spec).await;
        let dump_error = match dump_result {
            Ok(output) if output.success() => None,
            Ok(output) => Some(format!(
                "pg_dump exited with code {}: {}",
                output.code,
                output.stderr.trim()
            )),
            Err(e) => Some(format!("pg_dump could not run: {}", e)),
        };
        if let Some(cause) = dump_error {
            remove_if_exists(&partial).await;
            error!(database = %request.database, cause = %cause, "Backup dump failed");
            return Err(OrchestratorError::backup(cause));
        }

        if let Err(e) = tokio::fs::rename(&partial, &dump).await {
            remove_if_exists(&partial).await;
            return Err(OrchestratorError::backup(format!("cannot finalize dump: {}", e)));
        }

        let gzip = CommandSpec::new("gzip")
            .arg("-c")
            .arg(dump.to_string_lossy().into_owned())
            .stdout_to(&compressing);
        let gzip_error = match self.executor.run(&gzip).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(format!("gzip exited with code {}: {}", output.code, output.stderr.trim())),
            Err(e) => Some(format!("gzip could not run: {}", e)),
        };
        if let Some(cause) = gzip_error {
            remove_if_exists(&dump).await;
            remove_if_exists(&compressing).await;
            error!(database = %request.database, cause = %cause, "Backup compression failed");
            return Err(OrchestratorError::backup(cause));
        }

        if let Err(e) = tokio::fs::rename(&compressing, &compressed).await {
            remove_if_exists(&dump).await;
            remove_if_exists(&compressing).await;
            return Err(OrchestratorError::backup(format!("cannot finalize backup: {}", e)));
        }
        remove_if_exists(&dump).await;

        let metadata = tokio::fs::metadata(&compressed).await.map_err(|e| {
            OrchestratorError::backup(format!("compressed backup missing: {}", e))
        })?;

        info!(
            path = %compressed.display(),
            size_bytes = metadata.len(),
            "Backup created"
        );

        Ok(BackupRecord {
            database: request.database.clone(),
            timestamp: now.naive_local(),
            path: compressed,
            compressed_size: metadata.len(),
            age: std::time::Duration::ZERO,
        })
    }

    /// 独立备份：失败即致命，成功后执行保留期清理
    pub async fn backup_and_prune(
        &self,
        request: &BackupRequest,
        retention_days: u32,
    ) -> Result<(BackupRecord, usize)> {
        let record = self.create(request).await?;
        let removed = RetentionCleaner::new(&request.output_dir, &request.database, retention_days)
            .clean()?;
        Ok((record, removed))
    }

    /// 扫描 `dir` 中 `database` 的备份，最新的在前
    pub fn list(dir: &Path, database: &str) -> Result<Vec<BackupRecord>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let now = SystemTime::now();
        let mut records = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(timestamp) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_backup_file_name(database, n))
            else {
                continue;
            };

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();

            records.push(BackupRecord {
                database: database.to_string(),
                timestamp,
                path,
                compressed_size: metadata.len(),
                age,
            });
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove leftover file"),
    }
}
