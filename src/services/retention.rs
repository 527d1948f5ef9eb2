//! 备份保留期清理
//!
//! 只有匹配所配置数据库备份命名模式的文件才会被考虑删除

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::domain::backup::is_backup_file;
use crate::error::Result;

const SECS_PER_DAY: u64 = 86_400;

pub struct RetentionCleaner {
    dir: PathBuf,
    database: String,
    retention: Duration,
}

impl RetentionCleaner {
    pub fn new(dir: impl AsRef<Path>, database: impl Into<String>, retention_days: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            database: database.into(),
            retention: Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY),
        }
    }

    /// 删除过期备份，返回删除数量
    pub fn clean(&self) -> Result<usize> {
        self.clean_at(SystemTime::now())
    }

    pub fn clean_at(&self, now: SystemTime) -> Result<usize> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "Backup directory does not exist, nothing to clean");
            return Ok(0);
        }

        let cutoff = now.checked_sub(self.retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_backup_file(&self.database, &path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat backup, skipping");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "No modification time, skipping");
                    continue;
                }
            };

            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Deleted expired backup");
                        deleted += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete backup"),
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            database = %self.database,
            retention_days = self.retention.as_secs() / SECS_PER_DAY,
            deleted = deleted,
            "Retention cleanup finished"
        );
        Ok(deleted)
    }
}
