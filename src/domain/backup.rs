//! 备份相关领域模型
//!
//! 文件名即索引：`{database}_backup_{YYYYMMDD_HHMMSS}.sql.gz`

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 时间戳格式（秒精度）
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// 压缩后缀
pub const COMPRESSED_SUFFIX: &str = ".sql.gz";
/// 默认保留天数
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// 备份记录
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub database: String,
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
    pub compressed_size: u64,
    /// 基于文件修改时间计算
    #[serde(with = "duration_secs")]
    pub age: Duration,
}

impl BackupRecord {
    /// 年龄（天，向下取整）
    pub fn age_days(&self) -> u64 {
        self.age.as_secs() / 86_400
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// 格式化时间戳
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// SQL 转储文件名（压缩前）
pub fn dump_file_name(database: &str, timestamp: &str) -> String {
    format!("{}_backup_{}.sql", database, timestamp)
}

/// 转储进行中的临时文件名（隐藏文件，不匹配备份模式）
pub fn partial_file_name(database: &str, timestamp: &str) -> String {
    format!(".{}_backup_{}.sql.partial", database, timestamp)
}

/// 压缩进行中的临时文件名（隐藏文件，成功后才重命名为最终名）
pub fn compressing_file_name(database: &str, timestamp: &str) -> String {
    format!(".{}_backup_{}{}.partial", database, timestamp, COMPRESSED_SUFFIX)
}

/// 最终的压缩备份文件名
pub fn backup_file_name(database: &str, timestamp: &str) -> String {
    format!("{}_backup_{}{}", database, timestamp, COMPRESSED_SUFFIX)
}

/// 解析备份文件名，返回其时间戳
///
/// 仅当文件名精确匹配 `{database}_backup_{YYYYMMDD_HHMMSS}.sql.gz` 时返回 Some
pub fn parse_backup_file_name(database: &str, file_name: &str) -> Option<NaiveDateTime> {
    let rest = file_name.strip_prefix(database)?.strip_prefix("_backup_")?;
    let stamp = rest.strip_suffix(COMPRESSED_SUFFIX)?;

    let bytes = stamp.as_bytes();
    let shape_ok = bytes.len() == 15
        && bytes[8] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit());
    if !shape_ok {
        return None;
    }

    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// 判断路径是否为指定数据库的备份文件
pub fn is_backup_file(database: &str, path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| parse_backup_file_name(database, n))
        .is_some()
}
