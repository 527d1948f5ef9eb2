//! 环境变量配置加载
//!
//! 所有配置在入口处读取一次，之后以 `EnvConfig` 显式传递给各组件

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::config::env::constants::*;

/// 环境配置
#[derive(Clone)]
pub struct EnvConfig {
    /// 主数据库 URL
    pub database_url: Option<String>,
    /// 缓存 URL（可选）
    pub cache_url: Option<String>,
    /// 管理员账号配置
    pub admin: AdminConfig,
    /// Django 管理命令前缀 (e.g. `python manage.py`)
    pub manage_command: Vec<String>,
    /// 依赖安装命令
    pub pip_command: String,
    /// 发布工作目录
    pub project_dir: PathBuf,
    /// 备份配置
    pub backup: BackupConfig,
    /// 就绪探测配置
    pub probe: ProbeConfig,
    /// systemd 服务配置
    pub services: ServiceConfig,
    /// 发布后健康检查 URL
    pub health_url: String,
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // URL 中的密码替换为 ***
        f.debug_struct("EnvConfig")
            .field("database_url", &self.database_url.as_deref().map(redact_url))
            .field("cache_url", &self.cache_url.as_deref().map(redact_url))
            .field("admin", &self.admin)
            .field("manage_command", &self.manage_command)
            .field("pip_command", &self.pip_command)
            .field("project_dir", &self.project_dir)
            .field("backup", &self.backup)
            .field("probe", &self.probe)
            .field("services", &self.services)
            .field("health_url", &self.health_url)
            .finish()
    }
}

/// 隐藏 URL 中的密码；无法解析时整体隐藏
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// 管理员账号配置
///
/// 用户名与密码缺一则跳过创建
#[derive(Clone, Default)]
pub struct AdminConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: String,
}

impl AdminConfig {
    /// 用户名与密码均已配置时返回 (username, password)
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("email", &self.email)
            .finish()
    }
}

/// 备份配置
#[derive(Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub retention_days: u32,
    /// 以下字段缺省时回退到 DATABASE_URL 中的对应部分
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl std::fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupConfig")
            .field("dir", &self.dir)
            .field("retention_days", &self.retention_days)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// 就绪探测配置
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub database_max_attempts: u32,
    pub cache_max_attempts: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            database_max_attempts: DB_WAIT_MAX_ATTEMPTS,
            cache_max_attempts: CACHE_WAIT_MAX_ATTEMPTS,
            interval: Duration::from_secs(WAIT_INTERVAL_SECS),
            timeout: Duration::from_secs(WAIT_TIMEOUT_SECS),
        }
    }
}

/// systemd 服务配置
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// 应用服务 (e.g. gunicorn)
    pub primary: String,
    /// 反向代理服务 (e.g. nginx)
    pub proxy: String,
    /// systemctl 是否需要 sudo
    pub use_sudo: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            primary: DEFAULT_SERVICE_NAME.to_string(),
            proxy: DEFAULT_PROXY_SERVICE_NAME.to_string(),
            use_sudo: true,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源加载配置
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_bool = |key: &str| {
            get(key).map(|v| {
                v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
            })
        };

        let database_url = get("DATABASE_URL");

        // Cache URL - 支持旧名称兼容
        let cache_url = get("REDIS_URL").or_else(|| get("CACHE_URL"));

        let admin = AdminConfig {
            username: get("DJANGO_SUPERUSER_USERNAME"),
            password: get("DJANGO_SUPERUSER_PASSWORD"),
            email: get("DJANGO_SUPERUSER_EMAIL").unwrap_or_default(),
        };

        let manage_command = split_command(
            &get("MANAGE_COMMAND").unwrap_or_else(|| DEFAULT_MANAGE_COMMAND.to_string()),
        );
        let pip_command = get("PIP_COMMAND").unwrap_or_else(|| DEFAULT_PIP_COMMAND.to_string());

        let project_dir = get("PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let backup = BackupConfig {
            dir: get("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            retention_days: parse_value(get("BACKUP_RETENTION_DAYS"), "BACKUP_RETENTION_DAYS")
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            database: get("DB_NAME"),
            user: get("DB_USER"),
            password: get("DB_PASSWORD"),
            host: get("DB_HOST"),
            port: parse_value(get("DB_PORT"), "DB_PORT"),
        };

        let defaults = ProbeConfig::default();
        let probe = ProbeConfig {
            database_max_attempts: parse_value(get("DB_WAIT_MAX_ATTEMPTS"), "DB_WAIT_MAX_ATTEMPTS")
                .unwrap_or(defaults.database_max_attempts),
            cache_max_attempts: parse_value(get("CACHE_WAIT_MAX_ATTEMPTS"), "CACHE_WAIT_MAX_ATTEMPTS")
                .unwrap_or(defaults.cache_max_attempts),
            interval: parse_value(get("WAIT_INTERVAL_SECS"), "WAIT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            timeout: parse_value(get("WAIT_TIMEOUT_SECS"), "WAIT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };

        let services = ServiceConfig {
            primary: get("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            proxy: get("PROXY_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_PROXY_SERVICE_NAME.to_string()),
            use_sudo: get_bool("SYSTEMCTL_SUDO").unwrap_or(true),
        };

        let health_url = get("HEALTH_URL").unwrap_or_else(|| DEFAULT_HEALTH_URL.to_string());

        Self {
            database_url,
            cache_url,
            admin,
            manage_command,
            pip_command,
            project_dir,
            backup,
            probe,
            services,
            health_url,
        }
    }

    /// 管理命令的程序名与前置参数
    pub fn manage_program(&self) -> (&str, Vec<&str>) {
        match self.manage_command.split_first() {
            Some((program, rest)) => (program.as_str(), rest.iter().map(String::as_str).collect()),
            None => ("python", vec!["manage.py"]),
        }
    }
}

fn parse_value<T: std::str::FromStr>(value: Option<String>, key: &str) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key = key, value = %value, "Ignoring unparseable configuration value");
            None
        }
    }
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// 常量
pub mod constants {
    pub use crate::domain::backup::DEFAULT_RETENTION_DAYS;

    /// 数据库最大探测次数
    pub const DB_WAIT_MAX_ATTEMPTS: u32 = 30;

    /// 缓存最大探测次数
    pub const CACHE_WAIT_MAX_ATTEMPTS: u32 = 10;

    /// 探测间隔（秒）
    pub const WAIT_INTERVAL_SECS: u64 = 2;

    /// 单次探测超时（秒）
    pub const WAIT_TIMEOUT_SECS: u64 = 5;

    /// HTTP 健康检查超时（秒）
    pub const HEALTH_TIMEOUT_SECS: u64 = 10;

    pub const DEFAULT_MANAGE_COMMAND: &str = "python manage.py";
    pub const DEFAULT_PIP_COMMAND: &str = "pip";
    pub const DEFAULT_BACKUP_DIR: &str = "./backups";
    pub const DEFAULT_SERVICE_NAME: &str = "gunicorn";
    pub const DEFAULT_PROXY_SERVICE_NAME: &str = "nginx";
    pub const DEFAULT_HEALTH_URL: &str = "http://127.0.0.1:8000/api/";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
