//! 依赖就绪探测
//!
//! 对注入的连通性检查做有限次重试。启动时数据库探测是必需的，缓存探测仅作参考

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_postgres::NoTls;
use tracing::{info, warn};

use crate::config::ProbeConfig;
use crate::domain::connection::{CacheTarget, ConnectionTarget};
use crate::domain::probe::{DependencyKind, ProbeAttempt, ProbeState};
use crate::error::{OrchestratorError, Result};

/// 一次真实的连通性尝试，自带超时
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn check(&self) -> std::result::Result<(), String>;
}

/// 建立一个真实的 PostgreSQL 会话并立即关闭
pub struct PostgresCheck {
    config: tokio_postgres::Config,
    timeout: Duration,
}

impl PostgresCheck {
    pub fn new(target: &ConnectionTarget, timeout: Duration) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&target.host)
            .port(target.port)
            .user(&target.user)
            .dbname(&target.database)
            .connect_timeout(timeout);
        if !target.password.is_empty() {
            config.password(&target.password);
        }
        Self { config, timeout }
    }
}

#[async_trait]
impl ConnectivityCheck for PostgresCheck {
    async fn check(&self) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.timeout, self.config.connect(NoTls)).await {
            Ok(Ok((client, connection))) => {
                drop(client);
                drop(connection);
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("connection timed out after {:?}", self.timeout)),
        }
    }
}

/// 发送 RESP `PING` 并等待应答
///
/// `-NOAUTH` 也算可达：服务已启动，认证交给应用处理
pub struct RedisCheck {
    address: String,
    timeout: Duration,
}

impl RedisCheck {
    pub fn new(target: &CacheTarget, timeout: Duration) -> Self {
        Self {
            address: target.address(),
            timeout,
        }
    }

    async fn ping(&self) -> std::result::Result<(), String> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| e.to_string())?;
        stream
            .write_all(b"PING\r\n")
            .await
            .map_err(|e| e.to_string())?;

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.map_err(|e| e.to_string())?;
        let reply = String::from_utf8_lossy(&buf[..n]);
        if reply.starts_with("+PONG") || reply.starts_with("-NOAUTH") {
            Ok(())
        } else if n == 0 {
            Err("connection closed without reply".to_string())
        } else {
            Err(format!("unexpected reply: {}", reply.trim()))
        }
    }
}

#[async_trait]
impl ConnectivityCheck for RedisCheck {
    async fn check(&self) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.timeout, self.ping()).await {
            Ok(result) => result,
            Err(_) => Err(format!("ping timed out after {:?}", self.timeout)),
        }
    }
}

/// 有限重试探测：`Idle -> Probing -> {Ready, Exhausted}`
#[derive(Debug)]
pub struct ReadinessProbe {
    kind: DependencyKind,
    max_attempts: u32,
    interval: Duration,
    state: ProbeState,
}

impl ReadinessProbe {
    pub fn new(kind: DependencyKind, max_attempts: u32, interval: Duration) -> Self {
        Self {
            kind,
            max_attempts: max_attempts.max(1),
            interval,
            state: ProbeState::Idle,
        }
    }

    pub fn for_database(config: &ProbeConfig) -> Self {
        Self::new(DependencyKind::Database, config.database_max_attempts, config.interval)
    }

    pub fn for_cache(config: &ProbeConfig) -> Self {
        Self::new(DependencyKind::Cache, config.cache_max_attempts, config.interval)
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// 反复调用 `check`，直到成功或用完尝试次数
    ///
    /// 返回实际尝试次数。成功后和最后一次失败后都不再等待
    pub async fn wait_until_ready(&mut self, check: &dyn ConnectivityCheck) -> Result<u32> {
        self.state = ProbeState::Probing;
        info!(kind = %self.kind, max_attempts = self.max_attempts, "Waiting for {}", self.kind);

        let mut attempt = ProbeAttempt::first(self.kind, self.max_attempts, self.interval);
        loop {
            match check.check().await {
                Ok(()) => {
                    self.state = ProbeState::Ready;
                    info!(kind = %self.kind, attempt = attempt.attempt, "{} is ready", self.kind);
                    return Ok(attempt.attempt);
                }
                Err(cause) => {
                    warn!(
                        kind = %self.kind,
                        attempt = attempt.attempt,
                        max_attempts = attempt.max_attempts,
                        cause = %cause,
                        "{} not ready ({}/{})",
                        self.kind,
                        attempt.attempt,
                        attempt.max_attempts
                    );
                }
            }

            match attempt.next() {
                Some(next) => {
                    tokio::time::sleep(attempt.interval).await;
                    attempt = next;
                }
                None => {
                    self.state = ProbeState::Exhausted;
                    return Err(OrchestratorError::DependencyUnavailable {
                        kind: self.kind,
                        attempts: attempt.attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    /// 第 `succeed_on` 次调用（从 1 计）之前都失败；为 None 时永不成功
    struct CountingCheck {
        succeed_on: Option<u32>,
        calls: AtomicU32,
    }

    impl CountingCheck {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                succeed_on,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectivityCheck for CountingCheck {
        async fn check(&self) -> std::result::Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on {
                Some(k) if n >= k => Ok(()),
                _ => Err("connection refused".to_string()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exactly_n_attempts() {
        let check = CountingCheck::new(None);
        let mut probe = ReadinessProbe::new(DependencyKind::Database, 5, Duration::from_secs(2));
        let started = Instant::now();

        let err = probe.wait_until_ready(&check).await.unwrap_err();

        assert_eq!(check.calls(), 5);
        assert!(matches!(
            err,
            OrchestratorError::DependencyUnavailable {
                kind: DependencyKind::Database,
                attempts: 5
            }
        ));
        assert_eq!(probe.state(), ProbeState::Exhausted);
        // 五次尝试之间等待四次，最后一次之后不等待
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_immediately_on_success() {
        let check = CountingCheck::new(Some(3));
        let mut probe = ReadinessProbe::new(DependencyKind::Cache, 10, Duration::from_secs(2));
        let started = Instant::now();

        let attempts = probe.wait_until_ready(&check).await.unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(check.calls(), 3);
        assert_eq!(probe.state(), ProbeState::Ready);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let check = CountingCheck::new(Some(1));
        let mut probe = ReadinessProbe::new(DependencyKind::Database, 3, Duration::from_secs(2));
        let started = Instant::now();

        probe.wait_until_ready(&check).await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_redis_check_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"+PONG\r\n").await;
        });

        let target = CacheTarget {
            host: "127.0.0.1".to_string(),
            port,
        };
        let check = RedisCheck::new(&target, Duration::from_secs(2));
        assert!(check.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_postgres_check_fails_on_closed_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ConnectionTarget::parse(&format!("postgres://u:p@127.0.0.1:{}/d", port)).unwrap();
        let check = PostgresCheck::new(&target, Duration::from_secs(2));
        assert!(check.check().await.is_err());
    }
}
