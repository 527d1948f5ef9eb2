//! 发布后的健康检查
//!
//! 两个 systemd 单元检查加一次 HTTP 请求，结果只报告，不致命

use reqwest::{redirect, Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::env::constants::HEALTH_TIMEOUT_SECS;
use crate::config::ServiceConfig;
use crate::infra::command::CommandExecutor;
use crate::services::service_control::ServiceController;

/// 视为健康的状态码（不跟随重定向）
const ACCEPTED_STATUSES: [StatusCode; 3] = [StatusCode::OK, StatusCode::MOVED_PERMANENTLY, StatusCode::FOUND];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub primary_active: bool,
    pub proxy_active: bool,
    pub http_ok: bool,
}

impl HealthReport {
    pub fn all_passed(&self) -> bool {
        self.primary_active && self.proxy_active && self.http_ok
    }

    /// 失败检查的名称，用于阶段消息
    pub fn failures(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.primary_active {
            failed.push("primary service");
        }
        if !self.proxy_active {
            failed.push("proxy service");
        }
        if !self.http_ok {
            failed.push("http endpoint");
        }
        failed
    }
}

pub struct HealthChecker<'a> {
    services: &'a ServiceConfig,
    executor: &'a dyn CommandExecutor,
    url: String,
    timeout: Duration,
}

impl<'a> HealthChecker<'a> {
    pub fn new(services: &'a ServiceConfig, executor: &'a dyn CommandExecutor, url: impl Into<String>) -> Self {
        Self {
            services,
            executor,
            url: url.into(),
            timeout: Duration::from_secs(HEALTH_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn check(&self) -> HealthReport {
        let controller = ServiceController::new(self.services, self.executor);

        let primary_active = controller.is_active(&self.services.primary).await;
        log_check(&self.services.primary, primary_active);

        let proxy_active = controller.is_active(&self.services.proxy).await;
        log_check(&self.services.proxy, proxy_active);

        let http_ok = self.check_http().await;
        log_check(&self.url, http_ok);

        HealthReport {
            primary_active,
            proxy_active,
            http_ok,
        }
    }

    async fn check_http(&self) -> bool {
        let client = match Client::builder()
            .timeout(self.timeout)
            .redirect(redirect::Policy::none())
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to create HTTP client");
                return false;
            }
        };

        match client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                let accepted = ACCEPTED_STATUSES.contains(&status);
                if !accepted {
                    warn!(url = %self.url, status = status.as_u16(), "Unexpected health status");
                }
                accepted
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Health request failed");
                false
            }
        }
    }
}

fn log_check(target: &str, passed: bool) {
    if passed {
        info!(target_name = %target, "Health check passed");
    } else {
        warn!(target_name = %target, "Health check failed");
    }
}
