//! Deploy Conductor - Django 应用的启动编排与主机发布工具
//!
//! 容器启动时等待依赖、执行迁移后交给应用服务器；主机上按阶段执行发布流程

pub mod error;
pub mod infra;
pub mod domain;
pub mod config;
pub mod services;
