//! 服务层模块
//!
//! 包含启动编排与发布流程的核心逻辑

pub mod backup;
pub mod bootstrap;
pub mod confirm;
pub mod health;
pub mod readiness;
pub mod release;
pub mod retention;
pub mod service_control;

pub use backup::{BackupManager, BackupRequest};
pub use bootstrap::{BootstrapSequencer, Handoff};
pub use release::{ReleasePipeline, ReleaseReport};
pub use retention::RetentionCleaner;
