//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod backup;
pub mod connection;
pub mod deploy;
pub mod probe;

// Re-exports for convenience
pub use backup::BackupRecord;
pub use connection::{CacheTarget, ConnectionScheme, ConnectionTarget};
pub use deploy::{DeployStage, DeployStatus, DeploymentRun, Environment, StageStatus};
pub use probe::{DependencyKind, ProbeAttempt, ProbeState};
