//! 基础设施模块
//!
//! 封装外部依赖（命令执行、终端交互等）

pub mod command;
pub mod prompt;

pub use command::{CommandExecutor, CommandOutput, CommandRunner, CommandSpec};
pub use prompt::{LinePrompter, Prompter, StdinPrompter};
