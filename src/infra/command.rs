//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 逐行输出到 tracing 日志，同时保留完整 stdout/stderr
//! - 超时控制
//! - 仅作用于子进程的环境变量（凭据不会写入当前进程环境）
//!
//! `CommandExecutor` 是所有外部命令的唯一出口，测试中以 fake 实现替换

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};

/// 命令描述
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// 仅传给子进程的环境变量
    pub envs: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// stdout 直接写入该文件（二进制安全，不逐行记录）
    pub stdout_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// 命令行（不含环境变量）
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 环境变量只显示键名
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("command", &self.display())
            .field("work_dir", &self.work_dir)
            .field("env_keys", &env_keys)
            .field("timeout", &self.timeout)
            .field("stdout_file", &self.stdout_file)
            .finish()
    }
}

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 退出码（被信号终止时为 -1）
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout 与 stderr 合并
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// 外部命令执行接口
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, CommandError>;
}

/// 真实进程执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn run(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, CommandError> {
        debug!(command = %spec.display(), "Running command");

        let stdout = match spec.stdout_file {
            Some(ref path) => {
                let file = std::fs::File::create(path).map_err(CommandError::SpawnFailed)?;
                Stdio::from(file)
            }
            None => Stdio::piped(),
        };

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.work_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(CommandError::SpawnFailed)?;

        let stdout_task = tokio::spawn(collect_lines(child.stdout.take(), false));
        let stderr_task = tokio::spawn(collect_lines(child.stderr.take(), true));

        // 等待命令完成，支持超时
        let status = match spec.timeout {
            Some(timeout) => {
                tokio::select! {
                    status = child.wait() => status.map_err(CommandError::WaitFailed)?,
                    _ = tokio::time::sleep(timeout) => {
                        error!(command = %spec.display(), "Command timed out after {:?}", timeout);
                        let _ = child.kill().await;
                        stdout_task.abort();
                        stderr_task.abort();
                        return Err(CommandError::Timeout);
                    }
                }
            }
            None => child.wait().await.map_err(CommandError::WaitFailed)?,
        };

        // 等待日志读取完成
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

async fn collect_lines<R>(stream: Option<R>, is_stderr: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(stream) = stream else {
        return collected;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            if is_stderr {
                warn!(target: "deploy_conductor::output", "{}", line);
            } else {
                info!(target: "deploy_conductor::output", "{}", line);
            }
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

/// 执行命令并要求成功
///
/// 启动失败或非零退出均映射为 `CommandFailed { stage, .. }`
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    stage: &str,
    spec: &CommandSpec,
) -> Result<CommandOutput> {
    match executor.run(spec).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            error!(stage = stage, code = output.code, command = %spec.display(), "Command failed");
            Err(OrchestratorError::command(stage, output.code, output.stderr))
        }
        Err(e) => {
            error!(stage = stage, command = %spec.display(), error = %e, "Command could not run");
            Err(OrchestratorError::command(stage, -1, e.to_string()))
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! 可编排的 fake 执行器
    //!
    //! 默认所有命令成功；`pg_dump -f <path>` 会写出转储文件，`gzip <path>`
    //! 会生成 `<path>.gz` 并删除原文件，与真实工具的文件效果一致

    use super::*;
    use std::sync::Mutex;

    struct Rule {
        prefix: String,
        code: i32,
        stdout: String,
        stderr: String,
    }

    #[derive(Default)]
    pub struct FakeExecutor {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// 以 `prefix` 开头的命令行返回指定结果
        pub fn respond(self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> Self {
            self.rules.lock().unwrap().push(Rule {
                prefix: prefix.to_string(),
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
            self
        }

        pub fn succeed_with(self, prefix: &str, stdout: &str) -> Self {
            self.respond(prefix, 0, stdout, "")
        }

        pub fn fail(self, prefix: &str, code: i32, stderr: &str) -> Self {
            self.respond(prefix, code, "", stderr)
        }

        /// 所有已执行的命令行
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.display()).collect()
        }

        /// 所有已执行的命令描述
        pub fn specs(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn called(&self, prefix: &str) -> bool {
            self.calls().iter().any(|c| c.starts_with(prefix))
        }

        fn apply_file_effects(spec: &CommandSpec, success: bool) {
            match spec.program.as_str() {
                "pg_dump" => {
                    let target = spec
                        .args
                        .iter()
                        .position(|a| a == "-f")
                        .and_then(|i| spec.args.get(i + 1));
                    if let Some(path) = target {
                        // 真实 pg_dump 失败时也可能留下半截文件
                        let _ = std::fs::write(path, "-- PostgreSQL database dump\n");
                    }
                }
                "gzip" => {
                    let source = spec.args.last().and_then(|p| std::fs::read(p).ok());
                    if let (Some(data), Some(out)) = (source, spec.stdout_file.as_ref()) {
                        // 重定向目标在命令运行前就已创建，中断时留下截断的输出
                        let len = if success { data.len() } else { data.len() / 2 };
                        let _ = std::fs::write(out, &data[..len]);
                    }
                }
                _ => {}
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn run(
            &self,
            spec: &CommandSpec,
        ) -> std::result::Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(spec.clone());
            let line = spec.display();

            let output = self
                .rules
                .lock()
                .unwrap()
                .iter()
                .find(|r| line.starts_with(&r.prefix))
                .map(|r| CommandOutput {
                    code: r.code,
                    stdout: r.stdout.clone(),
                    stderr: r.stderr.clone(),
                })
                .unwrap_or_default();

            Self::apply_file_effects(spec, output.success());
            Ok(output)
        }
    }
}
