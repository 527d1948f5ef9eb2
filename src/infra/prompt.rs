//! 交互式输入
//!
//! 确认与覆盖提示都经由 `Prompter`，读取失败或 EOF 视为空输入

use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

#[async_trait]
pub trait Prompter: Send + Sync {
    /// 输出问题并读取一行回答（不含换行符）
    async fn ask(&self, question: &str) -> String;
}

/// 按行读取回答的提示器
///
/// 读取器在整个进程内只创建一次，管道输入的后续行不会随缓冲区丢失
pub struct LinePrompter<R> {
    reader: Mutex<R>,
}

/// 终端提示器
pub type StdinPrompter = LinePrompter<BufReader<Stdin>>;

impl<R> LinePrompter<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

impl LinePrompter<BufReader<Stdin>> {
    /// 从进程标准输入读取
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> Prompter for LinePrompter<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn ask(&self, question: &str) -> String {
        {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{} ", question);
            let _ = stdout.flush();
        }

        let mut line = String::new();
        let mut reader = self.reader.lock().await;
        match reader.read_line(&mut line).await {
            Ok(_) => line.trim_end_matches(['\r', '\n']).to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read answer, treating as empty");
                String::new()
            }
        }
    }
}
