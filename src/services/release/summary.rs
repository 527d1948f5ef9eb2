//! 发布摘要渲染

use chrono::Local;
use std::fmt::Write;
use tracing::{info, warn};

use crate::domain::deploy::StageStatus;

use super::ReleaseReport;

/// 发布结束时打印的文本摘要
pub fn render(report: &ReleaseReport) -> String {
    let run = &report.run;
    let mut out = String::new();

    let _ = writeln!(out, "==================== Release Summary ====================");
    let _ = writeln!(out, "Environment : {}", run.environment);
    let _ = writeln!(
        out,
        "Timestamp   : {}",
        run.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "Host        : {}", run.host);
    let _ = writeln!(out, "Branch      : {}", run.branch);
    let _ = writeln!(out, "Commit      : {}", run.commit.as_deref().unwrap_or("unknown"));
    let _ = writeln!(out, "---------------------------------------------------------");

    for stage in &run.stages {
        let marker = match stage.status {
            StageStatus::Success => "[ok]  ",
            StageStatus::Failed => "[FAIL]",
            StageStatus::Skipped => "[skip]",
            StageStatus::Pending | StageStatus::Running => "[ -- ]",
        };
        let _ = write!(out, "{} {:<22}", marker, stage.display_name);
        if let Some(ms) = stage.duration_ms {
            let _ = write!(out, " {:>7.1}s", ms as f64 / 1000.0);
        }
        if let Some(ref message) = stage.message {
            let _ = write!(out, "  {}", message);
        }
        out.push('\n');
    }

    if let Some(ref backup) = report.backup {
        let _ = writeln!(out, "---------------------------------------------------------");
        let _ = writeln!(
            out,
            "Backup      : {} ({} bytes)",
            backup.path.display(),
            backup.compressed_size
        );
    }
    let _ = write!(out, "=========================================================");
    out
}

/// 以结构化字段将摘要写入日志，每个阶段一条
pub fn log(report: &ReleaseReport) {
    let run = &report.run;
    for stage in &run.stages {
        let detail = stage.message.as_deref().unwrap_or("");
        if stage.status == StageStatus::Failed {
            warn!(
                stage = %stage.display_name,
                status = %stage.status.as_str(),
                duration_ms = stage.duration_ms,
                detail = %detail,
                "Stage summary"
            );
        } else {
            info!(
                stage = %stage.display_name,
                status = %stage.status.as_str(),
                duration_ms = stage.duration_ms,
                detail = %detail,
                "Stage summary"
            );
        }
    }

    if let Some(ref backup) = report.backup {
        info!(
            path = %backup.path.display(),
            size_bytes = backup.compressed_size,
            "Backup summary"
        );
    }

    info!(
        environment = %run.environment,
        host = %run.host,
        branch = %run.branch,
        commit = %run.commit.as_deref().unwrap_or("unknown"),
        degraded = run.has_failures(),
        "Release finished"
    );
}

/// 完整报告的 JSON 形式
pub fn to_json(report: &ReleaseReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::Environment;
    use crate::services::release::{stage, ReleaseContext};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn report() -> ReleaseReport {
        let mut ctx = ReleaseContext::new(Environment::Production, "web-1");
        ctx.begin(stage::CONFIRM);
        ctx.succeed(stage::CONFIRM, None);
        ctx.begin(stage::BACKUP);
        ctx.fail(stage::BACKUP, "pg_dump exited with code 1");
        ctx.skip(stage::TESTS, "not run in production");
        ReleaseReport {
            run: ctx.finish(),
            backup: None,
            health: None,
        }
    }

    #[test]
    fn test_render_lists_every_stage() {
        let text = render(&report());

        assert!(text.contains("Environment : production"));
        assert!(text.contains("[ok]   Confirmation"));
        assert!(text.contains("[FAIL] Database Backup"));
        assert!(text.contains("pg_dump exited with code 1"));
        assert!(text.contains("[skip] Run Tests"));
        assert!(text.contains("[ -- ] Health Check"));
    }

    #[test]
    fn test_log_emits_each_stage_outcome() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        let report = report();
        tracing::subscriber::with_default(subscriber, || log(&report));

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let stage_lines: Vec<&str> = output.lines().filter(|l| l.contains("Stage summary")).collect();
        assert_eq!(stage_lines.len(), report.run.stages.len());
        assert!(output.contains("stage=Database Backup status=failed"));
        assert!(output.contains("detail=pg_dump exited with code 1"));
        assert!(output.contains("stage=Run Tests status=skipped"));
        assert!(output.contains("degraded=true"));
        assert!(output.contains("Release finished"));
    }
}
