//! Deploy Conductor - Django 应用的启动编排与主机发布工具
//!
//! Usage:
//! - Container entrypoint: `deploy-conductor bootstrap -- gunicorn config.wsgi:application`
//! - Host release: `deploy-conductor release production`
//! - Manual backup: `deploy-conductor backup`
//! - List backups: `deploy-conductor backups`
//! - Retention cleanup: `deploy-conductor cleanup --days 14`

use clap::{Parser, Subcommand};

use deploy_conductor::config::env::constants::VERSION;
use deploy_conductor::config::EnvConfig;
use deploy_conductor::domain::Environment;
use deploy_conductor::error::{OrchestratorError, Result, EXIT_FAILURE};
use deploy_conductor::infra::{CommandRunner, StdinPrompter};
use deploy_conductor::services::release::summary;
use deploy_conductor::services::{
    BackupManager, BackupRequest, BootstrapSequencer, Handoff, ReleasePipeline, RetentionCleaner,
};

/// Django deployment conductor
#[derive(Parser, Debug)]
#[command(name = "deploy-conductor")]
#[command(about = "Container bootstrap and host release orchestration for Django services")]
#[command(version)]
struct Cli {
    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the release pipeline on this host
    Release {
        /// Target environment
        #[arg(default_value = "staging")]
        environment: Environment,

        /// Print the release summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Wait for dependencies, migrate, then exec the server command
    Bootstrap {
        /// Server command, e.g. `-- gunicorn config.wsgi:application`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        server: Vec<String>,
    },

    /// Create a database backup and apply retention
    Backup,

    /// List existing backups, newest first
    Backups,

    /// Delete backups older than the retention period
    Cleanup {
        /// Retention in days (defaults to BACKUP_RETENTION_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// 命令执行结果
enum Outcome {
    Done,
    Handoff(Handoff),
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    tracing::debug!("Deploy Conductor v{}", VERSION);

    let config = EnvConfig::from_env();

    // 阶段严格串行，单线程运行时即可
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };

    let result = runtime.block_on(dispatch(cli.command, &config));
    drop(runtime);

    let code = match result {
        Ok(Outcome::Done) => 0,
        Ok(Outcome::Handoff(handoff)) => exit_code_for(&handoff.exec()),
        Err(e) => exit_code_for(&e),
    };
    std::process::exit(code);
}

async fn dispatch(command: Command, config: &EnvConfig) -> Result<Outcome> {
    let runner = CommandRunner;

    match command {
        Command::Release { environment, json } => {
            let prompter = StdinPrompter::stdin();
            let report = ReleasePipeline::new(config, &runner, &prompter)
                .run(environment)
                .await?;

            let rendered = if json {
                summary::to_json(&report).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Cannot render JSON summary, falling back to text");
                    summary::render(&report)
                })
            } else {
                summary::render(&report)
            };
            println!("{}", rendered);
            Ok(Outcome::Done)
        }

        Command::Bootstrap { server } => {
            let handoff = BootstrapSequencer::new(config, &runner).run(server).await?;
            Ok(Outcome::Handoff(handoff))
        }

        Command::Backup => {
            let request = BackupRequest::from_config(config)?;
            let (record, removed) = BackupManager::new(&runner)
                .backup_and_prune(&request, config.backup.retention_days)
                .await?;
            println!(
                "Backup created: {} ({} bytes), {} expired backup(s) removed",
                record.path.display(),
                record.compressed_size,
                removed
            );
            Ok(Outcome::Done)
        }

        Command::Backups => {
            let request = BackupRequest::from_config(config)?;
            let records = BackupManager::list(&request.output_dir, &request.database)?;
            if records.is_empty() {
                println!("No backups of '{}' in {}", request.database, request.output_dir.display());
            }
            for record in records {
                println!(
                    "{}  {:>12} bytes  {:>4} day(s) old",
                    record.path.display(),
                    record.compressed_size,
                    record.age_days()
                );
            }
            Ok(Outcome::Done)
        }

        Command::Cleanup { days } => {
            let request = BackupRequest::from_config(config)?;
            let retention = days.unwrap_or(config.backup.retention_days);
            let removed = RetentionCleaner::new(&request.output_dir, &request.database, retention).clean()?;
            println!("{} expired backup(s) removed", removed);
            Ok(Outcome::Done)
        }
    }
}

/// 记录错误并映射退出码
fn exit_code_for(err: &OrchestratorError) -> i32 {
    if err.is_clean_abort() {
        tracing::info!("{}", err);
        println!("{}", err);
    } else {
        tracing::error!(error = %err, "Fatal error");
        eprintln!("Error: {}", err);
    }
    err.exit_code()
}
