//! Orca 命令行入口
//!
//! `orca <instruction> [--max-turns N] [--config PATH]`：运行一个任务，输出最终状态（JSON）；
//! 任务未 COMPLETED 时以非零码退出。

use std::path::PathBuf;

use anyhow::{bail, Context};
use orca::config::load_config;
use orca::{Orchestrator, TaskStatus};

struct Args {
    instruction: String,
    max_turns: Option<u32>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut instruction = Vec::new();
    let mut max_turns = None;
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--max-turns" => {
                let value = args.next().context("--max-turns requires a value")?;
                max_turns = Some(value.parse().context("--max-turns must be a positive integer")?);
            }
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config requires a path")?));
            }
            "-h" | "--help" => {
                println!("usage: orca <instruction> [--max-turns N] [--config PATH]");
                std::process::exit(0);
            }
            _ => instruction.push(arg),
        }
    }

    if instruction.is_empty() {
        bail!("usage: orca <instruction> [--max-turns N] [--config PATH]");
    }
    Ok(Args {
        instruction: instruction.join(" "),
        max_turns,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orca::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config).context("Failed to load config")?;
    let orchestrator = Orchestrator::from_config(&cfg).context("Failed to create orchestrator")?;

    let id = orchestrator.create_task(args.instruction, args.max_turns).await;
    let task = orchestrator.run_task(&id).await?;

    println!("{}", serde_json::to_string_pretty(&task.status_view())?);
    if task.status != TaskStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
