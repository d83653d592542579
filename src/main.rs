//! aigent 命令行入口
//!
//! 用法：`aigent [--config PATH] GOAL...`
//! 初始化日志与引擎，订阅事件流并逐条打印，运行结束后输出最终答案；失败时退出码为 1。

use std::path::PathBuf;
use std::process::ExitCode;

use aigent::broker::{Subscription, AGENT_EVENT_NAME};
use aigent::core::{create_engine_builder, AgentError};
use anyhow::{bail, Context};

struct CliArgs {
    config: Option<PathBuf>,
    goal: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => bail!("usage: aigent [--config PATH] GOAL..."),
            _ => words.push(arg),
        }
    }
    let goal = words.join(" ");
    if goal.trim().is_empty() {
        bail!("usage: aigent [--config PATH] GOAL...");
    }
    Ok(CliArgs { config, goal })
}

/// 把事件流打印到 stderr，直到订阅结束
async fn print_events(mut subscription: Subscription) {
    while let Some(frame) = subscription.recv_frame().await {
        if frame.event.as_deref() != Some(AGENT_EVENT_NAME) {
            continue;
        }
        match frame.agent_event() {
            Ok(event) => eprintln!("[{:<9}] {:<20} {}", event.status.as_str(), event.id, event.message),
            Err(e) => tracing::warn!(error = %e, "undecodable event frame"),
        }
    }
}

/// 错误类别加消息；Display 已包含内部原因，不再逐级展开 source
fn error_line(err: &AgentError) -> String {
    format!("{}: {}", err.kind(), err)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    aigent::observability::init();

    let args = parse_args()?;
    let components = create_engine_builder(args.config)
        .context("Failed to load configuration")?
        .build()
        .context("Failed to build engine")?;

    let subscription = components
        .broker
        .subscribe("cli")
        .await
        .context("Failed to subscribe to events")?;
    let printer = tokio::spawn(print_events(subscription));

    let result = components.engine.execute(&args.goal).await;

    // 关闭代理后打印任务会读完剩余帧并退出
    components.broker.shutdown().await;
    let _ = printer.await;

    match result {
        Ok(answer) => {
            println!("{answer}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", error_line(&e));
            Ok(ExitCode::from(1))
        }
    }
}
