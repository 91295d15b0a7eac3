//! Hive CLI：标准输入 REPL
//!
//! 用文件数据源 + Mock 生成能力演示完整回合流程（无需 API Key）。
//! 输入 exit 退出；RUST_LOG=debug 可看到调度 trace。

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use hive::config::load_config;
use hive::core::{Orchestrator, TurnRequest};
use hive::data::FileDataSource;
use hive::llm::MockLlmClient;
use hive::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let data = Arc::new(FileDataSource::new(cfg.data.root.clone()));
    let orchestrator = Orchestrator::new(&cfg, Arc::new(MockLlmClient), data);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();
    let mut session_id: Option<String> = None;

    stdout
        .write_all("hive ready - type your message (exit to quit)\n".as_bytes())
        .await?;

    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let reply = orchestrator
            .handle_turn(TurnRequest::new(session_id.clone(), input))
            .await;
        session_id = Some(reply.session_id.clone());

        stdout
            .write_all(format!("\nhive> {}\n", reply.text).as_bytes())
            .await?;
        if !reply.widgets.is_empty() {
            let kinds: Vec<&str> = reply.widgets.iter().map(|w| w.kind.as_str()).collect();
            stdout
                .write_all(format!("      [widgets: {}]\n", kinds.join(", ")).as_bytes())
                .await?;
        }
        for entry in &reply.trace {
            tracing::debug!("trace: {}", entry);
        }
        stdout.write_all(b"\n").await?;
    }

    Ok(())
}
