//! relay-console：标准输入输出对话前端
//!
//! 单个会话，与 relay-bot 使用同一个 TurnHandler；输入 quit / exit 或 Ctrl+D 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use relay_bot::channel::{ChannelAccount, ConsoleChannel};
use relay_bot::config::load_config;
use relay_bot::core::{ShutdownManager, ShutdownReason, Turn, TurnOutcome};
use relay_bot::{create_turn_handler, observability};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_stderr();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let handler = create_turn_handler(&cfg);
    let channel = Arc::new(ConsoleChannel::new(false));
    let conversation = format!("console-{}", uuid::Uuid::new_v4());
    let user = ChannelAccount::new("console-user");
    let bot = ChannelAccount::new(cfg.app.name.clone());

    let greeting = Turn::new(conversation.clone(), "", channel.clone())
        .with_accounts(user.clone(), bot.clone());
    handler.on_members_added(&[user.clone()], &greeting).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("you> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown.wait_for_shutdown() => break,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "quit" | "exit") {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        }

        let turn = Turn::new(conversation.clone(), text, channel.clone())
            .with_accounts(user.clone(), bot.clone())
            .with_cancel(shutdown.turn_token());
        if let TurnOutcome::Failed { phase, error } = handler.on_message(turn).await {
            tracing::debug!(%phase, "turn failed: {}", error);
        }
    }

    Ok(())
}
