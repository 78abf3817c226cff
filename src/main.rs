//! relay-bot 入口
//!
//! 加载配置、初始化日志、装配 TurnHandler，在 channel.port 上提供 Bot Framework Webhook，
//! 收到 Ctrl+C / SIGTERM 后优雅关闭。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use relay_bot::channel::bot_framework::{serve, BotState};
use relay_bot::config::load_config;
use relay_bot::core::{ShutdownManager, TurnDispatcher};
use relay_bot::{create_turn_handler, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let handler = Arc::new(create_turn_handler(&cfg));
    let dispatcher = Arc::new(TurnDispatcher::new(handler));
    let state = BotState::new(dispatcher, (*shutdown).clone())
        .with_bearer_token(cfg.channel.bearer_token.clone());

    tracing::info!(name = %cfg.app.name, port = cfg.channel.port, "starting");
    serve(Arc::new(state), cfg.channel.port)
        .await
        .context("Bot Framework server failed")?;

    tracing::info!("shut down cleanly");
    Ok(())
}
