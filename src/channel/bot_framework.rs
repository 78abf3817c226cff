//! Bot Framework 频道
//!
//! POST /api/messages 接收 Activity：
//! - `message`：构造回合交给 TurnDispatcher
//! - `conversationUpdate`（含 membersAdded）：向新成员发送欢迎语
//!
//! 解析后立即返回 202，耗时处理在后台执行。回复发往
//! `{serviceUrl}/v3/conversations/{conversation.id}/activities/{activity.id}`。
//! 入站 JWT 校验与出站 token 获取不在本模块范围内，出站可配置固定 bearer token。

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{ChannelAccount, Outbound, ReplyChannel};
use crate::core::{BotError, ShutdownManager, Turn, TurnDispatcher};

/// 会话引用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
}

/// Bot Framework Activity（只解析用到的字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// RFC 3339 时间戳
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub from: ChannelAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// 回复某个入站 Activity 的 HTTP 通道
pub struct BotFrameworkChannel {
    client: reqwest::Client,
    url: String,
    /// 机器人账号（回复的 from）
    bot: ChannelAccount,
    /// 用户账号（回复的 recipient）
    user: ChannelAccount,
    conversation: ConversationAccount,
    reply_to_id: Option<String>,
    bearer_token: Option<String>,
}

impl BotFrameworkChannel {
    /// 为入站 activity 构造回复通道；缺少 serviceUrl 或会话 id 时返回 None
    pub fn for_activity(
        client: reqwest::Client,
        activity: &Activity,
        bearer_token: Option<String>,
    ) -> Option<Self> {
        let service_url = activity.service_url.as_deref()?.trim_end_matches('/');
        if activity.conversation.id.is_empty() {
            return None;
        }
        let url = match &activity.id {
            Some(id) => format!(
                "{}/v3/conversations/{}/activities/{}",
                service_url, activity.conversation.id, id
            ),
            None => format!(
                "{}/v3/conversations/{}/activities",
                service_url, activity.conversation.id
            ),
        };
        Some(Self {
            client,
            url,
            bot: activity.recipient.clone(),
            user: activity.from.clone(),
            conversation: activity.conversation.clone(),
            reply_to_id: activity.id.clone(),
            bearer_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn reply(&self, outbound: Outbound) -> Activity {
        let (kind, text) = match outbound {
            Outbound::Text(text) => ("message", Some(text)),
            Outbound::Typing => ("typing", None),
        };
        Activity {
            kind: kind.to_string(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            from: self.bot.clone(),
            recipient: self.user.clone(),
            conversation: self.conversation.clone(),
            text,
            reply_to_id: self.reply_to_id.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ReplyChannel for BotFrameworkChannel {
    async fn send(&self, outbound: Outbound) -> Result<(), BotError> {
        let mut req = self.client.post(&self.url).json(&self.reply(outbound));
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| BotError::Delivery(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Delivery(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

/// Webhook 服务状态
pub struct BotState {
    pub dispatcher: Arc<TurnDispatcher>,
    pub client: reqwest::Client,
    pub bearer_token: Option<String>,
    pub shutdown: ShutdownManager,
}

impl BotState {
    pub fn new(dispatcher: Arc<TurnDispatcher>, shutdown: ShutdownManager) -> Self {
        Self {
            dispatcher,
            client: reqwest::Client::new(),
            bearer_token: None,
            shutdown,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    fn turn_for(&self, activity: &Activity) -> Option<Turn> {
        let channel = BotFrameworkChannel::for_activity(
            self.client.clone(),
            activity,
            self.bearer_token.clone(),
        )?;
        let turn = Turn::new(
            activity.conversation.id.clone(),
            activity.text.clone().unwrap_or_default(),
            Arc::new(channel),
        )
        .with_accounts(activity.from.clone(), activity.recipient.clone())
        .with_cancel(self.shutdown.turn_token());
        Some(turn)
    }
}

/// 创建 Webhook 路由
pub fn create_router(state: Arc<BotState>) -> Router {
    Router::new()
        .route("/api/messages", post(messages_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST /api/messages
async fn messages_handler(
    State(state): State<Arc<BotState>>,
    Json(activity): Json<Activity>,
) -> StatusCode {
    tracing::info!(
        kind = %activity.kind,
        conversation = %activity.conversation.id,
        channel = activity.channel_id.as_deref().unwrap_or("-"),
        "activity received"
    );

    match activity.kind.as_str() {
        "message" => {
            let Some(turn) = state.turn_for(&activity) else {
                return StatusCode::BAD_REQUEST;
            };
            state.dispatcher.submit(turn);
        }
        "conversationUpdate" if !activity.members_added.is_empty() => {
            let Some(turn) = state.turn_for(&activity) else {
                return StatusCode::BAD_REQUEST;
            };
            let handler = Arc::clone(state.dispatcher.handler());
            let members = activity.members_added;
            tokio::spawn(async move {
                let sent = handler.on_members_added(&members, &turn).await;
                tracing::debug!(sent, "welcome messages sent");
            });
        }
        other => tracing::debug!("ignoring activity type {}", other),
    }
    StatusCode::ACCEPTED
}

/// 在 port 上提供 Webhook 服务，直到收到关闭信号
pub async fn serve(state: Arc<BotState>, port: u16) -> anyhow::Result<()> {
    use anyhow::Context;

    let shutdown = state.shutdown.clone();
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Bot Framework endpoint listening on http://{}/api/messages", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .context("webhook server")?;
    Ok(())
}
