//! 回合处理端到端测试：进度顺序、记忆写入、失败路径与会话并发

use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_bot::channel::{ChannelAccount, Outbound, RecordingChannel};
use relay_bot::core::{
    BotError, EngineError, OffloadExecutor, Turn, TurnDispatcher, TurnHandler, TurnOutcome,
    TurnPhase,
};
use relay_bot::memory::{Exchange, MemoryStore};
use relay_bot::react::{EngineFactory, ProgressSink, ReasoningEngine};
use relay_bot::tools::{ToolFactory, ToolSet};

type RunFn = dyn Fn(&str, &[Exchange], &ProgressSink) -> Result<String, EngineError> + Send + Sync;

/// 以闭包实现的推理引擎
struct FnEngine(Box<RunFn>);

impl ReasoningEngine for FnEngine {
    fn run(
        &self,
        input: &str,
        history: &[Exchange],
        progress: &ProgressSink,
    ) -> Result<String, EngineError> {
        (self.0)(input, history, progress)
    }
}

struct FixedEngine(Arc<FnEngine>);

#[async_trait]
impl EngineFactory for FixedEngine {
    async fn build(&self, _tools: ToolSet) -> Result<Arc<dyn ReasoningEngine>, BotError> {
        Ok(self.0.clone())
    }
}

struct NoTools;

#[async_trait]
impl ToolFactory for NoTools {
    async fn build(&self) -> Result<ToolSet, BotError> {
        Ok(ToolSet::default())
    }
}

struct BrokenTools;

#[async_trait]
impl ToolFactory for BrokenTools {
    async fn build(&self) -> Result<ToolSet, BotError> {
        Err(BotError::Setup("api spec fetch failed".to_string()))
    }
}

fn handler_with<F>(tools: Arc<dyn ToolFactory>, timeout_secs: u64, run: F) -> TurnHandler
where
    F: Fn(&str, &[Exchange], &ProgressSink) -> Result<String, EngineError> + Send + Sync + 'static,
{
    TurnHandler::new(
        MemoryStore::new(2),
        tools,
        Arc::new(FixedEngine(Arc::new(FnEngine(Box::new(run))))),
        OffloadExecutor::new(4, timeout_secs),
    )
    .welcome_message("Welcome!")
}

fn handler<F>(run: F) -> TurnHandler
where
    F: Fn(&str, &[Exchange], &ProgressSink) -> Result<String, EngineError> + Send + Sync + 'static,
{
    handler_with(Arc::new(NoTools), 10, run)
}

async fn memory_len(handler: &TurnHandler, conversation: &str) -> usize {
    let slot = handler.memory().slot(conversation).await;
    let len = slot.lock().await.len();
    len
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_precedes_single_answer() {
    let h = handler(|_, _, progress| {
        progress.on_action("Action: @docsearch\nAction Input: rainfall in Texas");
        progress.on_tool_start("@docsearch");
        Ok("It rained a lot.".to_string())
    });
    let channel = Arc::new(RecordingChannel::new());

    let outcome = h.on_message(Turn::new("c1", "rainfall?", channel.clone())).await;
    assert!(outcome.is_answered());
    assert_eq!(
        channel.sent(),
        vec![
            Outbound::Typing,
            Outbound::Text("\u{2611} Searching: rainfall in Texas ...".into()),
            Outbound::Typing,
            Outbound::Text("Tool: @docsearch\n".into()),
            Outbound::Typing,
            Outbound::Text("It rained a lot.".into()),
        ]
    );
    assert_eq!(memory_len(&h, "c1").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_reaches_next_turn_and_window_holds() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_engine = seen.clone();
    let h = handler(move |input, history, _| {
        seen_in_engine.lock().unwrap().push(history.len());
        Ok(format!("re: {input}"))
    });
    let channel = Arc::new(RecordingChannel::new());

    for text in ["hi", "bye", "again"] {
        let outcome = h.on_message(Turn::new("c1", text, channel.clone())).await;
        assert!(outcome.is_answered());
    }

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    let slot = h.memory().slot("c1").await;
    let recent = slot.lock().await.recent();
    assert_eq!(
        recent,
        vec![Exchange::new("bye", "re: bye"), Exchange::new("again", "re: again")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_leaves_memory_unchanged() {
    let h = handler(|input, _, progress| {
        if input == "boom" {
            progress.on_error("rate limited");
            return Err(EngineError::Llm("rate limited".into()));
        }
        Ok("fine".to_string())
    });
    let channel = Arc::new(RecordingChannel::new());

    assert!(h.on_message(Turn::new("c1", "hello", channel.clone())).await.is_answered());
    let before = channel.sent().len();

    let outcome = h.on_message(Turn::new("c1", "boom", channel.clone())).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            phase: TurnPhase::Running,
            error: BotError::Engine(EngineError::Llm(_))
        }
    ));
    assert_eq!(memory_len(&h, "c1").await, 1);
    assert_eq!(
        channel.sent()[before..],
        [
            Outbound::Typing,
            Outbound::Text("LLM Error: rate limited\n".into()),
            Outbound::Text("Sorry, something went wrong: LLM error: rate limited".into()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_failure_is_reported() {
    let h = handler_with(Arc::new(BrokenTools), 10, |_, _, _| {
        panic!("engine must not run when setup fails")
    });
    let channel = Arc::new(RecordingChannel::new());

    let outcome = h.on_message(Turn::new("c1", "hello", channel.clone())).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            phase: TurnPhase::TypingSent,
            error: BotError::Setup(_)
        }
    ));
    let sent = channel.sent();
    assert_eq!(sent[0], Outbound::Typing);
    assert_eq!(
        sent[1],
        Outbound::Text("Sorry, I could not get ready to answer: api spec fetch failed".into())
    );
    assert_eq!(sent.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_sends_message_and_drops_late_events() {
    let h = handler_with(Arc::new(NoTools), 1, |_, _, progress| {
        std::thread::sleep(Duration::from_millis(1500));
        progress.on_tool_start("@chatgpt");
        Ok("too late".to_string())
    });
    let channel = Arc::new(RecordingChannel::new());

    let outcome = h.on_message(Turn::new("c1", "slow question", channel.clone())).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: BotError::Timeout(1),
            ..
        }
    ));

    // 等待后台线程结束，迟到的事件与答案都不应出现
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let sent = channel.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], Outbound::Typing);
    assert!(matches!(&sent[1], Outbound::Text(t) if t.contains("taking too long")));
    assert_eq!(memory_len(&h, "c1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_channel_gets_no_answer() {
    let channel = Arc::new(RecordingChannel::new());
    let closing = channel.clone();
    let h = handler(move |_, _, _| {
        closing.close();
        Ok("nobody is listening".to_string())
    });

    let outcome = h.on_message(Turn::new("c1", "hello", channel.clone())).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: BotError::ChannelClosed,
            ..
        }
    ));
    assert_eq!(channel.sent(), vec![Outbound::Typing]);
    assert_eq!(memory_len(&h, "c1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_turn_gets_no_answer() {
    let channel = Arc::new(RecordingChannel::new());
    let turn = Turn::new("c1", "hello", channel.clone());
    let cancel = turn.cancel.clone();
    let h = handler(move |_, _, _| {
        cancel.cancel();
        Ok("late".to_string())
    });

    let outcome = h.on_message(turn).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: BotError::ChannelClosed,
            ..
        }
    ));
    assert_eq!(channel.texts(), Vec::<String>::new());
}

#[tokio::test]
async fn welcome_goes_to_each_new_member_in_order() {
    let h = handler(|_, _, _| Ok(String::new()));
    let channel = Arc::new(RecordingChannel::new());
    let turn = Turn::new("c1", "", channel.clone())
        .with_accounts(ChannelAccount::new("u1"), ChannelAccount::new("bot"));

    let members = [ChannelAccount::new("u1"), ChannelAccount::new("u2")];
    assert_eq!(h.on_members_added(&members, &turn).await, 2);
    assert_eq!(channel.texts(), vec!["Welcome!", "Welcome!"]);

    let only_bot = [ChannelAccount::new("bot")];
    assert_eq!(h.on_members_added(&only_bot, &turn).await, 0);
    assert_eq!(channel.texts().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conversations_do_not_block_each_other() {
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let h = handler(move |input, _, _| {
        if input == "slow" {
            release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| EngineError::Tool(e.to_string()))?;
        }
        Ok(format!("done: {input}"))
    });
    let dispatcher = TurnDispatcher::new(Arc::new(h));
    let channel = Arc::new(RecordingChannel::new());

    let slow = dispatcher.submit(Turn::new("a", "slow", channel.clone()));
    let fast = dispatcher.submit(Turn::new("b", "fast", channel.clone()));

    let fast = tokio::time::timeout(Duration::from_secs(2), fast)
        .await
        .expect("other conversation must not wait for the slow one")
        .unwrap();
    assert!(fast.is_answered());

    release_tx.send(()).unwrap();
    assert!(slow.await.unwrap().is_answered());
    assert_eq!(dispatcher.active_conversations(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_conversation_keeps_submission_order() {
    let h = handler(|input, _, _| {
        // 先提交的运行更久，若并发执行则完成顺序会颠倒
        let delay = match input {
            "first" => 150,
            "second" => 50,
            _ => 0,
        };
        std::thread::sleep(Duration::from_millis(delay));
        Ok(input.to_uppercase())
    });
    let dispatcher = TurnDispatcher::new(Arc::new(h));
    let channel = Arc::new(RecordingChannel::new());

    let receivers: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|text| dispatcher.submit(Turn::new("c1", text, channel.clone())))
        .collect();
    for rx in receivers {
        assert!(rx.await.unwrap().is_answered());
    }

    assert_eq!(channel.texts(), vec!["FIRST", "SECOND"]);
    let slot = dispatcher.handler().memory().slot("c1").await;
    let users: Vec<_> = slot.lock().await.recent().into_iter().map(|e| e.user).collect();
    assert_eq!(users, vec!["first", "second"]);
}
