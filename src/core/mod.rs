//! 核心层：回合错误、后台执行器、回合处理与分发、优雅关闭

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod shutdown;
pub mod turn;

pub use dispatcher::TurnDispatcher;
pub use error::{BotError, EngineError};
pub use executor::OffloadExecutor;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use turn::{strip_mentions, Turn, TurnHandler, TurnOutcome, TurnPhase};
