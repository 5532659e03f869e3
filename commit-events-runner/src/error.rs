//! 派发层统一错误定义
//!
//! 软失败（业务校验）通过 `Status` 返回；这里只收录“派发系统本身出错”的硬故障，
//! 以及同步/异步“抛出式”入口把无效状态转换成的 `Rejected`。
//!
use commit_events_domain::{Phase, Status};
use std::fmt;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    // --- 解析 ---
    #[error(
        "handler not found: event={event_type}, phase={phase}{}",
        async_hint(.async_available)
    )]
    HandlerNotFound {
        event_type: &'static str,
        phase: Phase,
        async_available: bool,
    },
    #[error("handler already registered: handler={handler}, event={event_type}, phase={phase}")]
    AlreadyRegistered {
        handler: &'static str,
        event_type: &'static str,
        phase: Phase,
    },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    // --- 运行 ---
    #[error(
        "circular event loop: before-commit events still queued after {rounds} rounds, last entity={entity}, last event={event}"
    )]
    CircularEventLoop {
        rounds: usize,
        entity: &'static str,
        event: &'static str,
    },
    #[error("event handler error: handler={handler}, event={event_type}, phase={phase}: {source}")]
    Handler {
        handler: &'static str,
        event_type: &'static str,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
    #[error("dispatch cancelled")]
    Cancelled,

    // --- 提交 ---
    #[error(transparent)]
    Commit(anyhow::Error),
    #[error(
        "after-commit handlers failed: failures={}, committed rows={rows}",
        .failures.len()
    )]
    AfterCommit {
        rows: usize,
        failures: Vec<HandlerFailure>,
    },
    #[error("commit rejected: {0}")]
    Rejected(Status),
}

fn async_hint(async_available: &bool) -> &'static str {
    if *async_available {
        " (an async handler is registered, but the synchronous commit entry point was used; call the async entry point instead)"
    } else {
        ""
    }
}

/// 统一 Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;

/// after 阶段单个处理器的失败记录
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub event_type: &'static str,
    pub entity: &'static str,
    pub error: anyhow::Error,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler={}, event={}, entity={}: {}",
            self.handler, self.event_type, self.entity, self.error
        )
    }
}
