//! 事件处理器协议
//!
//! 三个阶段各有同步与异步两种形态，处理器按 `(事件类型, 阶段)` 注册：
//! - before / during 处理器返回 `HandlerResult`：`Ok(None)` 视为成功，
//!   `Ok(Some(status))` 携带业务状态（可为失败），`Err` 为硬故障；
//! - after 处理器只报告成功或错误，无法再影响已完成的提交。
//!
use crate::persistence::TransactionScope;
use async_trait::async_trait;
use commit_events_domain::{DomainEvent, EntityRef, Status, TransactionKey};

pub type HandlerResult = anyhow::Result<Option<Status>>;

pub trait BeforeHandler<E: DomainEvent>: Send + Sync + 'static {
    fn handle(&self, entity: &EntityRef, event: &E) -> HandlerResult;
}

#[async_trait]
pub trait BeforeHandlerAsync<E: DomainEvent>: Send + Sync + 'static {
    async fn handle(&self, entity: &EntityRef, event: &E) -> HandlerResult;
}

/// during 处理器可见的事务信息
///
/// 同一次提交调用中 `key` 在所有重试间保持不变；`attempt` 从 1 开始，
/// 每次重新执行事务单元加一。处理器可据此实现幂等。
#[derive(Clone, Copy)]
pub struct DuringContext<'a> {
    key: TransactionKey,
    attempt: u32,
    transaction: Option<&'a dyn TransactionScope>,
}

impl<'a> DuringContext<'a> {
    pub(crate) fn new(
        key: TransactionKey,
        attempt: u32,
        transaction: Option<&'a dyn TransactionScope>,
    ) -> Self {
        Self {
            key,
            attempt,
            transaction,
        }
    }

    pub fn key(&self) -> TransactionKey {
        self.key
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 派发器自己开启的事务；调用方已持有事务时为 `None`
    pub fn transaction(&self) -> Option<&'a dyn TransactionScope> {
        self.transaction
    }
}

impl std::fmt::Debug for DuringContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuringContext")
            .field("key", &self.key)
            .field("attempt", &self.attempt)
            .field("owns_transaction", &self.transaction.is_some())
            .finish()
    }
}

pub trait DuringHandler<E: DomainEvent>: Send + Sync + 'static {
    fn handle(&self, entity: &EntityRef, event: &E, ctx: &DuringContext<'_>) -> HandlerResult;
}

#[async_trait]
pub trait DuringHandlerAsync<E: DomainEvent>: Send + Sync + 'static {
    async fn handle(
        &self,
        entity: &EntityRef,
        event: &E,
        ctx: &DuringContext<'_>,
    ) -> HandlerResult;
}

pub trait AfterHandler<E: DomainEvent>: Send + Sync + 'static {
    fn handle(&self, entity: &EntityRef, event: &E) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AfterHandlerAsync<E: DomainEvent>: Send + Sync + 'static {
    async fn handle(&self, entity: &EntityRef, event: &E) -> anyhow::Result<()>;
}
