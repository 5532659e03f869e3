//! 持久化上下文协议
//!
//! 派发器不关心存储实现，只通过这里的三个 trait 与宿主交互：
//! - `PersistenceContext`：被追踪实体的枚举、变更检测与事务；
//! - `TransactionScope`：一次显式事务，`commit` 消费自身，未提交即丢弃视为回滚；
//! - `ExecutionStrategy`：事务单元失败后的重试决策。
//!
use commit_events_domain::EntityRef;
use std::any::Any;
use std::time::Duration;

pub trait PersistenceContext: Send + Sync + 'static {
    /// 当前被追踪的实体；每轮 before 派发都会重新获取，以纳入处理器新追踪的实体
    fn tracked_entities(&self) -> Vec<EntityRef>;

    /// 将实体的内存变更物化为待写入的变更集
    fn detect_changes(&self) {}

    /// 调用方是否已持有一个打开的事务
    fn in_transaction(&self) -> bool;

    fn begin_transaction(&self) -> anyhow::Result<Box<dyn TransactionScope + '_>>;

    fn execution_strategy(&self) -> Option<&dyn ExecutionStrategy> {
        None
    }
}

pub trait TransactionScope: Send + Sync {
    fn commit(self: Box<Self>) -> anyhow::Result<()>;

    /// 供 during 处理器向下转型到具体事务类型
    fn as_any(&self) -> &dyn Any;
}

pub trait ExecutionStrategy: Send + Sync {
    /// 第 `retries` 次失败（从 0 计）后的等待时长；`None` 表示放弃并传播错误
    fn retry_delay(&self, retries: u32, error: &anyhow::Error) -> Option<Duration>;
}

/// 固定间隔、有限次数的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryOnFailure {
    max_retries: u32,
    delay: Duration,
    is_transient: fn(&anyhow::Error) -> bool,
}

impl RetryOnFailure {
    pub fn new(
        max_retries: u32,
        delay: Duration,
        is_transient: fn(&anyhow::Error) -> bool,
    ) -> Self {
        Self {
            max_retries,
            delay,
            is_transient,
        }
    }
}

impl ExecutionStrategy for RetryOnFailure {
    fn retry_delay(&self, retries: u32, error: &anyhow::Error) -> Option<Duration> {
        (retries < self.max_retries && (self.is_transient)(error)).then_some(self.delay)
    }
}
