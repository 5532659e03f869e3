//! 事件源实体（EventSource）
//!
//! 任何参与派发的实体都通过 `EventSource` 暴露自己的事件队列，并提供
//! `drain_before / drain_during / clear_during / drain_after` 四个原子操作。
//! 派发器以 `EntityRef`（共享引用 + 按指针判等）持有被追踪的实体。
//!
use crate::event::{DomainEvent, EventToSend, Phase, QueuedEvent};
use crate::queue::EventQueue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 类型擦除辅助：为所有 `'static` 类型提供向 `Any` 的转换
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 持有事件队列的实体
///
/// 通常通过 `#[event_source]` 宏实现；手写实现时只需返回内部的 `EventQueue`。
///
/// 队列只在一次提交调用内有效：调用结束时（无论成败）派发器会清空所有被追踪实体的队列，
/// 处理器在其阶段之后新入队的事件不会带入下一次提交。
pub trait EventSource: AsAny {
    fn event_queue(&self) -> &EventQueue;

    /// 由实体业务方法调用，将事件放入目标队列
    fn add_event<E: DomainEvent>(&self, event: E, to: EventToSend)
    where
        Self: Sized,
    {
        self.event_queue().enqueue(event, to);
    }

    fn drain_before(&self) -> Vec<QueuedEvent> {
        self.event_queue().drain(Phase::Before)
    }

    fn drain_during(&self) -> Vec<QueuedEvent> {
        self.event_queue().drain(Phase::During)
    }

    fn clear_during(&self) {
        self.event_queue().clear(Phase::During);
    }

    fn drain_after(&self) -> Vec<QueuedEvent> {
        self.event_queue().drain(Phase::After)
    }

    /// 丢弃全部待派发事件（提交失败后避免重试时重放陈旧事件）
    fn clear_all(&self) {
        self.event_queue().clear_all();
    }
}

/// 被追踪实体的共享引用；相等性按实例标识而非值
#[derive(Clone)]
pub struct EntityRef {
    inner: Arc<dyn EventSource>,
    type_name: &'static str,
}

impl EntityRef {
    pub fn new<T: EventSource>(entity: Arc<T>) -> Self {
        Self {
            inner: entity,
            type_name: crate::short_type_name::<T>(),
        }
    }

    /// 实体的类型名（用于日志与错误信息）
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn source(&self) -> &dyn EventSource {
        &*self.inner
    }

    pub fn downcast_ref<T: EventSource>(&self) -> Option<&T> {
        (*self.inner).as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: EventSource>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).into_any_arc().downcast::<T>().ok()
    }

    /// 实例地址，仅用于标识比较
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn same_entity(&self, other: &EntityRef) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: EventSource> From<Arc<T>> for EntityRef {
    fn from(entity: Arc<T>) -> Self {
        Self::new(entity)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({}@{:#x})", self.type_name, self.addr())
    }
}
