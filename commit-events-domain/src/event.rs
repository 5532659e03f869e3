//! 领域事件（Domain Event）与事件元数据
//!
//! 事件是不可变的值对象，只在一次工作单元内存在：由实体的业务方法创建并入队，
//! 在随后的提交中被派发恰好一次，之后即被丢弃，从不写入存储。
//!
//! 事件的派发特性（是否去重、during 事件在提交前还是提交后运行）通过
//! `DomainEvent::METADATA` 显式声明，而非运行时反射。
//!
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// 派发阶段：处理器相对于提交调用的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// 提交前（可多轮）
    Before,
    /// 与提交处于同一事务内
    During,
    /// 提交成功之后，事务之外
    After,
}

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::During => "during",
            Phase::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 入队目标：`BeforeAndAfter` 会分叉为两条相互独立的队列条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventToSend {
    Before,
    During,
    After,
    BeforeAndAfter,
}

impl EventToSend {
    /// 该目标对应的队列阶段
    pub const fn phases(self) -> &'static [Phase] {
        match self {
            EventToSend::Before => &[Phase::Before],
            EventToSend::During => &[Phase::During],
            EventToSend::After => &[Phase::After],
            EventToSend::BeforeAndAfter => &[Phase::Before, Phase::After],
        }
    }
}

/// 事件类型的派发元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 同一实体上重复的同类型事件只派发最早的一条
    pub remove_duplicates: bool,
    /// during 事件在宿主提交之前（而非之后）运行
    pub during_before_commit: bool,
}

impl EventMetadata {
    /// 普通领域事件：不去重，during 事件在提交之后运行
    pub const DEFAULT: Self = Self {
        remove_duplicates: false,
        during_before_commit: false,
    };

    pub const fn remove_duplicates(self) -> Self {
        Self {
            remove_duplicates: true,
            ..self
        }
    }

    pub const fn during_before_commit(self) -> Self {
        Self {
            during_before_commit: true,
            ..self
        }
    }
}

/// 领域事件载荷需要满足的能力边界
///
/// ```
/// use commit_events_domain::{DomainEvent, EventMetadata};
///
/// #[derive(Debug)]
/// struct TaxRateChanged {
///     new_rate: u32,
/// }
///
/// impl DomainEvent for TaxRateChanged {
///     const NAME: &'static str = "order.tax_rate_changed";
///     const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
/// }
///
/// assert!(TaxRateChanged::METADATA.remove_duplicates);
/// ```
pub trait DomainEvent: Any + Send + Sync + fmt::Debug {
    /// 事件的稳定名称，用于日志、错误与追踪（避免依赖 `type_name`）
    const NAME: &'static str;

    /// 派发元数据，默认不去重
    const METADATA: EventMetadata = EventMetadata::DEFAULT;
}

/// 事件类型描述：类型标识 + 名称 + 元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventDescriptor {
    type_id: TypeId,
    name: &'static str,
    metadata: EventMetadata,
}

impl EventDescriptor {
    pub fn of<E: DomainEvent>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
            metadata: E::METADATA,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn metadata(&self) -> EventMetadata {
        self.metadata
    }
}

trait ErasedEvent: Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> ErasedEvent for E {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 已入队的事件（类型擦除），克隆仅增加引用计数
#[derive(Clone)]
pub struct QueuedEvent {
    descriptor: EventDescriptor,
    payload: Arc<dyn ErasedEvent>,
}

impl QueuedEvent {
    pub fn new<E: DomainEvent>(event: E) -> Self {
        Self {
            descriptor: EventDescriptor::of::<E>(),
            payload: Arc::new(event),
        }
    }

    pub fn descriptor(&self) -> &EventDescriptor {
        &self.descriptor
    }

    pub fn type_id(&self) -> TypeId {
        self.descriptor.type_id
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn metadata(&self) -> EventMetadata {
        self.descriptor.metadata
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.descriptor.type_id == TypeId::of::<E>()
    }

    /// 还原为具体事件类型
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.payload.as_any().downcast_ref::<E>()
    }
}

impl fmt::Debug for QueuedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedEvent")
            .field("name", &self.descriptor.name)
            .field("payload", &self.payload)
            .finish()
    }
}
