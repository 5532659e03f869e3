//! 提交事件领域层基础库（commit-events-domain）
//!
//! 为“在一次工作单元（unit of work）中由实体排队、在提交时统一派发”的事件模型
//! 提供最小的领域层构件：
//! - 事件（`event`）：`DomainEvent` 约束、事件元数据与类型擦除后的 `QueuedEvent`；
//! - 事件队列（`queue`）：每个实体持有的 before / during / after 三段有序队列；
//! - 实体（`entity`）：`EventSource` 协议与按标识比较的 `EntityRef`；
//! - 去重（`dedup`）：`EntityAndEvent` 派发单元及其相等规则；
//! - 状态（`status`）：可组合的成功/失败结果 `Status`；
//! - 值对象（`value_object`）：跨重试稳定的 `TransactionKey`。
//!
//! 本 crate 不依赖任何运行时与存储实现，派发编排位于 `commit-events-runner`。
//!
pub mod dedup;
pub mod entity;
pub mod event;
pub mod queue;
pub mod status;
pub mod value_object;

pub use dedup::{EntityAndEvent, remove_duplicates};
pub use entity::{EntityRef, EventSource};
pub use event::{DomainEvent, EventDescriptor, EventMetadata, EventToSend, Phase, QueuedEvent};
pub use queue::EventQueue;
pub use status::Status;
pub use value_object::TransactionKey;

// 允许过程宏生成的 `::commit_events_domain::...` 路径在本 crate 的测试中解析
extern crate self as commit_events_domain;

/// 取类型名的最后一段（去除模块路径与泛型参数），用于日志与处理器命名
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

#[cfg(test)]
mod tests {
    use super::short_type_name;

    struct Plain;
    struct Wrapper<T>(T);

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<Plain>(), "Plain");
        assert_eq!(short_type_name::<Wrapper<Plain>>(), "Wrapper");
        assert_eq!(short_type_name::<u32>(), "u32");
    }
}
