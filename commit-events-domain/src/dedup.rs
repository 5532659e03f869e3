//! 派发单元与去重（EntityAndEvent）
//!
//! 一个派发单元由“来源实体 + 事件”组成。两个单元相等当且仅当：
//! 同一实体实例（按标识）、同一事件类型，且事件类型声明了 `remove_duplicates`。
//! 未声明去重的事件永不相等，即便类型与实体都相同：去重是按事件类型显式选择的。
//!
use crate::entity::EntityRef;
use crate::event::QueuedEvent;
use std::any::TypeId;
use std::collections::HashSet;

#[derive(Clone, Debug)]
pub struct EntityAndEvent {
    entity: EntityRef,
    event: QueuedEvent,
}

/// 可去重单元的哈希键：实体地址 + 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    entity: usize,
    event: TypeId,
}

impl EntityAndEvent {
    pub fn new(entity: EntityRef, event: QueuedEvent) -> Self {
        Self { entity, event }
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn event(&self) -> &QueuedEvent {
        &self.event
    }

    pub fn remove_duplicates(&self) -> bool {
        self.event.metadata().remove_duplicates
    }

    /// 仅声明了去重的事件才有键
    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.remove_duplicates().then(|| DedupKey {
            entity: self.entity.addr(),
            event: self.event.type_id(),
        })
    }
}

impl PartialEq for EntityAndEvent {
    fn eq(&self, other: &Self) -> bool {
        self.remove_duplicates()
            && other.remove_duplicates()
            && self.entity.same_entity(&other.entity)
            && self.event.type_id() == other.event.type_id()
    }
}

/// 按 `EntityAndEvent` 相等规则折叠重复单元，保留最早出现者及其位置
pub fn remove_duplicates(units: Vec<EntityAndEvent>) -> Vec<EntityAndEvent> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    units
        .into_iter()
        .filter(|unit| match unit.dedup_key() {
            Some(key) => {
                let first = seen.insert(key);
                if !first {
                    tracing::trace!(
                        entity = unit.entity.type_name(),
                        event = unit.event.name(),
                        "duplicate event removed"
                    );
                }
                first
            }
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EventSource;
    use crate::event::{DomainEvent, EventMetadata};
    use crate::queue::EventQueue;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Recalc(u8);

    impl DomainEvent for Recalc {
        const NAME: &'static str = "recalc";
        const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
    }

    #[derive(Debug)]
    struct Audit;

    impl DomainEvent for Audit {
        const NAME: &'static str = "audit";
        const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
    }

    #[derive(Debug)]
    struct Plain;

    impl DomainEvent for Plain {
        const NAME: &'static str = "plain";
    }

    #[derive(Default)]
    struct Item {
        queue: EventQueue,
    }

    impl EventSource for Item {
        fn event_queue(&self) -> &EventQueue {
            &self.queue
        }
    }

    fn unit<E: DomainEvent>(entity: &EntityRef, event: E) -> EntityAndEvent {
        EntityAndEvent::new(entity.clone(), QueuedEvent::new(event))
    }

    #[test]
    fn equality_requires_same_entity_type_and_tag() {
        let a = EntityRef::new(Arc::new(Item::default()));
        let b = EntityRef::new(Arc::new(Item::default()));

        assert_eq!(unit(&a, Recalc(1)), unit(&a, Recalc(2)));
        assert_ne!(unit(&a, Recalc(1)), unit(&b, Recalc(1)));
        assert_ne!(unit(&a, Recalc(1)), unit(&a, Audit));
        // 未声明去重：连自身都不相等
        let p = unit(&a, Plain);
        assert_ne!(p, p.clone());
    }

    #[test]
    fn earliest_tagged_instance_survives_in_place() {
        let a = EntityRef::new(Arc::new(Item::default()));
        let units = vec![
            unit(&a, Plain),
            unit(&a, Recalc(1)),
            unit(&a, Audit),
            unit(&a, Recalc(2)),
            unit(&a, Plain),
        ];

        let kept = remove_duplicates(units);
        let names: Vec<&str> = kept.iter().map(|u| u.event().name()).collect();
        assert_eq!(names, vec!["plain", "recalc", "audit", "plain"]);
        let first = kept[1].event().downcast_ref::<Recalc>().map(|r| r.0);
        assert_eq!(first, Some(1));
    }

    #[test]
    fn different_entities_are_not_collapsed() {
        let a = EntityRef::new(Arc::new(Item::default()));
        let b = EntityRef::new(Arc::new(Item::default()));
        let kept = remove_duplicates(vec![unit(&a, Recalc(1)), unit(&b, Recalc(1))]);
        assert_eq!(kept.len(), 2);
    }
}
