//! 实体事件队列（EventQueue）
//!
//! 每个参与派发的实体独占一个 `EventQueue`，内部按阶段分为 before / during / after
//! 三段有序缓冲。读取队列的唯一途径是 `drain`：返回快照并原子地清空原缓冲，
//! 保证同一条事件不会从同一队列被派发两次。
//!
use crate::event::{DomainEvent, EventToSend, Phase, QueuedEvent};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct EventQueue {
    before: Mutex<Vec<QueuedEvent>>,
    during: Mutex<Vec<QueuedEvent>>,
    after: Mutex<Vec<QueuedEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按入队目标追加事件；`BeforeAndAfter` 会同时进入 before 与 after 两段
    pub fn enqueue<E: DomainEvent>(&self, event: E, to: EventToSend) {
        let queued = QueuedEvent::new(event);
        match to {
            EventToSend::Before => self.push(Phase::Before, queued),
            EventToSend::During => self.push(Phase::During, queued),
            EventToSend::After => self.push(Phase::After, queued),
            EventToSend::BeforeAndAfter => {
                self.push(Phase::Before, queued.clone());
                self.push(Phase::After, queued);
            }
        }
    }

    /// 追加已擦除类型的事件
    pub fn push(&self, phase: Phase, event: QueuedEvent) {
        lock(self.slot(phase)).push(event);
    }

    /// 取出并清空指定阶段的全部事件
    pub fn drain(&self, phase: Phase) -> Vec<QueuedEvent> {
        std::mem::take(&mut *lock(self.slot(phase)))
    }

    pub fn clear(&self, phase: Phase) {
        lock(self.slot(phase)).clear();
    }

    pub fn clear_all(&self) {
        self.clear(Phase::Before);
        self.clear(Phase::During);
        self.clear(Phase::After);
    }

    pub fn len(&self, phase: Phase) -> usize {
        lock(self.slot(phase)).len()
    }

    pub fn is_empty(&self, phase: Phase) -> bool {
        lock(self.slot(phase)).is_empty()
    }

    fn slot(&self, phase: Phase) -> &Mutex<Vec<QueuedEvent>> {
        match phase {
            Phase::Before => &self.before,
            Phase::During => &self.during,
            Phase::After => &self.after,
        }
    }
}

// 队列在单个工作单元内单线程使用，锁中毒时继续使用内部数据即可
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Clone for EventQueue {
    fn clone(&self) -> Self {
        Self {
            before: Mutex::new(lock(&self.before).clone()),
            during: Mutex::new(lock(&self.during).clone()),
            after: Mutex::new(lock(&self.after).clone()),
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("before", &self.len(Phase::Before))
            .field("during", &self.len(Phase::During))
            .field("after", &self.len(Phase::After))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping(u8);

    impl DomainEvent for Ping {
        const NAME: &'static str = "ping";
    }

    #[test]
    fn drain_returns_in_insertion_order_and_empties() {
        let queue = EventQueue::new();
        queue.enqueue(Ping(1), EventToSend::Before);
        queue.enqueue(Ping(2), EventToSend::Before);
        queue.enqueue(Ping(3), EventToSend::After);

        let drained = queue.drain(Phase::Before);
        let values: Vec<u8> = drained
            .iter()
            .map(|e| e.downcast_ref::<Ping>().map(|p| p.0).unwrap_or_default())
            .collect();
        assert_eq!(values, vec![1, 2]);
        assert!(queue.is_empty(Phase::Before));
        assert!(queue.drain(Phase::Before).is_empty());
        assert_eq!(queue.len(Phase::After), 1);
    }

    #[test]
    fn before_and_after_forks_into_independent_entries() {
        let queue = EventQueue::new();
        queue.enqueue(Ping(7), EventToSend::BeforeAndAfter);
        assert_eq!(queue.len(Phase::Before), 1);
        assert_eq!(queue.len(Phase::After), 1);

        queue.clear(Phase::Before);
        assert_eq!(queue.len(Phase::After), 1);
    }

    #[test]
    fn clear_all_empties_every_phase() {
        let queue = EventQueue::new();
        queue.enqueue(Ping(1), EventToSend::Before);
        queue.enqueue(Ping(2), EventToSend::During);
        queue.enqueue(Ping(3), EventToSend::After);
        queue.clear_all();
        for phase in [Phase::Before, Phase::During, Phase::After] {
            assert!(queue.is_empty(phase));
        }
    }

    #[test]
    fn clone_copies_pending_events() {
        let queue = EventQueue::new();
        queue.enqueue(Ping(1), EventToSend::During);
        let copy = queue.clone();
        queue.clear_all();
        assert_eq!(copy.len(Phase::During), 1);
        assert_eq!(format!("{copy:?}"), "EventQueue { before: 0, during: 1, after: 0 }");
    }
}
