//! 内存持久化上下文
//!
//! 一个最小但语义完整的 `PersistenceContext` 实现，用于测试与演示：
//! - `InMemoryStore`：已提交数据（键 → JSON 快照），可在多个上下文之间共享；
//! - `InMemoryContext`：追踪实体、检测变更、把变更写入当前事务或直接写入存储；
//! - `InMemoryTransaction`：暂存写入，`commit` 时合并进存储，丢弃即回滚。
//!
use crate::persistence::{ExecutionStrategy, PersistenceContext, TransactionScope};
use commit_events_domain::{EntityRef, EventSource};
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 可被内存上下文保存的实体
pub trait StoredEntity: EventSource {
    /// 存储键，同一上下文内唯一
    fn key(&self) -> String;

    /// 当前状态的快照，用于变更检测与写入
    fn snapshot(&self) -> Value;
}

/// 可被重试策略识别的瞬时故障
#[derive(Debug, thiserror::Error)]
#[error("transient store fault: {0}")]
pub struct TransientFault(pub String);

impl TransientFault {
    pub fn is_transient(error: &anyhow::Error) -> bool {
        error.downcast_ref::<TransientFault>().is_some()
    }
}

type Rows = Arc<Mutex<HashMap<String, Value>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    rows: Rows,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.rows).get(key).cloned()
    }

    /// 直接写入已提交数据（初始化用）
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        lock(&self.rows).insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InMemoryContext {
    store: InMemoryStore,
    tracked: Mutex<Vec<(EntityRef, Arc<dyn StoredEntity>)>>,
    pending: Mutex<Vec<(String, Value)>>,
    active: Arc<Mutex<Option<Rows>>>,
    strategy: Option<Box<dyn ExecutionStrategy>>,
    faults: Mutex<VecDeque<anyhow::Error>>,
    detect_calls: AtomicUsize,
}

impl InMemoryContext {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            tracked: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            active: Arc::new(Mutex::new(None)),
            strategy: None,
            faults: Mutex::new(VecDeque::new()),
            detect_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_execution_strategy(mut self, strategy: impl ExecutionStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// 开始追踪实体；重复追踪同一实例无副作用
    pub fn track<T: StoredEntity>(&self, entity: Arc<T>) -> EntityRef {
        let entity_ref = EntityRef::new(entity.clone());
        let mut tracked = lock(&self.tracked);
        if let Some((existing, _)) = tracked.iter().find(|(e, _)| e.same_entity(&entity_ref)) {
            return existing.clone();
        }
        let stored: Arc<dyn StoredEntity> = entity;
        tracked.push((entity_ref.clone(), stored));
        entity_ref
    }

    /// 让接下来的一次 `save_changes` 以给定错误失败
    pub fn inject_fault(&self, error: anyhow::Error) {
        lock(&self.faults).push_back(error);
    }

    pub fn detect_changes_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn pending_changes(&self) -> usize {
        lock(&self.pending).len()
    }

    /// 宿主提交函数：写入检测到的变更，返回写入的行数
    ///
    /// 处于事务中时写入事务暂存区，否则直接写入存储。
    pub fn save_changes(&self) -> anyhow::Result<usize> {
        if let Some(fault) = lock(&self.faults).pop_front() {
            return Err(fault);
        }

        self.compute_pending();
        let changes = std::mem::take(&mut *lock(&self.pending));
        let rows = changes.len();

        let target = lock(&self.active).clone().unwrap_or_else(|| self.store.rows.clone());
        lock(&target).extend(changes);

        tracing::debug!(rows, "in-memory changes saved");
        Ok(rows)
    }

    pub async fn save_changes_async(&self) -> anyhow::Result<usize> {
        tokio::task::yield_now().await;
        self.save_changes()
    }

    /// 读取当前可见的值（事务暂存优先）
    pub fn read(&self, key: &str) -> Option<Value> {
        if let Some(staging) = lock(&self.active).as_ref() {
            if let Some(value) = lock(staging).get(key) {
                return Some(value.clone());
            }
        }
        self.store.get(key)
    }

    fn compute_pending(&self) {
        let tracked: Vec<Arc<dyn StoredEntity>> =
            lock(&self.tracked).iter().map(|(_, e)| e.clone()).collect();
        let changes: Vec<(String, Value)> = tracked
            .iter()
            .map(|entity| (entity.key(), entity.snapshot()))
            .filter(|(key, value)| self.read(key).as_ref() != Some(value))
            .collect();
        *lock(&self.pending) = changes;
    }
}

impl PersistenceContext for InMemoryContext {
    fn tracked_entities(&self) -> Vec<EntityRef> {
        lock(&self.tracked).iter().map(|(e, _)| e.clone()).collect()
    }

    fn detect_changes(&self) {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.compute_pending();
    }

    fn in_transaction(&self) -> bool {
        lock(&self.active).is_some()
    }

    fn begin_transaction(&self) -> anyhow::Result<Box<dyn TransactionScope + '_>> {
        let mut active = lock(&self.active);
        if active.is_some() {
            anyhow::bail!("a transaction is already active on this context");
        }
        let staging: Rows = Arc::default();
        *active = Some(staging.clone());
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            staging,
            active: self.active.clone(),
        }))
    }

    fn execution_strategy(&self) -> Option<&dyn ExecutionStrategy> {
        self.strategy.as_deref()
    }
}

/// 内存事务：写入先进入暂存区，`commit` 时整体合并
pub struct InMemoryTransaction {
    store: InMemoryStore,
    staging: Rows,
    active: Arc<Mutex<Option<Rows>>>,
}

impl InMemoryTransaction {
    /// 在事务内写入（during 处理器使用）
    pub fn stage(&self, key: impl Into<String>, value: Value) {
        lock(&self.staging).insert(key.into(), value);
    }

    pub fn staged(&self, key: &str) -> Option<Value> {
        lock(&self.staging).get(key).cloned()
    }
}

impl TransactionScope for InMemoryTransaction {
    fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let staged = std::mem::take(&mut *lock(&self.staging));
        lock(&self.store.rows).extend(staged);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        *lock(&self.active) = None;
    }
}
