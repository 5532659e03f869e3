#![allow(dead_code)]

use anyhow::Context;
use commit_events_domain::{
    DomainEvent, EntityRef, EventMetadata, EventSource, EventToSend, Status,
};
use commit_events_macros::event_source;
use commit_events_runner::memory::{InMemoryContext, InMemoryStore, StoredEntity};
use commit_events_runner::{
    AfterHandler, BeforeHandler, EventsRunner, HandlerRegistry, HandlerResult, RunnerConfig,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

// ---------------- events ----------------

#[derive(Debug)]
pub struct AllocateStock {
    pub quantity: i64,
}
impl DomainEvent for AllocateStock {
    const NAME: &'static str = "stock.allocate";
}

#[derive(Debug)]
pub struct OrderPlaced {
    pub order: u32,
}
impl DomainEvent for OrderPlaced {
    const NAME: &'static str = "order.placed";
}

#[derive(Debug)]
pub struct TotalsChanged;
impl DomainEvent for TotalsChanged {
    const NAME: &'static str = "order.totals_changed";
    const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
}

#[derive(Debug)]
pub struct ShippingQuoted;
impl DomainEvent for ShippingQuoted {
    const NAME: &'static str = "order.shipping_quoted";
    const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
}

#[derive(Debug)]
pub struct LineAdded;
impl DomainEvent for LineAdded {
    const NAME: &'static str = "order.line_added";
}

#[derive(Debug)]
pub struct Ping;
impl DomainEvent for Ping {
    const NAME: &'static str = "loop.ping";
}

#[derive(Debug)]
pub struct StockReserved {
    pub quantity: i64,
}
impl DomainEvent for StockReserved {
    const NAME: &'static str = "stock.reserved";
}

#[derive(Debug)]
pub struct AuditRequested;
impl DomainEvent for AuditRequested {
    const NAME: &'static str = "audit.requested";
    const METADATA: EventMetadata = EventMetadata::DEFAULT.during_before_commit();
}

#[derive(Debug)]
pub struct Unhandled;
impl DomainEvent for Unhandled {
    const NAME: &'static str = "unhandled";
}

// ---------------- entities ----------------

#[event_source]
pub struct Product {
    pub sku: String,
    stock: AtomicI64,
}

impl Product {
    pub fn new(sku: &str, stock: i64) -> Arc<Self> {
        Arc::new(Self {
            events: Default::default(),
            sku: sku.to_string(),
            stock: AtomicI64::new(stock),
        })
    }
    pub fn stock(&self) -> i64 {
        self.stock.load(Ordering::SeqCst)
    }
    pub fn set_stock(&self, value: i64) {
        self.stock.store(value, Ordering::SeqCst);
    }
    pub fn allocate(&self, quantity: i64) {
        self.add_event(AllocateStock { quantity }, EventToSend::Before);
    }
}

impl StoredEntity for Product {
    fn key(&self) -> String {
        format!("product/{}", self.sku)
    }
    fn snapshot(&self) -> Value {
        json!({ "stock": self.stock() })
    }
}

#[event_source]
pub struct Order {
    pub id: u32,
    lines: AtomicU32,
}

impl Order {
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            events: Default::default(),
            id,
            lines: AtomicU32::new(0),
        })
    }
    pub fn lines(&self) -> u32 {
        self.lines.load(Ordering::SeqCst)
    }
    pub fn add_line(&self) {
        self.lines.fetch_add(1, Ordering::SeqCst);
        self.add_event(LineAdded, EventToSend::Before);
        self.add_event(TotalsChanged, EventToSend::Before);
    }
    pub fn place(&self) {
        self.add_event(OrderPlaced { order: self.id }, EventToSend::BeforeAndAfter);
    }
}

impl StoredEntity for Order {
    fn key(&self) -> String {
        format!("order/{}", self.id)
    }
    fn snapshot(&self) -> Value {
        json!({ "lines": self.lines() })
    }
}

// ---------------- handlers ----------------

/// 按 sku 扣减库存；库存不足返回失败状态
pub struct AllocateHandler {
    pub journal: Journal,
}

impl BeforeHandler<AllocateStock> for AllocateHandler {
    fn handle(&self, entity: &EntityRef, event: &AllocateStock) -> HandlerResult {
        let product = entity
            .downcast_ref::<Product>()
            .context("allocate handler expects a product")?;
        let available = product.stock();
        if available < event.quantity {
            return Ok(Some(Status::failure(format!(
                "insufficient stock for {}: requested {}, available {}",
                product.sku, event.quantity, available
            ))));
        }
        product.set_stock(available - event.quantity);
        self.journal.push(format!("allocate:{}", product.sku));
        Ok(None)
    }
}

/// 记录收到的事件，适用于任意事件类型
#[derive(Clone)]
pub struct Record {
    pub journal: Journal,
    pub label: &'static str,
}

impl<E: DomainEvent> BeforeHandler<E> for Record {
    fn handle(&self, _entity: &EntityRef, _event: &E) -> HandlerResult {
        self.journal.push(format!("{}:{}", self.label, E::NAME));
        Ok(None)
    }
}

impl<E: DomainEvent> AfterHandler<E> for Record {
    fn handle(&self, _entity: &EntityRef, _event: &E) -> anyhow::Result<()> {
        self.journal.push(format!("{}:{}", self.label, E::NAME));
        Ok(())
    }
}

/// 每次处理都再入队一个 `Ping`，构成循环
pub struct PingPong {
    pub journal: Journal,
}

impl BeforeHandler<Ping> for PingPong {
    fn handle(&self, entity: &EntityRef, _event: &Ping) -> HandlerResult {
        self.journal.push("ping");
        entity
            .downcast_ref::<Order>()
            .context("ping expects an order")?
            .add_event(Ping, EventToSend::Before);
        Ok(None)
    }
}

// ---------------- helpers ----------------

pub fn context() -> (InMemoryStore, InMemoryContext) {
    let store = InMemoryStore::new();
    let ctx = InMemoryContext::new(store.clone());
    (store, ctx)
}

pub fn runner(registry: HandlerRegistry) -> EventsRunner {
    EventsRunner::builder().handlers(registry).build()
}

pub fn runner_with(registry: HandlerRegistry, config: RunnerConfig) -> EventsRunner {
    EventsRunner::builder()
        .handlers(registry)
        .config(config)
        .build()
}

pub fn queues_empty(entities: &[EntityRef]) -> bool {
    use commit_events_domain::Phase;
    entities.iter().all(|e| {
        let q = e.source().event_queue();
        q.is_empty(Phase::Before) && q.is_empty(Phase::During) && q.is_empty(Phase::After)
    })
}
