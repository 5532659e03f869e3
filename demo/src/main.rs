use anyhow::{Context, Result};
use async_trait::async_trait;
use commit_events_domain::{DomainEvent, EntityRef, EventSource, EventToSend, Status};
use commit_events_macros::event_source;
use commit_events_runner::memory::{
    InMemoryContext, InMemoryStore, InMemoryTransaction, StoredEntity,
};
use commit_events_runner::{
    AfterHandler, BeforeHandlerAsync, DispatchError, DuringContext, DuringHandler, EventsRunner,
    HandlerRegistry, HandlerResult,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ---------------- events ----------------

#[derive(Debug)]
struct OrderPlaced {
    order: u32,
    sku: String,
    quantity: i64,
}

impl DomainEvent for OrderPlaced {
    const NAME: &'static str = "order.placed";
}

#[derive(Debug)]
struct StockAllocated {
    order: u32,
    quantity: i64,
}

impl DomainEvent for StockAllocated {
    const NAME: &'static str = "stock.allocated";
}

// ---------------- entities ----------------

#[event_source]
struct Product {
    sku: String,
    stock: AtomicI64,
}

impl Product {
    fn new(sku: &str, stock: i64) -> Arc<Self> {
        Arc::new(Self {
            events: Default::default(),
            sku: sku.to_string(),
            stock: AtomicI64::new(stock),
        })
    }

    fn stock(&self) -> i64 {
        self.stock.load(Ordering::SeqCst)
    }

    /// 扣减库存；不足时返回失败状态，不改变实体
    fn allocate(&self, order: u32, quantity: i64) -> Status {
        let available = self.stock();
        if available < quantity {
            return Status::failure(format!(
                "insufficient stock for {}: requested {quantity}, available {available}",
                self.sku
            ));
        }
        self.stock.store(available - quantity, Ordering::SeqCst);
        self.add_event(StockAllocated { order, quantity }, EventToSend::During);
        Status::success(format!("allocated {quantity} x {}", self.sku))
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
struct Order {
    id: u32,
    sku: String,
    quantity: i64,
}

impl Order {
    fn place(id: u32, sku: &str, quantity: i64) -> Arc<Self> {
        let order = Arc::new(Self {
            events: Default::default(),
            id,
            sku: sku.to_string(),
            quantity,
        });
        order.add_event(
            OrderPlaced {
                order: id,
                sku: sku.to_string(),
                quantity,
            },
            EventToSend::BeforeAndAfter,
        );
        order
    }
}

impl StoredEntity for Order {
    fn key(&self) -> String {
        format!("order/{}", self.id)
    }

    fn snapshot(&self) -> Value {
        json!({ "sku": self.sku, "quantity": self.quantity })
    }
}

// ---------------- handlers ----------------

struct AllocateStock {
    catalog: HashMap<String, Arc<Product>>,
}

#[async_trait]
impl BeforeHandlerAsync<OrderPlaced> for AllocateStock {
    async fn handle(&self, _entity: &EntityRef, event: &OrderPlaced) -> HandlerResult {
        let product = self
            .catalog
            .get(&event.sku)
            .with_context(|| format!("unknown sku {}", event.sku))?;
        Ok(Some(product.allocate(event.order, event.quantity)))
    }
}

struct RecordAllocation;

impl DuringHandler<StockAllocated> for RecordAllocation {
    fn handle(
        &self,
        _entity: &EntityRef,
        event: &StockAllocated,
        ctx: &DuringContext<'_>,
    ) -> HandlerResult {
        let tx = ctx
            .transaction()
            .and_then(|tx| tx.as_any().downcast_ref::<InMemoryTransaction>())
            .context("allocation ledger needs an in-memory transaction")?;
        tx.stage(
            format!("ledger/{}", event.order),
            json!({ "quantity": event.quantity, "transaction": ctx.key().to_string() }),
        );
        Ok(None)
    }
}

struct ConfirmOrder;

impl AfterHandler<OrderPlaced> for ConfirmOrder {
    fn handle(&self, _entity: &EntityRef, event: &OrderPlaced) -> Result<()> {
        println!(
            "  -> confirmation sent for order {} ({} x {})",
            event.order, event.quantity, event.sku
        );
        Ok(())
    }
}

async fn place_order(
    runner: &EventsRunner,
    store: &InMemoryStore,
    apple: &Arc<Product>,
    id: u32,
    quantity: i64,
) -> Result<()> {
    let ctx = InMemoryContext::new(store.clone());
    ctx.track(apple.clone());
    ctx.track(Order::place(id, "apple", quantity));

    let cancel = CancellationToken::new();
    match runner
        .run_commit_async(&ctx, || ctx.save_changes_async(), &cancel)
        .await
    {
        Ok(status) if status.is_valid() => {
            println!("order {id}: {} (rows written: {:?})", status, status.result());
        }
        Ok(status) => println!("order {id}: {status}"),
        Err(DispatchError::AfterCommit { rows, failures }) => {
            println!("order {id}: committed {rows} rows, {} follow-up(s) failed", failures.len());
        }
        Err(err) => return Err(err.into()),
    }
    println!("  stored apple stock: {:?}", store.get("product/apple"));
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("commit_events_runner=info".parse()?),
        )
        .init();

    let store = InMemoryStore::new();
    store.insert("product/apple", json!({ "stock": 5 }));
    let apple = Product::new("apple", 5);

    let mut registry = HandlerRegistry::new();
    registry
        .before_async(Arc::new(AllocateStock {
            catalog: HashMap::from([("apple".to_string(), apple.clone())]),
        }))?
        .during(Arc::new(RecordAllocation))?
        .after(Arc::new(ConfirmOrder))?;
    let runner = EventsRunner::builder().handlers(registry).build();

    // 库存充足：扣减、记账、提交、确认
    place_order(&runner, &store, &apple, 1, 3).await?;
    println!("  ledger: {:?}", store.get("ledger/1"));

    // 库存不足：before 阶段失败，提交不会发生
    place_order(&runner, &store, &apple, 2, 10).await?;
    println!("  order 2 stored: {:?}", store.get("order/2"));

    Ok(())
}
