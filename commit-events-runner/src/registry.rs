//! 处理器注册表
//!
//! 进程启动时构建一次，此后只读。以 `(事件 TypeId, 阶段)` 为键保存类型擦除后的
//! 调用闭包；同一键下可有多个处理器，按注册顺序执行。
//!
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{
    AfterHandler, AfterHandlerAsync, BeforeHandler, BeforeHandlerAsync, DuringContext,
    DuringHandler, DuringHandlerAsync, HandlerResult,
};
use commit_events_domain::{
    DomainEvent, EntityRef, EventDescriptor, Phase, QueuedEvent, short_type_name,
};
use futures_util::future::BoxFuture;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type SyncInvoke = Arc<
    dyn Fn(&EntityRef, &QueuedEvent, Option<&DuringContext<'_>>) -> HandlerResult + Send + Sync,
>;

type AsyncInvoke = Arc<
    dyn for<'a> Fn(
            &'a EntityRef,
            &'a QueuedEvent,
            Option<&'a DuringContext<'a>>,
        ) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub(crate) enum Invoker {
    Sync(SyncInvoke),
    Async(AsyncInvoke),
}

/// 一条已注册的处理器
#[derive(Clone)]
pub struct Registration {
    name: &'static str,
    handler_type: TypeId,
    event: EventDescriptor,
    phase: Phase,
    pub(crate) invoker: Invoker,
}

impl Registration {
    /// 处理器类型名（去除模块路径）
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event(&self) -> &EventDescriptor {
        &self.event
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_async(&self) -> bool {
        matches!(self.invoker, Invoker::Async(_))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("event", &self.event.name())
            .field("phase", &self.phase)
            .field("async", &self.is_async())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(TypeId, Phase), Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: BeforeHandler<E>,
    {
        let invoker = sync_invoker(move |entity, event, _| {
            let event = downcast::<E>(event)?;
            handler.handle(entity, event)
        });
        self.insert::<E, H>(Phase::Before, invoker)
    }

    pub fn before_async<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: BeforeHandlerAsync<E>,
    {
        let invoker = async_invoker(move |entity, event, _| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event = downcast::<E>(event)?;
                handler.handle(entity, event).await
            })
        });
        self.insert::<E, H>(Phase::Before, invoker)
    }

    pub fn during<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: DuringHandler<E>,
    {
        let invoker = sync_invoker(move |entity, event, ctx| {
            let event = downcast::<E>(event)?;
            let ctx = during_context(ctx)?;
            handler.handle(entity, event, ctx)
        });
        self.insert::<E, H>(Phase::During, invoker)
    }

    pub fn during_async<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: DuringHandlerAsync<E>,
    {
        let invoker = async_invoker(move |entity, event, ctx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event = downcast::<E>(event)?;
                let ctx = during_context(ctx)?;
                handler.handle(entity, event, ctx).await
            })
        });
        self.insert::<E, H>(Phase::During, invoker)
    }

    pub fn after<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: AfterHandler<E>,
    {
        let invoker = sync_invoker(move |entity, event, _| {
            let event = downcast::<E>(event)?;
            handler.handle(entity, event).map(|()| None)
        });
        self.insert::<E, H>(Phase::After, invoker)
    }

    pub fn after_async<E, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: AfterHandlerAsync<E>,
    {
        let invoker = async_invoker(move |entity, event, _| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event = downcast::<E>(event)?;
                handler.handle(entity, event).await.map(|()| None)
            })
        });
        self.insert::<E, H>(Phase::After, invoker)
    }

    fn insert<E, H>(&mut self, phase: Phase, invoker: Invoker) -> DispatchResult<&mut Self>
    where
        E: DomainEvent,
        H: 'static,
    {
        let name = short_type_name::<H>();
        let handlers = self
            .handlers
            .entry((TypeId::of::<E>(), phase))
            .or_default();

        if handlers.iter().any(|r| r.handler_type == TypeId::of::<H>()) {
            return Err(DispatchError::AlreadyRegistered {
                handler: name,
                event_type: E::NAME,
                phase,
            });
        }

        handlers.push(Registration {
            name,
            handler_type: TypeId::of::<H>(),
            event: EventDescriptor::of::<E>(),
            phase,
            invoker,
        });
        Ok(self)
    }

    /// 某事件类型在某阶段的全部处理器（注册顺序）
    pub fn handlers(&self, event: TypeId, phase: Phase) -> &[Registration] {
        self.handlers
            .get(&(event, phase))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 已注册的 (事件名, 处理器名) 列表（只读视图）
    pub fn registered(&self, phase: Phase) -> Vec<(&'static str, &'static str)> {
        let mut out: Vec<_> = self
            .handlers
            .iter()
            .filter(|((_, p), _)| *p == phase)
            .flat_map(|(_, regs)| regs.iter().map(|r| (r.event.name(), r.name)))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("before", &self.registered(Phase::Before))
            .field("during", &self.registered(Phase::During))
            .field("after", &self.registered(Phase::After))
            .finish()
    }
}

fn sync_invoker<F>(f: F) -> Invoker
where
    F: Fn(&EntityRef, &QueuedEvent, Option<&DuringContext<'_>>) -> HandlerResult
        + Send
        + Sync
        + 'static,
{
    Invoker::Sync(Arc::new(f))
}

fn async_invoker<F>(f: F) -> Invoker
where
    F: for<'a> Fn(
            &'a EntityRef,
            &'a QueuedEvent,
            Option<&'a DuringContext<'a>>,
        ) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Invoker::Async(Arc::new(f))
}

fn downcast<E: DomainEvent>(event: &QueuedEvent) -> anyhow::Result<&E> {
    event.downcast_ref::<E>().ok_or_else(|| {
        anyhow::Error::new(DispatchError::TypeMismatch {
            expected: E::NAME,
            found: event.name(),
        })
    })
}

fn during_context<'c, 'a>(
    ctx: Option<&'c DuringContext<'a>>,
) -> anyhow::Result<&'c DuringContext<'a>> {
    ctx.ok_or_else(|| anyhow::anyhow!("during handler invoked without a transaction context"))
}
