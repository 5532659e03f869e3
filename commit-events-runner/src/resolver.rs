//! 处理器解析
//!
//! 给定事件类型与阶段，返回本次应执行的处理器列表：
//! - 同步路径只考虑同步处理器；只有异步处理器时报错并提示改用异步入口；
//! - 异步路径两种都可执行，但若存在 `XAsync`，同名的同步 `X` 被其取代；
//! - 一个都没有即为 `HandlerNotFound`。
//!
use crate::error::{DispatchError, DispatchResult};
use crate::registry::{HandlerRegistry, Registration};
use commit_events_domain::{EventDescriptor, Phase};

#[derive(Debug, Clone, Copy)]
pub struct HandlerResolver<'r> {
    registry: &'r HandlerRegistry,
    allow_async: bool,
}

impl<'r> HandlerResolver<'r> {
    pub fn new(registry: &'r HandlerRegistry, allow_async: bool) -> Self {
        Self {
            registry,
            allow_async,
        }
    }

    pub fn resolve(
        &self,
        event: &EventDescriptor,
        phase: Phase,
    ) -> DispatchResult<Vec<&'r Registration>> {
        let candidates = self.registry.handlers(event.type_id(), phase);

        let chosen: Vec<&'r Registration> = if self.allow_async {
            candidates
                .iter()
                .filter(|r| r.is_async() || !superseded(r, candidates))
                .collect()
        } else {
            candidates.iter().filter(|r| !r.is_async()).collect()
        };

        if chosen.is_empty() {
            return Err(DispatchError::HandlerNotFound {
                event_type: event.name(),
                phase,
                async_available: !self.allow_async && candidates.iter().any(|r| r.is_async()),
            });
        }
        Ok(chosen)
    }
}

/// 同步处理器 `X` 是否已被异步处理器 `XAsync` 取代
fn superseded(sync: &Registration, candidates: &[Registration]) -> bool {
    candidates
        .iter()
        .filter(|r| r.is_async())
        .any(|r| r.name().strip_suffix("Async") == Some(sync.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        BeforeHandler, BeforeHandlerAsync, DuringContext, DuringHandler, HandlerResult,
    };
    use async_trait::async_trait;
    use commit_events_domain::{DomainEvent, EntityRef};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Priced;

    impl DomainEvent for Priced {
        const NAME: &'static str = "line.priced";
    }

    struct Recalculate;

    impl BeforeHandler<Priced> for Recalculate {
        fn handle(&self, _entity: &EntityRef, _event: &Priced) -> HandlerResult {
            Ok(None)
        }
    }

    struct RecalculateAsync;

    #[async_trait]
    impl BeforeHandlerAsync<Priced> for RecalculateAsync {
        async fn handle(&self, _entity: &EntityRef, _event: &Priced) -> HandlerResult {
            Ok(None)
        }
    }

    struct Audit;

    impl BeforeHandler<Priced> for Audit {
        fn handle(&self, _entity: &EntityRef, _event: &Priced) -> HandlerResult {
            Ok(None)
        }
    }

    struct Reserve;

    impl DuringHandler<Priced> for Reserve {
        fn handle(
            &self,
            _entity: &EntityRef,
            _event: &Priced,
            _ctx: &DuringContext<'_>,
        ) -> HandlerResult {
            Ok(None)
        }
    }

    fn names(regs: &[&Registration]) -> Vec<&'static str> {
        regs.iter().map(|r| r.name()).collect()
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .before(Arc::new(Recalculate))
            .unwrap()
            .before_async(Arc::new(RecalculateAsync))
            .unwrap()
            .before(Arc::new(Audit))
            .unwrap()
            .during(Arc::new(Reserve))
            .unwrap();
        registry
    }

    #[test]
    fn sync_path_ignores_async_handlers() {
        let registry = registry();
        let resolver = HandlerResolver::new(&registry, false);
        let regs = resolver
            .resolve(&EventDescriptor::of::<Priced>(), Phase::Before)
            .unwrap();
        assert_eq!(names(&regs), vec!["Recalculate", "Audit"]);
    }

    #[test]
    fn async_variant_supersedes_its_sync_twin() {
        let registry = registry();
        let resolver = HandlerResolver::new(&registry, true);
        let regs = resolver
            .resolve(&EventDescriptor::of::<Priced>(), Phase::Before)
            .unwrap();
        assert_eq!(names(&regs), vec!["RecalculateAsync", "Audit"]);
    }

    #[test]
    fn missing_handler_names_event_and_phase() {
        let registry = registry();
        let err = HandlerResolver::new(&registry, true)
            .resolve(&EventDescriptor::of::<Priced>(), Phase::After)
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerNotFound {
                event_type: "line.priced",
                phase: Phase::After,
                async_available: false,
            }
        ));
    }

    #[test]
    fn sync_path_hints_when_only_async_exists() {
        let mut registry = HandlerRegistry::new();
        registry.before_async(Arc::new(RecalculateAsync)).unwrap();
        let err = HandlerResolver::new(&registry, false)
            .resolve(&EventDescriptor::of::<Priced>(), Phase::Before)
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerNotFound {
                async_available: true,
                ..
            }
        ));
    }
}
