//! 分阶段派发
//!
//! `PhaseRunner` 负责单个阶段内的“收集 → 去重 → 解析 → 执行”：
//! - before：多轮执行，直到所有实体的 before 队列为空或达到轮数上限；
//! - during：由提交编排调用，分为提交前/提交后两段；
//! - after：先收集完全部单元再执行，单个处理器失败不影响其余处理器。
//!
//! 每一轮都先解析完所有单元的处理器再开始执行，缺失处理器时不会有任何处理器被调用。
//!
use crate::config::RunnerConfig;
use crate::error::{DispatchError, DispatchResult, HandlerFailure};
use crate::handler::{DuringContext, HandlerResult};
use crate::persistence::PersistenceContext;
use crate::registry::{HandlerRegistry, Invoker, Registration};
use crate::resolver::HandlerResolver;
use commit_events_domain::{EntityAndEvent, EntityRef, Phase, Status, remove_duplicates};
use tokio_util::sync::CancellationToken;

/// 已解析出处理器的派发单元
pub(crate) struct PlannedUnit<'r> {
    unit: EntityAndEvent,
    handlers: Vec<&'r Registration>,
}

/// 提交前/提交后两段 during 单元
#[derive(Default)]
pub(crate) struct DuringPlan<'r> {
    pub(crate) pre_commit: Vec<PlannedUnit<'r>>,
    pub(crate) post_commit: Vec<PlannedUnit<'r>>,
}

impl DuringPlan<'_> {
    pub(crate) fn is_empty(&self) -> bool {
        self.pre_commit.is_empty() && self.post_commit.is_empty()
    }
}

pub(crate) struct PhaseRunner<'r> {
    resolver: HandlerResolver<'r>,
    config: &'r RunnerConfig,
}

impl<'r> PhaseRunner<'r> {
    pub(crate) fn new(
        registry: &'r HandlerRegistry,
        config: &'r RunnerConfig,
        allow_async: bool,
    ) -> Self {
        Self {
            resolver: HandlerResolver::new(registry, allow_async),
            config,
        }
    }

    // ---------------- before ----------------

    pub(crate) fn run_before<P: PersistenceContext>(&self, ctx: &P) -> DispatchResult<Status> {
        let mut guard = BeforeLoop::new(self.config);
        while let Some(planned) = guard.next_round(self, ctx)? {
            for p in &planned {
                for reg in &p.handlers {
                    guard.record(reg, p);
                    let outcome = invoke_sync(reg, &p.unit, None);
                    if guard.absorb(reg, p, outcome)? {
                        return Ok(guard.finish());
                    }
                }
            }
        }
        Ok(guard.finish())
    }

    pub(crate) async fn run_before_async<P: PersistenceContext>(
        &self,
        ctx: &P,
        cancel: &CancellationToken,
    ) -> DispatchResult<Status> {
        let mut guard = BeforeLoop::new(self.config);
        while let Some(planned) = guard.next_round(self, ctx)? {
            for p in &planned {
                for reg in &p.handlers {
                    guard.record(reg, p);
                    let outcome = invoke_async(reg, &p.unit, None, cancel).await?;
                    if guard.absorb(reg, p, outcome)? {
                        return Ok(guard.finish());
                    }
                }
            }
        }
        Ok(guard.finish())
    }

    // ---------------- during ----------------

    /// 取出 during 单元并按 `during_before_commit` 分段；关闭 during 时直接清空队列
    pub(crate) fn plan_during(&self, entities: &[EntityRef]) -> DispatchResult<DuringPlan<'r>> {
        if self.config.not_using_during_handlers {
            for entity in entities {
                entity.source().clear_during();
            }
            return Ok(DuringPlan::default());
        }

        let units = collect(entities, Phase::During);
        let (pre_commit, post_commit): (Vec<_>, Vec<_>) = self
            .plan(units, Phase::During)?
            .into_iter()
            .partition(|p| p.unit.event().metadata().during_before_commit);
        Ok(DuringPlan {
            pre_commit,
            post_commit,
        })
    }

    /// 顺序执行一段 during 单元，遇到第一个失败状态即停止
    pub(crate) fn run_during(
        &self,
        planned: &[PlannedUnit<'r>],
        ctx: &DuringContext<'_>,
    ) -> DispatchResult<Status> {
        let mut status = Status::new();
        for p in planned {
            for reg in &p.handlers {
                trace_handler(Phase::During, ctx.attempt() as usize, reg, &p.unit);
                let outcome = invoke_sync(reg, &p.unit, Some(ctx));
                if absorb(&mut status, reg, p, Phase::During, outcome)? {
                    return Ok(status);
                }
            }
        }
        Ok(status)
    }

    pub(crate) async fn run_during_async(
        &self,
        planned: &[PlannedUnit<'r>],
        ctx: &DuringContext<'_>,
        cancel: &CancellationToken,
    ) -> DispatchResult<Status> {
        let mut status = Status::new();
        for p in planned {
            for reg in &p.handlers {
                trace_handler(Phase::During, ctx.attempt() as usize, reg, &p.unit);
                let outcome = invoke_async(reg, &p.unit, Some(ctx), cancel).await?;
                if absorb(&mut status, reg, p, Phase::During, outcome)? {
                    return Ok(status);
                }
            }
        }
        Ok(status)
    }

    // ---------------- after ----------------

    pub(crate) fn run_after<P: PersistenceContext>(
        &self,
        ctx: &P,
    ) -> DispatchResult<Vec<HandlerFailure>> {
        let planned = self.plan(collect(&ctx.tracked_entities(), Phase::After), Phase::After)?;
        let mut failures = Vec::new();
        for p in &planned {
            for reg in &p.handlers {
                trace_handler(Phase::After, 1, reg, &p.unit);
                if let Err(error) = invoke_sync(reg, &p.unit, None) {
                    failures.push(after_failure(reg, p, error));
                }
            }
        }
        Ok(failures)
    }

    pub(crate) async fn run_after_async<P: PersistenceContext>(
        &self,
        ctx: &P,
        cancel: &CancellationToken,
    ) -> DispatchResult<Vec<HandlerFailure>> {
        let planned = self.plan(collect(&ctx.tracked_entities(), Phase::After), Phase::After)?;
        let mut failures = Vec::new();
        for p in &planned {
            for reg in &p.handlers {
                trace_handler(Phase::After, 1, reg, &p.unit);
                if let Err(error) = invoke_async(reg, &p.unit, None, cancel).await? {
                    failures.push(after_failure(reg, p, error));
                }
            }
        }
        Ok(failures)
    }

    // ---------------- shared ----------------

    fn plan(
        &self,
        units: Vec<EntityAndEvent>,
        phase: Phase,
    ) -> DispatchResult<Vec<PlannedUnit<'r>>> {
        units
            .into_iter()
            .map(|unit| {
                let handlers = self.resolver.resolve(unit.event().descriptor(), phase)?;
                Ok(PlannedUnit { unit, handlers })
            })
            .collect()
    }
}

/// 从所有实体中取出某阶段的事件并去重
pub(crate) fn collect(entities: &[EntityRef], phase: Phase) -> Vec<EntityAndEvent> {
    let units = entities
        .iter()
        .flat_map(|entity| {
            let events = match phase {
                Phase::Before => entity.source().drain_before(),
                Phase::During => entity.source().drain_during(),
                Phase::After => entity.source().drain_after(),
            };
            events
                .into_iter()
                .map(move |event| EntityAndEvent::new(entity.clone(), event))
        })
        .collect();
    remove_duplicates(units)
}

/// 丢弃所有被追踪实体的全部待派发事件，返回丢弃的事件数
pub(crate) fn clear_all<P: PersistenceContext>(ctx: &P) -> usize {
    ctx.tracked_entities()
        .iter()
        .map(|entity| {
            let queue = entity.source().event_queue();
            let pending = [Phase::Before, Phase::During, Phase::After]
                .into_iter()
                .map(|phase| queue.len(phase))
                .sum::<usize>();
            entity.source().clear_all();
            pending
        })
        .sum()
}

/// before 多轮循环的状态：轮数、最近一次执行的单元与累积状态
struct BeforeLoop<'c> {
    config: &'c RunnerConfig,
    round: usize,
    last: Option<(&'static str, &'static str)>,
    status: Status,
}

impl<'c> BeforeLoop<'c> {
    fn new(config: &'c RunnerConfig) -> Self {
        Self {
            config,
            round: 0,
            last: None,
            status: Status::new(),
        }
    }

    /// 下一轮的已解析单元；队列全部为空时返回 `None`
    fn next_round<'r, P: PersistenceContext>(
        &mut self,
        runner: &PhaseRunner<'r>,
        ctx: &P,
    ) -> DispatchResult<Option<Vec<PlannedUnit<'r>>>> {
        let units = collect(&ctx.tracked_entities(), Phase::Before);
        let Some(first) = units.first() else {
            return Ok(None);
        };

        if self.round >= self.config.max_before_rounds {
            let (entity, event) = self
                .last
                .unwrap_or((first.entity().type_name(), first.event().name()));
            tracing::error!(
                rounds = self.round,
                entity,
                event,
                "circular before-commit event loop"
            );
            return Err(DispatchError::CircularEventLoop {
                rounds: self.round,
                entity,
                event,
            });
        }

        self.round += 1;
        tracing::debug!(round = self.round, units = units.len(), "before-commit round");
        runner.plan(units, Phase::Before).map(Some)
    }

    fn record(&mut self, reg: &Registration, p: &PlannedUnit<'_>) {
        trace_handler(Phase::Before, self.round, reg, &p.unit);
        self.last = Some((p.unit.entity().type_name(), p.unit.event().name()));
    }

    /// 吸收处理器结果；返回 `true` 表示应立即停止（fail-fast）
    fn absorb(
        &mut self,
        reg: &Registration,
        p: &PlannedUnit<'_>,
        outcome: HandlerResult,
    ) -> DispatchResult<bool> {
        let failed = absorb(&mut self.status, reg, p, Phase::Before, outcome)?;
        Ok(failed && self.config.stop_on_first_before_error)
    }

    fn finish(self) -> Status {
        self.status
    }
}

/// 合并处理器状态，硬故障转换为 `DispatchError::Handler`；返回本次是否产生了失败状态
fn absorb(
    status: &mut Status,
    reg: &Registration,
    p: &PlannedUnit<'_>,
    phase: Phase,
    outcome: HandlerResult,
) -> DispatchResult<bool> {
    match outcome {
        Ok(None) => Ok(false),
        Ok(Some(returned)) => {
            let failed = !returned.is_valid();
            if failed {
                tracing::info!(
                    %phase,
                    handler = reg.name(),
                    event = p.unit.event().name(),
                    errors = %returned.all_errors("; "),
                    "event handler returned a failed status"
                );
            }
            status.combine(returned);
            Ok(failed)
        }
        Err(source) => Err(DispatchError::Handler {
            handler: reg.name(),
            event_type: p.unit.event().name(),
            phase,
            source,
        }),
    }
}

fn after_failure(
    reg: &Registration,
    p: &PlannedUnit<'_>,
    error: anyhow::Error,
) -> HandlerFailure {
    tracing::warn!(
        handler = reg.name(),
        event = p.unit.event().name(),
        entity = p.unit.entity().type_name(),
        error = %error,
        "after-commit handler failed"
    );
    HandlerFailure {
        handler: reg.name(),
        event_type: p.unit.event().name(),
        entity: p.unit.entity().type_name(),
        error,
    }
}

fn trace_handler(phase: Phase, round: usize, reg: &Registration, unit: &EntityAndEvent) {
    tracing::debug!(
        %phase,
        round,
        handler = reg.name(),
        event = unit.event().name(),
        entity = unit.entity().type_name(),
        "running event handler"
    );
}

fn invoke_sync(
    reg: &Registration,
    unit: &EntityAndEvent,
    during: Option<&DuringContext<'_>>,
) -> HandlerResult {
    match &reg.invoker {
        Invoker::Sync(f) => f(unit.entity(), unit.event(), during),
        Invoker::Async(_) => Err(anyhow::anyhow!(
            "async handler {} cannot run on the synchronous path",
            reg.name()
        )),
    }
}

async fn invoke_async(
    reg: &Registration,
    unit: &EntityAndEvent,
    during: Option<&DuringContext<'_>>,
    cancel: &CancellationToken,
) -> DispatchResult<HandlerResult> {
    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }
    match &reg.invoker {
        Invoker::Sync(f) => Ok(f(unit.entity(), unit.event(), during)),
        Invoker::Async(f) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DispatchError::Cancelled),
                outcome = f(unit.entity(), unit.event(), during) => Ok(outcome),
            }
        }
    }
}
