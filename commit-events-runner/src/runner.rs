//! 提交编排（EventsRunner）
//!
//! 把一次宿主提交调用包装为：
//! 1. before 阶段（多轮，可失败并中止提交）；
//! 2. 变更检测与 detect-changes 钩子；
//! 3. during 阶段与宿主提交在同一事务中执行，按执行策略与异常分类器重试；
//! 4. 提交成功后的 after 阶段。
//!
//! 同步入口 `run_commit` 与异步入口 `run_commit_async` 语义一致，
//! 区别仅在于异步入口可执行异步处理器并响应取消。
//!
use crate::config::{DetectChangesActions, ExceptionClassifier, RunnerConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::DuringContext;
use crate::persistence::{PersistenceContext, TransactionScope};
use crate::phase::{DuringPlan, PhaseRunner, clear_all};
use crate::registry::HandlerRegistry;
use bon::Builder;
use commit_events_domain::{Status, TransactionKey};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::events_runner_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 提交事件派发器
///
/// ```ignore
/// let runner = EventsRunner::builder()
///     .handlers(registry)
///     .config(RunnerConfig::default())
///     .build();
/// let status = runner.run_commit(&ctx, || ctx.save_changes())?;
/// ```
#[derive(Builder)]
pub struct EventsRunner {
    #[builder(setters(vis = "pub(crate)"))]
    registry: Arc<HandlerRegistry>,
    #[builder(default)]
    config: RunnerConfig,
    exception_classifier: Option<ExceptionClassifier>,
    #[builder(default)]
    detect_changes_actions: DetectChangesActions,
}

impl<S: BuilderState> EventsRunnerBuilder<S> {
    pub fn handlers(self, registry: HandlerRegistry) -> EventsRunnerBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(Arc::new(registry))
    }

    /// 多个派发器共享同一份只读注册表
    pub fn shared_handlers(
        self,
        registry: Arc<HandlerRegistry>,
    ) -> EventsRunnerBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(registry)
    }
}

/// 事务单元的失败：派发硬故障直接返回，提交错误交由策略与分类器处理
enum UnitError {
    Dispatch(DispatchError),
    Commit(anyhow::Error),
}

impl From<DispatchError> for UnitError {
    fn from(err: DispatchError) -> Self {
        UnitError::Dispatch(err)
    }
}

type UnitResult = Result<Status<usize>, UnitError>;

impl EventsRunner {
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    // ---------------- sync ----------------

    /// 同步提交：返回的状态有效时携带宿主提交写入的行数
    pub fn run_commit<P, F>(&self, ctx: &P, call_commit: F) -> DispatchResult<Status<usize>>
    where
        P: PersistenceContext,
        F: FnMut() -> anyhow::Result<usize>,
    {
        let outcome = self.run_commit_inner(ctx, call_commit);
        discard_leftovers(ctx, &outcome);
        outcome
    }

    /// 同步提交的抛出式入口：无效状态转换为 `DispatchError::Rejected`
    pub fn commit<P, F>(&self, ctx: &P, call_commit: F) -> DispatchResult<usize>
    where
        P: PersistenceContext,
        F: FnMut() -> anyhow::Result<usize>,
    {
        into_rows(self.run_commit(ctx, call_commit)?)
    }

    fn run_commit_inner<P, F>(&self, ctx: &P, mut call_commit: F) -> DispatchResult<Status<usize>>
    where
        P: PersistenceContext,
        F: FnMut() -> anyhow::Result<usize>,
    {
        let phases = PhaseRunner::new(&self.registry, &self.config, false);

        let before = phases.run_before(ctx)?;
        if !before.is_valid() {
            return Ok(before.discard_result());
        }

        self.detect_changes(ctx);
        let during = phases.plan_during(&ctx.tracked_entities())?;
        let key = TransactionKey::new();
        let mut status: Status<usize> = before.discard_result();
        let mut attempt = 0u32;

        let rows = loop {
            match self.commit_unit(&phases, ctx, &during, key, &mut attempt, &mut call_commit) {
                Ok(outcome) => {
                    let rows = outcome.result().copied();
                    status.combine(outcome);
                    break rows;
                }
                Err(UnitError::Dispatch(err)) => return Err(err),
                Err(UnitError::Commit(err)) => {
                    if !self.classify(ctx, err, &mut status)? {
                        break None;
                    }
                }
            }
        };

        let Some(rows) = rows.filter(|_| status.is_valid()) else {
            return Ok(status);
        };
        status.set_result(rows);

        if !self.config.not_using_after_handlers {
            let failures = phases.run_after(ctx)?;
            if !failures.is_empty() {
                return Err(DispatchError::AfterCommit { rows, failures });
            }
        }
        Ok(status)
    }

    fn commit_unit<P, F>(
        &self,
        phases: &PhaseRunner<'_>,
        ctx: &P,
        during: &DuringPlan<'_>,
        key: TransactionKey,
        attempt: &mut u32,
        call_commit: &mut F,
    ) -> UnitResult
    where
        P: PersistenceContext,
        F: FnMut() -> anyhow::Result<usize>,
    {
        if during.is_empty() {
            let rows = call_commit().map_err(UnitError::Commit)?;
            return Ok(committed(rows));
        }

        if ctx.in_transaction() {
            *attempt += 1;
            let dctx = DuringContext::new(key, *attempt, None);
            return run_during_unit(phases, during, &dctx, call_commit);
        }

        let mut retries = 0u32;
        loop {
            *attempt += 1;
            match run_in_transaction(phases, ctx, during, key, *attempt, call_commit) {
                Err(UnitError::Commit(err)) => match retry_delay(ctx, retries, &err) {
                    Some(delay) => {
                        retries += 1;
                        std::thread::sleep(delay);
                    }
                    None => return Err(UnitError::Commit(err)),
                },
                other => return other,
            }
        }
    }

    // ---------------- async ----------------

    /// 异步提交：可执行异步处理器，`cancel` 触发时以 `DispatchError::Cancelled` 结束
    pub async fn run_commit_async<P, F, Fut>(
        &self,
        ctx: &P,
        call_commit: F,
        cancel: &CancellationToken,
    ) -> DispatchResult<Status<usize>>
    where
        P: PersistenceContext,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<usize>> + Send,
    {
        let outcome = self.run_commit_async_inner(ctx, call_commit, cancel).await;
        discard_leftovers(ctx, &outcome);
        outcome
    }

    /// 异步提交的抛出式入口
    pub async fn commit_async<P, F, Fut>(
        &self,
        ctx: &P,
        call_commit: F,
        cancel: &CancellationToken,
    ) -> DispatchResult<usize>
    where
        P: PersistenceContext,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<usize>> + Send,
    {
        into_rows(self.run_commit_async(ctx, call_commit, cancel).await?)
    }

    async fn run_commit_async_inner<P, F, Fut>(
        &self,
        ctx: &P,
        mut call_commit: F,
        cancel: &CancellationToken,
    ) -> DispatchResult<Status<usize>>
    where
        P: PersistenceContext,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<usize>> + Send,
    {
        let phases = PhaseRunner::new(&self.registry, &self.config, true);

        let before = phases.run_before_async(ctx, cancel).await?;
        if !before.is_valid() {
            return Ok(before.discard_result());
        }

        self.detect_changes(ctx);
        let during = phases.plan_during(&ctx.tracked_entities())?;
        let key = TransactionKey::new();
        let mut status: Status<usize> = before.discard_result();
        let mut attempt = 0u32;

        let rows = loop {
            let outcome = self
                .commit_unit_async(
                    &phases,
                    ctx,
                    &during,
                    key,
                    &mut attempt,
                    &mut call_commit,
                    cancel,
                )
                .await;
            match outcome {
                Ok(outcome) => {
                    let rows = outcome.result().copied();
                    status.combine(outcome);
                    break rows;
                }
                Err(UnitError::Dispatch(err)) => return Err(err),
                Err(UnitError::Commit(err)) => {
                    if !self.classify(ctx, err, &mut status)? {
                        break None;
                    }
                }
            }
        };

        let Some(rows) = rows.filter(|_| status.is_valid()) else {
            return Ok(status);
        };
        status.set_result(rows);

        if !self.config.not_using_after_handlers {
            let failures = phases.run_after_async(ctx, cancel).await?;
            if !failures.is_empty() {
                return Err(DispatchError::AfterCommit { rows, failures });
            }
        }
        Ok(status)
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_unit_async<P, F, Fut>(
        &self,
        phases: &PhaseRunner<'_>,
        ctx: &P,
        during: &DuringPlan<'_>,
        key: TransactionKey,
        attempt: &mut u32,
        call_commit: &mut F,
        cancel: &CancellationToken,
    ) -> UnitResult
    where
        P: PersistenceContext,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<usize>> + Send,
    {
        if during.is_empty() {
            let rows = call_commit_async(call_commit, cancel).await?;
            return Ok(committed(rows));
        }

        if ctx.in_transaction() {
            *attempt += 1;
            let dctx = DuringContext::new(key, *attempt, None);
            return run_during_unit_async(phases, during, &dctx, call_commit, cancel).await;
        }

        let mut retries = 0u32;
        loop {
            *attempt += 1;
            let outcome =
                run_in_transaction_async(phases, ctx, during, key, *attempt, call_commit, cancel)
                    .await;
            match outcome {
                Err(UnitError::Commit(err)) => match retry_delay(ctx, retries, &err) {
                    Some(delay) => {
                        retries += 1;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(DispatchError::Cancelled.into()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => return Err(UnitError::Commit(err)),
                },
                other => return other,
            }
        }
    }

    // ---------------- shared ----------------

    fn detect_changes<P: PersistenceContext>(&self, ctx: &P) {
        ctx.detect_changes();
        self.detect_changes_actions.run(ctx);
    }

    /// 交给异常分类器；返回 `true` 表示已纠正、应重新执行事务单元
    fn classify<P: PersistenceContext>(
        &self,
        ctx: &P,
        error: anyhow::Error,
        status: &mut Status<usize>,
    ) -> DispatchResult<bool> {
        let Some(classifier) = &self.exception_classifier else {
            return Err(DispatchError::Commit(error));
        };
        let Some(corrective) = classifier(&error, ctx as &dyn Any) else {
            return Err(DispatchError::Commit(error));
        };

        let retry = corrective.is_valid();
        tracing::warn!(error = %error, retry, "commit error handled by exception classifier");
        status.combine(corrective);
        Ok(retry)
    }
}

fn committed(rows: usize) -> Status<usize> {
    let mut status = Status::new();
    status.set_result(rows);
    status
}

fn into_rows(status: Status<usize>) -> DispatchResult<usize> {
    if !status.is_valid() {
        return Err(DispatchError::Rejected(status.discard_result()));
    }
    Ok(status.into_result().unwrap_or_default())
}

/// 调用结束后清空所有被追踪实体的队列：事件不跨提交调用保留
///
/// 成功时剩余的只可能是处理器在其阶段之后新入队的事件，或关闭 after 阶段时的 after 事件。
fn discard_leftovers<P: PersistenceContext>(ctx: &P, outcome: &DispatchResult<Status<usize>>) {
    let succeeded = matches!(outcome, Ok(status) if status.is_valid());
    let discarded = clear_all(ctx);
    if succeeded && discarded > 0 {
        tracing::debug!(discarded, "events left in queues after the commit call were discarded");
    }
}

fn retry_delay<P: PersistenceContext>(
    ctx: &P,
    retries: u32,
    error: &anyhow::Error,
) -> Option<Duration> {
    let delay = ctx.execution_strategy()?.retry_delay(retries, error)?;
    tracing::warn!(retries, ?delay, error = %error, "transaction failed, retrying");
    Some(delay)
}

/// 开启事务并执行一次事务单元；状态无效时丢弃事务即回滚
fn run_in_transaction<P, F>(
    phases: &PhaseRunner<'_>,
    ctx: &P,
    during: &DuringPlan<'_>,
    key: TransactionKey,
    attempt: u32,
    call_commit: &mut F,
) -> UnitResult
where
    P: PersistenceContext,
    F: FnMut() -> anyhow::Result<usize>,
{
    let tx = ctx.begin_transaction().map_err(UnitError::Commit)?;
    let status = {
        let dctx = DuringContext::new(key, attempt, Some(&*tx));
        run_during_unit(phases, during, &dctx, call_commit)?
    };
    finish_transaction(tx, status)
}

#[allow(clippy::too_many_arguments)]
async fn run_in_transaction_async<P, F, Fut>(
    phases: &PhaseRunner<'_>,
    ctx: &P,
    during: &DuringPlan<'_>,
    key: TransactionKey,
    attempt: u32,
    call_commit: &mut F,
    cancel: &CancellationToken,
) -> UnitResult
where
    P: PersistenceContext,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<usize>> + Send,
{
    let tx = ctx.begin_transaction().map_err(UnitError::Commit)?;
    let status = {
        let dctx = DuringContext::new(key, attempt, Some(&*tx));
        run_during_unit_async(phases, during, &dctx, call_commit, cancel).await?
    };
    finish_transaction(tx, status)
}

fn finish_transaction(
    tx: Box<dyn TransactionScope + '_>,
    status: Status<usize>,
) -> UnitResult {
    if status.is_valid() {
        tx.commit().map_err(UnitError::Commit)?;
        tracing::debug!("transaction committed");
    } else {
        tracing::debug!(errors = %status.all_errors("; "), "transaction rolled back");
    }
    Ok(status)
}

/// 提交前 during → 宿主提交 → 提交后 during
fn run_during_unit<F>(
    phases: &PhaseRunner<'_>,
    during: &DuringPlan<'_>,
    dctx: &DuringContext<'_>,
    call_commit: &mut F,
) -> UnitResult
where
    F: FnMut() -> anyhow::Result<usize>,
{
    let pre = phases.run_during(&during.pre_commit, dctx)?;
    if !pre.is_valid() {
        return Ok(pre.discard_result());
    }
    let rows = call_commit().map_err(UnitError::Commit)?;
    let mut status: Status<usize> = pre.discard_result();
    status.combine(phases.run_during(&during.post_commit, dctx)?);
    status.set_result(rows);
    Ok(status)
}

async fn run_during_unit_async<F, Fut>(
    phases: &PhaseRunner<'_>,
    during: &DuringPlan<'_>,
    dctx: &DuringContext<'_>,
    call_commit: &mut F,
    cancel: &CancellationToken,
) -> UnitResult
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<usize>> + Send,
{
    let pre = phases
        .run_during_async(&during.pre_commit, dctx, cancel)
        .await?;
    if !pre.is_valid() {
        return Ok(pre.discard_result());
    }
    let rows = call_commit_async(call_commit, cancel).await?;
    let mut status: Status<usize> = pre.discard_result();
    status.combine(
        phases
            .run_during_async(&during.post_commit, dctx, cancel)
            .await?,
    );
    status.set_result(rows);
    Ok(status)
}

async fn call_commit_async<F, Fut>(
    call_commit: &mut F,
    cancel: &CancellationToken,
) -> Result<usize, UnitError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<usize>> + Send,
{
    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled.into());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled.into()),
        rows = call_commit() => rows.map_err(UnitError::Commit),
    }
}
