//! 派发器配置
//!
use crate::persistence::PersistenceContext;
use commit_events_domain::Status;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 运行参数
///
/// 可直接构造，也可从配置文件反序列化（缺省字段取默认值）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// before 阶段最多执行的轮数，超过后判定为循环事件
    pub max_before_rounds: usize,
    /// before 阶段首个失败状态即停止（否则累积所有处理器的错误）
    pub stop_on_first_before_error: bool,
    /// 不使用 during 处理器：跳过事务包装，直接丢弃 during 队列
    pub not_using_during_handlers: bool,
    /// 不使用 after 处理器：提交后不再派发
    pub not_using_after_handlers: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_before_rounds: 6,
            stop_on_first_before_error: true,
            not_using_during_handlers: false,
            not_using_after_handlers: false,
        }
    }
}

/// 提交异常分类器
///
/// 对宿主提交（或事务提交）抛出的错误给出纠正状态：
/// - `None`：无法处理，原错误原样向上传播；
/// - 有效状态：已纠正，重新执行整个事务单元；
/// - 无效状态：转换为业务失败返回给调用方。
///
/// 第二个参数为持久化上下文本身（`&dyn Any`），分类器可向下转型后查询或修正实体。
pub type ExceptionClassifier =
    Arc<dyn Fn(&anyhow::Error, &dyn Any) -> Option<Status> + Send + Sync>;

type DetectChangesAction = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// 变更检测之后、提交之前执行的钩子，按持久化上下文类型注册
#[derive(Clone, Default)]
pub struct DetectChangesActions {
    by_context: HashMap<TypeId, Vec<DetectChangesAction>>,
}

impl DetectChangesActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P, F>(&mut self, action: F) -> &mut Self
    where
        P: PersistenceContext,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let erased: DetectChangesAction = Arc::new(move |ctx: &dyn Any| {
            if let Some(ctx) = ctx.downcast_ref::<P>() {
                action(ctx);
            }
        });
        self.by_context
            .entry(TypeId::of::<P>())
            .or_default()
            .push(erased);
        self
    }

    pub fn with<P, F>(mut self, action: F) -> Self
    where
        P: PersistenceContext,
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.add(action);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.by_context.values().all(Vec::is_empty)
    }

    pub(crate) fn run<P: PersistenceContext>(&self, ctx: &P) {
        if let Some(actions) = self.by_context.get(&TypeId::of::<P>()) {
            for action in actions {
                action(ctx as &dyn Any);
            }
        }
    }
}

impl fmt::Debug for DetectChangesActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectChangesActions")
            .field("contexts", &self.by_context.len())
            .finish()
    }
}
