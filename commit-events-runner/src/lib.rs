//! 提交事件派发层（commit-events-runner）
//!
//! 在宿主的持久化提交周围编排领域事件：
//! - 处理器协议与注册（`handler`、`registry`、`resolver`）；
//! - 分阶段派发（`phase`）与提交编排（`runner`）；
//! - 持久化协议（`persistence`）及其内存实现（`memory`）；
//! - 配置（`config`）与错误（`error`）。
//!
pub mod config;
pub mod error;
pub mod handler;
pub mod memory;
pub mod persistence;
pub mod registry;
pub mod resolver;
pub mod runner;

mod phase;

pub use config::{DetectChangesActions, ExceptionClassifier, RunnerConfig};
pub use error::{DispatchError, DispatchResult, HandlerFailure};
pub use handler::{
    AfterHandler, AfterHandlerAsync, BeforeHandler, BeforeHandlerAsync, DuringContext,
    DuringHandler, DuringHandlerAsync, HandlerResult,
};
pub use persistence::{ExecutionStrategy, PersistenceContext, RetryOnFailure, TransactionScope};
pub use registry::HandlerRegistry;
pub use runner::EventsRunner;
