//! 提交事件过程宏（commit-events-macros）
//!
//! - `#[event_source]`：为实体结构体注入事件队列字段并实现 `EventSource`
//!
use proc_macro::TokenStream;

mod derive_utils;
mod event_source;
mod field_utils;

/// 事件源实体宏
/// - 若缺失则追加字段 `events: EventQueue`（置于字段最前）
/// - 自动实现 `::commit_events_domain::entity::EventSource`
/// - 当结构体派生了 serde 的 `Serialize`/`Deserialize` 时，为注入的字段加上 `#[serde(skip)]`
/// - 支持参数：`#[event_source(field = name)]` 指定队列字段名，默认 `events`
///
/// ```ignore
/// use commit_events_macros::event_source;
///
/// #[event_source]
/// #[derive(Debug, Default)]
/// struct Order {
///     total: std::sync::atomic::AtomicU64,
/// }
/// ```
#[proc_macro_attribute]
pub fn event_source(attr: TokenStream, item: TokenStream) -> TokenStream {
    event_source::expand(attr, item)
}
