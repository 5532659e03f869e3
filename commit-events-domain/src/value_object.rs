//! 值对象（Value Object）
//!
//! 无标识、以值相等为准的对象。
//!
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 事务关联键（correlation identifier）
///
/// 每次提交调用生成一次，在该次调用的所有事务重试中保持不变，
/// during 处理器据此识别“同一逻辑提交的重放”。
///
/// # 示例
///
/// ```
/// use commit_events_domain::value_object::TransactionKey;
///
/// let key = TransactionKey::new();
/// let same = key;
/// assert_eq!(key, same);
/// assert_ne!(key, TransactionKey::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionKey(Uuid);

impl TransactionKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TransactionKey {
    fn from(value: Uuid) -> Self {
        Self::from_uuid(value)
    }
}

impl From<TransactionKey> for Uuid {
    fn from(key: TransactionKey) -> Self {
        key.value()
    }
}
