//! 可组合的结果状态（Status）
//!
//! 处理器通过 `Status` 报告“软失败”（业务校验不通过），与硬故障（`Err`）严格区分。
//! - 有效性：无错误即有效；
//! - 组合：合并错误与消息行，组合后的有效性为两者的逻辑与；
//! - 结果：仅在有效状态上可设置，无效状态不暴露结果。
//!
use serde::{Deserialize, Serialize};
use std::fmt;

const SUCCESS_MESSAGE: &str = "Success";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status<T = ()> {
    errors: Vec<String>,
    messages: Vec<String>,
    result: Option<T>,
}

impl<T> Default for Status<T> {
    fn default() -> Self {
        Self {
            errors: Vec::new(),
            messages: Vec::new(),
            result: None,
        }
    }
}

impl<T> Status<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(message: impl Into<String>) -> Self {
        let mut status = Self::new();
        status.set_message(message);
        status
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let mut status = Self::new();
        status.add_error(error);
        status
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn add_error(&mut self, error: impl Into<String>) -> &mut Self {
        self.errors.push(error.into());
        self.result = None;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.add_error(error);
        self
    }

    /// 有错误时为 `Failed with N error(s)`，否则为成功消息（默认 `Success`）
    pub fn message(&self) -> String {
        match self.errors.len() {
            0 if self.messages.is_empty() => SUCCESS_MESSAGE.to_string(),
            0 => self.messages.join("\n"),
            1 => "Failed with 1 error".to_string(),
            n => format!("Failed with {n} errors"),
        }
    }

    /// 以单行成功消息替换现有消息
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.messages = vec![message.into()];
        self
    }

    /// 合并另一状态的错误与消息行（结果类型可不同，其结果被丢弃）
    pub fn combine<U>(&mut self, other: Status<U>) -> &mut Self {
        self.errors.extend(other.errors);
        self.messages.extend(other.messages);
        if self.has_errors() {
            self.result = None;
        }
        self
    }

    pub fn combined<U>(mut self, other: Status<U>) -> Self {
        self.combine(other);
        self
    }

    /// 仅在有效状态上生效
    pub fn set_result(&mut self, result: T) -> &mut Self {
        if self.is_valid() {
            self.result = Some(result);
        }
        self
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref().filter(|_| self.is_valid())
    }

    pub fn into_result(self) -> Option<T> {
        if self.is_valid() { self.result } else { None }
    }

    pub fn all_errors(&self, separator: &str) -> String {
        self.errors.join(separator)
    }

    /// 转换结果类型，保留错误与消息、丢弃结果
    pub fn discard_result<U>(self) -> Status<U> {
        Status {
            errors: self.errors,
            messages: self.messages,
            result: None,
        }
    }
}

impl<T> fmt::Display for Status<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.write_str(&self.message())
        } else {
            write!(f, "{}: {}", self.message(), self.all_errors("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_status_is_valid_with_default_message() {
        let status: Status = Status::new();
        assert!(status.is_valid());
        assert_eq!(status.message(), "Success");
        assert!(status.result().is_none());
    }

    #[test]
    fn errors_make_status_invalid() {
        let mut status: Status = Status::success("saved");
        status.add_error("out of stock").add_error("bad address");
        assert!(!status.is_valid());
        assert_eq!(status.message(), "Failed with 2 errors");
        assert_eq!(status.all_errors(" | "), "out of stock | bad address");
        assert_eq!(
            status.to_string(),
            "Failed with 2 errors: out of stock; bad address"
        );
        assert_eq!(Status::<()>::failure("x").message(), "Failed with 1 error");
    }

    #[test]
    fn combine_unions_errors_and_messages() {
        let mut a: Status<usize> = Status::success("first");
        let b: Status = Status::success("second");
        a.combine(b);
        assert!(a.is_valid());
        assert_eq!(a.message(), "first\nsecond");

        let c: Status = Status::failure("boom");
        let a = a.combined(c);
        assert!(!a.is_valid());
        assert_eq!(a.errors(), &["boom".to_string()]);
    }

    #[test]
    fn result_is_only_available_on_valid_status() {
        let mut ok: Status<usize> = Status::new();
        ok.set_result(3);
        assert_eq!(ok.result(), Some(&3));

        let mut bad: Status<usize> = Status::failure("nope");
        bad.set_result(3);
        assert!(bad.result().is_none());

        // 先设结果再合并失败：结果被清除
        ok.combine(Status::<()>::failure("late"));
        assert!(ok.into_result().is_none());
    }

    #[test]
    fn discard_result_keeps_errors() {
        let mut status: Status<usize> = Status::failure("e1");
        status.set_message("ignored while invalid");
        let other: Status<String> = status.discard_result();
        assert_eq!(other.errors().len(), 1);
        assert!(other.result().is_none());
    }

    #[test]
    fn status_serializes_for_transport() {
        let mut status: Status<u32> = Status::new();
        status.set_result(7);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["result"], 7);
        let back: Status<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
