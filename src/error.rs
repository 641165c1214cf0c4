//! 运行时错误
//!
//! 只有 PHP 语义上会抛出的情况才会成为 `VmError`；除零等情况走警告通道

use thiserror::Error;

use crate::i18n::{self, messages::*, Locale};

/// 值运算可抛出的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// 数组参与了 `+` 以外的算术运算
    #[error("Unsupported operand types")]
    BadArrayOperand,

    /// 集合对象参与 `<` / `>` 比较
    #[error("Cannot use relational comparison operators (<, <=, >, >=) to compare a collection with {with}")]
    CollectionCompare { with: &'static str },

    /// 对象没有字符串转换能力
    #[error("Object of class {class} could not be converted to string")]
    ObjectToString { class: String },

    /// 请求内存超限
    #[error("Allowed memory size of {limit} bytes exhausted (tried to use {usage} bytes)")]
    MemoryLimitExceeded { limit: usize, usage: usize },
}

/// 运行时结果类型
pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// 按语言渲染错误消息
    pub fn localized(&self, locale: Locale) -> String {
        match self {
            VmError::BadArrayOperand => i18n::get_message(ERR_BAD_ARRAY_OPERAND, locale).to_string(),
            VmError::CollectionCompare { with } => {
                i18n::format_message(ERR_COLLECTION_COMPARE, locale, &[*with])
            }
            VmError::ObjectToString { class } => {
                i18n::format_message(ERR_OBJECT_TO_STRING, locale, &[class.as_str()])
            }
            VmError::MemoryLimitExceeded { limit, usage } => {
                let (limit, usage) = (limit.to_string(), usage.to_string());
                i18n::format_message(ERR_MEMORY_LIMIT, locale, &[limit.as_str(), usage.as_str()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_english_catalog() {
        let errors = [
            VmError::BadArrayOperand,
            VmError::CollectionCompare { with: "an integer" },
            VmError::ObjectToString { class: "Foo".to_string() },
            VmError::MemoryLimitExceeded { limit: 10, usage: 20 },
        ];
        for err in &errors {
            assert_eq!(err.to_string(), err.localized(Locale::En));
        }
    }

    #[test]
    fn test_localized_zh() {
        let err = VmError::ObjectToString { class: "Foo".to_string() };
        assert!(err.localized(Locale::Zh).contains("Foo"));
        assert_ne!(err.localized(Locale::Zh), err.to_string());
    }
}
