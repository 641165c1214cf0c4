//! 值类型标签

/// 值类型
///
/// `Persistent*` 指向永生容器（静态或持久），读写时不做引用计数
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 数组中的墓碑槽
    Invalid = -1,
    Uninit = 0,
    Null = 1,
    Boolean = 2,
    Int64 = 3,
    Double = 4,
    PersistentString = 5,
    String = 6,
    PersistentArray = 7,
    Array = 8,
    Object = 9,
    Resource = 10,
    /// 引用盒（间接层）
    Ref = 11,
}

impl DataType {
    /// Uninit 与 Null 都视为 null
    #[inline]
    pub fn is_null(self) -> bool {
        matches!(self, DataType::Uninit | DataType::Null)
    }

    #[inline]
    pub fn is_string(self) -> bool {
        matches!(self, DataType::String | DataType::PersistentString)
    }

    #[inline]
    pub fn is_array(self) -> bool {
        matches!(self, DataType::Array | DataType::PersistentArray)
    }

    /// 数据是否指向需要计数的容器
    #[inline]
    pub fn is_refcounted(self) -> bool {
        matches!(
            self,
            DataType::String | DataType::Array | DataType::Object | DataType::Resource | DataType::Ref
        )
    }

    /// PHP 层面的类型名
    pub fn name(self) -> &'static str {
        match self {
            DataType::Invalid => "invalid",
            DataType::Uninit | DataType::Null => "null",
            DataType::Boolean => "bool",
            DataType::Int64 => "int",
            DataType::Double => "float",
            DataType::PersistentString | DataType::String => "string",
            DataType::PersistentArray | DataType::Array => "array",
            DataType::Object => "object",
            DataType::Resource => "resource",
            DataType::Ref => "reference",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(DataType::Uninit.is_null());
        assert!(!DataType::Boolean.is_null());
        assert!(DataType::PersistentString.is_string());
        assert!(!DataType::PersistentArray.is_refcounted());
        assert!(DataType::Ref.is_refcounted());
        assert_eq!(DataType::Double.name(), "float");
    }
}
