//! 消息键定义

// 警告
pub const WARN_DIVISION_BY_ZERO: &str = "warn.division_by_zero";
pub const WARN_NEXT_ELEMENT_OCCUPIED: &str = "warn.next_element_occupied";
pub const WARN_ILLEGAL_OFFSET_TYPE: &str = "warn.illegal_offset_type";
pub const WARN_ARRAY_TO_STRING: &str = "warn.array_to_string";
pub const WARN_MEMORY_LIMIT: &str = "warn.memory_limit";

// 错误
pub const ERR_BAD_ARRAY_OPERAND: &str = "err.bad_array_operand";
pub const ERR_COLLECTION_COMPARE: &str = "err.collection_compare";
pub const ERR_OBJECT_TO_STRING: &str = "err.object_to_string";
pub const ERR_MEMORY_LIMIT: &str = "err.memory_limit";
