//! 中文消息

use super::messages::*;

/// 获取中文消息
pub fn get(key: &str) -> &'static str {
    match key {
        // 警告
        WARN_DIVISION_BY_ZERO => "除数为零",
        WARN_NEXT_ELEMENT_OCCUPIED => "无法向数组追加元素：下一个整数键已被占用",
        WARN_ILLEGAL_OFFSET_TYPE => "非法的数组键类型",
        WARN_ARRAY_TO_STRING => "数组被转换为字符串",
        WARN_MEMORY_LIMIT => "请求内存使用量 {} 超过上限 {} 字节",

        // 错误
        ERR_BAD_ARRAY_OPERAND => "不支持的操作数类型",
        ERR_COLLECTION_COMPARE => "不能使用关系运算符 (<, <=, >, >=) 比较集合与{}",
        ERR_OBJECT_TO_STRING => "类 {} 的对象无法转换为字符串",
        ERR_MEMORY_LIMIT => "内存已耗尽：上限 {} 字节（尝试使用 {} 字节）",

        _ => "未知消息",
    }
}
