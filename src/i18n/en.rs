//! English messages

use super::messages::*;

/// Get English message
pub fn get(key: &str) -> &'static str {
    match key {
        // Warnings
        WARN_DIVISION_BY_ZERO => "Division by zero",
        WARN_NEXT_ELEMENT_OCCUPIED => {
            "Cannot add element to the array as the next element is already occupied"
        }
        WARN_ILLEGAL_OFFSET_TYPE => "Illegal offset type",
        WARN_ARRAY_TO_STRING => "Array to string conversion",
        WARN_MEMORY_LIMIT => "Request memory usage {} exceeds the limit of {} bytes",

        // Errors
        ERR_BAD_ARRAY_OPERAND => "Unsupported operand types",
        ERR_COLLECTION_COMPARE => {
            "Cannot use relational comparison operators (<, <=, >, >=) to compare a collection with {}"
        }
        ERR_OBJECT_TO_STRING => "Object of class {} could not be converted to string",
        ERR_MEMORY_LIMIT => "Allowed memory size of {} bytes exhausted (tried to use {} bytes)",

        _ => "Unknown message",
    }
}
