//! 请求运行时模块
//!
//! 每个工作线程绑定一个内存管理器；请求开始/结束时由 `RequestScope`
//! 负责整体回收。警告通过 `diagnostics` 输出

pub mod diagnostics;
pub mod request;

pub use diagnostics::{raise_warning, take_diagnostics, Diagnostic};
pub use request::{thread_exit, thread_init, RequestScope};
