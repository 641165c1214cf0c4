//! Q 虚拟机的值与内存核心
//!
//! - `vm`: 带类型标签的值、引用计数容器、写时复制数组、值运算与迭代协议
//! - `mm`: 请求级内存管理器（slab 小对象堆 + big 分配 + 指针反查）
//! - `runtime`: 线程/请求生命周期与诊断输出

pub mod config;
pub mod error;
pub mod i18n;
pub mod mm;
pub mod runtime;
pub mod vm;

pub use error::{VmError, VmResult};
pub use vm::{
    Array, ArrayData, ArrayIter, Cell, Class, CollectionType, DataType, Iter, ObjectData,
    StringData, TypedValue, Variant,
};
