//! 内存管理模块
//!
//! - `header`: 堆块头部与引用计数
//! - `os`: 系统内存映射
//! - `slab_pool`: 跨线程共享的 slab 池
//! - `sparse_heap`: 请求拥有的 slab 与 big 节点
//! - `manager`: 线程局部的小对象分配器
//! - `stats`: 内存统计

pub mod header;
pub mod manager;
pub mod os;
pub mod slab_pool;
pub mod sparse_heap;
pub mod stats;

pub use header::{HeaderKind, HeapObject, MallocNode, RefCount, STATIC_VALUE, UNCOUNTED_VALUE};
pub use manager::{try_with_heap, with_heap, MemoryManager};
pub use slab_pool::SlabPool;
pub use sparse_heap::{MemBlock, SparseHeap};
pub use stats::MemoryUsageStats;
