//! 请求级内存管理器
//!
//! 每个工作线程一个实例（线程局部）。小于 `MAX_SMALL_SIZE` 的请求
//! 按 16 字节量子分级：先查对应尺寸类的空闲链表，否则在当前 slab
//! 上顶针式分配；更大的请求直接交给 `SparseHeap` 的 big 分配。
//!
//! slab 中的每个块都带自描述头部：
//! - 容器对象：`HeapObject::init` 写入尺寸类下标
//! - 原始小块：16 字节 `MallocNode`，kind = `SmallMalloc`
//! - 空闲块：kind = `Free`，`aux32` 为块大小
//! - slab 尾部未用区域：kind = `Hole`

use std::cell::RefCell;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use super::header::{
    index_to_size, size_to_index, FreeNode, HeaderKind, HeapObject, MallocNode, NO_SIZE_INDEX,
};
use super::slab_pool::SlabPool;
use super::sparse_heap::{MemBlock, SparseHeap};
use super::stats::MemoryUsageStats;
use crate::config::{HeapConfig, MAX_SMALL_SIZE, NUM_SIZE_CLASSES, SMALL_FREE_FILL};
use crate::error::{VmError, VmResult};
use crate::i18n::messages::WARN_MEMORY_LIMIT;
use crate::runtime::diagnostics::raise_warning;

const NODE_SIZE: usize = size_of::<MallocNode>();

/// 请求级内存管理器
pub struct MemoryManager {
    heap: SparseHeap,
    stats: MemoryUsageStats,
    /// 当前 slab 中下一个可用地址
    front: *mut u8,
    /// 当前 slab 的末尾
    limit: *mut u8,
    free_lists: [*mut FreeNode; NUM_SIZE_CLASSES],
    config: HeapConfig,
    limit_warned: bool,
}

thread_local! {
    static TL_HEAP: RefCell<MemoryManager> = RefCell::new(MemoryManager::new(HeapConfig::default()));
}

/// 访问当前线程的内存管理器
///
/// 闭包内不得调用任何可能回到分配器的代码（析构、用户回调）
#[inline]
pub fn with_heap<R>(f: impl FnOnce(&mut MemoryManager) -> R) -> R {
    TL_HEAP.with(|mm| f(&mut mm.borrow_mut()))
}

/// 同 `with_heap`，线程局部存储已销毁时返回 `None`
#[inline]
pub fn try_with_heap<R>(f: impl FnOnce(&mut MemoryManager) -> R) -> Option<R> {
    TL_HEAP.try_with(|mm| f(&mut mm.borrow_mut())).ok()
}

impl MemoryManager {
    pub fn new(config: HeapConfig) -> Self {
        let mut heap = SparseHeap::new();
        heap.set_trash_fill(config.trash_fill);
        heap.set_max_pooled_bytes(config.max_pooled_bytes);
        Self {
            heap,
            stats: MemoryUsageStats::default(),
            front: ptr::null_mut(),
            limit: ptr::null_mut(),
            free_lists: [ptr::null_mut(); NUM_SIZE_CLASSES],
            config,
            limit_warned: false,
        }
    }

    /// 绑定 slab 池并应用配置
    pub fn thread_init(&mut self, config: HeapConfig, pool: Arc<SlabPool>) {
        self.heap.set_trash_fill(config.trash_fill);
        self.heap.set_max_pooled_bytes(config.max_pooled_bytes);
        self.heap.thread_init(pool);
        self.config = config;
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// 设置预留的首 slab，其容量立即计入统计
    pub fn set_first_slab(&mut self, block: MemBlock) {
        let before = self.heap.retained_bytes() as i64;
        self.heap.set_first_slab(block);
        self.stats.mmap_cap += self.heap.retained_bytes() as i64 - before;
        self.stats.update_peaks();
    }

    pub fn stats(&self) -> &MemoryUsageStats {
        &self.stats
    }

    pub fn heap(&self) -> &SparseHeap {
        &self.heap
    }

    // ========================================================================
    // 小对象分配
    // ========================================================================

    /// 分配尺寸类 `index` 的一个块，头部未初始化
    fn small_alloc(&mut self, index: usize) -> NonNull<u8> {
        let size = index_to_size(index);
        self.stats.mm_allocated += size as i64;
        self.stats.total_alloc += size as i64;
        self.stats.update_peaks();

        let head = self.free_lists[index];
        if let Some(node) = NonNull::new(head) {
            self.free_lists[index] = unsafe { (*node.as_ptr()).next };
            return node.cast();
        }

        if (self.limit as usize) - (self.front as usize) < size {
            self.new_slab();
        }
        let p = self.front;
        self.front = unsafe { p.add(size) };
        // front 非空：new_slab 保证了至少一个 slab
        unsafe { NonNull::new_unchecked(p) }
    }

    /// 换到新的 slab，旧 slab 的剩余部分标记为空洞
    #[cold]
    fn new_slab(&mut self) {
        self.init_hole();
        let slab = self.heap.alloc_slab(&mut self.stats);
        self.front = slab.ptr;
        self.limit = unsafe { slab.ptr.add(slab.size) };
        self.refresh_limit();
    }

    /// 把 [front, limit) 写成一个空洞块
    fn init_hole(&mut self) {
        let remaining = self.limit as usize - self.front as usize;
        if remaining > 0 {
            let hdr = unsafe { &*(self.front as *const HeapObject) };
            hdr.init_32_16(HeaderKind::Hole, remaining as u32, 0);
        }
    }

    /// 回收尺寸类 `index` 的一个块
    unsafe fn small_free(&mut self, p: *mut u8, index: usize) {
        let size = index_to_size(index);
        if self.config.trash_fill {
            ptr::write_bytes(p, SMALL_FREE_FILL, size);
        }
        let node = p as *mut FreeNode;
        (*node).hdr.init_32_16(HeaderKind::Free, size as u32, 0);
        ptr::addr_of_mut!((*node).next).write(self.free_lists[index]);
        self.free_lists[index] = node;
        self.stats.mm_freed += size as i64;
    }

    // ========================================================================
    // 带头部的容器
    // ========================================================================

    /// 分配 `bytes` 字节的容器，头部按 `kind` 初始化（计数为 1）
    pub fn obj_malloc(&mut self, bytes: usize, kind: HeaderKind) -> NonNull<HeapObject> {
        debug_assert!(bytes >= size_of::<HeapObject>());
        if bytes <= MAX_SMALL_SIZE {
            let index = size_to_index(bytes);
            let p = self.small_alloc(index).cast::<HeapObject>();
            unsafe { p.as_ref().init(kind, index as u16) };
            p
        } else {
            let p = self
                .heap
                .alloc_big(bytes, HeaderKind::BigObj, kind as u16, &mut self.stats)
                .cast::<HeapObject>();
            unsafe { p.as_ref().init(kind, NO_SIZE_INDEX) };
            self.refresh_limit();
            p
        }
    }

    /// 释放 `obj_malloc` 分配的容器
    ///
    /// # Safety
    /// `hdr` 必须来自本管理器的 `obj_malloc` 且只释放一次
    pub unsafe fn obj_free(&mut self, hdr: NonNull<HeapObject>) {
        let index = hdr.as_ref().aux16();
        if index == NO_SIZE_INDEX {
            self.heap.free_big(hdr.cast(), &mut self.stats);
        } else {
            self.small_free(hdr.as_ptr() as *mut u8, index as usize);
        }
    }

    // ========================================================================
    // 原始缓冲区（16 字节节点头）
    // ========================================================================

    /// 分配原始缓冲区
    pub fn req_malloc(&mut self, bytes: usize) -> NonNull<u8> {
        let total = bytes + NODE_SIZE;
        if total <= MAX_SMALL_SIZE {
            let index = size_to_index(total);
            let node = self.small_alloc(index).cast::<MallocNode>();
            unsafe {
                (*node.as_ptr()).hdr.init_32_16(HeaderKind::SmallMalloc, 0, index as u16);
                ptr::addr_of_mut!((*node.as_ptr()).nbytes).write(index_to_size(index));
                NonNull::new_unchecked((node.as_ptr() as *mut u8).add(NODE_SIZE))
            }
        } else {
            let p = self.heap.alloc_big(bytes, HeaderKind::BigMalloc, 0, &mut self.stats);
            self.refresh_limit();
            p
        }
    }

    /// 分配清零的原始缓冲区
    pub fn req_calloc(&mut self, bytes: usize) -> NonNull<u8> {
        if bytes + NODE_SIZE > MAX_SMALL_SIZE {
            let p = self.heap.calloc_big(bytes, HeaderKind::BigMalloc, 0, &mut self.stats);
            self.refresh_limit();
            return p;
        }
        let p = self.req_malloc(bytes);
        unsafe { ptr::write_bytes(p.as_ptr(), 0, bytes) };
        p
    }

    /// 调整原始缓冲区大小，内容按较小者保留
    ///
    /// # Safety
    /// `p` 必须来自本管理器的 `req_*` 且尚未释放
    pub unsafe fn req_realloc(&mut self, p: NonNull<u8>, new_bytes: usize) -> NonNull<u8> {
        let node = p.as_ptr().sub(NODE_SIZE) as *mut MallocNode;
        if (*node).hdr.kind() == HeaderKind::BigMalloc && new_bytes + NODE_SIZE > MAX_SMALL_SIZE {
            let q = self.heap.resize_big(p, new_bytes, &mut self.stats);
            self.refresh_limit();
            return q;
        }
        let old_bytes = (*node).nbytes - NODE_SIZE;
        if (*node).hdr.kind() == HeaderKind::SmallMalloc && new_bytes <= old_bytes {
            return p;
        }
        let q = self.req_malloc(new_bytes);
        ptr::copy_nonoverlapping(p.as_ptr(), q.as_ptr(), old_bytes.min(new_bytes));
        self.req_free(p);
        q
    }

    /// 释放原始缓冲区
    ///
    /// # Safety
    /// 同 `req_realloc`
    pub unsafe fn req_free(&mut self, p: NonNull<u8>) {
        let node = p.as_ptr().sub(NODE_SIZE) as *mut MallocNode;
        match (*node).hdr.kind() {
            HeaderKind::SmallMalloc => {
                let index = (*node).hdr.aux16() as usize;
                self.small_free(node as *mut u8, index);
            }
            kind => {
                debug_assert_eq!(kind, HeaderKind::BigMalloc);
                self.heap.free_big(p, &mut self.stats);
            }
        }
    }

    // ========================================================================
    // 反查与生命周期
    // ========================================================================

    /// 查找包含 `p` 的块头
    pub fn find(&mut self, p: *const u8) -> Option<NonNull<HeapObject>> {
        self.init_hole();
        self.heap.find(p)
    }

    pub fn contains(&self, p: *const u8) -> bool {
        self.heap.contains(p)
    }

    /// 检查请求内存上限，超出时只警告一次
    pub fn check_memory_limit(&mut self) -> VmResult<()> {
        let limit = self.config.memory_limit;
        let usage = self.stats.usage().max(0) as usize;
        if limit == 0 || usage <= limit {
            return Ok(());
        }
        if !self.limit_warned {
            self.limit_warned = true;
            let (usage, limit) = (usage.to_string(), limit.to_string());
            raise_warning(WARN_MEMORY_LIMIT, &[usage.as_str(), limit.as_str()]);
        }
        Err(VmError::MemoryLimitExceeded { limit, usage })
    }

    /// 分配慢路径上的上限检查：超出只警告，分配照常完成
    #[cold]
    fn refresh_limit(&mut self) {
        if self.config.memory_limit != 0 {
            let _ = self.check_memory_limit();
        }
    }

    /// 清零本请求统计，仍持有的首 slab 重新计入容量
    pub fn reset_stats(&mut self) {
        self.stats = MemoryUsageStats::default();
        self.stats.mmap_cap = self.heap.retained_bytes() as i64;
        self.stats.update_peaks();
        self.limit_warned = false;
    }

    pub fn log_stats(&self) {
        log::info!("request memory:\n{}", self.stats);
    }

    /// 请求结束：整体归还
    pub fn reset_request(&mut self) {
        log::debug!(
            "reset request heap: usage {} peak {}",
            self.stats.usage(),
            self.stats.peak_usage
        );
        self.heap.reset();
        self.free_lists = [ptr::null_mut(); NUM_SIZE_CLASSES];
        self.front = ptr::null_mut();
        self.limit = ptr::null_mut();
        self.reset_stats();
    }

    /// 线程回收：在重置之后丢弃簿记
    pub fn flush(&mut self) {
        self.reset_request();
        self.heap.flush();
    }
}
