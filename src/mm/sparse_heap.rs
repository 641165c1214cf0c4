//! 稀疏堆
//!
//! 一个请求拥有的全部原始内存：若干 slab（由小对象分配器切分）以及
//! 逐个分配的 big 节点。big 节点头部记录自身在列表中的下标，释放时
//! 交换删除，O(1)。
//!
//! `find` 可以把任意内部指针反查到所属块的头部：先按地址排序，
//! 二分 slab 后在 slab 内顺着自描述的块大小线性前进；不在 slab 中
//! 再二分 big 节点

use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use super::header::{HeaderKind, HeapObject, MallocNode};
use super::slab_pool::{SlabLink, SlabPool};
use super::stats::MemoryUsageStats;
use crate::config::{
    MAX_SMALL_SIZE, REQUEST_HUGE_MAX_BYTES, SIZE_QUANTUM, SLAB_ALIGN, SLAB_SIZE, SMALL_FREE_FILL,
};

const NODE_SIZE: usize = size_of::<MallocNode>();

/// 一段内存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlock {
    pub ptr: *mut u8,
    pub size: usize,
}

impl MemBlock {
    pub const EMPTY: MemBlock = MemBlock { ptr: ptr::null_mut(), size: 0 };

    #[inline]
    pub fn end(&self) -> usize {
        self.ptr as usize + self.size
    }

    #[inline]
    pub fn contains(&self, p: *const u8) -> bool {
        let addr = p as usize;
        addr >= self.ptr as usize && addr < self.end()
    }
}

impl Default for MemBlock {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// 已登记的 slab
#[derive(Debug, Clone, Copy)]
struct SlabInfo {
    ptr: *mut u8,
    size: usize,
    tag: u16,
    pooled: bool,
}

impl SlabInfo {
    #[inline]
    fn end(&self) -> usize {
        self.ptr as usize + self.size
    }
}

/// 稀疏堆
pub struct SparseHeap {
    slabs: Vec<SlabInfo>,
    bigs: Vec<NonNull<MallocNode>>,
    pooled_bytes: usize,
    pool: Option<Arc<SlabPool>>,
    first_slab: MemBlock,
    trash_fill: bool,
    max_pooled_bytes: usize,
}

impl Default for SparseHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseHeap {
    pub fn new() -> Self {
        Self {
            slabs: Vec::new(),
            bigs: Vec::new(),
            pooled_bytes: 0,
            pool: None,
            first_slab: MemBlock::EMPTY,
            trash_fill: false,
            max_pooled_bytes: REQUEST_HUGE_MAX_BYTES,
        }
    }

    /// 绑定工作线程的 slab 池（线程生命周期，而非请求生命周期）
    pub fn thread_init(&mut self, pool: Arc<SlabPool>) {
        self.pool = Some(pool);
    }

    pub fn set_trash_fill(&mut self, enabled: bool) {
        self.trash_fill = enabled;
    }

    pub fn set_max_pooled_bytes(&mut self, bytes: usize) {
        self.max_pooled_bytes = bytes;
    }

    /// 设置预留的首 slab，重置时不会释放它
    pub fn set_first_slab(&mut self, block: MemBlock) {
        self.first_slab = MemBlock {
            ptr: block.ptr,
            size: block.size & !(SIZE_QUANTUM - 1),
        };
    }

    pub fn first_slab(&self) -> MemBlock {
        self.first_slab
    }

    fn first_slab_usable(&self) -> bool {
        let first = self.first_slab;
        first.size >= MAX_SMALL_SIZE && first.ptr as usize % SLAB_ALIGN == 0
    }

    /// 重置后仍然持有的字节数（可用的首 slab）
    ///
    /// 首 slab 的容量由持有方在统计重置时计入，`alloc_slab` 不再重复计入
    pub fn retained_bytes(&self) -> usize {
        if self.first_slab_usable() {
            self.first_slab.size
        } else {
            0
        }
    }

    pub fn empty(&self) -> bool {
        self.slabs.is_empty() && self.bigs.is_empty()
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    pub fn big_count(&self) -> usize {
        self.bigs.len()
    }

    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes
    }

    // ========================================================================
    // slab
    // ========================================================================

    /// 分配一个 slab：首 slab > 池 > 新分配
    pub fn alloc_slab(&mut self, stats: &mut MemoryUsageStats) -> MemBlock {
        let first = self.first_slab;
        if self.slabs.is_empty() && self.first_slab_usable() {
            stats.mmap_volume += first.size as i64;
            self.slabs.push(SlabInfo { ptr: first.ptr, size: first.size, tag: 0, pooled: false });
            log::trace!("alloc_slab: first slab {:p} ({} bytes)", first.ptr, first.size);
            return first;
        }

        if self.pooled_bytes < self.max_pooled_bytes {
            if let Some(slab) = self.pool.as_ref().and_then(|pool| pool.try_alloc()) {
                stats.mmap_volume += SLAB_SIZE as i64;
                stats.mmap_cap += SLAB_SIZE as i64;
                stats.update_peaks();
                self.slabs.push(SlabInfo { ptr: slab.ptr(), size: SLAB_SIZE, tag: slab.tag(), pooled: true });
                self.pooled_bytes += SLAB_SIZE;
                log::trace!("alloc_slab: pooled slab {:p} tag {}", slab.ptr(), slab.tag());
                return MemBlock { ptr: slab.ptr(), size: SLAB_SIZE };
            }
        }

        let layout = slab_layout();
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            alloc::handle_alloc_error(layout);
        }
        stats.malloc_cap += SLAB_SIZE as i64;
        stats.update_peaks();
        self.slabs.push(SlabInfo { ptr, size: SLAB_SIZE, tag: 0, pooled: false });
        log::trace!("alloc_slab: fresh slab {:p}", ptr);
        MemBlock { ptr, size: SLAB_SIZE }
    }

    /// 指针是否落在某个已登记的 slab 内（线性扫描）
    pub fn contains(&self, p: *const u8) -> bool {
        let addr = p as usize;
        self.slabs.iter().any(|s| addr >= s.ptr as usize && addr < s.end())
    }

    // ========================================================================
    // big 节点
    // ========================================================================

    /// 分配 `bytes` 字节的 big 块，返回节点头之后的地址
    pub fn alloc_big(
        &mut self,
        bytes: usize,
        kind: HeaderKind,
        type_index: u16,
        stats: &mut MemoryUsageStats,
    ) -> NonNull<u8> {
        self.big_impl(bytes, kind, type_index, stats, false)
    }

    /// 同 `alloc_big`，内存清零
    pub fn calloc_big(
        &mut self,
        bytes: usize,
        kind: HeaderKind,
        type_index: u16,
        stats: &mut MemoryUsageStats,
    ) -> NonNull<u8> {
        self.big_impl(bytes, kind, type_index, stats, true)
    }

    fn big_impl(
        &mut self,
        bytes: usize,
        kind: HeaderKind,
        type_index: u16,
        stats: &mut MemoryUsageStats,
        zeroed: bool,
    ) -> NonNull<u8> {
        let total = bytes + NODE_SIZE;
        let layout = big_layout(total);
        let raw = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let node = match NonNull::new(raw as *mut MallocNode) {
            Some(node) => node,
            None => alloc::handle_alloc_error(layout),
        };
        self.enlist(node, kind, total, type_index);
        stats.mm_udebt -= total as i64;
        stats.malloc_cap += total as i64;
        stats.update_peaks();
        log::trace!("alloc_big: {} bytes at {:p}", total, raw);
        unsafe { NonNull::new_unchecked(raw.add(NODE_SIZE)) }
    }

    fn enlist(&mut self, node: NonNull<MallocNode>, kind: HeaderKind, total: usize, type_index: u16) {
        unsafe {
            let n = node.as_ptr();
            (*n).hdr.init_32_16(kind, self.bigs.len() as u32, type_index);
            ptr::addr_of_mut!((*n).nbytes).write(total);
        }
        self.bigs.push(node);
    }

    /// 释放 big 块：交换删除，并修正被移动节点的下标
    ///
    /// # Safety
    /// `p` 必须是本堆 `alloc_big`/`calloc_big`/`resize_big` 返回且尚未释放的地址
    pub unsafe fn free_big(&mut self, p: NonNull<u8>, stats: &mut MemoryUsageStats) {
        let node = node_of(p);
        let index = (*node.as_ptr()).hdr.aux32() as usize;
        debug_assert_eq!(self.bigs.get(index), Some(&node));
        let removed = self.bigs.swap_remove(index);
        if let Some(moved) = self.bigs.get(index) {
            (*moved.as_ptr()).hdr.set_aux32(index as u32);
        }
        let total = (*removed.as_ptr()).nbytes;
        alloc::dealloc(removed.as_ptr() as *mut u8, big_layout(total));
        stats.mm_freed += total as i64;
        stats.malloc_cap -= total as i64;
        log::trace!("free_big: {} bytes", total);
    }

    /// 调整 big 块大小，节点移动时修正列表项
    ///
    /// # Safety
    /// 同 `free_big`
    pub unsafe fn resize_big(
        &mut self,
        p: NonNull<u8>,
        new_bytes: usize,
        stats: &mut MemoryUsageStats,
    ) -> NonNull<u8> {
        let node = node_of(p);
        let old_total = (*node.as_ptr()).nbytes;
        let new_total = new_bytes + NODE_SIZE;
        let raw = alloc::realloc(node.as_ptr() as *mut u8, big_layout(old_total), new_total);
        let moved = match NonNull::new(raw as *mut MallocNode) {
            Some(n) => n,
            None => alloc::handle_alloc_error(big_layout(new_total)),
        };
        ptr::addr_of_mut!((*moved.as_ptr()).nbytes).write(new_total);
        if moved != node {
            let index = (*moved.as_ptr()).hdr.aux32() as usize;
            self.bigs[index] = moved;
        }
        let delta = new_total as i64 - old_total as i64;
        stats.mm_udebt -= delta;
        stats.malloc_cap += delta;
        NonNull::new_unchecked(raw.add(NODE_SIZE))
    }

    // ========================================================================
    // 反查
    // ========================================================================

    /// 按地址排序 slab 与 big 节点，并重排 big 下标
    pub fn sort(&mut self) {
        self.slabs.sort_unstable_by_key(|s| s.ptr as usize);
        debug_assert!(self.slabs.windows(2).all(|w| w[0].end() <= w[1].ptr as usize));
        self.bigs.sort_unstable_by_key(|n| n.as_ptr() as usize);
        for (i, node) in self.bigs.iter().enumerate() {
            unsafe { (*node.as_ptr()).hdr.set_aux32(i as u32) };
        }
    }

    /// 查找包含 `p` 的块头；`p` 不属于本堆时返回 `None`
    ///
    /// slab 内的每个块都必须带有自描述头部（空闲块与尾部空洞也一样）
    pub fn find(&mut self, p: *const u8) -> Option<NonNull<HeapObject>> {
        self.sort();
        let addr = p as usize;

        let i = self.slabs.partition_point(|s| s.end() <= addr);
        if let Some(slab) = self.slabs.get(i) {
            if slab.ptr as usize <= addr {
                let mut h = slab.ptr as usize;
                let end = slab.end();
                while h < end {
                    let hdr = h as *mut HeapObject;
                    let size = unsafe { (*hdr).alloc_size() };
                    if size == 0 {
                        debug_assert!(false, "zero-sized block in slab at {:#x}", h);
                        return None;
                    }
                    if addr < h + size {
                        return NonNull::new(hdr);
                    }
                    h += size;
                }
                debug_assert!(false, "pointer {:p} inside slab but past every block", p);
                return None;
            }
        }

        let i = self.bigs.partition_point(|n| unsafe { n.as_ptr() as usize + (*n.as_ptr()).nbytes } <= addr);
        let node = *self.bigs.get(i)?;
        if node.as_ptr() as usize > addr {
            return None;
        }
        let hdr = node.cast::<HeapObject>();
        unsafe {
            if (*hdr.as_ptr()).kind() != HeaderKind::BigObj {
                return Some(hdr);
            }
            let sub = (node.as_ptr() as *mut u8).add(NODE_SIZE) as *mut HeapObject;
            if addr >= sub as usize {
                NonNull::new(sub)
            } else {
                Some(hdr)
            }
        }
    }

    /// 覆盖全部 slab 的地址区间（需要先 `sort`）
    pub fn slab_range(&self) -> MemBlock {
        match (self.slabs.first(), self.slabs.last()) {
            (Some(front), Some(back)) => MemBlock {
                ptr: front.ptr,
                size: back.end() - front.ptr as usize,
            },
            _ => MemBlock::EMPTY,
        }
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 请求结束：归还池化 slab、释放其余 slab 与全部 big 节点，保留首 slab
    pub fn reset(&mut self) {
        if self.empty() {
            return;
        }
        log::debug!("sparse heap reset: slabs {} bigs {}", self.slabs.len(), self.bigs.len());

        if self.trash_fill {
            for slab in &self.slabs {
                unsafe { ptr::write_bytes(slab.ptr, SMALL_FREE_FILL, slab.size) };
            }
            for node in &self.bigs {
                unsafe {
                    let total = (*node.as_ptr()).nbytes;
                    ptr::write_bytes((node.as_ptr() as *mut u8).add(NODE_SIZE), SMALL_FREE_FILL, total - NODE_SIZE);
                }
            }
        }

        let mut head: *mut SlabLink = ptr::null_mut();
        let mut tail: *mut SlabLink = ptr::null_mut();
        let mut pooled = 0usize;
        for slab in self.slabs.drain(..) {
            if slab.ptr == self.first_slab.ptr {
                continue;
            }
            if slab.pooled {
                let link = slab.ptr as *mut SlabLink;
                unsafe { link.write(SlabLink { next: head, tag: slab.tag.wrapping_add(1) }) };
                if tail.is_null() {
                    tail = link;
                }
                head = link;
                pooled += 1;
            } else {
                unsafe { alloc::dealloc(slab.ptr, slab_layout()) };
            }
        }
        if let (Some(pool), false) = (&self.pool, tail.is_null()) {
            unsafe { pool.merge(head, tail, pooled) };
        }
        self.pooled_bytes = 0;

        for node in self.bigs.drain(..) {
            unsafe {
                let total = (*node.as_ptr()).nbytes;
                alloc::dealloc(node.as_ptr() as *mut u8, big_layout(total));
            }
        }
    }

    /// 线程回收：丢弃簿记向量本身（要求已经为空）
    pub fn flush(&mut self) {
        debug_assert!(self.empty());
        self.slabs = Vec::new();
        self.bigs = Vec::new();
        self.pooled_bytes = 0;
        log::debug!("sparse heap flushed");
    }
}

impl Drop for SparseHeap {
    fn drop(&mut self) {
        self.reset();
    }
}

#[inline]
fn slab_layout() -> Layout {
    // SLAB_SIZE 与 SLAB_ALIGN 都是 2 的幂常量
    unsafe { Layout::from_size_align_unchecked(SLAB_SIZE, SLAB_ALIGN) }
}

#[inline]
fn big_layout(total: usize) -> Layout {
    match Layout::from_size_align(total, SIZE_QUANTUM) {
        Ok(layout) => layout,
        Err(_) => panic!("big allocation of {} bytes overflows", total),
    }
}

#[inline]
unsafe fn node_of(p: NonNull<u8>) -> NonNull<MallocNode> {
    NonNull::new_unchecked(p.as_ptr().sub(NODE_SIZE) as *mut MallocNode)
}
