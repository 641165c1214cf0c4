//! slab 池
//!
//! 预先映射一段连续区域并切分为 slab，空闲 slab 通过写在其开头的
//! 链接串成单链表。每次归还时版本号加一，避免回收后被误认。
//!
//! 同一个池可被多个工作线程共享；每个线程的 `SparseHeap` 在
//! `thread_init` 时拿到池的句柄

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use super::os::Mapping;
use crate::config::{HeapConfig, SLAB_ALIGN, SLAB_SIZE};

/// 写在空闲 slab 开头的链接
#[repr(C)]
pub struct SlabLink {
    pub next: *mut SlabLink,
    pub tag: u16,
}

/// 带版本号的 slab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedSlab {
    ptr: NonNull<u8>,
    tag: u16,
}

impl TaggedSlab {
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn tag(&self) -> u16 {
        self.tag
    }
}

/// 空闲链表
struct TaggedSlabList {
    head: *mut SlabLink,
    len: usize,
}

impl TaggedSlabList {
    fn pop(&mut self) -> Option<TaggedSlab> {
        let head = NonNull::new(self.head)?;
        unsafe {
            let link = head.as_ptr();
            self.head = (*link).next;
            self.len -= 1;
            Some(TaggedSlab { ptr: head.cast(), tag: (*link).tag })
        }
    }

    /// 把 [head, tail] 整段接到表头
    unsafe fn splice(&mut self, head: *mut SlabLink, tail: *mut SlabLink, count: usize) {
        (*tail).next = self.head;
        self.head = head;
        self.len += count;
    }
}

/// slab 池
pub struct SlabPool {
    region: Option<Mapping>,
    free: Mutex<TaggedSlabList>,
    available: CachePadded<AtomicUsize>,
    capacity: usize,
}

// 链表只在锁内修改，slab 内存本身由借用方独占
unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

static GLOBAL_POOL: OnceLock<Arc<SlabPool>> = OnceLock::new();

impl SlabPool {
    /// 预留 `num_slabs` 个 slab
    pub fn new(num_slabs: usize) -> Self {
        let region = match num_slabs {
            0 => None,
            n => Mapping::new(n * SLAB_SIZE, SLAB_ALIGN),
        };
        let capacity = if region.is_some() { num_slabs } else { 0 };

        let mut list = TaggedSlabList { head: ptr::null_mut(), len: 0 };
        if let Some(region) = &region {
            // 逆序入栈，使低地址的 slab 先被取出
            for i in (0..capacity).rev() {
                unsafe {
                    let link = region.ptr().add(i * SLAB_SIZE) as *mut SlabLink;
                    ptr::write(link, SlabLink { next: list.head, tag: 0 });
                    list.head = link;
                    list.len += 1;
                }
            }
        }
        log::debug!("slab pool reserved {} slabs", capacity);

        Self {
            region,
            free: Mutex::new(list),
            available: CachePadded::new(AtomicUsize::new(capacity)),
            capacity,
        }
    }

    /// 进程共享的默认池，按 CPU 核心数预留
    pub fn global() -> Arc<SlabPool> {
        GLOBAL_POOL
            .get_or_init(|| Arc::new(SlabPool::new(HeapConfig::from_env().pool_slabs())))
            .clone()
    }

    /// 取出一个空闲 slab
    pub fn try_alloc(&self) -> Option<TaggedSlab> {
        let slab = self.free.lock().pop()?;
        self.available.fetch_sub(1, Ordering::Relaxed);
        Some(slab)
    }

    /// 归还一段已链接好的 slab
    ///
    /// # Safety
    /// `head` 到 `tail` 必须是由本池分配的 `count` 个 slab 通过 `SlabLink` 串成的链
    pub unsafe fn merge(&self, head: *mut SlabLink, tail: *mut SlabLink, count: usize) {
        debug_assert!(!head.is_null() && !tail.is_null());
        self.free.lock().splice(head, tail, count);
        self.available.fetch_add(count, Ordering::Relaxed);
    }

    /// slab 是否来自本池
    pub fn owns(&self, p: *const u8) -> bool {
        self.region.as_ref().map_or(false, |r| r.contains(p))
    }

    /// 当前空闲数量
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    /// 总容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_merge() {
        let pool = SlabPool::new(3);
        assert_eq!(pool.capacity(), 3);
        let a = pool.try_alloc().unwrap();
        let b = pool.try_alloc().unwrap();
        assert_eq!(a.ptr() as usize % SLAB_ALIGN, 0);
        assert_eq!(b.ptr() as usize - a.ptr() as usize, SLAB_SIZE);
        assert!(pool.owns(a.ptr()));
        assert_eq!(pool.available(), 1);

        unsafe {
            let la = a.ptr() as *mut SlabLink;
            let lb = b.ptr() as *mut SlabLink;
            ptr::write(la, SlabLink { next: lb, tag: a.tag() + 1 });
            ptr::write(lb, SlabLink { next: ptr::null_mut(), tag: b.tag() + 1 });
            pool.merge(la, lb, 2);
        }
        assert_eq!(pool.available(), 3);
        let again = pool.try_alloc().unwrap();
        assert_eq!(again.ptr(), a.ptr());
        assert_eq!(again.tag(), 1);
    }

    #[test]
    fn test_exhausted_pool() {
        let pool = SlabPool::new(1);
        assert!(pool.try_alloc().is_some());
        assert!(pool.try_alloc().is_none());
        assert_eq!(SlabPool::new(0).capacity(), 0);
    }
}
