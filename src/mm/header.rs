//! 堆对象头部
//!
//! 所有请求堆上的块都以 8 字节的 `HeapObject` 开头：
//!
//! ```text
//! | count / aux32 (4) | kind (1) | aux8 (1) | aux16 (2) |
//! ```
//!
//! - 引用计数类容器（字符串/数组/对象/资源/引用盒）使用 `count`
//! - 非计数类块（空闲块、空洞、big 节点）把同一字段当作 `aux32`
//! - 位于 slab 中的块用 `aux16` 记录尺寸类下标，`find` 据此遍历 slab

use std::cell::Cell;

use crate::config::{LG_SIZE_QUANTUM, SIZE_QUANTUM};

/// 引用计数类型
pub type RefCount = i32;

/// 静态（永生）对象的计数哨兵
pub const STATIC_VALUE: RefCount = -1;

/// 持久（跨请求、不计数）对象的计数哨兵
pub const UNCOUNTED_VALUE: RefCount = -2;

/// 块不在 slab 中（big 分配或永生对象）时 `aux16` 的取值
pub const NO_SIZE_INDEX: u16 = u16::MAX;

// ============================================================================
// 头部类型
// ============================================================================

/// 块类型标签
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    String = 0,
    Array = 1,
    Object = 2,
    Resource = 3,
    Ref = 4,
    /// 带 16 字节节点头的原始小块
    SmallMalloc = 5,
    /// 原始 big 块
    BigMalloc = 6,
    /// 内含一个带头对象的 big 块
    BigObj = 7,
    /// 空闲小块
    Free = 8,
    /// slab 尾部未使用的空洞
    Hole = 9,
}

impl HeaderKind {
    /// 是否为引用计数类容器
    #[inline]
    pub fn is_refcounted(self) -> bool {
        (self as u8) <= (HeaderKind::Ref as u8)
    }
}

/// 堆对象头部
#[repr(C)]
pub struct HeapObject {
    count: Cell<RefCount>,
    kind: Cell<HeaderKind>,
    aux8: Cell<u8>,
    aux16: Cell<u16>,
}

impl HeapObject {
    /// 初始化引用计数类头部，计数为 1
    #[inline]
    pub fn init(&self, kind: HeaderKind, size_index: u16) {
        self.count.set(1);
        self.kind.set(kind);
        self.aux8.set(0);
        self.aux16.set(size_index);
    }

    /// 初始化非计数类头部
    #[inline]
    pub fn init_32_16(&self, kind: HeaderKind, aux32: u32, aux16: u16) {
        self.count.set(aux32 as RefCount);
        self.kind.set(kind);
        self.aux8.set(0);
        self.aux16.set(aux16);
    }

    #[inline]
    pub fn kind(&self) -> HeaderKind {
        self.kind.get()
    }

    #[inline]
    pub fn count(&self) -> RefCount {
        self.count.get()
    }

    #[inline]
    pub fn set_count(&self, count: RefCount) {
        self.count.set(count);
    }

    #[inline]
    pub fn aux8(&self) -> u8 {
        self.aux8.get()
    }

    #[inline]
    pub fn set_aux8(&self, v: u8) {
        self.aux8.set(v);
    }

    #[inline]
    pub fn aux16(&self) -> u16 {
        self.aux16.get()
    }

    #[inline]
    pub fn set_aux16(&self, v: u16) {
        self.aux16.set(v);
    }

    #[inline]
    pub fn aux32(&self) -> u32 {
        self.count.get() as u32
    }

    #[inline]
    pub fn set_aux32(&self, v: u32) {
        self.count.set(v as RefCount);
    }

    // ========================================================================
    // 引用计数
    // ========================================================================

    /// 是否参与引用计数（永生哨兵为负数）
    #[inline]
    pub fn is_refcounted(&self) -> bool {
        self.count.get() >= 0
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.count.get() == STATIC_VALUE
    }

    #[inline]
    pub fn is_uncounted(&self) -> bool {
        self.count.get() == UNCOUNTED_VALUE
    }

    /// 唯一持有者才能原地修改
    #[inline]
    pub fn has_exactly_one_ref(&self) -> bool {
        self.count.get() == 1
    }

    #[inline]
    pub fn has_multiple_refs(&self) -> bool {
        self.count.get() > 1
    }

    #[inline]
    pub fn inc_ref(&self) {
        let c = self.count.get();
        if c >= 0 {
            self.count.set(c + 1);
        }
    }

    /// 递减计数，返回是否降到了零
    #[inline]
    pub fn dec_ref_and_check(&self) -> bool {
        let c = self.count.get();
        if c < 0 {
            return false;
        }
        debug_assert!(c > 0, "decref of a dead {:?}", self.kind());
        self.count.set(c - 1);
        c == 1
    }

    /// 标记为永生
    #[inline]
    pub fn set_immortal(&self, sentinel: RefCount) {
        debug_assert!(sentinel < 0);
        self.count.set(sentinel);
    }

    /// 块所占字节数（仅对 slab 中的块有意义）
    #[inline]
    pub fn alloc_size(&self) -> usize {
        match self.kind() {
            HeaderKind::Free | HeaderKind::Hole => self.aux32() as usize,
            _ => index_to_size(self.aux16() as usize),
        }
    }
}

// ============================================================================
// 节点布局
// ============================================================================

/// big 分配与原始小块共用的 16 字节节点头
#[repr(C)]
pub struct MallocNode {
    /// aux32 = big 列表中的下标；aux16 = 类型索引或尺寸类
    pub hdr: HeapObject,
    /// 整个块的字节数（含节点头）
    pub nbytes: usize,
}

/// 空闲链表节点
#[repr(C)]
pub struct FreeNode {
    pub hdr: HeapObject,
    pub next: *mut FreeNode,
}

/// 字节数对应的尺寸类下标
#[inline]
pub fn size_to_index(bytes: usize) -> usize {
    debug_assert!(bytes > 0);
    (bytes - 1) >> LG_SIZE_QUANTUM
}

/// 尺寸类下标对应的块大小
#[inline]
pub fn index_to_size(index: usize) -> usize {
    (index + 1) << LG_SIZE_QUANTUM
}

/// 向上对齐到尺寸量子
#[inline]
pub fn round_to_quantum(bytes: usize) -> usize {
    (bytes + SIZE_QUANTUM - 1) & !(SIZE_QUANTUM - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layout() {
        assert_eq!(size_of::<HeapObject>(), 8);
        assert_eq!(size_of::<MallocNode>(), 16);
        assert_eq!(size_of::<FreeNode>(), 16);
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(size_to_index(1), 0);
        assert_eq!(size_to_index(16), 0);
        assert_eq!(size_to_index(17), 1);
        assert_eq!(index_to_size(size_to_index(2048)), 2048);
        assert_eq!(round_to_quantum(33), 48);
    }

    #[test]
    fn test_refcount_sentinels() {
        let hdr = HeapObject {
            count: Cell::new(0),
            kind: Cell::new(HeaderKind::String),
            aux8: Cell::new(0),
            aux16: Cell::new(0),
        };
        hdr.init(HeaderKind::String, 3);
        assert!(hdr.has_exactly_one_ref());
        hdr.inc_ref();
        assert!(hdr.has_multiple_refs());
        assert!(!hdr.dec_ref_and_check());
        assert!(hdr.dec_ref_and_check());

        hdr.set_immortal(STATIC_VALUE);
        hdr.inc_ref();
        assert!(!hdr.dec_ref_and_check());
        assert!(hdr.is_static());
        assert!(!hdr.is_refcounted());
        assert_eq!(hdr.alloc_size(), 64);
    }
}
