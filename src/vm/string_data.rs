//! 引用计数字符串
//!
//! 布局：16 字节头部后紧跟字节内容。
//! - 请求字符串分配在请求堆上，计数归零时释放
//! - 静态字符串驻留在全局表中，永生
//! - 持久字符串跨请求存在，不计数，需要显式释放

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::hash::Hasher;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use dashmap::DashMap;
use rustc_hash::FxHasher;

use super::numeric;
use crate::mm::header::NO_SIZE_INDEX;
use crate::mm::{try_with_heap, with_heap, HeaderKind, HeapObject, STATIC_VALUE, UNCOUNTED_VALUE};

/// 缓存中标记 hash 已计算的位
const HASH_CACHED: u32 = 0x8000_0000;

/// 字符串
#[repr(C)]
pub struct StringData {
    hdr: HeapObject,
    len: u32,
    hash: Cell<u32>,
}

const HEADER_SIZE: usize = size_of::<StringData>();

/// 静态字符串驻留表：内容 -> 地址
static STATIC_STRINGS: OnceLock<DashMap<Vec<u8>, usize>> = OnceLock::new();

fn static_table() -> &'static DashMap<Vec<u8>, usize> {
    STATIC_STRINGS.get_or_init(|| DashMap::with_capacity(256))
}

fn immortal_layout(len: usize) -> Layout {
    match Layout::from_size_align(HEADER_SIZE + len.max(1), 16) {
        Ok(layout) => layout,
        Err(_) => panic!("string of {} bytes is too large", len),
    }
}

/// 长度字段只有 32 位，超长字符串直接终止
fn checked_len(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!("string of {} bytes exceeds the 4 GiB limit", len),
    }
}

impl StringData {
    /// 在请求堆上创建，计数为 1
    pub fn make(bytes: &[u8]) -> *mut StringData {
        checked_len(bytes.len());
        let hdr = with_heap(|mm| mm.obj_malloc(HEADER_SIZE + bytes.len(), HeaderKind::String));
        unsafe { Self::fill(hdr.as_ptr() as *mut StringData, bytes) }
    }

    unsafe fn fill(s: *mut StringData, bytes: &[u8]) -> *mut StringData {
        ptr::addr_of_mut!((*s).len).write(checked_len(bytes.len()));
        ptr::addr_of_mut!((*s).hash).write(Cell::new(0));
        ptr::copy_nonoverlapping(bytes.as_ptr(), (s as *mut u8).add(HEADER_SIZE), bytes.len());
        s
    }

    /// 永生字符串会被多个线程共享，hash 在发布前算好，之后只读
    unsafe fn make_immortal(bytes: &[u8], sentinel: i32) -> *mut StringData {
        checked_len(bytes.len());
        let layout = immortal_layout(bytes.len());
        let raw = match NonNull::new(alloc::alloc(layout)) {
            Some(p) => p.as_ptr(),
            None => alloc::handle_alloc_error(layout),
        };
        let s = raw as *mut StringData;
        (*s).hdr.init(HeaderKind::String, NO_SIZE_INDEX);
        (*s).hdr.set_immortal(sentinel);
        Self::fill(s, bytes);
        (*s).hash.set(hash_bytes(bytes) | HASH_CACHED);
        s
    }

    /// 驻留的静态字符串，相同内容返回同一地址
    pub fn make_static(bytes: &[u8]) -> *mut StringData {
        let table = static_table();
        if let Some(addr) = table.get(bytes) {
            return *addr as *mut StringData;
        }
        *table
            .entry(bytes.to_vec())
            .or_insert_with(|| unsafe { Self::make_immortal(bytes, STATIC_VALUE) } as usize)
            as *mut StringData
    }

    /// 不计数的持久字符串
    pub fn make_uncounted(bytes: &[u8]) -> *mut StringData {
        unsafe { Self::make_immortal(bytes, UNCOUNTED_VALUE) }
    }

    /// 释放持久字符串
    ///
    /// # Safety
    /// `s` 必须来自 `make_uncounted`，且没有其他持有者
    pub unsafe fn release_uncounted(s: *mut StringData) {
        debug_assert!((*s).hdr.is_uncounted());
        let layout = immortal_layout((*s).len());
        alloc::dealloc(s as *mut u8, layout);
    }

    /// 连接两个字符串，结果在请求堆上
    pub fn concat(a: &[u8], b: &[u8]) -> *mut StringData {
        let len = checked_len(a.len() + b.len());
        let hdr = with_heap(|mm| mm.obj_malloc(HEADER_SIZE + a.len() + b.len(), HeaderKind::String));
        let s = hdr.as_ptr() as *mut StringData;
        unsafe {
            ptr::addr_of_mut!((*s).len).write(len);
            ptr::addr_of_mut!((*s).hash).write(Cell::new(0));
            let data = (s as *mut u8).add(HEADER_SIZE);
            ptr::copy_nonoverlapping(a.as_ptr(), data, a.len());
            ptr::copy_nonoverlapping(b.as_ptr(), data.add(a.len()), b.len());
        }
        s
    }

    /// 计数归零后释放
    ///
    /// # Safety
    /// 计数已经归零，且此后不再被访问
    pub unsafe fn release(s: *mut StringData) {
        debug_assert!((*s).hdr.is_refcounted());
        let hdr = NonNull::new_unchecked(s as *mut HeapObject);
        try_with_heap(|mm| mm.obj_free(hdr));
    }

    #[inline]
    pub fn hdr(&self) -> &HeapObject {
        &self.hdr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((self as *const Self as *const u8).add(HEADER_SIZE), self.len())
        }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// 已缓存的 hash
    #[inline]
    pub fn cached_hash(&self) -> Option<u32> {
        match self.hash.get() {
            0 => None,
            h => Some(h & !HASH_CACHED),
        }
    }

    /// 31 位 hash，首次计算后缓存
    pub fn hash(&self) -> u32 {
        let cached = self.hash.get();
        if cached != 0 {
            return cached & !HASH_CACHED;
        }
        let h = hash_bytes(self.as_bytes());
        self.hash.set(h | HASH_CACHED);
        h
    }

    #[inline]
    pub fn same(&self, other: &StringData) -> bool {
        ptr::eq(self, other) || self.as_bytes() == other.as_bytes()
    }

    /// "" 与 "0" 为假
    pub fn to_boolean(&self) -> bool {
        !matches!(self.as_bytes(), b"" | b"0")
    }

    pub fn to_int64(&self) -> i64 {
        numeric::string_to_int64(self.as_bytes())
    }

    pub fn to_double(&self) -> f64 {
        numeric::string_to_double(self.as_bytes())
    }

    pub fn is_numeric(&self) -> Option<numeric::Numeric> {
        numeric::is_numeric_string(self.as_bytes())
    }
}

/// 字节串的 31 位 hash
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    let h = hasher.finish();
    ((h ^ (h >> 32)) as u32) & !HASH_CACHED
}
