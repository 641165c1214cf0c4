//! 操作系统内存映射
//!
//! 为 slab 池预留大块对齐内存：unix 使用 `mmap`，windows 使用 `VirtualAlloc`，
//! 其他平台退回到全局分配器

use std::ptr::NonNull;

/// 一段对齐的匿名映射，析构时归还
pub struct Mapping {
    base: NonNull<u8>,
    len: usize,
    aligned: NonNull<u8>,
    size: usize,
}

// 映射只是一段地址区间，所有权随 Mapping 转移
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// 映射 `size` 字节，起始地址按 `align` 对齐
    pub fn new(size: usize, align: usize) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        let len = size.checked_add(align)?;
        let base = sys::map(len, align)?;
        let addr = base.as_ptr() as usize;
        let aligned = (addr + align - 1) & !(align - 1);
        Some(Self {
            base,
            len,
            aligned: NonNull::new(aligned as *mut u8)?,
            size,
        })
    }

    /// 对齐后的起始地址
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.aligned.as_ptr()
    }

    /// 可用字节数
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn contains(&self, p: *const u8) -> bool {
        let start = self.aligned.as_ptr() as usize;
        (start..start + self.size).contains(&(p as usize))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { sys::unmap(self.base, self.len) }
    }
}

#[cfg(unix)]
mod sys {
    use std::ptr::{self, NonNull};

    pub fn map(len: usize, _align: usize) -> Option<NonNull<u8>> {
        let p = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            log::warn!("mmap of {} bytes failed", len);
            return None;
        }
        NonNull::new(p as *mut u8)
    }

    pub unsafe fn unmap(base: NonNull<u8>, len: usize) {
        libc::munmap(base.as_ptr() as *mut libc::c_void, len);
    }
}

#[cfg(windows)]
mod sys {
    use std::ptr::{self, NonNull};
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

    pub fn map(len: usize, _align: usize) -> Option<NonNull<u8>> {
        let p = unsafe { VirtualAlloc(ptr::null_mut(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
        if p.is_null() {
            log::warn!("VirtualAlloc of {} bytes failed", len);
        }
        NonNull::new(p as *mut u8)
    }

    pub unsafe fn unmap(base: NonNull<u8>, _len: usize) {
        VirtualFree(base.as_ptr() as *mut _, 0, MEM_RELEASE);
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::alloc::{self, Layout};
    use std::ptr::NonNull;

    pub fn map(len: usize, align: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(len, align.min(4096)).ok()?;
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    pub unsafe fn unmap(base: NonNull<u8>, len: usize) {
        if let Ok(layout) = Layout::from_size_align(len, 4096) {
            alloc::dealloc(base.as_ptr(), layout);
        }
    }
}
