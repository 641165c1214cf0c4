//! 引用盒
//!
//! PHP 引用（`$a = &$b`）让多个槽共享同一个值：槽里存的是指向 `RefData`
//! 的指针，盒子本身引用计数，值存放在盒子内部

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::mm::{try_with_heap, with_heap, HeaderKind, HeapObject};
use crate::vm::refcount::{tv_dec_ref, tv_inc_ref};
use crate::vm::typed_value::{make_tv_uninit, TypedValue};

#[repr(C)]
pub struct RefData {
    hdr: HeapObject,
    tv: UnsafeCell<TypedValue>,
}

impl RefData {
    /// 新盒子，复制 `v`（加计数），计数为 1
    pub fn make(v: &TypedValue) -> *mut RefData {
        tv_inc_ref(v);
        Self::make_owned(*v)
    }

    /// 新盒子，接管 `v` 的引用
    pub fn make_owned(v: TypedValue) -> *mut RefData {
        debug_assert!(!v.is_ref());
        let hdr = with_heap(|mm| mm.obj_malloc(size_of::<RefData>(), HeaderKind::Ref));
        let r = hdr.as_ptr() as *mut RefData;
        unsafe { ptr::addr_of_mut!((*r).tv).write(UnsafeCell::new(v)) };
        r
    }

    #[inline]
    pub fn hdr(&self) -> &HeapObject {
        &self.hdr
    }

    #[inline]
    pub fn tv(&self) -> &TypedValue {
        unsafe { &*self.tv.get() }
    }

    /// 盒内的槽
    #[inline]
    pub fn tv_ptr(&self) -> *mut TypedValue {
        self.tv.get()
    }

    /// 计数归零后释放：先归还盒子，再递减内部的值
    ///
    /// # Safety
    /// 计数已经归零
    pub unsafe fn release(r: *mut RefData) {
        let inner = ptr::replace((*r).tv.get(), make_tv_uninit());
        let hdr = NonNull::new_unchecked(r as *mut HeapObject);
        try_with_heap(|mm| mm.obj_free(hdr));
        tv_dec_ref(inner);
    }
}
