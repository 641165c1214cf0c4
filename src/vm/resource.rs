//! 资源

use std::cell::Cell;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::mm::{try_with_heap, with_heap, HeaderKind, HeapObject};

thread_local! {
    static NEXT_ID: Cell<i64> = const { Cell::new(1) };
}

/// 资源句柄：编号 + 类型名
#[repr(C)]
pub struct ResourceData {
    hdr: HeapObject,
    id: i64,
    type_name: &'static str,
}

impl ResourceData {
    pub fn make(type_name: &'static str) -> *mut ResourceData {
        let id = NEXT_ID.with(|n| {
            let id = n.get();
            n.set(id + 1);
            id
        });
        let hdr = with_heap(|mm| mm.obj_malloc(size_of::<ResourceData>(), HeaderKind::Resource));
        let r = hdr.as_ptr() as *mut ResourceData;
        unsafe {
            ptr::addr_of_mut!((*r).id).write(id);
            ptr::addr_of_mut!((*r).type_name).write(type_name);
        }
        log::trace!("resource #{} ({}) opened", id, type_name);
        r
    }

    #[inline]
    pub fn hdr(&self) -> &HeapObject {
        &self.hdr
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// # Safety
    /// 计数已经归零
    pub unsafe fn release(r: *mut ResourceData) {
        log::trace!("resource #{} ({}) released", (*r).id, (*r).type_name);
        let hdr = NonNull::new_unchecked(r as *mut HeapObject);
        try_with_heap(|mm| mm.obj_free(hdr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::refcount::tv_dec_ref;
    use crate::vm::typed_value::make_tv_resource;

    #[test]
    fn test_ids_increase() {
        let a = ResourceData::make("stream");
        let b = ResourceData::make("stream");
        unsafe {
            assert!((*b).id() > (*a).id());
            assert_eq!((*a).type_name(), "stream");
        }
        tv_dec_ref(make_tv_resource(a));
        tv_dec_ref(make_tv_resource(b));
    }
}
