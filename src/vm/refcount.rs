//! 值的引用计数
//!
//! 计数归零时同步释放容器。释放可能级联（数组元素）或进入对象析构，
//! 析构又可以分配、修改数组、递减其他值，所以调用方在递减之后
//! 不能再依赖递减前读到的任何派生指针

use super::array::ArrayData;
use super::datatype::DataType;
use super::object::ObjectData;
use super::ref_data::RefData;
use super::resource::ResourceData;
use super::string_data::StringData;
use super::typed_value::TypedValue;

/// 可计数类型加一
#[inline]
pub fn tv_inc_ref(tv: &TypedValue) {
    if tv.is_refcounted() {
        unsafe { (*tv.counted()).inc_ref() };
    }
}

/// 可计数类型减一，归零时释放
#[inline]
pub fn tv_dec_ref(tv: TypedValue) {
    if tv.is_refcounted() && unsafe { (*tv.counted()).dec_ref_and_check() } {
        unsafe { tv_release(tv) };
    }
}

/// 当前计数；不可计数类型返回 `None`
pub fn tv_refcount(tv: &TypedValue) -> Option<i32> {
    if tv.ty.is_refcounted() || matches!(tv.ty, DataType::PersistentString | DataType::PersistentArray) {
        Some(unsafe { (*tv.counted()).count() })
    } else {
        None
    }
}

/// 按类型释放容器
///
/// # Safety
/// `tv` 指向的容器计数已经归零
pub unsafe fn tv_release(tv: TypedValue) {
    match tv.ty {
        DataType::String => StringData::release(tv.pstr()),
        DataType::Array => ArrayData::release(tv.parr()),
        DataType::Object => ObjectData::release(tv.pobj()),
        DataType::Resource => ResourceData::release(tv.pres()),
        DataType::Ref => RefData::release(tv.pref()),
        ty => debug_assert!(false, "release of non-refcounted {:?}", ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::typed_value::{make_tv_int, make_tv_string};

    #[test]
    fn test_inc_dec() {
        let tv = make_tv_string(StringData::make(b"abc"));
        tv_inc_ref(&tv);
        assert_eq!(tv_refcount(&tv), Some(2));
        tv_dec_ref(tv);
        assert_eq!(tv_refcount(&tv), Some(1));
        tv_dec_ref(tv);

        let n = make_tv_int(5);
        tv_inc_ref(&n);
        tv_dec_ref(n);
        assert_eq!(tv_refcount(&n), None);
    }

    #[test]
    fn test_static_is_skipped() {
        let tv = make_tv_string(StringData::make_static(b"static-rc"));
        assert_eq!(tv.ty, DataType::PersistentString);
        tv_inc_ref(&tv);
        tv_dec_ref(tv);
        assert_eq!(tv_refcount(&tv), Some(-1));
    }
}
