//! 拥有所有权的值
//!
//! `Variant` 持有内部值的一个引用：克隆时加计数，丢弃时减计数

use std::fmt;

use crate::error::VmResult;
use crate::vm::array::Array;
use crate::vm::conversions::{cell_to_bool, cell_to_double, cell_to_int, cell_to_std_string};
use crate::vm::datatype::DataType;
use crate::vm::refcount::{tv_dec_ref, tv_inc_ref};
use crate::vm::string_data::StringData;
use crate::vm::tv_compare::{tv_compare, tv_equal, tv_greater, tv_less, tv_same};
use crate::vm::tv_mutate::tv_to_cell;
use crate::vm::typed_value::*;

pub struct Variant(TypedValue);

impl Variant {
    pub fn null() -> Self {
        Variant(make_tv_null())
    }

    pub fn uninit() -> Self {
        Variant(make_tv_uninit())
    }

    /// 复制一份（加计数）
    pub fn from_tv(tv: &TypedValue) -> Self {
        let mut v = *tv;
        v.set_aux(0);
        tv_inc_ref(&v);
        Variant(v)
    }

    /// 接管 `tv` 持有的引用
    pub fn attach(mut tv: TypedValue) -> Self {
        tv.set_aux(0);
        Variant(tv)
    }

    /// 交出引用
    pub fn detach(self) -> TypedValue {
        let tv = self.0;
        std::mem::forget(self);
        tv
    }

    #[inline]
    pub fn as_tv(&self) -> &TypedValue {
        &self.0
    }

    #[inline]
    pub fn as_tv_mut(&mut self) -> &mut TypedValue {
        &mut self.0
    }

    #[inline]
    pub fn ty(&self) -> DataType {
        tv_to_cell(&self.0).ty
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        tv_to_cell(&self.0).is_null()
    }

    pub fn is_string(&self) -> bool {
        tv_to_cell(&self.0).is_string()
    }

    pub fn is_array(&self) -> bool {
        tv_to_cell(&self.0).is_array()
    }

    // ========================================================================
    // 转换
    // ========================================================================

    pub fn to_boolean(&self) -> bool {
        cell_to_bool(&self.0)
    }

    pub fn to_int64(&self) -> i64 {
        cell_to_int(&self.0)
    }

    pub fn to_double(&self) -> f64 {
        cell_to_double(&self.0)
    }

    pub fn to_string(&self) -> VmResult<String> {
        cell_to_std_string(&self.0)
    }

    /// 数组值的句柄（加计数）
    pub fn to_array(&self) -> Option<Array> {
        let tv = tv_to_cell(&self.0);
        tv.is_array().then(|| Array::from_ptr(tv.parr()))
    }

    // ========================================================================
    // 比较
    // ========================================================================

    /// `==`
    pub fn loose_equal(&self, other: &Variant) -> bool {
        tv_equal(&self.0, &other.0)
    }

    /// `===`
    pub fn same(&self, other: &Variant) -> bool {
        tv_same(&self.0, &other.0)
    }

    /// `<`
    pub fn less(&self, other: &Variant) -> VmResult<bool> {
        tv_less(&self.0, &other.0)
    }

    /// `>`
    pub fn greater(&self, other: &Variant) -> VmResult<bool> {
        tv_greater(&self.0, &other.0)
    }

    /// `<=>`
    pub fn compare(&self, other: &Variant) -> VmResult<std::cmp::Ordering> {
        tv_compare(&self.0, &other.0)
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::null()
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        Variant::from_tv(&self.0)
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        tv_dec_ref(self.0);
    }
}

/// 严格相等（`===`）
impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

// ============================================================================
// 构造
// ============================================================================

impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Variant(make_tv_bool(b))
    }
}

impl From<i64> for Variant {
    fn from(i: i64) -> Self {
        Variant(make_tv_int(i))
    }
}

impl From<i32> for Variant {
    fn from(i: i32) -> Self {
        Variant(make_tv_int(i as i64))
    }
}

impl From<f64> for Variant {
    fn from(d: f64) -> Self {
        Variant(make_tv_double(d))
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Variant(make_tv_string(StringData::make(s.as_bytes())))
    }
}

impl From<&[u8]> for Variant {
    fn from(s: &[u8]) -> Self {
        Variant(make_tv_string(StringData::make(s)))
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Variant::from(s.as_str())
    }
}

impl From<Array> for Variant {
    fn from(a: Array) -> Self {
        Variant(make_tv_array(a.detach()))
    }
}

impl From<&Variant> for Variant {
    fn from(v: &Variant) -> Self {
        v.clone()
    }
}

impl<T: Into<Variant>> From<Option<T>> for Variant {
    fn from(v: Option<T>) -> Self {
        v.map_or_else(Variant::null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::refcount::tv_refcount;

    #[test]
    fn test_clone_and_drop() {
        let a = Variant::from("text");
        let b = a.clone();
        assert_eq!(tv_refcount(a.as_tv()), Some(2));
        drop(b);
        assert_eq!(tv_refcount(a.as_tv()), Some(1));
        let tv = a.detach();
        assert_eq!(tv_refcount(&tv), Some(1));
        drop(Variant::attach(tv));
    }

    #[test]
    fn test_comparisons() {
        assert!(Variant::null().loose_equal(&Variant::from(false)));
        assert!(!Variant::from("abc").loose_equal(&Variant::from(0)));
        assert!(!Variant::from(1).same(&Variant::from("1")));
        assert!(Variant::from("a").same(&Variant::from("a")));
        assert_eq!(Variant::from(1).less(&Variant::from(2.5)), Ok(true));
        assert_eq!(Variant::from("10").greater(&Variant::from("9")), Ok(true));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Variant::from("42abc").to_int64(), 42);
        assert_eq!(Variant::from(2.0).to_string(), Ok("2".to_string()));
        assert!(Variant::from(None::<i64>).is_null());
        let arr = Variant::from(Array::from_values([1, 2]));
        assert_eq!(arr.to_array().map(|a| a.len()), Some(2));
        assert!(arr.to_boolean());
    }
}
