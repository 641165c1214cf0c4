//! 数组句柄
//!
//! `Array` 持有 `ArrayData` 的一个引用，修改时自动处理写时复制：
//! 底层数组被替换时释放对旧数组的引用

use std::cmp::Ordering;
use std::fmt;

use super::{ArrayData, Key, SortFlags, ToArrayKey};
use crate::vm::refcount::tv_dec_ref;
use crate::vm::tv_compare::array_equal;
use crate::vm::typed_value::{make_tv_array, TypedValue};
use crate::vm::variant::Variant;

/// 拥有一个引用的数组
pub struct Array {
    ad: *mut ArrayData,
}

impl Array {
    /// 空数组（共享永生的空数组，首次写入时复制）
    pub fn new() -> Self {
        Array { ad: ArrayData::static_empty() }
    }

    pub fn with_capacity(n: usize) -> Self {
        Array { ad: ArrayData::make_reserve(n) }
    }

    /// 由值序列构造列表
    pub fn from_values<V: Into<Variant>>(values: impl IntoIterator<Item = V>) -> Self {
        let mut arr = Array::new();
        for v in values {
            arr.append(v);
        }
        arr
    }

    /// 接管一个引用
    ///
    /// # Safety
    /// `ad` 有效，调用方把自己持有的引用转交出来
    pub unsafe fn attach(ad: *mut ArrayData) -> Self {
        Array { ad }
    }

    /// 新增一个引用
    pub fn from_ptr(ad: *mut ArrayData) -> Self {
        unsafe { (*ad).hdr().inc_ref() };
        Array { ad }
    }

    /// 交出引用
    pub fn detach(self) -> *mut ArrayData {
        let ad = self.ad;
        std::mem::forget(self);
        ad
    }

    #[inline]
    pub fn get_ad(&self) -> *mut ArrayData {
        self.ad
    }

    #[inline]
    pub fn data(&self) -> &ArrayData {
        unsafe { &*self.ad }
    }

    /// 作为值（不增加计数）
    #[inline]
    pub fn to_tv(&self) -> TypedValue {
        make_tv_array(self.ad)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data().size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    fn mutate(&mut self, f: impl FnOnce(*mut ArrayData) -> *mut ArrayData) {
        let old = self.ad;
        let new = f(old);
        if new != old {
            self.ad = new;
            tv_dec_ref(make_tv_array(old));
        }
    }

    // ========================================================================
    // 读
    // ========================================================================

    pub fn exists(&self, key: impl ToArrayKey) -> bool {
        key.to_array_key().is_some_and(|k| self.data().exists(k.key()))
    }

    /// 取值（复制一份）
    pub fn get(&self, key: impl ToArrayKey) -> Option<Variant> {
        let k = key.to_array_key()?;
        self.data().nv_get(k.key()).map(Variant::from_tv)
    }

    /// 按插入顺序遍历
    pub fn iter(&self) -> super::Elements<'_> {
        self.data().elements()
    }

    pub fn keys(&self) -> Vec<Variant> {
        self.iter().map(|(k, _)| Variant::from_tv(&k.to_tv())).collect()
    }

    pub fn values(&self) -> Vec<Variant> {
        self.iter().map(|(_, v)| Variant::from_tv(v)).collect()
    }

    // ========================================================================
    // 写
    // ========================================================================

    pub fn set(&mut self, key: impl ToArrayKey, v: impl Into<Variant>) {
        let Some(k) = key.to_array_key() else { return };
        let v = v.into();
        self.mutate(|ad| unsafe { ArrayData::set(ad, k.key(), v.as_tv(), false) });
    }

    /// 键不存在时插入
    pub fn add(&mut self, key: impl ToArrayKey, v: impl Into<Variant>) -> bool {
        let Some(k) = key.to_array_key() else { return false };
        let v = v.into();
        let mut inserted = false;
        self.mutate(|ad| unsafe {
            let (a, ok) = ArrayData::add(ad, k.key(), v.as_tv(), false);
            inserted = ok;
            a
        });
        inserted
    }

    pub fn remove(&mut self, key: impl ToArrayKey) {
        let Some(k) = key.to_array_key() else { return };
        self.mutate(|ad| unsafe { ArrayData::remove(ad, k.key(), false) });
    }

    pub fn append(&mut self, v: impl Into<Variant>) {
        let v = v.into();
        self.mutate(|ad| unsafe { ArrayData::append(ad, v.as_tv(), false) });
    }

    /// `$this + $other`
    pub fn plus(&mut self, other: &Array) {
        self.mutate(|ad| unsafe { ArrayData::plus(ad, other.ad, false) });
    }

    /// `array_merge($this, $other)`
    pub fn merge(&mut self, other: &Array) {
        self.mutate(|ad| unsafe { ArrayData::merge(ad, other.ad, false) });
    }

    /// `array_pop`
    pub fn pop(&mut self) -> Variant {
        let mut out = None;
        self.mutate(|ad| unsafe {
            let (a, v) = ArrayData::pop(ad, false);
            out = Some(Variant::attach(v));
            a
        });
        out.unwrap_or_default()
    }

    /// `array_shift`
    pub fn shift(&mut self) -> Variant {
        let mut out = None;
        self.mutate(|ad| unsafe {
            let (a, v) = ArrayData::dequeue(ad, false);
            out = Some(Variant::attach(v));
            a
        });
        out.unwrap_or_default()
    }

    /// `array_unshift`
    pub fn unshift(&mut self, v: impl Into<Variant>) {
        let v = v.into();
        self.mutate(|ad| unsafe { ArrayData::prepend(ad, v.as_tv(), false) });
    }

    pub fn renumber(&mut self) {
        self.mutate(|ad| unsafe { ArrayData::renumber(ad, false) });
    }

    // ========================================================================
    // 排序
    // ========================================================================

    pub fn sort(&mut self, flags: SortFlags, ascending: bool) {
        self.mutate(|ad| unsafe { ArrayData::sort(ad, flags, ascending, false) });
    }

    pub fn asort(&mut self, flags: SortFlags, ascending: bool) {
        self.mutate(|ad| unsafe { ArrayData::asort(ad, flags, ascending, false) });
    }

    pub fn ksort(&mut self, flags: SortFlags, ascending: bool) {
        self.mutate(|ad| unsafe { ArrayData::ksort(ad, flags, ascending, false) });
    }

    pub fn usort(&mut self, cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering) {
        self.mutate(|ad| unsafe { ArrayData::usort(ad, cmp, false) });
    }

    pub fn uasort(&mut self, cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering) {
        self.mutate(|ad| unsafe { ArrayData::uasort(ad, cmp, false) });
    }

    pub fn uksort(&mut self, cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering) {
        self.mutate(|ad| unsafe { ArrayData::uksort(ad, cmp, false) });
    }
}

impl Default for Array {
    fn default() -> Self {
        Array::new()
    }
}

impl Clone for Array {
    fn clone(&self) -> Self {
        Array::from_ptr(self.ad)
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        tv_dec_ref(make_tv_array(self.ad));
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        array_equal(self.data(), other.data())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v): (Key, &TypedValue)| (k, *v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::refcount::tv_refcount;

    #[test]
    fn test_cow_isolation() {
        let mut a = Array::new();
        a.set("x", 1);
        a.set(0, "zero");
        let mut b = a.clone();
        assert_eq!(a.get_ad(), b.get_ad());
        assert_eq!(tv_refcount(&a.to_tv()), Some(2));

        b.set("x", 2);
        assert_ne!(a.get_ad(), b.get_ad());
        assert_eq!(a.get("x").map(|v| v.to_int64()), Some(1));
        assert_eq!(b.get("x").map(|v| v.to_int64()), Some(2));
        assert_eq!(tv_refcount(&a.to_tv()), Some(1));
    }

    #[test]
    fn test_key_canonicalization() {
        let mut a = Array::new();
        a.set("123", "a");
        assert!(a.exists(123));
        a.set("0123", "b");
        assert!(a.exists("0123"));
        assert!(!a.exists(83));
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("0123"), Some(Variant::from("b")));
    }

    #[test]
    fn test_plus_merge_pop_shift() {
        let mut l = Array::new();
        l.set("a", 1);
        let mut r = Array::new();
        r.set("a", 2);
        r.set("b", 3);
        l.plus(&r);
        assert_eq!(l.get("a"), Some(Variant::from(1)));
        assert_eq!(l.get("b"), Some(Variant::from(3)));

        let mut v = Array::from_values([1, 2, 3]);
        v.merge(&Array::from_values([4]));
        assert_eq!(v.len(), 4);
        assert_eq!(v.pop(), Variant::from(4));
        assert_eq!(v.shift(), Variant::from(1));
        v.unshift(0);
        assert_eq!(v.values(), vec![Variant::from(0), Variant::from(2), Variant::from(3)]);
        assert!(Array::new().pop().is_null());
    }

    #[test]
    fn test_sort_family() {
        let mut a = Array::from_values([3, 1, 2]);
        a.sort(SortFlags::Regular, true);
        assert_eq!(a, Array::from_values([1, 2, 3]));
        a.usort(|x, y| y.num().cmp(&x.num()));
        assert_eq!(a, Array::from_values([3, 2, 1]));
    }
}
