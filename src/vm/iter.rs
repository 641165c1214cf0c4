//! 迭代协议
//!
//! `ArrayIter` 是遍历数组或对象迭代器的游标：
//! - 数组游标的位置就是元素区的下标，前进时跳过墓碑
//! - 本地游标不持有数组，调用方保证遍历期间数组存活且不被修改
//! - 持有游标拥有数组的一个引用，析构或 `reset` 时释放
//! - 对象游标委托给类的 `ObjectIterator` 能力
//!
//! `Iter` 是解释器循环使用的迭代器槽，构造时选定前进方式（`IterNextIndex`）。
//! `iterate_v` / `iterate_kv` 是批量遍历入口，回调返回 `true` 时停止。

use crate::vm::array::{Array, ArrayData};
use crate::vm::object::{ObjectData, ObjectIterator};
use crate::vm::refcount::tv_dec_ref;
use crate::vm::tv_mutate::{tv_set, tv_to_cell};
use crate::vm::typed_value::{make_tv_array, make_tv_int, make_tv_null, make_tv_object, TypedValue};
use crate::vm::variant::Variant;

// ============================================================================
// 游标
// ============================================================================

pub enum ArrayIter {
    Array {
        ad: *mut ArrayData,
        pos: usize,
        owning: bool,
    },
    /// 持有一个实现了 `ObjectIterator` 的对象
    Object { obj: Variant },
}

impl ArrayIter {
    /// 持有游标，定位到第一个活元素
    pub fn from_array(arr: &Array) -> Self {
        let ad = Array::from_ptr(arr.get_ad()).detach();
        ArrayIter::Array { ad, pos: unsafe { (*ad).iter_begin() }, owning: true }
    }

    /// 本地游标
    ///
    /// # Safety
    /// 游标存活期间 `ad` 必须有效且不被修改
    pub unsafe fn local(ad: *mut ArrayData) -> Self {
        ArrayIter::Array { ad, pos: (*ad).iter_begin(), owning: false }
    }

    /// 对象的游标
    ///
    /// 集合对象遍历其元素；`get_iterator` 的结果继续展开，直到得到数组或
    /// 实现了 `ObjectIterator` 的对象。不可遍历时返回 `None`
    pub fn from_object(obj: *mut ObjectData) -> Option<Self> {
        let mut cur = Variant::from_tv(&make_tv_object(obj));
        loop {
            let tv = *tv_to_cell(cur.as_tv());
            if tv.is_array() {
                return Some(ArrayIter::from_array(&Array::from_ptr(tv.parr())));
            }
            if !tv.is_object() {
                return None;
            }
            let o = unsafe { &*tv.pobj() };
            if o.is_collection() {
                let props = o.props() as *const ArrayData as *mut ArrayData;
                return Some(ArrayIter::from_array(&Array::from_ptr(props)));
            }
            if let Some(it) = o.class().iterator() {
                it.rewind(o);
                return Some(ArrayIter::Object { obj: cur });
            }
            let next = (o.class().get_iterator()?)(o);
            let same = tv_to_cell(next.as_tv()).is_object()
                && tv_to_cell(next.as_tv()).pobj() == tv.pobj();
            if same {
                return None;
            }
            cur = next;
        }
    }

    /// 终止状态，不持有任何东西
    fn exhausted() -> Self {
        ArrayIter::Array { ad: ArrayData::static_empty(), pos: 0, owning: false }
    }

    fn with_object<R>(obj: &Variant, f: impl FnOnce(&dyn ObjectIterator, &ObjectData) -> R) -> Option<R> {
        let tv = tv_to_cell(obj.as_tv());
        let o = unsafe { &*tv.pobj() };
        o.class().iterator().map(|it| f(it, o))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ArrayIter::Array { .. })
    }

    /// 当前数组（对象游标为 `None`）
    pub fn array(&self) -> Option<&ArrayData> {
        match self {
            ArrayIter::Array { ad, .. } => Some(unsafe { &**ad }),
            ArrayIter::Object { .. } => None,
        }
    }

    /// 已越过最后一个元素
    pub fn end(&self) -> bool {
        match self {
            ArrayIter::Array { ad, pos, .. } => *pos >= unsafe { (**ad).iter_end() },
            ArrayIter::Object { obj } => !Self::with_object(obj, |it, o| it.valid(o)).unwrap_or(false),
        }
    }

    /// 前进一个元素
    pub fn next(&mut self) {
        match self {
            ArrayIter::Array { ad, pos, .. } => *pos = unsafe { (**ad).iter_advance(*pos) },
            ArrayIter::Object { obj } => {
                Self::with_object(obj, |it, o| it.next(o));
            }
        }
    }

    pub fn key(&self) -> Variant {
        match self {
            ArrayIter::Array { ad, pos, .. } => Variant::from_tv(&unsafe { (**ad).key_at(*pos) }.to_tv()),
            ArrayIter::Object { obj } => Self::with_object(obj, |it, o| it.key(o)).unwrap_or_default(),
        }
    }

    /// 当前值（引用盒取盒内的值）
    pub fn value(&self) -> Variant {
        match self {
            ArrayIter::Array { ad, pos, .. } => Variant::from_tv(tv_to_cell(unsafe { (**ad).value_at(*pos) })),
            ArrayIter::Object { obj } => Self::with_object(obj, |it, o| it.current(o)).unwrap_or_default(),
        }
    }

    /// 释放持有的容器并进入终止状态
    pub fn reset(&mut self) {
        *self = ArrayIter::exhausted();
    }
}

impl Drop for ArrayIter {
    fn drop(&mut self) {
        if let ArrayIter::Array { ad, owning: true, .. } = *self {
            tv_dec_ref(make_tv_array(ad));
        }
    }
}

// ============================================================================
// 解释器的迭代器槽
// ============================================================================

/// `iter_next` 的前进方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterNextIndex {
    /// 数组没有墓碑，位置直接加一
    ArrayNoTombstones,
    Array,
    Object,
}

pub struct Iter {
    it: ArrayIter,
    next_helper: IterNextIndex,
}

impl Iter {
    pub fn new(it: ArrayIter) -> Self {
        let next_helper = match it.array() {
            Some(ad) if ad.no_tombstones() => IterNextIndex::ArrayNoTombstones,
            Some(_) => IterNextIndex::Array,
            None => IterNextIndex::Object,
        };
        Iter { it, next_helper }
    }

    #[inline]
    pub fn cursor(&self) -> &ArrayIter {
        &self.it
    }

    #[inline]
    pub fn next_helper(&self) -> IterNextIndex {
        self.next_helper
    }

    /// 前进；到达末尾时释放游标并返回 `false`
    fn advance(&mut self) -> bool {
        match (self.next_helper, &mut self.it) {
            (IterNextIndex::ArrayNoTombstones, ArrayIter::Array { ad, pos, .. }) => {
                // 持有引用期间数组不会被原地修改，不会出现墓碑
                *pos += 1;
                debug_assert!(*pos >= unsafe { (**ad).iter_end() } || unsafe { (**ad).valid_pos(*pos) });
            }
            (_, it) => it.next(),
        }
        if self.it.end() {
            self.it.reset();
            return false;
        }
        true
    }

    fn write_value(&self, val_out: &mut TypedValue) {
        let v = self.it.value();
        tv_set(v.as_tv(), val_out);
    }

    fn write_key(&self, key_out: &mut TypedValue) {
        let k = self.it.key();
        tv_set(k.as_tv(), key_out);
    }
}

fn start(it: ArrayIter, val_out: &mut TypedValue, key_out: Option<&mut TypedValue>) -> Option<Iter> {
    if it.end() {
        return None;
    }
    let iter = Iter::new(it);
    iter.write_value(val_out);
    if let Some(key_out) = key_out {
        iter.write_key(key_out);
    }
    Some(iter)
}

/// 开始遍历数组，接管 `arr` 的引用；空数组返回 `None` 且不写出
pub fn new_iter_array(arr: Array, val_out: &mut TypedValue) -> Option<Iter> {
    start(ArrayIter::from_array(&arr), val_out, None)
}

pub fn new_iter_array_key(arr: Array, val_out: &mut TypedValue, key_out: &mut TypedValue) -> Option<Iter> {
    start(ArrayIter::from_array(&arr), val_out, Some(key_out))
}

/// 开始遍历对象；不可遍历或没有元素时返回 `None`
pub fn new_iter_object(
    obj: *mut ObjectData,
    val_out: &mut TypedValue,
    key_out: Option<&mut TypedValue>,
) -> Option<Iter> {
    start(ArrayIter::from_object(obj)?, val_out, key_out)
}

/// 前进并写出值；结束时返回 `false`
pub fn iter_next(iter: &mut Iter, val_out: &mut TypedValue) -> bool {
    if !iter.advance() {
        return false;
    }
    iter.write_value(val_out);
    true
}

pub fn iter_next_key(iter: &mut Iter, val_out: &mut TypedValue, key_out: &mut TypedValue) -> bool {
    if !iter.advance() {
        return false;
    }
    iter.write_value(val_out);
    iter.write_key(key_out);
    true
}

// ============================================================================
// 批量遍历
// ============================================================================

type KvFn<'a> = dyn FnMut(&TypedValue, &TypedValue) -> bool + 'a;

/// 遍历数组；遍历期间持有一个引用，回调中的写入会触发复制
fn iterate_array(arr: &Array, with_keys: bool, f: &mut KvFn<'_>) {
    let ad = arr.data();
    let null = make_tv_null();

    if ad.no_tombstones() && ad.is_vector_data() {
        for pos in 0..ad.used() {
            let k = make_tv_int(pos as i64);
            if f(&k, tv_to_cell(ad.value_at(pos))) {
                return;
            }
        }
        return;
    }

    if ad.no_tombstones() && !ad.is_keyset() {
        for pos in 0..ad.used() {
            let k = if with_keys { ad.key_at(pos).to_tv() } else { null };
            if f(&k, tv_to_cell(ad.value_at(pos))) {
                return;
            }
        }
        return;
    }

    if ad.is_keyset() {
        for (key, _) in ad.elements() {
            let k = key.to_tv();
            if f(&k, &k) {
                return;
            }
        }
        return;
    }

    let mut it = unsafe { ArrayIter::local(arr.get_ad()) };
    while !it.end() {
        let v = it.value();
        let k = if with_keys { it.key() } else { Variant::null() };
        if f(k.as_tv(), v.as_tv()) {
            return;
        }
        it.next();
    }
}

fn iterate(tv: &TypedValue, with_keys: bool, f: &mut KvFn<'_>) -> bool {
    let tv = tv_to_cell(tv);
    if tv.is_array() {
        iterate_array(&Array::from_ptr(tv.parr()), with_keys, f);
        return true;
    }
    if !tv.is_object() {
        return false;
    }

    // 遍历期间保持对象存活
    let _guard = Variant::from_tv(tv);
    let obj = unsafe { &*tv.pobj() };
    if obj.is_collection() {
        let props = obj.props() as *const ArrayData as *mut ArrayData;
        iterate_array(&Array::from_ptr(props), with_keys, f);
        return true;
    }

    let Some(mut it) = ArrayIter::from_object(tv.pobj()) else {
        return false;
    };
    while !it.end() {
        let v = it.value();
        let k = if with_keys { it.key() } else { Variant::null() };
        if f(k.as_tv(), v.as_tv()) {
            break;
        }
        it.next();
    }
    true
}

/// 遍历值；返回值是否可遍历
pub fn iterate_v(tv: &TypedValue, mut f: impl FnMut(&TypedValue) -> bool) -> bool {
    iterate(tv, false, &mut |_, v| f(v))
}

/// 遍历键值对；返回值是否可遍历
pub fn iterate_kv(tv: &TypedValue, mut f: impl FnMut(&TypedValue, &TypedValue) -> bool) -> bool {
    iterate(tv, true, &mut |k, v| f(k, v))
}
