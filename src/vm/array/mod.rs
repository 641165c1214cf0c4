//! 写时复制的有序 hash 数组
//!
//! 元素按插入顺序存放在连续的 `Elm` 数组中，后面紧跟开放寻址的
//! hash 索引（槽位存元素下标，或空 / 墓碑哨兵）：
//!
//! ```text
//! data --> | elm 0 | elm 1 | ... | elm cap-1 | hash[0] ... hash[mask] |
//! ```
//!
//! - 删除只把元素标为墓碑，`used` 不回退，迭代时跳过
//! - 装载到 `1 - 1/LOAD_SCALE` 时，活元素多则翻倍，少则原地压缩
//! - 计数大于 1 的数组在修改前必须先复制（见 `prepare_for_write`）
//!
//! 带 `unsafe` 的修改函数都返回修改后的数组：与传入的不同时，新数组
//! 计数为 1，调用方负责释放对旧数组的引用

mod handle;
mod key;
pub mod sort;

pub use handle::Array;
pub use key::{tv_to_key, Key, OwnedKey, ToArrayKey};
pub use sort::{SortFlags, SortFlavor};

use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use crate::config::{LOAD_SCALE, MIN_TABLE_SIZE};
use crate::i18n::messages::WARN_NEXT_ELEMENT_OCCUPIED;
use crate::mm::header::NO_SIZE_INDEX;
use crate::mm::{try_with_heap, with_heap, HeaderKind, HeapObject, RefCount, STATIC_VALUE, UNCOUNTED_VALUE};
use crate::runtime::diagnostics::raise_warning;
use crate::vm::datatype::DataType;
use crate::vm::provenance;
use crate::vm::refcount::{tv_dec_ref, tv_inc_ref};
use crate::vm::string_data::StringData;
use crate::vm::tv_mutate::{tv_set, tv_to_cell};
use crate::vm::typed_value::{make_tv_array, make_tv_null, make_tv_string, TypedValue};

/// hash 槽：空
pub const ELM_IND_EMPTY: i32 = -1;
/// hash 槽：墓碑
pub const ELM_IND_TOMBSTONE: i32 = -2;

/// 辅助字中标记字符串键的位
const STR_KEY_BIT: u32 = 0x8000_0000;

// 头部 aux8 中的标志位
/// 数组带有来源标签
pub const FLAG_PROVENANCE: u8 = 0x1;
/// 集合式数组：值即键
pub const FLAG_KEYSET: u8 = 0x2;

// ============================================================================
// 元素
// ============================================================================

/// 数组元素
///
/// 键是整数或字符串指针，由 `data` 的辅助字区分：0 为整数键，
/// 否则为 `hash | STR_KEY_BIT`
#[repr(C)]
pub struct Elm {
    key: u64,
    pub data: TypedValue,
}

impl Elm {
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.data.is_tombstone()
    }

    #[inline]
    pub fn has_str_key(&self) -> bool {
        self.data.aux() != 0
    }

    #[inline]
    pub fn has_int_key(&self) -> bool {
        self.data.aux() == 0
    }

    #[inline]
    fn hash(&self) -> u32 {
        match self.data.aux() {
            0 => hash_int(self.key as i64),
            aux => aux & !STR_KEY_BIT,
        }
    }

    #[inline]
    pub fn key(&self) -> Key {
        if self.has_int_key() {
            Key::Int(self.key as i64)
        } else {
            Key::Str(self.key as *mut StringData)
        }
    }

    #[inline]
    fn set_int_key(&mut self, k: i64) {
        self.key = k as u64;
        self.data.set_aux(0);
    }

    #[inline]
    fn set_str_key(&mut self, s: *mut StringData, h: u32) {
        self.key = s as u64;
        self.data.set_aux(h | STR_KEY_BIT);
    }

    #[inline]
    fn matches(&self, key: Key, h: u32) -> bool {
        match key {
            Key::Int(k) => self.has_int_key() && self.key == k as u64,
            Key::Str(s) => {
                self.has_str_key()
                    && (self.data.aux() & !STR_KEY_BIT) == h
                    && (self.key == s as u64
                        || unsafe { (*(self.key as *mut StringData)).same(&*s) })
            }
        }
    }
}

#[inline]
fn hash_int(k: i64) -> u32 {
    let h = (k as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    ((h >> 32) as u32) & !STR_KEY_BIT
}

#[inline]
fn hash_key(key: Key) -> u32 {
    match key {
        Key::Int(k) => hash_int(k),
        Key::Str(s) => unsafe { (*s).hash() },
    }
}

/// 表大小对应的元素容量
#[inline]
pub fn capacity_for(table_size: usize) -> usize {
    table_size - table_size / LOAD_SCALE
}

/// 容纳 `n` 个元素所需的最小表大小
pub fn table_size_for(n: usize) -> usize {
    let mut ts = MIN_TABLE_SIZE;
    while capacity_for(ts) < n {
        ts <<= 1;
    }
    ts
}

#[inline]
fn storage_bytes(table_size: usize) -> usize {
    capacity_for(table_size) * size_of::<Elm>() + table_size * size_of::<i32>()
}

#[inline]
fn immortal_layout(bytes: usize) -> Layout {
    match Layout::from_size_align(bytes, 16) {
        Ok(layout) => layout,
        Err(_) => panic!("array storage of {} bytes overflows", bytes),
    }
}

// ============================================================================
// 写时复制
// ============================================================================

/// 可以原地修改
#[derive(Debug)]
pub struct MutateInPlace(pub *mut ArrayData);

/// 已复制出一个独立的新数组（计数为 1）
#[derive(Debug)]
pub struct Cloned(pub *mut ArrayData);

/// 修改前的所有权检查
///
/// 只有唯一持有者且未要求复制时才能原地修改
///
/// # Safety
/// `ad` 必须指向有效数组
pub unsafe fn prepare_for_write(ad: *mut ArrayData, copy: bool) -> Result<MutateInPlace, Cloned> {
    if copy || !(*ad).hdr.has_exactly_one_ref() {
        Err(Cloned((*ad).copy()))
    } else {
        Ok(MutateInPlace(ad))
    }
}

#[inline]
unsafe fn escalate(ad: *mut ArrayData, copy: bool) -> *mut ArrayData {
    match prepare_for_write(ad, copy) {
        Ok(MutateInPlace(a)) | Err(Cloned(a)) => a,
    }
}

// ============================================================================
// 数组
// ============================================================================

/// hash 数组
#[repr(C)]
pub struct ArrayData {
    hdr: HeapObject,
    size: u32,
    used: u32,
    table_mask: u32,
    next_ki: i64,
    data: *mut Elm,
    hash: *mut i32,
}

static STATIC_EMPTY: OnceLock<usize> = OnceLock::new();

impl ArrayData {
    // ========================================================================
    // 创建与释放
    // ========================================================================

    /// 空数组，可以容纳 `n` 个元素而不扩容
    pub fn make_reserve(n: usize) -> *mut ArrayData {
        let hdr = with_heap(|mm| mm.obj_malloc(size_of::<ArrayData>(), HeaderKind::Array));
        let ad = hdr.as_ptr() as *mut ArrayData;
        unsafe { Self::init_fields(ad, table_size_for(n)) };
        ad
    }

    pub fn make_empty() -> *mut ArrayData {
        Self::make_reserve(0)
    }

    /// 由值序列构造列表 `[0 => v0, 1 => v1, ...]`，值被复制（加计数）
    pub fn make_vec(values: &[TypedValue]) -> *mut ArrayData {
        let ad = Self::make_reserve(values.len());
        unsafe {
            for v in values {
                let key = Key::Int((*ad).next_ki);
                (*ad).insert_new(key, v, true);
            }
        }
        ad
    }

    /// 集合式数组：每个元素的值等于键
    pub fn make_keyset(keys: &[Key]) -> *mut ArrayData {
        let ad = Self::make_reserve(keys.len());
        unsafe {
            (*ad).hdr.set_aux8(FLAG_KEYSET);
            for &key in keys {
                if (*ad).find(key).is_none() {
                    (*ad).insert_new(key, &key.to_tv(), true);
                }
            }
        }
        ad
    }

    /// 永生的空数组
    pub fn static_empty() -> *mut ArrayData {
        *STATIC_EMPTY.get_or_init(|| unsafe { Self::alloc_immortal(MIN_TABLE_SIZE, STATIC_VALUE) } as usize)
            as *mut ArrayData
    }

    unsafe fn init_fields(ad: *mut ArrayData, table_size: usize) {
        ptr::addr_of_mut!((*ad).size).write(0);
        ptr::addr_of_mut!((*ad).used).write(0);
        ptr::addr_of_mut!((*ad).table_mask).write((table_size - 1) as u32);
        ptr::addr_of_mut!((*ad).next_ki).write(0);
        let data = (*ad).alloc_storage(table_size);
        ptr::addr_of_mut!((*ad).data).write(data);
        ptr::addr_of_mut!((*ad).hash).write(data.add(capacity_for(table_size)) as *mut i32);
        (*ad).clear_hash();
    }

    unsafe fn alloc_immortal(table_size: usize, sentinel: RefCount) -> *mut ArrayData {
        let layout = Layout::new::<ArrayData>();
        let ad = match NonNull::new(alloc::alloc(layout) as *mut ArrayData) {
            Some(p) => p.as_ptr(),
            None => alloc::handle_alloc_error(layout),
        };
        (*ad).hdr.init(HeaderKind::Array, NO_SIZE_INDEX);
        (*ad).hdr.set_immortal(sentinel);
        Self::init_fields(ad, table_size);
        ad
    }

    /// 请求数组的存储在请求堆上，永生数组的存储来自全局分配器
    unsafe fn alloc_storage(&self, table_size: usize) -> *mut Elm {
        let bytes = storage_bytes(table_size);
        if self.hdr.is_refcounted() {
            with_heap(|mm| mm.req_malloc(bytes)).as_ptr() as *mut Elm
        } else {
            let layout = immortal_layout(bytes);
            match NonNull::new(alloc::alloc(layout)) {
                Some(p) => p.as_ptr() as *mut Elm,
                None => alloc::handle_alloc_error(layout),
            }
        }
    }

    unsafe fn free_storage(&self, data: *mut Elm, table_size: usize) {
        if self.hdr.is_refcounted() {
            if let Some(p) = NonNull::new(data as *mut u8) {
                try_with_heap(|mm| mm.req_free(p));
            }
        } else {
            alloc::dealloc(data as *mut u8, immortal_layout(storage_bytes(table_size)));
        }
    }

    /// 计数归零后释放：先释放全部元素，再归还存储与头部
    ///
    /// # Safety
    /// 计数已经归零
    pub unsafe fn release(ad: *mut ArrayData) {
        debug_assert!((*ad).hdr.is_refcounted());
        // 析构期间的重入访问看到的是一个空数组
        let (data, used, ts) = ((*ad).data, (*ad).used as usize, (*ad).table_size());
        (*ad).size = 0;
        (*ad).used = 0;
        for i in 0..used {
            let e = &*data.add(i);
            if e.is_tombstone() {
                continue;
            }
            let (key, value) = (e.key(), e.data);
            if let Key::Str(s) = key {
                tv_dec_ref(make_tv_string(s));
            }
            tv_dec_ref(value);
        }
        if (*ad).has_flag(FLAG_PROVENANCE) {
            provenance::clear_tag(&*ad);
        }
        (*ad).free_storage(data, ts);
        let hdr = NonNull::new_unchecked(ad as *mut HeapObject);
        try_with_heap(|mm| mm.obj_free(hdr));
    }

    /// 逐元素复制（加计数），得到计数为 1 的请求数组
    pub fn copy(&self) -> *mut ArrayData {
        let ts = self.table_size();
        let hdr = with_heap(|mm| mm.obj_malloc(size_of::<ArrayData>(), HeaderKind::Array));
        let ad = hdr.as_ptr() as *mut ArrayData;
        unsafe {
            ptr::addr_of_mut!((*ad).size).write(self.size);
            ptr::addr_of_mut!((*ad).used).write(self.used);
            ptr::addr_of_mut!((*ad).table_mask).write(self.table_mask);
            ptr::addr_of_mut!((*ad).next_ki).write(self.next_ki);
            let data = (*ad).alloc_storage(ts);
            ptr::copy_nonoverlapping(self.data as *const u8, data as *mut u8, storage_bytes(ts));
            ptr::addr_of_mut!((*ad).data).write(data);
            ptr::addr_of_mut!((*ad).hash).write(data.add(capacity_for(ts)) as *mut i32);
            (*ad).hdr.set_aux8(self.hdr.aux8() & FLAG_KEYSET);

            for e in (*ad).elms() {
                if e.is_tombstone() {
                    continue;
                }
                if let Key::Str(s) = e.key() {
                    (*s).hdr().inc_ref();
                }
                tv_inc_ref(&e.data);
            }
        }
        if self.has_flag(FLAG_PROVENANCE) {
            provenance::copy_tag(self, unsafe { &*ad });
        }
        ad
    }

    /// 是否所有值都可以放进永生数组（不含对象与资源）
    pub fn persistable(&self) -> bool {
        self.elements().all(|(_, v)| {
            let v = tv_to_cell(v);
            match v.ty {
                DataType::Object | DataType::Resource => false,
                DataType::PersistentArray | DataType::Array => unsafe { (*v.parr()).persistable() },
                _ => true,
            }
        })
    }

    /// 深复制为永生的静态数组，字符串被驻留
    pub fn make_static(src: &ArrayData) -> Option<*mut ArrayData> {
        Self::make_immortal(src, STATIC_VALUE)
    }

    /// 深复制为跨请求的持久数组，需要 `release_uncounted` 释放
    pub fn make_uncounted(src: &ArrayData) -> Option<*mut ArrayData> {
        Self::make_immortal(src, UNCOUNTED_VALUE)
    }

    fn make_immortal(src: &ArrayData, sentinel: RefCount) -> Option<*mut ArrayData> {
        if !src.persistable() {
            return None;
        }
        // 持久字符串各自独占，只有静态字符串可以共享
        let immortal_str = |s: *mut StringData| unsafe {
            if (*s).hdr().is_static() {
                s
            } else if sentinel == STATIC_VALUE {
                StringData::make_static((*s).as_bytes())
            } else {
                StringData::make_uncounted((*s).as_bytes())
            }
        };
        unsafe {
            let ad = Self::alloc_immortal(table_size_for(src.size()), sentinel);
            for (key, v) in src.elements() {
                let key = match key {
                    Key::Int(i) => Key::Int(i),
                    Key::Str(s) => Key::Str(immortal_str(s)),
                };
                let v = tv_to_cell(v);
                let value = match v.ty {
                    DataType::PersistentString | DataType::String => make_tv_string(immortal_str(v.pstr())),
                    DataType::PersistentArray | DataType::Array => {
                        make_tv_array(Self::make_immortal(&*v.parr(), sentinel)?)
                    }
                    _ => *v,
                };
                (*ad).insert_new(key, &value, false);
            }
            (*ad).hdr.set_aux8(src.hdr.aux8() & FLAG_KEYSET);
            (*ad).next_ki = src.next_ki;
            Some(ad)
        }
    }

    /// 释放持久数组及其中的持久字符串与子数组
    ///
    /// # Safety
    /// `ad` 来自 `make_uncounted`，且没有其他持有者
    pub unsafe fn release_uncounted(ad: *mut ArrayData) {
        debug_assert!((*ad).hdr.is_uncounted());
        for (key, v) in (*ad).elements() {
            if let Key::Str(s) = key {
                if (*s).hdr().is_uncounted() {
                    StringData::release_uncounted(s);
                }
            }
            match v.ty {
                DataType::PersistentString if (*v.pstr()).hdr().is_uncounted() => {
                    StringData::release_uncounted(v.pstr())
                }
                DataType::PersistentArray if (*v.parr()).hdr.is_uncounted() => {
                    Self::release_uncounted(v.parr())
                }
                _ => {}
            }
        }
        (*ad).free_storage((*ad).data, (*ad).table_size());
        alloc::dealloc(ad as *mut u8, Layout::new::<ArrayData>());
    }

    // ========================================================================
    // 属性
    // ========================================================================

    #[inline]
    pub fn hdr(&self) -> &HeapObject {
        &self.hdr
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 已用槽位（含墓碑）
    #[inline]
    pub fn used(&self) -> usize {
        self.used as usize
    }

    #[inline]
    pub fn table_size(&self) -> usize {
        self.table_mask as usize + 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        capacity_for(self.table_size())
    }

    #[inline]
    pub fn next_ki(&self) -> i64 {
        self.next_ki
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.hdr.aux8() & flag != 0
    }

    #[inline]
    pub(crate) fn set_flag(&self, flag: u8, on: bool) {
        let flags = self.hdr.aux8();
        self.hdr.set_aux8(if on { flags | flag } else { flags & !flag });
    }

    #[inline]
    pub fn is_keyset(&self) -> bool {
        self.has_flag(FLAG_KEYSET)
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.hdr.is_static()
    }

    /// 没有墓碑
    #[inline]
    pub fn no_tombstones(&self) -> bool {
        self.size == self.used
    }

    /// 键恰好是 0..n 且按顺序排列
    pub fn is_vector_data(&self) -> bool {
        self.elements()
            .enumerate()
            .all(|(i, (key, _))| key == Key::Int(i as i64))
    }

    #[inline]
    fn elms(&self) -> &[Elm] {
        unsafe { std::slice::from_raw_parts(self.data, self.used()) }
    }

    #[inline]
    pub(crate) fn elms_mut(&mut self) -> &mut [Elm] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.used()) }
    }

    #[inline]
    fn slots(&self) -> &[i32] {
        unsafe { std::slice::from_raw_parts(self.hash, self.table_size()) }
    }

    #[inline]
    fn set_slot(&mut self, probe: usize, ei: i32) {
        debug_assert!(probe < self.table_size());
        unsafe { *self.hash.add(probe) = ei };
    }

    #[inline]
    pub(crate) fn elm(&self, pos: usize) -> &Elm {
        debug_assert!(pos < self.used());
        unsafe { &*self.data.add(pos) }
    }

    #[inline]
    fn elm_mut(&mut self, pos: usize) -> &mut Elm {
        debug_assert!(pos < self.used());
        unsafe { &mut *self.data.add(pos) }
    }

    // ========================================================================
    // 查找
    // ========================================================================

    /// 探测序列：`probe = (probe + i) & mask`，返回命中键的 hash 槽下标
    fn find_probe(&self, key: Key, h: u32) -> Option<usize> {
        let mask = self.table_mask as usize;
        let slots = self.slots();
        let mut probe = h as usize & mask;
        for i in 1.. {
            let ei = slots[probe];
            if ei == ELM_IND_EMPTY {
                return None;
            }
            if ei >= 0 && self.elm(ei as usize).matches(key, h) {
                return Some(probe);
            }
            probe = (probe + i) & mask;
        }
        None
    }

    /// 插入用的槽：命中键的槽，否则探测途中第一个墓碑，否则空槽
    fn find_for_insert(&self, key: Key, h: u32) -> usize {
        let mask = self.table_mask as usize;
        let slots = self.slots();
        let mut probe = h as usize & mask;
        let mut tombstone = None;
        for i in 1.. {
            let ei = slots[probe];
            if ei >= 0 {
                if self.elm(ei as usize).matches(key, h) {
                    return probe;
                }
            } else if ei == ELM_IND_EMPTY {
                return tombstone.unwrap_or(probe);
            } else if tombstone.is_none() {
                tombstone = Some(probe);
            }
            probe = (probe + i) & mask;
        }
        probe
    }

    /// 已知键不存在时的插入槽
    fn find_for_new_insert(&self, h: u32) -> usize {
        let mask = self.table_mask as usize;
        let slots = self.slots();
        let mut probe = h as usize & mask;
        for i in 1.. {
            if slots[probe] < 0 {
                return probe;
            }
            probe = (probe + i) & mask;
        }
        probe
    }

    /// 元素位置
    pub fn find(&self, key: Key) -> Option<usize> {
        let h = hash_key(key);
        self.find_probe(key, h).map(|probe| self.slots()[probe] as usize)
    }

    pub fn exists(&self, key: Key) -> bool {
        self.find(key).is_some()
    }

    /// 按键取值，缺失时为 `None`
    pub fn nv_get(&self, key: Key) -> Option<&TypedValue> {
        self.find(key).map(|pos| &self.elm(pos).data)
    }

    pub fn nv_get_int(&self, k: i64) -> Option<&TypedValue> {
        self.nv_get(Key::Int(k))
    }

    /// 按字节串键取值（会做整数键规范化）
    pub fn nv_get_str(&self, k: &[u8]) -> Option<&TypedValue> {
        match crate::vm::numeric::strictly_integer(k) {
            Some(i) => self.nv_get(Key::Int(i)),
            None => {
                let h = crate::vm::string_data::hash_bytes(k);
                let mask = self.table_mask as usize;
                let slots = self.slots();
                let mut probe = h as usize & mask;
                for i in 1.. {
                    let ei = slots[probe];
                    if ei == ELM_IND_EMPTY {
                        return None;
                    }
                    if ei >= 0 {
                        let e = self.elm(ei as usize);
                        if let Some(bytes) = e.key().str_bytes() {
                            if bytes == k {
                                return Some(&e.data);
                            }
                        }
                    }
                    probe = (probe + i) & mask;
                }
                None
            }
        }
    }

    // ========================================================================
    // 位置
    // ========================================================================

    /// 第一个活元素的位置；空数组返回 `iter_end`
    pub fn iter_begin(&self) -> usize {
        self.elms().iter().position(|e| !e.is_tombstone()).unwrap_or(self.used())
    }

    /// 末尾哨兵，永远不会被解引用
    #[inline]
    pub fn iter_end(&self) -> usize {
        self.used()
    }

    /// 下一个活元素的位置
    pub fn iter_advance(&self, pos: usize) -> usize {
        let used = self.used();
        let mut p = pos + 1;
        while p < used && self.elm(p).is_tombstone() {
            p += 1;
        }
        p.min(used)
    }

    /// 最后一个活元素；没有时返回 `iter_end`
    pub fn iter_last(&self) -> usize {
        self.elms().iter().rposition(|e| !e.is_tombstone()).unwrap_or(self.used())
    }

    /// 上一个活元素；没有时返回 `iter_end`
    pub fn iter_rewind(&self, pos: usize) -> usize {
        let end = pos.min(self.used());
        self.elms()[..end].iter().rposition(|e| !e.is_tombstone()).unwrap_or(self.used())
    }

    #[inline]
    pub fn valid_pos(&self, pos: usize) -> bool {
        pos < self.used() && !self.elm(pos).is_tombstone()
    }

    /// 位置上的键
    pub fn key_at(&self, pos: usize) -> Key {
        self.elm(pos).key()
    }

    /// 位置上的值
    pub fn value_at(&self, pos: usize) -> &TypedValue {
        &self.elm(pos).data
    }

    /// 按插入顺序遍历活元素
    pub fn elements(&self) -> Elements<'_> {
        Elements { ad: self, pos: 0 }
    }

    // ========================================================================
    // 原地修改（要求唯一持有）
    // ========================================================================

    /// 新元素；键必须不存在。`inc` 为真时复制值（加计数）
    unsafe fn insert_new(&mut self, key: Key, v: &TypedValue, inc: bool) {
        let h = hash_key(key);
        if self.used() == self.capacity() {
            self.resize();
        }
        let probe = self.find_for_new_insert(h);
        self.insert_at(probe, key, h, v, inc);
    }

    unsafe fn insert_at(&mut self, probe: usize, key: Key, h: u32, v: &TypedValue, inc: bool) {
        let pos = self.used();
        self.set_slot(probe, pos as i32);
        self.used += 1;
        self.size += 1;
        let e = self.elm_mut(pos);
        e.data = TypedValue::invalid();
        match key {
            Key::Int(k) => e.set_int_key(k),
            Key::Str(s) => {
                if inc {
                    (*s).hdr().inc_ref();
                }
                e.set_str_key(s, h);
            }
        }
        e.data.set_value(v.data(), v.ty);
        if inc {
            tv_inc_ref(v);
        }
        if let Key::Int(k) = key {
            if self.next_ki >= 0 && k >= self.next_ki {
                self.next_ki = k.checked_add(1).unwrap_or(-1);
            }
        }
    }

    /// 设置键的值：已存在则赋值（跟随引用盒），否则插入
    unsafe fn update(&mut self, key: Key, v: &TypedValue) {
        let v = *tv_to_cell(v);
        let h = hash_key(key);
        let probe = self.find_for_insert(key, h);
        let ei = self.slots()[probe];
        if ei >= 0 {
            let slot = &mut self.elm_mut(ei as usize).data as *mut TypedValue;
            tv_set(&v, &mut *slot);
            return;
        }
        if self.used() == self.capacity() {
            self.resize();
            let probe = self.find_for_new_insert(h);
            self.insert_at(probe, key, h, &v, true);
        } else {
            self.insert_at(probe, key, h, &v, true);
        }
    }

    /// 删除 hash 槽 `probe` 指向的元素，返回被移出的键与值（所有权交给调用方）
    fn erase(&mut self, probe: usize) -> (Key, TypedValue) {
        let pos = self.slots()[probe] as usize;
        self.set_slot(probe, ELM_IND_TOMBSTONE);
        let e = self.elm_mut(pos);
        let key = e.key();
        let mut value = e.data;
        value.set_aux(0);
        e.data.set_value(0, DataType::Invalid);
        self.size -= 1;
        (key, value)
    }

    /// 释放被移出的键与值；必须是修改的最后一步
    fn release_removed(key: Key, value: TypedValue) {
        if let Key::Str(s) = key {
            tv_dec_ref(make_tv_string(s));
        }
        tv_dec_ref(value);
    }

    /// 为新元素腾出空间：活元素超过容量一半则翻倍，否则压缩
    fn resize(&mut self) {
        if self.size() > self.capacity() / 2 {
            self.grow();
        } else {
            self.compact(false);
        }
    }

    /// hash 表与元素槽翻倍；元素原样保留（含墓碑），重建 hash
    fn grow(&mut self) {
        let old_ts = self.table_size();
        let new_ts = old_ts * 2;
        log::debug!("array grow: {} -> {} (size {}, used {})", old_ts, new_ts, self.size, self.used);
        unsafe {
            let old = self.data;
            let data = self.alloc_storage(new_ts);
            ptr::copy_nonoverlapping(old, data, self.used());
            self.data = data;
            self.hash = data.add(capacity_for(new_ts)) as *mut i32;
            self.table_mask = (new_ts - 1) as u32;
            self.free_storage(old, old_ts);
        }
        self.rebuild_hash();
    }

    /// 原地去掉墓碑并保持顺序；`renumber` 时整数键重新从 0 编号
    pub(crate) fn compact(&mut self, renumber: bool) {
        let used = self.used();
        let mut j = 0;
        for i in 0..used {
            if self.elm(i).is_tombstone() {
                continue;
            }
            if i != j {
                unsafe { ptr::copy_nonoverlapping(self.data.add(i), self.data.add(j), 1) };
            }
            j += 1;
        }
        self.used = j as u32;
        self.size = j as u32;
        if renumber {
            let mut next = 0i64;
            for e in self.elms_mut() {
                if e.has_int_key() {
                    e.set_int_key(next);
                    next += 1;
                }
            }
            self.next_ki = next;
        }
        self.rebuild_hash();
    }

    fn clear_hash(&mut self) {
        unsafe { ptr::write_bytes(self.hash, 0xff, self.table_size()) };
    }

    pub(crate) fn rebuild_hash(&mut self) {
        self.clear_hash();
        for pos in 0..self.used() {
            let e = self.elm(pos);
            if e.is_tombstone() {
                continue;
            }
            let probe = self.find_for_new_insert(e.hash());
            self.set_slot(probe, pos as i32);
        }
    }

    // ========================================================================
    // 写时复制的修改入口
    // ========================================================================

    /// `ad[key] = v`
    ///
    /// # Safety
    /// `ad` 有效且调用方持有一个引用
    pub unsafe fn set(ad: *mut ArrayData, key: Key, v: &TypedValue, copy: bool) -> *mut ArrayData {
        let a = escalate(ad, copy);
        (*a).update(key, v);
        a
    }

    /// 键不存在时插入；返回是否插入
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn add(ad: *mut ArrayData, key: Key, v: &TypedValue, copy: bool) -> (*mut ArrayData, bool) {
        if (*ad).exists(key) {
            return (ad, false);
        }
        let a = escalate(ad, copy);
        (*a).insert_new(key, tv_to_cell(v), true);
        (a, true)
    }

    /// 删除键；不存在时什么都不做
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn remove(ad: *mut ArrayData, key: Key, copy: bool) -> *mut ArrayData {
        if !(*ad).exists(key) {
            return ad;
        }
        let a = escalate(ad, copy);
        let h = hash_key(key);
        if let Some(probe) = (*a).find_probe(key, h) {
            let (k, v) = (*a).erase(probe);
            if (*a).size < (*a).used / 2 {
                (*a).compact(false);
            }
            Self::release_removed(k, v);
        }
        a
    }

    /// `ad[] = v`，键为 `next_ki`
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn append(ad: *mut ArrayData, v: &TypedValue, copy: bool) -> *mut ArrayData {
        if (*ad).next_ki < 0 {
            raise_warning(WARN_NEXT_ELEMENT_OCCUPIED, &[]);
            return ad;
        }
        let a = escalate(ad, copy);
        let key = Key::Int((*a).next_ki);
        (*a).insert_new(key, tv_to_cell(v), true);
        a
    }

    /// 集合式数组加入一个键
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn keyset_add(ad: *mut ArrayData, key: Key, copy: bool) -> *mut ArrayData {
        if (*ad).exists(key) {
            return ad;
        }
        let a = escalate(ad, copy);
        (*a).set_flag(FLAG_KEYSET, true);
        (*a).insert_new(key, &key.to_tv(), true);
        a
    }

    /// `ad + other`：左侧的键优先，右侧独有的键追加
    ///
    /// # Safety
    /// 两个数组都有效
    pub unsafe fn plus(ad: *mut ArrayData, other: *const ArrayData, copy: bool) -> *mut ArrayData {
        let a = escalate(ad, copy);
        if ptr::eq(a, other) {
            return a;
        }
        for (key, v) in (*other).elements() {
            if !(*a).exists(key) {
                (*a).insert_new(key, v, true);
            }
        }
        a
    }

    /// `array_merge`：整数键重新编号后追加，字符串键由右侧覆盖
    ///
    /// # Safety
    /// 同 `plus`
    pub unsafe fn merge(ad: *mut ArrayData, other: *const ArrayData, copy: bool) -> *mut ArrayData {
        // 自我合并时先取快照，避免边遍历边扩容
        let snapshot = if ptr::eq(ad, other) { Some((*other).copy()) } else { None };
        let src: *const ArrayData = snapshot.map_or(other, |s| s as *const ArrayData);

        let a = escalate(ad, copy);
        (*a).compact(true);
        for (key, v) in (*src).elements() {
            match key {
                Key::Int(_) => {
                    if (*a).next_ki < 0 {
                        raise_warning(WARN_NEXT_ELEMENT_OCCUPIED, &[]);
                        continue;
                    }
                    let k = Key::Int((*a).next_ki);
                    (*a).insert_new(k, tv_to_cell(v), true);
                }
                Key::Str(_) => (*a).update(key, v),
            }
        }
        if let Some(s) = snapshot {
            tv_dec_ref(make_tv_array(s));
        }
        a
    }

    /// 移出最后一个元素，返回值的所有权交给调用方；空数组得到 null
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn pop(ad: *mut ArrayData, copy: bool) -> (*mut ArrayData, TypedValue) {
        let last = (*ad).iter_last();
        if last == (*ad).iter_end() {
            return (ad, make_tv_null());
        }
        let a = escalate(ad, copy);
        let key = (*a).key_at(last);
        let Some(probe) = (*a).find_probe(key, hash_key(key)) else {
            return (a, make_tv_null());
        };
        let (key, value) = (*a).erase(probe);
        if let Key::Int(k) = key {
            if (*a).next_ki > 0 && k == (*a).next_ki - 1 {
                (*a).next_ki = k;
            }
        }
        if let Key::Str(s) = key {
            tv_dec_ref(make_tv_string(s));
        }
        (a, value)
    }

    /// 移出第一个元素并重新编号（`array_shift`）
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn dequeue(ad: *mut ArrayData, copy: bool) -> (*mut ArrayData, TypedValue) {
        let first = (*ad).iter_begin();
        if first == (*ad).iter_end() {
            return (ad, make_tv_null());
        }
        let a = escalate(ad, copy);
        let key = (*a).key_at(first);
        let Some(probe) = (*a).find_probe(key, hash_key(key)) else {
            return (a, make_tv_null());
        };
        let (key, value) = (*a).erase(probe);
        (*a).compact(true);
        if let Key::Str(s) = key {
            tv_dec_ref(make_tv_string(s));
        }
        (a, value)
    }

    /// 在头部插入并重新编号（`array_unshift`）
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn prepend(ad: *mut ArrayData, v: &TypedValue, copy: bool) -> *mut ArrayData {
        let a = escalate(ad, copy);
        let v = tv_to_cell(v);
        (*a).compact(false);
        if (*a).used() == (*a).capacity() {
            (*a).grow();
        }
        let used = (*a).used();
        ptr::copy((*a).data, (*a).data.add(1), used);
        (*a).used += 1;
        (*a).size += 1;
        let e = (*a).elm_mut(0);
        e.set_int_key(0);
        e.data.set_value(v.data(), v.ty);
        tv_inc_ref(v);
        (*a).compact(true);
        a
    }

    /// 整数键重新从 0 编号
    ///
    /// # Safety
    /// 同 `set`
    pub unsafe fn renumber(ad: *mut ArrayData, copy: bool) -> *mut ArrayData {
        let a = escalate(ad, copy);
        (*a).compact(true);
        a
    }
}

/// 活元素迭代器
pub struct Elements<'a> {
    ad: &'a ArrayData,
    pos: usize,
}

impl<'a> Iterator for Elements<'a> {
    type Item = (Key, &'a TypedValue);

    fn next(&mut self) -> Option<Self::Item> {
        let elms = self.ad.elms();
        while self.pos < elms.len() {
            let e = &elms[self.pos];
            self.pos += 1;
            if !e.is_tombstone() {
                return Some((e.key(), &e.data));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::diagnostics::take_diagnostics;
    use crate::vm::refcount::tv_refcount;
    use crate::vm::typed_value::make_tv_int;

    fn ints(ad: &ArrayData) -> Vec<(i64, i64)> {
        ad.elements()
            .map(|(k, v)| match k {
                Key::Int(i) => (i, v.num()),
                Key::Str(_) => (-1, v.num()),
            })
            .collect()
    }

    fn free(ad: *mut ArrayData) {
        tv_dec_ref(make_tv_array(ad));
    }

    #[test]
    fn test_set_get_remove() {
        let mut ad = ArrayData::make_empty();
        unsafe {
            for i in 0..10 {
                ad = ArrayData::set(ad, Key::Int(i * 3), &make_tv_int(i), false);
            }
            assert_eq!((*ad).size(), 10);
            assert_eq!((*ad).nv_get_int(9).map(|v| v.num()), Some(3));
            assert!((*ad).nv_get_int(10).is_none());
            assert_eq!((*ad).next_ki(), 28);

            ad = ArrayData::remove(ad, Key::Int(9), false);
            ad = ArrayData::remove(ad, Key::Int(1000), false);
            assert_eq!((*ad).size(), 9);
            assert!(!(*ad).exists(Key::Int(9)));
            assert_eq!((*ad).next_ki(), 28);
        }
        free(ad);
    }

    #[test]
    fn test_growth_and_order() {
        let mut ad = ArrayData::make_empty();
        unsafe {
            for i in 0..100 {
                ad = ArrayData::append(ad, &make_tv_int(i), false);
            }
            assert!((*ad).table_size() >= 128);
            for i in (0..100).step_by(2) {
                ad = ArrayData::remove(ad, Key::Int(i), false);
            }
            let expect: Vec<_> = (0..100).filter(|i| i % 2 == 1).map(|i| (i, i)).collect();
            assert_eq!(ints(&*ad), expect);
            assert!(!(*ad).is_vector_data());
        }
        free(ad);
    }

    #[test]
    fn test_churn_does_not_grow_forever() {
        let mut ad = ArrayData::make_empty();
        unsafe {
            for i in 0..10_000 {
                ad = ArrayData::set(ad, Key::Int(i), &make_tv_int(i), false);
                ad = ArrayData::remove(ad, Key::Int(i), false);
            }
            assert!((*ad).table_size() <= 8);
            assert!((*ad).is_empty());
        }
        free(ad);
    }

    #[test]
    fn test_copy_on_write() {
        let mut a = ArrayData::make_empty();
        unsafe {
            a = ArrayData::set(a, Key::Int(0), &make_tv_int(1), false);
            (*a).hdr().inc_ref();
            let b = ArrayData::set(a, Key::Int(0), &make_tv_int(2), false);
            assert_ne!(a, b);
            free(a);
            assert_eq!((*a).nv_get_int(0).map(|v| v.num()), Some(1));
            assert_eq!((*b).nv_get_int(0).map(|v| v.num()), Some(2));
            assert_eq!((*b).hdr().count(), 1);
            free(b);
        }
        free(a);
    }

    #[test]
    fn test_string_keys_share_refcount() {
        let mut ad = ArrayData::make_empty();
        let s = StringData::make(b"name");
        unsafe {
            ad = ArrayData::set(ad, Key::Str(s), &make_tv_int(1), false);
            assert_eq!(tv_refcount(&make_tv_string(s)), Some(2));
            let other = StringData::make(b"name");
            assert_eq!((*ad).nv_get(Key::Str(other)).map(|v| v.num()), Some(1));
            assert_eq!((*ad).nv_get_str(b"name").map(|v| v.num()), Some(1));
            tv_dec_ref(make_tv_string(other));
            ad = ArrayData::remove(ad, Key::Str(s), false);
            assert_eq!(tv_refcount(&make_tv_string(s)), Some(1));
            tv_dec_ref(make_tv_string(s));
        }
        free(ad);
    }

    #[test]
    fn test_plus_left_wins() {
        let a_key = StringData::make_static(b"a");
        let b_key = StringData::make_static(b"b");
        unsafe {
            let mut l = ArrayData::make_empty();
            l = ArrayData::set(l, Key::Str(a_key), &make_tv_int(1), false);
            let mut r = ArrayData::make_empty();
            r = ArrayData::set(r, Key::Str(a_key), &make_tv_int(2), false);
            r = ArrayData::set(r, Key::Str(b_key), &make_tv_int(3), false);
            l = ArrayData::plus(l, r, false);
            assert_eq!((*l).size(), 2);
            assert_eq!((*l).nv_get(Key::Str(a_key)).map(|v| v.num()), Some(1));
            assert_eq!((*l).nv_get(Key::Str(b_key)).map(|v| v.num()), Some(3));
            free(l);
            free(r);
        }
    }

    #[test]
    fn test_merge_renumbers() {
        unsafe {
            let mut l = ArrayData::make_empty();
            l = ArrayData::set(l, Key::Int(5), &make_tv_int(10), false);
            let r = ArrayData::make_vec(&[make_tv_int(20), make_tv_int(30)]);
            l = ArrayData::merge(l, r, false);
            assert_eq!(ints(&*l), vec![(0, 10), (1, 20), (2, 30)]);
            l = ArrayData::merge(l, l, false);
            assert_eq!((*l).size(), 6);
            free(l);
            free(r);
        }
    }

    #[test]
    fn test_pop_dequeue_prepend() {
        unsafe {
            let mut ad = ArrayData::make_vec(&[make_tv_int(1), make_tv_int(2), make_tv_int(3)]);
            let (a, v) = ArrayData::pop(ad, false);
            ad = a;
            assert_eq!(v.num(), 3);
            assert_eq!((*ad).next_ki(), 2);
            let (a, v) = ArrayData::dequeue(ad, false);
            ad = a;
            assert_eq!(v.num(), 1);
            assert_eq!(ints(&*ad), vec![(0, 2)]);
            ad = ArrayData::prepend(ad, &make_tv_int(9), false);
            assert_eq!(ints(&*ad), vec![(0, 9), (1, 2)]);
            assert!((*ad).is_vector_data());

            let empty = ArrayData::static_empty();
            let (same, v) = ArrayData::pop(empty, false);
            assert_eq!(same, empty);
            assert!(v.is_null());
            free(ad);
        }
    }

    #[test]
    fn test_next_element_occupied() {
        take_diagnostics();
        unsafe {
            let mut ad = ArrayData::make_empty();
            ad = ArrayData::set(ad, Key::Int(i64::MAX), &make_tv_int(1), false);
            assert_eq!((*ad).next_ki(), -1);
            ad = ArrayData::append(ad, &make_tv_int(2), false);
            assert_eq!((*ad).size(), 1);
            assert_eq!(take_diagnostics()[0].key, WARN_NEXT_ELEMENT_OCCUPIED);
            free(ad);
        }
    }

    #[test]
    fn test_positions_skip_tombstones() {
        unsafe {
            let mut ad = ArrayData::make_vec(&[make_tv_int(0), make_tv_int(1), make_tv_int(2), make_tv_int(3)]);
            ad = ArrayData::remove(ad, Key::Int(0), false);
            ad = ArrayData::remove(ad, Key::Int(2), false);
            let a = &*ad;
            assert_eq!(a.iter_begin(), 1);
            assert_eq!(a.iter_advance(1), 3);
            assert_eq!(a.iter_advance(3), a.iter_end());
            assert_eq!(a.iter_last(), 3);
            assert_eq!(a.iter_rewind(3), 1);
            assert_eq!(a.iter_rewind(1), a.iter_end());
            assert_eq!(a.key_at(3), Key::Int(3));
            free(ad);
        }
    }

    #[test]
    fn test_static_and_uncounted() {
        unsafe {
            let s = StringData::make(b"v");
            let mut ad = ArrayData::make_empty();
            ad = ArrayData::set(ad, Key::Int(0), &make_tv_string(s), false);
            tv_dec_ref(make_tv_string(s));
            let inner = ArrayData::make_vec(&[make_tv_int(7)]);
            ad = ArrayData::set(ad, Key::Int(1), &make_tv_array(inner), false);
            free(inner);

            let st = ArrayData::make_static(&*ad).unwrap();
            assert!((*st).is_static());
            assert_eq!((*st).nv_get_int(0).map(|v| v.ty), Some(DataType::PersistentString));
            assert_eq!((*st).nv_get_int(1).map(|v| v.ty), Some(DataType::PersistentArray));

            let un = ArrayData::make_uncounted(&*ad).unwrap();
            assert!((*un).hdr().is_uncounted());
            ArrayData::release_uncounted(un);

            // 静态数组被修改时先复制
            let copy = ArrayData::set(st, Key::Int(2), &make_tv_int(1), false);
            assert_ne!(copy, st);
            assert_eq!((*st).size(), 2);
            free(copy);
            free(ad);
        }
    }

    #[test]
    fn test_keyset() {
        let keys = [Key::Int(3), Key::Int(1), Key::Int(3)];
        let ks = ArrayData::make_keyset(&keys);
        unsafe {
            assert!((*ks).is_keyset());
            assert_eq!(ints(&*ks), vec![(3, 3), (1, 1)]);
            let ks = ArrayData::keyset_add(ks, Key::Int(8), false);
            assert_eq!((*ks).size(), 3);
            free(ks);
        }
    }
}
