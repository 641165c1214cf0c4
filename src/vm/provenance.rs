//! 数组来源标签
//!
//! 标签（文件名 + 行号）存放在线程局部的旁路表中，数组头部只用一个
//! 标志位表示"有标签"。写时复制时标签跟随到新数组，数组释放时清除

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::array::{ArrayData, FLAG_PROVENANCE};

/// 来源标签
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub filename: Rc<str>,
    pub line: u32,
}

impl Tag {
    pub fn new(filename: &str, line: u32) -> Self {
        Tag { filename: Rc::from(filename), line }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

thread_local! {
    static ENABLED: Cell<bool> = const { Cell::new(false) };
    static TAGS: RefCell<FxHashMap<usize, Tag>> = RefCell::new(FxHashMap::default());
}

#[inline]
fn addr(ad: &ArrayData) -> usize {
    ad as *const ArrayData as usize
}

pub fn set_enabled(enabled: bool) {
    ENABLED.with(|e| e.set(enabled));
}

pub fn is_enabled() -> bool {
    ENABLED.with(|e| e.get())
}

/// 给数组打标签；未启用或数组是永生数组时忽略
pub fn set_tag(ad: &ArrayData, tag: Tag) {
    if !is_enabled() || !ad.hdr().is_refcounted() {
        return;
    }
    TAGS.with(|t| t.borrow_mut().insert(addr(ad), tag));
    ad.set_flag(FLAG_PROVENANCE, true);
}

pub fn get_tag(ad: &ArrayData) -> Option<Tag> {
    if !ad.has_flag(FLAG_PROVENANCE) {
        return None;
    }
    TAGS.with(|t| t.borrow().get(&addr(ad)).cloned())
}

/// 复制时把 `src` 的标签带到 `dst`
pub fn copy_tag(src: &ArrayData, dst: &ArrayData) {
    if let Some(tag) = get_tag(src) {
        TAGS.with(|t| t.borrow_mut().insert(addr(dst), tag));
        dst.set_flag(FLAG_PROVENANCE, true);
    }
}

pub fn clear_tag(ad: &ArrayData) {
    if ad.has_flag(FLAG_PROVENANCE) {
        let _ = TAGS.try_with(|t| t.borrow_mut().remove(&addr(ad)));
        ad.set_flag(FLAG_PROVENANCE, false);
    }
}

/// 请求结束时丢弃全部标签
pub fn clear_all() {
    let _ = TAGS.try_with(|t| t.borrow_mut().clear());
}

pub fn tag_count() -> usize {
    TAGS.with(|t| t.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::array::Key;
    use crate::vm::refcount::tv_dec_ref;
    use crate::vm::typed_value::{make_tv_array, make_tv_int};

    #[test]
    fn test_tag_follows_copy_and_clears_on_release() {
        set_enabled(true);
        let ad = ArrayData::make_vec(&[make_tv_int(1)]);
        unsafe {
            set_tag(&*ad, Tag::new("index.php", 12));
            assert_eq!(get_tag(&*ad).map(|t| t.to_string()), Some("index.php:12".to_string()));

            (*ad).hdr().inc_ref();
            let copy = ArrayData::set(ad, Key::Int(1), &make_tv_int(2), false);
            assert_ne!(copy, ad);
            assert_eq!(get_tag(&*copy), get_tag(&*ad));
            let before = tag_count();
            tv_dec_ref(make_tv_array(copy));
            assert_eq!(tag_count(), before - 1);
            tv_dec_ref(make_tv_array(ad));
            tv_dec_ref(make_tv_array(ad));
        }
        set_enabled(false);
    }

    #[test]
    fn test_disabled_and_static_are_untagged() {
        set_enabled(false);
        let ad = ArrayData::make_empty();
        unsafe {
            set_tag(&*ad, Tag::new("a.php", 1));
            assert!(get_tag(&*ad).is_none());
            tv_dec_ref(make_tv_array(ad));
        }
        set_enabled(true);
        let empty = ArrayData::static_empty();
        unsafe { set_tag(&*empty, Tag::new("a.php", 2)) };
        assert!(unsafe { get_tag(&*empty) }.is_none());
        set_enabled(false);
    }
}
