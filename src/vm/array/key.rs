//! 数组键与键的规范化
//!
//! 字符串键恰好是规范十进制整数（无 `+`、无前导零、在 i64 范围内）时
//! 转为整数键，其余保持字符串键

use std::fmt;

use crate::i18n::messages::WARN_ILLEGAL_OFFSET_TYPE;
use crate::runtime::diagnostics::raise_warning;
use crate::vm::datatype::DataType;
use crate::vm::numeric::{double_to_int64, strictly_integer};
use crate::vm::refcount::tv_dec_ref;
use crate::vm::string_data::StringData;
use crate::vm::typed_value::{make_tv_int, make_tv_string, TypedValue};
use crate::vm::variant::Variant;

/// 规范化之后的键（不持有引用）
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Int(i64),
    Str(*mut StringData),
}

impl Key {
    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Key::Int(_))
    }

    /// 键作为值（不增加计数）
    #[inline]
    pub fn to_tv(self) -> TypedValue {
        match self {
            Key::Int(i) => make_tv_int(i),
            Key::Str(s) => make_tv_string(s),
        }
    }

    pub fn str_bytes(&self) -> Option<&[u8]> {
        match self {
            Key::Str(s) => Some(unsafe { (**s).as_bytes() }),
            Key::Int(_) => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{:?}", unsafe { (**s).to_string_lossy() }),
        }
    }
}

/// 持有字符串键一个引用的键
pub struct OwnedKey(Key);

impl OwnedKey {
    pub fn int(i: i64) -> Self {
        OwnedKey(Key::Int(i))
    }

    /// 接管 `s` 的一个引用
    pub fn from_string(s: *mut StringData) -> Self {
        OwnedKey(Key::Str(s))
    }

    /// 规范化字节串
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match strictly_integer(bytes) {
            Some(i) => OwnedKey(Key::Int(i)),
            None => OwnedKey(Key::Str(StringData::make(bytes))),
        }
    }

    #[inline]
    pub fn key(&self) -> Key {
        self.0
    }
}

impl Drop for OwnedKey {
    fn drop(&mut self) {
        if let Key::Str(s) = self.0 {
            tv_dec_ref(make_tv_string(s));
        }
    }
}

impl fmt::Debug for OwnedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 可以作为数组键的类型
pub trait ToArrayKey {
    /// 转换失败（非法偏移类型）时发出警告并返回 `None`
    fn to_array_key(&self) -> Option<OwnedKey>;
}

impl ToArrayKey for i64 {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::int(*self))
    }
}

impl ToArrayKey for i32 {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::int(*self as i64))
    }
}

impl ToArrayKey for usize {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::int(*self as i64))
    }
}

impl ToArrayKey for str {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::from_bytes(self.as_bytes()))
    }
}

impl ToArrayKey for [u8] {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::from_bytes(self))
    }
}

impl ToArrayKey for String {
    fn to_array_key(&self) -> Option<OwnedKey> {
        Some(OwnedKey::from_bytes(self.as_bytes()))
    }
}

impl ToArrayKey for TypedValue {
    fn to_array_key(&self) -> Option<OwnedKey> {
        tv_to_key(self)
    }
}

impl ToArrayKey for Variant {
    fn to_array_key(&self) -> Option<OwnedKey> {
        tv_to_key(self.as_tv())
    }
}

impl<T: ToArrayKey + ?Sized> ToArrayKey for &T {
    fn to_array_key(&self) -> Option<OwnedKey> {
        (**self).to_array_key()
    }
}

/// 值到键的转换
pub fn tv_to_key(tv: &TypedValue) -> Option<OwnedKey> {
    match tv.ty {
        DataType::Int64 => Some(OwnedKey::int(tv.num())),
        DataType::PersistentString | DataType::String => {
            let s = tv.pstr();
            let bytes = unsafe { (*s).as_bytes() };
            match strictly_integer(bytes) {
                Some(i) => Some(OwnedKey::int(i)),
                None => {
                    unsafe { (*s).hdr().inc_ref() };
                    Some(OwnedKey::from_string(s))
                }
            }
        }
        DataType::Double => Some(OwnedKey::int(double_to_int64(tv.dbl()))),
        DataType::Boolean => Some(OwnedKey::int(tv.boolean() as i64)),
        DataType::Uninit | DataType::Null => Some(OwnedKey::from_string(StringData::make_static(b""))),
        DataType::Resource => Some(OwnedKey::int(unsafe { (*tv.pres()).id() })),
        DataType::Ref => tv_to_key(unsafe { (*tv.pref()).tv() }),
        DataType::PersistentArray | DataType::Array | DataType::Object | DataType::Invalid => {
            raise_warning(WARN_ILLEGAL_OFFSET_TYPE, &[]);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::diagnostics::take_diagnostics;
    use crate::vm::typed_value::{make_tv_bool, make_tv_double, make_tv_null};

    fn int_of(k: Option<OwnedKey>) -> Option<i64> {
        match k?.key() {
            Key::Int(i) => Some(i),
            Key::Str(_) => None,
        }
    }

    #[test]
    fn test_string_canonicalization() {
        assert_eq!(int_of("123".to_array_key()), Some(123));
        assert_eq!(int_of("-7".to_array_key()), Some(-7));
        assert_eq!(int_of("0123".to_array_key()), None);
        assert_eq!(int_of("+5".to_array_key()), None);
        assert_eq!(int_of("1.5".to_array_key()), None);
        let k = "0123".to_array_key().unwrap();
        assert_eq!(k.key().str_bytes(), Some(&b"0123"[..]));
    }

    #[test]
    fn test_scalar_keys() {
        assert_eq!(int_of(make_tv_double(3.9).to_array_key()), Some(3));
        assert_eq!(int_of(make_tv_bool(true).to_array_key()), Some(1));
        let null_key = make_tv_null().to_array_key().unwrap();
        assert_eq!(null_key.key().str_bytes(), Some(&b""[..]));
    }

    #[test]
    fn test_illegal_offset_warns() {
        take_diagnostics();
        let arr = crate::vm::typed_value::make_tv_array(crate::vm::array::ArrayData::static_empty());
        assert!(arr.to_array_key().is_none());
        assert_eq!(take_diagnostics()[0].key, WARN_ILLEGAL_OFFSET_TYPE);
    }
}
