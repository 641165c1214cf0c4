//! 带类型标签的值
//!
//! 16 字节：8 字节载荷 + 1 字节类型 + 4 字节辅助字。辅助字不属于值本身，
//! 由容器自用（数组元素在这里缓存键的 hash），拷贝值时不随之复制。
//!
//! 指针类载荷在类型为可计数类型时必须有效，且计数 ≥ 1 或为永生哨兵

use std::fmt;

use super::array::ArrayData;
use super::datatype::DataType;
use super::object::ObjectData;
use super::ref_data::RefData;
use super::resource::ResourceData;
use super::string_data::StringData;
use crate::mm::HeapObject;

/// 带类型标签的值
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TypedValue {
    data: u64,
    pub ty: DataType,
    aux: u32,
}

/// 保证不是引用盒的值
pub type Cell = TypedValue;

impl TypedValue {
    #[inline]
    const fn raw(data: u64, ty: DataType) -> Self {
        Self { data, ty, aux: 0 }
    }

    #[inline]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    #[inline]
    pub fn data(&self) -> u64 {
        self.data
    }

    #[inline]
    pub fn num(&self) -> i64 {
        self.data as i64
    }

    #[inline]
    pub fn boolean(&self) -> bool {
        self.data != 0
    }

    #[inline]
    pub fn dbl(&self) -> f64 {
        f64::from_bits(self.data)
    }

    #[inline]
    pub fn pstr(&self) -> *mut StringData {
        self.data as *mut StringData
    }

    #[inline]
    pub fn parr(&self) -> *mut ArrayData {
        self.data as *mut ArrayData
    }

    #[inline]
    pub fn pobj(&self) -> *mut ObjectData {
        self.data as *mut ObjectData
    }

    #[inline]
    pub fn pres(&self) -> *mut ResourceData {
        self.data as *mut ResourceData
    }

    #[inline]
    pub fn pref(&self) -> *mut RefData {
        self.data as *mut RefData
    }

    /// 容器头部（所有容器都以 `HeapObject` 开头）
    #[inline]
    pub fn counted(&self) -> *mut HeapObject {
        self.data as *mut HeapObject
    }

    #[inline]
    pub fn aux(&self) -> u32 {
        self.aux
    }

    #[inline]
    pub fn set_aux(&mut self, aux: u32) {
        self.aux = aux;
    }

    /// 只改写类型与载荷，保留辅助字
    #[inline]
    pub(crate) fn set_value(&mut self, data: u64, ty: DataType) {
        self.data = data;
        self.ty = ty;
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ty.is_null()
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.ty != DataType::Uninit
    }

    #[inline]
    pub fn is_ref(&self) -> bool {
        self.ty == DataType::Ref
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.ty.is_string()
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.ty.is_array()
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        self.ty == DataType::Object
    }

    /// 墓碑
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.ty == DataType::Invalid
    }

    #[inline]
    pub fn is_refcounted(&self) -> bool {
        self.ty.is_refcounted()
    }

    #[inline]
    pub const fn invalid() -> Self {
        Self::raw(0, DataType::Invalid)
    }
}

impl Default for TypedValue {
    fn default() -> Self {
        make_tv_uninit()
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            DataType::Invalid => write!(f, "Invalid"),
            DataType::Uninit => write!(f, "Uninit"),
            DataType::Null => write!(f, "Null"),
            DataType::Boolean => write!(f, "Bool({})", self.boolean()),
            DataType::Int64 => write!(f, "Int({})", self.num()),
            DataType::Double => write!(f, "Double({})", self.dbl()),
            DataType::PersistentString | DataType::String => {
                let s = unsafe { &*self.pstr() };
                write!(f, "String({:?})", String::from_utf8_lossy(s.as_bytes()))
            }
            ty => write!(f, "{:?}({:#x})", ty, self.data),
        }
    }
}

// ============================================================================
// 构造
// ============================================================================

#[inline]
pub const fn make_tv_uninit() -> TypedValue {
    TypedValue::raw(0, DataType::Uninit)
}

#[inline]
pub const fn make_tv_null() -> TypedValue {
    TypedValue::raw(0, DataType::Null)
}

#[inline]
pub const fn make_tv_bool(b: bool) -> TypedValue {
    TypedValue::raw(b as u64, DataType::Boolean)
}

#[inline]
pub const fn make_tv_int(i: i64) -> TypedValue {
    TypedValue::raw(i as u64, DataType::Int64)
}

#[inline]
pub fn make_tv_double(d: f64) -> TypedValue {
    TypedValue::raw(d.to_bits(), DataType::Double)
}

/// 字符串值；永生字符串得到 `PersistentString`
///
/// 接管调用方持有的一个引用
#[inline]
pub fn make_tv_string(s: *mut StringData) -> TypedValue {
    let ty = if unsafe { (*s).hdr().is_refcounted() } {
        DataType::String
    } else {
        DataType::PersistentString
    };
    TypedValue::raw(s as u64, ty)
}

/// 数组值；永生数组得到 `PersistentArray`
#[inline]
pub fn make_tv_array(a: *mut ArrayData) -> TypedValue {
    let ty = if unsafe { (*a).hdr().is_refcounted() } {
        DataType::Array
    } else {
        DataType::PersistentArray
    };
    TypedValue::raw(a as u64, ty)
}

#[inline]
pub fn make_tv_object(o: *mut ObjectData) -> TypedValue {
    TypedValue::raw(o as u64, DataType::Object)
}

#[inline]
pub fn make_tv_resource(r: *mut ResourceData) -> TypedValue {
    TypedValue::raw(r as u64, DataType::Resource)
}

#[inline]
pub fn make_tv_ref(r: *mut RefData) -> TypedValue {
    TypedValue::raw(r as u64, DataType::Ref)
}
