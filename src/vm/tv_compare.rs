//! 比较运算
//!
//! 宽松比较矩阵（`==` / `<` / `>` / `<=>`）：
//! - null 与字符串比较时 null 当作 ""
//! - 一侧是 null 或 bool 时两侧都转为布尔
//! - 数字与数字串按数值比较；数字与非数字串比较时数字先转成字符串
//! - 数组比任何非数组都大；两个数组先比元素个数，再逐键比较值，
//!   左侧的键在右侧缺失时两者不可比
//! - 对象与字符串比较时使用字符串转换能力，同类对象逐个比较属性
//!
//! 不可比时 `<` 与 `>` 都为假，`<=>` 得 1。集合对象只支持 `==`。

use std::cmp::Ordering;
use std::ptr;

use crate::error::{VmError, VmResult};
use crate::vm::array::{ArrayData, Key};
use crate::vm::conversions::cell_to_bool;
use crate::vm::datatype::DataType;
use crate::vm::numeric::{double_to_string, is_numeric_string, string_compare, Numeric};
use crate::vm::object::ObjectData;
use crate::vm::tv_mutate::tv_to_cell;
use crate::vm::typed_value::TypedValue;

/// 用于错误消息的类型描述
fn describe(tv: &TypedValue) -> &'static str {
    match tv.ty {
        DataType::Uninit | DataType::Null | DataType::Invalid => "null",
        DataType::Boolean => "a boolean",
        DataType::Int64 => "an integer",
        DataType::Double => "a float",
        DataType::PersistentString | DataType::String => "a string",
        DataType::PersistentArray | DataType::Array => "an array",
        DataType::Object => "an object",
        DataType::Resource => "a resource",
        DataType::Ref => "a reference",
    }
}

#[inline]
fn is_collection(tv: &TypedValue) -> bool {
    tv.is_object() && unsafe { (*tv.pobj()).is_collection() }
}

/// 集合对象不能参与大小比较
fn check_relational(a: &TypedValue, b: &TypedValue) -> VmResult<()> {
    if is_collection(a) {
        return Err(VmError::CollectionCompare { with: describe(b) });
    }
    if is_collection(b) {
        return Err(VmError::CollectionCompare { with: describe(a) });
    }
    Ok(())
}

#[inline]
fn str_bytes(tv: &TypedValue) -> &[u8] {
    unsafe { (*tv.pstr()).as_bytes() }
}

/// 数字与字符串：数字串按数值，否则把数字格式化后按字节比较
fn compare_number_string(n: Numeric, s: &[u8]) -> Option<Ordering> {
    match is_numeric_string(s) {
        Some(m) => n.compare(m),
        None => {
            let text = match n {
                Numeric::Int(i) => i.to_string(),
                Numeric::Double(d) => double_to_string(d),
            };
            Some(text.as_bytes().cmp(s))
        }
    }
}

fn as_number(tv: &TypedValue) -> Option<Numeric> {
    match tv.ty {
        DataType::Int64 => Some(Numeric::Int(tv.num())),
        DataType::Double => Some(Numeric::Double(tv.dbl())),
        DataType::Resource => Some(Numeric::Int(unsafe { (*tv.pres()).id() })),
        DataType::Object => Some(Numeric::Int(unsafe { (*tv.pobj()).to_int64() })),
        _ => None,
    }
}

/// 宽松比较的核心；`None` 表示不可比
fn compare_cells(a: &TypedValue, b: &TypedValue) -> Option<Ordering> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    use DataType::*;
    match (a.ty, b.ty) {
        (Uninit | Null, Uninit | Null) => Some(Ordering::Equal),
        (Uninit | Null, PersistentString | String) => string_compare(b"", str_bytes(b)),
        (PersistentString | String, Uninit | Null) => string_compare(str_bytes(a), b""),
        (Uninit | Null | Boolean, _) | (_, Uninit | Null | Boolean) => {
            Some(cell_to_bool(a).cmp(&cell_to_bool(b)))
        }
        (PersistentString | String, PersistentString | String) => string_compare(str_bytes(a), str_bytes(b)),
        (PersistentArray | Array, PersistentArray | Array) => unsafe { array_compare(&*a.parr(), &*b.parr()) },
        (PersistentArray | Array, _) => Some(Ordering::Greater),
        (_, PersistentArray | Array) => Some(Ordering::Less),
        (Object, Object) => unsafe { object_compare(&*a.pobj(), &*b.pobj()) },
        (Object, PersistentString | String) => object_string_compare(a, str_bytes(b)),
        (PersistentString | String, Object) => object_string_compare(b, str_bytes(a)).map(Ordering::reverse),
        (PersistentString | String, _) => compare_number_string(as_number(b)?, str_bytes(a)).map(Ordering::reverse),
        (_, PersistentString | String) => compare_number_string(as_number(a)?, str_bytes(b)),
        _ => as_number(a)?.compare(as_number(b)?),
    }
}

fn object_string_compare(obj: &TypedValue, s: &[u8]) -> Option<Ordering> {
    let o = unsafe { &*obj.pobj() };
    if !o.class().has_to_string() {
        return Some(Ordering::Greater);
    }
    let text = o.to_string().ok()?;
    string_compare(text.as_bytes(), s)
}

fn same_class(a: &ObjectData, b: &ObjectData) -> bool {
    ptr::eq(a.class(), b.class())
}

fn object_compare(a: &ObjectData, b: &ObjectData) -> Option<Ordering> {
    if ptr::eq(a, b) {
        return Some(Ordering::Equal);
    }
    if !same_class(a, b) {
        return None;
    }
    array_compare(a.props(), b.props())
}

// ============================================================================
// 数组
// ============================================================================

/// 元素少的数组较小；个数相同时按左侧的键逐个比较
pub fn array_compare(a: &ArrayData, b: &ArrayData) -> Option<Ordering> {
    if ptr::eq(a, b) {
        return Some(Ordering::Equal);
    }
    if a.size() != b.size() {
        return Some(a.size().cmp(&b.size()));
    }
    for (key, v) in a.elements() {
        let other = b.nv_get(key)?;
        match compare_cells(v, other)? {
            Ordering::Equal => continue,
            ord => return Some(ord),
        }
    }
    Some(Ordering::Equal)
}

/// `==`：键值对相同，顺序无关
pub fn array_equal(a: &ArrayData, b: &ArrayData) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    a.size() == b.size()
        && a.elements().all(|(key, v)| b.nv_get(key).is_some_and(|other| tv_equal(v, other)))
}

fn keys_same(a: Key, b: Key) -> bool {
    match (a, b) {
        (Key::Int(x), Key::Int(y)) => x == y,
        (Key::Str(_), Key::Str(_)) => a.str_bytes() == b.str_bytes(),
        _ => false,
    }
}

/// `===`：键值对与顺序都相同，值严格相等
pub fn array_same(a: &ArrayData, b: &ArrayData) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    a.size() == b.size()
        && a
            .elements()
            .zip(b.elements())
            .all(|((ka, va), (kb, vb))| keys_same(ka, kb) && tv_same(va, vb))
}

fn collection_equal(a: &ObjectData, b: &ObjectData) -> bool {
    match a.collection_type() {
        Some(kind) if kind.is_ordered() => {
            a.props().size() == b.props().size()
                && a
                    .props()
                    .elements()
                    .zip(b.props().elements())
                    .all(|((_, x), (_, y))| tv_equal(x, y))
        }
        _ => array_equal(a.props(), b.props()),
    }
}

fn object_equal(a: &ObjectData, b: &ObjectData) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    if !same_class(a, b) {
        return false;
    }
    if a.is_collection() {
        collection_equal(a, b)
    } else {
        array_equal(a.props(), b.props())
    }
}

// ============================================================================
// 公共入口
// ============================================================================

/// `===`
pub fn tv_same(a: &TypedValue, b: &TypedValue) -> bool {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    use DataType::*;
    match (a.ty, b.ty) {
        (Uninit | Null, Uninit | Null) => true,
        (Boolean, Boolean) => a.boolean() == b.boolean(),
        (Int64, Int64) => a.num() == b.num(),
        (Double, Double) => a.dbl() == b.dbl(),
        (PersistentString | String, PersistentString | String) => str_bytes(a) == str_bytes(b),
        (PersistentArray | Array, PersistentArray | Array) => unsafe { array_same(&*a.parr(), &*b.parr()) },
        (Object, Object) => a.pobj() == b.pobj(),
        (Resource, Resource) => a.pres() == b.pres(),
        _ => false,
    }
}

/// `==`
pub fn tv_equal(a: &TypedValue, b: &TypedValue) -> bool {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    match (a.ty, b.ty) {
        (DataType::Object, DataType::Object) => unsafe { object_equal(&*a.pobj(), &*b.pobj()) },
        _ if is_collection(a) || is_collection(b) => false,
        _ => compare_cells(a, b) == Some(Ordering::Equal),
    }
}

/// `<`
pub fn tv_less(a: &TypedValue, b: &TypedValue) -> VmResult<bool> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    check_relational(a, b)?;
    Ok(compare_cells(a, b) == Some(Ordering::Less))
}

/// `>`
pub fn tv_greater(a: &TypedValue, b: &TypedValue) -> VmResult<bool> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    check_relational(a, b)?;
    Ok(compare_cells(a, b) == Some(Ordering::Greater))
}

/// `<=`
pub fn tv_less_or_equal(a: &TypedValue, b: &TypedValue) -> VmResult<bool> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    check_relational(a, b)?;
    Ok(matches!(compare_cells(a, b), Some(Ordering::Less | Ordering::Equal)))
}

/// `>=`
pub fn tv_greater_or_equal(a: &TypedValue, b: &TypedValue) -> VmResult<bool> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    check_relational(a, b)?;
    Ok(matches!(compare_cells(a, b), Some(Ordering::Greater | Ordering::Equal)))
}

/// `<=>`；不可比时为 `Greater`
pub fn tv_compare(a: &TypedValue, b: &TypedValue) -> VmResult<Ordering> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    check_relational(a, b)?;
    Ok(compare_cells(a, b).unwrap_or(Ordering::Greater))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::array::Array;
    use crate::vm::object::{Class, CollectionType};
    use crate::vm::refcount::tv_dec_ref;
    use crate::vm::typed_value::*;
    use crate::vm::variant::Variant;

    fn s(text: &str) -> Variant {
        Variant::from(text)
    }

    #[test]
    fn test_null_and_bool() {
        assert!(tv_equal(&make_tv_null(), &make_tv_bool(false)));
        assert!(tv_equal(&make_tv_null(), s("").as_tv()));
        assert!(!tv_equal(&make_tv_null(), s("0").as_tv()));
        assert!(tv_equal(&make_tv_bool(true), s("abc").as_tv()));
        assert!(tv_equal(&make_tv_null(), &make_tv_int(0)));
        assert_eq!(tv_less(&make_tv_null(), &make_tv_int(-1)), Ok(true));
    }

    #[test]
    fn test_number_string() {
        assert!(!tv_equal(s("abc").as_tv(), &make_tv_int(0)));
        assert!(tv_equal(s("1e3").as_tv(), &make_tv_int(1000)));
        assert!(tv_equal(s(" 42 ").as_tv(), &make_tv_double(42.0)));
        assert!(tv_equal(s("10").as_tv(), s("1e1").as_tv()));
        assert!(!tv_equal(s("abc").as_tv(), s("ABC").as_tv()));
        assert_eq!(tv_less(&make_tv_int(5), s("abc").as_tv()), Ok(true));
        assert_eq!(tv_compare(s("abc").as_tv(), &make_tv_int(5)), Ok(Ordering::Greater));
        assert_eq!(tv_less(&make_tv_double(f64::NAN), &make_tv_int(1)), Ok(false));
        assert_eq!(tv_greater(&make_tv_double(f64::NAN), &make_tv_int(1)), Ok(false));
    }

    #[test]
    fn test_same() {
        assert!(!tv_same(&make_tv_int(1), s("1").as_tv()));
        assert!(tv_same(s("a").as_tv(), s("a").as_tv()));
        assert!(!tv_same(&make_tv_int(1), &make_tv_double(1.0)));
        assert!(tv_same(&make_tv_null(), &make_tv_uninit()));

        let a = Array::from_values([1, 2]);
        let b = Array::from_values([1, 2]);
        assert!(tv_same(&a.to_tv(), &b.to_tv()));
        let mut c = Array::new();
        c.set(1, 2);
        c.set(0, 1);
        assert!(tv_equal(&a.to_tv(), &c.to_tv()));
        assert!(!tv_same(&a.to_tv(), &c.to_tv()));
    }

    #[test]
    fn test_arrays() {
        let one = Array::from_values([1]);
        let two = Array::from_values([1, 2]);
        assert_eq!(tv_less(&one.to_tv(), &two.to_tv()), Ok(true));
        assert_eq!(tv_greater(&one.to_tv(), &make_tv_int(100)), Ok(true));

        let mut x = Array::new();
        x.set("a", 1);
        let mut y = Array::new();
        y.set("b", 1);
        // 键不同的数组不可比
        assert_eq!(tv_less(&x.to_tv(), &y.to_tv()), Ok(false));
        assert_eq!(tv_greater(&x.to_tv(), &y.to_tv()), Ok(false));
        assert!(!tv_equal(&x.to_tv(), &y.to_tv()));
    }

    #[test]
    fn test_objects() {
        let class = Class::new("Name").with_to_string(|_| "bob".to_string()).build();
        let a = make_tv_object(ObjectData::make(&class));
        let b = make_tv_object(ObjectData::make(&class));
        assert!(tv_equal(&a, &b));
        assert!(!tv_same(&a, &b));
        assert!(tv_equal(&a, s("bob").as_tv()));
        assert!(tv_equal(s("bob").as_tv(), &a));
        unsafe { (*a.pobj()).set_prop("x", 1) };
        assert!(!tv_equal(&a, &b));
        tv_dec_ref(a);
        tv_dec_ref(b);
    }

    #[test]
    fn test_collections() {
        let vector = Class::new("Vector").with_collection(CollectionType::Vector).build();
        let a = make_tv_object(ObjectData::make_collection(&vector, Array::from_values([1, 2])));
        let b = make_tv_object(ObjectData::make_collection(&vector, Array::from_values([1, 2])));
        assert!(tv_equal(&a, &b));
        assert!(!tv_equal(&a, &make_tv_int(1)));
        assert_eq!(
            tv_less(&a, &make_tv_int(1)),
            Err(VmError::CollectionCompare { with: "an integer" })
        );
        assert!(tv_compare(&b, &a).is_err());
        tv_dec_ref(a);
        tv_dec_ref(b);
    }
}
