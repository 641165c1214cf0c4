//! 值的类型转换
//!
//! 参数可以是引用盒，转换前先解引用

use std::borrow::Cow;

use crate::error::VmResult;
use crate::i18n::messages::WARN_ARRAY_TO_STRING;
use crate::runtime::diagnostics::raise_warning;
use crate::vm::datatype::DataType;
use crate::vm::numeric::{double_to_int64, double_to_string, string_to_numeric, Numeric};
use crate::vm::string_data::StringData;
use crate::vm::tv_mutate::tv_to_cell;
use crate::vm::typed_value::TypedValue;

/// 转为布尔
pub fn cell_to_bool(tv: &TypedValue) -> bool {
    let tv = tv_to_cell(tv);
    match tv.ty {
        DataType::Uninit | DataType::Null | DataType::Invalid => false,
        DataType::Boolean => tv.boolean(),
        DataType::Int64 => tv.num() != 0,
        DataType::Double => tv.dbl() != 0.0,
        DataType::PersistentString | DataType::String => unsafe { (*tv.pstr()).to_boolean() },
        DataType::PersistentArray | DataType::Array => unsafe { !(*tv.parr()).is_empty() },
        DataType::Object => unsafe { (*tv.pobj()).to_boolean() },
        DataType::Resource => true,
        DataType::Ref => unreachable!(),
    }
}

/// 算术用的数值；数组按是否为空得 0 / 1
pub fn cell_to_numeric(tv: &TypedValue) -> Numeric {
    let tv = tv_to_cell(tv);
    match tv.ty {
        DataType::Int64 => Numeric::Int(tv.num()),
        DataType::Double => Numeric::Double(tv.dbl()),
        DataType::PersistentString | DataType::String => unsafe { string_to_numeric((*tv.pstr()).as_bytes()) },
        DataType::Object => unsafe { Numeric::Int((*tv.pobj()).to_int64()) },
        DataType::Resource => unsafe { Numeric::Int((*tv.pres()).id()) },
        _ => Numeric::Int(cell_to_bool(tv) as i64),
    }
}

/// 转为整数，浮点截断
pub fn cell_to_int(tv: &TypedValue) -> i64 {
    match cell_to_numeric(tv) {
        Numeric::Int(i) => i,
        Numeric::Double(d) => double_to_int64(d),
    }
}

pub fn cell_to_double(tv: &TypedValue) -> f64 {
    cell_to_numeric(tv).to_double()
}

/// 字符串形式的字节；字符串值直接借用
///
/// 数组得到 "Array" 并发出警告，没有字符串转换能力的对象报错
pub fn cell_to_string_bytes(tv: &TypedValue) -> VmResult<Cow<'_, [u8]>> {
    let tv = tv_to_cell(tv);
    let bytes: Cow<'_, [u8]> = match tv.ty {
        DataType::Uninit | DataType::Null | DataType::Invalid => Cow::Borrowed(&b""[..]),
        DataType::Boolean => Cow::Borrowed(if tv.boolean() { &b"1"[..] } else { &b""[..] }),
        DataType::Int64 => Cow::Owned(tv.num().to_string().into_bytes()),
        DataType::Double => Cow::Owned(double_to_string(tv.dbl()).into_bytes()),
        DataType::PersistentString | DataType::String => Cow::Borrowed(unsafe { (*tv.pstr()).as_bytes() }),
        DataType::PersistentArray | DataType::Array => {
            raise_warning(WARN_ARRAY_TO_STRING, &[]);
            Cow::Borrowed(&b"Array"[..])
        }
        DataType::Object => Cow::Owned(unsafe { (*tv.pobj()).to_string()? }.into_bytes()),
        DataType::Resource => Cow::Owned(format!("Resource id #{}", unsafe { (*tv.pres()).id() }).into_bytes()),
        DataType::Ref => unreachable!(),
    };
    Ok(bytes)
}

/// 转为字符串容器，调用方持有返回值的一个引用
pub fn cell_to_string(tv: &TypedValue) -> VmResult<*mut StringData> {
    let cell = tv_to_cell(tv);
    if cell.is_string() {
        let s = cell.pstr();
        unsafe { (*s).hdr().inc_ref() };
        return Ok(s);
    }
    Ok(StringData::make(&cell_to_string_bytes(cell)?))
}

/// 转为 Rust 字符串（非 UTF-8 字节按替换字符处理）
pub fn cell_to_std_string(tv: &TypedValue) -> VmResult<String> {
    Ok(String::from_utf8_lossy(&cell_to_string_bytes(tv)?).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmError;
    use crate::runtime::diagnostics::take_diagnostics;
    use crate::vm::array::ArrayData;
    use crate::vm::object::{Class, ObjectData};
    use crate::vm::refcount::tv_dec_ref;
    use crate::vm::typed_value::*;

    #[test]
    fn test_scalars() {
        assert!(!cell_to_bool(&make_tv_null()));
        assert!(cell_to_bool(&make_tv_double(0.1)));
        assert_eq!(cell_to_int(&make_tv_double(-2.9)), -2);
        assert_eq!(cell_to_int(&make_tv_bool(true)), 1);
        assert_eq!(cell_to_double(&make_tv_int(3)), 3.0);
        let s = make_tv_string(StringData::make_static(b" 12.5kg"));
        assert_eq!(cell_to_numeric(&s), Numeric::Double(12.5));
        assert_eq!(cell_to_int(&s), 12);
        assert!(!cell_to_bool(&make_tv_string(StringData::make_static(b"0"))));
    }

    #[test]
    fn test_to_string() {
        assert_eq!(cell_to_std_string(&make_tv_int(-7)), Ok("-7".to_string()));
        assert_eq!(cell_to_std_string(&make_tv_double(0.5)), Ok("0.5".to_string()));
        assert_eq!(cell_to_std_string(&make_tv_bool(false)), Ok(String::new()));

        take_diagnostics();
        let arr = make_tv_array(ArrayData::static_empty());
        assert_eq!(cell_to_std_string(&arr), Ok("Array".to_string()));
        assert_eq!(take_diagnostics()[0].key, WARN_ARRAY_TO_STRING);

        let obj = make_tv_object(ObjectData::make(&Class::new("Opaque").build()));
        assert_eq!(
            cell_to_std_string(&obj),
            Err(VmError::ObjectToString { class: "Opaque".to_string() })
        );
        tv_dec_ref(obj);

        let s = cell_to_string(&make_tv_int(42)).unwrap();
        unsafe { assert_eq!((*s).as_bytes(), b"42") };
        tv_dec_ref(make_tv_string(s));
    }
}
