//! 算术与位运算
//!
//! 操作数先转成数值（数字串按前缀解析，null/bool 转 0/1），两个整数
//! 溢出时结果改为浮点数。数组只能和数组做 `+`（键并集，左侧优先），
//! 其余组合抛出 `BadArrayOperand`。除零与模零发出警告并得到 `false`。

use crate::error::{VmError, VmResult};
use crate::i18n::messages::WARN_DIVISION_BY_ZERO;
use crate::runtime::diagnostics::raise_warning;
use crate::vm::array::{Array, ArrayData};
use crate::vm::conversions::{cell_to_int, cell_to_numeric};
use crate::vm::numeric::Numeric;
use crate::vm::string_data::StringData;
use crate::vm::tv_mutate::{tv_move, tv_to_cell};
use crate::vm::typed_value::{make_tv_array, make_tv_bool, make_tv_double, make_tv_int, make_tv_string, TypedValue};
use crate::vm::variant::Variant;

fn numeric_value(n: Numeric) -> Variant {
    match n {
        Numeric::Int(i) => Variant::attach(make_tv_int(i)),
        Numeric::Double(d) => Variant::attach(make_tv_double(d)),
    }
}

fn division_by_zero() -> Variant {
    raise_warning(WARN_DIVISION_BY_ZERO, &[]);
    Variant::attach(make_tv_bool(false))
}

/// 任一侧是数组时报错
fn reject_arrays(a: &TypedValue, b: &TypedValue) -> VmResult<()> {
    if a.is_array() || b.is_array() {
        return Err(VmError::BadArrayOperand);
    }
    Ok(())
}

fn int_op(
    a: &TypedValue,
    b: &TypedValue,
    checked: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> VmResult<Variant> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    reject_arrays(a, b)?;
    let n = match (cell_to_numeric(a), cell_to_numeric(b)) {
        (Numeric::Int(x), Numeric::Int(y)) => match checked(x, y) {
            Some(r) => Numeric::Int(r),
            None => Numeric::Double(float(x as f64, y as f64)),
        },
        (x, y) => Numeric::Double(float(x.to_double(), y.to_double())),
    };
    Ok(numeric_value(n))
}

// ============================================================================
// 算术
// ============================================================================

/// `a + b`
pub fn tv_add(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    let (ca, cb) = (tv_to_cell(a), tv_to_cell(b));
    if ca.is_array() && cb.is_array() {
        let mut sum = Array::from_ptr(ca.parr());
        sum.plus(&Array::from_ptr(cb.parr()));
        return Ok(Variant::from(sum));
    }
    int_op(a, b, i64::checked_add, |x, y| x + y)
}

/// `a - b`
pub fn tv_sub(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    int_op(a, b, i64::checked_sub, |x, y| x - y)
}

/// `a * b`
pub fn tv_mul(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    int_op(a, b, i64::checked_mul, |x, y| x * y)
}

/// `a / b`：整除时为整数，否则为浮点数
pub fn tv_div(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    reject_arrays(a, b)?;
    let n = match (cell_to_numeric(a), cell_to_numeric(b)) {
        (_, Numeric::Int(0)) => return Ok(division_by_zero()),
        (_, Numeric::Double(y)) if y == 0.0 => return Ok(division_by_zero()),
        (Numeric::Int(i64::MIN), Numeric::Int(-1)) => Numeric::Double(-(i64::MIN as f64)),
        (Numeric::Int(x), Numeric::Int(y)) if x % y == 0 => Numeric::Int(x / y),
        (x, y) => Numeric::Double(x.to_double() / y.to_double()),
    };
    Ok(numeric_value(n))
}

/// `a % b`：两侧先截断为整数
pub fn tv_mod(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    reject_arrays(a, b)?;
    let (x, y) = (cell_to_int(a), cell_to_int(b));
    let r = match y {
        0 => return Ok(division_by_zero()),
        -1 => 0,
        _ => x % y,
    };
    Ok(Variant::attach(make_tv_int(r)))
}

// ============================================================================
// 位运算
// ============================================================================

/// 字符串按字节运算的结果长度
#[derive(Clone, Copy)]
enum LengthPolicy {
    Shorter,
    Longer,
}

fn bitwise(
    a: &TypedValue,
    b: &TypedValue,
    policy: LengthPolicy,
    op: fn(u8, u8) -> u8,
    int: fn(i64, i64) -> i64,
) -> VmResult<Variant> {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    reject_arrays(a, b)?;
    if a.is_string() && b.is_string() {
        let (x, y) = unsafe { ((*a.pstr()).as_bytes(), (*b.pstr()).as_bytes()) };
        let len = match policy {
            LengthPolicy::Shorter => x.len().min(y.len()),
            LengthPolicy::Longer => x.len().max(y.len()),
        };
        let bytes: Vec<u8> = (0..len)
            .map(|i| op(x.get(i).copied().unwrap_or(0), y.get(i).copied().unwrap_or(0)))
            .collect();
        return Ok(Variant::attach(make_tv_string(StringData::make(&bytes))));
    }
    Ok(Variant::attach(make_tv_int(int(cell_to_int(a), cell_to_int(b)))))
}

/// `a & b`
pub fn tv_bit_and(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    bitwise(a, b, LengthPolicy::Shorter, |x, y| x & y, |x, y| x & y)
}

/// `a | b`：字符串取较长者，短的一侧补零
pub fn tv_bit_or(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    bitwise(a, b, LengthPolicy::Longer, |x, y| x | y, |x, y| x | y)
}

/// `a ^ b`
pub fn tv_bit_xor(a: &TypedValue, b: &TypedValue) -> VmResult<Variant> {
    bitwise(a, b, LengthPolicy::Shorter, |x, y| x ^ y, |x, y| x ^ y)
}

// ============================================================================
// 复合赋值
// ============================================================================

/// 结果写回 `to`（跟随引用盒），旧值最后释放
fn compound(
    to: &mut TypedValue,
    b: &TypedValue,
    op: fn(&TypedValue, &TypedValue) -> VmResult<Variant>,
) -> VmResult<()> {
    let result = op(to, b)?;
    tv_move(result.detach(), to);
    Ok(())
}

/// `a += b`；两侧都是数组时原地合并（唯一持有时不复制）
pub fn tv_add_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    let cell = *tv_to_cell(to);
    let rhs = tv_to_cell(b);
    if cell.is_array() && rhs.is_array() {
        let ad = cell.parr();
        let new = unsafe { ArrayData::plus(ad, rhs.parr(), false) };
        if new != ad {
            tv_move(make_tv_array(new), to);
        }
        return Ok(());
    }
    compound(to, b, tv_add)
}

pub fn tv_sub_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_sub)
}

pub fn tv_mul_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_mul)
}

pub fn tv_div_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_div)
}

pub fn tv_mod_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_mod)
}

pub fn tv_bit_and_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_bit_and)
}

pub fn tv_bit_or_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_bit_or)
}

pub fn tv_bit_xor_eq(to: &mut TypedValue, b: &TypedValue) -> VmResult<()> {
    compound(to, b, tv_bit_xor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::diagnostics::take_diagnostics;
    use crate::vm::datatype::DataType;

    fn int(i: i64) -> TypedValue {
        make_tv_int(i)
    }

    #[test]
    fn test_division() {
        let r = tv_div(&int(7), &int(2)).unwrap();
        assert_eq!(r.ty(), DataType::Double);
        assert_eq!(r.to_double(), 3.5);

        let r = tv_div(&int(6), &int(2)).unwrap();
        assert_eq!(r.ty(), DataType::Int64);
        assert_eq!(r.to_int64(), 3);

        take_diagnostics();
        let r = tv_div(&int(5), &int(0)).unwrap();
        assert_eq!(r, Variant::from(false));
        assert_eq!(take_diagnostics()[0].key, WARN_DIVISION_BY_ZERO);

        let r = tv_div(&int(i64::MIN), &int(-1)).unwrap();
        assert_eq!(r.ty(), DataType::Double);
        assert_eq!(r.to_double(), -(i64::MIN as f64));
    }

    #[test]
    fn test_modulo() {
        assert_eq!(tv_mod(&int(i64::MIN), &int(-1)).unwrap(), Variant::from(0));
        assert_eq!(tv_mod(&int(-7), &int(3)).unwrap(), Variant::from(-1));
        assert_eq!(tv_mod(&make_tv_double(7.9), &int(4)).unwrap(), Variant::from(3));
        take_diagnostics();
        assert_eq!(tv_mod(&int(1), &int(0)).unwrap(), Variant::from(false));
        assert_eq!(take_diagnostics().len(), 1);
    }

    #[test]
    fn test_overflow_promotes() {
        let r = tv_add(&int(i64::MAX), &int(1)).unwrap();
        assert_eq!(r.ty(), DataType::Double);
        let r = tv_mul(&int(i64::MAX), &int(2)).unwrap();
        assert_eq!(r.ty(), DataType::Double);
        let r = tv_sub(&int(5), &int(7)).unwrap();
        assert_eq!(r, Variant::from(-2));
    }

    #[test]
    fn test_string_operands() {
        let s = Variant::from("1.5");
        let r = tv_add(s.as_tv(), &int(1)).unwrap();
        assert_eq!(r, Variant::from(2.5));
        let r = tv_mul(Variant::from("3 apples").as_tv(), &int(2)).unwrap();
        assert_eq!(r, Variant::from(6));
        let r = tv_add(&make_tv_bool(true), &crate::vm::typed_value::make_tv_null()).unwrap();
        assert_eq!(r, Variant::from(1));
    }

    #[test]
    fn test_array_plus() {
        let mut l = Array::new();
        l.set("a", 1);
        let mut r = Array::new();
        r.set("a", 2);
        r.set("b", 3);
        let sum = tv_add(&l.to_tv(), &r.to_tv()).unwrap();
        let sum = sum.to_array().unwrap();
        assert_eq!(sum.len(), 2);
        assert_eq!(sum.get("a"), Some(Variant::from(1)));
        assert_eq!(sum.get("b"), Some(Variant::from(3)));
        // 原数组不变
        assert_eq!(l.len(), 1);

        assert_eq!(tv_sub(&l.to_tv(), &r.to_tv()).err(), Some(VmError::BadArrayOperand));
        assert_eq!(tv_add(&l.to_tv(), &int(1)).err(), Some(VmError::BadArrayOperand));
    }

    #[test]
    fn test_bitwise_strings() {
        let a = Variant::from("ab");
        let b = Variant::from("a");
        let and = tv_bit_and(a.as_tv(), b.as_tv()).unwrap();
        assert_eq!(and.to_string(), Ok("a".to_string()));
        let or = tv_bit_or(a.as_tv(), b.as_tv()).unwrap();
        assert_eq!(or.to_string(), Ok("ab".to_string()));
        let xor = tv_bit_xor(a.as_tv(), b.as_tv()).unwrap();
        assert_eq!(xor.to_string(), Ok("\0".to_string()));
        assert_eq!(tv_bit_or(&int(4), &int(1)).unwrap(), Variant::from(5));
        assert_eq!(tv_bit_xor(Variant::from("6").as_tv(), &int(3)).unwrap(), Variant::from(5));
    }

    #[test]
    fn test_compound() {
        let mut slot = Variant::from(10);
        tv_sub_eq(slot.as_tv_mut(), &int(4)).unwrap();
        assert_eq!(slot, Variant::from(6));
        tv_div_eq(slot.as_tv_mut(), &int(4)).unwrap();
        assert_eq!(slot, Variant::from(1.5));

        let mut arr = Variant::from(Array::from_values([1]));
        let before = arr.as_tv().parr();
        let mut extra = Array::new();
        extra.set(1, 2);
        tv_add_eq(arr.as_tv_mut(), &extra.to_tv()).unwrap();
        assert_eq!(arr.as_tv().parr(), before);
        assert_eq!(arr.to_array().map(|a| a.len()), Some(2));
    }
}
