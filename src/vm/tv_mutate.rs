//! 值槽的读写操作
//!
//! 所有对槽的写入都经过这里，保证计数正确：
//! - `copy`：按位复制，不改计数
//! - `dup`：复制并加计数
//! - `move`：写入后递减旧值，不加计数（所有权转入）
//! - `set`：`dup` + 递减旧值
//!
//! 递减旧值必须是最后一步：它可能触发析构，析构函数可以任意修改堆，
//! 包括这个槽本身。带 `_ignore_ref` 后缀的版本直接覆盖槽，不跟随引用盒；
//! 其余版本在目标是引用盒时写入盒内。
//!
//! 写入保留目标槽的辅助字（数组元素用它存键的信息）。

use crate::vm::datatype::DataType;
use crate::vm::ref_data::RefData;
use crate::vm::refcount::{tv_dec_ref, tv_inc_ref};
use crate::vm::typed_value::{make_tv_null, make_tv_ref, make_tv_uninit, TypedValue};

/// 解开引用盒
#[inline]
pub fn tv_to_cell(tv: &TypedValue) -> &TypedValue {
    if tv.ty == DataType::Ref {
        unsafe { (*tv.pref()).tv() }
    } else {
        tv
    }
}

/// 可写入的单元：引用盒时为盒内的槽
#[inline]
fn cell_slot(to: &mut TypedValue) -> *mut TypedValue {
    if to.ty == DataType::Ref {
        unsafe { (*to.pref()).tv_ptr() }
    } else {
        to as *mut TypedValue
    }
}

#[inline]
fn write(to: *mut TypedValue, from: &TypedValue) {
    unsafe { (*to).set_value(from.data(), from.ty) };
}

/// 按位复制；`to` 必须是死槽
#[inline]
pub fn tv_copy(from: &TypedValue, to: &mut TypedValue) {
    to.set_value(from.data(), from.ty);
}

/// 复制并加计数；`to` 必须是死槽
#[inline]
pub fn tv_dup(from: &TypedValue, to: &mut TypedValue) {
    tv_copy(from, to);
    tv_inc_ref(from);
}

/// 所有权转入活槽（跟随引用盒）
pub fn tv_move(from: TypedValue, to: &mut TypedValue) {
    let slot = cell_slot(to);
    let old = unsafe { *slot };
    write(slot, &from);
    tv_dec_ref(old);
}

/// 所有权转入活槽，不跟随引用盒
pub fn tv_move_ignore_ref(from: TypedValue, to: &mut TypedValue) {
    let old = *to;
    tv_copy(&from, to);
    tv_dec_ref(old);
}

/// 赋值到活槽（跟随引用盒）；`from` 是引用盒时取盒内的值
pub fn tv_set(from: &TypedValue, to: &mut TypedValue) {
    let from = *tv_to_cell(from);
    tv_inc_ref(&from);
    tv_move(from, to);
}

/// 赋值到活槽，不跟随引用盒
pub fn tv_set_ignore_ref(from: &TypedValue, to: &mut TypedValue) {
    tv_inc_ref(from);
    tv_move_ignore_ref(*from, to);
}

/// 置为未初始化
pub fn tv_unset(to: &mut TypedValue) {
    tv_move_ignore_ref(make_tv_uninit(), to);
}

/// 置为 null（跟随引用盒）
pub fn tv_set_null(to: &mut TypedValue) {
    tv_move(make_tv_null(), to);
}

/// 交换两个活槽，计数不变
pub fn tv_swap(a: &mut TypedValue, b: &mut TypedValue) {
    let (x, y) = (*a, *b);
    tv_copy(&y, a);
    tv_copy(&x, b);
}

/// 装箱：槽内的值移入新的引用盒，槽改为指向盒子；已是引用盒时不变
pub fn tv_box(to: &mut TypedValue) {
    if to.ty == DataType::Ref {
        return;
    }
    let mut inner = *to;
    inner.set_aux(0);
    let r = RefData::make_owned(inner);
    tv_copy(&make_tv_ref(r), to);
}

/// 拆箱：槽改为盒内值的一份复制，释放槽对盒子的引用
pub fn tv_unbox(to: &mut TypedValue) {
    if to.ty != DataType::Ref {
        return;
    }
    let boxed = *to;
    let inner = *tv_to_cell(&boxed);
    tv_dup(&inner, to);
    tv_dec_ref(boxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::{Class, ObjectData};
    use crate::vm::refcount::tv_refcount;
    use crate::vm::string_data::StringData;
    use crate::vm::typed_value::{make_tv_int, make_tv_object, make_tv_string};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_refcount_conservation() {
        let s = make_tv_string(StringData::make(b"shared"));
        let mut a = make_tv_uninit();
        let mut b = make_tv_uninit();
        tv_dup(&s, &mut a);
        tv_set(&s, &mut b);
        assert_eq!(tv_refcount(&s), Some(3));

        tv_set(&make_tv_int(1), &mut a);
        assert_eq!(tv_refcount(&s), Some(2));
        tv_unset(&mut b);
        assert_eq!(tv_refcount(&s), Some(1));
        assert!(!b.is_init());

        // 按位复制转移所有权，之后由 `c` 负责释放
        let mut c = make_tv_uninit();
        tv_copy(&s, &mut c);
        tv_move(make_tv_int(9), &mut c);
        assert_eq!(c.num(), 9);
    }

    #[test]
    fn test_ref_following() {
        let mut slot = make_tv_int(1);
        tv_box(&mut slot);
        assert!(slot.is_ref());
        let mut alias = make_tv_uninit();
        tv_dup(&slot, &mut alias);

        tv_set(&make_tv_int(5), &mut alias);
        assert_eq!(tv_to_cell(&slot).num(), 5);

        // 不跟随引用盒的写入只断开自己
        tv_set_ignore_ref(&make_tv_int(7), &mut alias);
        assert_eq!(alias.num(), 7);
        assert_eq!(tv_to_cell(&slot).num(), 5);

        tv_unbox(&mut slot);
        assert_eq!(slot.ty, DataType::Int64);
        assert_eq!(slot.num(), 5);
    }

    #[test]
    fn test_set_null_and_swap() {
        let mut a = make_tv_int(1);
        let mut b = make_tv_string(StringData::make_static(b"b"));
        tv_swap(&mut a, &mut b);
        assert!(a.is_string());
        assert_eq!(b.num(), 1);
        tv_set_null(&mut b);
        assert!(b.is_null());
    }

    #[test]
    fn test_preserves_aux() {
        let mut slot = make_tv_int(1);
        slot.set_aux(0x1234);
        tv_set(&make_tv_int(2), &mut slot);
        assert_eq!(slot.aux(), 0x1234);
    }

    #[test]
    fn test_old_value_released_after_write() {
        // 旧值的析构函数在新值写入之后才运行
        let slot: Rc<RefCell<TypedValue>> = Rc::new(RefCell::new(make_tv_uninit()));
        let seen = Rc::new(Cell::new(false));
        let (s, f) = (Rc::clone(&slot), Rc::clone(&seen));
        let class = Class::new("Writer")
            .with_destructor(move |_| {
                f.set(true);
                if let Ok(mut slot) = s.try_borrow_mut() {
                    *slot = make_tv_int(99);
                }
            })
            .build();
        let obj = make_tv_object(ObjectData::make(&class));
        let mut local = obj;
        tv_set(&make_tv_int(1), &mut local);
        assert!(seen.get());
        assert_eq!(local.num(), 1);
        assert_eq!(slot.borrow().num(), 99);
    }
}
