//! 数组排序
//!
//! 排序前先压缩掉墓碑，按扫描得到的比较方式重排元素，最后重建 hash 索引。
//! `sort` / `usort` 丢弃原有的键，重新从 0 编号；其余排序保留键值关联。

use std::cmp::Ordering;
use std::ptr;

use super::{escalate, ArrayData, Elm, Key};
use crate::vm::conversions::{cell_to_double, cell_to_string_bytes};
use crate::vm::datatype::DataType;
use crate::vm::numeric::string_compare;
use crate::vm::refcount::tv_dec_ref;
use crate::vm::tv_compare::tv_compare;
use crate::vm::tv_mutate::tv_to_cell;
use crate::vm::typed_value::{make_tv_string, TypedValue};

/// 比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortFlavor {
    /// 全部是整数
    Integer,
    /// 全部是字符串
    String,
    /// 混合类型，走通用比较
    Generic,
}

/// 排序标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortFlags {
    /// 按 PHP 宽松比较
    #[default]
    Regular,
    /// 转成数值后比较
    Numeric,
    /// 转成字符串后按字节比较
    String,
}

/// 扫描键或值，选出比较方式
fn pre_sort(ad: &ArrayData, by_key: bool) -> SortFlavor {
    let mut ints = true;
    let mut strs = true;
    for (key, v) in ad.elements() {
        if by_key {
            ints &= key.is_int();
            strs &= !key.is_int();
        } else {
            let ty = tv_to_cell(v).ty;
            ints &= ty == DataType::Int64;
            strs &= ty.is_string();
        }
        if !ints && !strs {
            return SortFlavor::Generic;
        }
    }
    if ints {
        SortFlavor::Integer
    } else {
        SortFlavor::String
    }
}

fn compare_by_flags(a: &TypedValue, b: &TypedValue, flavor: SortFlavor, flags: SortFlags) -> Ordering {
    let (a, b) = (tv_to_cell(a), tv_to_cell(b));
    match flags {
        SortFlags::Numeric => cell_to_double(a)
            .partial_cmp(&cell_to_double(b))
            .unwrap_or(Ordering::Equal),
        SortFlags::String => match (cell_to_string_bytes(a), cell_to_string_bytes(b)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        },
        SortFlags::Regular => match flavor {
            SortFlavor::Integer => a.num().cmp(&b.num()),
            SortFlavor::String => unsafe {
                string_compare((*a.pstr()).as_bytes(), (*b.pstr()).as_bytes()).unwrap_or(Ordering::Equal)
            },
            SortFlavor::Generic => tv_compare(a, b).unwrap_or(Ordering::Equal),
        },
    }
}

/// 稳定的归并排序
///
/// 比较函数可能不满足全序（用户回调、混合类型的宽松比较），不能依赖
/// 标准库排序对全序的假设
fn merge_sort(order: &mut [usize], cmp: &mut impl FnMut(usize, usize) -> Ordering) {
    let n = order.len();
    if n < 2 {
        return;
    }
    let mut buf = order.to_vec();
    let mut width = 1;
    while width < n {
        let mut lo = 0;
        while lo < n {
            let mid = (lo + width).min(n);
            let hi = (lo + 2 * width).min(n);
            let (mut i, mut j, mut k) = (lo, mid, lo);
            while i < mid && j < hi {
                if cmp(order[j], order[i]) == Ordering::Less {
                    buf[k] = order[j];
                    j += 1;
                } else {
                    buf[k] = order[i];
                    i += 1;
                }
                k += 1;
            }
            buf[k..k + mid - i].copy_from_slice(&order[i..mid]);
            k += mid - i;
            buf[k..k + hi - j].copy_from_slice(&order[j..hi]);
            lo = hi;
        }
        order.copy_from_slice(&buf);
        width *= 2;
    }
}

/// 通用排序流程：写时复制、压缩、重排、重建索引
///
/// # Safety
/// `ad` 有效且调用方持有一个引用
unsafe fn sort_impl(
    ad: *mut ArrayData,
    copy: bool,
    reset_keys: bool,
    mut cmp: impl FnMut(&Elm, &Elm) -> Ordering,
) -> *mut ArrayData {
    if (*ad).is_empty() || ((*ad).size() == 1 && !reset_keys) {
        return ad;
    }
    let a = escalate(ad, copy);
    (*a).compact(false);

    let n = (*a).size();
    let mut order: Vec<usize> = (0..n).collect();
    {
        let elms = (*a).elms();
        merge_sort(&mut order, &mut |x, y| cmp(&elms[x], &elms[y]));
    }

    // 按新顺序搬移元素，每个元素恰好读写一次
    let base = (*a).data;
    let mut moved: Vec<Elm> = Vec::with_capacity(n);
    for &i in &order {
        moved.push(ptr::read(base.add(i)));
    }
    ptr::copy_nonoverlapping(moved.as_ptr(), base, n);
    moved.set_len(0);

    post_sort(&mut *a, reset_keys);
    a
}

fn post_sort(ad: &mut ArrayData, reset_keys: bool) {
    if reset_keys {
        let mut released = Vec::new();
        for (i, e) in ad.elms_mut().iter_mut().enumerate() {
            if let Key::Str(s) = e.key() {
                released.push(s);
            }
            e.set_int_key(i as i64);
        }
        ad.next_ki = ad.size() as i64;
        ad.rebuild_hash();
        for s in released {
            tv_dec_ref(make_tv_string(s));
        }
    } else {
        ad.rebuild_hash();
    }
}

fn order(o: Ordering, ascending: bool) -> Ordering {
    if ascending {
        o
    } else {
        o.reverse()
    }
}

// ============================================================================
// 排序入口
// ============================================================================

impl ArrayData {
    /// 按值排序并重新编号
    ///
    /// # Safety
    /// `ad` 有效且调用方持有一个引用
    pub unsafe fn sort(ad: *mut ArrayData, flags: SortFlags, ascending: bool, copy: bool) -> *mut ArrayData {
        let flavor = pre_sort(&*ad, false);
        sort_impl(ad, copy, true, |a, b| order(compare_by_flags(&a.data, &b.data, flavor, flags), ascending))
    }

    /// 按值排序，保留键
    ///
    /// # Safety
    /// 同 `sort`
    pub unsafe fn asort(ad: *mut ArrayData, flags: SortFlags, ascending: bool, copy: bool) -> *mut ArrayData {
        let flavor = pre_sort(&*ad, false);
        sort_impl(ad, copy, false, |a, b| order(compare_by_flags(&a.data, &b.data, flavor, flags), ascending))
    }

    /// 按键排序
    ///
    /// # Safety
    /// 同 `sort`
    pub unsafe fn ksort(ad: *mut ArrayData, flags: SortFlags, ascending: bool, copy: bool) -> *mut ArrayData {
        let flavor = pre_sort(&*ad, true);
        sort_impl(ad, copy, false, |a, b| {
            let (ka, kb) = (a.key().to_tv(), b.key().to_tv());
            order(compare_by_flags(&ka, &kb, flavor, flags), ascending)
        })
    }

    /// 用户比较函数按值排序并重新编号
    ///
    /// # Safety
    /// 同 `sort`；回调不能修改正在排序的数组
    pub unsafe fn usort(
        ad: *mut ArrayData,
        mut cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering,
        copy: bool,
    ) -> *mut ArrayData {
        sort_impl(ad, copy, true, |a, b| cmp(&a.data, &b.data))
    }

    /// 用户比较函数按值排序，保留键
    ///
    /// # Safety
    /// 同 `usort`
    pub unsafe fn uasort(
        ad: *mut ArrayData,
        mut cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering,
        copy: bool,
    ) -> *mut ArrayData {
        sort_impl(ad, copy, false, |a, b| cmp(&a.data, &b.data))
    }

    /// 用户比较函数按键排序
    ///
    /// # Safety
    /// 同 `usort`
    pub unsafe fn uksort(
        ad: *mut ArrayData,
        mut cmp: impl FnMut(&TypedValue, &TypedValue) -> Ordering,
        copy: bool,
    ) -> *mut ArrayData {
        sort_impl(ad, copy, false, |a, b| cmp(&a.key().to_tv(), &b.key().to_tv()))
    }
}
