//! 对象
//!
//! 对象由类描述符决定能力：字符串转换、析构函数、迭代器协议、
//! 集合类型。属性存放在一个普通的 `ArrayData` 中；集合对象的元素也
//! 放在这里。

use std::cell::Cell;
use std::fmt;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::mm::{try_with_heap, with_heap, HeaderKind, HeapObject};
use crate::vm::array::{Array, ArrayData, ToArrayKey};
use crate::vm::refcount::tv_dec_ref;
use crate::vm::typed_value::make_tv_array;
use crate::vm::variant::Variant;

/// 头部 aux8：析构函数已经运行
const FLAG_DESTRUCTED: u8 = 0x1;

thread_local! {
    static NEXT_OBJECT_ID: Cell<u32> = const { Cell::new(1) };
}

/// 集合类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Vector,
    Map,
    Set,
    Pair,
}

impl CollectionType {
    /// 有序比较：`Vector` / `Pair` 要求元素顺序一致
    pub fn is_ordered(self) -> bool {
        matches!(self, CollectionType::Vector | CollectionType::Pair)
    }
}

/// 用户级 `Iterator` 协议
///
/// 实现挂在类上，由该类的所有实例共享；游标必须存在对象自身
/// （`ObjectData::iter_state` 或属性）中，嵌套遍历同类的两个实例才互不干扰
pub trait ObjectIterator {
    fn rewind(&self, obj: &ObjectData);
    fn valid(&self, obj: &ObjectData) -> bool;
    fn current(&self, obj: &ObjectData) -> Variant;
    fn key(&self, obj: &ObjectData) -> Variant;
    fn next(&self, obj: &ObjectData);
}

pub type ToStringFn = Box<dyn Fn(&ObjectData) -> String>;
pub type DestructorFn = Box<dyn Fn(&ObjectData)>;
/// `IteratorAggregate::getIterator`
pub type GetIteratorFn = Box<dyn Fn(&ObjectData) -> Variant>;

// ============================================================================
// 类描述符
// ============================================================================

/// 类
pub struct Class {
    name: String,
    collection: Option<CollectionType>,
    to_string: Option<ToStringFn>,
    destructor: Option<DestructorFn>,
    iterator: Option<Box<dyn ObjectIterator>>,
    get_iterator: Option<GetIteratorFn>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            to_string: None,
            destructor: None,
            iterator: None,
            get_iterator: None,
        }
    }

    pub fn with_collection(mut self, kind: CollectionType) -> Self {
        self.collection = Some(kind);
        self
    }

    pub fn with_to_string(mut self, f: impl Fn(&ObjectData) -> String + 'static) -> Self {
        self.to_string = Some(Box::new(f));
        self
    }

    pub fn with_destructor(mut self, f: impl Fn(&ObjectData) + 'static) -> Self {
        self.destructor = Some(Box::new(f));
        self
    }

    pub fn with_iterator(mut self, it: impl ObjectIterator + 'static) -> Self {
        self.iterator = Some(Box::new(it));
        self
    }

    pub fn with_get_iterator(mut self, f: impl Fn(&ObjectData) -> Variant + 'static) -> Self {
        self.get_iterator = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Rc<Class> {
        Rc::new(self)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn collection(&self) -> Option<CollectionType> {
        self.collection
    }

    #[inline]
    pub fn has_to_string(&self) -> bool {
        self.to_string.is_some()
    }

    #[inline]
    pub fn iterator(&self) -> Option<&dyn ObjectIterator> {
        self.iterator.as_deref()
    }

    #[inline]
    pub fn get_iterator(&self) -> Option<&GetIteratorFn> {
        self.get_iterator.as_ref()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("to_string", &self.to_string.is_some())
            .field("destructor", &self.destructor.is_some())
            .field("iterator", &self.iterator.is_some())
            .finish()
    }
}

// ============================================================================
// 对象
// ============================================================================

#[repr(C)]
pub struct ObjectData {
    hdr: HeapObject,
    id: u32,
    props: Cell<*mut ArrayData>,
    /// `ObjectIterator` 的游标槽位
    iter_state: Cell<i64>,
    class: Rc<Class>,
}

impl ObjectData {
    /// 新对象，计数为 1
    pub fn make(class: &Rc<Class>) -> *mut ObjectData {
        Self::make_with_props(class, ArrayData::static_empty())
    }

    /// 集合对象，接管 `elements` 的引用作为元素存储
    pub fn make_collection(class: &Rc<Class>, elements: Array) -> *mut ObjectData {
        debug_assert!(class.collection.is_some());
        Self::make_with_props(class, elements.detach())
    }

    fn make_with_props(class: &Rc<Class>, props: *mut ArrayData) -> *mut ObjectData {
        let id = NEXT_OBJECT_ID.with(|n| {
            let id = n.get();
            n.set(id.wrapping_add(1));
            id
        });
        let hdr = with_heap(|mm| mm.obj_malloc(size_of::<ObjectData>(), HeaderKind::Object));
        let obj = hdr.as_ptr() as *mut ObjectData;
        unsafe {
            ptr::addr_of_mut!((*obj).id).write(id);
            ptr::addr_of_mut!((*obj).props).write(Cell::new(props));
            ptr::addr_of_mut!((*obj).iter_state).write(Cell::new(0));
            ptr::addr_of_mut!((*obj).class).write(Rc::clone(class));
        }
        obj
    }

    #[inline]
    pub fn hdr(&self) -> &HeapObject {
        &self.hdr
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn class(&self) -> &Class {
        &self.class
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    #[inline]
    pub fn is_collection(&self) -> bool {
        self.class.collection.is_some()
    }

    #[inline]
    pub fn collection_type(&self) -> Option<CollectionType> {
        self.class.collection
    }

    /// 属性表（集合对象为元素表）
    #[inline]
    pub fn props(&self) -> &ArrayData {
        unsafe { &*self.props.get() }
    }

    pub fn get_prop(&self, name: impl ToArrayKey) -> Option<Variant> {
        let k = name.to_array_key()?;
        self.props().nv_get(k.key()).map(Variant::from_tv)
    }

    #[inline]
    pub fn iter_state(&self) -> i64 {
        self.iter_state.get()
    }

    #[inline]
    pub fn set_iter_state(&self, state: i64) {
        self.iter_state.set(state);
    }

    pub fn set_prop(&self, name: impl ToArrayKey, v: impl Into<Variant>) {
        let Some(k) = name.to_array_key() else { return };
        let v = v.into();
        let old = self.props.get();
        let new = unsafe { ArrayData::set(old, k.key(), v.as_tv(), false) };
        if new != old {
            self.props.set(new);
            tv_dec_ref(make_tv_array(old));
        }
    }

    // ========================================================================
    // 转换
    // ========================================================================

    pub fn to_string(&self) -> VmResult<String> {
        match &self.class.to_string {
            Some(f) => Ok(f(self)),
            None => Err(VmError::ObjectToString { class: self.class.name.clone() }),
        }
    }

    /// 集合按是否为空，其余对象恒为真
    pub fn to_boolean(&self) -> bool {
        !self.is_collection() || !self.props().is_empty()
    }

    pub fn to_int64(&self) -> i64 {
        1
    }

    pub fn to_double(&self) -> f64 {
        1.0
    }

    // ========================================================================
    // 释放
    // ========================================================================

    /// 计数归零后释放
    ///
    /// 析构函数运行期间计数固定为 1；析构函数让对象重新被引用（复活）时
    /// 不释放，等下次归零再走一次，此时不再调用析构函数
    ///
    /// # Safety
    /// 计数已经归零
    pub unsafe fn release(obj: *mut ObjectData) {
        let o = &*obj;
        if let Some(dtor) = &o.class.destructor {
            if o.hdr.aux8() & FLAG_DESTRUCTED == 0 {
                o.hdr.set_aux8(o.hdr.aux8() | FLAG_DESTRUCTED);
                o.hdr.set_count(1);
                log::trace!("running destructor of {}#{}", o.class.name, o.id);
                dtor(o);
                if !o.hdr.dec_ref_and_check() {
                    return;
                }
            }
        }

        let props = o.props.replace(ArrayData::static_empty());
        ptr::drop_in_place(ptr::addr_of_mut!((*obj).class));
        let hdr = NonNull::new_unchecked(obj as *mut HeapObject);
        try_with_heap(|mm| mm.obj_free(hdr));
        tv_dec_ref(make_tv_array(props));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::refcount::tv_inc_ref;
    use crate::vm::typed_value::{make_tv_object, TypedValue};
    use std::cell::RefCell;

    #[test]
    fn test_props_and_to_string() {
        let class = Class::new("Point")
            .with_to_string(|o| {
                let coord = |name: &str| o.get_prop(name).map_or(0, |v| v.to_int64());
                format!("({}, {})", coord("x"), coord("y"))
            })
            .build();
        let obj = ObjectData::make(&class);
        unsafe {
            (*obj).set_prop("x", 3);
            (*obj).set_prop("y", 4);
            assert_eq!((*obj).to_string(), Ok("(3, 4)".to_string()));
            assert_eq!((*obj).props().size(), 2);
        }
        tv_dec_ref(make_tv_object(obj));

        let plain = ObjectData::make(&Class::new("Plain").build());
        unsafe {
            assert_eq!(
                (*plain).to_string(),
                Err(VmError::ObjectToString { class: "Plain".to_string() })
            );
        }
        tv_dec_ref(make_tv_object(plain));
    }

    #[test]
    fn test_destructor_runs_once() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let class = Class::new("D").with_destructor(move |_| c.set(c.get() + 1)).build();
        let obj = ObjectData::make(&class);
        tv_dec_ref(make_tv_object(obj));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_resurrection_skips_free() {
        let saved: Rc<RefCell<Option<TypedValue>>> = Rc::new(RefCell::new(None));
        let s = Rc::clone(&saved);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let class = Class::new("Phoenix")
            .with_destructor(move |o| {
                c.set(c.get() + 1);
                let tv = make_tv_object(o as *const ObjectData as *mut ObjectData);
                tv_inc_ref(&tv);
                *s.borrow_mut() = Some(tv);
            })
            .build();
        let obj = ObjectData::make(&class);
        tv_dec_ref(make_tv_object(obj));
        assert_eq!(calls.get(), 1);
        let tv = saved.borrow_mut().take();
        let Some(tv) = tv else { panic!("object was not resurrected") };
        unsafe { assert_eq!((*tv.pobj()).hdr().count(), 1) };
        tv_dec_ref(tv);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_collection_truthiness() {
        let vector = Class::new("Vector").with_collection(CollectionType::Vector).build();
        let empty = ObjectData::make_collection(&vector, Array::new());
        let full = ObjectData::make_collection(&vector, Array::from_values([1]));
        unsafe {
            assert!(!(*empty).to_boolean());
            assert!((*full).to_boolean());
            assert_eq!((*full).collection_type(), Some(CollectionType::Vector));
        }
        tv_dec_ref(make_tv_object(empty));
        tv_dec_ref(make_tv_object(full));
    }
}
