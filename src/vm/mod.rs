//! 值与容器
//!
//! 带类型标签的值、引用计数容器（字符串、数组、对象、资源、引用盒），
//! 以及值的读写、算术、比较与迭代操作

pub mod array;
pub mod conversions;
pub mod datatype;
pub mod iter;
pub mod numeric;
pub mod object;
pub mod provenance;
pub mod ref_data;
pub mod refcount;
pub mod resource;
pub mod string_data;
pub mod tv_arith;
pub mod tv_compare;
pub mod tv_mutate;
pub mod typed_value;
pub mod variant;

pub use array::{Array, ArrayData, Key, SortFlags};
pub use datatype::DataType;
pub use iter::{iterate_kv, iterate_v, ArrayIter, Iter, IterNextIndex};
pub use object::{Class, CollectionType, ObjectData, ObjectIterator};
pub use ref_data::RefData;
pub use resource::ResourceData;
pub use string_data::StringData;
pub use typed_value::{Cell, TypedValue};
pub use variant::Variant;
