//! 线程与请求生命周期
//!
//! ```text
//! thread_init ─┬─ RequestScope::begin ... drop ─┬─ thread_exit
//!              └──────────── 重复 ───────────────┘
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use super::diagnostics;
use crate::config::HeapConfig;
use crate::mm::{with_heap, SlabPool};
use crate::vm::provenance;

/// 初始化当前工作线程：绑定 slab 池并应用配置
pub fn thread_init(config: HeapConfig, pool: Arc<SlabPool>) {
    diagnostics::set_locale(config.locale);
    provenance::set_enabled(config.array_provenance);
    log::debug!("worker thread init: {:?}", config);
    with_heap(|mm| mm.thread_init(config, pool));
}

/// 工作线程退出前调用，释放所有簿记
pub fn thread_exit() {
    provenance::clear_all();
    with_heap(|mm| mm.flush());
}

/// 一个请求的作用域，析构时整体回收请求堆
///
/// 析构前必须释放所有指向请求堆的值
pub struct RequestScope {
    // 请求堆是线程局部的
    _not_send: PhantomData<*const ()>,
}

impl RequestScope {
    pub fn begin() -> Self {
        with_heap(|mm| mm.reset_stats());
        Self { _not_send: PhantomData }
    }

    /// 当前请求的内存使用量
    pub fn usage(&self) -> i64 {
        with_heap(|mm| mm.stats().usage())
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        provenance::clear_all();
        with_heap(|mm| {
            mm.log_stats();
            mm.reset_request();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::HeaderKind;

    #[test]
    fn test_request_scope_resets_heap() {
        let pool = Arc::new(SlabPool::new(1));
        thread_init(HeapConfig::default(), pool.clone());
        {
            let scope = RequestScope::begin();
            with_heap(|mm| mm.obj_malloc(64, HeaderKind::String));
            assert_eq!(scope.usage(), 64);
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(with_heap(|mm| mm.stats().usage()), 0);
        thread_exit();
        assert!(with_heap(|mm| mm.heap().empty()));
    }
}
