//! 诊断输出
//!
//! PHP 警告不打断控制流：消息写入 `log`，同时记入线程局部缓冲区，
//! 由嵌入方在合适的时机取走

use std::cell::{Cell, RefCell};

use crate::i18n::{self, Locale};

/// 单条诊断记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 消息键（与语言无关）
    pub key: &'static str,
    /// 渲染后的消息
    pub message: String,
}

/// 缓冲区上限，超出后只写日志
const MAX_BUFFERED: usize = 1024;

thread_local! {
    static DIAGNOSTICS: RefCell<Vec<Diagnostic>> = const { RefCell::new(Vec::new()) };
    static LOCALE: Cell<Locale> = const { Cell::new(Locale::En) };
}

/// 设置当前线程的消息语言
pub fn set_locale(locale: Locale) {
    LOCALE.with(|l| l.set(locale));
}

/// 当前线程的消息语言
pub fn locale() -> Locale {
    LOCALE.with(|l| l.get())
}

/// 发出警告
pub fn raise_warning(key: &'static str, args: &[&str]) {
    let message = i18n::format_message(key, locale(), args);
    log::warn!("{}", message);
    let _ = DIAGNOSTICS.try_with(|d| {
        let mut d = d.borrow_mut();
        if d.len() < MAX_BUFFERED {
            d.push(Diagnostic { key, message });
        }
    });
}

/// 取走当前线程累积的诊断
pub fn take_diagnostics() -> Vec<Diagnostic> {
    DIAGNOSTICS.with(|d| std::mem::take(&mut *d.borrow_mut()))
}

/// 当前缓冲的诊断数量
pub fn pending_count() -> usize {
    DIAGNOSTICS.with(|d| d.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::messages::*;

    #[test]
    fn test_warning_is_buffered() {
        take_diagnostics();
        raise_warning(WARN_DIVISION_BY_ZERO, &[]);
        assert_eq!(pending_count(), 1);
        let diags = take_diagnostics();
        assert_eq!(diags[0].key, WARN_DIVISION_BY_ZERO);
        assert_eq!(diags[0].message, "Division by zero");
        assert_eq!(pending_count(), 0);
    }

    #[test]
    fn test_locale_switch() {
        take_diagnostics();
        set_locale(Locale::Zh);
        raise_warning(WARN_DIVISION_BY_ZERO, &[]);
        set_locale(Locale::En);
        assert_eq!(take_diagnostics()[0].message, "除数为零");
    }
}
