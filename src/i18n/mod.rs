//! 国际化模块
//!
//! 警告与错误消息的多语言支持，目前支持英文和中文

pub mod messages;
pub mod en;
pub mod zh;

/// 支持的语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    /// 英文（默认）
    #[default]
    En,
    /// 中文
    Zh,
}

/// 获取指定语言的消息
pub fn get_message(key: &str, locale: Locale) -> &'static str {
    match locale {
        Locale::En => en::get(key),
        Locale::Zh => zh::get(key),
    }
}

/// 获取带参数的消息（使用 {} 占位符）
pub fn format_message(key: &str, locale: Locale, args: &[&str]) -> String {
    let template = get_message(key, locale);
    let mut msg = String::with_capacity(template.len());
    let mut rest = template;
    let mut args = args.iter();
    while let Some(pos) = rest.find("{}") {
        msg.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => msg.push_str(arg),
            None => msg.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    msg.push_str(rest);
    msg
}
