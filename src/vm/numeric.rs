//! 数字字符串
//!
//! 数字字符串：可选前导空白、可选符号、十进制数字（可带小数点与指数），
//! 可选尾随空白。整数溢出时按浮点数处理

use std::cmp::Ordering;

/// 数值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Double(f64),
}

impl Numeric {
    #[inline]
    pub fn to_double(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Double(d) => d,
        }
    }

    /// 数值比较；NaN 参与时无序
    pub fn compare(self, other: Numeric) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_double().partial_cmp(&b.to_double()),
        }
    }
}

#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// 解析开头的数字部分，返回数值以及是否整个字符串都是数字
pub fn parse_numeric_prefix(s: &[u8]) -> Option<(Numeric, bool)> {
    let mut i = 0;
    while i < s.len() && is_space(s[i]) {
        i += 1;
    }
    let start = i;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }

    let int_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    let mut is_double = false;

    if i < s.len() && s[i] == b'.' {
        let mut j = i + 1;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        let frac = j - i - 1;
        if digits + frac > 0 {
            digits += frac;
            is_double = true;
            i = j;
        }
    }
    if digits == 0 {
        return None;
    }

    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        let mut j = i + 1;
        if j < s.len() && (s[j] == b'+' || s[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_double = true;
            i = j;
        }
    }

    // 只含 ASCII，可以安全转换
    let text = std::str::from_utf8(&s[start..i]).ok()?;
    let value = if is_double {
        Numeric::Double(text.parse::<f64>().ok()?)
    } else {
        match text.parse::<i64>() {
            Ok(n) => Numeric::Int(n),
            Err(_) => Numeric::Double(text.parse::<f64>().ok()?),
        }
    };

    let mut end = i;
    while end < s.len() && is_space(s[end]) {
        end += 1;
    }
    Some((value, end == s.len()))
}

/// 完整的数字字符串
pub fn is_numeric_string(s: &[u8]) -> Option<Numeric> {
    match parse_numeric_prefix(s) {
        Some((n, true)) => Some(n),
        _ => None,
    }
}

/// 算术用的转换：取数字前缀，没有则为 0
pub fn string_to_numeric(s: &[u8]) -> Numeric {
    parse_numeric_prefix(s).map_or(Numeric::Int(0), |(n, _)| n)
}

pub fn string_to_int64(s: &[u8]) -> i64 {
    match string_to_numeric(s) {
        Numeric::Int(i) => i,
        Numeric::Double(d) => double_to_int64(d),
    }
}

pub fn string_to_double(s: &[u8]) -> f64 {
    string_to_numeric(s).to_double()
}

/// 浮点转整数：截断，非有限值或越界得 0
pub fn double_to_int64(d: f64) -> i64 {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !d.is_finite() || d >= LIMIT || d < -LIMIT {
        return 0;
    }
    d as i64
}

/// 规范十进制整数串
///
/// 不允许 `+`、前导零（"0" 本身除外）、"-0"，必须在 i64 范围内
pub fn strictly_integer(s: &[u8]) -> Option<i64> {
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() || digits.len() > 19 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits[0] == b'0' && (digits.len() > 1 || neg) {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    text.parse::<i64>().ok()
}

/// 浮点数的字符串形式（精度 14，`%G` 风格）
pub fn double_to_string(d: f64) -> String {
    if d.is_nan() {
        return "NAN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    const PRECISION: i32 = 14;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, d);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= PRECISION {
        let mut m = trim_fraction(mantissa).to_string();
        if !m.contains('.') {
            m.push_str(".0");
        }
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}E{}{}", m, sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, d)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// 字符串比较：两边都是数字串时按数值，否则按字节
pub fn string_compare(a: &[u8], b: &[u8]) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (is_numeric_string(a), is_numeric_string(b)) {
        return x.compare(y);
    }
    Some(a.cmp(b))
}

pub fn string_equal(a: &[u8], b: &[u8]) -> bool {
    string_compare(a, b) == Some(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(parse_numeric_prefix(b"42"), Some((Numeric::Int(42), true)));
        assert_eq!(parse_numeric_prefix(b"  -7 "), Some((Numeric::Int(-7), true)));
        assert_eq!(parse_numeric_prefix(b"1.5abc"), Some((Numeric::Double(1.5), false)));
        assert_eq!(parse_numeric_prefix(b".5"), Some((Numeric::Double(0.5), true)));
        assert_eq!(parse_numeric_prefix(b"1e3"), Some((Numeric::Double(1000.0), true)));
        assert_eq!(parse_numeric_prefix(b"1e"), Some((Numeric::Int(1), false)));
        assert_eq!(parse_numeric_prefix(b"abc"), None);
        assert_eq!(parse_numeric_prefix(b"."), None);
        assert_eq!(
            parse_numeric_prefix(b"99999999999999999999"),
            Some((Numeric::Double(1e20), true))
        );
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_int64(b"12abc"), 12);
        assert_eq!(string_to_int64(b"1e3"), 1000);
        assert_eq!(string_to_int64(b"abc"), 0);
        assert_eq!(string_to_double(b"2.5x"), 2.5);
        assert_eq!(double_to_int64(f64::NAN), 0);
        assert_eq!(double_to_int64(1e30), 0);
        assert_eq!(double_to_int64(-3.9), -3);
    }

    #[test]
    fn test_strictly_integer() {
        assert_eq!(strictly_integer(b"123"), Some(123));
        assert_eq!(strictly_integer(b"-45"), Some(-45));
        assert_eq!(strictly_integer(b"0"), Some(0));
        assert_eq!(strictly_integer(b"0123"), None);
        assert_eq!(strictly_integer(b"+5"), None);
        assert_eq!(strictly_integer(b"-0"), None);
        assert_eq!(strictly_integer(b" 1"), None);
        assert_eq!(strictly_integer(b""), None);
        assert_eq!(strictly_integer(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(strictly_integer(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(strictly_integer(b"9223372036854775808"), None);
    }

    #[test]
    fn test_double_to_string() {
        assert_eq!(double_to_string(3.5), "3.5");
        assert_eq!(double_to_string(1.0), "1");
        assert_eq!(double_to_string(0.1 + 0.2), "0.3");
        assert_eq!(double_to_string(1e25), "1.0E+25");
        assert_eq!(double_to_string(1.5e-7), "1.5E-7");
        assert_eq!(double_to_string(-0.0), "-0");
        assert_eq!(double_to_string(9.223372036854776e18), "9.2233720368548E+18");
        assert_eq!(double_to_string(f64::INFINITY), "INF");
    }

    #[test]
    fn test_string_compare() {
        assert!(string_equal(b"1e3", b"1000"));
        assert!(string_equal(b" 10", b"10"));
        assert!(!string_equal(b"abc", b"ABC"));
        assert_eq!(string_compare(b"10", b"9"), Some(Ordering::Greater));
        assert_eq!(string_compare(b"10", b"9a"), Some(Ordering::Less));
    }
}
