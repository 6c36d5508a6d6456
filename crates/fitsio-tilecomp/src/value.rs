//! Header value parsing and formatting for the 70-byte value field of a card.

use alloc::format;
use alloc::string::String;
use core::str;

/// A parsed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes).
    String(String),
}

impl Value {
    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of the value; floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(f) if libm::trunc(*f) == *f => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

// ── Parsing ──

/// Find a ` /` comment separator, returning the text after it.
fn comment_after(field: &[u8]) -> (usize, Option<&str>) {
    let Some(pos) = field.windows(2).position(|w| w == b" /") else {
        return (field.len(), None);
    };
    let mut start = pos + 2;
    if field.get(start) == Some(&b' ') {
        start += 1;
    }
    let comment = str::from_utf8(&field[start..])
        .ok()
        .map(str::trim_end)
        .filter(|s| !s.is_empty());
    (pos, comment)
}

fn parse_quoted(field: &[u8]) -> (Value, Option<&str>) {
    let mut text = String::new();
    let mut i = 1;
    while i < field.len() {
        match field[i] {
            b'\'' if field.get(i + 1) == Some(&b'\'') => {
                text.push('\'');
                i += 2;
            }
            b'\'' => {
                i += 1;
                break;
            }
            b => {
                text.push(b as char);
                i += 1;
            }
        }
    }
    let trimmed = String::from(text.trim_end());
    let (_, comment) = comment_after(&field[i.min(field.len())..]);
    (Value::String(trimmed), comment)
}

/// Parse the value portion (bytes 10..80) of a card.
///
/// Returns `None` when the field holds no value.
pub fn parse_value(field: &[u8]) -> Option<(Value, Option<&str>)> {
    let lead = field.iter().position(|&b| b != b' ')?;
    let field = &field[lead..];
    if field[0] == b'\'' {
        return Some(parse_quoted(field));
    }

    let (end, comment) = comment_after(field);
    let text = str::from_utf8(&field[..end]).ok()?.trim();
    let value = match text {
        "" => return None,
        "T" => Value::Logical(true),
        "F" => Value::Logical(false),
        _ if !text.contains(['.', 'E', 'e', 'D', 'd']) => Value::Integer(text.parse().ok()?),
        _ => Value::Float(text.replace(['D', 'd'], "E").parse().ok()?),
    };
    Some((value, comment))
}

// ── Formatting ──

/// Right-justify `src` within `dest`.
fn right_justify(src: &[u8], dest: &mut [u8]) {
    let len = src.len().min(dest.len());
    let start = dest.len() - len;
    dest[start..].copy_from_slice(&src[..len]);
}

/// Shortest round-trippable float representation that fits in 20 columns.
fn format_float(f: f64) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    if libm::trunc(f) == f && libm::fabs(f) < 1e15 {
        return format!("{f:.1}");
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{f:.precision$E}");
        if s.len() <= 20 || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

/// Serialize a [`Value`] into the 70-byte value field of a card.
///
/// Numbers and logicals are right-justified to column 30; strings are quoted
/// and padded to at least eight characters.
pub fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => buf[19] = if *b { b'T' } else { b'F' },
        Value::Integer(n) => right_justify(format!("{n}").as_bytes(), &mut buf[..20]),
        Value::Float(f) => right_justify(format_float(*f).as_bytes(), &mut buf[..20]),
        Value::String(s) => {
            let escaped = s.replace('\'', "''");
            let body = escaped.as_bytes();
            let len = body.len().min(67);
            buf[0] = b'\'';
            buf[1..1 + len].copy_from_slice(&body[..len]);
            let close = (1 + len).max(9);
            buf[close] = b'\'';
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> [u8; 70] {
        let mut buf = [b' '; 70];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        buf
    }

    #[test]
    fn parse_logical_with_comment() {
        let f = field("                   T / image is compressed");
        let (v, c) = parse_value(&f).unwrap();
        assert_eq!(v, Value::Logical(true));
        assert_eq!(c, Some("image is compressed"));
    }

    #[test]
    fn parse_negative_integer() {
        let (v, _) = parse_value(&field("                 -32")).unwrap();
        assert_eq!(v, Value::Integer(-32));
    }

    #[test]
    fn parse_d_exponent() {
        let (v, _) = parse_value(&field("            1.5D+03")).unwrap();
        assert_eq!(v, Value::Float(1500.0));
    }

    #[test]
    fn parse_string_with_quote() {
        let binding = field("'O''HARA '           / name");
        let (v, c) = parse_value(&binding).unwrap();
        assert_eq!(v, Value::String(String::from("O'HARA")));
        assert_eq!(c, Some("name"));
    }

    #[test]
    fn empty_field_has_no_value() {
        assert!(parse_value(&field("")).is_none());
    }

    #[test]
    fn integer_right_justified() {
        let f = format_value(&Value::Integer(16));
        assert_eq!(&f[..20], b"                  16");
    }

    #[test]
    fn string_padded_to_eight() {
        let f = format_value(&Value::String(String::from("RICE_1")));
        assert_eq!(&f[..10], b"'RICE_1  '");
    }

    #[test]
    fn float_survives_format() {
        for x in [0.1234567890123, -2147483648.0, 3.0e-20, 32768.0] {
            let f = format_value(&Value::Float(x));
            let (v, _) = parse_value(&f).unwrap();
            assert_eq!(v.as_f64(), Some(x));
        }
    }

    #[test]
    fn integral_float_reads_as_integer() {
        assert_eq!(Value::Float(32768.0).as_i64(), Some(32768));
        assert_eq!(Value::Float(0.5).as_i64(), None);
    }
}
