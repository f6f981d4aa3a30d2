//! Python-compatible text forms of field values
//!
//! Stored `fvalue` strings must match what the Python tooling upstream of
//! the raw tables produces, so values are rendered the way `str()`,
//! `repr()` and `json.dumps()` render them.

use std::fmt::Write as _;
use std::io;
use serde::Serialize;
use serde_json::ser::Formatter;
use unicode_properties::{GeneralCategory, UnicodeGeneralCategory};
use super::value::{FieldValue, Number};

/// `str(value)`: text verbatim, everything else in repr form
pub fn py_str(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        other => py_repr(other),
    }
}

/// `repr(value)`
pub fn py_repr(value: &FieldValue) -> String {
    let mut out = String::new();
    write_repr(&mut out, value);
    out
}

fn write_repr(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Null => out.push_str("None"),
        FieldValue::Bool(true) => out.push_str("True"),
        FieldValue::Bool(false) => out.push_str("False"),
        FieldValue::Number(Number::Int(i)) => {
            let _ = write!(out, "{}", i);
        }
        FieldValue::Number(Number::UInt(u)) => {
            let _ = write!(out, "{}", u);
        }
        FieldValue::Number(Number::Float(f)) => out.push_str(&py_float_repr(*f)),
        FieldValue::Text(s) => out.push_str(&py_str_repr(s)),
        FieldValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(out, item);
            }
            out.push(']');
        }
        FieldValue::Json(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&py_str_repr(key));
                out.push_str(": ");
                write_repr(out, item);
            }
            out.push('}');
        }
    }
}

/// `repr(str)`: single quotes unless the text holds only single quotes
pub fn py_str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if !is_printable(c) => {
                let code = c as u32;
                let _ = if code < 0x100 {
                    write!(out, "\\x{:02x}", code)
                } else if code < 0x10000 {
                    write!(out, "\\u{:04x}", code)
                } else {
                    write!(out, "\\U{:08x}", code)
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `str.isprintable()` for one character: everything but separators other
/// than the ASCII space, control, format, surrogate, private-use and
/// unassigned code points
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !matches!(
        c.general_category(),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::Unassigned
            | GeneralCategory::SpaceSeparator
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
    )
}

/// `repr(float)`: shortest round-trip digits, fixed notation for decimal
/// exponents in `-4..16`, scientific otherwise.
pub fn py_float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sign = if f.is_sign_negative() { "-" } else { "" };
    let sci = format!("{:e}", f.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let body = if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
            } else {
                format!("{}.{}", &digits[..int_len], &digits[int_len..])
            }
        } else {
            format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
        }
    } else {
        let mut m = digits[..1].to_string();
        if digits.len() > 1 {
            m.push('.');
            m.push_str(&digits[1..]);
        }
        format!("{}e{}{:02}", m, if exp < 0 { '-' } else { '+' }, exp.abs())
    };
    format!("{}{}", sign, body)
}

/// JSON layout of Python's `json.dumps` defaults: `", "` and `": "`
/// separators, non-ASCII escaped, floats in repr form.
#[derive(Debug, Default)]
pub struct PyJsonFormatter;

impl Formatter for PyJsonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let text = if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        } else {
            py_float_repr(value)
        };
        writer.write_all(text.as_bytes())
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() && !fragment.contains('\x7f') {
            return writer.write_all(fragment.as_bytes());
        }
        let mut buf = String::with_capacity(fragment.len() + 8);
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                buf.push(c);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(buf, "\\u{:04x}", unit);
                }
            }
        }
        writer.write_all(buf.as_bytes())
    }
}

/// `json.dumps(value)`
pub fn py_json_dumps(value: &FieldValue) -> serde_json::Result<String> {
    let mut out = Vec::new();
    write_json(&mut out, value).map_err(serde_json::Error::io)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

// serde_json writes non-finite floats as `null`, so containers and floats
// are laid out here and only scalars go through the serializer
fn write_json(out: &mut Vec<u8>, value: &FieldValue) -> io::Result<()> {
    let mut fmt = PyJsonFormatter;
    match value {
        FieldValue::Number(Number::Float(f)) => fmt.write_f64(out, *f),
        FieldValue::List(items) => {
            fmt.begin_array(out)?;
            for (i, item) in items.iter().enumerate() {
                fmt.begin_array_value(out, i == 0)?;
                write_json(out, item)?;
                fmt.end_array_value(out)?;
            }
            fmt.end_array(out)
        }
        FieldValue::Json(entries) => {
            fmt.begin_object(out)?;
            for (i, (key, item)) in entries.iter().enumerate() {
                fmt.begin_object_key(out, i == 0)?;
                write_scalar(out, key)?;
                fmt.end_object_key(out)?;
                fmt.begin_object_value(out)?;
                write_json(out, item)?;
                fmt.end_object_value(out)?;
            }
            fmt.end_object(out)
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> io::Result<()> {
    let mut ser = serde_json::Serializer::with_formatter(out, PyJsonFormatter);
    value.serialize(&mut ser).map_err(io::Error::from)
}
