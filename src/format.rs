//! Render `{key}` templates against a configuration mapping
//!
//! The template syntax is close to Python string templates. Nested config
//! keys are reached with dotted paths, and a reserved `date` key formats the
//! current timestamp:
//!
//! ```text
//! "{nested.dict.key}"   ==> config["nested"]["dict"]["key"]
//! "{hp.batch_size:03}"  ==> "032"
//! "{date:%Y-%m-%d}"     ==> "2020-01-01"
//! ```
//!
//! Literal braces are written `{{` and `}}`. Unbalanced braces pass through
//! untouched. `date` is never looked up in the config, and its format string
//! supports a width extension: a digit right after `%` truncates the
//! formatted component to that many characters (`%3f` keeps the first three
//! digits of the fractional seconds). `%%` is not supported.

use std::fmt;

use chrono::{Local, NaiveDateTime};
use serde_json::Value;

/// Date format used by a bare `{date}` placeholder.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A placeholder path did not resolve in the config mapping.
    KeyNotFound(String),
    /// A format spec outside the supported subset.
    UnsupportedSpec(String),
    /// A `date` format string chrono cannot render.
    InvalidDateFormat(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatError::KeyNotFound(key) => write!(f, "key not found in config: {key}"),
            FormatError::UnsupportedSpec(spec) => write!(f, "unsupported format spec: {spec}"),
            FormatError::InvalidDateFormat(spec) => write!(f, "invalid date format: {spec}"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Formats `template` using the given config. Unresolvable keys are an error.
pub fn format_with_config(template: &str, config: &Value) -> Result<String, FormatError> {
    format_with_config_at(template, config, false, Local::now().naive_local())
}

/// Like [`format_with_config`], but unresolvable placeholders are left in
/// the output verbatim. Useful for multi-pass rendering where a later pass
/// supplies the remaining keys.
pub fn format_with_config_silent(template: &str, config: &Value) -> Result<String, FormatError> {
    format_with_config_at(template, config, true, Local::now().naive_local())
}

/// Full-control entry point with an explicit timestamp for the `date` key.
///
/// A single left-to-right scan: `{{`/`}}` emit literal braces, a `{` opens a
/// placeholder running to the next `}`, and anything malformed passes
/// through unchanged.
pub fn format_with_config_at(
    template: &str,
    config: &Value,
    silent: bool,
    now: NaiveDateTime,
) -> Result<String, FormatError> {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push('}');
                i += 2;
            }
            b'{' => match template[i + 1..].find('}') {
                Some(offset) => {
                    let term = &template[i..i + offset + 2];
                    out.push_str(&format_term(term, config, silent, now)?);
                    i += offset + 2;
                }
                // no closing brace anywhere: literal tail
                None => {
                    out.push_str(&template[i..]);
                    break;
                }
            },
            _ => {
                // braces are ascii, so everything else can be copied per char
                let ch = template[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    Ok(out)
}

/// Formats a single `{key:spec}` term, braces included.
fn format_term(
    term: &str,
    config: &Value,
    silent: bool,
    now: NaiveDateTime,
) -> Result<String, FormatError> {
    let inner = &term[1..term.len() - 1];
    let (key, spec) = match inner.split_once(':') {
        Some((key, spec)) => (key, Some(spec)),
        None => (inner, None),
    };

    if key == "date" {
        let fmt = match spec {
            Some(fmt) if !fmt.is_empty() => fmt,
            _ => DEFAULT_DATE_FORMAT,
        };
        return strftime(fmt, now);
    }

    let value = match dict_get(config, key) {
        Some(value) => value,
        None if silent => return Ok(term.to_string()),
        None => return Err(FormatError::KeyNotFound(key.to_string())),
    };

    match spec {
        None | Some("") => Ok(display_value(value)),
        Some(spec) => apply_spec(spec, value),
    }
}

/// Resolves a dotted key path by successive lookups into nested mappings.
fn dict_get<'a>(config: &'a Value, path: &str) -> Option<&'a Value> {
    let mut value = config;
    for key in path.split('.') {
        value = value.as_object()?.get(key)?;
    }
    Some(value)
}

/// Spec-less rendering of a leaf value. Strings render raw, everything else
/// through the serde_json display form.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Applies a `[0][width][.precision][e|f]` spec to a leaf value.
///
/// This is the subset of the Python format mini-language the job templates
/// actually use. Scientific notation follows Rust's `LowerExp` (`1.0e-2`,
/// no zero-padded exponent).
fn apply_spec(spec: &str, value: &Value) -> Result<String, FormatError> {
    let unsupported = || FormatError::UnsupportedSpec(spec.to_string());

    let bytes = spec.as_bytes();
    let mut i = 0;
    let zero = bytes.first() == Some(&b'0') && bytes.len() > 1;
    if zero {
        i = 1;
    }
    let width_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let width: Option<usize> = if i > width_start {
        Some(spec[width_start..i].parse().map_err(|_| unsupported())?)
    } else {
        None
    };
    let mut precision: Option<usize> = None;
    if i < bytes.len() && bytes[i] == b'.' {
        let precision_start = i + 1;
        i = precision_start;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == precision_start {
            return Err(unsupported());
        }
        precision = Some(spec[precision_start..i].parse().map_err(|_| unsupported())?);
    }
    let float_type = match &spec[i..] {
        "" => None,
        "e" => Some('e'),
        "f" => Some('f'),
        _ => return Err(unsupported()),
    };

    match value {
        Value::Number(n) => {
            let s = match float_type {
                Some(t) => {
                    let f = n.as_f64().ok_or_else(unsupported)?;
                    match (t, precision) {
                        ('e', Some(p)) => format!("{:.p$e}", f, p = p),
                        ('e', None) => format!("{:e}", f),
                        (_, Some(p)) => format!("{:.p$}", f, p = p),
                        (_, None) => format!("{}", f),
                    }
                }
                None => match precision {
                    Some(p) => {
                        let f = n.as_f64().ok_or_else(unsupported)?;
                        format!("{:.p$}", f, p = p)
                    }
                    None => n.to_string(),
                },
            };
            Ok(pad_numeric(s, width, zero))
        }
        Value::String(s) => {
            if zero || float_type.is_some() {
                return Err(unsupported());
            }
            let mut s: String = match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            };
            if let Some(w) = width {
                while s.chars().count() < w {
                    s.push(' ');
                }
            }
            Ok(s)
        }
        other => {
            if zero || float_type.is_some() || precision.is_some() {
                return Err(unsupported());
            }
            Ok(pad_numeric(display_value(other), width, false))
        }
    }
}

/// Right-aligns a rendered number, zero-filling after the sign if requested.
fn pad_numeric(s: String, width: Option<usize>, zero: bool) -> String {
    let Some(w) = width else { return s };
    if s.len() >= w {
        return s;
    }
    let fill = w - s.len();
    if zero {
        match s.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
            None => format!("{}{}", "0".repeat(fill), s),
        }
    } else {
        format!("{}{}", " ".repeat(fill), s)
    }
}

/// strftime with width specifiers: a digit right after `%` truncates the
/// formatted component. Tokenized by splitting on `%`, so `%%` is not a
/// literal-percent escape.
fn strftime(fmt: &str, now: NaiveDateTime) -> Result<String, FormatError> {
    let mut tokens = fmt.split('%');
    let mut out = String::new();
    out.push_str(tokens.next().unwrap_or(""));
    for token in tokens {
        out.push_str(&strftime_token(token, now, fmt)?);
    }
    Ok(out)
}

fn strftime_token(token: &str, now: NaiveDateTime, fmt: &str) -> Result<String, FormatError> {
    let Some(first) = token.chars().next() else {
        return Ok(String::new());
    };
    match first.to_digit(10) {
        Some(width) => {
            let mut rest = token[1..].chars();
            let Some(directive) = rest.next() else {
                return Err(FormatError::InvalidDateFormat(fmt.to_string()));
            };
            let formatted = chrono_format(now, &directive.to_string(), fmt)?;
            let truncated: String = formatted.chars().take(width as usize).collect();
            Ok(format!("{}{}", truncated, rest.as_str()))
        }
        None => chrono_format(now, token, fmt),
    }
}

/// Renders `%{token}` through chrono, catching bad directives at write time.
fn chrono_format(now: NaiveDateTime, token: &str, fmt: &str) -> Result<String, FormatError> {
    use std::fmt::Write;

    let mut out = String::new();
    match write!(out, "{}", now.format(&format!("%{token}"))) {
        Ok(()) => Ok(out),
        Err(_) => Err(FormatError::InvalidDateFormat(fmt.to_string())),
    }
}
