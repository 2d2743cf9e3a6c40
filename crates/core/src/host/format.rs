//! Pattern-driven formatting for `FormatSpec` values.
//!
//! Numeric patterns use the familiar `#,##0.00` notation (optional literal
//! prefix/suffix, `%` scales by one hundred). Date patterns use letter runs
//! such as `yyyy-MM-dd HH:mm:ss` and are translated to chrono directives.

use super::types::HostError;
use super::value::{DateKind, DateValue, FormatSpec, HostValue};

/// Format a host value with the given spec.
pub fn format_value(spec: &FormatSpec, value: &HostValue) -> Result<String, HostError> {
    match spec {
        FormatSpec::Number(pattern) => {
            let n = match value {
                HostValue::Int(i) => *i as f64,
                HostValue::Float(f) => *f,
                HostValue::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                    HostError::message(format!("cannot format '{s}' as a number"))
                })?,
                HostValue::Null => return Ok(String::new()),
                other => {
                    return Err(HostError::message(format!(
                        "cannot format {} with number pattern '{pattern}'",
                        other.type_name()
                    )));
                }
            };
            Ok(format_number(pattern, n))
        }
        FormatSpec::Date(pattern) => {
            let date = match value {
                HostValue::Date(d) => *d,
                HostValue::Int(millis) => DateValue::from_epoch_millis(*millis, DateKind::Temporal)
                    .ok_or_else(|| HostError::message(format!("timestamp {millis} out of range")))?,
                HostValue::Str(s) => DateValue::parse(s, DateKind::Temporal)
                    .ok_or_else(|| HostError::message(format!("cannot parse '{s}' as a date")))?,
                HostValue::Null => return Ok(String::new()),
                other => {
                    return Err(HostError::message(format!(
                        "cannot format {} with date pattern '{pattern}'",
                        other.type_name()
                    )));
                }
            };
            Ok(format_date(pattern, &date))
        }
    }
}

struct NumberPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: bool,
    percent: bool,
}

fn parse_number_pattern(pattern: &str) -> NumberPattern {
    let is_numeric = |c: char| matches!(c, '#' | '0' | ',' | '.');
    let start = pattern.find(is_numeric).unwrap_or(pattern.len());
    let end = pattern.rfind(is_numeric).map_or(start, |i| i + 1);

    let prefix = pattern[..start].to_string();
    let suffix = pattern[end..].to_string();
    let body = &pattern[start..end];

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };

    NumberPattern {
        percent: prefix.contains('%') || suffix.contains('%'),
        prefix,
        suffix,
        min_int: int_part.chars().filter(|c| *c == '0').count(),
        min_frac: frac_part.chars().filter(|c| *c == '0').count(),
        max_frac: frac_part.chars().filter(|c| matches!(c, '0' | '#')).count(),
        grouping: int_part.contains(','),
    }
}

/// Format `n` with a numeric pattern.
pub fn format_number(pattern: &str, n: f64) -> String {
    let spec = parse_number_pattern(pattern);
    let n = if spec.percent { n * 100.0 } else { n };
    let negative = n < 0.0;

    let rendered = format!("{:.*}", spec.max_frac, n.abs());
    let (int_digits, frac_digits) = match rendered.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (rendered, String::new()),
    };

    let mut frac = frac_digits;
    while frac.len() > spec.min_frac && frac.ends_with('0') {
        frac.pop();
    }

    let mut int = int_digits.trim_start_matches('0').to_string();
    while int.len() < spec.min_int {
        int.insert(0, '0');
    }
    if spec.grouping {
        int = group_thousands(&int);
    }
    if int.is_empty() && frac.is_empty() {
        int.push('0');
    }

    let mut out = String::new();
    if negative && (int.chars().any(|c| c != '0' && c != ',') || frac.chars().any(|c| c != '0')) {
        out.push('-');
    }
    out.push_str(&spec.prefix);
    out.push_str(&int);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(&frac);
    }
    out.push_str(&spec.suffix);
    out
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format a date with a letter-run pattern.
pub fn format_date(pattern: &str, date: &DateValue) -> String {
    date.to_datetime().format(&translate_date_pattern(pattern)).to_string()
}

/// Translate a letter-run date pattern into chrono strftime directives.
/// Text inside single quotes is copied literally.
pub fn translate_date_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        i += run;

        let directive = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            _ => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
                continue;
            }
        };
        out.push_str(directive);
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
