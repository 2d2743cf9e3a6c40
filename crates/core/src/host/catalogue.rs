//! Built-in host types.
//!
//! These cover the value types report formulas reach for (math helpers,
//! parsers, dates, formatters) plus a few privileged types whose only purpose
//! in a restricted session is to be refused by the gatekeeper.

use chrono::{Local, NaiveDate, NaiveTime};

use super::format::format_value;
use super::types::{HostError, HostType, HostTypeRegistry};
use super::value::{DateKind, DateValue, FormatSpec, HostValue};
use crate::functions::CallContext;
use crate::marshal::{FloatWidth, IntWidth, TargetType, coerce};

pub(crate) fn register_builtins(registry: &mut HostTypeRegistry) {
    registry.register(math_type());
    registry.register(string_type());
    registry.register(integer_type());
    registry.register(double_type());
    registry.register(system_type());
    registry.register(date_type("util.Date", DateKind::Temporal));
    registry.register(date_type("time.Date", DateKind::Date));
    registry.register(date_type("time.Timestamp", DateKind::Timestamp));
    registry.register(date_type("time.Time", DateKind::Time));
    registry.register(format_type("text.DecimalFormat", |p| FormatSpec::Number(p.to_string())));
    registry.register(format_type("text.SimpleDateFormat", |p| FormatSpec::Date(p.to_string())));
    registry.register(format_type("text.Format", FormatSpec::from_pattern));
    registry.register(locale_type());
    registry.register(command_type());
}

fn arg(args: &[HostValue], index: usize) -> HostValue {
    args.get(index).cloned().unwrap_or_default()
}

fn arg_f64(args: &[HostValue], index: usize) -> Result<f64, HostError> {
    match coerce(arg(args, index), &TargetType::Float(FloatWidth::F64))? {
        HostValue::Float(f) => Ok(f),
        HostValue::Null => Err(HostError::message(format!("argument {} is missing", index + 1))),
        other => Err(HostError::message(format!("expected number, got {}", other.type_name()))),
    }
}

fn arg_i64(args: &[HostValue], index: usize) -> Result<i64, HostError> {
    match coerce(arg(args, index), &TargetType::Int(IntWidth::I64))? {
        HostValue::Int(i) => Ok(i),
        HostValue::Null => Err(HostError::message(format!("argument {} is missing", index + 1))),
        other => Err(HostError::message(format!("expected integer, got {}", other.type_name()))),
    }
}

fn arg_u32(args: &[HostValue], index: usize, default: u32) -> Result<u32, HostError> {
    if args.get(index).is_none_or(HostValue::is_null) {
        return Ok(default);
    }
    u32::try_from(arg_i64(args, index)?)
        .map_err(|_| HostError::message(format!("argument {} is out of range", index + 1)))
}

fn arg_str(args: &[HostValue], index: usize) -> Result<String, HostError> {
    match coerce(arg(args, index), &TargetType::Str)? {
        HostValue::Str(s) => Ok(s),
        _ => Err(HostError::message(format!("argument {} is missing", index + 1))),
    }
}

fn expect_arity(args: &[HostValue], min: usize, max: usize) -> Result<(), HostError> {
    if args.len() < min || args.len() > max {
        let expected = match max {
            _ if min == max => min.to_string(),
            usize::MAX => format!("at least {min}"),
            _ => format!("{min} to {max}"),
        };
        return Err(HostError::Arity { expected, actual: args.len() });
    }
    Ok(())
}

fn numeric(value: f64) -> HostValue {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        HostValue::Int(value as i64)
    } else {
        HostValue::Float(value)
    }
}

fn unary(f: fn(f64) -> f64) -> impl Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError> {
    move |_, args| {
        expect_arity(args, 1, 1)?;
        Ok(HostValue::Float(f(arg_f64(args, 0)?)))
    }
}

fn math_type() -> HostType {
    HostType::new("lang.Math")
        .with_constant("PI", HostValue::Float(std::f64::consts::PI))
        .with_constant("E", HostValue::Float(std::f64::consts::E))
        .with_function("abs", |_, args| {
            expect_arity(args, 1, 1)?;
            match arg(args, 0) {
                HostValue::Int(i) => Ok(HostValue::Int(i.wrapping_abs())),
                _ => Ok(HostValue::Float(arg_f64(args, 0)?.abs())),
            }
        })
        .with_function("max", |_, args| {
            expect_arity(args, 1, usize::MAX)?;
            let mut best = arg_f64(args, 0)?;
            for i in 1..args.len() {
                best = best.max(arg_f64(args, i)?);
            }
            Ok(numeric(best))
        })
        .with_function("min", |_, args| {
            expect_arity(args, 1, usize::MAX)?;
            let mut best = arg_f64(args, 0)?;
            for i in 1..args.len() {
                best = best.min(arg_f64(args, i)?);
            }
            Ok(numeric(best))
        })
        .with_function("round", |_, args| {
            expect_arity(args, 1, 2)?;
            let digits = if args.len() > 1 { arg_i64(args, 1)? } else { 0 };
            let scale = 10f64.powi(i32::try_from(digits).unwrap_or(0));
            let rounded = (arg_f64(args, 0)? * scale).round() / scale;
            Ok(if digits == 0 { numeric(rounded) } else { HostValue::Float(rounded) })
        })
        .with_function("floor", unary(f64::floor))
        .with_function("ceil", unary(f64::ceil))
        .with_function("sqrt", unary(f64::sqrt))
        .with_function("pow", |_, args| {
            expect_arity(args, 2, 2)?;
            Ok(HostValue::Float(arg_f64(args, 0)?.powf(arg_f64(args, 1)?)))
        })
}

fn string_type() -> HostType {
    HostType::new("lang.String")
        .with_function("valueOf", |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(HostValue::Str(arg_str(args, 0)?))
        })
        .with_function("length", |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(HostValue::Int(arg_str(args, 0)?.chars().count() as i64))
        })
        .with_function("join", |_, args| {
            expect_arity(args, 1, usize::MAX)?;
            let sep = arg_str(args, 0)?;
            let parts: Vec<String> = args[1..].iter().map(ToString::to_string).collect();
            Ok(HostValue::Str(parts.join(&sep)))
        })
}

fn integer_type() -> HostType {
    HostType::new("lang.Integer")
        .with_constant("MAX_VALUE", HostValue::Int(i64::from(i32::MAX)))
        .with_constant("MIN_VALUE", HostValue::Int(i64::from(i32::MIN)))
        .with_function("parseInt", |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(coerce(HostValue::Str(arg_str(args, 0)?), &TargetType::Int(IntWidth::I32))?)
        })
}

fn double_type() -> HostType {
    HostType::new("lang.Double").with_function("parseDouble", |_, args| {
        expect_arity(args, 1, 1)?;
        Ok(coerce(HostValue::Str(arg_str(args, 0)?), &TargetType::Float(FloatWidth::F64))?)
    })
}

/// Process-level information. Denied to restricted sessions.
fn system_type() -> HostType {
    HostType::new("lang.System")
        .with_function("currentTimeMillis", |_, args| {
            expect_arity(args, 0, 0)?;
            Ok(HostValue::Int(Local::now().timestamp_millis()))
        })
        .with_function("getenv", |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(std::env::var(arg_str(args, 0)?).map(HostValue::Str).unwrap_or_default())
        })
}

fn date_type(name: &str, kind: DateKind) -> HostType {
    HostType::new(name)
        .with_constructor(move |_, args| construct_date(kind, args))
        .with_function("now", move |_, args| {
            expect_arity(args, 0, 0)?;
            Ok(HostValue::Date(DateValue::Temporal(Local::now().naive_local()).convert(kind)))
        })
        .with_function("valueOf", move |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(coerce(arg(args, 0), &TargetType::Date(kind))?)
        })
}

/// Date constructors accept nothing (now), epoch millis or a text literal, or
/// numeric components in the order that suits the kind.
fn construct_date(kind: DateKind, args: &[HostValue]) -> Result<HostValue, HostError> {
    if args.len() <= 1 {
        if args.is_empty() {
            let now = DateValue::Temporal(Local::now().naive_local());
            return Ok(HostValue::Date(now.convert(kind)));
        }
        return Ok(coerce(arg(args, 0), &TargetType::Date(kind))?);
    }

    let invalid = || HostError::message(format!("invalid {} components", kind.as_str()));
    let value = match kind {
        DateKind::Time => {
            expect_arity(args, 2, 3)?;
            let t = NaiveTime::from_hms_opt(arg_u32(args, 0, 0)?, arg_u32(args, 1, 0)?, arg_u32(args, 2, 0)?)
                .ok_or_else(invalid)?;
            DateValue::Time(t)
        }
        _ => {
            expect_arity(args, 3, 7)?;
            let year = i32::try_from(arg_i64(args, 0)?).map_err(|_| invalid())?;
            let date = NaiveDate::from_ymd_opt(year, arg_u32(args, 1, 1)?, arg_u32(args, 2, 1)?)
                .ok_or_else(invalid)?;
            let dt = date
                .and_hms_nano_opt(
                    arg_u32(args, 3, 0)?,
                    arg_u32(args, 4, 0)?,
                    arg_u32(args, 5, 0)?,
                    arg_u32(args, 6, 0)?,
                )
                .ok_or_else(invalid)?;
            DateValue::Temporal(dt).convert(kind)
        }
    };
    Ok(HostValue::Date(value))
}

fn format_type(name: &str, build: fn(&str) -> FormatSpec) -> HostType {
    HostType::new(name)
        .with_constructor(move |_, args| {
            expect_arity(args, 1, 1)?;
            Ok(HostValue::Format(build(&arg_str(args, 0)?)))
        })
        .with_function("apply", move |_, args| {
            expect_arity(args, 2, 2)?;
            let spec = build(&arg_str(args, 0)?);
            Ok(HostValue::Str(format_value(&spec, &arg(args, 1))?))
        })
}

/// Host environment namespace; reachable only through the configured
/// `env` allow-list.
fn locale_type() -> HostType {
    HostType::new("env.locale.Default")
        .with_constant("language", HostValue::Str("en".into()))
        .with_constant("country", HostValue::Str("US".into()))
        .with_function("tag", |_, _| Ok(HostValue::Str("en-US".into())))
}

fn command_type() -> HostType {
    HostType::new("process.Command").with_constructor(|_, _| {
        Err(HostError::message("process execution is not available to formulas"))
    })
}
