//! Typed coercion of generic host values.
//!
//! One conversion function per target variant, selected by a single match.

use crate::host::{Color, DateKind, DateValue, FormatSpec, Geometry, HostValue, VarTable};

use super::{ConversionError, FloatWidth, IntWidth, TargetType};

/// Coerce `value` into `target`. `Null` passes through for every target.
pub fn coerce(value: HostValue, target: &TargetType) -> Result<HostValue, ConversionError> {
    if value.is_null() {
        return Ok(HostValue::Null);
    }
    match *target {
        TargetType::Any => Ok(value),
        TargetType::Bool => to_bool(value),
        TargetType::Int(width) => to_int(value, width),
        TargetType::Float(width) => to_float(value, width),
        TargetType::Str => Ok(to_str(value)),
        TargetType::Color => to_color(value),
        TargetType::Point => to_point(value),
        TargetType::Dimension => to_dimension(value),
        TargetType::Insets => to_insets(value),
        TargetType::Rect => to_rect(value, false),
        TargetType::Ellipse => to_rect(value, true),
        TargetType::Polygon => to_polygon(value),
        TargetType::Shape => to_shape(value),
        TargetType::Format => to_format(value),
        TargetType::Date(kind) => to_date(value, kind),
        TargetType::Sequence => to_sequence(value),
        TargetType::VarTable { skip_nulls } => to_var_table(value, skip_nulls),
    }
}

fn fail(value: &HostValue, target: TargetType, reason: impl Into<String>) -> ConversionError {
    ConversionError::new(value, target, reason)
}

fn unsupported(value: &HostValue, target: TargetType) -> ConversionError {
    fail(value, target, format!("unsupported source type {}", value.type_name()))
}

fn to_bool(value: HostValue) -> Result<HostValue, ConversionError> {
    match &value {
        HostValue::Bool(_) => Ok(value),
        HostValue::Int(i) => Ok(HostValue::Bool(*i != 0)),
        HostValue::Float(f) => Ok(HostValue::Bool(*f != 0.0)),
        HostValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(HostValue::Bool(true)),
            "false" => Ok(HostValue::Bool(false)),
            _ => Err(fail(&value, TargetType::Bool, "expected 'true' or 'false'")),
        },
        _ => Err(unsupported(&value, TargetType::Bool)),
    }
}

/// Narrow with the usual wrapping integer rules.
#[allow(clippy::cast_possible_truncation)]
fn narrow(i: i64, width: IntWidth) -> i64 {
    match width {
        IntWidth::I8 => i64::from(i as i8),
        IntWidth::I16 => i64::from(i as i16),
        IntWidth::I32 => i64::from(i as i32),
        IntWidth::I64 => i,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(f: f64, value: &HostValue, target: TargetType) -> Result<i64, ConversionError> {
    if !f.is_finite() {
        return Err(fail(value, target, "value is not finite"));
    }
    Ok(f.trunc() as i64)
}

fn to_int(value: HostValue, width: IntWidth) -> Result<HostValue, ConversionError> {
    let target = TargetType::Int(width);
    let i = match &value {
        HostValue::Int(i) => *i,
        HostValue::Float(f) => truncate(*f, &value, target)?,
        HostValue::Str(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => i,
                Err(_) => match s.parse::<f64>() {
                    Ok(f) => truncate(f, &value, target)?,
                    Err(_) => return Err(fail(&value, target, "not a number")),
                },
            }
        }
        _ => return Err(unsupported(&value, target)),
    };
    Ok(HostValue::Int(narrow(i, width)))
}

#[allow(clippy::cast_possible_truncation)]
fn to_float(value: HostValue, width: FloatWidth) -> Result<HostValue, ConversionError> {
    let target = TargetType::Float(width);
    let f = match &value {
        HostValue::Int(i) => *i as f64,
        HostValue::Float(f) => *f,
        HostValue::Str(s) => {
            s.trim().parse::<f64>().map_err(|_| fail(&value, target, "not a number"))?
        }
        _ => return Err(unsupported(&value, target)),
    };
    Ok(HostValue::Float(match width {
        FloatWidth::F32 => f64::from(f as f32),
        FloatWidth::F64 => f,
    }))
}

/// Arrays render element-wise joined with `,`; everything else uses its
/// display form.
fn to_str(value: HostValue) -> HostValue {
    match value {
        HostValue::Str(_) => value,
        HostValue::List(items) => {
            let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
            HostValue::Str(parts.join(","))
        }
        other => HostValue::Str(other.to_string()),
    }
}

const NAMED_COLORS: &[(&str, Color)] = &[
    ("black", Color::rgb(0, 0, 0)),
    ("white", Color::rgb(255, 255, 255)),
    ("red", Color::rgb(255, 0, 0)),
    ("green", Color::rgb(0, 255, 0)),
    ("blue", Color::rgb(0, 0, 255)),
    ("yellow", Color::rgb(255, 255, 0)),
    ("cyan", Color::rgb(0, 255, 255)),
    ("magenta", Color::rgb(255, 0, 255)),
    ("orange", Color::rgb(255, 200, 0)),
    ("pink", Color::rgb(255, 175, 175)),
    ("gray", Color::rgb(128, 128, 128)),
    ("grey", Color::rgb(128, 128, 128)),
    ("lightgray", Color::rgb(192, 192, 192)),
    ("darkgray", Color::rgb(64, 64, 64)),
];

fn channel(value: &HostValue, key: &str, table: &VarTable) -> Result<Option<u8>, ConversionError> {
    let Some(v) = table.get(key) else {
        return Ok(None);
    };
    let HostValue::Int(i) = to_int(v.clone(), IntWidth::I64)? else {
        return Err(fail(value, TargetType::Color, format!("channel '{key}' is empty")));
    };
    u8::try_from(i)
        .map(Some)
        .map_err(|_| fail(value, TargetType::Color, format!("channel '{key}' out of range")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_color(value: HostValue) -> Result<HostValue, ConversionError> {
    let color = match &value {
        HostValue::Color(_) => return Ok(value),
        HostValue::Int(i) => Color::from_packed(*i as u32),
        HostValue::Float(f) if f.is_finite() => Color::from_packed(f.trunc() as i64 as u32),
        HostValue::Str(s) => parse_color(s)
            .ok_or_else(|| fail(&value, TargetType::Color, "unknown color"))?,
        HostValue::Map(table) => {
            let missing = || fail(&value, TargetType::Color, "expected r, g and b fields");
            let r = channel(&value, "r", table)?.ok_or_else(missing)?;
            let g = channel(&value, "g", table)?.ok_or_else(missing)?;
            let b = channel(&value, "b", table)?.ok_or_else(missing)?;
            let a = channel(&value, "a", table)?.unwrap_or(255);
            Color { r, g, b, a }
        }
        _ => return Err(unsupported(&value, TargetType::Color)),
    };
    Ok(HostValue::Color(color))
}

fn parse_color(text: &str) -> Option<Color> {
    let text = text.trim();
    let hex = text
        .strip_prefix('#')
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"));
    if let Some(hex) = hex {
        let packed = u32::from_str_radix(hex, 16).ok()?;
        return match hex.len() {
            6 => Some(Color::from_packed(packed)),
            8 => Some(Color { a: (packed >> 24) as u8, ..Color::from_packed(packed & 0x00ff_ffff) }),
            _ => None,
        };
    }
    let lower = text.to_ascii_lowercase().replace(['_', ' '], "");
    NAMED_COLORS.iter().find(|(name, _)| *name == lower).map(|(_, c)| *c)
}

/// Numeric coordinates from a flat list.
fn coordinates(value: &HostValue, target: TargetType) -> Result<Vec<f64>, ConversionError> {
    let HostValue::List(items) = value else {
        return Err(unsupported(value, target));
    };
    items
        .iter()
        .map(|item| item.as_f64().ok_or_else(|| fail(value, target, "expected numeric coordinates")))
        .collect()
}

/// Named numeric fields from a keyed table; `None` when any is absent.
fn fields<const N: usize>(
    value: &HostValue,
    table: &VarTable,
    names: [&str; N],
    target: TargetType,
) -> Result<Option<[f64; N]>, ConversionError> {
    let mut out = [0.0; N];
    for (slot, name) in out.iter_mut().zip(names) {
        match table.get(name) {
            Some(v) => {
                *slot = v
                    .as_f64()
                    .ok_or_else(|| fail(value, target, format!("field '{name}' is not numeric")))?;
            }
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

/// Read exactly `N` values from named fields or a flat sequence.
fn exact<const N: usize>(
    value: &HostValue,
    names: [&str; N],
    target: TargetType,
) -> Result<[f64; N], ConversionError> {
    match value {
        HostValue::Map(table) => fields(value, table, names, target)?
            .ok_or_else(|| fail(value, target, format!("expected fields {}", names.join(", ")))),
        HostValue::List(_) => {
            let coords = coordinates(value, target)?;
            <[f64; N]>::try_from(coords)
                .map_err(|c| fail(value, target, format!("expected {N} values, got {}", c.len())))
        }
        _ => Err(unsupported(value, target)),
    }
}

fn to_point(value: HostValue) -> Result<HostValue, ConversionError> {
    if let HostValue::Geometry(Geometry::Point { .. }) = value {
        return Ok(value);
    }
    let [x, y] = exact(&value, ["x", "y"], TargetType::Point)?;
    Ok(HostValue::Geometry(Geometry::Point { x, y }))
}

fn to_dimension(value: HostValue) -> Result<HostValue, ConversionError> {
    if let HostValue::Geometry(Geometry::Dimension { .. }) = value {
        return Ok(value);
    }
    let [width, height] = exact(&value, ["width", "height"], TargetType::Dimension)?;
    Ok(HostValue::Geometry(Geometry::Dimension { width, height }))
}

fn to_insets(value: HostValue) -> Result<HostValue, ConversionError> {
    if let HostValue::Geometry(Geometry::Insets { .. }) = value {
        return Ok(value);
    }
    let [top, left, bottom, right] =
        exact(&value, ["top", "left", "bottom", "right"], TargetType::Insets)?;
    Ok(HostValue::Geometry(Geometry::Insets { top, left, bottom, right }))
}

fn to_rect(value: HostValue, ellipse: bool) -> Result<HostValue, ConversionError> {
    let target = if ellipse { TargetType::Ellipse } else { TargetType::Rect };
    let (x, y, width, height) = match &value {
        HostValue::Geometry(Geometry::Rect { x, y, width, height })
        | HostValue::Geometry(Geometry::Ellipse { x, y, width, height }) => (*x, *y, *width, *height),
        _ => {
            let [x, y, w, h] = exact(&value, ["x", "y", "width", "height"], target)?;
            (x, y, w, h)
        }
    };
    Ok(HostValue::Geometry(if ellipse {
        Geometry::Ellipse { x, y, width, height }
    } else {
        Geometry::Rect { x, y, width, height }
    }))
}

fn pairs(coords: &[f64]) -> Vec<(f64, f64)> {
    coords.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

fn to_polygon(value: HostValue) -> Result<HostValue, ConversionError> {
    let target = TargetType::Polygon;
    let points = match &value {
        HostValue::Geometry(Geometry::Polygon { .. }) => return Ok(value),
        HostValue::Map(table) => match table.get("points") {
            Some(points @ HostValue::List(_)) => return to_polygon(points.clone()),
            _ => return Err(fail(&value, target, "expected a 'points' field")),
        },
        HostValue::List(items) if items.iter().all(|i| matches!(i, HostValue::Map(_))) => items
            .iter()
            .map(|item| exact(item, ["x", "y"], target).map(|[x, y]| (x, y)))
            .collect::<Result<Vec<_>, _>>()?,
        HostValue::List(_) => {
            let coords = coordinates(&value, target)?;
            if coords.len() < 6 || coords.len() % 2 != 0 {
                return Err(fail(&value, target, "expected an even number of at least 6 coordinates"));
            }
            pairs(&coords)
        }
        _ => return Err(unsupported(&value, target)),
    };
    Ok(HostValue::Geometry(Geometry::Polygon { points }))
}

/// Pick the concrete shape from the number of coordinates supplied.
fn to_shape(value: HostValue) -> Result<HostValue, ConversionError> {
    match &value {
        HostValue::Geometry(_) => Ok(value),
        HostValue::Map(table) => {
            if table.get("points").is_some() {
                to_polygon(value)
            } else if table.get("width").is_some() {
                to_rect(value, false)
            } else {
                to_point(value)
            }
        }
        HostValue::List(_) => match coordinates(&value, TargetType::Shape)?.len() {
            2 => to_point(value),
            4 => to_rect(value, false),
            n if n >= 6 && n % 2 == 0 => to_polygon(value),
            n => Err(fail(&value, TargetType::Shape, format!("cannot build a shape from {n} values"))),
        },
        _ => Err(unsupported(&value, TargetType::Shape)),
    }
}

fn to_format(value: HostValue) -> Result<HostValue, ConversionError> {
    match value {
        HostValue::Format(_) => Ok(value),
        HostValue::Str(ref pattern) => Ok(HostValue::Format(FormatSpec::from_pattern(pattern))),
        other => Err(unsupported(&other, TargetType::Format)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_date(value: HostValue, kind: DateKind) -> Result<HostValue, ConversionError> {
    let target = TargetType::Date(kind);
    let date = match &value {
        HostValue::Date(d) => d.convert(kind),
        HostValue::Int(millis) => DateValue::from_epoch_millis(*millis, kind)
            .ok_or_else(|| fail(&value, target, "timestamp out of range"))?,
        HostValue::Float(f) => {
            let millis = truncate(*f, &value, target)?;
            DateValue::from_epoch_millis(millis, kind)
                .ok_or_else(|| fail(&value, target, "timestamp out of range"))?
        }
        HostValue::Str(s) => DateValue::parse(s, kind)
            .ok_or_else(|| fail(&value, target, "unrecognised date literal"))?,
        _ => return Err(unsupported(&value, target)),
    };
    Ok(HostValue::Date(date))
}

fn to_sequence(value: HostValue) -> Result<HostValue, ConversionError> {
    match value {
        HostValue::List(_) => Ok(value),
        HostValue::Map(ref table) if table.is_empty() => Ok(HostValue::List(Vec::new())),
        HostValue::Map(_) => Err(fail(&value, TargetType::Sequence, "keyed table is not a sequence")),
        other => Ok(HostValue::List(vec![other])),
    }
}

/// Arrays of `{key, value}` pairs become a table. Pairs without a key are
/// skipped, as are null values when `skip_nulls` is set.
fn to_var_table(value: HostValue, skip_nulls: bool) -> Result<HostValue, ConversionError> {
    let target = TargetType::VarTable { skip_nulls };
    let entries = match value {
        HostValue::Map(table) => {
            if !skip_nulls {
                return Ok(HostValue::Map(table));
            }
            table
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        }
        HostValue::List(ref items) => {
            let mut table = VarTable::new();
            for item in items {
                let HostValue::List(pair) = item else {
                    return Err(fail(&value, target, "expected {key, value} pairs"));
                };
                let key = match pair.first() {
                    None | Some(HostValue::Null) => continue,
                    Some(HostValue::Str(k)) => k.clone(),
                    Some(other) => other.to_string(),
                };
                let entry = pair.get(1).cloned().unwrap_or_default();
                if skip_nulls && entry.is_null() {
                    continue;
                }
                table.insert(key, entry);
            }
            table
        }
        other => return Err(unsupported(&other, target)),
    };
    Ok(HostValue::Map(entries))
}
