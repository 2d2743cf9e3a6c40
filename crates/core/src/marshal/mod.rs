//! Value marshaling between script space and host space.
//!
//! Conversion is two-step: [`from_script`] reduces any Lua value to a
//! generic [`HostValue`], then [`coerce`] shapes it into the requested
//! [`TargetType`]. [`to_script`] goes the other way.

mod coerce;
mod script;

use std::fmt;

use thiserror::Error;

use crate::host::DateKind;

pub use coerce::coerce;
pub use script::{
    DateWrapping, FormatHandle, FreshWrapping, from_script, to_host, to_script,
    var_table_to_script,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    F32,
    F64,
}

/// The host type a script value is being converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// No coercion; the generic host value is returned as is.
    Any,
    Bool,
    Int(IntWidth),
    Float(FloatWidth),
    Str,
    Color,
    Point,
    Dimension,
    Insets,
    Rect,
    Ellipse,
    Polygon,
    /// Point, rect or polygon, chosen by how many coordinates are supplied.
    Shape,
    Format,
    Date(DateKind),
    Sequence,
    VarTable { skip_nulls: bool },
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Any => write!(f, "any"),
            TargetType::Bool => write!(f, "boolean"),
            TargetType::Int(w) => write!(f, "{}", match w {
                IntWidth::I8 => "i8",
                IntWidth::I16 => "i16",
                IntWidth::I32 => "i32",
                IntWidth::I64 => "i64",
            }),
            TargetType::Float(FloatWidth::F32) => write!(f, "f32"),
            TargetType::Float(FloatWidth::F64) => write!(f, "f64"),
            TargetType::Str => write!(f, "string"),
            TargetType::Color => write!(f, "color"),
            TargetType::Point => write!(f, "point"),
            TargetType::Dimension => write!(f, "dimension"),
            TargetType::Insets => write!(f, "insets"),
            TargetType::Rect => write!(f, "rect"),
            TargetType::Ellipse => write!(f, "ellipse"),
            TargetType::Polygon => write!(f, "polygon"),
            TargetType::Shape => write!(f, "shape"),
            TargetType::Format => write!(f, "format"),
            TargetType::Date(kind) => write!(f, "{}", kind.as_str()),
            TargetType::Sequence => write!(f, "sequence"),
            TargetType::VarTable { .. } => write!(f, "variable table"),
        }
    }
}

/// A value could not be converted to the requested host type.
#[derive(Debug, Clone, Error)]
#[error("cannot convert {value} to {target}: {reason}")]
pub struct ConversionError {
    /// Rendering of the offending value.
    pub value: String,
    pub target: TargetType,
    pub reason: String,
}

impl ConversionError {
    pub fn new(value: impl fmt::Display, target: TargetType, reason: impl Into<String>) -> Self {
        let mut value = value.to_string();
        if value.len() > 64 {
            let cut = (0..=61).rev().find(|i| value.is_char_boundary(*i)).unwrap_or(0);
            value.truncate(cut);
            value.push_str("...");
        }
        Self { value: format!("'{value}'"), target, reason: reason.into() }
    }
}
