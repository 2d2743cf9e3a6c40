//! Host-side value model.
//!
//! Everything that crosses the script boundary is first expressed as a
//! [`HostValue`]. Script-space values are produced from and reduced to this
//! enum by the marshaling layer.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

/// A value native to the embedding application.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(DateValue),
    Color(Color),
    Geometry(Geometry),
    Format(FormatSpec),
    List(Vec<HostValue>),
    Map(VarTable),
}

impl HostValue {
    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Int(_) => "integer",
            HostValue::Float(_) => "number",
            HostValue::Str(_) => "string",
            HostValue::Date(d) => d.kind().as_str(),
            HostValue::Color(_) => "color",
            HostValue::Geometry(g) => g.shape_name(),
            HostValue::Format(_) => "format",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(i) => Some(*i as f64),
            HostValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Int(i) => write!(f, "{i}"),
            HostValue::Float(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{n:.0}")
                } else {
                    write!(f, "{n}")
                }
            }
            HostValue::Str(s) => write!(f, "{s}"),
            HostValue::Date(d) => write!(f, "{d}"),
            HostValue::Color(c) => write!(f, "{c}"),
            HostValue::Geometry(g) => write!(f, "{g:?}"),
            HostValue::Format(spec) => write!(f, "{}", spec.pattern()),
            HostValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
            HostValue::Map(table) => {
                let parts: Vec<String> =
                    table.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Int(i)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Float(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(s)
    }
}

impl From<DateValue> for HostValue {
    fn from(d: DateValue) -> Self {
        HostValue::Date(d)
    }
}

/// Concrete date-like representation.
///
/// Each kind has its own script-visible shape, so each is pooled separately
/// by the wrapper cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DateKind {
    Temporal,
    Date,
    Timestamp,
    Time,
}

impl DateKind {
    pub const ALL: [DateKind; 4] =
        [DateKind::Temporal, DateKind::Date, DateKind::Timestamp, DateKind::Time];

    pub fn as_str(self) -> &'static str {
        match self {
            DateKind::Temporal => "temporal",
            DateKind::Date => "date",
            DateKind::Timestamp => "timestamp",
            DateKind::Time => "time",
        }
    }
}

/// A date-like host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateValue {
    Temporal(NaiveDateTime),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Time(NaiveTime),
}

impl DateValue {
    pub fn kind(&self) -> DateKind {
        match self {
            DateValue::Temporal(_) => DateKind::Temporal,
            DateValue::Date(_) => DateKind::Date,
            DateValue::Timestamp(_) => DateKind::Timestamp,
            DateValue::Time(_) => DateKind::Time,
        }
    }

    /// Full date-time view. Time-only values sit on the epoch day.
    pub fn to_datetime(&self) -> NaiveDateTime {
        match self {
            DateValue::Temporal(dt) | DateValue::Timestamp(dt) => *dt,
            DateValue::Date(d) => d.and_time(NaiveTime::MIN),
            DateValue::Time(t) => epoch_day().and_time(*t),
        }
    }

    /// Re-express this value as another kind.
    pub fn convert(&self, kind: DateKind) -> DateValue {
        let dt = self.to_datetime();
        match kind {
            DateKind::Temporal => DateValue::Temporal(dt),
            DateKind::Date => DateValue::Date(dt.date()),
            DateKind::Timestamp => DateValue::Timestamp(dt),
            DateKind::Time => DateValue::Time(dt.time()),
        }
    }

    pub fn epoch_millis(&self) -> i64 {
        self.to_datetime().and_utc().timestamp_millis()
    }

    pub fn from_epoch_millis(millis: i64, kind: DateKind) -> Option<DateValue> {
        let dt = DateTime::<Utc>::from_timestamp_millis(millis)?.naive_utc();
        Some(DateValue::Temporal(dt).convert(kind))
    }

    /// Parse an ISO-8601 style literal into the requested kind.
    pub fn parse(text: &str, kind: DateKind) -> Option<DateValue> {
        let text = text.trim();
        const DATETIME_FORMATS: [&str; 3] =
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
                return Some(DateValue::Temporal(dt).convert(kind));
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Some(DateValue::Date(d).convert(kind));
        }
        if let Ok(t) = NaiveTime::parse_from_str(text, "%H:%M:%S%.f") {
            return Some(DateValue::Time(t).convert(kind));
        }
        None
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateValue::Temporal(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            DateValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DateValue::Timestamp(dt) => {
                write!(f, "{}.{:09}", dt.format("%Y-%m-%d %H:%M:%S"), dt.nanosecond())
            }
            DateValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
        }
    }
}

fn epoch_day() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Unpack a `0xRRGGBB` integer. Values above 24 bits carry alpha in the
    /// top byte.
    pub fn from_packed(value: u32) -> Self {
        let alpha = (value >> 24) as u8;
        Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
            a: if value > 0x00ff_ffff { alpha } else { 255 },
        }
    }

    pub fn packed(&self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.a, self.r, self.g, self.b)
        }
    }
}

/// Geometry-like host values.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point { x: f64, y: f64 },
    Dimension { width: f64, height: f64 },
    Insets { top: f64, left: f64, bottom: f64, right: f64 },
    Rect { x: f64, y: f64, width: f64, height: f64 },
    Ellipse { x: f64, y: f64, width: f64, height: f64 },
    Polygon { points: Vec<(f64, f64)> },
}

impl Geometry {
    pub fn shape_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "point",
            Geometry::Dimension { .. } => "dimension",
            Geometry::Insets { .. } => "insets",
            Geometry::Rect { .. } => "rect",
            Geometry::Ellipse { .. } => "ellipse",
            Geometry::Polygon { .. } => "polygon",
        }
    }
}

/// A format object constructed from a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSpec {
    Number(String),
    Date(String),
}

impl FormatSpec {
    /// Pick numeric or date formatting from the pattern text: digits and `#`
    /// only occur in numeric patterns.
    pub fn from_pattern(pattern: &str) -> Self {
        if pattern.chars().any(|c| c.is_ascii_digit() || c == '#') {
            FormatSpec::Number(pattern.to_string())
        } else {
            FormatSpec::Date(pattern.to_string())
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            FormatSpec::Number(p) | FormatSpec::Date(p) => p,
        }
    }
}

/// Ordered string-keyed table of host values ("variable table").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VarTable {
    entries: Vec<(String, HostValue)>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, keeping first-insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: HostValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `other` on top of this table.
    pub fn merge(&mut self, other: &VarTable) {
        for (k, v) in other.iter() {
            self.insert(k, v.clone());
        }
    }
}

impl FromIterator<(String, HostValue)> for VarTable {
    fn from_iter<I: IntoIterator<Item = (String, HostValue)>>(iter: I) -> Self {
        let mut table = VarTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}
