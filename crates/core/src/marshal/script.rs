//! Conversion between Lua values and host values.

use std::ffi::c_void;

use mlua::{
    AnyUserData, Lua, MetaMethod, Result as LuaResult, Table, UserData, UserDataFields,
    UserDataMethods, Value,
};

use crate::host::{DateValue, FormatSpec, Geometry, HostValue, VarTable, format_value};
use crate::wrapper::DateWrapper;

use super::{ConversionError, TargetType, coerce};

/// Deepest table nesting a result may have.
const MAX_DEPTH: usize = 32;

/// Values one conversion may produce, counted across shared subtables.
const MAX_NODES: usize = 100_000;

/// How date values are exposed to scripts.
pub trait DateWrapping {
    fn wrap_date(&self, lua: &Lua, value: DateValue) -> LuaResult<Value>;
}

/// Allocates a new wrapper for every date.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshWrapping;

impl DateWrapping for FreshWrapping {
    fn wrap_date(&self, lua: &Lua, value: DateValue) -> LuaResult<Value> {
        lua.create_userdata(DateWrapper::new(value)).map(Value::UserData)
    }
}

/// Script-visible format object.
#[derive(Debug, Clone)]
pub struct FormatHandle(pub FormatSpec);

impl UserData for FormatHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("pattern", |_, this| Ok(this.0.pattern().to_string()));
        fields.add_field_method_get("kind", |_, this| {
            Ok(match this.0 {
                FormatSpec::Number(_) => "number",
                FormatSpec::Date(_) => "date",
            })
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("format", |_, this, value: Value| {
            let host = from_script(&value).map_err(mlua::Error::external)?;
            format_value(&this.0, &host).map_err(mlua::Error::external)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(this.0.pattern().to_string())
        });
    }
}

/// Convert a script value to `target`.
pub fn to_host(value: &Value, target: &TargetType) -> Result<HostValue, ConversionError> {
    coerce(from_script(value)?, target)
}

/// Reduce a script value to its generic host form. Wrappers are unwrapped
/// first and `nil` becomes `Null`.
pub fn from_script(value: &Value) -> Result<HostValue, ConversionError> {
    Walk::default().value(value)
}

/// State of one conversion: the tables on the current path and the number
/// of values produced so far.
#[derive(Default)]
struct Walk {
    path: Vec<*const c_void>,
    nodes: usize,
}

impl Walk {
    fn value(&mut self, value: &Value) -> Result<HostValue, ConversionError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ConversionError::new(
                value.type_name(),
                TargetType::Any,
                format!("result has more than {MAX_NODES} values"),
            ));
        }
        match value {
            Value::Nil => Ok(HostValue::Null),
            Value::Boolean(b) => Ok(HostValue::Bool(*b)),
            Value::Integer(i) => Ok(HostValue::Int(*i)),
            Value::Number(n) => Ok(HostValue::Float(*n)),
            Value::String(s) => Ok(HostValue::Str(s.to_string_lossy().into())),
            Value::UserData(ud) => unwrap_userdata(ud),
            Value::Table(table) => {
                let id = table.to_pointer();
                if self.path.contains(&id) {
                    return Err(ConversionError::new("table", TargetType::Any, "table contains itself"));
                }
                if self.path.len() >= MAX_DEPTH {
                    return Err(ConversionError::new("table", TargetType::Any, "nested too deeply"));
                }
                self.path.push(id);
                let result = self.table(table);
                self.path.pop();
                result
            }
            other => Err(ConversionError::new(
                other.type_name(),
                TargetType::Any,
                "value has no host representation",
            )),
        }
    }

    fn table(&mut self, table: &Table) -> Result<HostValue, ConversionError> {
        let lua_err =
            |e: mlua::Error| ConversionError::new("table", TargetType::Any, e.to_string());

        let mut entries = Vec::new();
        for pair in table.clone().pairs::<Value, Value>() {
            entries.push(pair.map_err(lua_err)?);
        }

        let len = table.raw_len();
        if entries.len() == len {
            let mut items = Vec::with_capacity(len);
            for i in 1..=len {
                let item: Value = table.raw_get(i).map_err(lua_err)?;
                items.push(self.value(&item)?);
            }
            return Ok(HostValue::List(items));
        }

        let mut keyed = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let key = match k {
                Value::String(s) => s.to_string_lossy().into(),
                Value::Integer(i) => i.to_string(),
                other => {
                    return Err(ConversionError::new(
                        other.type_name(),
                        TargetType::Any,
                        "table keys must be strings or integers",
                    ));
                }
            };
            keyed.push((key, self.value(&v)?));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(HostValue::Map(keyed.into_iter().collect()))
    }
}

fn unwrap_userdata(ud: &AnyUserData) -> Result<HostValue, ConversionError> {
    let lua_err = |e: mlua::Error| ConversionError::new("userdata", TargetType::Any, e.to_string());
    if ud.is::<DateWrapper>() {
        let wrapper = ud.borrow::<DateWrapper>().map_err(lua_err)?;
        return Ok(HostValue::Date(wrapper.value()));
    }
    if ud.is::<FormatHandle>() {
        let handle = ud.borrow::<FormatHandle>().map_err(lua_err)?;
        return Ok(HostValue::Format(handle.0.clone()));
    }
    Err(ConversionError::new("userdata", TargetType::Any, "opaque handle cannot leave the script"))
}

/// Expose a host value to scripts. Dates go through `wrapping`.
pub fn to_script(lua: &Lua, value: HostValue, wrapping: &dyn DateWrapping) -> LuaResult<Value> {
    Ok(match value {
        HostValue::Null => Value::Nil,
        HostValue::Bool(b) => Value::Boolean(b),
        HostValue::Int(i) => Value::Integer(i),
        HostValue::Float(f) => Value::Number(f),
        HostValue::Str(s) => Value::String(lua.create_string(&s)?),
        HostValue::Date(d) => wrapping.wrap_date(lua, d)?,
        HostValue::Color(c) => {
            let t = lua.create_table()?;
            t.set("r", c.r)?;
            t.set("g", c.g)?;
            t.set("b", c.b)?;
            t.set("a", c.a)?;
            Value::Table(t)
        }
        HostValue::Geometry(g) => Value::Table(geometry_table(lua, &g)?),
        HostValue::Format(spec) => Value::UserData(lua.create_userdata(FormatHandle(spec))?),
        HostValue::List(items) => {
            let t = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.into_iter().enumerate() {
                t.raw_set(i + 1, to_script(lua, item, wrapping)?)?;
            }
            Value::Table(t)
        }
        HostValue::Map(table) => {
            let t = lua.create_table_with_capacity(0, table.len())?;
            for (k, v) in table.iter() {
                t.raw_set(k, to_script(lua, v.clone(), wrapping)?)?;
            }
            Value::Table(t)
        }
    })
}

fn geometry_table(lua: &Lua, geometry: &Geometry) -> LuaResult<Table> {
    let t = lua.create_table()?;
    match *geometry {
        Geometry::Point { x, y } => {
            t.set("x", x)?;
            t.set("y", y)?;
        }
        Geometry::Dimension { width, height } => {
            t.set("width", width)?;
            t.set("height", height)?;
        }
        Geometry::Insets { top, left, bottom, right } => {
            t.set("top", top)?;
            t.set("left", left)?;
            t.set("bottom", bottom)?;
            t.set("right", right)?;
        }
        Geometry::Rect { x, y, width, height } | Geometry::Ellipse { x, y, width, height } => {
            t.set("x", x)?;
            t.set("y", y)?;
            t.set("width", width)?;
            t.set("height", height)?;
        }
        Geometry::Polygon { ref points } => {
            let list = lua.create_table_with_capacity(points.len(), 0)?;
            for (i, (x, y)) in points.iter().enumerate() {
                let p = lua.create_table()?;
                p.set("x", *x)?;
                p.set("y", *y)?;
                list.raw_set(i + 1, p)?;
            }
            t.set("points", list)?;
        }
    }
    Ok(t)
}

/// A variable table goes back to scripts as an array of `{key, value}`
/// pairs.
pub fn var_table_to_script(
    lua: &Lua,
    table: &VarTable,
    wrapping: &dyn DateWrapping,
) -> LuaResult<Table> {
    let out = lua.create_table_with_capacity(table.len(), 0)?;
    for (i, (k, v)) in table.iter().enumerate() {
        let pair = lua.create_table_with_capacity(2, 0)?;
        pair.raw_set(1, k)?;
        pair.raw_set(2, to_script(lua, v.clone(), wrapping)?)?;
        out.raw_set(i + 1, pair)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Color, DateKind};
    use crate::marshal::IntWidth;

    fn eval(lua: &Lua, code: &str) -> Value {
        lua.load(code).eval().unwrap()
    }

    #[test]
    fn test_scalars_from_script() {
        let lua = Lua::new();
        assert_eq!(from_script(&eval(&lua, "nil")).unwrap(), HostValue::Null);
        assert_eq!(from_script(&eval(&lua, "1 + 1")).unwrap(), HostValue::Int(2));
        assert_eq!(from_script(&eval(&lua, "1 / 2")).unwrap(), HostValue::Float(0.5));
        assert_eq!(from_script(&eval(&lua, "'hi'")).unwrap(), HostValue::Str("hi".into()));
    }

    #[test]
    fn test_sequence_and_keyed_tables() {
        let lua = Lua::new();
        assert_eq!(
            from_script(&eval(&lua, "{1, 'a', true}")).unwrap(),
            HostValue::List(vec![HostValue::Int(1), "a".into(), HostValue::Bool(true)])
        );
        let HostValue::Map(map) = from_script(&eval(&lua, "{b = 2, a = 1}")).unwrap() else {
            panic!("expected map");
        };
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_cyclic_table_is_rejected() {
        let lua = Lua::new();
        let value = eval(&lua, "local t = {}; t.self = t; return t");
        let err = from_script(&value).unwrap_err();
        assert!(err.to_string().contains("contains itself"), "{err}");
    }

    #[test]
    fn test_shared_subtables_are_converted_by_value() {
        let lua = Lua::new();
        let value = eval(&lua, "local p = {1, 2}; return {p, p}");
        let pair = HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]);
        assert_eq!(from_script(&value).unwrap(), HostValue::List(vec![pair.clone(), pair]));
    }

    #[test]
    fn test_doubling_tables_hit_the_value_budget() {
        let lua = Lua::new();
        let value = eval(&lua, "local t = {} for i = 1, 30 do t = {t, t} end return t");
        let started = std::time::Instant::now();
        let err = from_script(&value).unwrap_err();
        assert!(err.to_string().contains("more than"), "{err}");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_to_host_with_targets() {
        let lua = Lua::new();
        let color = to_host(&eval(&lua, "{r = 10, g = 20, b = 30}"), &TargetType::Color).unwrap();
        assert_eq!(color, HostValue::Color(Color::rgb(10, 20, 30)));

        let n = to_host(&eval(&lua, "'12'"), &TargetType::Int(IntWidth::I32)).unwrap();
        assert_eq!(n, HostValue::Int(12));

        let pairs = to_host(
            &eval(&lua, "{{'a', 1}, {nil, 2}, {'b', nil}}"),
            &TargetType::VarTable { skip_nulls: true },
        )
        .unwrap();
        assert_eq!(pairs, HostValue::Map(VarTable::new().with("a", 1i64)));
    }

    #[test]
    fn test_date_wrapper_unwraps() {
        let lua = Lua::new();
        let date = DateValue::parse("2024-05-06", DateKind::Date).unwrap();
        let value = to_script(&lua, HostValue::Date(date), &FreshWrapping).unwrap();
        lua.globals().set("d", value.clone()).unwrap();

        assert_eq!(from_script(&value).unwrap(), HostValue::Date(date));
        let year: i64 = lua.load("d.year").eval().unwrap();
        assert_eq!(year, 2024);
    }

    #[test]
    fn test_format_handle_in_script() {
        let lua = Lua::new();
        let value =
            to_script(&lua, HostValue::Format(FormatSpec::Number("0.00".into())), &FreshWrapping)
                .unwrap();
        lua.globals().set("f", value).unwrap();
        let out: String = lua.load("f:format(2)").eval().unwrap();
        assert_eq!(out, "2.00");
        let kind: String = lua.load("f.kind").eval().unwrap();
        assert_eq!(kind, "number");
    }

    #[test]
    fn test_var_table_goes_back_as_pairs() {
        let lua = Lua::new();
        let table = VarTable::new().with("x", 1i64).with("y", "two");
        let pairs = var_table_to_script(&lua, &table, &FreshWrapping).unwrap();
        lua.globals().set("vars", pairs).unwrap();
        let rendered: String =
            lua.load("vars[1][1] .. '=' .. vars[1][2] .. ',' .. vars[2][1] .. '=' .. vars[2][2]")
                .eval()
                .unwrap();
        assert_eq!(rendered, "x=1,y=two");
    }

    #[test]
    fn test_geometry_to_script_and_back() {
        let lua = Lua::new();
        let rect = HostValue::Geometry(Geometry::Rect { x: 1.0, y: 2.0, width: 3.0, height: 4.0 });
        let value = to_script(&lua, rect.clone(), &FreshWrapping).unwrap();
        assert_eq!(to_host(&value, &TargetType::Rect).unwrap(), rect);
    }
}
