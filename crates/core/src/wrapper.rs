//! Date wrappers and the per-worker pools that recycle them.
//!
//! Dates are produced once per evaluated cell across large tables, so the
//! userdata that exposes them to scripts is pooled per [`DateKind`]. A slot
//! handed out by [`WrapperPools::acquire`] stays bound to its value until the
//! next [`WrapperPools::start`].

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{Datelike, Timelike};
use mlua::{
    AnyUserData, Lua, MetaMethod, Result as LuaResult, UserData, UserDataFields, UserDataMethods,
    UserDataRef, Value,
};

use crate::host::format::format_date;
use crate::host::{DateKind, DateValue};
use crate::marshal::DateWrapping;

/// Userdata exposing one date value to scripts.
#[derive(Debug, Clone)]
pub struct DateWrapper {
    value: DateValue,
}

impl DateWrapper {
    pub fn new(value: DateValue) -> Self {
        Self { value }
    }

    pub fn value(&self) -> DateValue {
        self.value
    }

    fn rebind(&mut self, value: DateValue) {
        self.value = value;
    }
}

impl UserData for DateWrapper {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("year", |_, this| Ok(this.value.to_datetime().year()));
        fields.add_field_method_get("month", |_, this| Ok(this.value.to_datetime().month()));
        fields.add_field_method_get("day", |_, this| Ok(this.value.to_datetime().day()));
        fields.add_field_method_get("hour", |_, this| Ok(this.value.to_datetime().hour()));
        fields.add_field_method_get("minute", |_, this| Ok(this.value.to_datetime().minute()));
        fields.add_field_method_get("second", |_, this| Ok(this.value.to_datetime().second()));
        fields.add_field_method_get("nanos", |_, this| Ok(this.value.to_datetime().nanosecond()));
        fields.add_field_method_get("kind", |_, this| Ok(this.value.kind().as_str()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("format", |_, this, pattern: String| {
            Ok(format_date(&pattern, &this.value))
        });
        methods.add_method("epoch_millis", |_, this, ()| Ok(this.value.epoch_millis()));

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.value.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: UserDataRef<DateWrapper>| {
            Ok(this.value.to_datetime() == other.value.to_datetime())
        });
        methods.add_meta_method(MetaMethod::Lt, |_, this, other: UserDataRef<DateWrapper>| {
            Ok(this.value.to_datetime() < other.value.to_datetime())
        });
        methods.add_meta_method(MetaMethod::Le, |_, this, other: UserDataRef<DateWrapper>| {
            Ok(this.value.to_datetime() <= other.value.to_datetime())
        });
    }
}

#[derive(Default)]
struct Pool {
    slots: Vec<AnyUserData>,
    used: usize,
}

/// Wrapper pools for one worker, one per date kind.
#[derive(Default)]
pub struct WrapperPools {
    pools: HashMap<DateKind, Pool>,
}

impl WrapperPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every slot unused. Allocated wrappers are kept for reuse.
    pub fn start(&mut self) {
        for pool in self.pools.values_mut() {
            pool.used = 0;
        }
    }

    /// Bind `value` to the next unused slot of its kind, allocating one when
    /// the pool is exhausted.
    pub fn acquire(&mut self, lua: &Lua, value: DateValue) -> LuaResult<AnyUserData> {
        let pool = self.pools.entry(value.kind()).or_default();

        if let Some(slot) = pool.slots.get(pool.used) {
            slot.borrow_mut::<DateWrapper>()?.rebind(value);
            pool.used += 1;
            return Ok(slot.clone());
        }

        let slot = lua.create_userdata(DateWrapper::new(value))?;
        pool.slots.push(slot.clone());
        pool.used += 1;
        Ok(slot)
    }

    /// Drop every pool.
    pub fn stop(&mut self) {
        self.pools.clear();
    }

    pub fn allocated(&self, kind: DateKind) -> usize {
        self.pools.get(&kind).map_or(0, |p| p.slots.len())
    }

    pub fn in_use(&self, kind: DateKind) -> usize {
        self.pools.get(&kind).map_or(0, |p| p.used)
    }
}

impl DateWrapping for RefCell<WrapperPools> {
    fn wrap_date(&self, lua: &Lua, value: DateValue) -> LuaResult<Value> {
        self.borrow_mut().acquire(lua, value).map(Value::UserData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(day: u32) -> DateValue {
        DateValue::Date(NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
    }

    fn ptr(slot: &AnyUserData) -> *const std::ffi::c_void {
        Value::UserData(slot.clone()).to_pointer()
    }

    fn value_of(slot: &AnyUserData) -> DateValue {
        slot.borrow::<DateWrapper>().unwrap().value()
    }

    #[test]
    fn test_second_acquire_returns_distinct_slot() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        pools.start();

        let first = pools.acquire(&lua, date(1)).unwrap();
        let second = pools.acquire(&lua, date(2)).unwrap();

        assert_ne!(ptr(&first), ptr(&second));
        assert_eq!(value_of(&first), date(1));
        assert_eq!(value_of(&second), date(2));
    }

    #[test]
    fn test_start_rebinds_first_slot() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        pools.start();
        let first = pools.acquire(&lua, date(1)).unwrap();
        let _second = pools.acquire(&lua, date(2)).unwrap();

        pools.start();
        let again = pools.acquire(&lua, date(9)).unwrap();

        assert_eq!(ptr(&again), ptr(&first));
        assert_eq!(value_of(&first), date(9));
    }

    #[test]
    fn test_full_reuse_after_start() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        let n = 25;

        pools.start();
        for day in 1..=n {
            pools.acquire(&lua, date(day)).unwrap();
        }
        assert_eq!(pools.allocated(DateKind::Date), n as usize);

        pools.start();
        assert_eq!(pools.in_use(DateKind::Date), 0);
        for day in 1..=n {
            pools.acquire(&lua, date(day)).unwrap();
        }
        assert_eq!(pools.allocated(DateKind::Date), n as usize);
        assert_eq!(pools.in_use(DateKind::Date), n as usize);
    }

    #[test]
    fn test_kinds_are_pooled_separately() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        pools.start();
        pools.acquire(&lua, date(1)).unwrap();
        pools.acquire(&lua, date(1).convert(DateKind::Timestamp)).unwrap();

        assert_eq!(pools.allocated(DateKind::Date), 1);
        assert_eq!(pools.allocated(DateKind::Timestamp), 1);
        assert_eq!(pools.allocated(DateKind::Time), 0);
    }

    #[test]
    fn test_stop_discards_pools() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        pools.start();
        pools.acquire(&lua, date(1)).unwrap();
        pools.stop();
        assert_eq!(pools.allocated(DateKind::Date), 0);
    }

    #[test]
    fn test_wrapper_script_surface() {
        let lua = Lua::new();
        let mut pools = WrapperPools::new();
        pools.start();
        lua.globals().set("a", pools.acquire(&lua, date(3)).unwrap()).unwrap();
        lua.globals().set("b", pools.acquire(&lua, date(5)).unwrap()).unwrap();

        let (lt, eq, text): (bool, bool, String) =
            lua.load("return a < b, a == b, tostring(a)").eval().unwrap();
        assert!(lt);
        assert!(!eq);
        assert_eq!(text, "2024-01-03");

        let formatted: String = lua.load("b:format('dd/MM/yyyy')").eval().unwrap();
        assert_eq!(formatted, "05/01/2024");
    }
}
