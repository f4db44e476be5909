//! Kind-tagged global cells.
//!
//! A `Global` is created with a one-letter kind (`i` i32, `I` i64, `f` f32,
//! `F` f64, `r` funcref, `e` externref) and a mutability flag. An immutable
//! global accepts exactly one write, its initialiser.

use crate::{ValType, Value, WasmResult, WasmTrap};

#[derive(Debug, Clone)]
pub struct Global {
    value: Value,
    mutable: bool,
    initialized: bool,
}

impl Global {
    /// Fails with `GlobalKindMismatch` for an unknown kind tag.
    pub fn new(kind: char, mutable: bool) -> WasmResult<Self> {
        let ty = ValType::from_tag(kind).ok_or(WasmTrap::GlobalKindMismatch)?;
        Ok(Self {
            value: Value::default_for(ty),
            mutable,
            initialized: false,
        })
    }

    pub fn ty(&self) -> ValType {
        self.value.ty()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Read an integer global (`i` or `I`), widened to i64.
    pub fn get_int(&self) -> WasmResult<i64> {
        match self.value {
            Value::I32(v) => Ok(v as i64),
            Value::I64(v) => Ok(v),
            _ => Err(WasmTrap::GlobalKindMismatch),
        }
    }

    /// Read a float global (`f` or `F`), widened to f64.
    pub fn get_float(&self) -> WasmResult<f64> {
        match self.value {
            Value::F32(v) => Ok(v as f64),
            Value::F64(v) => Ok(v),
            _ => Err(WasmTrap::GlobalKindMismatch),
        }
    }

    /// Read a reference global (`r` or `e`).
    pub fn get_ref(&self) -> WasmResult<Value> {
        match &self.value {
            Value::FuncRef(_) | Value::ExternRef(_) => Ok(self.value.clone()),
            _ => Err(WasmTrap::GlobalKindMismatch),
        }
    }

    /// Read the exact value, whatever the kind.
    pub fn get(&self) -> Value {
        self.value.clone()
    }

    pub fn set_int(&mut self, v: i64) -> WasmResult<()> {
        let value = match self.value {
            Value::I32(_) => Value::I32(v as i32),
            Value::I64(_) => Value::I64(v),
            _ => return Err(WasmTrap::GlobalKindMismatch),
        };
        self.store(value)
    }

    pub fn set_float(&mut self, v: f64) -> WasmResult<()> {
        let value = match self.value {
            Value::F32(_) => Value::F32(v as f32),
            Value::F64(_) => Value::F64(v),
            _ => return Err(WasmTrap::GlobalKindMismatch),
        };
        self.store(value)
    }

    pub fn set_ref(&mut self, v: Value) -> WasmResult<()> {
        match (&self.value, &v) {
            (Value::FuncRef(_), Value::FuncRef(_)) | (Value::ExternRef(_), Value::ExternRef(_)) => {
                self.store(v)
            }
            _ => Err(WasmTrap::GlobalKindMismatch),
        }
    }

    /// Write a value of any kind; the kind must match.
    pub fn set(&mut self, v: Value) -> WasmResult<()> {
        if v.ty() != self.value.ty() {
            return Err(WasmTrap::GlobalKindMismatch);
        }
        self.store(v)
    }

    fn store(&mut self, value: Value) -> WasmResult<()> {
        if self.initialized && !self.mutable {
            return Err(WasmTrap::ImmutableGlobal);
        }
        self.value = value;
        self.initialized = true;
        Ok(())
    }
}
