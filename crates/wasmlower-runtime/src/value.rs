//! Dynamically typed values and function references.
//!
//! Direct calls between functions of one generated module use plain Rust
//! signatures. Everything that crosses a module boundary or goes through a
//! table (`call_indirect`, imports, `ref.func`) uses a `FuncRef`, which
//! carries its `Signature` and takes and returns `Value` slices.

use crate::{WasmResult, WasmTrap};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Wasm value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
}

impl ValType {
    /// One-letter kind tag used by `Global::new`.
    pub fn tag(self) -> char {
        match self {
            ValType::I32 => 'i',
            ValType::I64 => 'I',
            ValType::F32 => 'f',
            ValType::F64 => 'F',
            ValType::FuncRef => 'r',
            ValType::ExternRef => 'e',
        }
    }

    /// Inverse of [`ValType::tag`].
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'i' => Some(ValType::I32),
            'I' => Some(ValType::I64),
            'f' => Some(ValType::F32),
            'F' => Some(ValType::F64),
            'r' => Some(ValType::FuncRef),
            'e' => Some(ValType::ExternRef),
            _ => None,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

/// A function signature. Generated modules declare one `static` per type
/// section entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ValType],
    pub results: &'static [ValType],
}

/// Opaque host reference (`externref`).
#[derive(Clone)]
pub struct ExternRef(Rc<dyn Any>);

impl ExternRef {
    pub fn new<T: Any>(value: T) -> Self {
        ExternRef(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl PartialEq for ExternRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternRef({:p})", Rc::as_ptr(&self.0))
    }
}

type DynFunc = dyn Fn(&[Value]) -> WasmResult<Vec<Value>>;

/// A callable, signature-tagged function reference.
#[derive(Clone)]
pub struct FuncRef {
    signature: &'static Signature,
    func: Rc<DynFunc>,
}

impl FuncRef {
    pub fn new<F>(signature: &'static Signature, func: F) -> Self
    where
        F: Fn(&[Value]) -> WasmResult<Vec<Value>> + 'static,
    {
        Self {
            signature,
            func: Rc::new(func),
        }
    }

    pub fn signature(&self) -> &'static Signature {
        self.signature
    }

    /// Trap with `IndirectCallTypeMismatch` unless this reference has
    /// exactly the `expected` signature.
    pub fn expect_type(&self, expected: &Signature) -> WasmResult<()> {
        if self.signature == expected {
            Ok(())
        } else {
            Err(WasmTrap::IndirectCallTypeMismatch)
        }
    }

    /// Invoke the function. Argument and result types are checked against
    /// the signature.
    pub fn call(&self, args: &[Value]) -> WasmResult<Vec<Value>> {
        check_types(args, self.signature.params)?;
        let results = (self.func)(args)?;
        check_types(&results, self.signature.results)?;
        Ok(results)
    }
}

fn check_types(values: &[Value], types: &[ValType]) -> WasmResult<()> {
    if values.len() != types.len() || values.iter().zip(types).any(|(v, t)| v.ty() != *t) {
        return Err(WasmTrap::ValueTypeMismatch);
    }
    Ok(())
}

impl PartialEq for FuncRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncRef")
            .field("signature", self.signature)
            .finish_non_exhaustive()
    }
}

/// A dynamically typed Wasm value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<FuncRef>),
    ExternRef(Option<ExternRef>),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
        }
    }

    /// The zero value of `ty` (null for reference types).
    pub fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0.0),
            ValType::F64 => Value::F64(0.0),
            ValType::FuncRef => Value::FuncRef(None),
            ValType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn as_i32(&self) -> WasmResult<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    pub fn as_i64(&self) -> WasmResult<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    pub fn as_f32(&self) -> WasmResult<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    pub fn as_f64(&self) -> WasmResult<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    pub fn as_func_ref(&self) -> WasmResult<Option<FuncRef>> {
        match self {
            Value::FuncRef(v) => Ok(v.clone()),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    pub fn as_extern_ref(&self) -> WasmResult<Option<ExternRef>> {
        match self {
            Value::ExternRef(v) => Ok(v.clone()),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ADD: Signature = Signature {
        params: &[ValType::I32, ValType::I32],
        results: &[ValType::I32],
    };
    static NULLARY: Signature = Signature {
        params: &[],
        results: &[],
    };

    fn adder() -> FuncRef {
        FuncRef::new(&ADD, |args| {
            Ok(vec![Value::I32(
                args[0].as_i32()?.wrapping_add(args[1].as_i32()?),
            )])
        })
    }

    #[test]
    fn call_checks_and_dispatches() {
        let f = adder();
        let out = f.call(&[Value::I32(3), Value::I32(4)]).unwrap();
        assert_eq!(out, vec![Value::I32(7)]);
    }

    #[test]
    fn call_rejects_wrong_argument_types() {
        let f = adder();
        assert_eq!(
            f.call(&[Value::I32(3), Value::I64(4)]),
            Err(WasmTrap::ValueTypeMismatch)
        );
        assert_eq!(f.call(&[Value::I32(3)]), Err(WasmTrap::ValueTypeMismatch));
    }

    #[test]
    fn call_rejects_wrong_result_types() {
        let f = FuncRef::new(&ADD, |_| Ok(vec![Value::F32(1.0)]));
        assert_eq!(
            f.call(&[Value::I32(0), Value::I32(0)]),
            Err(WasmTrap::ValueTypeMismatch)
        );
    }

    #[test]
    fn expect_type_compares_structurally() {
        static ADD_AGAIN: Signature = Signature {
            params: &[ValType::I32, ValType::I32],
            results: &[ValType::I32],
        };
        let f = adder();
        assert_eq!(f.expect_type(&ADD_AGAIN), Ok(()));
        assert_eq!(
            f.expect_type(&NULLARY),
            Err(WasmTrap::IndirectCallTypeMismatch)
        );
    }

    #[test]
    fn func_ref_equality_is_identity() {
        let a = adder();
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, adder());
    }

    #[test]
    fn tags_roundtrip() {
        for ty in [
            ValType::I32,
            ValType::I64,
            ValType::F32,
            ValType::F64,
            ValType::FuncRef,
            ValType::ExternRef,
        ] {
            assert_eq!(ValType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(ValType::from_tag('x'), None);
    }

    #[test]
    fn extern_ref_downcast() {
        let r = ExternRef::new(String::from("host"));
        assert_eq!(r.downcast_ref::<String>().map(String::as_str), Some("host"));
        assert!(r.downcast_ref::<u32>().is_none());
    }
}
