//! `wasmlower-runtime`: runtime containers targeted by wasmlower output.
//!
//! Generated modules never touch raw memory or tables directly. They call
//! into the types defined here:
//! - `Memory` for linear memory (`size`, `grow`, `load_int`, `store_int`, ...)
//! - `Table` for nullable function references
//! - `Global` for kind-tagged global cells
//! - `FuncRef` / `Value` for dynamically typed calls across module boundaries
//! - `Environment` / `Instance` for wiring imports to exports
//! - `WasmTrap` / `WasmResult<T>` for trap propagation

use std::fmt;

/// WebAssembly page size: 64 KiB per the Wasm specification.
pub const PAGE_SIZE: usize = 65536;

mod memory;
pub use memory::Memory;

mod table;
pub use table::Table;

mod global;
pub use global::Global;

mod value;
pub use value::{ExternRef, FuncRef, Signature, ValType, Value};

mod env;
pub use env::{
    resolve_func, resolve_global, resolve_memory, resolve_table, Environment, HostModule,
    Instance, InstantiationError,
};

pub mod ops;

/// Wasm execution errors: no panics, no unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmTrap {
    /// Memory access out of bounds.
    OutOfBounds,
    /// Integer division by zero.
    DivisionByZero,
    /// Integer overflow (`i32.div_s` of `MIN / -1`, or trapping truncation
    /// of an out-of-range float).
    IntegerOverflow,
    /// Trapping truncation of a NaN.
    InvalidConversion,
    /// Unreachable instruction executed.
    Unreachable,
    /// Indirect call type mismatch (`call_indirect` signature check).
    IndirectCallTypeMismatch,
    /// Table access out of bounds.
    TableOutOfBounds,
    /// Null entry in table.
    UndefinedElement,
    /// Global accessed with the wrong value kind.
    GlobalKindMismatch,
    /// Second write to an immutable global.
    ImmutableGlobal,
    /// A dynamic call received or produced values of the wrong type.
    ValueTypeMismatch,
    /// A function reference outlived the module instance that created it.
    InstanceDropped,
}

impl fmt::Display for WasmTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WasmTrap::OutOfBounds => "out of bounds memory access",
            WasmTrap::DivisionByZero => "integer divide by zero",
            WasmTrap::IntegerOverflow => "integer overflow",
            WasmTrap::InvalidConversion => "invalid conversion to integer",
            WasmTrap::Unreachable => "unreachable executed",
            WasmTrap::IndirectCallTypeMismatch => "indirect call type mismatch",
            WasmTrap::TableOutOfBounds => "out of bounds table access",
            WasmTrap::UndefinedElement => "uninitialized element",
            WasmTrap::GlobalKindMismatch => "global accessed with wrong kind",
            WasmTrap::ImmutableGlobal => "write to immutable global",
            WasmTrap::ValueTypeMismatch => "value type mismatch",
            WasmTrap::InstanceDropped => "module instance dropped",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for WasmTrap {}

/// Result type for Wasm operations: `Result<T, WasmTrap>`.
pub type WasmResult<T> = Result<T, WasmTrap>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasm_trap_is_copy() {
        let trap = WasmTrap::OutOfBounds;
        let trap2 = trap;
        assert_eq!(trap, trap2);
    }

    #[test]
    fn wasm_result_err() {
        let result: WasmResult<i32> = Err(WasmTrap::DivisionByZero);
        assert_eq!(result, Err(WasmTrap::DivisionByZero));
    }

    #[test]
    fn trap_display_matches_wasm_wording() {
        assert_eq!(
            WasmTrap::OutOfBounds.to_string(),
            "out of bounds memory access"
        );
        assert_eq!(WasmTrap::Unreachable.to_string(), "unreachable executed");
    }
}
