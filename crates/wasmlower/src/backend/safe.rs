//! Safe backend: emits 100% safe Rust with bounds checking.
//!
//! Integer arithmetic wraps, division and trapping truncation go through the
//! runtime's `ops` helpers, and every memory access is bounds checked by the
//! runtime `Memory`. All fallible operations propagate `WasmTrap` with `?`.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::ir::{BinOp, CmpOp, CvtOp, LoadOp, StoreOp, UnOp, ValType};

/// Safe code generation backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeBackend;

impl SafeBackend {
    pub fn new() -> Self {
        SafeBackend
    }
}

fn unsupported(what: &str, ty: ValType, op: impl std::fmt::Debug) -> Error {
    Error::validation(format!("{what} {op:?} is not defined for {ty}"))
}

/// The unsigned counterpart of an integer type.
fn unsigned(ty: ValType) -> &'static str {
    match ty {
        ValType::I64 => "u64",
        _ => "u32",
    }
}

/// Negative literals are parenthesised so they can be method receivers.
fn signed_literal(text: String, negative: bool) -> String {
    if negative {
        format!("({text})")
    } else {
        text
    }
}

/// Emit a float constant, handling NaN and infinity special values. NaNs
/// keep their payload through `from_bits`.
fn float_const(ty: &str, value: f64, is_nan: bool, bits: String, debug: String) -> String {
    if is_nan {
        format!("{ty}::from_bits({bits})")
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            format!("{ty}::INFINITY")
        } else {
            format!("{ty}::NEG_INFINITY")
        }
    } else {
        signed_literal(format!("{debug}{ty}"), value.is_sign_negative())
    }
}

impl Backend for SafeBackend {
    fn i32_const(&self, value: i32) -> String {
        signed_literal(format!("{value}i32"), value < 0)
    }

    fn i64_const(&self, value: i64) -> String {
        signed_literal(format!("{value}i64"), value < 0)
    }

    fn f32_const(&self, bits: u32) -> String {
        let value = f32::from_bits(bits);
        float_const(
            "f32",
            value as f64,
            value.is_nan(),
            format!("{bits:#010x}"),
            format!("{value:?}"),
        )
    }

    fn f64_const(&self, bits: u64) -> String {
        let value = f64::from_bits(bits);
        float_const(
            "f64",
            value,
            value.is_nan(),
            format!("{bits:#018x}"),
            format!("{value:?}"),
        )
    }

    fn compare(&self, ty: ValType, op: CmpOp, lhs: &str, rhs: &str) -> Result<String> {
        let float = matches!(ty, ValType::F32 | ValType::F64);
        let u = unsigned(ty);
        let expr = match op {
            CmpOp::Eq => format!("{lhs} == {rhs}"),
            CmpOp::Ne => format!("{lhs} != {rhs}"),
            CmpOp::LtS | CmpOp::Lt => format!("{lhs} < {rhs}"),
            CmpOp::GtS | CmpOp::Gt => format!("{lhs} > {rhs}"),
            CmpOp::LeS | CmpOp::Le => format!("{lhs} <= {rhs}"),
            CmpOp::GeS | CmpOp::Ge => format!("{lhs} >= {rhs}"),
            // unsigned: reinterpret the bit pattern
            CmpOp::LtU => format!("({lhs} as {u}) < ({rhs} as {u})"),
            CmpOp::GtU => format!("({lhs} as {u}) > ({rhs} as {u})"),
            CmpOp::LeU => format!("({lhs} as {u}) <= ({rhs} as {u})"),
            CmpOp::GeU => format!("({lhs} as {u}) >= ({rhs} as {u})"),
        };
        let signed_op = matches!(
            op,
            CmpOp::LtS
                | CmpOp::LtU
                | CmpOp::GtS
                | CmpOp::GtU
                | CmpOp::LeS
                | CmpOp::LeU
                | CmpOp::GeS
                | CmpOp::GeU
        );
        let float_op = matches!(op, CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge);
        if ty.is_ref() || (float && signed_op) || (!float && float_op) {
            return Err(unsupported("comparison", ty, op));
        }
        Ok(format!("({expr}) as i32"))
    }

    fn unary(&self, ty: ValType, op: UnOp, a: &str) -> Result<String> {
        let expr = match (ty, op) {
            (ValType::I32 | ValType::I64, UnOp::Eqz) => format!("({a} == 0) as i32"),
            (ValType::I32, UnOp::Clz) => format!("{a}.leading_zeros() as i32"),
            (ValType::I32, UnOp::Ctz) => format!("{a}.trailing_zeros() as i32"),
            (ValType::I32, UnOp::Popcnt) => format!("{a}.count_ones() as i32"),
            (ValType::I64, UnOp::Clz) => format!("{a}.leading_zeros() as i64"),
            (ValType::I64, UnOp::Ctz) => format!("{a}.trailing_zeros() as i64"),
            (ValType::I64, UnOp::Popcnt) => format!("{a}.count_ones() as i64"),
            (ValType::I32, UnOp::Extend8S) => format!("{a} as i8 as i32"),
            (ValType::I32, UnOp::Extend16S) => format!("{a} as i16 as i32"),
            (ValType::I64, UnOp::Extend8S) => format!("{a} as i8 as i64"),
            (ValType::I64, UnOp::Extend16S) => format!("{a} as i16 as i64"),
            (ValType::I64, UnOp::Extend32S) => format!("{a} as i32 as i64"),
            (ValType::F32 | ValType::F64, UnOp::Abs) => format!("{a}.abs()"),
            (ValType::F32 | ValType::F64, UnOp::Neg) => format!("-{a}"),
            (ValType::F32 | ValType::F64, UnOp::Ceil) => format!("{a}.ceil()"),
            (ValType::F32 | ValType::F64, UnOp::Floor) => format!("{a}.floor()"),
            (ValType::F32 | ValType::F64, UnOp::Trunc) => format!("{a}.trunc()"),
            // ties-to-even, unlike `round`
            (ValType::F32 | ValType::F64, UnOp::Nearest) => format!("{a}.round_ties_even()"),
            (ValType::F32 | ValType::F64, UnOp::Sqrt) => format!("{a}.sqrt()"),
            _ => return Err(unsupported("unary operator", ty, op)),
        };
        Ok(expr)
    }

    fn binary(&self, ty: ValType, op: BinOp, a: &str, b: &str) -> Result<String> {
        let int = matches!(ty, ValType::I32 | ValType::I64);
        let float = matches!(ty, ValType::F32 | ValType::F64);
        let u = unsigned(ty);
        let expr = match op {
            BinOp::Add if int => format!("{a}.wrapping_add({b})"),
            BinOp::Sub if int => format!("{a}.wrapping_sub({b})"),
            BinOp::Mul if int => format!("{a}.wrapping_mul({b})"),
            BinOp::Add if float => format!("{a} + {b}"),
            BinOp::Sub if float => format!("{a} - {b}"),
            BinOp::Mul if float => format!("{a} * {b}"),
            BinOp::DivS if int => format!("ops::{ty}_div_s({a}, {b})?"),
            BinOp::DivU if int => format!("ops::{ty}_div_u({a}, {b})?"),
            BinOp::RemS if int => format!("ops::{ty}_rem_s({a}, {b})?"),
            BinOp::RemU if int => format!("ops::{ty}_rem_u({a}, {b})?"),
            BinOp::And if int => format!("{a} & {b}"),
            BinOp::Or if int => format!("{a} | {b}"),
            BinOp::Xor if int => format!("{a} ^ {b}"),
            // shift counts are taken modulo the bit width
            BinOp::Shl if int => format!("{a}.wrapping_shl({b} as u32)"),
            BinOp::ShrS if int => format!("{a}.wrapping_shr({b} as u32)"),
            BinOp::ShrU if int => format!("({a} as {u}).wrapping_shr({b} as u32) as {ty}"),
            BinOp::Rotl if int => format!("{a}.rotate_left({b} as u32)"),
            BinOp::Rotr if int => format!("{a}.rotate_right({b} as u32)"),
            BinOp::Div if float => format!("{a} / {b}"),
            BinOp::Min if float => format!("ops::{ty}_min({a}, {b})"),
            BinOp::Max if float => format!("ops::{ty}_max({a}, {b})"),
            BinOp::Copysign if float => format!("{a}.copysign({b})"),
            _ => return Err(unsupported("binary operator", ty, op)),
        };
        Ok(expr)
    }

    fn convert(&self, op: CvtOp, a: &str) -> String {
        use CvtOp::*;
        match op {
            I32WrapI64 => format!("{a} as i32"),
            I32TruncF32S => format!("ops::i32_trunc_f32_s({a})?"),
            I32TruncF32U => format!("ops::i32_trunc_f32_u({a})?"),
            I32TruncF64S => format!("ops::i32_trunc_f64_s({a})?"),
            I32TruncF64U => format!("ops::i32_trunc_f64_u({a})?"),
            I64ExtendI32S => format!("{a} as i64"),
            I64ExtendI32U => format!("{a} as u32 as i64"),
            I64TruncF32S => format!("ops::i64_trunc_f32_s({a})?"),
            I64TruncF32U => format!("ops::i64_trunc_f32_u({a})?"),
            I64TruncF64S => format!("ops::i64_trunc_f64_s({a})?"),
            I64TruncF64U => format!("ops::i64_trunc_f64_u({a})?"),
            F32ConvertI32S | F32ConvertI64S | F32DemoteF64 => format!("{a} as f32"),
            F32ConvertI32U => format!("{a} as u32 as f32"),
            F32ConvertI64U => format!("{a} as u64 as f32"),
            F64ConvertI32S | F64ConvertI64S | F64PromoteF32 => format!("{a} as f64"),
            F64ConvertI32U => format!("{a} as u32 as f64"),
            F64ConvertI64U => format!("{a} as u64 as f64"),
            I32ReinterpretF32 => format!("{a}.to_bits() as i32"),
            I64ReinterpretF64 => format!("{a}.to_bits() as i64"),
            F32ReinterpretI32 => format!("f32::from_bits({a} as u32)"),
            F64ReinterpretI64 => format!("f64::from_bits({a} as u64)"),
            // `as` saturates and maps NaN to 0
            I32TruncSatF32S | I32TruncSatF64S => format!("{a} as i32"),
            I32TruncSatF32U | I32TruncSatF64U => format!("{a} as u32 as i32"),
            I64TruncSatF32S | I64TruncSatF64S => format!("{a} as i64"),
            I64TruncSatF32U | I64TruncSatF64U => format!("{a} as u64 as i64"),
        }
    }

    fn load(&self, memory: &str, op: LoadOp, offset: u32, addr: &str) -> String {
        let ea = format!("ops::effective_address({addr}, {offset})?");
        match op.ty {
            ValType::F32 => {
                format!("f32::from_bits({memory}.borrow().load_int({ea}, 32, false)? as u32)")
            }
            ValType::F64 => format!("{memory}.borrow().load_float({ea}, 64)?"),
            ValType::I64 => format!(
                "{memory}.borrow().load_int({ea}, {}, {})?",
                op.bits, op.signed
            ),
            _ => format!(
                "{memory}.borrow().load_int({ea}, {}, {})? as i32",
                op.bits, op.signed
            ),
        }
    }

    fn store(&self, memory: &str, op: StoreOp, offset: u32, addr: &str, value: &str) -> String {
        let ea = format!("ops::effective_address({addr}, {offset})?");
        match op.ty {
            ValType::F32 => format!(
                "{memory}.borrow_mut().store_int({value}.to_bits() as i64, {ea}, 32)?"
            ),
            ValType::F64 => format!("{memory}.borrow_mut().store_float({value}, {ea}, 64)?"),
            ValType::I64 => format!(
                "{memory}.borrow_mut().store_int({value}, {ea}, {})?",
                op.bits
            ),
            _ => format!(
                "{memory}.borrow_mut().store_int({value} as i64, {ea}, {})?",
                op.bits
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_constants() {
        let b = SafeBackend::new();
        assert_eq!(b.i32_const(42), "42i32");
        assert_eq!(b.i32_const(-5), "(-5i32)");
        assert_eq!(b.i64_const(i64::MIN), "(-9223372036854775808i64)");
    }

    #[test]
    fn float_constants() {
        let b = SafeBackend::new();
        assert_eq!(b.f32_const(1.5f32.to_bits()), "1.5f32");
        assert_eq!(b.f64_const((-0.0f64).to_bits()), "(-0.0f64)");
        assert_eq!(b.f32_const(f32::INFINITY.to_bits()), "f32::INFINITY");
        assert_eq!(b.f64_const(f64::NEG_INFINITY.to_bits()), "f64::NEG_INFINITY");
        assert_eq!(b.f32_const(0x7FC0_0001), "f32::from_bits(0x7fc00001)");
    }

    #[test]
    fn unsigned_comparisons_reinterpret() {
        let b = SafeBackend::new();
        assert_eq!(
            b.compare(ValType::I32, CmpOp::LtU, "v0", "v1").unwrap(),
            "((v0 as u32) < (v1 as u32)) as i32"
        );
        assert_eq!(
            b.compare(ValType::I64, CmpOp::GeS, "v0", "v1").unwrap(),
            "(v0 >= v1) as i32"
        );
        assert!(b.compare(ValType::F32, CmpOp::LtS, "a", "b").is_err());
        assert!(b.compare(ValType::I32, CmpOp::Lt, "a", "b").is_err());
    }

    #[test]
    fn shifts_and_division() {
        let b = SafeBackend::new();
        assert_eq!(
            b.binary(ValType::I64, BinOp::ShrU, "v0", "v1").unwrap(),
            "(v0 as u64).wrapping_shr(v1 as u32) as i64"
        );
        assert_eq!(
            b.binary(ValType::I32, BinOp::DivS, "v0", "v1").unwrap(),
            "ops::i32_div_s(v0, v1)?"
        );
        assert_eq!(
            b.binary(ValType::F64, BinOp::Min, "v0", "v1").unwrap(),
            "ops::f64_min(v0, v1)"
        );
        assert!(b.binary(ValType::F32, BinOp::Rotl, "a", "b").is_err());
        assert!(b.unary(ValType::I32, UnOp::Sqrt, "a").is_err());
    }

    #[test]
    fn memory_access() {
        let b = SafeBackend::new();
        let load = LoadOp {
            ty: ValType::I32,
            bits: 8,
            signed: true,
        };
        assert_eq!(
            b.load("self.mem_0", load, 4, "v0"),
            "self.mem_0.borrow().load_int(ops::effective_address(v0, 4)?, 8, true)? as i32"
        );
        let store = StoreOp {
            ty: ValType::F32,
            bits: 32,
        };
        assert_eq!(
            b.store("self.mem_0", store, 0, "v0", "v1"),
            "self.mem_0.borrow_mut().store_int(v1.to_bits() as i64, ops::effective_address(v0, 0)?, 32)?"
        );
    }
}
