//! Wasm numeric operations whose semantics differ from Rust's operators.
//!
//! Rust's `as` cast saturates, which is what the `trunc_sat` family wants, so
//! those are emitted inline. The trapping `trunc` family, integer division and
//! the NaN-propagating float `min`/`max` live here and are called from the
//! generated code as `ops::<name>`.

use crate::{WasmResult, WasmTrap};

// ── Addressing ───────────────────────────────────────────────────────────────

/// Effective address of a memory access: the operand read as unsigned plus
/// the instruction's static offset, computed without wrapping.
#[inline(always)]
pub fn effective_address(base: i32, offset: u32) -> WasmResult<usize> {
    usize::try_from(base as u32 as u64 + offset as u64).map_err(|_| WasmTrap::OutOfBounds)
}

// ── Float → integer trapping truncation ──────────────────────────────────────

/// `$lo..$hi` is the range of the integer type as a half-open float
/// interval. Bounds are compared against the truncated value, so `-0.5`
/// converts to an unsigned 0 and `-2147483648.9` to `i32::MIN`.
macro_rules! trapping_trunc {
    ($($name:ident: $float:ty => $int:ty as $out:ty, $lo:literal..$hi:literal;)*) => {
        $(
            #[doc = concat!("Wasm `", stringify!($name), "`.")]
            #[inline(never)]
            pub fn $name(v: $float) -> WasmResult<$out> {
                if v.is_nan() {
                    return Err(WasmTrap::InvalidConversion);
                }
                let t = v.trunc();
                if !(($lo as $float)..($hi as $float)).contains(&t) {
                    return Err(WasmTrap::IntegerOverflow);
                }
                Ok(t as $int as $out)
            }
        )*
    };
}

trapping_trunc! {
    i32_trunc_f32_s: f32 => i32 as i32, -2147483648.0..2147483648.0;
    i32_trunc_f32_u: f32 => u32 as i32, 0.0..4294967296.0;
    i32_trunc_f64_s: f64 => i32 as i32, -2147483648.0..2147483648.0;
    i32_trunc_f64_u: f64 => u32 as i32, 0.0..4294967296.0;
    i64_trunc_f32_s: f32 => i64 as i64, -9223372036854775808.0..9223372036854775808.0;
    i64_trunc_f32_u: f32 => u64 as i64, 0.0..18446744073709551616.0;
    i64_trunc_f64_s: f64 => i64 as i64, -9223372036854775808.0..9223372036854775808.0;
    i64_trunc_f64_u: f64 => u64 as i64, 0.0..18446744073709551616.0;
}

// ── Integer division / remainder ─────────────────────────────────────────────

/// Division by zero traps with `DivisionByZero`, `MIN / -1` with
/// `IntegerOverflow`. `MIN rem_s -1` is 0.
macro_rules! trapping_div {
    ($int:ty, $uint:ty, $div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident) => {
        #[inline(never)]
        pub fn $div_s(lhs: $int, rhs: $int) -> WasmResult<$int> {
            if rhs == 0 {
                return Err(WasmTrap::DivisionByZero);
            }
            lhs.checked_div(rhs).ok_or(WasmTrap::IntegerOverflow)
        }

        #[inline(never)]
        pub fn $div_u(lhs: $int, rhs: $int) -> WasmResult<$int> {
            let quotient = (lhs as $uint).checked_div(rhs as $uint);
            quotient.map(|q| q as $int).ok_or(WasmTrap::DivisionByZero)
        }

        #[inline(never)]
        pub fn $rem_s(lhs: $int, rhs: $int) -> WasmResult<$int> {
            match rhs {
                0 => Err(WasmTrap::DivisionByZero),
                _ => Ok(lhs.wrapping_rem(rhs)),
            }
        }

        #[inline(never)]
        pub fn $rem_u(lhs: $int, rhs: $int) -> WasmResult<$int> {
            let remainder = (lhs as $uint).checked_rem(rhs as $uint);
            remainder.map(|r| r as $int).ok_or(WasmTrap::DivisionByZero)
        }
    };
}

trapping_div!(i32, u32, i32_div_s, i32_div_u, i32_rem_s, i32_rem_u);
trapping_div!(i64, u64, i64_div_s, i64_div_u, i64_rem_s, i64_rem_u);

// ── Float min / max ──────────────────────────────────────────────────────────

macro_rules! float_min_max {
    ($min:ident, $max:ident, $t:ty) => {
        pub fn $min(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                // Only differs for a signed-zero pair.
                if a.is_sign_negative() {
                    a
                } else {
                    b
                }
            } else {
                a.min(b)
            }
        }

        pub fn $max(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                if a.is_sign_positive() {
                    a
                } else {
                    b
                }
            } else {
                a.max(b)
            }
        }
    };
}

float_min_max!(f32_min, f32_max, f32);
float_min_max!(f64_min, f64_max, f64);
