//! WebAssembly linear memory: `Memory`.
//!
//! The backing store is a `Vec<u8>` whose length is always a whole number of
//! pages. Generated code addresses it with a byte offset (already including
//! the instruction's static offset) and a bit width; every access is bounds
//! checked against the current length and traps with `OutOfBounds` instead of
//! panicking.
//!
//! Integer accesses go through one width-parameterised path (`load_int` /
//! `store_int`), so a 16-bit signed load and a 64-bit load share the same
//! checking code.

use crate::{InstantiationError, WasmResult, WasmTrap, PAGE_SIZE};

/// The largest page count addressable by a 32-bit memory.
const MAX_PAGES_32: u32 = 65536;

/// Linear memory for a single Wasm module (or shared between modules through
/// an `Rc<RefCell<Memory>>` when imported).
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    /// Declared maximum in pages, clamped to the 32-bit address space.
    max_pages: u32,
}

impl Memory {
    /// Create a memory with `min_pages` zeroed pages and an optional maximum.
    /// Fails with `ResourceExhausted` when the pages cannot be allocated or
    /// exceed the 32-bit address space.
    pub fn new(min_pages: u32, max_pages: Option<u32>) -> Result<Self, InstantiationError> {
        let exhausted = || InstantiationError::ResourceExhausted {
            kind: "memory pages",
            minimum: min_pages,
        };
        let max_pages = max_pages.unwrap_or(MAX_PAGES_32).min(MAX_PAGES_32);
        if min_pages > MAX_PAGES_32 {
            return Err(exhausted());
        }
        let len = (min_pages as usize)
            .checked_mul(PAGE_SIZE)
            .ok_or_else(exhausted)?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| exhausted())?;
        bytes.resize(len, 0);
        Ok(Self { bytes, max_pages })
    }

    /// Wasm `memory.size`: current page count.
    #[inline(always)]
    pub fn size(&self) -> i32 {
        (self.bytes.len() / PAGE_SIZE) as i32
    }

    /// Current size in bytes.
    #[inline(always)]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Declared maximum page count.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Wasm `memory.grow`: returns the previous page count, or -1 when the
    /// new size would exceed the maximum or cannot be allocated. New pages
    /// are zeroed.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old = self.bytes.len() / PAGE_SIZE;
        let new = old.wrapping_add(delta as usize);
        if new > self.max_pages as usize {
            return -1;
        }
        let extra = (new - old) * PAGE_SIZE;
        if self.bytes.try_reserve_exact(extra).is_err() {
            return -1;
        }
        self.bytes.resize(new * PAGE_SIZE, 0);
        old as i32
    }

    /// Load `bits` (8, 16, 32 or 64) bits at `offset`, zero- or sign-extended
    /// to 64 bits.
    #[inline(always)]
    pub fn load_int(&self, offset: usize, bits: u32, signed: bool) -> WasmResult<i64> {
        load_int_inner(&self.bytes, offset, bits, signed)
    }

    /// Load an IEEE float of `bits` (32 or 64) bits at `offset`.
    ///
    /// A 32-bit load widens to `f64`. Callers that need the exact f32 NaN
    /// payload should go through `load_int` and `f32::from_bits`.
    pub fn load_float(&self, offset: usize, bits: u32) -> WasmResult<f64> {
        match bits {
            32 => Ok(f32::from_bits(self.load_int(offset, 32, false)? as u32) as f64),
            64 => Ok(f64::from_bits(self.load_int(offset, 64, false)? as u64)),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    /// Store the low `bits` bits of `value` at `offset`, little-endian.
    #[inline(always)]
    pub fn store_int(&mut self, value: i64, offset: usize, bits: u32) -> WasmResult<()> {
        store_int_inner(&mut self.bytes, value, offset, bits)
    }

    /// Store `value` as an IEEE float of `bits` (32 or 64) bits.
    pub fn store_float(&mut self, value: f64, offset: usize, bits: u32) -> WasmResult<()> {
        match bits {
            32 => self.store_int((value as f32).to_bits() as i64, offset, 32),
            64 => self.store_int(value.to_bits() as i64, offset, 64),
            _ => Err(WasmTrap::ValueTypeMismatch),
        }
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> WasmResult<&[u8]> {
        checked_slice(&self.bytes, offset, len)
    }

    /// Copy `data` into memory at `offset`. Traps before writing anything if
    /// the range does not fit.
    pub fn write(&mut self, data: &[u8], offset: usize) -> WasmResult<()> {
        checked_slice_mut(&mut self.bytes, offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Wasm `memory.fill`: set `len` bytes at `offset` to `value`.
    pub fn fill(&mut self, len: usize, value: u8, offset: usize) -> WasmResult<()> {
        checked_slice_mut(&mut self.bytes, offset, len)?.fill(value);
        Ok(())
    }

    /// Wasm `memory.init`: copy `len` bytes of `segment` starting at `src`
    /// into memory at `dst`. A dropped segment is an empty slice.
    pub fn init(&mut self, segment: &[u8], src: u32, dst: u32, len: u32) -> WasmResult<()> {
        let data = checked_slice(segment, src as usize, len as usize)?;
        checked_slice_mut(&mut self.bytes, dst as usize, len as usize)?.copy_from_slice(data);
        Ok(())
    }

    /// Wasm `memory.copy`: copy `len` bytes from `src` to `dst`.
    ///
    /// Overlapping regions behave like `memmove`.
    pub fn copy(&mut self, src: usize, dst: usize, len: usize) -> WasmResult<()> {
        checked_slice(&self.bytes, src, len)?;
        checked_slice(&self.bytes, dst, len)?;
        self.bytes.copy_within(src..src + len, dst);
        Ok(())
    }
}

// ── Bounds checking ──────────────────────────────────────────────────

#[inline(always)]
fn checked_slice(memory: &[u8], offset: usize, len: usize) -> WasmResult<&[u8]> {
    let end = offset.checked_add(len).ok_or(WasmTrap::OutOfBounds)?;
    memory.get(offset..end).ok_or(WasmTrap::OutOfBounds)
}

#[inline(always)]
fn checked_slice_mut(memory: &mut [u8], offset: usize, len: usize) -> WasmResult<&mut [u8]> {
    let end = offset.checked_add(len).ok_or(WasmTrap::OutOfBounds)?;
    memory.get_mut(offset..end).ok_or(WasmTrap::OutOfBounds)
}

#[inline(always)]
fn byte_width(bits: u32) -> WasmResult<usize> {
    match bits {
        8 | 16 | 32 | 64 => Ok(bits as usize / 8),
        _ => Err(WasmTrap::ValueTypeMismatch),
    }
}

#[inline(never)]
fn load_int_inner(memory: &[u8], offset: usize, bits: u32, signed: bool) -> WasmResult<i64> {
    let width = byte_width(bits)?;
    let src = checked_slice(memory, offset, width)?;
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(src);
    let value = u64::from_le_bytes(raw);
    let shift = 64 - bits;
    Ok(if signed {
        ((value << shift) as i64) >> shift
    } else {
        value as i64
    })
}

#[inline(never)]
fn store_int_inner(memory: &mut [u8], value: i64, offset: usize, bits: u32) -> WasmResult<()> {
    let width = byte_width(bits)?;
    let dst = checked_slice_mut(memory, offset, width)?;
    dst.copy_from_slice(&value.to_le_bytes()[..width]);
    Ok(())
}


// ── Kani formal verification proofs ──────────────────────────────────
//
// Run with: cargo kani -p wasmlower-runtime
//
// Every accessor either succeeds or returns Err for arbitrary offsets, and
// successful accesses lie inside the current size.

#[cfg(kani)]
mod proofs {
    use super::*;

    #[kani::proof]
    #[kani::unwind(9)]
    fn load_int_never_panics() {
        let bytes = [0u8; 16];
        let offset: usize = kani::any();
        let signed: bool = kani::any();
        let result = load_int_inner(&bytes, offset, 32, signed);
        if result.is_ok() {
            kani::assert(offset + 4 <= bytes.len(), "load within bounds");
        }
    }

    #[kani::proof]
    #[kani::unwind(9)]
    fn store_int_never_panics() {
        let mut bytes = [0u8; 16];
        let offset: usize = kani::any();
        let value: i64 = kani::any();
        let _ = store_int_inner(&mut bytes, value, offset, 64);
    }

    #[kani::proof]
    #[kani::unwind(9)]
    fn store_load_roundtrip() {
        let mut bytes = [0u8; 16];
        let offset: usize = kani::any();
        kani::assume(offset <= 8);
        let value: i64 = kani::any();
        store_int_inner(&mut bytes, value, offset, 64).unwrap();
        kani::assert(
            load_int_inner(&bytes, offset, 64, false) == Ok(value),
            "64-bit roundtrip",
        );
    }

    #[kani::proof]
    #[kani::unwind(9)]
    fn sign_extension_matches_cast() {
        let mut bytes = [0u8; 8];
        let value: i8 = kani::any();
        store_int_inner(&mut bytes, value as i64, 0, 8).unwrap();
        kani::assert(
            load_int_inner(&bytes, 0, 8, true) == Ok(value as i64),
            "8-bit sign extension",
        );
    }
}
