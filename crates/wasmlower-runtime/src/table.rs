//! Wasm function table: backs `call_indirect` and the table instructions.
//!
//! Entries are nullable `FuncRef`s. Indices are `u32` as in Wasm; every
//! ranged operation checks the whole range before writing, so a trapping
//! `fill`/`copy`/`overwrite` leaves the table untouched.

use crate::{FuncRef, InstantiationError, WasmResult, WasmTrap};

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Option<FuncRef>>,
    max: Option<u32>,
}

impl Table {
    /// Create a table with `min` null entries and an optional maximum.
    pub fn new(min: u32, max: Option<u32>) -> Result<Self, InstantiationError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(min as usize)
            .map_err(|_| InstantiationError::ResourceExhausted {
                kind: "table entries",
                minimum: min,
            })?;
        entries.resize(min as usize, None);
        Ok(Self { entries, max })
    }

    /// Wasm `table.size`.
    #[inline(always)]
    pub fn size(&self) -> i32 {
        self.entries.len() as i32
    }

    /// Wasm `table.grow`: returns the previous size, or -1 on failure.
    pub fn grow(&mut self, delta: u32, init: Option<FuncRef>) -> i32 {
        let old = self.entries.len();
        let new = old as u64 + delta as u64;
        let limit = self.max.map_or(u32::MAX as u64, u64::from);
        if new > limit {
            return -1;
        }
        if self.entries.try_reserve_exact(delta as usize).is_err() {
            return -1;
        }
        self.entries.resize(new as usize, init);
        old as i32
    }

    /// Look up an entry. `TableOutOfBounds` if `index >= size`; a null slot
    /// is returned as `None`.
    #[inline]
    pub fn get(&self, index: u32) -> WasmResult<Option<FuncRef>> {
        self.entries
            .get(index as usize)
            .cloned()
            .ok_or(WasmTrap::TableOutOfBounds)
    }

    #[inline]
    pub fn set(&mut self, index: u32, value: Option<FuncRef>) -> WasmResult<()> {
        let slot = self
            .entries
            .get_mut(index as usize)
            .ok_or(WasmTrap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Wasm `table.fill`: write `value` into `n` slots starting at `offset`.
    pub fn fill(&mut self, n: u32, value: Option<FuncRef>, offset: u32) -> WasmResult<()> {
        let range = checked_range(self.entries.len(), offset, n)?;
        self.entries[range].fill(value);
        Ok(())
    }

    /// Copy `values` into consecutive slots starting at `offset`. Used for
    /// element segments (`table.init` and active segment initialisation).
    pub fn overwrite(&mut self, values: &[Option<FuncRef>], offset: u32) -> WasmResult<()> {
        let n = u32::try_from(values.len()).map_err(|_| WasmTrap::TableOutOfBounds)?;
        let range = checked_range(self.entries.len(), offset, n)?;
        self.entries[range].clone_from_slice(values);
        Ok(())
    }

    /// Wasm `table.init`: copy `n` entries of `segment` starting at `src`
    /// into this table at `dst`.
    pub fn init(&mut self, segment: &[Option<FuncRef>], src: u32, dst: u32, n: u32) -> WasmResult<()> {
        let from = checked_range(segment.len(), src, n)?;
        let to = checked_range(self.entries.len(), dst, n)?;
        self.entries[to].clone_from_slice(&segment[from]);
        Ok(())
    }

    /// Wasm `table.copy` from this table into `dest`.
    pub fn copy(&self, dest: &mut Table, src_offset: u32, dest_offset: u32, n: u32) -> WasmResult<()> {
        let src = checked_range(self.entries.len(), src_offset, n)?;
        let dst = checked_range(dest.entries.len(), dest_offset, n)?;
        dest.entries[dst].clone_from_slice(&self.entries[src]);
        Ok(())
    }

    /// Wasm `table.copy` where source and destination are the same table.
    /// Overlapping ranges behave like `memmove`.
    pub fn copy_within(&mut self, src_offset: u32, dest_offset: u32, n: u32) -> WasmResult<()> {
        let src = checked_range(self.entries.len(), src_offset, n)?;
        checked_range(self.entries.len(), dest_offset, n)?;
        let staged: Vec<Option<FuncRef>> = self.entries[src].to_vec();
        let start = dest_offset as usize;
        self.entries[start..start + staged.len()].clone_from_slice(&staged);
        Ok(())
    }
}

#[inline]
fn checked_range(len: usize, offset: u32, n: u32) -> WasmResult<std::ops::Range<usize>> {
    let start = offset as usize;
    let end = start
        .checked_add(n as usize)
        .ok_or(WasmTrap::TableOutOfBounds)?;
    if end > len {
        return Err(WasmTrap::TableOutOfBounds);
    }
    Ok(start..end)
}
