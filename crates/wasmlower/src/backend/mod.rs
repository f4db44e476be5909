//! Code generation backends.
//!
//! A backend renders the right-hand side of each numeric and memory
//! instruction as a Rust expression. The stack compiler decides where the
//! expression is bound; the backend only decides what it looks like.

mod safe;
pub use safe::SafeBackend;

use crate::error::Result;
use crate::ir::{BinOp, CmpOp, CvtOp, LoadOp, StoreOp, UnOp, ValType};

/// Code generation backend trait.
///
/// Operands are already-rendered atoms (a variable, a literal, or a
/// parenthesised expression) so they can be used as method receivers.
pub trait Backend {
    fn i32_const(&self, value: i32) -> String;

    fn i64_const(&self, value: i64) -> String;

    /// `bits` is the raw IEEE-754 encoding.
    fn f32_const(&self, bits: u32) -> String;

    fn f64_const(&self, bits: u64) -> String;

    /// Comparison producing an i32 0 or 1.
    fn compare(&self, ty: ValType, op: CmpOp, lhs: &str, rhs: &str) -> Result<String>;

    fn unary(&self, ty: ValType, op: UnOp, operand: &str) -> Result<String>;

    fn binary(&self, ty: ValType, op: BinOp, lhs: &str, rhs: &str) -> Result<String>;

    fn convert(&self, op: CvtOp, operand: &str) -> String;

    /// Load from `memory` (an expression of type `Rc<RefCell<Memory>>`).
    fn load(&self, memory: &str, op: LoadOp, offset: u32, addr: &str) -> String;

    /// Store statement, without the trailing semicolon.
    fn store(&self, memory: &str, op: StoreOp, offset: u32, addr: &str, value: &str) -> String;
}
