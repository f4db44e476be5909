//! Instruction tree.
//!
//! A closed enum over every supported opcode. Structured control
//! instructions own their nested bodies, so a function body is a tree that
//! mirrors the nesting in the binary.
//!
//! Numeric instructions are split by family (`Compare`, `Unary`, `Binary`,
//! `Convert`) and carry their operand type. Sign-sensitive operators are
//! distinct variants (`LtS` / `LtU`, `ShrS` / `ShrU`, ...).

use super::ValType;

/// Declared signature of a `block`, `loop` or `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
    /// Index into the type section; allows parameters and multiple results.
    Func(u32),
}

/// Static part of a memory access. The alignment hint is decoded and kept
/// only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

/// A load: value type produced, bits read, and extension mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOp {
    pub ty: ValType,
    pub bits: u32,
    pub signed: bool,
}

/// A store: value type consumed and bits written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOp {
    pub ty: ValType,
    pub bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    /// Float-only orderings.
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    // integer
    Eqz,
    Clz,
    Ctz,
    Popcnt,
    Extend8S,
    Extend16S,
    Extend32S,
    // float
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    // integer
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
    // float
    Div,
    Min,
    Max,
    Copysign,
}

/// Conversions between value types. `Sat` variants saturate instead of
/// trapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvtOp {
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl CvtOp {
    /// `(input, output)` value types.
    pub fn types(self) -> (ValType, ValType) {
        use CvtOp::*;
        use ValType::*;
        match self {
            I32WrapI64 => (I64, I32),
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U => (F32, I32),
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => (F64, I32),
            I64ExtendI32S | I64ExtendI32U => (I32, I64),
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => (F32, I64),
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U => (F64, I64),
            F32ConvertI32S | F32ConvertI32U => (I32, F32),
            F32ConvertI64S | F32ConvertI64U => (I64, F32),
            F32DemoteF64 => (F64, F32),
            F64ConvertI32S | F64ConvertI32U => (I32, F64),
            F64ConvertI64S | F64ConvertI64U => (I64, F64),
            F64PromoteF32 => (F32, F64),
            I32ReinterpretF32 => (F32, I32),
            I64ReinterpretF64 => (F64, I64),
            F32ReinterpretI32 => (I32, F32),
            F64ReinterpretI64 => (I64, F64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ── control ──
    Unreachable,
    Nop,
    Block {
        ty: BlockType,
        body: Vec<Instr>,
    },
    Loop {
        ty: BlockType,
        body: Vec<Instr>,
    },
    If {
        ty: BlockType,
        then_body: Vec<Instr>,
        else_body: Vec<Instr>,
    },
    Br(u32),
    BrIf(u32),
    BrTable {
        targets: Vec<u32>,
        default: u32,
    },
    Return,
    Call(u32),
    CallIndirect {
        type_index: u32,
        table: u32,
    },

    // ── reference ──
    RefNull(ValType),
    RefIsNull,
    RefFunc(u32),

    // ── parametric ──
    Drop,
    Select(Option<ValType>),

    // ── variable ──
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // ── table ──
    TableGet(u32),
    TableSet(u32),
    TableInit {
        elem: u32,
        table: u32,
    },
    ElemDrop(u32),
    TableCopy {
        dst: u32,
        src: u32,
    },
    TableGrow(u32),
    TableSize(u32),
    TableFill(u32),

    // ── memory ──
    Load(LoadOp, MemArg),
    Store(StoreOp, MemArg),
    MemorySize,
    MemoryGrow,
    MemoryInit(u32),
    DataDrop(u32),
    MemoryCopy,
    MemoryFill,

    // ── numeric ──
    I32Const(i32),
    I64Const(i64),
    /// Raw bits, so NaN payloads survive.
    F32Const(u32),
    F64Const(u64),
    Compare(ValType, CmpOp),
    Unary(ValType, UnOp),
    Binary(ValType, BinOp),
    Convert(CvtOp),
}

impl Instr {
    /// Instructions after which the rest of the sequence is unreachable.
    pub fn is_unconditional_transfer(&self) -> bool {
        matches!(
            self,
            Instr::Br(_) | Instr::BrTable { .. } | Instr::Return | Instr::Unreachable
        )
    }
}
