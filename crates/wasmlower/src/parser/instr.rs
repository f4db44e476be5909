//! Instruction decoding.
//!
//! Structured instructions are decoded into an owned tree: a `block`, `loop`
//! or `if` owns its body up to the matching `end` (or `else`). Open
//! constructs are kept on an explicit stack, so nesting depth costs heap and
//! not call frames.

use super::reader::Reader;
use crate::error::{Error, Result};
use crate::ir::{
    BinOp, BlockType, CmpOp, CvtOp, Instr, LoadOp, MemArg, StoreOp, UnOp, ValType, MAX_NESTING,
};
use log::trace;
use std::mem;

#[derive(Debug)]
enum Construct {
    Block,
    Loop,
    If,
    /// An `if` past its `else`, holding the finished `then` arm.
    Else(Vec<Instr>),
}

/// A structured instruction whose body is still being read.
#[derive(Debug)]
struct Open {
    construct: Construct,
    ty: BlockType,
    offset: usize,
    /// The enclosing sequence, decoded up to this instruction.
    outer: Vec<Instr>,
}

impl Construct {
    fn finish(self, ty: BlockType, body: Vec<Instr>) -> Instr {
        match self {
            Construct::Block => Instr::Block { ty, body },
            Construct::Loop => Instr::Loop { ty, body },
            Construct::If => Instr::If {
                ty,
                then_body: body,
                else_body: Vec::new(),
            },
            Construct::Else(then_body) => Instr::If {
                ty,
                then_body,
                else_body: body,
            },
        }
    }
}

/// Decode a full expression: instructions up to and including its final `end`.
pub fn decode_expr(reader: &mut Reader<'_>) -> Result<Vec<Instr>> {
    let mut open: Vec<Open> = Vec::new();
    let mut body = Vec::new();
    loop {
        let offset = reader.position();
        let opcode = reader.read_u8()?;
        match opcode {
            0x02..=0x04 => {
                trace!("opcode {opcode:#04x} at {offset:#x}");
                if open.len() >= MAX_NESTING {
                    return Err(Error::parsing(offset, "blocks nested too deeply"));
                }
                let construct = match opcode {
                    0x02 => Construct::Block,
                    0x03 => Construct::Loop,
                    _ => Construct::If,
                };
                open.push(Open {
                    construct,
                    ty: read_block_type(reader)?,
                    offset,
                    outer: mem::take(&mut body),
                });
            }
            0x05 => {
                let Some(top) = open.last_mut() else {
                    return Err(Error::parsing(offset, "unexpected `else` outside of `if`"));
                };
                match top.construct {
                    Construct::If => top.construct = Construct::Else(mem::take(&mut body)),
                    Construct::Else(_) => {
                        return Err(Error::parsing(top.offset, "duplicate `else` in `if`"))
                    }
                    Construct::Block | Construct::Loop => {
                        return Err(Error::parsing(top.offset, "`else` inside `block` or `loop`"))
                    }
                }
            }
            0x0B => match open.pop() {
                None => return Ok(body),
                Some(Open {
                    construct,
                    ty,
                    outer,
                    ..
                }) => {
                    let inner = mem::replace(&mut body, outer);
                    body.push(construct.finish(ty, inner));
                }
            },
            _ => body.push(decode_instr(reader, opcode, offset)?),
        }
    }
}

pub fn read_val_type(reader: &mut Reader<'_>) -> Result<ValType> {
    let offset = reader.position();
    let byte = reader.read_u8()?;
    ValType::from_byte(byte)
        .ok_or_else(|| Error::parsing(offset, format!("invalid value type {byte:#04x}")))
}

pub fn read_ref_type(reader: &mut Reader<'_>) -> Result<ValType> {
    let offset = reader.position();
    let ty = read_val_type(reader)?;
    if !ty.is_ref() {
        return Err(Error::parsing(offset, format!("expected reference type, found {ty}")));
    }
    Ok(ty)
}

fn read_block_type(reader: &mut Reader<'_>) -> Result<BlockType> {
    let offset = reader.position();
    let byte = reader.peek_u8()?;
    if byte == 0x40 {
        reader.read_u8()?;
        return Ok(BlockType::Empty);
    }
    if let Some(ty) = ValType::from_byte(byte) {
        reader.read_u8()?;
        return Ok(BlockType::Value(ty));
    }
    let index = reader.read_leb_s(33)?;
    u32::try_from(index)
        .map(BlockType::Func)
        .map_err(|_| Error::parsing(offset, format!("invalid block type {index}")))
}

fn read_memarg(reader: &mut Reader<'_>) -> Result<MemArg> {
    let align = reader.read_u32()?;
    let offset = reader.read_u32()?;
    Ok(MemArg { align, offset })
}

/// Reserved memory-index byte following memory instructions.
fn read_zero(reader: &mut Reader<'_>) -> Result<()> {
    let offset = reader.position();
    match reader.read_u8()? {
        0x00 => Ok(()),
        other => Err(Error::parsing(
            offset,
            format!("expected zero memory index, found {other:#04x}"),
        )),
    }
}

fn load(ty: ValType, bits: u32, signed: bool, reader: &mut Reader<'_>) -> Result<Instr> {
    Ok(Instr::Load(LoadOp { ty, bits, signed }, read_memarg(reader)?))
}

fn store(ty: ValType, bits: u32, reader: &mut Reader<'_>) -> Result<Instr> {
    Ok(Instr::Store(StoreOp { ty, bits }, read_memarg(reader)?))
}

const INT_CMP: [CmpOp; 10] = [
    CmpOp::Eq,
    CmpOp::Ne,
    CmpOp::LtS,
    CmpOp::LtU,
    CmpOp::GtS,
    CmpOp::GtU,
    CmpOp::LeS,
    CmpOp::LeU,
    CmpOp::GeS,
    CmpOp::GeU,
];

const FLOAT_CMP: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Gt, CmpOp::Le, CmpOp::Ge];

const INT_UNARY: [UnOp; 3] = [UnOp::Clz, UnOp::Ctz, UnOp::Popcnt];

const INT_BINARY: [BinOp; 15] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::DivS,
    BinOp::DivU,
    BinOp::RemS,
    BinOp::RemU,
    BinOp::And,
    BinOp::Or,
    BinOp::Xor,
    BinOp::Shl,
    BinOp::ShrS,
    BinOp::ShrU,
    BinOp::Rotl,
    BinOp::Rotr,
];

const FLOAT_UNARY: [UnOp; 7] = [
    UnOp::Abs,
    UnOp::Neg,
    UnOp::Ceil,
    UnOp::Floor,
    UnOp::Trunc,
    UnOp::Nearest,
    UnOp::Sqrt,
];

const FLOAT_BINARY: [BinOp; 7] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::Div,
    BinOp::Min,
    BinOp::Max,
    BinOp::Copysign,
];

/// Conversions 0xA7..=0xBF, in opcode order.
const CONVERSIONS: [CvtOp; 25] = [
    CvtOp::I32WrapI64,
    CvtOp::I32TruncF32S,
    CvtOp::I32TruncF32U,
    CvtOp::I32TruncF64S,
    CvtOp::I32TruncF64U,
    CvtOp::I64ExtendI32S,
    CvtOp::I64ExtendI32U,
    CvtOp::I64TruncF32S,
    CvtOp::I64TruncF32U,
    CvtOp::I64TruncF64S,
    CvtOp::I64TruncF64U,
    CvtOp::F32ConvertI32S,
    CvtOp::F32ConvertI32U,
    CvtOp::F32ConvertI64S,
    CvtOp::F32ConvertI64U,
    CvtOp::F32DemoteF64,
    CvtOp::F64ConvertI32S,
    CvtOp::F64ConvertI32U,
    CvtOp::F64ConvertI64S,
    CvtOp::F64ConvertI64U,
    CvtOp::F64PromoteF32,
    CvtOp::I32ReinterpretF32,
    CvtOp::I64ReinterpretF64,
    CvtOp::F32ReinterpretI32,
    CvtOp::F64ReinterpretI64,
];

const SATURATING: [CvtOp; 8] = [
    CvtOp::I32TruncSatF32S,
    CvtOp::I32TruncSatF32U,
    CvtOp::I32TruncSatF64S,
    CvtOp::I32TruncSatF64U,
    CvtOp::I64TruncSatF32S,
    CvtOp::I64TruncSatF32U,
    CvtOp::I64TruncSatF64S,
    CvtOp::I64TruncSatF64U,
];

/// Every opcode except the structured ones, which [`decode_expr`] handles.
fn decode_instr(reader: &mut Reader<'_>, opcode: u8, offset: usize) -> Result<Instr> {
    use ValType::*;
    trace!("opcode {opcode:#04x} at {offset:#x}");

    let instr = match opcode {
        // ── control ──
        0x00 => Instr::Unreachable,
        0x01 => Instr::Nop,
        0x0C => Instr::Br(reader.read_u32()?),
        0x0D => Instr::BrIf(reader.read_u32()?),
        0x0E => {
            let targets = reader.read_vec(|r| r.read_u32())?;
            let default = reader.read_u32()?;
            Instr::BrTable { targets, default }
        }
        0x0F => Instr::Return,
        0x10 => Instr::Call(reader.read_u32()?),
        0x11 => {
            let type_index = reader.read_u32()?;
            let table = reader.read_u32()?;
            Instr::CallIndirect { type_index, table }
        }

        // ── parametric ──
        0x1A => Instr::Drop,
        0x1B => Instr::Select(None),
        0x1C => {
            let types = reader.read_vec(read_val_type)?;
            match types.as_slice() {
                [ty] => Instr::Select(Some(*ty)),
                _ => {
                    return Err(Error::parsing(
                        offset,
                        format!("typed select expects one type, found {}", types.len()),
                    ))
                }
            }
        }

        // ── variable / table access ──
        0x20 => Instr::LocalGet(reader.read_u32()?),
        0x21 => Instr::LocalSet(reader.read_u32()?),
        0x22 => Instr::LocalTee(reader.read_u32()?),
        0x23 => Instr::GlobalGet(reader.read_u32()?),
        0x24 => Instr::GlobalSet(reader.read_u32()?),
        0x25 => Instr::TableGet(reader.read_u32()?),
        0x26 => Instr::TableSet(reader.read_u32()?),

        // ── memory ──
        0x28 => load(I32, 32, false, reader)?,
        0x29 => load(I64, 64, false, reader)?,
        0x2A => load(F32, 32, false, reader)?,
        0x2B => load(F64, 64, false, reader)?,
        0x2C => load(I32, 8, true, reader)?,
        0x2D => load(I32, 8, false, reader)?,
        0x2E => load(I32, 16, true, reader)?,
        0x2F => load(I32, 16, false, reader)?,
        0x30 => load(I64, 8, true, reader)?,
        0x31 => load(I64, 8, false, reader)?,
        0x32 => load(I64, 16, true, reader)?,
        0x33 => load(I64, 16, false, reader)?,
        0x34 => load(I64, 32, true, reader)?,
        0x35 => load(I64, 32, false, reader)?,
        0x36 => store(I32, 32, reader)?,
        0x37 => store(I64, 64, reader)?,
        0x38 => store(F32, 32, reader)?,
        0x39 => store(F64, 64, reader)?,
        0x3A => store(I32, 8, reader)?,
        0x3B => store(I32, 16, reader)?,
        0x3C => store(I64, 8, reader)?,
        0x3D => store(I64, 16, reader)?,
        0x3E => store(I64, 32, reader)?,
        0x3F => {
            read_zero(reader)?;
            Instr::MemorySize
        }
        0x40 => {
            read_zero(reader)?;
            Instr::MemoryGrow
        }

        // ── constants ──
        0x41 => Instr::I32Const(reader.read_i32()?),
        0x42 => Instr::I64Const(reader.read_i64()?),
        0x43 => Instr::F32Const(reader.read_f32_bits()?),
        0x44 => Instr::F64Const(reader.read_f64_bits()?),

        // ── comparisons ──
        0x45 => Instr::Unary(I32, UnOp::Eqz),
        0x46..=0x4F => Instr::Compare(I32, INT_CMP[(opcode - 0x46) as usize]),
        0x50 => Instr::Unary(I64, UnOp::Eqz),
        0x51..=0x5A => Instr::Compare(I64, INT_CMP[(opcode - 0x51) as usize]),
        0x5B..=0x60 => Instr::Compare(F32, FLOAT_CMP[(opcode - 0x5B) as usize]),
        0x61..=0x66 => Instr::Compare(F64, FLOAT_CMP[(opcode - 0x61) as usize]),

        // ── arithmetic ──
        0x67..=0x69 => Instr::Unary(I32, INT_UNARY[(opcode - 0x67) as usize]),
        0x6A..=0x78 => Instr::Binary(I32, INT_BINARY[(opcode - 0x6A) as usize]),
        0x79..=0x7B => Instr::Unary(I64, INT_UNARY[(opcode - 0x79) as usize]),
        0x7C..=0x8A => Instr::Binary(I64, INT_BINARY[(opcode - 0x7C) as usize]),
        0x8B..=0x91 => Instr::Unary(F32, FLOAT_UNARY[(opcode - 0x8B) as usize]),
        0x92..=0x98 => Instr::Binary(F32, FLOAT_BINARY[(opcode - 0x92) as usize]),
        0x99..=0x9F => Instr::Unary(F64, FLOAT_UNARY[(opcode - 0x99) as usize]),
        0xA0..=0xA6 => Instr::Binary(F64, FLOAT_BINARY[(opcode - 0xA0) as usize]),

        // ── conversions ──
        0xA7..=0xBF => Instr::Convert(CONVERSIONS[(opcode - 0xA7) as usize]),
        0xC0 => Instr::Unary(I32, UnOp::Extend8S),
        0xC1 => Instr::Unary(I32, UnOp::Extend16S),
        0xC2 => Instr::Unary(I64, UnOp::Extend8S),
        0xC3 => Instr::Unary(I64, UnOp::Extend16S),
        0xC4 => Instr::Unary(I64, UnOp::Extend32S),

        // ── reference ──
        0xD0 => Instr::RefNull(read_ref_type(reader)?),
        0xD1 => Instr::RefIsNull,
        0xD2 => Instr::RefFunc(reader.read_u32()?),

        0xFC => decode_prefixed(reader, offset)?,

        _ => {
            return Err(Error::parsing(
                offset,
                format!("unknown opcode {opcode:#04x}"),
            ))
        }
    };
    Ok(instr)
}

/// Instructions behind the 0xFC prefix.
fn decode_prefixed(reader: &mut Reader<'_>, offset: usize) -> Result<Instr> {
    let sub = reader.read_u32()?;
    let instr = match sub {
        0..=7 => Instr::Convert(SATURATING[sub as usize]),
        8 => {
            let data = reader.read_u32()?;
            read_zero(reader)?;
            Instr::MemoryInit(data)
        }
        9 => Instr::DataDrop(reader.read_u32()?),
        10 => {
            read_zero(reader)?;
            read_zero(reader)?;
            Instr::MemoryCopy
        }
        11 => {
            read_zero(reader)?;
            Instr::MemoryFill
        }
        12 => {
            let elem = reader.read_u32()?;
            let table = reader.read_u32()?;
            Instr::TableInit { elem, table }
        }
        13 => Instr::ElemDrop(reader.read_u32()?),
        14 => {
            let dst = reader.read_u32()?;
            let src = reader.read_u32()?;
            Instr::TableCopy { dst, src }
        }
        15 => Instr::TableGrow(reader.read_u32()?),
        16 => Instr::TableSize(reader.read_u32()?),
        17 => Instr::TableFill(reader.read_u32()?),
        _ => {
            return Err(Error::parsing(
                offset,
                format!("unknown opcode 0xfc {sub}"),
            ))
        }
    };
    Ok(instr)
}
