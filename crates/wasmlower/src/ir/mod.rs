//! Decoded module representation.
//!
//! Populated once by the section builders, then read-only during code
//! generation. Imported functions, tables, memories and globals occupy the
//! low indices of their index space, in import order, followed by the
//! locally defined items in declaration order.

mod instr;
pub use instr::*;

use crate::error::{Error, Result};
use std::fmt;

/// Deepest nesting of `block`, `loop` and `if` accepted in a function body.
pub const MAX_NESTING: usize = 512;

/// WebAssembly value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::FuncRef => write!(f, "funcref"),
            ValType::ExternRef => write!(f, "externref"),
        }
    }
}

impl ValType {
    /// Decode a value-type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7F => Some(ValType::I32),
            0x7E => Some(ValType::I64),
            0x7D => Some(ValType::F32),
            0x7C => Some(ValType::F64),
            0x70 => Some(ValType::FuncRef),
            0x6F => Some(ValType::ExternRef),
            _ => None,
        }
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }

    /// The Rust type used for values of this type in generated code.
    pub fn rust_type(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::FuncRef => "Option<FuncRef>",
            ValType::ExternRef => "Option<ExternRef>",
        }
    }

    /// Zero value literal (`0i32`, `0.0f64`, `None`).
    pub fn default_literal(self) -> &'static str {
        match self {
            ValType::I32 => "0i32",
            ValType::I64 => "0i64",
            ValType::F32 => "0.0f32",
            ValType::F64 => "0.0f64",
            ValType::FuncRef | ValType::ExternRef => "None",
        }
    }

    /// Path of the matching runtime `ValType` variant.
    pub fn runtime_variant(self) -> &'static str {
        match self {
            ValType::I32 => "ValType::I32",
            ValType::I64 => "ValType::I64",
            ValType::F32 => "ValType::F32",
            ValType::F64 => "ValType::F64",
            ValType::FuncRef => "ValType::FuncRef",
            ValType::ExternRef => "ValType::ExternRef",
        }
    }

    /// Runtime `Value` constructor wrapping a value of this type.
    pub fn value_ctor(self) -> &'static str {
        match self {
            ValType::I32 => "Value::I32",
            ValType::I64 => "Value::I64",
            ValType::F32 => "Value::F32",
            ValType::F64 => "Value::F64",
            ValType::FuncRef => "Value::FuncRef",
            ValType::ExternRef => "Value::ExternRef",
        }
    }

    /// Runtime `Value` accessor unwrapping a value of this type.
    pub fn value_accessor(self) -> &'static str {
        match self {
            ValType::I32 => "as_i32",
            ValType::I64 => "as_i64",
            ValType::F32 => "as_f32",
            ValType::F64 => "as_f64",
            ValType::FuncRef => "as_func_ref",
            ValType::ExternRef => "as_extern_ref",
        }
    }

    /// One-letter kind tag of a runtime `Global`.
    pub fn global_tag(self) -> char {
        match self {
            ValType::I32 => 'i',
            ValType::I64 => 'I',
            ValType::F32 => 'f',
            ValType::F64 => 'F',
            ValType::FuncRef => 'r',
            ValType::ExternRef => 'e',
        }
    }
}

/// Render a type list as `[i32, i64]` for diagnostics.
pub fn type_list(types: &[ValType]) -> String {
    let names: Vec<String> = types.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: ValType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub ty: ValType,
    pub mutable: bool,
}

/// A constant expression (global initialiser, segment offset or element item).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    RefNull(ValType),
    RefFunc(u32),
    GlobalGet(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    /// Type index of the imported function.
    Func(u32),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ExternKind::Func),
            0x01 => Some(ExternKind::Table),
            0x02 => Some(ExternKind::Memory),
            0x03 => Some(ExternKind::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// A locally defined function: its signature, declared locals (beyond the
/// parameters) and instruction tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub type_index: u32,
    pub locals: Vec<ValType>,
    pub body: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElemMode {
    Active { table: u32, offset: ConstExpr },
    Passive,
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElemSegment {
    pub ty: ValType,
    pub mode: ElemMode,
    pub items: Vec<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

/// Where an index in the function index space points.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedFunc<'a> {
    /// Imported function: position among all imports, and its import.
    Imported(usize, &'a Import),
    /// Local function: position among local functions.
    Local(usize, &'a Function),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub functions: Vec<Function>,
    pub tables: Vec<TableType>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElemSegment>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
}

impl Module {
    pub fn func_type_at(&self, type_index: u32) -> Result<&FuncType> {
        self.types
            .get(type_index as usize)
            .ok_or_else(|| Error::validation(format!("type index {type_index} out of range")))
    }

    fn imports_of(&self, kind: ExternKind) -> impl Iterator<Item = (usize, &Import)> {
        self.imports
            .iter()
            .enumerate()
            .filter(move |(_, import)| import_kind(&import.desc) == kind)
    }

    pub fn num_imported(&self, kind: ExternKind) -> usize {
        self.imports_of(kind).count()
    }

    pub fn num_funcs(&self) -> usize {
        self.num_imported(ExternKind::Func) + self.functions.len()
    }

    pub fn num_tables(&self) -> usize {
        self.num_imported(ExternKind::Table) + self.tables.len()
    }

    pub fn num_memories(&self) -> usize {
        self.num_imported(ExternKind::Memory) + self.memories.len()
    }

    pub fn num_globals(&self) -> usize {
        self.num_imported(ExternKind::Global) + self.globals.len()
    }

    /// Resolve a function index: imports first, then local functions.
    pub fn resolve_func(&self, index: u32) -> Result<ResolvedFunc<'_>> {
        let index = index as usize;
        if let Some((pos, import)) = self.imports_of(ExternKind::Func).nth(index) {
            return Ok(ResolvedFunc::Imported(pos, import));
        }
        let local = index - self.num_imported(ExternKind::Func);
        self.functions
            .get(local)
            .map(|func| ResolvedFunc::Local(local, func))
            .ok_or_else(|| Error::validation(format!("function index {index} out of range")))
    }

    /// Type index of any function in the index space.
    pub fn func_type_index(&self, index: u32) -> Result<u32> {
        match self.resolve_func(index)? {
            ResolvedFunc::Imported(_, Import {
                desc: ImportDesc::Func(ty),
                ..
            }) => Ok(*ty),
            ResolvedFunc::Imported(..) => Err(Error::validation(format!(
                "function index {index} resolves to a non-function import"
            ))),
            ResolvedFunc::Local(_, func) => Ok(func.type_index),
        }
    }

    pub fn func_type(&self, index: u32) -> Result<&FuncType> {
        self.func_type_at(self.func_type_index(index)?)
    }

    pub fn global_type(&self, index: u32) -> Result<GlobalType> {
        let imported: Vec<GlobalType> = self
            .imports_of(ExternKind::Global)
            .filter_map(|(_, import)| match import.desc {
                ImportDesc::Global(ty) => Some(ty),
                _ => None,
            })
            .collect();
        imported
            .into_iter()
            .chain(self.globals.iter().map(|g| g.ty))
            .nth(index as usize)
            .ok_or_else(|| Error::validation(format!("global index {index} out of range")))
    }

    pub fn table_type(&self, index: u32) -> Result<TableType> {
        let imported: Vec<TableType> = self
            .imports_of(ExternKind::Table)
            .filter_map(|(_, import)| match import.desc {
                ImportDesc::Table(ty) => Some(ty),
                _ => None,
            })
            .collect();
        imported
            .into_iter()
            .chain(self.tables.iter().copied())
            .nth(index as usize)
            .ok_or_else(|| Error::validation(format!("table index {index} out of range")))
    }

    pub fn check_memory(&self, index: u32) -> Result<()> {
        if (index as usize) < self.num_memories() {
            Ok(())
        } else {
            Err(Error::validation(format!("memory index {index} out of range")))
        }
    }

    /// Parameter and result types of a block type.
    pub fn block_signature(&self, ty: BlockType) -> Result<FuncType> {
        Ok(match ty {
            BlockType::Empty => FuncType::default(),
            BlockType::Value(v) => FuncType {
                params: vec![],
                results: vec![v],
            },
            BlockType::Func(index) => self.func_type_at(index)?.clone(),
        })
    }
}

pub fn import_kind(desc: &ImportDesc) -> ExternKind {
    match desc {
        ImportDesc::Func(_) => ExternKind::Func,
        ImportDesc::Table(_) => ExternKind::Table,
        ImportDesc::Memory(_) => ExternKind::Memory,
        ImportDesc::Global(_) => ExternKind::Global,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func_import(name: &str, ty: u32) -> Import {
        Import {
            module: "env".to_string(),
            name: name.to_string(),
            desc: ImportDesc::Func(ty),
        }
    }

    fn local(ty: u32) -> Function {
        Function {
            type_index: ty,
            locals: vec![],
            body: vec![],
        }
    }

    fn sample() -> Module {
        Module {
            types: vec![
                FuncType::default(),
                FuncType {
                    params: vec![ValType::I32],
                    results: vec![ValType::I64],
                },
            ],
            imports: vec![
                func_import("a", 0),
                Import {
                    module: "env".to_string(),
                    name: "g".to_string(),
                    desc: ImportDesc::Global(GlobalType {
                        ty: ValType::F64,
                        mutable: false,
                    }),
                },
                func_import("b", 1),
            ],
            functions: vec![local(1), local(0), local(1)],
            globals: vec![Global {
                ty: GlobalType {
                    ty: ValType::I32,
                    mutable: true,
                },
                init: ConstExpr::I32(0),
            }],
            ..Module::default()
        }
    }

    #[test]
    fn imported_functions_come_first() {
        let module = sample();
        assert_eq!(module.num_funcs(), 5);
        match module.resolve_func(0).unwrap() {
            ResolvedFunc::Imported(pos, import) => {
                assert_eq!(pos, 0);
                assert_eq!(import.name, "a");
            }
            other => panic!("expected import, got {other:?}"),
        }
        match module.resolve_func(1).unwrap() {
            ResolvedFunc::Imported(pos, import) => {
                assert_eq!(pos, 2);
                assert_eq!(import.name, "b");
            }
            other => panic!("expected import, got {other:?}"),
        }
        for (index, expected_local) in [(2u32, 0usize), (3, 1), (4, 2)] {
            match module.resolve_func(index).unwrap() {
                ResolvedFunc::Local(pos, _) => assert_eq!(pos, expected_local),
                other => panic!("expected local, got {other:?}"),
            }
        }
        assert!(module.resolve_func(5).is_err());
    }

    #[test]
    fn function_types_follow_unified_index() {
        let module = sample();
        assert_eq!(module.func_type_index(1).unwrap(), 1);
        assert_eq!(module.func_type_index(3).unwrap(), 0);
        assert_eq!(module.func_type(2).unwrap().results, vec![ValType::I64]);
    }

    #[test]
    fn globals_unify_imports_and_locals() {
        let module = sample();
        assert_eq!(module.global_type(0).unwrap().ty, ValType::F64);
        assert_eq!(module.global_type(1).unwrap().ty, ValType::I32);
        assert!(module.global_type(2).is_err());
    }

    #[test]
    fn block_signatures() {
        let module = sample();
        assert_eq!(module.block_signature(BlockType::Empty).unwrap(), FuncType::default());
        assert_eq!(
            module.block_signature(BlockType::Value(ValType::F32)).unwrap().results,
            vec![ValType::F32]
        );
        assert_eq!(
            module.block_signature(BlockType::Func(1)).unwrap().params,
            vec![ValType::I32]
        );
        assert!(module.block_signature(BlockType::Func(9)).is_err());
    }
}
