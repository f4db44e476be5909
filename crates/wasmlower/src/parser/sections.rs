//! Section builders.
//!
//! Each builder claims one or more section ids and consumes exactly one
//! section body per `scan`, appending to the module. Only the function
//! builder keeps state between sections: the function section (3) declares
//! type indices whose bodies arrive later in the code section (10).

use super::instr::{decode_expr, read_ref_type, read_val_type};
use super::reader::Reader;
use crate::error::{Error, Result};
use crate::ir::{
    ConstExpr, DataMode, DataSegment, ElemMode, ElemSegment, Export, ExternKind, FuncType,
    Function, Global, GlobalType, Import, ImportDesc, Instr, Limits, Module, TableType, ValType,
};
use log::debug;

/// Upper bound on declared locals per function.
const MAX_LOCALS: u64 = 50_000;

pub trait SectionBuilder {
    /// Whether this builder consumes sections with this id.
    fn supports(&self, id: u8) -> bool;

    /// Consume one section body.
    fn scan(&mut self, id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()>;

    /// Called once after the last section.
    fn finish(&mut self, _module: &mut Module) -> Result<()> {
        Ok(())
    }
}

/// The full set of builders, in no particular order.
pub fn builders() -> Vec<Box<dyn SectionBuilder>> {
    vec![
        Box::new(TypeSection),
        Box::new(ImportSection),
        Box::new(FunctionSection::default()),
        Box::new(TableSection),
        Box::new(MemorySection),
        Box::new(GlobalSection),
        Box::new(ExportSection),
        Box::new(StartSection),
        Box::new(ElementSection),
        Box::new(DataSection),
        Box::new(DataCountSection),
    ]
}

// ── shared item decoders ─────────────────────────────────────────────────────

fn read_limits(reader: &mut Reader<'_>) -> Result<Limits> {
    let offset = reader.position();
    match reader.read_u8()? {
        0x00 => Ok(Limits {
            min: reader.read_u32()?,
            max: None,
        }),
        0x01 => {
            let min = reader.read_u32()?;
            let max = reader.read_u32()?;
            Ok(Limits { min, max: Some(max) })
        }
        flag => Err(Error::parsing(offset, format!("invalid limits flag {flag:#04x}"))),
    }
}

fn read_table_type(reader: &mut Reader<'_>) -> Result<TableType> {
    let elem = read_ref_type(reader)?;
    let limits = read_limits(reader)?;
    Ok(TableType { elem, limits })
}

fn read_global_type(reader: &mut Reader<'_>) -> Result<GlobalType> {
    let ty = read_val_type(reader)?;
    let offset = reader.position();
    let mutable = match reader.read_u8()? {
        0x00 => false,
        0x01 => true,
        flag => {
            return Err(Error::parsing(
                offset,
                format!("invalid mutability flag {flag:#04x}"),
            ))
        }
    };
    Ok(GlobalType { ty, mutable })
}

/// Decode an expression with the general decoder, then require it to be a
/// single constant instruction.
pub fn read_const_expr(reader: &mut Reader<'_>) -> Result<ConstExpr> {
    let offset = reader.position();
    let body = decode_expr(reader)?;
    match body.as_slice() {
        [Instr::I32Const(v)] => Ok(ConstExpr::I32(*v)),
        [Instr::I64Const(v)] => Ok(ConstExpr::I64(*v)),
        [Instr::F32Const(v)] => Ok(ConstExpr::F32(*v)),
        [Instr::F64Const(v)] => Ok(ConstExpr::F64(*v)),
        [Instr::RefNull(ty)] => Ok(ConstExpr::RefNull(*ty)),
        [Instr::RefFunc(index)] => Ok(ConstExpr::RefFunc(*index)),
        [Instr::GlobalGet(index)] => Ok(ConstExpr::GlobalGet(*index)),
        _ => Err(Error::validation(format!(
            "expression at offset {offset:#x} is not a constant expression"
        ))),
    }
}

/// `0x00` is the only element kind: funcref.
fn read_elem_kind(reader: &mut Reader<'_>) -> Result<ValType> {
    let offset = reader.position();
    match reader.read_u8()? {
        0x00 => Ok(ValType::FuncRef),
        kind => Err(Error::parsing(offset, format!("invalid element kind {kind:#04x}"))),
    }
}

fn read_func_indices(reader: &mut Reader<'_>) -> Result<Vec<ConstExpr>> {
    reader.read_vec(|r| Ok(ConstExpr::RefFunc(r.read_u32()?)))
}

// ── builders ─────────────────────────────────────────────────────────────────

struct TypeSection;

impl SectionBuilder for TypeSection {
    fn supports(&self, id: u8) -> bool {
        id == 1
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let types = reader.read_vec(|r| {
            let offset = r.position();
            let form = r.read_u8()?;
            if form != 0x60 {
                return Err(Error::parsing(
                    offset,
                    format!("expected function type, found {form:#04x}"),
                ));
            }
            let params = r.read_vec(read_val_type)?;
            let results = r.read_vec(read_val_type)?;
            Ok(FuncType { params, results })
        })?;
        debug!("type section: {} signature(s)", types.len());
        module.types.extend(types);
        Ok(())
    }
}

struct ImportSection;

impl SectionBuilder for ImportSection {
    fn supports(&self, id: u8) -> bool {
        id == 2
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let imports = reader.read_vec(|r| {
            let module = r.read_name()?;
            let name = r.read_name()?;
            let offset = r.position();
            let desc = match r.read_u8()? {
                0x00 => ImportDesc::Func(r.read_u32()?),
                0x01 => ImportDesc::Table(read_table_type(r)?),
                0x02 => ImportDesc::Memory(read_limits(r)?),
                0x03 => ImportDesc::Global(read_global_type(r)?),
                kind => {
                    return Err(Error::parsing(
                        offset,
                        format!("invalid import kind {kind:#04x}"),
                    ))
                }
            };
            Ok(Import { module, name, desc })
        })?;
        debug!("import section: {} import(s)", imports.len());
        module.imports.extend(imports);
        Ok(())
    }
}

/// Function (3) and code (10) sections.
#[derive(Default)]
struct FunctionSection {
    declared: Vec<u32>,
    code_seen: bool,
}

impl FunctionSection {
    fn read_body(reader: &mut Reader<'_>, type_index: u32) -> Result<Function> {
        reader.read_sized(|r| {
            let offset = r.position();
            let groups = r.read_vec(|r| {
                let count = r.read_u32()?;
                let ty = read_val_type(r)?;
                Ok((count, ty))
            })?;
            let total: u64 = groups.iter().map(|(count, _)| *count as u64).sum();
            if total > MAX_LOCALS {
                return Err(Error::parsing(offset, format!("too many locals: {total}")));
            }
            let locals = groups
                .into_iter()
                .flat_map(|(count, ty)| std::iter::repeat(ty).take(count as usize))
                .collect();
            let body = decode_expr(r)?;
            Ok(Function {
                type_index,
                locals,
                body,
            })
        })
    }
}

impl SectionBuilder for FunctionSection {
    fn supports(&self, id: u8) -> bool {
        id == 3 || id == 10
    }

    fn scan(&mut self, id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        if id == 3 {
            self.declared = reader.read_vec(|r| r.read_u32())?;
            debug!("function section: {} declaration(s)", self.declared.len());
            return Ok(());
        }

        let offset = reader.position();
        let count = reader.read_u32()? as usize;
        if count != self.declared.len() {
            return Err(Error::parsing(
                offset,
                format!(
                    "code section has {count} bodies, function section declared {}",
                    self.declared.len()
                ),
            ));
        }
        for &type_index in &self.declared {
            let function = Self::read_body(reader, type_index)?;
            module.functions.push(function);
        }
        self.code_seen = true;
        debug!("code section: {count} body(ies)");
        Ok(())
    }

    fn finish(&mut self, _module: &mut Module) -> Result<()> {
        if !self.declared.is_empty() && !self.code_seen {
            return Err(Error::parsing(
                0,
                format!("{} function(s) declared without a code section", self.declared.len()),
            ));
        }
        Ok(())
    }
}

struct TableSection;

impl SectionBuilder for TableSection {
    fn supports(&self, id: u8) -> bool {
        id == 4
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let tables = reader.read_vec(read_table_type)?;
        debug!("table section: {} table(s)", tables.len());
        module.tables.extend(tables);
        Ok(())
    }
}

struct MemorySection;

impl SectionBuilder for MemorySection {
    fn supports(&self, id: u8) -> bool {
        id == 5
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let memories = reader.read_vec(read_limits)?;
        debug!("memory section: {} memory(ies)", memories.len());
        module.memories.extend(memories);
        Ok(())
    }
}

struct GlobalSection;

impl SectionBuilder for GlobalSection {
    fn supports(&self, id: u8) -> bool {
        id == 6
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let globals = reader.read_vec(|r| {
            let ty = read_global_type(r)?;
            let init = read_const_expr(r)?;
            Ok(Global { ty, init })
        })?;
        debug!("global section: {} global(s)", globals.len());
        module.globals.extend(globals);
        Ok(())
    }
}

struct ExportSection;

impl SectionBuilder for ExportSection {
    fn supports(&self, id: u8) -> bool {
        id == 7
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let exports = reader.read_vec(|r| {
            let name = r.read_name()?;
            let offset = r.position();
            let byte = r.read_u8()?;
            let kind = ExternKind::from_byte(byte).ok_or_else(|| {
                Error::parsing(offset, format!("invalid export kind {byte:#04x}"))
            })?;
            let index = r.read_u32()?;
            Ok(Export { name, kind, index })
        })?;
        debug!("export section: {} export(s)", exports.len());
        module.exports.extend(exports);
        Ok(())
    }
}

struct StartSection;

impl SectionBuilder for StartSection {
    fn supports(&self, id: u8) -> bool {
        id == 8
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let index = reader.read_u32()?;
        debug!("start section: function {index}");
        module.start = Some(index);
        Ok(())
    }
}

struct ElementSection;

impl ElementSection {
    fn read_segment(reader: &mut Reader<'_>) -> Result<ElemSegment> {
        let offset = reader.position();
        let flags = reader.read_u32()?;
        let segment = match flags {
            0 => {
                let offset = read_const_expr(reader)?;
                ElemSegment {
                    ty: ValType::FuncRef,
                    mode: ElemMode::Active { table: 0, offset },
                    items: read_func_indices(reader)?,
                }
            }
            1 | 3 => {
                let ty = read_elem_kind(reader)?;
                let items = read_func_indices(reader)?;
                let mode = if flags == 1 {
                    ElemMode::Passive
                } else {
                    ElemMode::Declarative
                };
                ElemSegment { ty, mode, items }
            }
            2 => {
                let table = reader.read_u32()?;
                let offset = read_const_expr(reader)?;
                let ty = read_elem_kind(reader)?;
                ElemSegment {
                    ty,
                    mode: ElemMode::Active { table, offset },
                    items: read_func_indices(reader)?,
                }
            }
            4 => {
                let offset = read_const_expr(reader)?;
                ElemSegment {
                    ty: ValType::FuncRef,
                    mode: ElemMode::Active { table: 0, offset },
                    items: reader.read_vec(read_const_expr)?,
                }
            }
            5 | 7 => {
                let ty = read_ref_type(reader)?;
                let items = reader.read_vec(read_const_expr)?;
                let mode = if flags == 5 {
                    ElemMode::Passive
                } else {
                    ElemMode::Declarative
                };
                ElemSegment { ty, mode, items }
            }
            6 => {
                let table = reader.read_u32()?;
                let offset = read_const_expr(reader)?;
                let ty = read_ref_type(reader)?;
                ElemSegment {
                    ty,
                    mode: ElemMode::Active { table, offset },
                    items: reader.read_vec(read_const_expr)?,
                }
            }
            _ => {
                return Err(Error::parsing(
                    offset,
                    format!("invalid element segment flags {flags}"),
                ))
            }
        };
        Ok(segment)
    }
}

impl SectionBuilder for ElementSection {
    fn supports(&self, id: u8) -> bool {
        id == 9
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let segments = reader.read_vec(Self::read_segment)?;
        debug!("element section: {} segment(s)", segments.len());
        module.elements.extend(segments);
        Ok(())
    }
}

struct DataSection;

impl SectionBuilder for DataSection {
    fn supports(&self, id: u8) -> bool {
        id == 11
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        let segments = reader.read_vec(|r| {
            let offset = r.position();
            let mode = match r.read_u32()? {
                0 => DataMode::Active {
                    memory: 0,
                    offset: read_const_expr(r)?,
                },
                1 => DataMode::Passive,
                2 => {
                    let memory = r.read_u32()?;
                    DataMode::Active {
                        memory,
                        offset: read_const_expr(r)?,
                    }
                }
                flags => {
                    return Err(Error::parsing(
                        offset,
                        format!("invalid data segment flags {flags}"),
                    ))
                }
            };
            let len = r.read_u32()? as usize;
            let bytes = r.read_bytes(len)?.to_vec();
            Ok(DataSegment { mode, bytes })
        })?;
        if let Some(expected) = module.data_count {
            if expected as usize != segments.len() {
                return Err(Error::parsing(
                    reader.position(),
                    format!(
                        "data count section declared {expected} segment(s), found {}",
                        segments.len()
                    ),
                ));
            }
        }
        debug!("data section: {} segment(s)", segments.len());
        module.data.extend(segments);
        Ok(())
    }
}

struct DataCountSection;

impl SectionBuilder for DataCountSection {
    fn supports(&self, id: u8) -> bool {
        id == 12
    }

    fn scan(&mut self, _id: u8, reader: &mut Reader<'_>, module: &mut Module) -> Result<()> {
        module.data_count = Some(reader.read_u32()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(builder: &mut dyn SectionBuilder, id: u8, bytes: &[u8]) -> Result<Module> {
        let mut module = Module::default();
        let mut reader = Reader::new(bytes);
        builder.scan(id, &mut reader, &mut module)?;
        assert!(reader.is_empty(), "builder left trailing bytes");
        builder.finish(&mut module)?;
        Ok(module)
    }

    #[test]
    fn type_section() {
        // 1 type: (i32, i64) -> f32
        let module = scan(&mut TypeSection, 1, &[0x01, 0x60, 0x02, 0x7F, 0x7E, 0x01, 0x7D]).unwrap();
        assert_eq!(
            module.types,
            vec![FuncType {
                params: vec![ValType::I32, ValType::I64],
                results: vec![ValType::F32],
            }]
        );
    }

    #[test]
    fn type_section_rejects_other_forms() {
        assert!(matches!(
            scan(&mut TypeSection, 1, &[0x01, 0x5F, 0x00, 0x00]),
            Err(Error::Parsing { offset: 1, .. })
        ));
    }

    #[test]
    fn v128_is_not_a_value_type() {
        assert!(matches!(
            scan(&mut TypeSection, 1, &[0x01, 0x60, 0x01, 0x7B, 0x00]),
            Err(Error::Parsing { .. })
        ));
    }

    #[test]
    fn import_kinds() {
        let bytes = [
            0x02, // two imports
            0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x05, // func type 5
            0x03, b'e', b'n', b'v', 0x01, b'm', 0x02, 0x01, 0x01, 0x02, // memory 1..2
        ];
        let module = scan(&mut ImportSection, 2, &bytes).unwrap();
        assert_eq!(module.imports[0].desc, ImportDesc::Func(5));
        assert_eq!(
            module.imports[1].desc,
            ImportDesc::Memory(Limits {
                min: 1,
                max: Some(2)
            })
        );
    }

    #[test]
    fn invalid_import_kind() {
        let bytes = [0x01, 0x01, b'a', 0x01, b'b', 0x07, 0x00];
        assert!(matches!(
            scan(&mut ImportSection, 2, &bytes),
            Err(Error::Parsing { offset: 5, .. })
        ));
    }

    #[test]
    fn invalid_export_kind() {
        let bytes = [0x01, 0x01, b'x', 0x04, 0x00];
        assert!(matches!(
            scan(&mut ExportSection, 7, &bytes),
            Err(Error::Parsing { offset: 3, .. })
        ));
    }

    #[test]
    fn functions_pair_declarations_with_bodies() {
        let mut builder = FunctionSection::default();
        let mut module = Module::default();
        let mut reader = Reader::new(&[0x02, 0x00, 0x01]);
        builder.scan(3, &mut reader, &mut module).unwrap();

        // body 1: locals (2 x i32); end. body 2: no locals; nop; end.
        let code = [0x02, 0x04, 0x01, 0x02, 0x7F, 0x0B, 0x03, 0x00, 0x01, 0x0B];
        let mut reader = Reader::new(&code);
        builder.scan(10, &mut reader, &mut module).unwrap();
        builder.finish(&mut module).unwrap();

        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.functions[0].type_index, 0);
        assert_eq!(module.functions[0].locals, vec![ValType::I32, ValType::I32]);
        assert_eq!(module.functions[1].type_index, 1);
        assert_eq!(module.functions[1].body, vec![Instr::Nop]);
    }

    #[test]
    fn code_count_must_match() {
        let mut builder = FunctionSection::default();
        let mut module = Module::default();
        builder
            .scan(3, &mut Reader::new(&[0x01, 0x00]), &mut module)
            .unwrap();
        let err = builder
            .scan(10, &mut Reader::new(&[0x00]), &mut module)
            .unwrap_err();
        assert!(matches!(err, Error::Parsing { .. }));
    }

    #[test]
    fn declared_functions_need_code() {
        let mut builder = FunctionSection::default();
        assert!(scan(&mut builder, 3, &[0x01, 0x00]).is_err());
    }

    #[test]
    fn function_body_size_is_asserted() {
        let mut builder = FunctionSection::default();
        let mut module = Module::default();
        builder
            .scan(3, &mut Reader::new(&[0x01, 0x00]), &mut module)
            .unwrap();
        // declared size 3, body is 2 bytes followed by a stray nop
        let err = builder
            .scan(10, &mut Reader::new(&[0x01, 0x03, 0x00, 0x0B, 0x01]), &mut module)
            .unwrap_err();
        assert!(matches!(err, Error::Parsing { .. }));
    }

    #[test]
    fn too_many_locals() {
        let mut builder = FunctionSection::default();
        let mut module = Module::default();
        builder
            .scan(3, &mut Reader::new(&[0x01, 0x00]), &mut module)
            .unwrap();
        // one group of 2^32-1 i32 locals
        let code = [0x01, 0x08, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F, 0x7F, 0x0B];
        let err = builder
            .scan(10, &mut Reader::new(&code), &mut module)
            .unwrap_err();
        assert!(matches!(err, Error::Parsing { .. }));
    }

    #[test]
    fn globals_with_constant_initialisers() {
        // (global (mut i32) (i32.const -1)) (global f64 (global.get 0))
        let bytes = [0x02, 0x7F, 0x01, 0x41, 0x7F, 0x0B, 0x7C, 0x00, 0x23, 0x00, 0x0B];
        let module = scan(&mut GlobalSection, 6, &bytes).unwrap();
        assert_eq!(module.globals[0].init, ConstExpr::I32(-1));
        assert!(module.globals[0].ty.mutable);
        assert_eq!(module.globals[1].init, ConstExpr::GlobalGet(0));
        assert_eq!(module.globals[1].ty.ty, ValType::F64);
    }

    #[test]
    fn non_constant_offset_is_rejected() {
        // data segment with offset `i32.const 1; i32.const 2; i32.add`
        let bytes = [0x01, 0x00, 0x41, 0x01, 0x41, 0x02, 0x6A, 0x0B, 0x00];
        assert!(matches!(
            scan(&mut DataSection, 11, &bytes),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn data_segment_modes() {
        let bytes = [
            0x02, // two segments
            0x00, 0x41, 0x08, 0x0B, 0x02, 0xAA, 0xBB, // active at 8
            0x01, 0x01, 0xCC, // passive
        ];
        let module = scan(&mut DataSection, 11, &bytes).unwrap();
        assert_eq!(
            module.data[0].mode,
            DataMode::Active {
                memory: 0,
                offset: ConstExpr::I32(8)
            }
        );
        assert_eq!(module.data[0].bytes, vec![0xAA, 0xBB]);
        assert_eq!(module.data[1].mode, DataMode::Passive);
    }

    #[test]
    fn element_segment_flags() {
        let bytes = [
            0x03, // three segments
            0x00, 0x41, 0x01, 0x0B, 0x02, 0x00, 0x01, // active table 0 at 1: funcs 0 1
            0x01, 0x00, 0x01, 0x02, // passive: func 2
            0x05, 0x70, 0x01, 0xD0, 0x70, 0x0B, // passive exprs: ref.null func
        ];
        let module = scan(&mut ElementSection, 9, &bytes).unwrap();
        assert_eq!(
            module.elements[0].mode,
            ElemMode::Active {
                table: 0,
                offset: ConstExpr::I32(1)
            }
        );
        assert_eq!(
            module.elements[0].items,
            vec![ConstExpr::RefFunc(0), ConstExpr::RefFunc(1)]
        );
        assert_eq!(module.elements[1].mode, ElemMode::Passive);
        assert_eq!(module.elements[1].items, vec![ConstExpr::RefFunc(2)]);
        assert_eq!(
            module.elements[2].items,
            vec![ConstExpr::RefNull(ValType::FuncRef)]
        );
    }

    #[test]
    fn limits_flag_is_checked() {
        assert!(matches!(
            scan(&mut MemorySection, 5, &[0x01, 0x02, 0x01]),
            Err(Error::Parsing { .. })
        ));
    }
}
