//! WebAssembly module decoder.
//!
//! Reads the binary encoding directly: header, then a sequence of
//! `(id, size, body)` sections dispatched to the section builders. Text
//! input is first assembled to binary with the `wat` crate.

pub mod instr;
pub mod reader;
pub mod sections;

use crate::error::{Error, Result};
use crate::ir::Module;
use log::{debug, info};
use reader::Reader;

const MAGIC: [u8; 4] = *b"\0asm";
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Decode a module from binary or text input.
pub fn decode(input: &[u8]) -> Result<Module> {
    if input.starts_with(&MAGIC) {
        return decode_binary(input);
    }
    info!("input is not binary, assembling WebAssembly text");
    let binary = wat::parse_bytes(input)?;
    decode_binary(&binary)
}

/// Decode a module from its binary encoding.
pub fn decode_binary(bytes: &[u8]) -> Result<Module> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_bytes(4)?;
    if magic != MAGIC {
        return Err(Error::parsing(0, "missing `\\0asm` magic number"));
    }
    let version = reader.read_bytes(4)?;
    if version != VERSION {
        return Err(Error::parsing(
            4,
            format!("unsupported binary version {version:02x?}"),
        ));
    }

    let mut module = Module::default();
    let mut builders = sections::builders();
    while !reader.is_empty() {
        let offset = reader.position();
        let id = reader.read_u8()?;
        let size = reader.read_u32()? as usize;
        match builders.iter_mut().find(|b| b.supports(id)) {
            Some(builder) => {
                debug!("section {id} at {offset:#x} ({size} bytes)");
                reader.sized(size, |r| builder.scan(id, r, &mut module))?;
            }
            None => {
                debug!("skipping section {id} at {offset:#x} ({size} bytes)");
                reader.skip(size)?;
            }
        }
    }
    for builder in &mut builders {
        builder.finish(&mut module)?;
    }

    info!(
        "decoded module: {} type(s), {} import(s), {} function(s), {} export(s)",
        module.types.len(),
        module.imports.len(),
        module.functions.len(),
        module.exports.len()
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstExpr, ExternKind, ImportDesc, Instr, ValType};
    use wasmparser::{Parser, Payload};

    fn wat(src: &str) -> Vec<u8> {
        wat::parse_str(src).unwrap()
    }

    #[test]
    fn empty_module() {
        let module = decode_binary(b"\0asm\x01\0\0\0").unwrap();
        assert_eq!(module, Module::default());
    }

    #[test]
    fn bad_magic_and_version() {
        assert!(matches!(
            decode_binary(b"\0wasm\x01\0\0"),
            Err(Error::Parsing { offset: 0, .. })
        ));
        assert!(matches!(
            decode_binary(b"\0asm\x02\0\0\0"),
            Err(Error::Parsing { offset: 4, .. })
        ));
        assert!(matches!(
            decode_binary(b"\0as"),
            Err(Error::Lexing { .. })
        ));
    }

    #[test]
    fn unknown_and_custom_sections_are_skipped() {
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.extend_from_slice(&[0x00, 0x04, 0x03, b'f', b'o', b'o']); // custom
        bytes.extend_from_slice(&[0x2A, 0x02, 0xDE, 0xAD]); // unknown id 42
        bytes.extend_from_slice(&[0x08, 0x01, 0x00]); // start 0
        let module = decode_binary(&bytes).unwrap();
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn section_size_is_asserted() {
        // start section declares 2 bytes but its body is 1
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.extend_from_slice(&[0x08, 0x02, 0x00, 0x01]);
        assert!(matches!(
            decode_binary(&bytes),
            Err(Error::Parsing { .. })
        ));

        // start section declares 1 byte but its index needs 2
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.extend_from_slice(&[0x08, 0x01, 0x80, 0x01]);
        assert!(decode_binary(&bytes).is_err());
    }

    #[test]
    fn text_input_is_assembled() {
        let module = decode(
            br#"(module (func (export "add") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        )
        .unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.exports[0].name, "add");
        assert_eq!(module.exports[0].kind, ExternKind::Func);
        let ty = module.func_type(0).unwrap();
        assert_eq!(ty.params, vec![ValType::I32, ValType::I32]);
        assert_eq!(ty.results, vec![ValType::I32]);
    }

    #[test]
    fn malformed_text_is_a_text_error() {
        assert!(matches!(decode(b"(module (func"), Err(Error::Text(_))));
    }

    #[test]
    fn imports_precede_locals() {
        let module = decode(&wat(
            r#"(module
                (import "env" "a" (func))
                (import "env" "b" (func (param i32)))
                (func) (func) (func (result i32) i32.const 1))"#,
        ))
        .unwrap();
        assert_eq!(module.num_funcs(), 5);
        assert_eq!(module.func_type(1).unwrap().params, vec![ValType::I32]);
        assert_eq!(module.func_type(4).unwrap().results, vec![ValType::I32]);
        assert!(matches!(module.imports[0].desc, ImportDesc::Func(_)));
    }

    #[test]
    fn agrees_with_wasmparser_on_counts() {
        let bytes = wat(r#"(module
            (type $t (func (param i32) (result i32)))
            (import "env" "log" (func $log (param i32)))
            (memory (export "mem") 1 2)
            (table 2 funcref)
            (global $g (mut i64) (i64.const 5))
            (elem (i32.const 0) $f $f)
            (data (i32.const 16) "hi")
            (func $f (type $t) local.get 0)
            (func (export "run") (result i64)
                i32.const 3
                call $log
                global.get $g))"#);
        let module = decode_binary(&bytes).unwrap();

        let mut functions = 0;
        let mut types = 0;
        let mut imports = 0;
        let mut data = 0;
        for payload in Parser::new(0).parse_all(&bytes) {
            match payload.unwrap() {
                Payload::TypeSection(s) => types = s.count(),
                Payload::ImportSection(s) => imports = s.count(),
                Payload::FunctionSection(s) => functions = s.count(),
                Payload::DataSection(s) => data = s.count(),
                _ => {}
            }
        }
        assert_eq!(module.types.len() as u32, types);
        assert_eq!(module.imports.len() as u32, imports);
        assert_eq!(module.functions.len() as u32, functions);
        assert_eq!(module.data.len() as u32, data);
        assert_eq!(module.globals[0].init, ConstExpr::I64(5));
        assert_eq!(module.functions[0].body, vec![Instr::LocalGet(0)]);
    }

    #[test]
    fn bulk_and_reference_instructions_decode() {
        let module = decode(br#"(module
            (memory 1)
            (table 1 funcref)
            (data $d "abc")
            (elem $e func $f)
            (func $f
                i32.const 0 i32.const 0 i32.const 3 memory.init $d
                data.drop $d
                i32.const 0 i32.const 1 i32.const 1 memory.copy
                i32.const 0 i32.const 0 i32.const 1 memory.fill
                i32.const 0 i32.const 0 i32.const 1 table.init $e
                elem.drop $e
                ref.func $f
                ref.is_null
                drop))"#)
        .unwrap();
        let body = &module.functions[0].body;
        assert!(body.contains(&Instr::MemoryInit(0)));
        assert!(body.contains(&Instr::DataDrop(0)));
        assert!(body.contains(&Instr::MemoryCopy));
        assert!(body.contains(&Instr::MemoryFill));
        assert!(body.contains(&Instr::TableInit { elem: 0, table: 0 }));
        assert!(body.contains(&Instr::ElemDrop(0)));
        assert!(body.contains(&Instr::RefFunc(0)));
    }
}
