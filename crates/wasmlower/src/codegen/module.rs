//! Module-level items: preamble, statics and the `Module` struct.

use super::source::Source;
use super::types::runtime_type_slice;
use super::Layout;
use crate::ir::{DataMode, ImportDesc, Module};
use crate::CompileOptions;

/// Header comments and `use` lines. The output is `include!`d, so it must
/// not carry inner attributes.
pub fn emit_preamble(out: &mut Source, options: &CompileOptions) {
    out.line(format!(
        "// Generated by wasmlower {} for module `{}`.",
        env!("CARGO_PKG_VERSION"),
        options.module_name
    ));
    out.line("// Do not edit by hand.");
    out.blank();
    out.line("#[allow(unused_imports)]");
    out.line(format!("use {}::*;", options.runtime_crate));
    out.line("#[allow(unused_imports)]");
    out.line("use std::cell::{Cell, RefCell};");
    out.line("#[allow(unused_imports)]");
    out.line("use std::rc::{Rc, Weak};");
    out.blank();
}

/// Escape bytes into the body of a Rust byte string literal.
pub fn byte_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect()
}

/// `NO_DATA`, one `DATA_K` per data segment and one `TYPE_N` per type.
pub fn emit_statics(out: &mut Source, module: &Module) {
    out.line("#[allow(dead_code)]");
    out.line("static NO_DATA: &[u8] = &[];");
    for (k, segment) in module.data.iter().enumerate() {
        out.line("#[allow(dead_code)]");
        out.line(format!(
            "static DATA_{k}: &[u8] = b\"{}\";",
            byte_string(&segment.bytes)
        ));
    }
    for (n, ty) in module.types.iter().enumerate() {
        out.line("#[allow(dead_code)]");
        out.line(format!(
            "static TYPE_{n}: Signature = Signature {{ params: {}, results: {} }};",
            runtime_type_slice(&ty.params),
            runtime_type_slice(&ty.results)
        ));
    }
    out.blank();
}

/// Field declarations: imported items first, then local state.
pub fn emit_struct(out: &mut Source, layout: &Layout) {
    let module = layout.module;
    let indices = super::import_indices(module);

    out.line("#[allow(dead_code)]");
    out.open("pub struct Module {");
    out.line("me: Weak<Module>,");
    for n in 0..layout.import_modules.len() {
        out.line(format!("ref_{n}: Rc<dyn Instance>,"));
    }
    for (import, index) in module.imports.iter().zip(&indices) {
        out.line(match import.desc {
            ImportDesc::Func(_) => format!("fn_{index}: FuncRef,"),
            ImportDesc::Memory(_) => format!("mem_{index}: Rc<RefCell<Memory>>,"),
            ImportDesc::Table(_) => format!("table_{index}: Rc<RefCell<Table>>,"),
            ImportDesc::Global(_) => format!("global_{index}: Rc<RefCell<Global>>,"),
        });
    }
    for index in own_indices(module.num_memories(), module.memories.len()) {
        out.line(format!("mem_{index}: Rc<RefCell<Memory>>,"));
    }
    for index in own_indices(module.num_globals(), module.globals.len()) {
        out.line(format!("global_{index}: Rc<RefCell<Global>>,"));
    }
    for index in own_indices(module.num_tables(), module.tables.len()) {
        out.line(format!("table_{index}: Rc<RefCell<Table>>,"));
    }
    for k in 0..module.data.len() {
        out.line(format!("data_{k}: Cell<&'static [u8]>,"));
    }
    for k in 0..module.elements.len() {
        out.line(format!("elem_{k}: RefCell<Vec<Option<FuncRef>>>,"));
    }
    out.close("}");
    out.blank();
}

/// Unified indices of the locally defined items of one kind.
pub fn own_indices(total: usize, local: usize) -> std::ops::Range<usize> {
    total - local..total
}

/// Initial contents of `data_K`: passive segments stay readable until
/// `data.drop`; active ones are consumed by instantiation.
pub fn data_field_init(mode: &DataMode, k: usize) -> String {
    match mode {
        DataMode::Passive => format!("Cell::new(DATA_{k})"),
        DataMode::Active { .. } => "Cell::new(NO_DATA)".to_string(),
    }
}
