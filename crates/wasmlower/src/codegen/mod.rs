//! Code generation: emits Rust source code from a decoded module.
//!
//! # Overview
//!
//! The generator produces one Rust source file declaring `pub struct Module`
//! and its `impl` blocks. The file is meant to be `include!`d inside a `mod`
//! of a crate that depends on `wasmlower-runtime`.
//!
//! ```text
//!   Module (IR)
//!      │
//!      ├─→ Layout::new()          validation, import wiring, export names
//!      │
//!      ├─→ module::emit_preamble  `use` lines
//!      ├─→ module::emit_statics   NO_DATA, DATA_K, TYPE_N
//!      ├─→ module::emit_struct    pub struct Module { .. }
//!      │
//!      ├─→ impl Module {
//!      │     constructor::emit_constructor   pub fn new(env, name)
//!      │     compiler::compile_function      fn fn_N(&self, ..) per local function
//!      │     export::emit_func_refs          fn ref_fn_N(&self) -> FuncRef
//!      │     export::emit_exports            pub fn <export>(..)
//!      │   }
//!      │
//!      └─→ export::emit_instance_impl        impl Instance for Module
//! ```
//!
//! # Naming
//!
//! Field and method names are positional and stable: `fn_N` is function N
//! of the unified index space (imports first), `mem_N`, `table_N` and
//! `global_N` likewise, `data_K` / `elem_K` are segments, and `ref_N` is the
//! N-th distinct imported module. Only exported entry points carry names
//! derived from the module ([`naming`]).

pub mod constructor;
pub mod export;
pub mod module;
pub mod naming;
pub mod source;
pub mod types;

use crate::backend::Backend;
use crate::compiler::compile_function;
use crate::error::{Error, Result};
use crate::ir::{
    import_kind, ConstExpr, DataMode, ElemMode, ExternKind, ImportDesc, Module, ValType,
};
use crate::CompileOptions;
use log::{debug, info};
use naming::{method_ident, sanitize, Namer};
use source::Source;

/// Main code generator struct that orchestrates emission of Rust code.
///
/// # Example
///
/// ```ignore
/// let backend = SafeBackend::new();
/// let codegen = CodeGenerator::new(&backend);
/// let rust_code = codegen.generate(&module, &CompileOptions::default())?;
/// ```
pub struct CodeGenerator<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> CodeGenerator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        CodeGenerator { backend }
    }

    /// Generate the complete source unit for `module`.
    pub fn generate(&self, module: &Module, options: &CompileOptions) -> Result<String> {
        let layout = Layout::new(module)?;
        info!(
            "generating module `{}`: {} function(s), {} export(s)",
            options.module_name,
            module.functions.len(),
            layout.exports.len()
        );

        let mut out = Source::new();
        module::emit_preamble(&mut out, options);
        module::emit_statics(&mut out, module);
        module::emit_struct(&mut out, &layout);

        out.open("impl Module {");
        constructor::emit_constructor(&mut out, &layout)?;
        for index in 0..module.functions.len() {
            out.blank();
            out.append(&compile_function(module, index, self.backend)?);
        }
        export::emit_func_refs(&mut out, &layout)?;
        export::emit_exports(&mut out, &layout)?;
        out.close("}");
        out.blank();
        export::emit_instance_impl(&mut out, &layout);
        Ok(out.finish())
    }
}

/// An export with its generated method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportItem {
    pub name: String,
    pub method: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// Module facts shared by the emitters, computed and validated once.
pub struct Layout<'a> {
    pub module: &'a Module,
    /// Distinct imported module names, in first-occurrence order; `ref_N`
    /// is the N-th.
    pub import_modules: Vec<&'a str>,
    pub exports: Vec<ExportItem>,
}

impl<'a> Layout<'a> {
    pub fn new(module: &'a Module) -> Result<Self> {
        let mut import_modules: Vec<&str> = Vec::new();
        for import in &module.imports {
            if !import_modules.contains(&import.module.as_str()) {
                import_modules.push(&import.module);
            }
        }

        let layout = Layout {
            module,
            import_modules,
            exports: name_exports(module)?,
        };
        layout.validate()?;
        debug!(
            "layout: {} imported module(s), {} export(s)",
            layout.import_modules.len(),
            layout.exports.len()
        );
        Ok(layout)
    }

    /// Position of `name` among the distinct imported modules, which selects
    /// the `ref_N` field its imports resolve through.
    pub fn import_ref(&self, name: &str) -> Result<usize> {
        self.import_modules
            .iter()
            .position(|m| *m == name)
            .ok_or_else(|| Error::validation(format!("no imports from module `{name}`")))
    }

    fn validate(&self) -> Result<()> {
        let module = self.module;
        for index in 0..module.num_tables() {
            let table = module.table_type(index as u32)?;
            if table.elem != ValType::FuncRef {
                return Err(Error::validation(format!(
                    "table {index} holds {}; only funcref tables are supported",
                    table.elem
                )));
            }
        }
        for import in &module.imports {
            if let ImportDesc::Func(ty) = import.desc {
                module.func_type_at(ty)?;
            }
        }
        for function in &module.functions {
            module.func_type_at(function.type_index)?;
        }

        let imported_globals = module.num_imported(ExternKind::Global);
        for (i, global) in module.globals.iter().enumerate() {
            let index = imported_globals + i;
            if let ConstExpr::GlobalGet(source) = global.init {
                if source as usize >= index {
                    return Err(Error::validation(format!(
                        "global {index} is initialised from global {source}, which is not yet defined"
                    )));
                }
            }
            let found = self.const_type(&global.init)?;
            if found != global.ty.ty {
                return Err(Error::validation(format!(
                    "global {index} of type {} has an initialiser of type {found}",
                    global.ty.ty
                )));
            }
        }

        for (k, segment) in module.elements.iter().enumerate() {
            if segment.ty != ValType::FuncRef {
                return Err(Error::validation(format!(
                    "element segment {k} holds {}; only funcref segments are supported",
                    segment.ty
                )));
            }
            if let ElemMode::Active { table, offset } = &segment.mode {
                module.table_type(*table)?;
                self.expect_offset(offset)?;
            }
            for item in &segment.items {
                if self.const_type(item)? != ValType::FuncRef {
                    return Err(Error::validation(format!(
                        "element segment {k} has a non-funcref item {item:?}"
                    )));
                }
            }
        }
        for segment in &module.data {
            if let DataMode::Active { memory, offset } = &segment.mode {
                module.check_memory(*memory)?;
                self.expect_offset(offset)?;
            }
        }

        if let Some(start) = module.start {
            let ty = module.func_type(start)?;
            if !ty.params.is_empty() || !ty.results.is_empty() {
                return Err(Error::validation(format!(
                    "start function {start} must take no parameters and return nothing"
                )));
            }
        }
        Ok(())
    }

    /// Type produced by a constant expression, checking the indices it uses.
    pub fn const_type(&self, expr: &ConstExpr) -> Result<ValType> {
        Ok(match *expr {
            ConstExpr::I32(_) => ValType::I32,
            ConstExpr::I64(_) => ValType::I64,
            ConstExpr::F32(_) => ValType::F32,
            ConstExpr::F64(_) => ValType::F64,
            ConstExpr::RefNull(ty) => ty,
            ConstExpr::RefFunc(index) => {
                self.module.resolve_func(index)?;
                ValType::FuncRef
            }
            ConstExpr::GlobalGet(index) => self.module.global_type(index)?.ty,
        })
    }

    fn expect_offset(&self, offset: &ConstExpr) -> Result<()> {
        match offset {
            ConstExpr::I32(_) | ConstExpr::GlobalGet(_)
                if self.const_type(offset)? == ValType::I32 =>
            {
                Ok(())
            }
            other => Err(Error::validation(format!(
                "segment offset must be an i32 constant, found {other:?}"
            ))),
        }
    }
}

/// Resolve every export to a unique method name, checking its index.
fn name_exports(module: &Module) -> Result<Vec<ExportItem>> {
    let mut namer = Namer::new();
    let mut items = Vec::with_capacity(module.exports.len());
    for export in &module.exports {
        let (count, candidate) = match export.kind {
            ExternKind::Func => (module.num_funcs(), method_ident(&export.name)),
            ExternKind::Memory => (
                module.num_memories(),
                format!("memory_{}", sanitize(&export.name)),
            ),
            ExternKind::Table => (
                module.num_tables(),
                format!("table_{}", sanitize(&export.name)),
            ),
            ExternKind::Global => (
                module.num_globals(),
                format!("global_{}", sanitize(&export.name)),
            ),
        };
        if export.index as usize >= count {
            return Err(Error::validation(format!(
                "export `{}` refers to {:?} index {} out of range",
                export.name, export.kind, export.index
            )));
        }
        items.push(ExportItem {
            name: export.name.clone(),
            method: namer.claim(candidate),
            kind: export.kind,
            index: export.index,
        });
    }
    Ok(items)
}

/// Per-kind index of each import, in declaration order.
pub fn import_indices(module: &Module) -> Vec<u32> {
    let mut counters = [0u32; 4];
    module
        .imports
        .iter()
        .map(|import| {
            let slot = match import_kind(&import.desc) {
                ExternKind::Func => 0,
                ExternKind::Table => 1,
                ExternKind::Memory => 2,
                ExternKind::Global => 3,
            };
            let index = counters[slot];
            counters[slot] += 1;
            index
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SafeBackend;
    use crate::parser::decode;

    fn generate(wat: &str) -> Result<String> {
        let module = decode(wat.as_bytes()).unwrap();
        let backend = SafeBackend::new();
        CodeGenerator::new(&backend).generate(&module, &CompileOptions::default())
    }

    #[test]
    fn add_module_shape() {
        let code = generate(
            r#"(module (func (export "add") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        )
        .unwrap();
        assert!(code.contains("use wasmlower_runtime::*;"));
        assert!(code.contains("pub struct Module {"));
        assert!(code.contains("me: Weak<Module>,"));
        assert!(code.contains(
            "pub fn new(env: &mut Environment, name: &str) -> Result<Rc<Module>, InstantiationError> {"
        ));
        assert!(code.contains("fn fn_0(&self, mut l0: i32, mut l1: i32) -> WasmResult<i32> {"));
        assert!(code.contains("pub fn add(&self, l0: i32, l1: i32) -> WasmResult<i32> {"));
        assert!(code.contains("\"add\" => Some(self.ref_fn_0()),"));
        assert!(code.contains("impl Instance for Module {"));
    }

    #[test]
    fn imports_are_grouped_by_module() {
        let code = generate(
            r#"(module
                (import "env" "log" (func (param i32)))
                (import "host" "mem" (memory 1))
                (import "env" "g" (global i32))
                (func (export "run") i32.const 1 call 0))"#,
        )
        .unwrap();
        assert!(code.contains("let ref_0 = env.import(\"env\")?;"));
        assert!(code.contains("let ref_1 = env.import(\"host\")?;"));
        assert!(code.contains("let fn_0 = resolve_func(&*ref_0, \"env\", \"log\", &TYPE_0)?;"));
        assert!(code.contains("let mem_0 = resolve_memory(&*ref_1, \"host\", \"mem\")?;"));
        assert!(code.contains("let global_0 = resolve_global(&*ref_0, \"env\", \"g\")?;"));
        assert!(code.contains("fn_0: FuncRef,"));
        assert!(code.contains("fn fn_1(&self)"));
    }

    #[test]
    fn start_function_with_parameters_is_rejected() {
        let err = generate(
            r#"(module (func $s (param i32)) (start $s))"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn start_function_is_invoked() {
        let code = generate(r#"(module (func $s) (start $s))"#).unwrap();
        assert!(code.contains("module.fn_0()?;"));
    }

    #[test]
    fn externref_tables_are_rejected() {
        let err = generate(r#"(module (table 1 externref))"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn export_index_out_of_range_is_rejected() {
        let mut module = decode(br#"(module (func))"#).unwrap();
        module.exports.push(crate::ir::Export {
            name: "missing".to_string(),
            kind: ExternKind::Func,
            index: 7,
        });
        let backend = SafeBackend::new();
        let err = CodeGenerator::new(&backend)
            .generate(&module, &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn global_initialiser_type_is_checked() {
        let mut module = decode(br#"(module (global i32 (i32.const 1)))"#).unwrap();
        module.globals[0].init = ConstExpr::I64(1);
        assert!(matches!(Layout::new(&module), Err(Error::Validation(_))));
    }

    #[test]
    fn export_names_are_sanitized_and_unique() {
        let code = generate(
            r#"(module
                (memory (export "memory") 1)
                (global (export "counter") (mut i32) (i32.const 0))
                (func (export "type"))
                (func (export "getValue"))
                (func (export "new")))"#,
        )
        .unwrap();
        assert!(code.contains("pub fn memory_memory(&self) -> Rc<RefCell<Memory>> {"));
        assert!(code.contains("pub fn global_counter(&self) -> Rc<RefCell<Global>> {"));
        assert!(code.contains("pub fn r#type(&self) -> WasmResult<()> {"));
        assert!(code.contains("pub fn get_value(&self) -> WasmResult<()> {"));
        assert!(code.contains("pub fn new_2(&self) -> WasmResult<()> {"));
        assert!(code.contains("\"getValue\" => Some(self.ref_fn_1()),"));
    }

    #[test]
    fn import_indices_are_per_kind() {
        let module = decode(
            br#"(module
                (import "a" "f" (func))
                (import "a" "g" (global i32))
                (import "a" "h" (func))
                (import "a" "m" (memory 1)))"#,
        )
        .unwrap();
        assert_eq!(import_indices(&module), vec![0, 0, 1, 0]);
    }

    #[test]
    fn import_refs_follow_first_appearance() {
        let module = decode(
            br#"(module
                (import "b" "f" (func))
                (import "a" "g" (global i32))
                (import "b" "h" (func)))"#,
        )
        .unwrap();
        let layout = Layout::new(&module).unwrap();
        assert_eq!(layout.import_ref("b").unwrap(), 0);
        assert_eq!(layout.import_ref("a").unwrap(), 1);
        assert!(matches!(layout.import_ref("c"), Err(Error::Validation(_))));
    }
}
