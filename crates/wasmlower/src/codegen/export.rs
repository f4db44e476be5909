//! Export surface of the generated module: typed entry points, accessors,
//! `FuncRef` handles and the `Instance` implementation.

use super::source::Source;
use super::types::format_return_type;
use super::{ExportItem, Layout};
use crate::error::Result;
use crate::ir::{ExternKind, ResolvedFunc};

/// One `ref_fn_N` per local function: a `FuncRef` that re-enters the
/// instance through its weak self-reference.
pub fn emit_func_refs(out: &mut Source, layout: &Layout) -> Result<()> {
    let module = layout.module;
    let base = module.num_funcs() - module.functions.len();
    for (i, func) in module.functions.iter().enumerate() {
        let index = base + i;
        let ty = module.func_type_at(func.type_index)?;
        let args: Vec<String> = ty
            .params
            .iter()
            .enumerate()
            .map(|(p, t)| format!("args[{p}].{}()?", t.value_accessor()))
            .collect();
        let call = format!("this.fn_{index}({})", args.join(", "));
        let args_name = if ty.params.is_empty() { "_args" } else { "args" };

        out.blank();
        out.line("#[allow(dead_code)]");
        out.open(format!("fn ref_fn_{index}(&self) -> FuncRef {{"));
        out.line("let me = self.me.clone();");
        out.open(format!(
            "FuncRef::new(&TYPE_{}, move |{args_name}: &[Value]| {{",
            func.type_index
        ));
        out.line("let this = me.upgrade().ok_or(WasmTrap::InstanceDropped)?;");
        match ty.results.as_slice() {
            [] => {
                out.line(format!("{call}?;"));
                out.line("Ok(vec![])");
            }
            [result] => out.line(format!("Ok(vec![{}({call}?)])", result.value_ctor())),
            results => {
                let names: Vec<String> = (0..results.len()).map(|r| format!("r{r}")).collect();
                out.line(format!("let ({}) = {call}?;", names.join(", ")));
                let values: Vec<String> = results
                    .iter()
                    .zip(&names)
                    .map(|(t, n)| format!("{}({n})", t.value_ctor()))
                    .collect();
                out.line(format!("Ok(vec![{}])", values.join(", ")));
            }
        }
        out.close("})");
        out.close("}");
    }
    Ok(())
}

/// Public methods, one per export.
pub fn emit_exports(out: &mut Source, layout: &Layout) -> Result<()> {
    for export in &layout.exports {
        out.blank();
        match export.kind {
            ExternKind::Func => emit_func_export(out, layout, export)?,
            ExternKind::Memory => emit_accessor(out, export, "Memory", "mem"),
            ExternKind::Table => emit_accessor(out, export, "Table", "table"),
            ExternKind::Global => emit_accessor(out, export, "Global", "global"),
        }
    }
    Ok(())
}

fn emit_func_export(out: &mut Source, layout: &Layout, export: &ExportItem) -> Result<()> {
    let module = layout.module;
    let index = export.index;
    out.line(format!("/// Export `{}`.", export.name.escape_debug()));
    match module.resolve_func(index)? {
        ResolvedFunc::Local(..) => {
            let ty = module.func_type(index)?;
            let params: String = ty
                .params
                .iter()
                .enumerate()
                .map(|(i, t)| format!(", l{i}: {}", t.rust_type()))
                .collect();
            let args: Vec<String> = (0..ty.params.len()).map(|i| format!("l{i}")).collect();
            out.open(format!(
                "pub fn {}(&self{params}) -> {} {{",
                export.method,
                format_return_type(&ty.results)
            ));
            out.line(format!("self.fn_{index}({})", args.join(", ")));
        }
        ResolvedFunc::Imported(..) => {
            out.open(format!(
                "pub fn {}(&self, args: &[Value]) -> WasmResult<Vec<Value>> {{",
                export.method
            ));
            out.line(format!("self.fn_{index}.call(args)"));
        }
    }
    out.close("}");
    Ok(())
}

fn emit_accessor(out: &mut Source, export: &ExportItem, ty: &str, field: &str) {
    out.line(format!("/// Export `{}`.", export.name.escape_debug()));
    out.open(format!(
        "pub fn {}(&self) -> Rc<RefCell<{ty}>> {{",
        export.method
    ));
    out.line(format!("self.{field}_{}.clone()", export.index));
    out.close("}");
}

/// Name-based lookup used by importing modules.
pub fn emit_instance_impl(out: &mut Source, layout: &Layout) {
    out.open("impl Instance for Module {");
    let lookups = [
        (ExternKind::Func, "func", "FuncRef"),
        (ExternKind::Memory, "memory", "Rc<RefCell<Memory>>"),
        (ExternKind::Table, "table", "Rc<RefCell<Table>>"),
        (ExternKind::Global, "global", "Rc<RefCell<Global>>"),
    ];
    for (i, (kind, method, ty)) in lookups.into_iter().enumerate() {
        if i > 0 {
            out.blank();
        }
        let arms: Vec<String> = layout
            .exports
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| format!("{:?} => Some({}),", e.name, lookup_value(layout, e)))
            .collect();
        let name = if arms.is_empty() { "_name" } else { "name" };
        out.open(format!("fn {method}(&self, {name}: &str) -> Option<{ty}> {{"));
        if arms.is_empty() {
            out.line("None");
        } else {
            out.open("match name {");
            for arm in arms {
                out.line(arm);
            }
            out.line("_ => None,");
            out.close("}");
        }
        out.close("}");
    }
    out.close("}");
}

fn lookup_value(layout: &Layout, export: &ExportItem) -> String {
    let index = export.index;
    match export.kind {
        ExternKind::Func => match layout.module.resolve_func(index) {
            Ok(ResolvedFunc::Imported(..)) => format!("self.fn_{index}.clone()"),
            _ => format!("self.ref_fn_{index}()"),
        },
        ExternKind::Memory => format!("self.mem_{index}.clone()"),
        ExternKind::Table => format!("self.table_{index}.clone()"),
        ExternKind::Global => format!("self.global_{index}.clone()"),
    }
}
