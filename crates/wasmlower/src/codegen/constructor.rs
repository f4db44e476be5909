//! The generated `Module::new(env, name)` constructor.
//!
//! Instantiation order: resolve imports, create memories, globals and
//! tables, build the struct, publish it in the environment, then run the
//! steps that need a live instance (ref.func globals, passive element
//! segments, active data, active elements, start function).

use super::module::{data_field_init, own_indices};
use super::source::Source;
use super::{import_indices, Layout};
use crate::error::{Error, Result};
use crate::ir::{ConstExpr, DataMode, ElemMode, ImportDesc, Limits, ResolvedFunc};
use log::debug;

pub fn emit_constructor(out: &mut Source, layout: &Layout) -> Result<()> {
    let module = layout.module;
    out.open(
        "pub fn new(env: &mut Environment, name: &str) -> Result<Rc<Module>, InstantiationError> {",
    );

    for (n, name) in layout.import_modules.iter().enumerate() {
        out.line(format!("let ref_{n} = env.import({name:?})?;"));
    }
    let indices = import_indices(module);
    for (import, index) in module.imports.iter().zip(&indices) {
        let r = layout.import_ref(&import.module)?;
        let (m, n) = (&import.module, &import.name);
        out.line(match import.desc {
            ImportDesc::Func(ty) => {
                format!("let fn_{index} = resolve_func(&*ref_{r}, {m:?}, {n:?}, &TYPE_{ty})?;")
            }
            ImportDesc::Memory(_) => {
                format!("let mem_{index} = resolve_memory(&*ref_{r}, {m:?}, {n:?})?;")
            }
            ImportDesc::Table(_) => {
                format!("let table_{index} = resolve_table(&*ref_{r}, {m:?}, {n:?})?;")
            }
            ImportDesc::Global(_) => {
                format!("let global_{index} = resolve_global(&*ref_{r}, {m:?}, {n:?})?;")
            }
        });
    }

    let memory_base = module.num_memories() - module.memories.len();
    for (i, limits) in module.memories.iter().enumerate() {
        out.line(format!(
            "let mem_{} = Rc::new(RefCell::new(Memory::new({})?));",
            memory_base + i,
            limit_args(limits)
        ));
    }

    let global_base = module.num_globals() - module.globals.len();
    let mut deferred = Vec::new();
    for (i, global) in module.globals.iter().enumerate() {
        let index = global_base + i;
        out.line(format!(
            "let global_{index} = Rc::new(RefCell::new(Global::new({:?}, {})?));",
            global.ty.ty.global_tag(),
            global.ty.mutable
        ));
        let value = match global.init {
            ConstExpr::RefFunc(func) => {
                deferred.push((index, func));
                continue;
            }
            other => const_value(&other),
        };
        out.line(format!("global_{index}.borrow_mut().set({value})?;"));
    }

    let table_base = module.num_tables() - module.tables.len();
    for (i, table) in module.tables.iter().enumerate() {
        out.line(format!(
            "let table_{} = Rc::new(RefCell::new(Table::new({})?));",
            table_base + i,
            limit_args(&table.limits)
        ));
    }

    emit_struct_literal(out, layout, &indices);
    out.line("env.export(module.clone(), name);");

    for (index, func) in deferred {
        out.line(format!(
            "module.global_{index}.borrow_mut().set(Value::FuncRef({}))?;",
            func_item(layout, func)?
        ));
    }
    for (k, segment) in module.elements.iter().enumerate() {
        if segment.mode == ElemMode::Passive {
            out.line(format!(
                "*module.elem_{k}.borrow_mut() = vec![{}];",
                elem_items(layout, &segment.items)?
            ));
        }
    }
    for (k, segment) in module.data.iter().enumerate() {
        if let DataMode::Active { memory, offset } = &segment.mode {
            out.open("{");
            out.line(format!("let offset: i32 = {};", offset_expr(offset)?));
            out.line(format!(
                "module.mem_{memory}.borrow_mut().write(DATA_{k}, ops::effective_address(offset, 0)?)?;"
            ));
            out.close("}");
        }
    }
    for segment in &module.elements {
        if let ElemMode::Active { table, offset } = &segment.mode {
            out.open("{");
            out.line(format!("let offset: i32 = {};", offset_expr(offset)?));
            out.line(format!(
                "let items: Vec<Option<FuncRef>> = vec![{}];",
                elem_items(layout, &segment.items)?
            ));
            out.line(format!(
                "module.table_{table}.borrow_mut().overwrite(&items, offset as u32)?;"
            ));
            out.close("}");
        }
    }

    if let Some(start) = module.start {
        out.line(match module.resolve_func(start)? {
            ResolvedFunc::Local(..) => format!("module.fn_{start}()?;"),
            ResolvedFunc::Imported(..) => format!("module.fn_{start}.call(&[])?;"),
        });
    }
    out.line("Ok(module)");
    out.close("}");
    debug!(
        "constructor: {} import(s), {} data and {} element segment(s)",
        module.imports.len(),
        module.data.len(),
        module.elements.len()
    );
    Ok(())
}

fn emit_struct_literal(out: &mut Source, layout: &Layout, indices: &[u32]) {
    let module = layout.module;
    out.open("let module = Rc::new_cyclic(|me| Module {");
    out.line("me: me.clone(),");
    for n in 0..layout.import_modules.len() {
        out.line(format!("ref_{n},"));
    }
    for (import, index) in module.imports.iter().zip(indices) {
        out.line(match import.desc {
            ImportDesc::Func(_) => format!("fn_{index},"),
            ImportDesc::Memory(_) => format!("mem_{index},"),
            ImportDesc::Table(_) => format!("table_{index},"),
            ImportDesc::Global(_) => format!("global_{index},"),
        });
    }
    for index in own_indices(module.num_memories(), module.memories.len()) {
        out.line(format!("mem_{index},"));
    }
    for index in own_indices(module.num_globals(), module.globals.len()) {
        out.line(format!("global_{index},"));
    }
    for index in own_indices(module.num_tables(), module.tables.len()) {
        out.line(format!("table_{index},"));
    }
    for (k, segment) in module.data.iter().enumerate() {
        out.line(format!("data_{k}: {},", data_field_init(&segment.mode, k)));
    }
    for k in 0..module.elements.len() {
        out.line(format!("elem_{k}: RefCell::new(Vec::new()),"));
    }
    out.close("});");
}

fn limit_args(limits: &Limits) -> String {
    match limits.max {
        Some(max) => format!("{}, Some({max})", limits.min),
        None => format!("{}, None", limits.min),
    }
}

/// A global initialiser as a runtime `Value`. `ref.func` initialisers are
/// set after construction and never reach here.
fn const_value(expr: &ConstExpr) -> String {
    match *expr {
        ConstExpr::I32(v) => format!("Value::I32({v}i32)"),
        ConstExpr::I64(v) => format!("Value::I64({v}i64)"),
        ConstExpr::F32(bits) => format!("Value::F32(f32::from_bits({bits:#010x}))"),
        ConstExpr::F64(bits) => format!("Value::F64(f64::from_bits({bits:#018x}))"),
        ConstExpr::RefNull(ty) => format!("{}(None)", ty.value_ctor()),
        ConstExpr::RefFunc(_) => "Value::FuncRef(None)".to_string(),
        ConstExpr::GlobalGet(index) => format!("global_{index}.borrow().get()"),
    }
}

/// Segment offset, read after the struct exists.
fn offset_expr(expr: &ConstExpr) -> Result<String> {
    match expr {
        ConstExpr::GlobalGet(index) => Ok(format!(
            "module.global_{index}.borrow().get_int()? as i32"
        )),
        ConstExpr::I32(v) => Ok(format!("{v}i32")),
        other => Err(Error::validation(format!(
            "segment offset must be an i32 constant, found {other:?}"
        ))),
    }
}

fn func_item(layout: &Layout, index: u32) -> Result<String> {
    Ok(match layout.module.resolve_func(index)? {
        ResolvedFunc::Local(..) => format!("Some(module.ref_fn_{index}())"),
        ResolvedFunc::Imported(..) => format!("Some(module.fn_{index}.clone())"),
    })
}

fn elem_items(layout: &Layout, items: &[ConstExpr]) -> Result<String> {
    let rendered = items
        .iter()
        .map(|item| match *item {
            ConstExpr::RefFunc(index) => func_item(layout, index),
            ConstExpr::RefNull(_) => Ok("None".to_string()),
            ConstExpr::GlobalGet(index) => Ok(format!(
                "module.global_{index}.borrow().get_ref()?.as_func_ref()?"
            )),
            other => Err(Error::validation(format!(
                "element item {other:?} is not a function reference"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(rendered.join(", "))
}
