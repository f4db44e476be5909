//! Non-control instructions.

use super::FunctionCompiler;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::ir::{type_list, Instr, ResolvedFunc, UnOp, ValType};

const MEMORY: &str = "self.mem_0";

impl<'a, B: Backend> FunctionCompiler<'a, B> {
    pub(super) fn compile_plain(&mut self, instr: &Instr) -> Result<()> {
        match instr {
            Instr::Call(index) => self.compile_call(*index)?,
            Instr::CallIndirect { type_index, table } => {
                self.compile_call_indirect(*type_index, *table)?
            }

            // ── reference ──
            Instr::RefNull(ty) => {
                if !ty.is_ref() {
                    return Err(Error::validation(format!("ref.null of {ty}")));
                }
                self.expr.push_expr(*ty, "None");
            }
            Instr::RefIsNull => {
                let operand = self.expr.pop_any()?;
                if !operand.ty.is_ref() {
                    return Err(Error::mismatch("reference", operand.ty));
                }
                self.expr
                    .push_expr(ValType::I32, format!("{}.is_none() as i32", operand.render()));
            }
            Instr::RefFunc(index) => {
                let expr = match self.module.resolve_func(*index)? {
                    ResolvedFunc::Local(..) => format!("Some(self.ref_fn_{index}())"),
                    ResolvedFunc::Imported(..) => format!("Some(self.fn_{index}.clone())"),
                };
                self.expr.push_expr(ValType::FuncRef, expr);
            }

            // ── parametric ──
            Instr::Drop => {
                self.expr.pop_any()?;
            }
            Instr::Select(annotated) => self.compile_select(*annotated)?,

            // ── variable ──
            Instr::LocalGet(index) => self.expr.get(*index)?,
            Instr::LocalSet(index) => {
                self.expr.set(*index)?;
            }
            Instr::LocalTee(index) => self.expr.tee(*index)?,
            Instr::GlobalGet(index) => self.compile_global_get(*index)?,
            Instr::GlobalSet(index) => self.compile_global_set(*index)?,

            // ── table ──
            Instr::TableGet(table) => {
                self.funcref_table(*table)?;
                let index = self.expr.pop_one(ValType::I32)?;
                self.expr.push_expr(
                    ValType::FuncRef,
                    format!("self.table_{table}.borrow().get({index} as u32)?"),
                );
            }
            Instr::TableSet(table) => {
                self.funcref_table(*table)?;
                let value = self.expr.pop_one(ValType::FuncRef)?;
                let index = self.expr.pop_one(ValType::I32)?;
                self.expr.out.line(format!(
                    "self.table_{table}.borrow_mut().set({index} as u32, {value})?;"
                ));
            }
            Instr::TableSize(table) => {
                self.funcref_table(*table)?;
                self.expr
                    .push_expr(ValType::I32, format!("self.table_{table}.borrow().size()"));
            }
            Instr::TableGrow(table) => {
                self.funcref_table(*table)?;
                let delta = self.expr.pop_one(ValType::I32)?;
                let init = self.expr.pop_one(ValType::FuncRef)?;
                self.expr.push_expr(
                    ValType::I32,
                    format!("self.table_{table}.borrow_mut().grow({delta} as u32, {init})"),
                );
            }
            Instr::TableFill(table) => {
                self.funcref_table(*table)?;
                let len = self.expr.pop_one(ValType::I32)?;
                let value = self.expr.pop_one(ValType::FuncRef)?;
                let offset = self.expr.pop_one(ValType::I32)?;
                self.expr.out.line(format!(
                    "self.table_{table}.borrow_mut().fill({len} as u32, {value}, {offset} as u32)?;"
                ));
            }
            Instr::TableCopy { dst, src } => {
                self.funcref_table(*dst)?;
                self.funcref_table(*src)?;
                let [d, s, n] = self.pop_three_i32()?;
                if dst == src {
                    self.expr.out.line(format!(
                        "self.table_{dst}.borrow_mut().copy_within({s} as u32, {d} as u32, {n} as u32)?;"
                    ));
                } else {
                    // Two imports may name the same table.
                    self.expr.out.open(format!(
                        "if Rc::ptr_eq(&self.table_{src}, &self.table_{dst}) {{"
                    ));
                    self.expr.out.line(format!(
                        "self.table_{dst}.borrow_mut().copy_within({s} as u32, {d} as u32, {n} as u32)?;"
                    ));
                    self.expr.out.reopen("} else {");
                    self.expr.out.line(format!(
                        "self.table_{src}.borrow().copy(&mut self.table_{dst}.borrow_mut(), {s} as u32, {d} as u32, {n} as u32)?;"
                    ));
                    self.expr.out.close("}");
                }
            }
            Instr::TableInit { elem, table } => {
                self.funcref_table(*table)?;
                self.check_elem(*elem)?;
                let [d, s, n] = self.pop_three_i32()?;
                self.expr.out.line(format!(
                    "self.table_{table}.borrow_mut().init(&self.elem_{elem}.borrow(), {s} as u32, {d} as u32, {n} as u32)?;"
                ));
            }
            Instr::ElemDrop(elem) => {
                self.check_elem(*elem)?;
                self.expr
                    .out
                    .line(format!("self.elem_{elem}.borrow_mut().clear();"));
            }

            // ── memory ──
            Instr::Load(op, memarg) => {
                self.module.check_memory(0)?;
                let addr = self.expr.pop_one(ValType::I32)?;
                let expr = self.backend.load(MEMORY, *op, memarg.offset, &addr);
                self.expr.push_expr(op.ty, expr);
            }
            Instr::Store(op, memarg) => {
                self.module.check_memory(0)?;
                let value = self.expr.pop_one(op.ty)?;
                let addr = self.expr.pop_one(ValType::I32)?;
                let stmt = self
                    .backend
                    .store(MEMORY, *op, memarg.offset, &addr, &value);
                self.expr.out.line(format!("{stmt};"));
            }
            Instr::MemorySize => {
                self.module.check_memory(0)?;
                self.expr
                    .push_expr(ValType::I32, format!("{MEMORY}.borrow().size()"));
            }
            Instr::MemoryGrow => {
                self.module.check_memory(0)?;
                let delta = self.expr.pop_one(ValType::I32)?;
                self.expr.push_expr(
                    ValType::I32,
                    format!("{MEMORY}.borrow_mut().grow({delta} as u32)"),
                );
            }
            Instr::MemoryInit(data) => {
                self.module.check_memory(0)?;
                self.check_data(*data)?;
                let [d, s, n] = self.pop_three_i32()?;
                self.expr.out.line(format!(
                    "{MEMORY}.borrow_mut().init(self.data_{data}.get(), {s} as u32, {d} as u32, {n} as u32)?;"
                ));
            }
            Instr::DataDrop(data) => {
                self.check_data(*data)?;
                self.expr.out.line(format!("self.data_{data}.set(NO_DATA);"));
            }
            Instr::MemoryCopy => {
                self.module.check_memory(0)?;
                let [d, s, n] = self.pop_three_i32()?;
                self.expr.out.line(format!(
                    "{MEMORY}.borrow_mut().copy({s} as u32 as usize, {d} as u32 as usize, {n} as u32 as usize)?;"
                ));
            }
            Instr::MemoryFill => {
                self.module.check_memory(0)?;
                let [d, value, n] = self.pop_three_i32()?;
                self.expr.out.line(format!(
                    "{MEMORY}.borrow_mut().fill({n} as u32 as usize, {value} as u8, {d} as u32 as usize)?;"
                ));
            }

            // ── numeric ──
            Instr::I32Const(v) => self.expr.constant(self.backend.i32_const(*v), ValType::I32),
            Instr::I64Const(v) => self.expr.constant(self.backend.i64_const(*v), ValType::I64),
            Instr::F32Const(bits) => {
                self.expr
                    .constant(self.backend.f32_const(*bits), ValType::F32)
            }
            Instr::F64Const(bits) => {
                self.expr
                    .constant(self.backend.f64_const(*bits), ValType::F64)
            }
            Instr::Compare(ty, op) => {
                let rhs = self.expr.pop_one(*ty)?;
                let lhs = self.expr.pop_one(*ty)?;
                let expr = self.backend.compare(*ty, *op, &lhs, &rhs)?;
                self.expr.push_expr(ValType::I32, expr);
            }
            Instr::Unary(ty, op) => {
                let operand = self.expr.pop_one(*ty)?;
                let expr = self.backend.unary(*ty, *op, &operand)?;
                let result = if *op == UnOp::Eqz { ValType::I32 } else { *ty };
                self.expr.push_expr(result, expr);
            }
            Instr::Binary(ty, op) => {
                let rhs = self.expr.pop_one(*ty)?;
                let lhs = self.expr.pop_one(*ty)?;
                let expr = self.backend.binary(*ty, *op, &lhs, &rhs)?;
                self.expr.push_expr(*ty, expr);
            }
            Instr::Convert(op) => {
                let (from, to) = op.types();
                let operand = self.expr.pop_one(from)?;
                let expr = self.backend.convert(*op, &operand);
                self.expr.push_expr(to, expr);
            }

            Instr::Unreachable
            | Instr::Nop
            | Instr::Block { .. }
            | Instr::Loop { .. }
            | Instr::If { .. }
            | Instr::Br(_)
            | Instr::BrIf(_)
            | Instr::BrTable { .. }
            | Instr::Return => {
                return Err(Error::validation(format!(
                    "control instruction {instr:?} reached the plain instruction path"
                )))
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, index: u32) -> Result<()> {
        let ty = self.module.func_type(index)?.clone();
        let args = self.expr.pop_typed(&ty.params)?;
        match self.module.resolve_func(index)? {
            ResolvedFunc::Local(..) => {
                let call = format!("self.fn_{index}({})?", args.join(", "));
                self.bind_results(&ty.results, call);
            }
            ResolvedFunc::Imported(..) => {
                let call = format!(
                    "self.fn_{index}.call(&[{}])?",
                    wrap_values(&ty.params, &args)
                );
                self.bind_dynamic(&ty.results, call);
            }
        }
        Ok(())
    }

    fn compile_call_indirect(&mut self, type_index: u32, table: u32) -> Result<()> {
        let ty = self.module.func_type_at(type_index)?.clone();
        self.funcref_table(table)?;
        let slot = self.expr.pop_one(ValType::I32)?;
        let args = self.expr.pop_typed(&ty.params)?;
        let callee = self.expr.fresh_var();
        self.expr.out.line(format!(
            "let {callee} = self.table_{table}.borrow().get({slot} as u32)?.ok_or(WasmTrap::UndefinedElement)?;"
        ));
        self.expr
            .out
            .line(format!("{callee}.expect_type(&TYPE_{type_index})?;"));
        let call = format!("{callee}.call(&[{}])?", wrap_values(&ty.params, &args));
        self.bind_dynamic(&ty.results, call);
        Ok(())
    }

    /// Bind the results of a statically typed call.
    fn bind_results(&mut self, results: &[ValType], call: String) {
        match results {
            [] => self.expr.out.line(format!("{call};")),
            [ty] => {
                self.expr.push_expr(*ty, call);
            }
            _ => {
                let vars = self.expr.push(results);
                let types: Vec<&str> = results.iter().map(|t| t.rust_type()).collect();
                self.expr.out.line(format!(
                    "let ({}): ({}) = {call};",
                    vars.join(", "),
                    types.join(", ")
                ));
            }
        }
    }

    /// Bind the results of a call through a `FuncRef`, unpacking the
    /// returned `Vec<Value>`.
    fn bind_dynamic(&mut self, results: &[ValType], call: String) {
        if results.is_empty() {
            self.expr.out.line(format!("{call};"));
            return;
        }
        let tmp = self.expr.fresh_var();
        self.expr.out.line(format!("let {tmp} = {call};"));
        for (i, ty) in results.iter().enumerate() {
            self.expr
                .push_expr(*ty, format!("{tmp}[{i}].{}()?", ty.value_accessor()));
        }
    }

    fn compile_select(&mut self, annotated: Option<ValType>) -> Result<()> {
        let cond = self.expr.pop_one(ValType::I32)?;
        let operands = self.expr.pop(2)?;
        let (a, b) = (&operands[0], &operands[1]);
        if a.ty != b.ty || annotated.is_some_and(|t| t != a.ty) {
            let expected = annotated.unwrap_or(a.ty);
            return Err(Error::mismatch(
                type_list(&[expected, expected]),
                type_list(&[a.ty, b.ty]),
            ));
        }
        let expr = format!(
            "if {cond} != 0 {{ {} }} else {{ {} }}",
            a.render(),
            b.render()
        );
        self.expr.push_expr(a.ty, expr);
        Ok(())
    }

    fn compile_global_get(&mut self, index: u32) -> Result<()> {
        let ty = self.module.global_type(index)?.ty;
        let cell = format!("self.global_{index}.borrow()");
        let expr = match ty {
            ValType::I32 => format!("{cell}.get_int()? as i32"),
            ValType::I64 => format!("{cell}.get_int()?"),
            ValType::F32 => format!("{cell}.get_float()? as f32"),
            ValType::F64 => format!("{cell}.get_float()?"),
            ValType::FuncRef => format!("{cell}.get_ref()?.as_func_ref()?"),
            ValType::ExternRef => format!("{cell}.get_ref()?.as_extern_ref()?"),
        };
        self.expr.push_expr(ty, expr);
        Ok(())
    }

    fn compile_global_set(&mut self, index: u32) -> Result<()> {
        let global = self.module.global_type(index)?;
        if !global.mutable {
            return Err(Error::validation(format!(
                "global.set of immutable global {index}"
            )));
        }
        let value = self.expr.pop_one(global.ty)?;
        let cell = format!("self.global_{index}.borrow_mut()");
        let stmt = match global.ty {
            ValType::I32 => format!("{cell}.set_int({value} as i64)?;"),
            ValType::I64 => format!("{cell}.set_int({value})?;"),
            ValType::F32 => format!("{cell}.set_float({value} as f64)?;"),
            ValType::F64 => format!("{cell}.set_float({value})?;"),
            ValType::FuncRef => format!("{cell}.set_ref(Value::FuncRef({value}))?;"),
            ValType::ExternRef => format!("{cell}.set_ref(Value::ExternRef({value}))?;"),
        };
        self.expr.out.line(stmt);
        Ok(())
    }

    /// Pop `[dst, src_or_value, len]`, all i32.
    fn pop_three_i32(&mut self) -> Result<[String; 3]> {
        let n = self.expr.pop_one(ValType::I32)?;
        let b = self.expr.pop_one(ValType::I32)?;
        let a = self.expr.pop_one(ValType::I32)?;
        Ok([a, b, n])
    }

    fn funcref_table(&self, table: u32) -> Result<()> {
        let ty = self.module.table_type(table)?;
        if ty.elem != ValType::FuncRef {
            return Err(Error::validation(format!(
                "table {table} holds {}; only funcref tables are supported",
                ty.elem
            )));
        }
        Ok(())
    }

    fn check_elem(&self, elem: u32) -> Result<()> {
        if (elem as usize) < self.module.elements.len() {
            Ok(())
        } else {
            Err(Error::validation(format!("element segment {elem} out of range")))
        }
    }

    fn check_data(&self, data: u32) -> Result<()> {
        if (data as usize) < self.module.data.len() {
            Ok(())
        } else {
            Err(Error::validation(format!("data segment {data} out of range")))
        }
    }
}

/// `Value::I32(v0), Value::F64(v1)` for a dynamic call.
fn wrap_values(types: &[ValType], values: &[String]) -> String {
    types
        .iter()
        .zip(values)
        .map(|(ty, value)| format!("{}({value})", ty.value_ctor()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use crate::backend::SafeBackend;
    use crate::compiler::compile_function;
    use crate::error::Error;
    use crate::parser::decode;

    fn lower_at(wat: &str, index: usize) -> Result<String, Error> {
        let module = decode(wat.as_bytes()).unwrap();
        compile_function(&module, index, &SafeBackend::new())
    }

    fn lower(wat: &str) -> String {
        lower_at(wat, 0).unwrap()
    }

    #[test]
    fn memory_load_and_store() {
        let code = lower(
            r#"(module (memory 1)
                (func (param i32)
                    local.get 0
                    local.get 0
                    i32.load16_s offset=2
                    i64.extend_i32_s
                    i64.store offset=8))"#,
        );
        assert!(code.contains(
            "let v0: i32 = self.mem_0.borrow().load_int(ops::effective_address(l0, 2)?, 16, true)? as i32;"
        ));
        assert!(code.contains("let v1: i64 = v0 as i64;"));
        assert!(code.contains(
            "self.mem_0.borrow_mut().store_int(v1, ops::effective_address(l0, 8)?, 64)?;"
        ));
    }

    #[test]
    fn memory_without_declaration_is_rejected() {
        let err = lower_at(
            r#"(module (func (result i32) memory.size))"#,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn memory_size_and_grow() {
        let code = lower(
            r#"(module (memory 1 4)
                (func (result i32)
                    i32.const 1
                    memory.grow
                    drop
                    memory.size))"#,
        );
        assert!(code.contains("let v0: i32 = self.mem_0.borrow_mut().grow(1i32 as u32);"));
        assert!(code.contains("let v1: i32 = self.mem_0.borrow().size();"));
    }

    #[test]
    fn bulk_memory_operations() {
        let code = lower(
            r#"(module (memory 1)
                (data $d "xyz")
                (func
                    (memory.init $d (i32.const 4) (i32.const 0) (i32.const 3))
                    (data.drop $d)
                    (memory.copy (i32.const 10) (i32.const 4) (i32.const 3))
                    (memory.fill (i32.const 0) (i32.const 255) (i32.const 2))))"#,
        );
        assert!(code.contains(
            "self.mem_0.borrow_mut().init(self.data_0.get(), 0i32 as u32, 4i32 as u32, 3i32 as u32)?;"
        ));
        assert!(code.contains("self.data_0.set(NO_DATA);"));
        assert!(code.contains(
            "self.mem_0.borrow_mut().copy(4i32 as u32 as usize, 10i32 as u32 as usize, 3i32 as u32 as usize)?;"
        ));
        assert!(code.contains(
            "self.mem_0.borrow_mut().fill(2i32 as u32 as usize, 255i32 as u8, 0i32 as u32 as usize)?;"
        ));
    }

    #[test]
    fn globals_read_and_write() {
        let code = lower(
            r#"(module
                (global $g (mut f32) (f32.const 1.5))
                (func
                    global.get $g
                    f32.const 2
                    f32.mul
                    global.set $g))"#,
        );
        assert!(code.contains("let v0: f32 = self.global_0.borrow().get_float()? as f32;"));
        assert!(code.contains("let v1: f32 = v0 * 2.0f32;"));
        assert!(code.contains("self.global_0.borrow_mut().set_float(v1 as f64)?;"));
    }

    #[test]
    fn immutable_global_set_is_rejected() {
        let err = lower_at(
            r#"(module (global i32 (i32.const 0))
                (func i32.const 1 global.set 0))"#,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn direct_and_imported_calls() {
        let code = lower_at(
            r#"(module
                (import "env" "log" (func $log (param i32) (result i64)))
                (func $pair (result i32 f64) i32.const 1 f64.const 2)
                (func (result i64)
                    call $pair
                    drop
                    call $log))"#,
            1,
        )
        .unwrap();
        assert!(code.contains("let (v0, v1): (i32, f64) = self.fn_1()?;"));
        assert!(code.contains("let v2 = self.fn_0.call(&[Value::I32(v0)])?;"));
        assert!(code.contains("let v3: i64 = v2[0].as_i64()?;"));
        assert!(code.contains("return Ok(v3);"));
    }

    #[test]
    fn indirect_call_checks_signature() {
        let code = lower(
            r#"(module
                (type $t (func (param i32) (result i32)))
                (table 2 funcref)
                (func (param i32) (result i32)
                    (call_indirect (type $t) (i32.const 5) (local.get 0))))"#,
        );
        assert!(code.contains(
            "let v0 = self.table_0.borrow().get(l0 as u32)?.ok_or(WasmTrap::UndefinedElement)?;"
        ));
        assert!(code.contains("v0.expect_type(&TYPE_0)?;"));
        assert!(code.contains("let v1 = v0.call(&[Value::I32(5i32)])?;"));
        assert!(code.contains("let v2: i32 = v1[0].as_i32()?;"));
    }

    #[test]
    fn select_and_references() {
        let code = lower(
            r#"(module
                (func $f (param i32) (result i32)
                    ref.func $f
                    ref.is_null
                    i32.const 3
                    local.get 0
                    select))"#,
        );
        assert!(code.contains("let v0: Option<FuncRef> = Some(self.ref_fn_0());"));
        assert!(code.contains("let v1: i32 = v0.clone().is_none() as i32;"));
        assert!(code.contains("let v2: i32 = if l0 != 0 { v1 } else { 3i32 };"));
    }

    #[test]
    fn select_operands_must_agree() {
        let err = lower_at(
            r#"(module (func (result i32)
                i32.const 1 i64.const 2 i32.const 0 select))"#,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn table_operations() {
        let code = lower(
            r#"(module
                (table $a 4 funcref)
                (table $b 4 funcref)
                (elem $e func $f)
                (func $f
                    (table.set $a (i32.const 0) (table.get $b (i32.const 1)))
                    (drop (table.grow $a (ref.null func) (i32.const 2)))
                    (table.copy $a $b (i32.const 0) (i32.const 1) (i32.const 1))
                    (table.init $a $e (i32.const 0) (i32.const 0) (i32.const 1))
                    (elem.drop $e)))"#,
        );
        assert!(code.contains("let v0: Option<FuncRef> = self.table_1.borrow().get(1i32 as u32)?;"));
        assert!(code.contains("self.table_0.borrow_mut().set(0i32 as u32, v0.clone())?;"));
        assert!(code.contains("let v2: i32 = self.table_0.borrow_mut().grow(2i32 as u32, v1.clone());"));
        assert!(code.contains("if Rc::ptr_eq(&self.table_1, &self.table_0) {"));
        assert!(code.contains(
            "self.table_0.borrow_mut().init(&self.elem_0.borrow(), 0i32 as u32, 0i32 as u32, 1i32 as u32)?;"
        ));
        assert!(code.contains("self.elem_0.borrow_mut().clear();"));
    }

    #[test]
    fn externref_tables_are_rejected() {
        let err = lower_at(
            r#"(module (table 1 externref)
                (func (result i32) table.size 0))"#,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn numeric_rendering() {
        let code = lower(
            r#"(module (func (param i64 f64) (result i32)
                local.get 0
                i64.const 3
                i64.rotl
                i64.eqz
                local.get 1
                f64.nearest
                i32.trunc_f64_u
                i32.lt_u))"#,
        );
        assert!(code.contains("let v0: i64 = l0.rotate_left(3i64 as u32);"));
        assert!(code.contains("let v1: i32 = (v0 == 0) as i32;"));
        assert!(code.contains("let v2: f64 = l1.round_ties_even();"));
        assert!(code.contains("let v3: i32 = ops::i32_trunc_f64_u(v2)?;"));
        assert!(code.contains("let v4: i32 = ((v1 as u32) < (v3 as u32)) as i32;"));
    }
}
