//! Lowering of function bodies.
//!
//! One pass over the instruction tree per function. The operand stack is
//! simulated at compile time ([`stack::ExprCompiler`]); every instruction
//! either pushes an inline expression, binds its result to a fresh `let`, or
//! emits a statement. Structured control flow maps onto labeled Rust blocks
//! and loops ([`control`]).

mod control;
mod instruction;
pub mod stack;

use crate::backend::Backend;
use crate::codegen::source::Source;
use crate::codegen::types::format_return_type;
use crate::error::{Error, Result};
use crate::ir::{ExternKind, Instr, Module, ValType};
use control::Task;
use log::debug;
use stack::ExprCompiler;

/// Lints silenced on every generated function. Wasm stack code produces
/// unused bindings and unreachable tails routinely.
const FUNCTION_ALLOW: &str = "#[allow(unused_mut, unused_variables, unused_assignments, \
unused_parens, unreachable_code, unused_labels, dead_code, clippy::all)]";

/// Compiles a single function body.
pub struct FunctionCompiler<'a, B: Backend> {
    module: &'a Module,
    backend: &'a B,
    expr: ExprCompiler,
}

/// Lower local function `local_index` to a method `fn_N` of the generated
/// module struct, where `N` is its index in the unified function space.
pub fn compile_function<B: Backend>(
    module: &Module,
    local_index: usize,
    backend: &B,
) -> Result<String> {
    let func = module.functions.get(local_index).ok_or_else(|| {
        Error::validation(format!("local function {local_index} out of range"))
    })?;
    let index = module.num_imported(ExternKind::Func) + local_index;
    let ty = module.func_type_at(func.type_index)?;
    debug!(
        "compiling fn_{index} {:?} -> {:?} ({} instruction(s) at top level)",
        ty.params,
        ty.results,
        func.body.len()
    );

    let mut out = Source::with_indent(1);
    out.line(FUNCTION_ALLOW);
    let params: String = ty
        .params
        .iter()
        .enumerate()
        .map(|(i, t)| format!(", mut l{i}: {}", t.rust_type()))
        .collect();
    out.open(format!(
        "fn fn_{index}(&self{params}) -> {} {{",
        format_return_type(&ty.results)
    ));
    for (k, t) in func.locals.iter().enumerate() {
        out.line(format!(
            "let mut l{}: {} = {};",
            ty.params.len() + k,
            t.rust_type(),
            t.default_literal()
        ));
    }

    let locals: Vec<ValType> = ty.params.iter().chain(&func.locals).copied().collect();
    let mut compiler = FunctionCompiler {
        module,
        backend,
        expr: ExprCompiler::new(locals, ty.results.clone(), out),
    };
    compiler.compile_body(&func.body)?;
    compiler.finish_function()?;

    let mut out = compiler.expr.out;
    out.close("}");
    Ok(out.finish())
}

impl<'a, B: Backend> FunctionCompiler<'a, B> {
    /// Compile a function body. Nested constructs go through an explicit
    /// work stack, so nesting depth costs no call frames. Everything after an
    /// unconditional transfer is dead and skipped.
    fn compile_body<'i>(&mut self, body: &'i [Instr]) -> Result<()> {
        let mut tasks = vec![Task::Seq(body.iter())];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Seq(mut rest) => {
                    if self.expr.is_unreachable() {
                        continue;
                    }
                    let Some(instr) = rest.next() else {
                        continue;
                    };
                    tasks.push(Task::Seq(rest));
                    self.compile_instr(instr, &mut tasks)?;
                }
                Task::Else(else_arm) => self.close_then(else_arm, &mut tasks)?,
                Task::Close {
                    leave,
                    braces,
                    results,
                    types,
                } => self.close_construct(leave, braces, results, &types)?,
            }
        }
        Ok(())
    }

    fn compile_instr<'i>(&mut self, instr: &'i Instr, tasks: &mut Vec<Task<'i>>) -> Result<()> {
        match instr {
            Instr::Unreachable => self.compile_unreachable(),
            Instr::Nop => Ok(()),
            Instr::Block { ty, body } => self.open_block(*ty, body, tasks),
            Instr::Loop { ty, body } => self.open_loop(*ty, body, tasks),
            Instr::If {
                ty,
                then_body,
                else_body,
            } => self.open_if(*ty, then_body, else_body, tasks),
            Instr::Br(depth) => self.compile_br(*depth),
            Instr::BrIf(depth) => self.compile_br_if(*depth),
            Instr::BrTable { targets, default } => self.compile_br_table(targets, *default),
            Instr::Return => self.compile_return(),
            other => self.compile_plain(other),
        }
    }

    /// The implicit return at the end of the body.
    fn finish_function(&mut self) -> Result<()> {
        if self.expr.is_unreachable() {
            return Ok(());
        }
        let types = self.expr.results().types.clone();
        let values = self.frame_values(&types)?;
        self.expr.exit(self.expr.depth() as u32, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SafeBackend;
    use crate::ir::{BlockType, FuncType, Function, MAX_NESTING};
    use crate::parser::decode;

    fn lower(wat: &str, local_index: usize) -> Result<String> {
        let module = decode(wat.as_bytes()).unwrap();
        compile_function(&module, local_index, &SafeBackend::new())
    }

    fn lower_ok(wat: &str) -> String {
        lower(wat, 0).unwrap()
    }

    #[test]
    fn add_function() {
        let code = lower_ok(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        );
        assert!(code.contains("fn fn_0(&self, mut l0: i32, mut l1: i32) -> WasmResult<i32> {"));
        assert!(code.contains("let v0: i32 = l0.wrapping_add(l1);"));
        assert!(code.contains("return Ok(v0);"));
        assert!(code.starts_with("    #[allow("));
    }

    #[test]
    fn declared_locals_are_zeroed() {
        let code = lower_ok(
            r#"(module (func (param i64) (local f32 funcref)))"#,
        );
        assert!(code.contains("let mut l1: f32 = 0.0f32;"));
        assert!(code.contains("let mut l2: Option<FuncRef> = None;"));
        assert!(code.contains("return Ok(());"));
    }

    #[test]
    fn function_names_use_the_unified_index() {
        let code = lower(
            r#"(module
                (import "env" "a" (func))
                (import "env" "b" (func))
                (func (result i64) i64.const -3))"#,
            0,
        )
        .unwrap();
        assert!(code.contains("fn fn_2(&self) -> WasmResult<i64>"));
        assert!(code.contains("return Ok((-3i64));"));
    }

    #[test]
    fn local_set_preserves_earlier_reads() {
        // The first read of l0 must observe the value before the write.
        let code = lower_ok(
            r#"(module (func (param i32) (result i32)
                local.get 0
                i32.const 9
                local.set 0
                local.get 0
                i32.sub))"#,
        );
        let bind = code.find("let v0: i32 = l0;").unwrap();
        let write = code.find("l0 = 9i32;").unwrap();
        assert!(bind < write);
        assert!(code.contains("v0.wrapping_sub(l0)"));
    }

    #[test]
    fn result_type_mismatch_is_reported() {
        let err = lower(r#"(module (func (result i32) i64.const 1))"#, 0).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
    }

    #[test]
    fn leftover_values_are_a_mismatch() {
        let err = lower(r#"(module (func i32.const 1))"#, 0).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
    }

    #[test]
    fn stack_underflow_is_reported() {
        let err = lower(r#"(module (func (result i32) i32.const 1 i32.add))"#, 0).unwrap_err();
        assert!(matches!(err, Error::StackUnderflow { needed: 1, available: 0 }), "{err}");
    }

    #[test]
    fn invalid_local_index_is_reported() {
        let module = Module {
            types: vec![FuncType::default()],
            functions: vec![Function {
                type_index: 0,
                locals: vec![],
                body: vec![Instr::LocalGet(3), Instr::Drop],
            }],
            ..Module::default()
        };
        let err = compile_function(&module, 0, &SafeBackend::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidLocalIndex(3)));
    }

    #[test]
    fn dead_code_after_return_is_skipped() {
        let code = lower_ok(
            r#"(module (func (result i32)
                i32.const 1
                return
                i64.const 2
                i64.const 3
                i64.add))"#,
        );
        assert!(code.contains("return Ok(1i32);"));
        assert!(!code.contains("wrapping_add"));
    }

    #[test]
    fn unreachable_traps() {
        let code = lower_ok(r#"(module (func (result f64) unreachable))"#);
        assert!(code.contains("return Err(WasmTrap::Unreachable);"));
        assert!(!code.contains("return Ok("));
    }

    #[test]
    fn nesting_at_the_limit_decodes_and_compiles() {
        let wat = format!(
            "(module (func (result i32) {} i32.const 5 {}))",
            "block (result i32) ".repeat(MAX_NESTING),
            "end ".repeat(MAX_NESTING)
        );
        let code = lower_ok(&wat);
        let innermost = format!("'l{}: {{", MAX_NESTING - 1);
        assert!(code.contains(&innermost));
        assert!(!code.contains(&format!("'l{}:", MAX_NESTING)));
        assert!(code.contains("return Ok(v0);"));
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let mut body = Vec::new();
        for _ in 0..=MAX_NESTING {
            body = vec![Instr::Block {
                ty: BlockType::Empty,
                body,
            }];
        }
        let module = Module {
            types: vec![FuncType::default()],
            functions: vec![Function {
                type_index: 0,
                locals: vec![],
                body,
            }],
            ..Module::default()
        };
        let err = compile_function(&module, 0, &SafeBackend::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn if_arms_after_nested_constructs() {
        let code = lower_ok(
            r#"(module (func (param i32) (result i32)
                local.get 0
                if (result i32)
                    block (result i32) i32.const 1 end
                else
                    loop (result i32) i32.const 2 end
                end))"#,
        );
        let then_arm = code.find("v1 = 1i32;").unwrap();
        let else_arm = code.find("} else {").unwrap();
        let loop_body = code.find("v2 = 2i32;").unwrap();
        assert!(then_arm < else_arm && else_arm < loop_body);
        assert!(code.contains("return Ok(v0);"));
    }
}
