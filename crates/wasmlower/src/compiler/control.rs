//! Structured control flow.
//!
//! Every `block`, `loop` and `if` becomes a labeled Rust construct:
//!
//! ```text
//! block   =>  'l0: { ... }
//! loop    =>  'l0: loop { ... break 'l0; }
//! if      =>  'l0: { if c != 0 { ... } else { ... } }
//! ```
//!
//! Result values travel through `let mut` variables declared before the
//! construct. A branch assigns the target's variables and then leaves with
//! `break` (blocks, ifs), `continue` (loops, whose branch variables are the
//! loop parameters) or `return` (the function body).

use super::stack::{FrameKind, Label, Operand, StackValue};
use super::FunctionCompiler;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::ir::{type_list, BlockType, Instr, ValType, MAX_NESTING};
use std::slice;

/// Pending work while lowering a function body. Bodies of nested constructs
/// are queued rather than compiled recursively; the open half of a construct
/// pushes its close half before its body.
pub(super) enum Task<'i> {
    /// Remaining instructions of a sequence.
    Seq(slice::Iter<'i, Instr>),
    /// End of an `if`'s `then` arm, and the `else` arm to open, if any.
    Else(Option<ElseArm<'i>>),
    /// End of a construct: leave its last frame, close `braces` scopes and
    /// push the result variables.
    Close {
        leave: bool,
        braces: usize,
        results: Vec<String>,
        types: Vec<ValType>,
    },
}

pub(super) struct ElseArm<'i> {
    label: String,
    exit: Label,
    params: Vec<Operand>,
    body: &'i [Instr],
}

impl<'a, B: Backend> FunctionCompiler<'a, B> {
    fn check_nesting(&self) -> Result<()> {
        if self.expr.depth() >= MAX_NESTING {
            return Err(Error::validation(format!(
                "blocks nested deeper than {MAX_NESTING}"
            )));
        }
        Ok(())
    }

    pub(super) fn open_block<'i>(
        &mut self,
        ty: BlockType,
        body: &'i [Instr],
        tasks: &mut Vec<Task<'i>>,
    ) -> Result<()> {
        self.check_nesting()?;
        let sig = self.module.block_signature(ty)?;
        self.expr.materialize_locals();
        let params = self.pop_params(&sig.params)?;
        let results = self.declare_vars(&sig.results);

        let label = self.expr.fresh_label();
        self.expr.out.open(format!("{label}: {{"));
        let exit = Label::new(results.clone(), sig.results.clone());
        self.expr
            .enter(FrameKind::Block, label, exit.clone(), exit, params);

        tasks.push(Task::Close {
            leave: true,
            braces: 1,
            results,
            types: sig.results.clone(),
        });
        tasks.push(Task::Seq(body.iter()));
        Ok(())
    }

    pub(super) fn open_loop<'i>(
        &mut self,
        ty: BlockType,
        body: &'i [Instr],
        tasks: &mut Vec<Task<'i>>,
    ) -> Result<()> {
        self.check_nesting()?;
        let sig = self.module.block_signature(ty)?;
        self.expr.materialize_locals();
        let incoming = self.pop_params(&sig.params)?;
        let results = self.declare_vars(&sig.results);

        // Parameters live in variables so that `continue` can rebind them.
        let mut param_vars = Vec::with_capacity(incoming.len());
        let mut params = Vec::with_capacity(incoming.len());
        for operand in incoming {
            let name = self.expr.fresh_var();
            self.expr.out.line(format!(
                "let mut {name}: {} = {};",
                operand.ty.rust_type(),
                operand.render()
            ));
            params.push(Operand {
                value: StackValue::Var(name.clone()),
                ty: operand.ty,
            });
            param_vars.push(name);
        }

        let label = self.expr.fresh_label();
        self.expr.out.open(format!("{label}: loop {{"));
        self.expr.enter(
            FrameKind::Loop,
            label,
            Label::new(param_vars, sig.params.clone()),
            Label::new(results.clone(), sig.results.clone()),
            params,
        );

        tasks.push(Task::Close {
            leave: true,
            braces: 1,
            results,
            types: sig.results.clone(),
        });
        tasks.push(Task::Seq(body.iter()));
        Ok(())
    }

    pub(super) fn open_if<'i>(
        &mut self,
        ty: BlockType,
        then_body: &'i [Instr],
        else_body: &'i [Instr],
        tasks: &mut Vec<Task<'i>>,
    ) -> Result<()> {
        self.check_nesting()?;
        let sig = self.module.block_signature(ty)?;
        if else_body.is_empty() && sig.params != sig.results {
            return Err(Error::mismatch(
                type_list(&sig.results),
                format!("{} from an `if` without `else`", type_list(&sig.params)),
            ));
        }
        // The condition is evaluated before either arm runs.
        let cond = self.expr.pop_one(ValType::I32)?;
        self.expr.materialize_locals();
        let params = self.pop_params(&sig.params)?;
        let results = self.declare_vars(&sig.results);
        let exit = Label::new(results.clone(), sig.results.clone());

        let label = self.expr.fresh_label();
        self.expr.out.open(format!("{label}: {{"));
        self.expr.out.open(format!("if {cond} != 0 {{"));

        // An empty else still has to forward parameters to results.
        let has_else = !else_body.is_empty() || !sig.results.is_empty();
        let else_arm = has_else.then(|| ElseArm {
            label: label.clone(),
            exit: exit.clone(),
            params: params.clone(),
            body: else_body,
        });
        self.expr
            .enter(FrameKind::If, label, exit.clone(), exit, params);

        tasks.push(Task::Close {
            leave: has_else,
            braces: 2,
            results,
            types: sig.results.clone(),
        });
        tasks.push(Task::Else(else_arm));
        tasks.push(Task::Seq(then_body.iter()));
        Ok(())
    }

    pub(super) fn close_then<'i>(
        &mut self,
        else_arm: Option<ElseArm<'i>>,
        tasks: &mut Vec<Task<'i>>,
    ) -> Result<()> {
        self.fall_through()?;
        self.expr.leave();
        if let Some(arm) = else_arm {
            self.expr.out.reopen("} else {");
            self.expr
                .enter(FrameKind::If, arm.label, arm.exit.clone(), arm.exit, arm.params);
            tasks.push(Task::Seq(arm.body.iter()));
        }
        Ok(())
    }

    pub(super) fn close_construct(
        &mut self,
        leave: bool,
        braces: usize,
        results: Vec<String>,
        types: &[ValType],
    ) -> Result<()> {
        if leave {
            self.fall_through()?;
            self.expr.leave();
        }
        for _ in 0..braces {
            self.expr.out.close("}");
        }
        self.push_vars(results, types);
        Ok(())
    }

    pub(super) fn compile_br(&mut self, depth: u32) -> Result<()> {
        let types = self.expr.return_vars(depth)?.types.clone();
        let values = self.expr.pop_typed(&types)?;
        self.expr.exit(depth, &values)?;
        self.expr.set_unreachable();
        Ok(())
    }

    pub(super) fn compile_br_if(&mut self, depth: u32) -> Result<()> {
        let cond = self.expr.pop_one(ValType::I32)?;
        let types = self.expr.return_vars(depth)?.types.clone();
        // The values stay on the stack for the fall-through path.
        let values = self.peek_typed(&types)?;
        self.expr.out.open(format!("if {cond} != 0 {{"));
        self.expr.exit(depth, &values)?;
        self.expr.out.close("}");
        Ok(())
    }

    pub(super) fn compile_br_table(&mut self, targets: &[u32], default: u32) -> Result<()> {
        let selector = self.expr.pop_one(ValType::I32)?;
        let types = self.expr.return_vars(default)?.types.clone();
        for &target in targets {
            let found = &self.expr.return_vars(target)?.types;
            if *found != types {
                return Err(Error::mismatch(
                    format!("br_table targets of type {}", type_list(&types)),
                    type_list(found),
                ));
            }
        }
        let values = self.expr.pop_typed(&types)?;

        // One arm per distinct depth, in order of first appearance.
        let mut arms: Vec<(u32, Vec<String>)> = Vec::new();
        for (i, &target) in targets.iter().enumerate() {
            if target == default {
                continue;
            }
            match arms.iter_mut().find(|(depth, _)| *depth == target) {
                Some((_, cases)) => cases.push(i.to_string()),
                None => arms.push((target, vec![i.to_string()])),
            }
        }

        self.expr.out.open(format!("match {selector} as u32 {{"));
        for (depth, cases) in arms {
            self.expr.out.open(format!("{} => {{", cases.join(" | ")));
            self.expr.exit(depth, &values)?;
            self.expr.out.close("}");
        }
        self.expr.out.open("_ => {");
        self.expr.exit(default, &values)?;
        self.expr.out.close("}");
        self.expr.out.close("}");
        self.expr.set_unreachable();
        Ok(())
    }

    pub(super) fn compile_return(&mut self) -> Result<()> {
        let depth = self.expr.depth() as u32;
        self.compile_br(depth)
    }

    pub(super) fn compile_unreachable(&mut self) -> Result<()> {
        self.expr.out.line("return Err(WasmTrap::Unreachable);");
        self.expr.set_unreachable();
        Ok(())
    }

    /// Falling off the end of the current frame: move its values into the
    /// result variables. Loops need an explicit `break`.
    pub(super) fn fall_through(&mut self) -> Result<()> {
        if self.expr.is_unreachable() {
            return Ok(());
        }
        let results = self.expr.results().clone();
        let values = self.frame_values(&results.types)?;
        self.expr.assign(&results.vars, &values);
        if self.expr.kind() == FrameKind::Loop {
            let label = self.expr.label().to_string();
            self.expr.out.line(format!("break {label};"));
        }
        Ok(())
    }

    /// Pop exactly the values pushed in the current frame, which must match
    /// `types`.
    pub(super) fn frame_values(&mut self, types: &[ValType]) -> Result<Vec<String>> {
        let height = self.expr.frame_height();
        if height != types.len() {
            let found = self.expr.types(height)?;
            return Err(Error::mismatch(type_list(types), type_list(&found)));
        }
        self.expr.pop_typed(types)
    }

    fn pop_params(&mut self, types: &[ValType]) -> Result<Vec<Operand>> {
        let found = self.expr.types(types.len())?;
        if found != types {
            return Err(Error::mismatch(type_list(types), type_list(&found)));
        }
        self.expr.pop(types.len())
    }

    fn peek_typed(&self, types: &[ValType]) -> Result<Vec<String>> {
        let operands = self.expr.peek(types.len())?;
        let found: Vec<ValType> = operands.iter().map(|op| op.ty).collect();
        if found != types {
            return Err(Error::mismatch(type_list(types), type_list(&found)));
        }
        Ok(operands.iter().map(Operand::render).collect())
    }

    /// `let mut vN: T = <default>;` for each type.
    fn declare_vars(&mut self, types: &[ValType]) -> Vec<String> {
        types
            .iter()
            .map(|ty| {
                let name = self.expr.fresh_var();
                self.expr.out.line(format!(
                    "let mut {name}: {} = {};",
                    ty.rust_type(),
                    ty.default_literal()
                ));
                name
            })
            .collect()
    }

    fn push_vars(&mut self, names: Vec<String>, types: &[ValType]) {
        for (name, &ty) in names.into_iter().zip(types) {
            self.expr.push_var(name, ty);
        }
    }
}
