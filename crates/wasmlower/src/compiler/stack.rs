//! Compile-time model of the operand stack.
//!
//! Every Wasm value is either bound to a Rust variable (`v3`) or, for
//! constants and `local.get`, kept as an inline expression that is spliced in
//! at the use site. Nesting levels live in an arena of frames indexed by
//! depth; each frame owns the part of the operand stack pushed inside it and
//! knows which variables a branch to it must assign.

use crate::codegen::source::Source;
use crate::codegen::types::rust_tuple;
use crate::error::{Error, Result};
use crate::ir::{type_list, ValType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    /// Bound to an immutable-after-assignment Rust variable.
    Var(String),
    /// Expression substituted at the use site. `local` records the local it
    /// reads, so a later write to that local can materialize it first.
    Inline { expr: String, local: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub value: StackValue,
    pub ty: ValType,
}

impl Operand {
    /// Rust expression for one use of this value. Reference values are not
    /// `Copy`, so every use of a variable clones it.
    pub fn render(&self) -> String {
        match &self.value {
            StackValue::Var(name) if self.ty.is_ref() => format!("{name}.clone()"),
            StackValue::Var(name) => name.clone(),
            StackValue::Inline { expr, .. } => expr.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Function,
    Block,
    Loop,
    If,
}

/// Variables assigned when control reaches a label, with their types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Label {
    pub vars: Vec<String>,
    pub types: Vec<ValType>,
}

impl Label {
    pub fn new(vars: Vec<String>, types: Vec<ValType>) -> Self {
        Self { vars, types }
    }
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Rust label, `'l3`. Empty for the function body.
    label: String,
    parent: Option<usize>,
    stack: Vec<Operand>,
    /// Destination of a branch to this frame.
    branch: Label,
    /// Destination of falling off the end.
    results: Label,
    unreachable: bool,
}

pub struct ExprCompiler {
    locals: Vec<ValType>,
    frames: Vec<Frame>,
    next_var: usize,
    next_label: usize,
    pub out: Source,
}

impl ExprCompiler {
    /// Start a function body. `locals` covers parameters and declared locals.
    pub fn new(locals: Vec<ValType>, results: Vec<ValType>, out: Source) -> Self {
        let label = Label::new(Vec::new(), results);
        Self {
            locals,
            frames: vec![Frame {
                kind: FrameKind::Function,
                label: String::new(),
                parent: None,
                stack: Vec::new(),
                branch: label.clone(),
                results: label,
                unreachable: false,
            }],
            next_var: 0,
            next_label: 0,
            out,
        }
    }

    pub fn fresh_var(&mut self) -> String {
        let name = format!("v{}", self.next_var);
        self.next_var += 1;
        name
    }

    pub fn fresh_label(&mut self) -> String {
        let name = format!("'l{}", self.next_label);
        self.next_label += 1;
        name
    }

    // ── frames ──────────────────────────────────────────────────────────

    /// Nesting depth of the innermost frame; the function body is 0.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    fn current(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn enter(
        &mut self,
        kind: FrameKind,
        label: String,
        branch: Label,
        results: Label,
        params: Vec<Operand>,
    ) {
        let parent = Some(self.depth());
        self.frames.push(Frame {
            kind,
            label,
            parent,
            stack: params,
            branch,
            results,
            unreachable: false,
        });
    }

    /// Close the innermost frame. The function frame is never removed.
    pub fn leave(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.current().kind
    }

    pub fn label(&self) -> &str {
        &self.current().label
    }

    pub fn results(&self) -> &Label {
        &self.current().results
    }

    pub fn is_unreachable(&self) -> bool {
        self.current().unreachable
    }

    /// The rest of the current sequence can never execute.
    pub fn set_unreachable(&mut self) {
        self.current_mut().unreachable = true;
    }

    /// Values pushed in the current frame that are still on the stack.
    pub fn frame_height(&self) -> usize {
        self.current().stack.len()
    }

    /// Frame index targeted by a branch `levels` out.
    pub fn target(&self, levels: u32) -> Result<usize> {
        self.depth()
            .checked_sub(levels as usize)
            .ok_or_else(|| {
                Error::validation(format!(
                    "branch depth {levels} exceeds nesting depth {}",
                    self.depth()
                ))
            })
    }

    /// Variables and types a branch `levels` out must assign.
    pub fn return_vars(&self, levels: u32) -> Result<&Label> {
        Ok(&self.frames[self.target(levels)?].branch)
    }

    // ── stack ───────────────────────────────────────────────────────────

    /// Total values visible from the current frame.
    fn available(&self) -> usize {
        let mut total = 0;
        let mut index = Some(self.depth());
        while let Some(i) = index {
            total += self.frames[i].stack.len();
            index = self.frames[i].parent;
        }
        total
    }

    fn check_available(&self, needed: usize) -> Result<()> {
        let available = self.available();
        if needed > available {
            return Err(Error::StackUnderflow { needed, available });
        }
        Ok(())
    }

    /// Allocate fresh variables for `types` and push them. The caller emits
    /// the binding.
    pub fn push(&mut self, types: &[ValType]) -> Vec<String> {
        types
            .iter()
            .map(|&ty| {
                let name = self.fresh_var();
                self.push_var(name.clone(), ty);
                name
            })
            .collect()
    }

    pub fn push_var(&mut self, name: String, ty: ValType) {
        self.current_mut().stack.push(Operand {
            value: StackValue::Var(name),
            ty,
        });
    }

    /// Bind `expr` to a fresh variable and push it.
    pub fn push_expr(&mut self, ty: ValType, expr: impl AsRef<str>) -> String {
        let name = self.fresh_var();
        self.out
            .line(format!("let {name}: {} = {};", ty.rust_type(), expr.as_ref()));
        self.push_var(name.clone(), ty);
        name
    }

    /// Push a side-effect-free expression without binding it.
    pub fn constant(&mut self, expr: impl Into<String>, ty: ValType) {
        self.current_mut().stack.push(Operand {
            value: StackValue::Inline {
                expr: expr.into(),
                local: None,
            },
            ty,
        });
    }

    pub fn push_operand(&mut self, operand: Operand) {
        self.current_mut().stack.push(operand);
    }

    /// Remove the top `n` values, bottom-most first. Reaches into enclosing
    /// frames once the current frame's values are exhausted.
    pub fn pop(&mut self, n: usize) -> Result<Vec<Operand>> {
        self.check_available(n)?;
        let mut popped = Vec::with_capacity(n);
        let mut index = self.depth();
        while popped.len() < n {
            match self.frames[index].stack.pop() {
                Some(operand) => popped.push(operand),
                None => match self.frames[index].parent {
                    Some(parent) => index = parent,
                    None => break,
                },
            }
        }
        popped.reverse();
        Ok(popped)
    }

    /// The top `n` values, bottom-most first, left in place.
    pub fn peek(&self, n: usize) -> Result<Vec<Operand>> {
        self.check_available(n)?;
        let mut seen = Vec::with_capacity(n);
        let mut index = Some(self.depth());
        while let Some(i) = index {
            for operand in self.frames[i].stack.iter().rev() {
                if seen.len() == n {
                    break;
                }
                seen.push(operand.clone());
            }
            if seen.len() == n {
                break;
            }
            index = self.frames[i].parent;
        }
        seen.reverse();
        Ok(seen)
    }

    /// Types of the top `n` values, bottom-most first.
    pub fn types(&self, n: usize) -> Result<Vec<ValType>> {
        Ok(self.peek(n)?.into_iter().map(|op| op.ty).collect())
    }

    /// Require the top `n` values to all have type `ty`.
    pub fn typed(&self, ty: ValType, n: usize) -> Result<()> {
        let found = self.types(n)?;
        if found.iter().any(|t| *t != ty) {
            return Err(Error::mismatch(type_list(&vec![ty; n]), type_list(&found)));
        }
        Ok(())
    }

    /// Pop values matching `expected` exactly and render them.
    pub fn pop_typed(&mut self, expected: &[ValType]) -> Result<Vec<String>> {
        let found = self.types(expected.len())?;
        if found != expected {
            return Err(Error::mismatch(type_list(expected), type_list(&found)));
        }
        Ok(self
            .pop(expected.len())?
            .iter()
            .map(Operand::render)
            .collect())
    }

    pub fn pop_one(&mut self, ty: ValType) -> Result<String> {
        let mut values = self.pop_typed(&[ty])?;
        values
            .pop()
            .ok_or(Error::StackUnderflow {
                needed: 1,
                available: 0,
            })
    }

    /// Pop one value of any type.
    pub fn pop_any(&mut self) -> Result<Operand> {
        let mut values = self.pop(1)?;
        values.pop().ok_or(Error::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }

    // ── locals ──────────────────────────────────────────────────────────

    pub fn local_type(&self, index: u32) -> Result<ValType> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or(Error::InvalidLocalIndex(index))
    }

    /// Push a deferred read of local `index`.
    pub fn get(&mut self, index: u32) -> Result<()> {
        let ty = self.local_type(index)?;
        let expr = if ty.is_ref() {
            format!("l{index}.clone()")
        } else {
            format!("l{index}")
        };
        self.push_operand(Operand {
            value: StackValue::Inline {
                expr,
                local: Some(index),
            },
            ty,
        });
        Ok(())
    }

    /// Pop a value into local `index`; returns the local's name.
    pub fn set(&mut self, index: u32) -> Result<String> {
        let ty = self.local_type(index)?;
        let value = self.pop_one(ty)?;
        self.materialize_local(Some(index));
        let name = format!("l{index}");
        self.out.line(format!("{name} = {value};"));
        Ok(name)
    }

    /// Like `set`, but leaves the value on the stack.
    pub fn tee(&mut self, index: u32) -> Result<()> {
        self.set(index)?;
        self.get(index)
    }

    /// Bind every deferred read of `local` (or of any local, for `None`)
    /// anywhere on the stack to a fresh variable.
    fn materialize_local(&mut self, local: Option<u32>) {
        for i in 0..self.frames.len() {
            for j in 0..self.frames[i].stack.len() {
                let operand = &self.frames[i].stack[j];
                let expr = match &operand.value {
                    StackValue::Inline {
                        expr,
                        local: Some(k),
                    } if local.map_or(true, |l| l == *k) => expr.clone(),
                    _ => continue,
                };
                let ty = operand.ty;
                let name = self.fresh_var();
                self.out
                    .line(format!("let {name}: {} = {expr};", ty.rust_type()));
                self.frames[i].stack[j].value = StackValue::Var(name);
            }
        }
    }

    /// Bind all deferred local reads, before entering a nested construct.
    pub fn materialize_locals(&mut self) {
        self.materialize_local(None);
    }

    // ── branches ────────────────────────────────────────────────────────

    /// Emit `vars = values`, as one destructuring assignment when there are
    /// several so that overlapping sources and targets act as a parallel move.
    pub fn assign(&mut self, vars: &[String], values: &[String]) {
        match (vars, values) {
            ([], _) => {}
            ([var], [value]) => self.out.line(format!("{var} = {value};")),
            _ => self
                .out
                .line(format!("({}) = ({});", vars.join(", "), values.join(", "))),
        }
    }

    /// Transfer control `levels` frames out, carrying `values` into the
    /// target's branch variables.
    pub fn exit(&mut self, levels: u32, values: &[String]) -> Result<()> {
        let index = self.target(levels)?;
        let frame = &self.frames[index];
        if values.len() != frame.branch.types.len() {
            return Err(Error::mismatch(
                type_list(&frame.branch.types),
                format!("{} value(s)", values.len()),
            ));
        }
        let kind = frame.kind;
        let label = frame.label.clone();
        let vars = frame.branch.vars.clone();
        match kind {
            FrameKind::Function => {
                self.out.line(format!("return Ok({});", rust_tuple(values)));
            }
            FrameKind::Loop => {
                self.assign(&vars, values);
                self.out.line(format!("continue {label};"));
            }
            FrameKind::Block | FrameKind::If => {
                self.assign(&vars, values);
                self.out.line(format!("break {label};"));
            }
        }
        Ok(())
    }
}
