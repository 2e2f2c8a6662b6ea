//! The interface between compiled rules and the IR they rewrite.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use smallvec::SmallVec;

use crate::opcodes::Opcode;
use crate::types::{Literal, Type};

/// A function body the pass can inspect and rewrite.
///
/// Every instruction produces at most one value. Constants are values the IR
/// can report a [`Literal`] for; they may or may not be defined by an
/// instruction of their own. Instructions without a result, such as returns,
/// are kept for their effect; everything else is live only while one of them
/// depends on it.
pub trait Function {
    /// An instruction reference, stable across rewrites.
    type Inst: Copy + Eq + Hash + Debug;
    /// A value reference.
    type Value: Copy + Eq + Hash + Debug;

    /// All instructions, in program order.
    fn insts(&self) -> Vec<Self::Inst>;

    /// The catalog operation `inst` performs, or `None` for instructions the
    /// rules know nothing about (parameters, constants, returns).
    fn inst_opcode(&self, inst: Self::Inst) -> Option<Opcode>;

    /// The operands of `inst`.
    fn inst_args(&self, inst: Self::Inst) -> &[Self::Value];

    /// The value `inst` defines, if any.
    fn inst_result(&self, inst: Self::Inst) -> Option<Self::Value>;

    /// The instruction defining `value`, if any.
    fn value_def(&self, value: Self::Value) -> Option<Self::Inst>;

    /// The type of `value`.
    fn value_type(&self, value: Self::Value) -> Type;

    /// The constant `value` holds, if the IR knows it directly.
    fn value_literal(&self, value: Self::Value) -> Option<Literal>;

    /// The instructions using `value` as an operand, without duplicates.
    fn value_users(&self, value: Self::Value) -> Vec<Self::Inst>;

    /// Does anything use `value`?
    fn value_is_used(&self, value: Self::Value) -> bool {
        !self.value_users(value).is_empty()
    }

    /// Insert a new instruction before `before` and return its result.
    fn insert_inst(
        &mut self,
        before: Self::Inst,
        opcode: Opcode,
        args: &[Self::Value],
        ty: Type,
    ) -> Self::Value;

    /// Materialize a constant before `before`.
    fn insert_literal(&mut self, before: Self::Inst, value: Literal, ty: Type) -> Self::Value;

    /// Make every user of `old` use `new` instead.
    fn replace_uses(&mut self, old: Self::Value, new: Self::Value);
}

/// The constant `value` holds, in its type's representation.
///
/// Values the IR does not report as literals still count when they are
/// computed by a catalog operation whose operands are all constants and whose
/// fold succeeds. `depth` bounds how many instructions deep that search goes.
pub fn constant_value<F: Function + ?Sized>(
    func: &F,
    value: F::Value,
    depth: usize,
) -> Option<Literal> {
    let ty = func.value_type(value);
    if let Some(lit) = func.value_literal(value) {
        return lit.normalize(ty);
    }
    if depth == 0 {
        return None;
    }
    let inst = func.value_def(value)?;
    let opcode = func.inst_opcode(inst)?;
    let args = func.inst_args(inst);
    let first = *args.first()?;
    let lits = args
        .iter()
        .map(|&arg| constant_value(func, arg, depth - 1))
        .collect::<Option<SmallVec<[Literal; 3]>>>()?;
    opcode.fold(&lits, func.value_type(first), ty)
}

/// The instructions an instruction without a result depends on, directly or
/// through other instructions, including those instructions themselves.
pub fn live_insts<F: Function + ?Sized>(func: &F) -> HashSet<F::Inst> {
    let mut stack: Vec<F::Inst> = func
        .insts()
        .into_iter()
        .filter(|&inst| func.inst_result(inst).is_none())
        .collect();
    let mut live: HashSet<F::Inst> = stack.iter().copied().collect();
    while let Some(inst) = stack.pop() {
        for &arg in func.inst_args(inst) {
            if let Some(def) = func.value_def(arg) {
                if live.insert(def) {
                    stack.push(def);
                }
            }
        }
    }
    live
}
