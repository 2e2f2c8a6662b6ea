//! A small SSA IR implementing [`Function`], with a text format.
//!
//! ```text
//! (param v0 f32)
//! (const v1 f32 0.0)
//! (inst v2 f32 (fadd v0 v1))
//! (ret v2)
//! ```
//!
//! Every `param`, `const` and `inst` line defines one value. Values must be
//! defined before they are used.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use cranelift_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::ir::Function;
use crate::lexer::{Lexer, Pos, Token};
use crate::opcodes::Opcode;
use crate::types::{Literal, Type};

/// An instruction reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A value reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// What an instruction does.
#[derive(Clone, Debug, PartialEq)]
pub enum InstData {
    /// A function parameter.
    Param,
    /// A constant.
    Literal(Literal),
    /// A catalog operation.
    Op {
        /// The operation.
        opcode: Opcode,
        /// The operands.
        args: SmallVec<[Value; 3]>,
    },
    /// Return the operands. Keeps them alive.
    Ret {
        /// The returned values.
        args: SmallVec<[Value; 3]>,
    },
}

#[derive(Clone, Debug)]
struct InstNode {
    data: InstData,
    result: Option<Value>,
}

#[derive(Clone, Debug)]
struct ValueData {
    ty: Type,
    def: Inst,
}

/// A function: instructions in a single block.
#[derive(Clone, Debug, Default)]
pub struct SsaFunction {
    insts: PrimaryMap<Inst, InstNode>,
    values: PrimaryMap<Value, ValueData>,
    layout: Vec<Inst>,
    names: HashMap<String, Value>,
}

impl SsaFunction {
    /// Create an empty function.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn param(&mut self, ty: Type) -> Value {
        self.append(InstData::Param, ty)
    }

    /// Append a constant.
    pub fn literal(&mut self, value: Literal, ty: Type) -> Value {
        self.append(InstData::Literal(value), ty)
    }

    /// Append an operation.
    pub fn op(&mut self, opcode: Opcode, args: &[Value], ty: Type) -> Value {
        let data = InstData::Op {
            opcode,
            args: args.iter().copied().collect(),
        };
        self.append(data, ty)
    }

    /// Append a return of `args`.
    pub fn ret(&mut self, args: &[Value]) -> Inst {
        let inst = self.insts.push(InstNode {
            data: InstData::Ret {
                args: args.iter().copied().collect(),
            },
            result: None,
        });
        self.layout.push(inst);
        inst
    }

    /// What `inst` does.
    pub fn inst_data(&self, inst: Inst) -> &InstData {
        &self.insts[inst].data
    }

    /// The value a parsed function called `name`.
    pub fn value_by_name(&self, name: &str) -> Option<Value> {
        self.names.get(name).copied()
    }

    /// Remove operations and constants whose results are unused. Returns how
    /// many instructions were removed.
    pub fn eliminate_dead_code(&mut self) -> usize {
        let mut uses: HashMap<Value, usize> = HashMap::new();
        for &inst in &self.layout {
            for &arg in self.inst_args(inst) {
                *uses.entry(arg).or_default() += 1;
            }
        }

        let mut dead = HashSet::new();
        for &inst in self.layout.iter().rev() {
            let node = &self.insts[inst];
            if !matches!(node.data, InstData::Op { .. } | InstData::Literal(_)) {
                continue;
            }
            let Some(result) = node.result else { continue };
            if uses.get(&result).copied().unwrap_or(0) > 0 {
                continue;
            }
            dead.insert(inst);
            for arg in self.inst_args(inst) {
                if let Some(n) = uses.get_mut(arg) {
                    *n -= 1;
                }
            }
        }

        self.layout.retain(|inst| !dead.contains(inst));
        log::debug!("removed {} dead instructions", dead.len());
        dead.len()
    }

    fn create(&mut self, data: InstData, ty: Type) -> (Inst, Value) {
        let inst = self.insts.next_key();
        let value = self.values.push(ValueData { ty, def: inst });
        self.insts.push(InstNode {
            data,
            result: Some(value),
        });
        (inst, value)
    }

    fn append(&mut self, data: InstData, ty: Type) -> Value {
        let (inst, value) = self.create(data, ty);
        self.layout.push(inst);
        value
    }

    fn insert(&mut self, before: Inst, data: InstData, ty: Type) -> Value {
        let (inst, value) = self.create(data, ty);
        let at = self
            .layout
            .iter()
            .position(|&i| i == before)
            .unwrap_or(self.layout.len());
        self.layout.insert(at, inst);
        log::trace!("inserted {inst} before {before}");
        value
    }

    fn fmt_def(&self, f: &mut fmt::Formatter<'_>, node: &InstNode) -> fmt::Result {
        match node.result {
            Some(v) => write!(f, "{v} {}", self.values[v].ty),
            None => Ok(()),
        }
    }
}

impl Function for SsaFunction {
    type Inst = Inst;
    type Value = Value;

    fn insts(&self) -> Vec<Inst> {
        self.layout.clone()
    }

    fn inst_opcode(&self, inst: Inst) -> Option<Opcode> {
        match self.insts[inst].data {
            InstData::Op { opcode, .. } => Some(opcode),
            _ => None,
        }
    }

    fn inst_args(&self, inst: Inst) -> &[Value] {
        match &self.insts[inst].data {
            InstData::Op { args, .. } | InstData::Ret { args } => args,
            InstData::Param | InstData::Literal(_) => &[],
        }
    }

    fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.insts[inst].result
    }

    fn value_def(&self, value: Value) -> Option<Inst> {
        Some(self.values[value].def)
    }

    fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    fn value_literal(&self, value: Value) -> Option<Literal> {
        match self.insts[self.values[value].def].data {
            InstData::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    fn value_users(&self, value: Value) -> Vec<Inst> {
        self.layout
            .iter()
            .copied()
            .filter(|&inst| self.inst_args(inst).contains(&value))
            .collect()
    }

    fn insert_inst(&mut self, before: Inst, opcode: Opcode, args: &[Value], ty: Type) -> Value {
        let data = InstData::Op {
            opcode,
            args: args.iter().copied().collect(),
        };
        self.insert(before, data, ty)
    }

    fn insert_literal(&mut self, before: Inst, value: Literal, ty: Type) -> Value {
        self.insert(before, InstData::Literal(value), ty)
    }

    fn replace_uses(&mut self, old: Value, new: Value) {
        for &inst in &self.layout {
            if let InstData::Op { args, .. } | InstData::Ret { args } = &mut self.insts[inst].data {
                for arg in args.iter_mut().filter(|a| **a == old) {
                    *arg = new;
                }
            }
        }
    }
}

impl fmt::Display for SsaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &inst in &self.layout {
            let node = &self.insts[inst];
            match &node.data {
                InstData::Param => {
                    write!(f, "(param ")?;
                    self.fmt_def(f, node)?;
                }
                InstData::Literal(lit) => {
                    write!(f, "(const ")?;
                    self.fmt_def(f, node)?;
                    write!(f, " {lit}")?;
                }
                InstData::Op { opcode, args } => {
                    write!(f, "(inst ")?;
                    self.fmt_def(f, node)?;
                    write!(f, " ({opcode}")?;
                    for arg in args {
                        write!(f, " {arg}")?;
                    }
                    write!(f, ")")?;
                }
                InstData::Ret { args } => {
                    write!(f, "(ret")?;
                    for arg in args {
                        write!(f, " {arg}")?;
                    }
                }
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

impl FromStr for SsaFunction {
    type Err = Error;

    fn from_str(src: &str) -> Result<SsaFunction> {
        Reader {
            lexer: Lexer::new(src)?,
            func: SsaFunction::new(),
        }
        .read()
    }
}

struct Reader<'a> {
    lexer: Lexer<'a>,
    func: SsaFunction,
}

impl Reader<'_> {
    fn error(&self, pos: Pos, msg: String) -> Error {
        Error::Parse { msg, pos }
    }

    fn pos(&self) -> Pos {
        self.lexer
            .peek()
            .map_or_else(|| self.lexer.pos(), |(pos, _)| *pos)
    }

    fn take(&mut self) -> Result<(Pos, Token)> {
        match self.lexer.next()? {
            Some(tok) => Ok(tok),
            None => Err(self.error(self.lexer.pos(), "Unexpected EOF".to_string())),
        }
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        let (pos, tok) = self.take()?;
        if tok != want {
            return Err(self.error(pos, format!("Unexpected token {tok:?}")));
        }
        Ok(())
    }

    fn is_rparen(&self) -> bool {
        matches!(self.lexer.peek(), Some((_, Token::RParen)))
    }

    fn symbol(&mut self) -> Result<(Pos, String)> {
        match self.take()? {
            (pos, Token::Symbol(s)) => Ok((pos, s)),
            (pos, tok) => Err(self.error(pos, format!("Expected a symbol, found {tok:?}"))),
        }
    }

    fn read(mut self) -> Result<SsaFunction> {
        while !self.lexer.eof() {
            self.item()?;
        }
        Ok(self.func)
    }

    fn item(&mut self) -> Result<()> {
        self.expect(Token::LParen)?;
        let (pos, keyword) = self.symbol()?;
        match keyword.as_str() {
            "param" => {
                let (name, ty) = self.def()?;
                let v = self.func.param(ty);
                self.bind(name, v)?;
            }
            "const" => {
                let (name, ty) = self.def()?;
                let lit = self.literal(ty)?;
                let v = self.func.literal(lit, ty);
                self.bind(name, v)?;
            }
            "inst" => {
                let (name, ty) = self.def()?;
                self.expect(Token::LParen)?;
                let (op_pos, op) = self.symbol()?;
                let opcode = Opcode::from_name(&op)
                    .ok_or_else(|| self.error(op_pos, format!("Unknown opcode `{op}`")))?;
                let args = self.values()?;
                self.expect(Token::RParen)?;
                let types: Vec<Type> = args.iter().map(|&a| self.func.value_type(a)).collect();
                if !opcode.signature().check(&types, ty) {
                    let types: Vec<String> = types.iter().map(Type::to_string).collect();
                    return Err(self.error(
                        op_pos,
                        format!(
                            "`{opcode}` cannot take ({}) and produce {ty}",
                            types.join(", ")
                        ),
                    ));
                }
                let v = self.func.op(opcode, &args, ty);
                self.bind(name, v)?;
            }
            "ret" => {
                let args = self.values()?;
                self.func.ret(&args);
            }
            _ => return Err(self.error(pos, format!("Unknown item `{keyword}`"))),
        }
        self.expect(Token::RParen)
    }

    /// The name and type of a defined value.
    fn def(&mut self) -> Result<((Pos, String), Type)> {
        let name = self.symbol()?;
        let (pos, ty) = self.symbol()?;
        let ty = ty.parse::<Type>().map_err(|msg| self.error(pos, msg))?;
        Ok((name, ty))
    }

    fn bind(&mut self, (pos, name): (Pos, String), value: Value) -> Result<()> {
        if self.func.names.contains_key(&name) {
            return Err(self.error(pos, format!("`{name}` is defined twice")));
        }
        self.func.names.insert(name, value);
        Ok(())
    }

    fn values(&mut self) -> Result<Vec<Value>> {
        let mut values = vec![];
        while !self.is_rparen() {
            let (pos, name) = self.symbol()?;
            let value = self
                .func
                .value_by_name(&name)
                .ok_or_else(|| self.error(pos, format!("`{name}` is not defined")))?;
            values.push(value);
        }
        Ok(values)
    }

    fn literal(&mut self, ty: Type) -> Result<Literal> {
        let (pos, tok) = self.take()?;
        let lit = match tok {
            Token::Int(i) => i64::try_from(i)
                .or_else(|_| u64::try_from(i).map(|u| u as i64))
                .ok()
                .map(Literal::Int),
            Token::Float(f) => Some(Literal::Float(f)),
            Token::Symbol(s) if s == "true" => Some(Literal::Bool(true)),
            Token::Symbol(s) if s == "false" => Some(Literal::Bool(false)),
            _ => None,
        };
        lit.and_then(|lit| lit.normalize(ty))
            .ok_or_else(|| self.error(pos, format!("Expected a {ty} constant")))
    }
}
