//! The opcode catalog: names, type signatures, commutativity and constant
//! folding for every operation a rule may mention.

use std::fmt;

use crate::types::{sign_extend, zero_extend, ClassSet, Constraint, Literal, Type, TypeClass};

/// One operand or result position of a [`Signature`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// The type bound to the signature's type variable with this index.
    Var(u8),
    /// A fixed type.
    Fixed(Type),
}

/// The type signature of an opcode.
///
/// Type variables tie operand and result types together: `fadd` is
/// `T x T -> T` for a float `T`, while `flt` is `T x T -> b1` and `ishl` is
/// `T x U -> T` for integers `T` and `U`.
#[derive(Debug)]
pub struct Signature {
    /// The class set each type variable ranges over.
    pub vars: &'static [ClassSet],
    /// The type of each operand.
    pub operands: &'static [Operand],
    /// The type of the result.
    pub result: Operand,
}

impl Signature {
    /// The number of operands.
    pub fn arity(&self) -> usize {
        self.operands.len()
    }

    /// The constraint the signature alone places on `operand`.
    pub fn constraint(&self, operand: Operand) -> Constraint {
        match operand {
            Operand::Var(v) => Constraint::of_classes(self.vars[usize::from(v)]),
            Operand::Fixed(ty) => Constraint::of_type(ty),
        }
    }

    /// Check a concrete instantiation of this signature.
    pub fn check(&self, args: &[Type], result: Type) -> bool {
        if args.len() != self.arity() {
            return false;
        }
        let mut bound: [Option<Type>; 2] = [None; 2];
        let positions = self
            .operands
            .iter()
            .zip(args)
            .chain(std::iter::once((&self.result, &result)));
        for (operand, &ty) in positions {
            match *operand {
                Operand::Fixed(fixed) if fixed != ty => return false,
                Operand::Fixed(_) => {}
                Operand::Var(v) => {
                    let v = usize::from(v);
                    if !self.vars[v].contains(ty.class) {
                        return false;
                    }
                    match bound[v] {
                        Some(prev) if prev != ty => return false,
                        _ => bound[v] = Some(ty),
                    }
                }
            }
        }
        true
    }
}

const T: Operand = Operand::Var(0);
const U: Operand = Operand::Var(1);
const BOOL: Operand = Operand::Fixed(Type::B1);

static FLOAT_UNARY: Signature = Signature {
    vars: &[ClassSet::FLOAT],
    operands: &[T],
    result: T,
};
static FLOAT_BINARY: Signature = Signature {
    vars: &[ClassSet::FLOAT],
    operands: &[T, T],
    result: T,
};
static FLOAT_TERNARY: Signature = Signature {
    vars: &[ClassSet::FLOAT],
    operands: &[T, T, T],
    result: T,
};
static FLOAT_COMPARE: Signature = Signature {
    vars: &[ClassSet::FLOAT],
    operands: &[T, T],
    result: BOOL,
};
static INT_UNARY: Signature = Signature {
    vars: &[ClassSet::INT],
    operands: &[T],
    result: T,
};
static INT_BINARY: Signature = Signature {
    vars: &[ClassSet::INT],
    operands: &[T, T],
    result: T,
};
static INT_COMPARE: Signature = Signature {
    vars: &[ClassSet::INT],
    operands: &[T, T],
    result: BOOL,
};
static INT_SHIFT: Signature = Signature {
    vars: &[ClassSet::INT, ClassSet::INT],
    operands: &[T, U],
    result: T,
};
static BITS_UNARY: Signature = Signature {
    vars: &[ClassSet::INT_OR_BOOL],
    operands: &[T],
    result: T,
};
static BITS_BINARY: Signature = Signature {
    vars: &[ClassSet::INT_OR_BOOL],
    operands: &[T, T],
    result: T,
};
static BITS_EQUAL: Signature = Signature {
    vars: &[ClassSet::INT_OR_BOOL],
    operands: &[T, T],
    result: BOOL,
};

macro_rules! define_opcodes {
    (
        $(
            $(#[$attr:meta])*
            $variant:ident = $name:literal, $sig:ident, $commutative:literal;
        )*
    ) => {
        /// An operation of the IR.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Opcode {
            $(
                $(#[$attr])*
                $variant,
            )*
        }

        impl Opcode {
            /// Every opcode, in declaration order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),*];

            /// The opcode's name in rule and IR text.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// The opcode's type signature.
            pub fn signature(self) -> &'static Signature {
                match self {
                    $(Opcode::$variant => &$sig,)*
                }
            }

            /// Are operands 0 and 1 interchangeable?
            pub fn is_commutative(self) -> bool {
                match self {
                    $(Opcode::$variant => $commutative,)*
                }
            }
        }
    };
}

define_opcodes! {
    /// Float negation.
    Fneg = "fneg", FLOAT_UNARY, false;
    /// Integer negation.
    Ineg = "ineg", INT_UNARY, false;
    /// Float absolute value.
    Fabs = "fabs", FLOAT_UNARY, false;
    /// Integer absolute value.
    Iabs = "iabs", INT_UNARY, false;
    /// Float sign: -1.0, 0.0 or 1.0.
    Fsign = "fsign", FLOAT_UNARY, false;
    /// Integer sign: -1, 0 or 1.
    Isign = "isign", INT_UNARY, false;
    /// Clamp to `[0.0, 1.0]`.
    Fsat = "fsat", FLOAT_UNARY, false;
    /// Float addition.
    Fadd = "fadd", FLOAT_BINARY, true;
    /// Integer addition.
    Iadd = "iadd", INT_BINARY, true;
    /// Float subtraction.
    Fsub = "fsub", FLOAT_BINARY, false;
    /// Integer subtraction.
    Isub = "isub", INT_BINARY, false;
    /// Float multiplication.
    Fmul = "fmul", FLOAT_BINARY, true;
    /// Integer multiplication.
    Imul = "imul", INT_BINARY, true;
    /// Float division.
    Fdiv = "fdiv", FLOAT_BINARY, false;
    /// Signed integer division.
    Idiv = "idiv", INT_BINARY, false;
    /// Unsigned integer division.
    Udiv = "udiv", INT_BINARY, false;
    /// Float minimum.
    Fmin = "fmin", FLOAT_BINARY, true;
    /// Float maximum.
    Fmax = "fmax", FLOAT_BINARY, true;
    /// Signed integer minimum.
    Imin = "imin", INT_BINARY, true;
    /// Signed integer maximum.
    Imax = "imax", INT_BINARY, true;
    /// Unsigned integer minimum.
    Umin = "umin", INT_BINARY, true;
    /// Unsigned integer maximum.
    Umax = "umax", INT_BINARY, true;
    /// Fused multiply-add: `a * b + c`.
    Ffma = "ffma", FLOAT_TERNARY, true;
    /// Linear interpolation: `a * (1 - t) + b * t`.
    Flrp = "flrp", FLOAT_TERNARY, false;
    /// Float less-than.
    Flt = "flt", FLOAT_COMPARE, false;
    /// Float greater-or-equal.
    Fge = "fge", FLOAT_COMPARE, false;
    /// Float equality.
    Feq = "feq", FLOAT_COMPARE, true;
    /// Float inequality.
    Fne = "fne", FLOAT_COMPARE, true;
    /// Signed less-than.
    Ilt = "ilt", INT_COMPARE, false;
    /// Signed greater-or-equal.
    Ige = "ige", INT_COMPARE, false;
    /// Integer or boolean equality.
    Ieq = "ieq", BITS_EQUAL, true;
    /// Integer or boolean inequality.
    Ine = "ine", BITS_EQUAL, true;
    /// Unsigned less-than.
    Ult = "ult", INT_COMPARE, false;
    /// Unsigned greater-or-equal.
    Uge = "uge", INT_COMPARE, false;
    /// Bitwise not; logical not on booleans.
    Inot = "inot", BITS_UNARY, false;
    /// Bitwise and.
    Iand = "iand", BITS_BINARY, true;
    /// Bitwise or.
    Ior = "ior", BITS_BINARY, true;
    /// Bitwise exclusive or.
    Ixor = "ixor", BITS_BINARY, true;
    /// Logical and of floats used as booleans: the result is 1.0 or 0.0.
    Fand = "fand", FLOAT_BINARY, true;
    /// Logical or of floats used as booleans.
    For = "for", FLOAT_BINARY, true;
    /// Logical exclusive or of floats used as booleans.
    Fxor = "fxor", FLOAT_BINARY, true;
    /// Logical not of a float used as a boolean.
    Fnot = "fnot", FLOAT_UNARY, false;
    /// Shift left.
    Ishl = "ishl", INT_SHIFT, false;
    /// Arithmetic shift right.
    Ishr = "ishr", INT_SHIFT, false;
    /// Logical shift right.
    Ushr = "ushr", INT_SHIFT, false;
    /// Base-2 exponential.
    Fexp2 = "fexp2", FLOAT_UNARY, false;
    /// Base-2 logarithm.
    Flog2 = "flog2", FLOAT_UNARY, false;
    /// Natural exponential.
    Fexp = "fexp", FLOAT_UNARY, false;
    /// Natural logarithm.
    Flog = "flog", FLOAT_UNARY, false;
    /// Power.
    Fpow = "fpow", FLOAT_BINARY, false;
    /// Reciprocal.
    Frcp = "frcp", FLOAT_UNARY, false;
    /// Square root.
    Fsqrt = "fsqrt", FLOAT_UNARY, false;
    /// Reciprocal square root.
    Frsq = "frsq", FLOAT_UNARY, false;
    /// Sine.
    Fsin = "fsin", FLOAT_UNARY, false;
    /// Cosine.
    Fcos = "fcos", FLOAT_UNARY, false;
    /// Round toward negative infinity.
    Ffloor = "ffloor", FLOAT_UNARY, false;
    /// Round toward positive infinity.
    Fceil = "fceil", FLOAT_UNARY, false;
    /// Round toward zero.
    Ftrunc = "ftrunc", FLOAT_UNARY, false;
}

impl Opcode {
    /// Look an opcode up by name.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// The number of operands.
    pub fn arity(self) -> usize {
        self.signature().arity()
    }

    /// A dense index for this opcode, suitable for per-opcode tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The pair of operands that may be swapped, if any.
    pub fn commutative_operands(self) -> Option<(usize, usize)> {
        self.is_commutative().then_some((0, 1))
    }

    /// Evaluate this opcode on constant operands.
    ///
    /// `arg_ty` is the type of the first operand and `ty` the type of the
    /// result. Returns `None` whenever the result is not a well-defined
    /// constant of type `ty`: division by zero, logarithms or roots outside
    /// their domain, NaN results, and operands of the wrong class.
    pub fn fold(self, args: &[Literal], arg_ty: Type, ty: Type) -> Option<Literal> {
        use Literal::{Bool, Float, Int};

        if args.len() != self.arity() {
            return None;
        }
        let bits = arg_ty.bits;
        let result = match (self, args) {
            (Opcode::Fneg, &[Float(a)]) => Float(-a),
            (Opcode::Fabs, &[Float(a)]) => Float(a.abs()),
            (Opcode::Fsign, &[Float(a)]) => Float(if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                a
            }),
            (Opcode::Fsat, &[Float(a)]) => Float(a.max(0.0).min(1.0)),
            (Opcode::Fadd, &[Float(a), Float(b)]) => Float(a + b),
            (Opcode::Fsub, &[Float(a), Float(b)]) => Float(a - b),
            (Opcode::Fmul, &[Float(a), Float(b)]) => Float(a * b),
            (Opcode::Fdiv, &[Float(_), Float(b)]) if b == 0.0 => return None,
            (Opcode::Fdiv, &[Float(a), Float(b)]) => Float(a / b),
            (Opcode::Fmin, &[Float(a), Float(b)]) => Float(a.min(b)),
            (Opcode::Fmax, &[Float(a), Float(b)]) => Float(a.max(b)),
            (Opcode::Ffma, &[Float(a), Float(b), Float(c)]) => Float(a.mul_add(b, c)),
            (Opcode::Flrp, &[Float(a), Float(b), Float(t)]) => Float(a * (1.0 - t) + b * t),
            (Opcode::Flt, &[Float(a), Float(b)]) => Bool(a < b),
            (Opcode::Fge, &[Float(a), Float(b)]) => Bool(a >= b),
            (Opcode::Feq, &[Float(a), Float(b)]) => Bool(a == b),
            (Opcode::Fne, &[Float(a), Float(b)]) => Bool(a != b),
            (Opcode::Fand, &[a @ Float(_), b @ Float(_)]) => float_bool(a.is_truthy() && b.is_truthy()),
            (Opcode::For, &[a @ Float(_), b @ Float(_)]) => float_bool(a.is_truthy() || b.is_truthy()),
            (Opcode::Fxor, &[a @ Float(_), b @ Float(_)]) => float_bool(a.is_truthy() != b.is_truthy()),
            (Opcode::Fnot, &[a @ Float(_)]) => float_bool(!a.is_truthy()),
            (Opcode::Fexp2, &[Float(a)]) => Float(a.exp2()),
            (Opcode::Flog2, &[Float(a)]) if a > 0.0 => Float(a.log2()),
            (Opcode::Fexp, &[Float(a)]) => Float(a.exp()),
            (Opcode::Flog, &[Float(a)]) if a > 0.0 => Float(a.ln()),
            (Opcode::Fpow, &[Float(a), Float(b)]) => Float(a.powf(b)),
            (Opcode::Frcp, &[Float(a)]) if a != 0.0 => Float(1.0 / a),
            (Opcode::Fsqrt, &[Float(a)]) if a >= 0.0 => Float(a.sqrt()),
            (Opcode::Frsq, &[Float(a)]) if a > 0.0 => Float(1.0 / a.sqrt()),
            (Opcode::Fsin, &[Float(a)]) => Float(a.sin()),
            (Opcode::Fcos, &[Float(a)]) => Float(a.cos()),
            (Opcode::Ffloor, &[Float(a)]) => Float(a.floor()),
            (Opcode::Fceil, &[Float(a)]) => Float(a.ceil()),
            (Opcode::Ftrunc, &[Float(a)]) => Float(a.trunc()),

            (Opcode::Ineg, &[Int(a)]) => Int(a.wrapping_neg()),
            (Opcode::Iabs, &[Int(a)]) => Int(sign_extend(a, bits).wrapping_abs()),
            (Opcode::Isign, &[Int(a)]) => Int(a.signum()),
            (Opcode::Iadd, &[Int(a), Int(b)]) => Int(a.wrapping_add(b)),
            (Opcode::Isub, &[Int(a), Int(b)]) => Int(a.wrapping_sub(b)),
            (Opcode::Imul, &[Int(a), Int(b)]) => Int(a.wrapping_mul(b)),
            (Opcode::Idiv, &[Int(_), Int(0)]) => return None,
            (Opcode::Idiv, &[Int(a), Int(b)]) => Int(a.wrapping_div(b)),
            (Opcode::Udiv, &[Int(a), Int(b)]) => {
                let (a, b) = (zero_extend(a, bits), zero_extend(b, bits));
                if b == 0 {
                    return None;
                }
                Int((a / b) as i64)
            }
            (Opcode::Imin, &[Int(a), Int(b)]) => Int(a.min(b)),
            (Opcode::Imax, &[Int(a), Int(b)]) => Int(a.max(b)),
            (Opcode::Umin, &[Int(a), Int(b)]) => {
                if zero_extend(a, bits) <= zero_extend(b, bits) {
                    Int(a)
                } else {
                    Int(b)
                }
            }
            (Opcode::Umax, &[Int(a), Int(b)]) => {
                if zero_extend(a, bits) >= zero_extend(b, bits) {
                    Int(a)
                } else {
                    Int(b)
                }
            }
            (Opcode::Ilt, &[Int(a), Int(b)]) => Bool(a < b),
            (Opcode::Ige, &[Int(a), Int(b)]) => Bool(a >= b),
            (Opcode::Ult, &[Int(a), Int(b)]) => Bool(zero_extend(a, bits) < zero_extend(b, bits)),
            (Opcode::Uge, &[Int(a), Int(b)]) => Bool(zero_extend(a, bits) >= zero_extend(b, bits)),
            (Opcode::Ishl, &[Int(a), Int(b)]) => Int(a.wrapping_shl(shift_amount(b, bits))),
            (Opcode::Ishr, &[Int(a), Int(b)]) => {
                Int(sign_extend(a, bits) >> shift_amount(b, bits))
            }
            (Opcode::Ushr, &[Int(a), Int(b)]) => {
                Int((zero_extend(a, bits) >> shift_amount(b, bits)) as i64)
            }

            (Opcode::Ieq, &[a, b]) if a.class() == b.class() && a.class() != TypeClass::Float => {
                Bool(a == b)
            }
            (Opcode::Ine, &[a, b]) if a.class() == b.class() && a.class() != TypeClass::Float => {
                Bool(a != b)
            }
            (Opcode::Inot, &[Int(a)]) => Int(!a),
            (Opcode::Inot, &[Bool(a)]) => Bool(!a),
            (Opcode::Iand, &[Int(a), Int(b)]) => Int(a & b),
            (Opcode::Iand, &[Bool(a), Bool(b)]) => Bool(a & b),
            (Opcode::Ior, &[Int(a), Int(b)]) => Int(a | b),
            (Opcode::Ior, &[Bool(a), Bool(b)]) => Bool(a | b),
            (Opcode::Ixor, &[Int(a), Int(b)]) => Int(a ^ b),
            (Opcode::Ixor, &[Bool(a), Bool(b)]) => Bool(a ^ b),

            _ => return None,
        };
        result.normalize(ty)
    }
}

fn float_bool(b: bool) -> Literal {
    Literal::Float(if b { 1.0 } else { 0.0 })
}

/// Shift amounts are taken modulo the width of the shifted operand.
fn shift_amount(amount: i64, bits: u8) -> u32 {
    (zero_extend(amount, 64) as u32) & (u32::from(bits) - 1)
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
