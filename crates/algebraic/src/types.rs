//! Value types, type constraints and literal values.

use std::fmt;
use std::str::FromStr;

/// The element class of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeClass {
    /// IEEE floating point.
    Float,
    /// Two's complement integer.
    Int,
    /// Boolean.
    Bool,
}

impl TypeClass {
    /// The name of this class as written in type annotations.
    pub fn name(self) -> &'static str {
        match self {
            TypeClass::Float => "float",
            TypeClass::Int => "int",
            TypeClass::Bool => "bool",
        }
    }

    /// The bit widths values of this class may have.
    pub fn widths(self) -> &'static [u8] {
        match self {
            TypeClass::Float => &[32, 64],
            TypeClass::Int => &[8, 16, 32, 64],
            TypeClass::Bool => &[1],
        }
    }

    /// The width picked for this class when nothing narrows it.
    pub fn default_width(self) -> u8 {
        match self {
            TypeClass::Float | TypeClass::Int => 32,
            TypeClass::Bool => 1,
        }
    }

    fn bit(self) -> u8 {
        match self {
            TypeClass::Float => 1,
            TypeClass::Int => 2,
            TypeClass::Bool => 4,
        }
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`TypeClass`]es.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassSet(u8);

impl ClassSet {
    /// No class at all.
    pub const EMPTY: ClassSet = ClassSet(0);
    /// Floats only.
    pub const FLOAT: ClassSet = ClassSet(1);
    /// Integers only.
    pub const INT: ClassSet = ClassSet(2);
    /// Booleans only.
    pub const BOOL: ClassSet = ClassSet(4);
    /// Integers or booleans: the operands of bitwise operations.
    pub const INT_OR_BOOL: ClassSet = ClassSet(2 | 4);
    /// Any class.
    pub const ANY: ClassSet = ClassSet(1 | 2 | 4);

    /// The set holding just `class`.
    pub fn of(class: TypeClass) -> ClassSet {
        ClassSet(class.bit())
    }

    /// Does this set contain `class`?
    pub fn contains(self, class: TypeClass) -> bool {
        self.0 & class.bit() != 0
    }

    /// Set intersection.
    pub fn intersect(self, other: ClassSet) -> ClassSet {
        ClassSet(self.0 & other.0)
    }

    /// Set union.
    pub fn union(self, other: ClassSet) -> ClassSet {
        ClassSet(self.0 | other.0)
    }

    /// Is every class of `self` also in `other`?
    pub fn is_subset(self, other: ClassSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Is this set empty?
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The classes in this set, in declaration order.
    pub fn iter(self) -> impl Iterator<Item = TypeClass> {
        [TypeClass::Float, TypeClass::Int, TypeClass::Bool]
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    /// The only class in this set, if there is exactly one.
    pub fn single(self) -> Option<TypeClass> {
        let mut iter = self.iter();
        match (iter.next(), iter.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for ClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ClassSet::ANY {
            return f.write_str("any");
        }
        if self.is_empty() {
            return f.write_str("nothing");
        }
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(c.name())?;
        }
        Ok(())
    }
}

/// A concrete IR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type {
    /// The element class.
    pub class: TypeClass,
    /// The bit width.
    pub bits: u8,
}

impl Type {
    /// `f32`
    pub const F32: Type = Type::new_unchecked(TypeClass::Float, 32);
    /// `f64`
    pub const F64: Type = Type::new_unchecked(TypeClass::Float, 64);
    /// `i8`
    pub const I8: Type = Type::new_unchecked(TypeClass::Int, 8);
    /// `i16`
    pub const I16: Type = Type::new_unchecked(TypeClass::Int, 16);
    /// `i32`
    pub const I32: Type = Type::new_unchecked(TypeClass::Int, 32);
    /// `i64`
    pub const I64: Type = Type::new_unchecked(TypeClass::Int, 64);
    /// `b1`
    pub const B1: Type = Type::new_unchecked(TypeClass::Bool, 1);

    const fn new_unchecked(class: TypeClass, bits: u8) -> Type {
        Type { class, bits }
    }

    /// Create a type, if `bits` is a valid width for `class`.
    pub fn new(class: TypeClass, bits: u8) -> Option<Type> {
        class
            .widths()
            .contains(&bits)
            .then_some(Type { class, bits })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.class {
            TypeClass::Float => "f",
            TypeClass::Int => "i",
            TypeClass::Bool => "b",
        };
        write!(f, "{prefix}{}", self.bits)
    }
}

impl FromStr for Type {
    type Err = String;

    fn from_str(s: &str) -> Result<Type, String> {
        let class = match s.as_bytes().first() {
            Some(b'f') => TypeClass::Float,
            Some(b'i') => TypeClass::Int,
            Some(b'b') => TypeClass::Bool,
            _ => return Err(format!("unknown type `{s}`")),
        };
        s[1..]
            .parse::<u8>()
            .ok()
            .and_then(|bits| Type::new(class, bits))
            .ok_or_else(|| format!("unknown type `{s}`"))
    }
}

/// What is known about the type of a node: a set of possible classes and,
/// optionally, a fixed bit width.
///
/// Constraints are kept normalized: a width rules out every class that cannot
/// have it, and a lone `bool` class fixes the width to 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// The possible classes.
    pub classes: ClassSet,
    /// The bit width, if known.
    pub bits: Option<u8>,
}

impl Constraint {
    /// No constraint at all.
    pub const ANY: Constraint = Constraint {
        classes: ClassSet::ANY,
        bits: None,
    };

    /// Create a normalized constraint.
    pub fn new(classes: ClassSet, bits: Option<u8>) -> Constraint {
        let mut classes = classes;
        if let Some(bits) = bits {
            for class in classes.iter() {
                if !class.widths().contains(&bits) {
                    classes = ClassSet(classes.0 & !class.bit());
                }
            }
        }
        let bits = match (bits, classes.single()) {
            (None, Some(TypeClass::Bool)) => Some(1),
            (bits, _) => bits,
        };
        Constraint { classes, bits }
    }

    /// The constraint that admits only `classes`.
    pub fn of_classes(classes: ClassSet) -> Constraint {
        Constraint::new(classes, None)
    }

    /// The constraint that admits exactly `ty`.
    pub fn of_type(ty: Type) -> Constraint {
        Constraint::new(ClassSet::of(ty.class), Some(ty.bits))
    }

    /// The constraint satisfied by both `self` and `other`, or `None` if no
    /// type satisfies both.
    pub fn intersect(self, other: Constraint) -> Option<Constraint> {
        let bits = match (self.bits, other.bits) {
            (Some(a), Some(b)) if a != b => return None,
            (a, b) => a.or(b),
        };
        let c = Constraint::new(self.classes.intersect(other.classes), bits);
        (!c.classes.is_empty()).then_some(c)
    }

    /// Does `ty` satisfy this constraint?
    pub fn accepts(self, ty: Type) -> bool {
        self.classes.contains(ty.class) && self.bits.is_none_or(|b| b == ty.bits)
    }

    /// The single type satisfying this constraint, if there is one.
    pub fn concrete(self) -> Option<Type> {
        Type::new(self.classes.single()?, self.bits?)
    }

    /// Does every type satisfying `self` also satisfy `other`?
    pub fn implies(self, other: Constraint) -> bool {
        self.classes.is_subset(other.classes)
            && match (self.bits, other.bits) {
                (_, None) => true,
                (Some(a), Some(b)) => a == b,
                (None, Some(b)) => self.classes.iter().all(|c| c.widths() == [b]),
            }
    }

    /// The type used for this constraint when a concrete one must be picked:
    /// the first admitted class at the constraint's width, or at
    /// `default_bits` when the width is open.
    pub fn pick(self, default_bits: u8) -> Option<Type> {
        let class = self.classes.iter().next()?;
        let bits = self.bits.unwrap_or(if class.widths().contains(&default_bits) {
            default_bits
        } else {
            class.default_width()
        });
        Type::new(class, bits)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ty) = self.concrete() {
            return write!(f, "{ty}");
        }
        write!(f, "{}", self.classes)?;
        if let Some(bits) = self.bits {
            write!(f, "@{bits}")?;
        }
        Ok(())
    }
}

/// A constant value.
///
/// Integers are stored sign-extended from their type's width, so that a
/// literal compares equal to the same value at any width that can hold it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    /// A float constant. Never NaN once normalized.
    Float(f64),
    /// An integer constant.
    Int(i64),
    /// A boolean constant.
    Bool(bool),
}

impl Literal {
    /// The class of this literal.
    pub fn class(self) -> TypeClass {
        match self {
            Literal::Float(_) => TypeClass::Float,
            Literal::Int(_) => TypeClass::Int,
            Literal::Bool(_) => TypeClass::Bool,
        }
    }

    /// Convert this literal to its representation in `ty`: wrap integers to
    /// the width, round floats through `f32` for 32-bit types.
    ///
    /// Returns `None` if the literal's class does not match or the value is
    /// NaN.
    pub fn normalize(self, ty: Type) -> Option<Literal> {
        match (self, ty.class) {
            (Literal::Float(f), TypeClass::Float) => {
                let f = if ty.bits == 32 { f as f32 as f64 } else { f };
                (!f.is_nan()).then_some(Literal::Float(f))
            }
            (Literal::Int(i), TypeClass::Int) => Some(Literal::Int(sign_extend(i, ty.bits))),
            (Literal::Bool(b), TypeClass::Bool) => Some(Literal::Bool(b)),
            _ => None,
        }
    }

    /// Convert a literal written in a rule to `ty`, refusing values `ty`
    /// cannot hold instead of wrapping them.
    ///
    /// An integer must fit the width as a signed or an unsigned number, and
    /// a finite float must stay finite after rounding.
    pub fn fit(self, ty: Type) -> Option<Literal> {
        match self {
            Literal::Int(i) if ty.class == TypeClass::Int && ty.bits < 64 => {
                let min = -(1i64 << (ty.bits - 1));
                let max = (1i64 << ty.bits) - 1;
                if i < min || i > max {
                    return None;
                }
                self.normalize(ty)
            }
            Literal::Float(f) if f.is_finite() => match self.normalize(ty)? {
                Literal::Float(g) if g.is_finite() => Some(Literal::Float(g)),
                _ => None,
            },
            _ => self.normalize(ty),
        }
    }

    /// Numeric equality: `0.0` equals `-0.0`.
    pub fn matches(self, other: Literal) -> bool {
        self == other
    }

    /// Bit-for-bit equality: `0.0` differs from `-0.0`.
    pub fn same_bits(self, other: Literal) -> bool {
        self.bits() == other.bits()
    }

    /// A key that identifies this literal bit for bit.
    pub fn bits(self) -> (TypeClass, u64) {
        match self {
            Literal::Float(f) => (TypeClass::Float, f.to_bits()),
            Literal::Int(i) => (TypeClass::Int, i as u64),
            Literal::Bool(b) => (TypeClass::Bool, u64::from(b)),
        }
    }

    /// Is this literal nonzero, or `true`?
    pub fn is_truthy(self) -> bool {
        match self {
            Literal::Float(f) => f != 0.0,
            Literal::Int(i) => i != 0,
            Literal::Bool(b) => b,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Literal::Float(v) if v.is_nan() => f.write_str("nan"),
            Literal::Float(v) if v == f64::INFINITY => f.write_str("inf"),
            Literal::Float(v) if v == f64::NEG_INFINITY => f.write_str("-inf"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Sign-extend the low `bits` bits of `value`.
pub fn sign_extend(value: i64, bits: u8) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - u32::from(bits);
        (value << shift) >> shift
    }
}

/// The low `bits` bits of `value`, zero-extended.
pub fn zero_extend(value: i64, bits: u8) -> u64 {
    if bits >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << bits) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print_types() {
        for ty in [
            Type::F32,
            Type::F64,
            Type::I8,
            Type::I16,
            Type::I32,
            Type::I64,
            Type::B1,
        ] {
            assert_eq!(ty.to_string().parse::<Type>().unwrap(), ty);
        }
        assert!("f16".parse::<Type>().is_err());
        assert!("i7".parse::<Type>().is_err());
        assert!("x32".parse::<Type>().is_err());
    }

    #[test]
    fn constraint_normalization() {
        let c = Constraint::new(ClassSet::ANY, Some(1));
        assert_eq!(c.concrete(), Some(Type::B1));

        let c = Constraint::new(ClassSet::ANY, Some(8));
        assert_eq!(c.concrete(), Some(Type::I8));

        let c = Constraint::of_classes(ClassSet::BOOL);
        assert_eq!(c.bits, Some(1));

        let c = Constraint::new(ClassSet::ANY, Some(32));
        assert_eq!(c.classes, ClassSet::FLOAT.union(ClassSet::INT));
    }

    #[test]
    fn constraint_intersection() {
        let float = Constraint::of_classes(ClassSet::FLOAT);
        let int = Constraint::of_classes(ClassSet::INT);
        assert!(float.intersect(int).is_none());

        let w32 = Constraint::new(ClassSet::ANY, Some(32));
        assert_eq!(float.intersect(w32).unwrap().concrete(), Some(Type::F32));

        let w64 = Constraint::new(ClassSet::ANY, Some(64));
        assert!(w32.intersect(w64).is_none());

        let bits = Constraint::of_classes(ClassSet::INT_OR_BOOL);
        assert_eq!(bits.intersect(float), None);
        assert_eq!(
            bits.intersect(Constraint::new(ClassSet::ANY, Some(1)))
                .unwrap()
                .concrete(),
            Some(Type::B1)
        );
    }

    #[test]
    fn constraint_implication() {
        let f32c = Constraint::of_type(Type::F32);
        let float = Constraint::of_classes(ClassSet::FLOAT);
        assert!(f32c.implies(float));
        assert!(!float.implies(f32c));
        assert!(Constraint::of_classes(ClassSet::BOOL).implies(Constraint::of_type(Type::B1)));
        assert!(float.implies(Constraint::ANY));
        assert!(f32c.accepts(Type::F32));
        assert!(!f32c.accepts(Type::F64));
    }

    #[test]
    fn pick_concrete_types() {
        assert_eq!(Constraint::ANY.pick(32), Some(Type::F32));
        assert_eq!(
            Constraint::of_classes(ClassSet::INT_OR_BOOL).pick(64),
            Some(Type::I64)
        );
        assert_eq!(Constraint::of_classes(ClassSet::FLOAT).pick(8), Some(Type::F32));
        assert_eq!(Constraint::of_classes(ClassSet::BOOL).pick(32), Some(Type::B1));
    }

    #[test]
    fn normalize_literals() {
        assert_eq!(Literal::Int(255).normalize(Type::I8), Some(Literal::Int(-1)));
        assert_eq!(Literal::Int(-1).normalize(Type::I64), Some(Literal::Int(-1)));
        assert_eq!(
            Literal::Float(0.1).normalize(Type::F32),
            Some(Literal::Float(f64::from(0.1f32)))
        );
        assert_eq!(Literal::Float(f64::NAN).normalize(Type::F64), None);
        assert_eq!(Literal::Int(1).normalize(Type::F32), None);
        assert_eq!(Literal::Bool(true).normalize(Type::B1), Some(Literal::Bool(true)));
    }

    #[test]
    fn fit_rule_literals() {
        // Signed or unsigned range, never wrapped.
        assert_eq!(Literal::Int(255).fit(Type::I8), Some(Literal::Int(-1)));
        assert_eq!(Literal::Int(-128).fit(Type::I8), Some(Literal::Int(-128)));
        assert_eq!(Literal::Int(256).fit(Type::I8), None);
        assert_eq!(Literal::Int(300).fit(Type::I8), None);
        assert_eq!(Literal::Int(-129).fit(Type::I8), None);
        assert_eq!(Literal::Int(256).fit(Type::I16), Some(Literal::Int(256)));
        assert_eq!(Literal::Int(i64::MIN).fit(Type::I64), Some(Literal::Int(i64::MIN)));

        assert_eq!(Literal::Float(1e300).fit(Type::F32), None);
        assert_eq!(Literal::Float(1e300).fit(Type::F64), Some(Literal::Float(1e300)));
        assert_eq!(
            Literal::Float(f64::INFINITY).fit(Type::F32),
            Some(Literal::Float(f64::INFINITY))
        );
        assert_eq!(Literal::Int(1).fit(Type::F32), None);
    }

    #[test]
    fn literal_equality() {
        assert!(Literal::Float(0.0).matches(Literal::Float(-0.0)));
        assert!(!Literal::Float(0.0).same_bits(Literal::Float(-0.0)));
        assert!(!Literal::Int(0).matches(Literal::Bool(false)));
        assert_eq!(zero_extend(-1, 8), 255);
        assert_eq!(sign_extend(0x80, 8), -128);
    }

    #[test]
    fn literal_display() {
        assert_eq!(Literal::Float(1.0).to_string(), "1.0");
        assert_eq!(Literal::Float(-0.5).to_string(), "-0.5");
        assert_eq!(Literal::Float(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Literal::Int(-3).to_string(), "-3");
        assert_eq!(Literal::Bool(true).to_string(), "true");
    }
}
