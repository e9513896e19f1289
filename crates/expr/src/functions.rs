//! The fixed numeric function set.

/// Built-in function callable from an expression.
///
/// Names follow the NumPy spelling used in existing lookup tables
/// (`arctan2`, `log10`, `hypot`, ...), with a few common aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Square,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Arctan2,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Ceil,
    Round,
    Sign,
    Hypot,
    Power,
    Deg2Rad,
    Rad2Deg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let f = match name {
            "abs" | "absolute" | "fabs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "square" => Self::Square,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "log10" => Self::Log10,
            "log2" => Self::Log2,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "arcsin" | "asin" => Self::Arcsin,
            "arccos" | "acos" => Self::Arccos,
            "arctan" | "atan" => Self::Arctan,
            "arctan2" | "atan2" => Self::Arctan2,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" | "rint" => Self::Round,
            "sign" => Self::Sign,
            "hypot" => Self::Hypot,
            "power" | "pow" => Self::Power,
            "deg2rad" | "radians" => Self::Deg2Rad,
            "rad2deg" | "degrees" => Self::Rad2Deg,
            "min" | "minimum" | "fmin" => Self::Min,
            "max" | "maximum" | "fmax" => Self::Max,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Square => "square",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Log2 => "log2",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Arcsin => "arcsin",
            Self::Arccos => "arccos",
            Self::Arctan => "arctan",
            Self::Arctan2 => "arctan2",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Sign => "sign",
            Self::Hypot => "hypot",
            Self::Power => "power",
            Self::Deg2Rad => "deg2rad",
            Self::Rad2Deg => "rad2deg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    pub(crate) fn arity(self) -> Arity {
        match self {
            Self::Arctan2 | Self::Hypot | Self::Power => Arity::Exact(2),
            Self::Min | Self::Max => Arity::AtLeast(1),
            _ => Arity::Exact(1),
        }
    }

    pub(crate) fn accepts(self, n: usize) -> bool {
        match self.arity() {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }

    pub(crate) fn arity_label(self) -> &'static str {
        match self.arity() {
            Arity::Exact(1) => "1",
            Arity::Exact(2) => "2",
            Arity::Exact(_) => "a fixed number of",
            Arity::AtLeast(_) => "at least 1",
        }
    }

    /// Apply to already-evaluated arguments. Arity was checked at parse time.
    pub(crate) fn apply(self, args: &[f64]) -> f64 {
        let a = args.first().copied().unwrap_or(f64::NAN);
        let b = args.get(1).copied().unwrap_or(f64::NAN);
        match self {
            Self::Abs => a.abs(),
            Self::Sqrt => a.sqrt(),
            Self::Square => a * a,
            Self::Exp => a.exp(),
            Self::Log => a.ln(),
            Self::Log10 => a.log10(),
            Self::Log2 => a.log2(),
            Self::Sin => a.sin(),
            Self::Cos => a.cos(),
            Self::Tan => a.tan(),
            Self::Arcsin => a.asin(),
            Self::Arccos => a.acos(),
            Self::Arctan => a.atan(),
            Self::Arctan2 => a.atan2(b),
            Self::Sinh => a.sinh(),
            Self::Cosh => a.cosh(),
            Self::Tanh => a.tanh(),
            Self::Floor => a.floor(),
            Self::Ceil => a.ceil(),
            Self::Round => a.round_ties_even(),
            Self::Sign => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    a
                }
            }
            Self::Hypot => a.hypot(b),
            Self::Power => a.powf(b),
            Self::Deg2Rad => a.to_radians(),
            Self::Rad2Deg => a.to_degrees(),
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Named constants, consulted only when the context has no variable of that name.
pub(crate) fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}
