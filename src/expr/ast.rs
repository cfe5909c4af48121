//! Expression tree produced by the parser.

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    In,
    NotIn,
}

/// Allow-listed `math.*` helpers. Nothing else is callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Floor,
    Ceil,
    Sqrt,
    Exp,
    Log,
    Log10,
    Fabs,
    Pow,
    IsNan,
    IsInf,
    IsFinite,
}

impl MathFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "floor" => MathFn::Floor,
            "ceil" => MathFn::Ceil,
            "sqrt" => MathFn::Sqrt,
            "exp" => MathFn::Exp,
            "log" => MathFn::Log,
            "log10" => MathFn::Log10,
            "fabs" => MathFn::Fabs,
            "pow" => MathFn::Pow,
            "isnan" => MathFn::IsNan,
            "isinf" => MathFn::IsInf,
            "isfinite" => MathFn::IsFinite,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            MathFn::Log => (1, 2),
            MathFn::Pow => (2, 2),
            _ => (1, 1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Sqrt => "sqrt",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Log10 => "log10",
            MathFn::Fabs => "fabs",
            MathFn::Pow => "pow",
            MathFn::IsNan => "isnan",
            MathFn::IsInf => "isinf",
            MathFn::IsFinite => "isfinite",
        }
    }
}

pub fn math_constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "inf" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field(String),
    Threshold(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `a < b <= c` keeps Python's chained meaning: `a < b and b <= c`.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    Call {
        func: MathFn,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Visit every node, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Field(_) | Expr::Threshold(_) => {}
            Expr::List(items) | Expr::Call { args: items, .. } => {
                for it in items {
                    it.walk(f);
                }
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Arith { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Compare { first, rest } => {
                first.walk(f);
                for (_, e) in rest {
                    e.walk(f);
                }
            }
        }
    }

    /// Rewrite every field name in place; stops at the first `Err`.
    pub fn rename_fields<E>(
        &mut self,
        rename: &mut impl FnMut(&str) -> Result<String, E>,
    ) -> Result<(), E> {
        match self {
            Expr::Field(name) => {
                let renamed = rename(name.as_str())?;
                *name = renamed;
            }
            Expr::Literal(_) | Expr::Threshold(_) => {}
            Expr::List(items) | Expr::Call { args: items, .. } => {
                for it in items {
                    it.rename_fields(rename)?;
                }
            }
            Expr::Unary { operand, .. } => operand.rename_fields(rename)?,
            Expr::Arith { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                lhs.rename_fields(rename)?;
                rhs.rename_fields(rename)?;
            }
            Expr::Compare { first, rest } => {
                first.rename_fields(rename)?;
                for (_, e) in rest {
                    e.rename_fields(rename)?;
                }
            }
        }
        Ok(())
    }

    /// Distinct field names in first-seen order.
    pub fn fields(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Field(name) = e {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    /// Distinct threshold placeholders in first-seen order.
    pub fn thresholds(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Threshold(name) = e {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }
}
