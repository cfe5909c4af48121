//! Tree-walking interpreter.
//!
//! Python-flavoured semantics: `/` is true division, `//` floors, `%` takes
//! the divisor's sign, comparisons chain, `and`/`or` short-circuit and yield
//! an operand. Integer arithmetic is checked; overflow is an error rather
//! than a silent wrap. Cross-type ordering is an error, cross-type `==` is
//! just `false`.

use super::ast::{ArithOp, CompareOp, Expr, LogicalOp, MathFn, UnaryOp};
use super::EvalError;
use crate::thresholds::ThresholdTable;
use crate::value::{FeatureRow, Value};
use std::cmp::Ordering;

pub fn evaluate(expr: &Expr, row: &FeatureRow, thresholds: &ThresholdTable) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Field(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField(name.clone())),
        Expr::Threshold(name) => Ok(Value::Float(thresholds.resolve(name))),
        Expr::List(items) => items
            .iter()
            .map(|e| evaluate(e, row, thresholds))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Unary { op, operand } => {
            let v = evaluate(operand, row, thresholds)?;
            unary(*op, v)
        }
        Expr::Arith { op, lhs, rhs } => {
            let l = evaluate(lhs, row, thresholds)?;
            let r = evaluate(rhs, row, thresholds)?;
            arith(*op, &l, &r)
        }
        Expr::Logical { op, lhs, rhs } => {
            let l = evaluate(lhs, row, thresholds)?;
            let short = match op {
                LogicalOp::And => !l.is_truthy(),
                LogicalOp::Or => l.is_truthy(),
            };
            if short {
                Ok(l)
            } else {
                evaluate(rhs, row, thresholds)
            }
        }
        Expr::Compare { first, rest } => {
            let mut left = evaluate(first, row, thresholds)?;
            for (op, next) in rest {
                let right = evaluate(next, row, thresholds)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Call { func, args } => {
            let mut nums = Vec::with_capacity(args.len());
            for a in args {
                let v = evaluate(a, row, thresholds)?;
                let n = v.as_f64().ok_or_else(|| EvalError::TypeMismatch {
                    op: func.name(),
                    lhs: v.type_name(),
                    rhs: "-",
                })?;
                nums.push(n);
            }
            call(*func, &nums)
        }
    }
}

fn mismatch(op: &'static str, l: &Value, r: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op,
        lhs: l.type_name(),
        rhs: r.type_name(),
    }
}

/// Integer view: ints and bools only.
fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Neg => match v {
            Value::Float(f) => Ok(Value::Float(-f)),
            ref other => as_int(other)
                .ok_or_else(|| mismatch("-", other, other))?
                .checked_neg()
                .map(Value::Int)
                .ok_or(EvalError::Overflow),
        },
        UnaryOp::Pos => match v {
            Value::Float(f) => Ok(Value::Float(f)),
            ref other => as_int(other)
                .map(Value::Int)
                .ok_or_else(|| mismatch("+", other, other)),
        },
    }
}

fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    // sequence concatenation is the only non-numeric arithmetic
    if op == ArithOp::Add {
        match (l, r) {
            (Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                return Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            _ => {}
        }
    }

    if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
        return int_arith(op, a, b);
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => float_arith(op, a, b),
        _ => Err(mismatch(op_symbol(op), l, r)),
    }
}

fn op_symbol(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "+",
        ArithOp::Sub => "-",
        ArithOp::Mul => "*",
        ArithOp::Div => "/",
        ArithOp::FloorDiv => "//",
        ArithOp::Mod => "%",
        ArithOp::Pow => "**",
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or(EvalError::Overflow);
    match op {
        ArithOp::Add => checked(a.checked_add(b)),
        ArithOp::Sub => checked(a.checked_sub(b)),
        ArithOp::Mul => checked(a.checked_mul(b)),
        ArithOp::Div => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        ArithOp::FloorDiv => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let q = a.checked_div(b).ok_or(EvalError::Overflow)?;
            let r = a.checked_rem(b).ok_or(EvalError::Overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q }))
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let r = a.checked_rem(b).ok_or(EvalError::Overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        ArithOp::Pow => {
            if b < 0 {
                return float_arith(op, a as f64, b as f64);
            }
            let exp = u32::try_from(b).map_err(|_| EvalError::Overflow)?;
            checked(a.checked_pow(exp))
        }
    }
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> Result<Value, EvalError> {
    let v = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        ArithOp::FloorDiv => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            (a / b).floor()
        }
        ArithOp::Mod => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        ArithOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let p = a.powf(b);
            if p.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(EvalError::Overflow);
            }
            p
        }
    };
    Ok(Value::Float(v))
}

fn compare(op: CompareOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    let ordered = |want: fn(Ordering) -> bool, sym: &'static str| -> Result<bool, EvalError> {
        // NaN orders as nothing: every ordering test is false
        Ok(order(l, r).ok_or_else(|| mismatch(sym, l, r))?.is_some_and(want))
    };
    match op {
        CompareOp::Eq => Ok(l.loose_eq(r)),
        CompareOp::Ne => Ok(!l.loose_eq(r)),
        CompareOp::Lt => ordered(|o| o == Ordering::Less, "<"),
        CompareOp::Le => ordered(|o| o != Ordering::Greater, "<="),
        CompareOp::Gt => ordered(|o| o == Ordering::Greater, ">"),
        CompareOp::Ge => ordered(|o| o != Ordering::Less, ">="),
        CompareOp::In => contains(r, l),
        CompareOp::NotIn => contains(r, l).map(|b| !b),
    }
}

/// `None` when the pair isn't orderable at all; `Some(None)` for NaN.
fn order(l: &Value, r: &Value) -> Option<Option<Ordering>> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(Some(a.cmp(b))),
        _ => {
            if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
                return Some(Some(a.cmp(&b)));
            }
            let (a, b) = (l.as_f64()?, r.as_f64()?);
            Some(a.partial_cmp(&b))
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvalError> {
    match (haystack, needle) {
        (Value::List(items), n) => Ok(items.iter().any(|it| it.loose_eq(n))),
        (Value::Str(h), Value::Str(n)) => Ok(h.contains(n.as_str())),
        _ => Err(mismatch("in", needle, haystack)),
    }
}

fn call(func: MathFn, args: &[f64]) -> Result<Value, EvalError> {
    let x = args[0];
    let domain = |what: &str| EvalError::MathDomain(format!("math.{}: {what}", func.name()));
    let v = match func {
        MathFn::Floor | MathFn::Ceil => {
            if !x.is_finite() {
                return Err(domain("argument must be finite"));
            }
            let r = if func == MathFn::Floor { x.floor() } else { x.ceil() };
            if r < i64::MIN as f64 || r >= i64::MAX as f64 {
                return Err(EvalError::Overflow);
            }
            return Ok(Value::Int(r as i64));
        }
        MathFn::Sqrt => {
            if x < 0.0 {
                return Err(domain("negative argument"));
            }
            x.sqrt()
        }
        MathFn::Exp => {
            let e = x.exp();
            if e.is_infinite() && x.is_finite() {
                return Err(EvalError::Overflow);
            }
            e
        }
        MathFn::Log => {
            if x <= 0.0 {
                return Err(domain("argument must be positive"));
            }
            match args.get(1) {
                None => x.ln(),
                Some(&base) => {
                    if base <= 0.0 {
                        return Err(domain("base must be positive"));
                    }
                    let denom = base.ln();
                    if denom == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    x.ln() / denom
                }
            }
        }
        MathFn::Log10 => {
            if x <= 0.0 {
                return Err(domain("argument must be positive"));
            }
            x.log10()
        }
        MathFn::Fabs => x.abs(),
        MathFn::Pow => {
            let y = args[1];
            if x == 0.0 && y < 0.0 {
                return Err(domain("zero to a negative power"));
            }
            let p = x.powf(y);
            if p.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(EvalError::Overflow);
            }
            p
        }
        MathFn::IsNan => return Ok(Value::Bool(x.is_nan())),
        MathFn::IsInf => return Ok(Value::Bool(x.is_infinite())),
        MathFn::IsFinite => return Ok(Value::Bool(x.is_finite())),
    };
    Ok(Value::Float(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;

    fn run(src: &str) -> Result<Value, EvalError> {
        let mut row = FeatureRow::new();
        row.insert("x".into(), Value::Int(7));
        row.insert("ratio".into(), Value::Float(0.25));
        row.insert("grade".into(), Value::Str("Gold".into()));
        row.insert("flag".into(), Value::Bool(true));
        row.insert("gone".into(), Value::Null);
        evaluate(&parse(src).unwrap(), &row, &ThresholdTable::default())
    }

    #[test]
    fn division_family_follows_python() {
        assert_eq!(run("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(run("-7 // 2").unwrap(), Value::Int(-4));
        assert_eq!(run("-7 % 3").unwrap(), Value::Int(2));
        assert_eq!(run("7 % -3").unwrap(), Value::Int(-2));
        assert_eq!(run("-7.5 // 2").unwrap(), Value::Float(-4.0));
        assert!(matches!(run("x / 0"), Err(EvalError::DivisionByZero)));
        assert!(matches!(run("x // 0.0"), Err(EvalError::DivisionByZero)));
        assert!(matches!(run("x % 0"), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn power_and_overflow() {
        assert_eq!(run("2 ** 10").unwrap(), Value::Int(1024));
        assert_eq!(run("-2 ** 2").unwrap(), Value::Int(-4));
        assert_eq!(run("2 ** -1").unwrap(), Value::Float(0.5));
        assert_eq!(run("2 ** 3 ** 2").unwrap(), Value::Int(512));
        assert!(matches!(run("10 ** 40"), Err(EvalError::Overflow)));
        assert!(matches!(run("9223372036854775807 + 1"), Err(EvalError::Overflow)));
    }

    #[test]
    fn chained_comparisons() {
        assert_eq!(run("0 < x < 10").unwrap(), Value::Bool(true));
        assert_eq!(run("0 < x < 5").unwrap(), Value::Bool(false));
        assert_eq!(run("1 < 2 > 1.5").unwrap(), Value::Bool(true));
    }

    #[test]
    fn logical_ops_short_circuit_and_return_operands() {
        // rhs would divide by zero if evaluated
        assert_eq!(run("False and x / 0").unwrap(), Value::Bool(false));
        assert_eq!(run("True or x / 0").unwrap(), Value::Bool(true));
        assert_eq!(run("0 or ratio").unwrap(), Value::Float(0.25));
        assert_eq!(run("x & 0").unwrap(), Value::Int(0));
    }

    #[test]
    fn membership() {
        assert_eq!(run("grade in ['Gold', 'Platinum']").unwrap(), Value::Bool(true));
        assert_eq!(run("grade not in ('Gold',)").unwrap(), Value::Bool(false));
        assert_eq!(run("'ol' in grade").unwrap(), Value::Bool(true));
        assert_eq!(run("x in [7.0]").unwrap(), Value::Bool(true));
        assert!(run("x in 7").is_err());
    }

    #[test]
    fn cross_type_rules() {
        assert_eq!(run("grade == 1").unwrap(), Value::Bool(false));
        assert_eq!(run("grade != 1").unwrap(), Value::Bool(true));
        assert!(run("grade > 1").is_err());
        assert!(run("gone > 0").is_err());
        assert_eq!(run("flag == 1").unwrap(), Value::Bool(true));
        assert_eq!(run("flag + 1").unwrap(), Value::Int(2));
        assert!(run("grade - 1").is_err());
        assert_eq!(run("grade + 'X'").unwrap(), Value::Str("GoldX".into()));
    }

    #[test]
    fn nan_threshold_compares_false_both_ways() {
        assert_eq!(run("x > {NO_SUCH}").unwrap(), Value::Bool(false));
        assert_eq!(run("x <= {NO_SUCH}").unwrap(), Value::Bool(false));
        assert_eq!(run("x == {NO_SUCH}").unwrap(), Value::Bool(false));
    }

    #[test]
    fn thresholds_resolve_from_table() {
        assert_eq!(run("{LIQ_P20} == 30").unwrap(), Value::Bool(true));
        assert_eq!(run("{NEC_P80} * 10").unwrap(), Value::Float(8.0));
    }

    #[test]
    fn math_helpers() {
        assert_eq!(run("math.floor(ratio * 10)").unwrap(), Value::Int(2));
        assert_eq!(run("math.ceil(2.1)").unwrap(), Value::Int(3));
        assert_eq!(run("math.sqrt(16)").unwrap(), Value::Float(4.0));
        assert_eq!(run("math.log(8, 2)").unwrap(), Value::Float(3.0));
        assert_eq!(run("math.fabs(-1.5)").unwrap(), Value::Float(1.5));
        assert_eq!(run("math.isnan(math.nan)").unwrap(), Value::Bool(true));
        assert!(matches!(run("math.sqrt(-1)"), Err(EvalError::MathDomain(_))));
        assert!(matches!(run("math.log(0)"), Err(EvalError::MathDomain(_))));
        assert!(matches!(run("math.exp(1000)"), Err(EvalError::Overflow)));
        assert!(run("math.sqrt(grade)").is_err());
    }

    #[test]
    fn missing_field_is_an_error_here() {
        assert!(matches!(run("absent > 0"), Err(EvalError::UnknownField(_))));
    }
}
