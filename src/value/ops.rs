//! The operator dispatch table: `match (Operator, tag, tag)` rather than
//! virtual dispatch, since the value type set is closed and small (§4.2,
//! §9 Design Notes).

use std::rc::Rc;

use crate::ast::Operator;
use crate::error::{DivisionByZeroSnafu, ScriptError, UnknownOperatorSnafu};

use super::array::Key;
use super::Value;

/// Maps a compound-assignment operator to the arithmetic/logical operator
/// that computes its right-hand value (`AddAssign` -> `Add`, etc.). The
/// interpreter's assignment handler uses this to compute-then-store.
pub fn base_op(op: Operator) -> Operator {
    match op {
        Operator::AddAssign => Operator::Add,
        Operator::SubAssign => Operator::Sub,
        Operator::MulAssign => Operator::Mul,
        Operator::DivAssign => Operator::Div,
        Operator::ModAssign => Operator::Mod,
        Operator::ShlAssign => Operator::Shl,
        Operator::ShrAssign => Operator::Shr,
        Operator::OrAssign => Operator::LogicalOr,
        Operator::AndAssign => Operator::LogicalAnd,
        Operator::XorAssign => Operator::LogicalXor,
        other => other,
    }
}

fn numeric_is_real(a: &Value, b: &Value) -> bool {
    matches!(a, Value::Real(_)) || matches!(b, Value::Real(_))
}

pub fn apply_binary(op: Operator, lhs: &Value, rhs: &Value) -> Result<Value, ScriptError> {
    use Operator::*;
    match op {
        Add => match (lhs, rhs) {
            (Value::Str(a), _) => Ok(Value::Str(Rc::from(format!("{a}{}", rhs.to_text())))),
            (_, Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{}{b}", lhs.to_text())))),
            _ if numeric_is_real(lhs, rhs) => Ok(Value::Real(lhs.to_real() + rhs.to_real())),
            _ => Ok(Value::Int(lhs.to_int() + rhs.to_int())),
        },
        Sub => arithmetic(lhs, rhs, |a, b| a - b, |a, b| a - b),
        Mul => arithmetic(lhs, rhs, |a, b| a * b, |a, b| a * b),
        Div => {
            if numeric_is_real(lhs, rhs) {
                Ok(Value::Real(lhs.to_real() / rhs.to_real()))
            } else {
                let divisor = rhs.to_int();
                if divisor == 0 {
                    return DivisionByZeroSnafu.fail();
                }
                Ok(Value::Int(lhs.to_int() / divisor))
            }
        }
        Mod => {
            let divisor = rhs.to_int();
            if divisor == 0 {
                return DivisionByZeroSnafu.fail();
            }
            Ok(Value::Int(lhs.to_int() % divisor))
        }
        Shl => Ok(Value::Int(lhs.to_int() << (rhs.to_int() & 63))),
        Shr => Ok(Value::Int(lhs.to_int() >> (rhs.to_int() & 63))),
        Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        Lt => Ok(Value::Bool(compare(lhs, rhs) == std::cmp::Ordering::Less)),
        Le => Ok(Value::Bool(compare(lhs, rhs) != std::cmp::Ordering::Greater)),
        Gt => Ok(Value::Bool(compare(lhs, rhs) == std::cmp::Ordering::Greater)),
        Ge => Ok(Value::Bool(compare(lhs, rhs) != std::cmp::Ordering::Less)),
        LogicalOr => Ok(Value::Bool(lhs.truthy() || rhs.truthy())),
        LogicalAnd => Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
        LogicalXor => Ok(Value::Bool(lhs.truthy() ^ rhs.truthy())),
        Subscript => subscript(lhs, rhs),
        Property => property(lhs, rhs),
        Assign => Ok(rhs.clone()),
        other => UnknownOperatorSnafu {
            op: format!("{other:?}"),
            type_name: lhs.tag(),
        }
        .fail(),
    }
}

pub fn apply_unary(op: Operator, operand: &Value) -> Result<Value, ScriptError> {
    use Operator::*;
    match op {
        Neg => {
            if matches!(operand, Value::Real(_)) {
                Ok(Value::Real(-operand.to_real()))
            } else {
                Ok(Value::Int(-operand.to_int()))
            }
        }
        BitNot => Ok(Value::Int(!operand.to_int())),
        Not => Ok(Value::Bool(!operand.truthy())),
        PrefixInc | SuffixInc => Ok(Value::Int(operand.to_int() + 1)),
        PrefixDec | SuffixDec => Ok(Value::Int(operand.to_int() - 1)),
        other => UnknownOperatorSnafu {
            op: format!("{other:?}"),
            type_name: operand.tag(),
        }
        .fail(),
    }
}

fn arithmetic(lhs: &Value, rhs: &Value, int_op: fn(i64, i64) -> i64, real_op: fn(f64, f64) -> f64) -> Result<Value, ScriptError> {
    if numeric_is_real(lhs, rhs) {
        Ok(Value::Real(real_op(lhs.to_real(), rhs.to_real())))
    } else {
        Ok(Value::Int(int_op(lhs.to_int(), rhs.to_int())))
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Nil, Value::Nil) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ if numeric_is_real(lhs, rhs) => lhs.to_real() == rhs.to_real(),
        _ => lhs.to_int() == rhs.to_int(),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> std::cmp::Ordering {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.as_ref().cmp(b.as_ref()),
        _ if numeric_is_real(lhs, rhs) => lhs
            .to_real()
            .partial_cmp(&rhs.to_real())
            .unwrap_or(std::cmp::Ordering::Equal),
        _ => lhs.to_int().cmp(&rhs.to_int()),
    }
}

fn subscript(target: &Value, index: &Value) -> Result<Value, ScriptError> {
    match target {
        Value::Array(arr) => {
            let key = Key::from_value(index);
            Ok(arr.get_by_key(&key).unwrap_or(Value::Nil))
        }
        Value::Str(s) => {
            let i = index.to_int();
            Ok(s.chars()
                .nth(i.max(0) as usize)
                .map(|c| Value::Str(Rc::from(c.to_string())))
                .unwrap_or(Value::Nil))
        }
        other => UnknownOperatorSnafu {
            op: "Subscript".to_string(),
            type_name: other.tag(),
        }
        .fail(),
    }
}

fn property(target: &Value, name: &Value) -> Result<Value, ScriptError> {
    match target {
        Value::Object(obj) => Ok(obj.get_member(&name.to_text()).unwrap_or(Value::Nil)),
        other => UnknownOperatorSnafu {
            op: "Property".to_string(),
            type_name: other.tag(),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_int_real_arithmetic_promotes_to_real() {
        let v = apply_binary(Operator::Add, &Value::Int(1), &Value::Real(0.5)).unwrap();
        assert_eq!(v.to_real(), 1.5);
    }

    #[test]
    fn string_concatenation_coerces_the_other_operand() {
        let v = apply_binary(Operator::Add, &Value::Str(Rc::from("n=")), &Value::Int(3)).unwrap();
        assert_eq!(v.to_text(), "n=3");
    }

    #[test]
    fn division_by_zero_is_a_typed_error() {
        let err = apply_binary(Operator::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err, ScriptError::DivisionByZero);
    }

    #[test]
    fn comparison_and_equality_use_string_ordering_for_strings() {
        let v = apply_binary(Operator::Lt, &Value::Str(Rc::from("a")), &Value::Str(Rc::from("b"))).unwrap();
        assert!(v.truthy());
    }

    #[test]
    fn array_subscript_reads_by_key() {
        let arr = super::super::array::ArrayDetail::new();
        arr.insert(Value::Int(0), Value::Int(42));
        let v = subscript(&Value::Array(arr), &Value::Int(0)).unwrap();
        assert_eq!(v.to_int(), 42);
    }
}
