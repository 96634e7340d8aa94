//! Expression evaluation against a bound fact.

use regex::Regex;
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expr, StringMethod, UnaryOp};
use super::fact::{RequestFact, Value};

/// The fact visible to an expression and the name it is bound under.
pub struct Scope<'a> {
    pub fact_name: &'a str,
    pub fact: &'a RequestFact,
}

pub fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field { object, field } => {
            if object != scope.fact_name {
                return Err(format!("unknown fact object '{}'", object));
            }
            Ok(scope.fact.get(*field))
        }
        Expr::Call { predicate, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            predicate.call(&values).map(Value::Bool)
        }
        Expr::Method {
            target,
            method,
            args,
            pattern,
        } => {
            let target = match eval(target, scope)? {
                Value::Str(s) => s,
                other => {
                    return Err(format!(
                        "{:?} called on {}, expected string",
                        method,
                        other.type_name()
                    ))
                }
            };
            let arg = match args.first() {
                Some(expr) => match eval(expr, scope)? {
                    Value::Str(s) => Some(s),
                    other => {
                        return Err(format!(
                            "{:?} expects a string argument, got {}",
                            method,
                            other.type_name()
                        ))
                    }
                },
                None => None,
            };
            let arg = arg.unwrap_or_default();

            let value = match method {
                StringMethod::Contains => Value::Bool(target.contains(&arg)),
                StringMethod::StartsWith => Value::Bool(target.starts_with(&arg)),
                StringMethod::EndsWith => Value::Bool(target.ends_with(&arg)),
                StringMethod::ToLower => Value::Str(target.to_lowercase()),
                StringMethod::ToUpper => Value::Str(target.to_uppercase()),
                StringMethod::Trim => Value::Str(target.trim().to_string()),
                StringMethod::Len => Value::Int(target.chars().count() as i64),
                StringMethod::MatchString => match pattern {
                    Some(re) => Value::Bool(re.is_match(&target)),
                    None => {
                        let re = Regex::new(&arg)
                            .map_err(|e| format!("invalid regular expression: {}", e))?;
                        Value::Bool(re.is_match(&target))
                    }
                },
            };
            Ok(value)
        }
        Expr::Unary { op, expr } => match (op, eval(expr, scope)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (op, value) => Err(format!("cannot apply {:?} to {}", op, value.type_name())),
        },
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                if !truth(eval(lhs, scope)?)? {
                    return Ok(Value::Bool(false));
                }
                truth(eval(rhs, scope)?).map(Value::Bool)
            }
            BinaryOp::Or => {
                if truth(eval(lhs, scope)?)? {
                    return Ok(Value::Bool(true));
                }
                truth(eval(rhs, scope)?).map(Value::Bool)
            }
            _ => binary(*op, eval(lhs, scope)?, eval(rhs, scope)?),
        },
    }
}

/// Require a boolean.
pub fn truth(value: Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(format!("expected bool, got {}", other.type_name())),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            as_float(lhs) == as_float(rhs)
        }
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, String> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => match (as_float(lhs), as_float(rhs)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| "cannot order NaN".to_string()),
            _ => Err(format!(
                "cannot order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )),
        },
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Div if *b == 0 => return Err("division by zero".to_string()),
            BinaryOp::Div => a.checked_div(*b),
            BinaryOp::Rem if *b == 0 => return Err("division by zero".to_string()),
            BinaryOp::Rem => a.checked_rem(*b),
            _ => None,
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string());
    }

    let (Some(a), Some(b)) = (as_float(lhs), as_float(rhs)) else {
        return Err(format!(
            "cannot apply {:?} to {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        ));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err("division by zero".to_string()),
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b == 0.0 => return Err("division by zero".to_string()),
        BinaryOp::Rem => a % b,
        _ => return Err(format!("{:?} is not arithmetic", op)),
    };
    Ok(Value::Float(result))
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!equals(&lhs, &rhs))),
        BinaryOp::Lt => compare(&lhs, &rhs).map(|o| Value::Bool(o == Ordering::Less)),
        BinaryOp::Le => compare(&lhs, &rhs).map(|o| Value::Bool(o != Ordering::Greater)),
        BinaryOp::Gt => compare(&lhs, &rhs).map(|o| Value::Bool(o == Ordering::Greater)),
        BinaryOp::Ge => compare(&lhs, &rhs).map(|o| Value::Bool(o != Ordering::Less)),
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", lhs, rhs))),
            _ => arithmetic(op, &lhs, &rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &lhs, &rhs),
        BinaryOp::And => Ok(Value::Bool(truth(lhs)? && truth(rhs)?)),
        BinaryOp::Or => Ok(Value::Bool(truth(lhs)? || truth(rhs)?)),
    }
}
