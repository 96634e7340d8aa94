use regex::Regex;

use super::fact::{FactField, Value};
use super::functions::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Methods callable on any string-valued expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMethod {
    Contains,
    StartsWith,
    EndsWith,
    ToLower,
    ToUpper,
    Trim,
    Len,
    MatchString,
}

impl StringMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "Contains" => StringMethod::Contains,
            "StartsWith" => StringMethod::StartsWith,
            "EndsWith" => StringMethod::EndsWith,
            "ToLower" => StringMethod::ToLower,
            "ToUpper" => StringMethod::ToUpper,
            "Trim" => StringMethod::Trim,
            "Len" => StringMethod::Len,
            "MatchString" => StringMethod::MatchString,
            _ => return None,
        };
        Some(method)
    }

    pub fn arg_count(&self) -> usize {
        match self {
            StringMethod::Contains
            | StringMethod::StartsWith
            | StringMethod::EndsWith
            | StringMethod::MatchString => 1,
            StringMethod::ToLower | StringMethod::ToUpper | StringMethod::Trim | StringMethod::Len => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Field {
        object: String,
        field: FactField,
    },
    Call {
        predicate: Predicate,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        method: StringMethod,
        args: Vec<Expr>,
        /// Pattern precompiled when the `MatchString` argument is a literal.
        pattern: Option<Regex>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    fn collect_objects<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field { object, .. } => out.push(object),
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_objects(out)),
            Expr::Method { target, args, .. } => {
                target.collect_objects(out);
                args.iter().for_each(|arg| arg.collect_objects(out));
            }
            Expr::Unary { expr, .. } => expr.collect_objects(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_objects(out);
                rhs.collect_objects(out);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Assign {
        object: String,
        field: FactField,
        value: Expr,
    },
    Retract(String),
    Complete,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub salience: i64,
    pub when: Expr,
    pub then: Vec<Statement>,
}

impl Rule {
    /// Fact object names the rule reads or assigns, e.g. `MF`.
    pub fn fact_objects(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.when.collect_objects(&mut out);
        for statement in &self.then {
            if let Statement::Assign { object, value, .. } = statement {
                out.push(object);
                value.collect_objects(&mut out);
            }
        }
        out
    }
}
