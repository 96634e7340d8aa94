//! Recursive-descent parser for rule source text.
//!
//! ```text
//! rule <Name> "<description>" salience <int> {
//!     when <expr>
//!     then <statement>; ...
//! }
//! ```

use regex::Regex;

use crate::error::{RuleError, RuleResult};

use super::ast::{BinaryOp, Expr, Rule, Statement, StringMethod, UnaryOp};
use super::fact::{FactField, Value};
use super::functions::Predicate;
use super::lexer::{tokenize, Spanned, Token};

/// Deepest expression nesting accepted before parsing gives up.
pub const MAX_DEPTH: usize = 64;

const FUNCTIONS_OBJECT: &str = "RF";

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        let spanned = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        RuleError::Syntax {
            line: spanned.line,
            column: spanned.column,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token) -> RuleResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                self.peek().describe()
            )))
        }
    }

    fn ident(&mut self, what: &str) -> RuleResult<String> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {}", what, other.describe()))),
        }
    }

    fn keyword(&mut self, keyword: &str) -> RuleResult<()> {
        match self.peek() {
            Token::Ident(name) if name == keyword => {
                self.advance();
                Ok(())
            }
            other => Err(self.error(format!(
                "expected '{}', found {}",
                keyword,
                other.describe()
            ))),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn rules(&mut self) -> RuleResult<Vec<Rule>> {
        let mut rules = Vec::new();
        while *self.peek() != Token::Eof {
            rules.push(self.rule()?);
        }
        Ok(rules)
    }

    fn rule(&mut self) -> RuleResult<Rule> {
        self.keyword("rule")?;
        let name = self.ident("rule name")?;

        let description = match self.peek().clone() {
            Token::Str(text) => {
                self.advance();
                text
            }
            _ => String::new(),
        };

        let mut salience = 0;
        if self.is_keyword("salience") {
            self.advance();
            let negative = *self.peek() == Token::Minus;
            if negative {
                self.advance();
            }
            salience = match self.advance() {
                Token::Int(n) if negative => -n,
                Token::Int(n) => n,
                other => {
                    return Err(self.error(format!(
                        "expected salience value, found {}",
                        other.describe()
                    )))
                }
            };
        }

        self.expect(Token::LBrace)?;
        self.keyword("when")?;
        let when = self.expr()?;
        self.keyword("then")?;

        let mut then = Vec::new();
        while *self.peek() != Token::RBrace {
            if *self.peek() == Token::Eof {
                return Err(self.error(format!("rule {} is missing its closing brace", name)));
            }
            then.push(self.statement()?);
            if *self.peek() == Token::Semicolon {
                self.advance();
            } else if *self.peek() != Token::RBrace {
                return Err(self.error(format!(
                    "expected ';' after statement, found {}",
                    self.peek().describe()
                )));
            }
        }
        self.expect(Token::RBrace)?;

        Ok(Rule {
            name,
            description,
            salience,
            when,
            then,
        })
    }

    fn statement(&mut self) -> RuleResult<Statement> {
        let head = self.ident("statement")?;
        match head.as_str() {
            "Retract" => {
                self.expect(Token::LParen)?;
                let target = match self.advance() {
                    Token::Str(name) => name,
                    other => {
                        return Err(self.error(format!(
                            "Retract expects a rule name string, found {}",
                            other.describe()
                        )))
                    }
                };
                self.expect(Token::RParen)?;
                Ok(Statement::Retract(target))
            }
            "Complete" => {
                self.expect(Token::LParen)?;
                self.expect(Token::RParen)?;
                Ok(Statement::Complete)
            }
            _ => {
                self.expect(Token::Dot)?;
                let field = self.field_name()?;
                self.expect(Token::Assign)?;
                let value = self.expr()?;
                Ok(Statement::Assign {
                    object: head,
                    field,
                    value,
                })
            }
        }
    }

    fn field_name(&mut self) -> RuleResult<FactField> {
        let name = self.ident("field name")?;
        FactField::from_name(&name).ok_or(RuleError::UnknownField(name))
    }

    fn enter(&mut self) -> RuleResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {}", MAX_DEPTH)));
        }
        Ok(())
    }

    fn expr(&mut self) -> RuleResult<Expr> {
        self.enter()?;
        let expr = self.or();
        self.depth -= 1;
        expr
    }

    fn binary(
        &mut self,
        next: fn(&mut Self) -> RuleResult<Expr>,
        ops: &[(Token, BinaryOp)],
    ) -> RuleResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == token {
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn or(&mut self) -> RuleResult<Expr> {
        self.binary(Self::and, &[(Token::Or, BinaryOp::Or)])
    }

    fn and(&mut self) -> RuleResult<Expr> {
        self.binary(Self::comparison, &[(Token::And, BinaryOp::And)])
    }

    fn comparison(&mut self) -> RuleResult<Expr> {
        self.binary(
            Self::additive,
            &[
                (Token::Eq, BinaryOp::Eq),
                (Token::NotEq, BinaryOp::NotEq),
                (Token::Le, BinaryOp::Le),
                (Token::Lt, BinaryOp::Lt),
                (Token::Ge, BinaryOp::Ge),
                (Token::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn additive(&mut self) -> RuleResult<Expr> {
        self.binary(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> RuleResult<Expr> {
        self.binary(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> RuleResult<Expr> {
        let op = match self.peek() {
            Token::Bang => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        let Some(op) = op else {
            return self.postfix();
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        let operand = operand?;

        // fold negative literals
        if let (UnaryOp::Neg, Expr::Literal(Value::Int(n))) = (op, &operand) {
            return Ok(Expr::Literal(Value::Int(-n)));
        }
        if let (UnaryOp::Neg, Expr::Literal(Value::Float(x))) = (op, &operand) {
            return Ok(Expr::Literal(Value::Float(-x)));
        }
        Ok(Expr::Unary {
            op,
            expr: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> RuleResult<Expr> {
        let mut expr = self.primary()?;
        while *self.peek() == Token::Dot {
            self.advance();
            let name = self.ident("method name")?;
            let method =
                StringMethod::from_name(&name).ok_or_else(|| RuleError::UnknownFunction(name.clone()))?;
            let args = self.arguments()?;
            if args.len() != method.arg_count() {
                return Err(self.error(format!(
                    "{} takes {} argument(s), got {}",
                    name,
                    method.arg_count(),
                    args.len()
                )));
            }
            let pattern = match (method, args.first()) {
                (StringMethod::MatchString, Some(Expr::Literal(Value::Str(pattern)))) => Some(
                    Regex::new(pattern)
                        .map_err(|e| self.error(format!("invalid regular expression: {}", e)))?,
                ),
                _ => None,
            };
            expr = Expr::Method {
                target: Box::new(expr),
                method,
                args,
                pattern,
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> RuleResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => {
                    return Err(self.error(format!(
                        "expected ',' or ')' in argument list, found {}",
                        other.describe()
                    )))
                }
            }
        }
    }

    fn primary(&mut self) -> RuleResult<Expr> {
        match self.advance() {
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::LParen => {
                let expr = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "nil" => Ok(Expr::Literal(Value::Nil)),
                FUNCTIONS_OBJECT if *self.peek() == Token::Dot => {
                    self.advance();
                    let func = self.ident("function name")?;
                    let predicate =
                        Predicate::from_name(&func).ok_or_else(|| RuleError::UnknownFunction(func.clone()))?;
                    let args = self.arguments()?;
                    let (min, max) = predicate.arity();
                    if args.len() < min || max.is_some_and(|max| args.len() > max) {
                        return Err(self.error(format!(
                            "{} called with {} argument(s)",
                            func,
                            args.len()
                        )));
                    }
                    Ok(Expr::Call { predicate, args })
                }
                _ if *self.peek() == Token::Dot && matches!(self.peek_at(1), Token::Ident(_)) => {
                    self.advance();
                    let field = self.field_name()?;
                    Ok(Expr::Field {
                        object: name,
                        field,
                    })
                }
                _ => Err(self.error(format!("unexpected identifier '{}'", name))),
            },
            other => Err(self.error(format!("unexpected {}", other.describe()))),
        }
    }
}

/// Parse every rule in `source`.
pub fn parse_rules(source: &str) -> RuleResult<Vec<Rule>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.rules()
}
