//! Recursive-descent parser.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := ("+" | "-") unary | power
//! power   := primary ("**" unary)?
//! primary := NUMBER | IDENT | IDENT "(" args? ")" | "(" expr ")"
//! ```
//!
//! `**` binds tighter than unary minus on its left and is right-associative,
//! so `-2**2 == -4` and `2**-1 == 0.5`.
//!
//! Sources longer than [`MAX_SOURCE_LEN`] bytes are rejected before lexing,
//! and nesting (parentheses, unary signs, exponents, call arguments and
//! operator chains) is capped at [`MAX_DEPTH`]. Together the two caps keep
//! parsing, evaluating and dropping a tree within a few thousand frames.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{ExprError, ExprResult};
use crate::functions::{self, Function};
use crate::lexer::{Lexer, Spanned, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Longest accepted expression source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;

/// Deepest accepted nesting level.
pub const MAX_DEPTH: usize = 256;

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Var(String),
    Neg(Box<Node>),
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Call {
        func: Function,
        args: Vec<Node>,
    },
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl Expr {
    pub fn parse(source: &str) -> ExprResult<Self> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::Parse {
                col: MAX_SOURCE_LEN + 1,
                message: format!("expression longer than {MAX_SOURCE_LEN} bytes"),
            });
        }
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        parser.expect_eof()?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Free variable names, i.e. identifiers that are neither functions nor
    /// built-in constants.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_vars(&self.root, &mut out);
        out
    }

    /// True if the expression is a single bare identifier.
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.root {
            Node::Var(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for Expr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_vars(node: &Node, out: &mut BTreeSet<String>) {
    match node {
        Node::Number(_) => {}
        Node::Var(name) => {
            if functions::constant(name).is_none() {
                out.insert(name.clone());
            }
        }
        Node::Neg(inner) => collect_vars(inner, out),
        Node::Binary { lhs, rhs, .. } => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
        Node::Call { args, .. } => {
            for arg in args {
                collect_vars(arg, out);
            }
        }
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn col(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.col).unwrap_or(0)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, msg: impl Into<String>) -> ExprError {
        ExprError::Parse {
            col: self.col(),
            message: msg.into(),
        }
    }

    fn expect_eof(&self) -> ExprResult<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    fn descend(&mut self) -> ExprResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression too deeply nested"));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // Each operator in a chain deepens the left spine by one, so it counts
    // towards the nesting limit until the chain ends.
    fn expr(&mut self) -> ExprResult<Node> {
        let base = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            self.descend()?;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn term(&mut self) -> ExprResult<Node> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.bump();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> ExprResult<Node> {
        match self.peek() {
            Token::Minus => {
                self.bump();
                self.descend()?;
                let inner = self.unary()?;
                self.ascend();
                Ok(Node::Neg(Box::new(inner)))
            }
            Token::Plus => {
                self.bump();
                self.descend()?;
                let inner = self.unary()?;
                self.ascend();
                Ok(inner)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> ExprResult<Node> {
        let base = self.primary()?;
        if *self.peek() == Token::DoubleStar {
            self.bump();
            self.descend()?;
            let exponent = self.unary()?;
            self.ascend();
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ExprResult<Node> {
        let col = self.col();
        match self.bump() {
            Token::Number(v) => Ok(Node::Number(v)),
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.bump();
                    self.call(name, col)
                } else {
                    Ok(Node::Var(name))
                }
            }
            Token::LParen => {
                self.descend()?;
                let inner = self.expr()?;
                self.ascend();
                match self.bump() {
                    Token::RParen => Ok(inner),
                    _ => Err(ExprError::Parse {
                        col: self.tokens.get(self.pos.saturating_sub(1)).map_or(0, |s| s.col),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            Token::Eof => Err(ExprError::Parse {
                col,
                message: "unexpected end of expression".to_string(),
            }),
            other => Err(ExprError::Parse {
                col,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }

    fn call(&mut self, name: String, col: usize) -> ExprResult<Node> {
        let func = Function::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;

        let mut args = Vec::new();
        self.descend()?;
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.expr()?);
                if *self.peek() == Token::Comma {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.ascend();
        if self.bump() != Token::RParen {
            return Err(ExprError::Parse {
                col,
                message: format!("unterminated call to {}", func.name()),
            });
        }

        if !func.accepts(args.len()) {
            return Err(ExprError::Arity {
                name: func.name(),
                expected: func.arity_label(),
                got: args.len(),
            });
        }
        Ok(Node::Call { func, args })
    }
}

fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
    Node::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_free_variables_only() {
        let expr = Expr::parse("sqrt(B**2 + pi*R) - V").unwrap();
        let vars: Vec<_> = expr.variables().into_iter().collect();
        assert_eq!(vars, vec!["B", "R", "V"]);
    }

    #[test]
    fn bare_identifier_is_detected() {
        assert_eq!(Expr::parse("rprime").unwrap().as_identifier(), Some("rprime"));
        assert_eq!(Expr::parse("RAJ2000/15").unwrap().as_identifier(), None);
    }

    #[test]
    fn unknown_function_is_rejected_at_parse_time() {
        assert_eq!(
            Expr::parse("system(1)").unwrap_err(),
            ExprError::UnknownFunction("system".into())
        );
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        assert!(matches!(
            Expr::parse("hypot(1)").unwrap_err(),
            ExprError::Arity { name: "hypot", got: 1, .. }
        ));
    }

    #[test]
    fn reports_trailing_garbage() {
        assert!(matches!(Expr::parse("B R"), Err(ExprError::Parse { col: 3, .. })));
        assert!(matches!(Expr::parse("(B + R"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse(""), Err(ExprError::Parse { .. })));
    }

    fn too_deep(result: ExprResult<Expr>) -> bool {
        matches!(result, Err(ExprError::Parse { message, .. }) if message == "expression too deeply nested")
    }

    #[test]
    fn deep_parentheses_are_rejected() {
        let src = format!("{}B{}", "(".repeat(1000), ")".repeat(1000));
        assert!(too_deep(Expr::parse(&src)));

        let ok = format!("{}B{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(Expr::parse(&ok).unwrap().as_identifier(), Some("B"));
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let sum = vec!["B"; 1000].join("+");
        assert!(too_deep(Expr::parse(&sum)));

        let product = vec!["B"; 1000].join("*");
        assert!(too_deep(Expr::parse(&product)));

        let short = vec!["B"; 100].join("+");
        assert_eq!(Expr::parse(&short).unwrap().variables().len(), 1);
    }

    #[test]
    fn nested_signs_powers_and_calls_are_rejected() {
        assert!(too_deep(Expr::parse(&format!("{}B", "-".repeat(1000)))));
        assert!(too_deep(Expr::parse(&vec!["2"; 1000].join("**"))));
        let calls = format!("{}B{}", "abs(".repeat(500), ")".repeat(500));
        assert!(too_deep(Expr::parse(&calls)));
    }

    #[test]
    fn oversized_source_is_rejected_before_lexing() {
        let huge = format!("{}B{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(Expr::parse(&huge), Err(ExprError::Parse { .. })));

        let long_sum = vec!["B"; 500_000].join("+");
        assert!(matches!(Expr::parse(&long_sum), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn power_is_right_associative() {
        let expr = Expr::parse("2**3**2").unwrap();
        match expr.root() {
            Node::Binary { op: BinaryOp::Pow, rhs, .. } => {
                assert!(matches!(**rhs, Node::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }
}
