//! Restricted numeric expressions for user-defined formations.
//!
//! ```text
//! i, n, t, r        // index, count, normalised index in [0, 1], radius
//! pi, tau, e        // constants
//! a + b, a - b, a * b, a / b, a ^ b, -a
//! sin cos tan asin acos atan sqrt abs floor ceil fract exp ln  (1 arg)
//! atan2 min max                                                (2 args)
//! clamp lerp                                                   (3 args)
//! ```
//!
//! Every name is resolved while parsing, so a parsed [`Expr`] can only ever
//! perform arithmetic over the four bound variables.

use std::f64::consts::{E, PI, TAU};

/// Parse failure for a formation expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{func}' expects {expected} args, got {got}")]
    WrongArgCount {
        func: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression is {len} bytes long, limit is {limit}")]
    TooLong { len: usize, limit: usize },
}

/// Deepest nesting of parentheses, calls and unary/power operators.
pub const MAX_DEPTH: usize = 64;
/// Longest accepted source text. Also bounds the depth of long operator
/// chains, which evaluate recursively.
pub const MAX_LEN: usize = 1024;

/// Values bound to the variables of an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bindings {
    pub index: f64,
    pub count: f64,
    pub normalized: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek_char().is_some_and(&pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn next_token(&mut self) -> Result<Token, ExprError> {
        self.take_while(char::is_whitespace);

        let Some(c) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(token) = single {
            self.bump();
            return Ok(token);
        }

        match c {
            '0'..='9' | '.' => {
                let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
                text.parse()
                    .map(Token::Number)
                    .map_err(|_| ExprError::InvalidNumber(text.to_string()))
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                Ok(Token::Ident(text.to_string()))
            }
            other => Err(ExprError::UnexpectedChar(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Var {
    Index,
    Count,
    Normalized,
    Radius,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Fract,
    Exp,
    Ln,
    Atan2,
    Min,
    Max,
    Clamp,
    Lerp,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "fract" => Self::Fract,
            "exp" => Self::Exp,
            "ln" => Self::Ln,
            "atan2" => Self::Atan2,
            "min" => Self::Min,
            "max" => Self::Max,
            "clamp" => Self::Clamp,
            "lerp" => Self::Lerp,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Self::Atan2 | Self::Min | Self::Max => 2,
            Self::Clamp | Self::Lerp => 3,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match (self, args) {
            (Self::Sin, [a]) => a.sin(),
            (Self::Cos, [a]) => a.cos(),
            (Self::Tan, [a]) => a.tan(),
            (Self::Asin, [a]) => a.asin(),
            (Self::Acos, [a]) => a.acos(),
            (Self::Atan, [a]) => a.atan(),
            (Self::Sqrt, [a]) => a.sqrt(),
            (Self::Abs, [a]) => a.abs(),
            (Self::Floor, [a]) => a.floor(),
            (Self::Ceil, [a]) => a.ceil(),
            (Self::Fract, [a]) => a.fract(),
            (Self::Exp, [a]) => a.exp(),
            (Self::Ln, [a]) => a.ln(),
            (Self::Atan2, [y, x]) => y.atan2(*x),
            (Self::Min, [a, b]) => a.min(*b),
            (Self::Max, [a, b]) => a.max(*b),
            // `f64::clamp` panics on inverted bounds.
            (Self::Clamp, [x, lo, hi]) => x.max(*lo).min(*hi),
            (Self::Lerp, [a, b, t]) => a + (b - a) * t,
            _ => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Num(f64),
    Var(Var),
    Neg(Box<Ast>),
    BinOp(BinOp, Box<Ast>, Box<Ast>),
    Call(Func, Vec<Ast>),
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ExprError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    fn advance(&mut self) -> Result<(), ExprError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        if self.current == expected {
            self.advance()
        } else if self.current == Token::Eof {
            Err(ExprError::UnexpectedEnd)
        } else {
            Err(ExprError::UnexpectedToken(format!("{:?}", self.current)))
        }
    }

    fn parse_add_sub(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_mul_div()?;
        loop {
            let op = match self.current {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_mul_div()?;
            left = Ast::BinOp(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_mul_div(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Ast::BinOp(op, Box::new(left), Box::new(right));
        }
    }

    // Every recursive path passes through here, so this is where nesting
    // is bounded.
    fn parse_unary(&mut self) -> Result<Ast, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let ast = self.parse_unary_inner();
        self.depth -= 1;
        ast
    }

    // Unary minus binds looser than `^`, so `-2^2` is -4.
    fn parse_unary_inner(&mut self) -> Result<Ast, ExprError> {
        if self.current == Token::Minus {
            self.advance()?;
            Ok(Ast::Neg(Box::new(self.parse_unary()?)))
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> Result<Ast, ExprError> {
        let base = self.parse_primary()?;
        if self.current == Token::Caret {
            self.advance()?;
            let exponent = self.parse_unary()?;
            Ok(Ast::BinOp(BinOp::Pow, Box::new(base), Box::new(exponent)))
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        match std::mem::replace(&mut self.current, Token::Eof) {
            Token::Number(n) => {
                self.advance()?;
                Ok(Ast::Num(n))
            }
            Token::Ident(name) => {
                self.advance()?;
                if self.current == Token::LParen {
                    self.advance()?;
                    self.parse_call(name)
                } else {
                    Self::resolve_name(name)
                }
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_add_sub()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Eof => Err(ExprError::UnexpectedEnd),
            other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Ast, ExprError> {
        let func = Func::lookup(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;

        let mut args = Vec::new();
        if self.current != Token::RParen {
            args.push(self.parse_add_sub()?);
            while self.current == Token::Comma {
                self.advance()?;
                args.push(self.parse_add_sub()?);
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != func.arity() {
            return Err(ExprError::WrongArgCount {
                func: name,
                expected: func.arity(),
                got: args.len(),
            });
        }
        Ok(Ast::Call(func, args))
    }

    fn resolve_name(name: String) -> Result<Ast, ExprError> {
        Ok(match name.as_str() {
            "i" | "index" => Ast::Var(Var::Index),
            "n" | "count" => Ast::Var(Var::Count),
            "t" => Ast::Var(Var::Normalized),
            "r" | "radius" => Ast::Var(Var::Radius),
            "pi" => Ast::Num(PI),
            "tau" => Ast::Num(TAU),
            "e" => Ast::Num(E),
            _ => return Err(ExprError::UnknownVariable(name)),
        })
    }
}

/// A parsed formation expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    ast: Ast,
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        if input.len() > MAX_LEN {
            return Err(ExprError::TooLong {
                len: input.len(),
                limit: MAX_LEN,
            });
        }
        let mut parser = Parser::new(input)?;
        let ast = parser.parse_add_sub()?;
        if parser.current != Token::Eof {
            return Err(ExprError::UnexpectedToken(format!("{:?}", parser.current)));
        }
        Ok(Self { ast })
    }

    /// Evaluates the expression. The result may be non-finite (e.g. `1 / 0`);
    /// callers decide how to treat that.
    pub fn eval(&self, bindings: &Bindings) -> f64 {
        eval_ast(&self.ast, bindings)
    }
}

fn eval_ast(ast: &Ast, bindings: &Bindings) -> f64 {
    match ast {
        Ast::Num(n) => *n,
        Ast::Var(var) => match var {
            Var::Index => bindings.index,
            Var::Count => bindings.count,
            Var::Normalized => bindings.normalized,
            Var::Radius => bindings.radius,
        },
        Ast::Neg(inner) => -eval_ast(inner, bindings),
        Ast::BinOp(op, l, r) => {
            let l = eval_ast(l, bindings);
            let r = eval_ast(r, bindings);
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Pow => l.powf(r),
            }
        }
        Ast::Call(func, args) => {
            let values: Vec<f64> = args.iter().map(|arg| eval_ast(arg, bindings)).collect();
            func.apply(&values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> f64 {
        let bindings = Bindings {
            index: 2.0,
            count: 5.0,
            normalized: 0.5,
            radius: 3.0,
        };
        Expr::parse(expr).unwrap().eval(&bindings)
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval("-2 ^ 2"), -4.0);
    }

    #[test]
    fn binds_formation_variables() {
        assert_eq!(eval("i + n"), 7.0);
        assert_eq!(eval("r * t"), 1.5);
        assert!((eval("r * cos(tau * i / n)") - 3.0 * (TAU * 0.4).cos()).abs() < 1e-12);
    }

    #[test]
    fn evaluates_multi_argument_functions() {
        assert_eq!(eval("clamp(9, 0, r)"), 3.0);
        assert_eq!(eval("lerp(0, 10, t)"), 5.0);
        assert_eq!(eval("max(i, n)"), 5.0);
        assert!((eval("atan2(1, 1)") - PI / 4.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_nesting_and_length() {
        let minus = format!("{}1", "-".repeat(10_000));
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(Expr::parse(&minus), Err(ExprError::TooLong { .. })));
        assert!(matches!(Expr::parse(&parens), Err(ExprError::TooLong { .. })));

        let minus = format!("{}1", "-".repeat(500));
        let parens = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        let calls = format!("{}1{}", "abs(".repeat(200), ")".repeat(200));
        assert_eq!(Expr::parse(&minus).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));
        assert_eq!(Expr::parse(&parens).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));
        assert_eq!(Expr::parse(&calls).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));

        let shallow = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        assert_eq!(eval(&shallow), 1.0);
        assert_eq!(eval("--2"), 2.0);
    }

    #[test]
    fn rejects_names_outside_the_closed_set() {
        assert_eq!(
            Expr::parse("x + 1").unwrap_err(),
            ExprError::UnknownVariable("x".to_string())
        );
        assert_eq!(
            Expr::parse("system(1)").unwrap_err(),
            ExprError::UnknownFunction("system".to_string())
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            Expr::parse("sin(1, 2)"),
            Err(ExprError::WrongArgCount { .. })
        ));
        assert_eq!(Expr::parse("1 +").unwrap_err(), ExprError::UnexpectedEnd);
        assert_eq!(Expr::parse("(1 + 2").unwrap_err(), ExprError::UnexpectedEnd);
        assert!(matches!(Expr::parse("1 2"), Err(ExprError::UnexpectedToken(_))));
        assert_eq!(Expr::parse("2 $ 3").unwrap_err(), ExprError::UnexpectedChar('$'));
        assert!(matches!(Expr::parse("1..2"), Err(ExprError::InvalidNumber(_))));
    }
}
