//! Composite alarm expressions
//!
//! A composite rule combines named alarms with `AND` / `OR`. Rules are kept
//! as a small expression tree and evaluated against the current alarm
//! states, so nesting needs no special handling.
//!
//! # Textual form
//!
//! ```text
//! ALARM("TodoApiErrors") AND (ALARM(TodoApiLatency) OR ALARM(TableThrottles))
//! ```
//!
//! `AND` binds tighter than `OR`; both are left-associative. Alarm names may
//! be quoted or bare; inside quotes `\"` and `\\` escape a quote and a
//! backslash. Expressions nest at most [`MAX_NESTING`] parentheses deep and
//! hold at most [`MAX_OPERANDS`] alarms.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SignalError;

/// Deepest parenthesis nesting accepted by the parser
pub const MAX_NESTING: usize = 32;

/// Most alarms one expression may reference
pub const MAX_OPERANDS: usize = 256;

/// State of a single alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    /// Within threshold
    Ok,
    /// Threshold breached
    Alarm,
    /// Not enough datapoints to decide
    InsufficientData,
}

impl FromStr for AlarmState {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OK" => Ok(AlarmState::Ok),
            "ALARM" => Ok(AlarmState::Alarm),
            "INSUFFICIENT_DATA" => Ok(AlarmState::InsufficientData),
            other => Err(SignalError::UnknownAlarmState(other.to_string())),
        }
    }
}

/// Boolean expression over named alarms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlarmExpr {
    /// True when the named alarm is in `ALARM`
    Atom(String),
    /// Both sides true
    And(Box<AlarmExpr>, Box<AlarmExpr>),
    /// Either side true
    Or(Box<AlarmExpr>, Box<AlarmExpr>),
}

impl AlarmExpr {
    /// Atom for `name`
    #[inline]
    #[must_use]
    pub fn atom(name: impl Into<String>) -> Self {
        AlarmExpr::Atom(name.into())
    }

    /// `self AND other`
    #[inline]
    #[must_use]
    pub fn and(self, other: AlarmExpr) -> Self {
        AlarmExpr::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    #[inline]
    #[must_use]
    pub fn or(self, other: AlarmExpr) -> Self {
        AlarmExpr::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate against current states. Unknown alarms count as not firing.
    #[must_use]
    pub fn evaluate(&self, states: &HashMap<String, AlarmState>) -> bool {
        match self {
            AlarmExpr::Atom(name) => states.get(name) == Some(&AlarmState::Alarm),
            AlarmExpr::And(lhs, rhs) => lhs.evaluate(states) && rhs.evaluate(states),
            AlarmExpr::Or(lhs, rhs) => lhs.evaluate(states) || rhs.evaluate(states),
        }
    }

    /// Every alarm name referenced, left to right
    #[must_use]
    pub fn alarm_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            AlarmExpr::Atom(name) => out.push(name),
            AlarmExpr::And(lhs, rhs) | AlarmExpr::Or(lhs, rhs) => {
                lhs.collect_names(out);
                rhs.collect_names(out);
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            AlarmExpr::Or(..) => 0,
            AlarmExpr::And(..) => 1,
            AlarmExpr::Atom(_) => 2,
        }
    }

    fn fmt_child(&self, child: &AlarmExpr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < self.precedence() {
            write!(f, "({child})")
        } else {
            write!(f, "{child}")
        }
    }
}

impl fmt::Display for AlarmExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmExpr::Atom(name) => {
                f.write_str("ALARM(\"")?;
                for c in name.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\")")
            }
            AlarmExpr::And(lhs, rhs) => {
                self.fmt_child(lhs, f)?;
                f.write_str(" AND ")?;
                // Right operand of a left-associative operator needs parens at equal precedence
                if rhs.precedence() <= self.precedence() {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
            AlarmExpr::Or(lhs, rhs) => {
                self.fmt_child(lhs, f)?;
                f.write_str(" OR ")?;
                if rhs.precedence() <= self.precedence() {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
        }
    }
}

impl FromStr for AlarmExpr {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            len: s.len(),
            depth: 0,
            operands: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(SignalError::expression(token.offset, "unexpected trailing input")),
        }
    }
}

impl TryFrom<String> for AlarmExpr {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlarmExpr> for String {
    fn from(expr: AlarmExpr) -> Self {
        expr.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    LParen,
    RParen,
    Word(String),
    Quoted(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, SignalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::LParen, offset });
            }
            ')' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::RParen, offset });
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(SignalError::expression(offset, "unterminated quoted name"));
                }
                tokens.push(Token { kind: TokenKind::Quoted(value), offset });
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token { kind: TokenKind::Word(word), offset });
            }
        }
    }

    Ok(tokens)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    len: usize,
    depth: usize,
    operands: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<AlarmExpr, SignalError> {
        let mut expr = self.parse_and()?;
        while self.at_keyword("OR") {
            self.bump();
            let rhs = self.parse_and()?;
            expr = expr.or(rhs);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<AlarmExpr, SignalError> {
        let mut expr = self.parse_primary()?;
        while self.at_keyword("AND") {
            self.bump();
            let rhs = self.parse_primary()?;
            expr = expr.and(rhs);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<AlarmExpr, SignalError> {
        let Some(token) = self.bump() else {
            return Err(SignalError::expression(self.len, "expected alarm or '('"));
        };

        match &token.kind {
            TokenKind::LParen => {
                if self.depth >= MAX_NESTING {
                    return Err(SignalError::expression(
                        token.offset,
                        format!("nesting deeper than {MAX_NESTING} levels"),
                    ));
                }
                self.depth += 1;
                let expr = self.parse_or()?;
                self.depth -= 1;
                self.expect_rparen(token.offset)?;
                Ok(expr)
            }
            TokenKind::Word(word) if word.eq_ignore_ascii_case("ALARM") => {
                match self.bump() {
                    Some(Token { kind: TokenKind::LParen, .. }) => {}
                    _ => return Err(SignalError::expression(token.offset, "expected '(' after ALARM")),
                }
                let name = match self.bump() {
                    Some(Token { kind: TokenKind::Word(name) | TokenKind::Quoted(name), .. })
                        if !name.is_empty() =>
                    {
                        name.clone()
                    }
                    _ => return Err(SignalError::expression(token.offset, "expected alarm name")),
                };
                self.expect_rparen(token.offset)?;
                self.operand(token.offset)?;
                Ok(AlarmExpr::Atom(name))
            }
            TokenKind::Word(word) if word.eq_ignore_ascii_case("AND") || word.eq_ignore_ascii_case("OR") => {
                Err(SignalError::expression(token.offset, format!("dangling operator '{word}'")))
            }
            TokenKind::Word(name) | TokenKind::Quoted(name) if !name.is_empty() => {
                self.operand(token.offset)?;
                Ok(AlarmExpr::Atom(name.clone()))
            }
            _ => Err(SignalError::expression(token.offset, "expected alarm or '('")),
        }
    }

    fn operand(&mut self, offset: usize) -> Result<(), SignalError> {
        self.operands += 1;
        if self.operands > MAX_OPERANDS {
            return Err(SignalError::expression(
                offset,
                format!("more than {MAX_OPERANDS} alarms"),
            ));
        }
        Ok(())
    }

    fn expect_rparen(&mut self, opened_at: usize) -> Result<(), SignalError> {
        match self.bump() {
            Some(Token { kind: TokenKind::RParen, .. }) => Ok(()),
            _ => Err(SignalError::expression(opened_at, "unbalanced parenthesis")),
        }
    }
}
