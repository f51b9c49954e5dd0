//! Conditional expressions used by closing-setting branches
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := and ("OR" and)*
//! and     := unary ("AND" unary)*
//! unary   := "NOT" unary | "(" expr ")" | compare
//! compare := operand (op operand)?
//! operand := "{" slot "}" | "[" attribute "]" | quoted | word
//! op      := "=" | "==" | "!=" | ">" | "<" | ">=" | "<="
//! ```
//!
//! A bare operand is true when it resolves to a non-empty value.

use regex::Regex;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::protocol::SlotValue;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\s*(?:\{(?P<slot>[^{}]+)\}|\[(?P<attr>[^\[\]]+)\]|"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<op>==|!=|>=|<=|=|>|<)|(?P<lp>\()|(?P<rp>\))|(?P<word>[A-Za-z0-9_.\-]+))"#,
    )
    .expect("condition token regex is valid")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid condition {expression:?} at offset {offset}: {message}")]
pub struct ConditionError {
    pub expression: String,
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Slot(String),
    Attribute(String),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Present(Operand),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Operand(Operand),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(expression: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let error = |offset: usize, message: &str| ConditionError {
        expression: expression.to_string(),
        offset,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut pos = 0;
    while expression.get(pos..).is_some_and(|rest| !rest.trim().is_empty()) {
        let caps = TOKEN_RE
            .captures_at(expression, pos)
            .filter(|c| c.get(0).is_some_and(|m| m.start() == pos))
            .ok_or_else(|| error(pos, "unexpected character"))?;
        let whole = caps.get(0).ok_or_else(|| error(pos, "unexpected character"))?;

        let token = if let Some(m) = caps.name("slot") {
            Token::Operand(Operand::Slot(m.as_str().trim().to_string()))
        } else if let Some(m) = caps.name("attr") {
            Token::Operand(Operand::Attribute(m.as_str().trim().to_string()))
        } else if let Some(m) = caps.name("dq").or_else(|| caps.name("sq")) {
            Token::Operand(Operand::Literal(m.as_str().to_string()))
        } else if let Some(m) = caps.name("op") {
            Token::Op(match m.as_str() {
                "!=" => CompareOp::Ne,
                ">=" => CompareOp::Ge,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                "<" => CompareOp::Lt,
                _ => CompareOp::Eq,
            })
        } else if caps.name("lp").is_some() {
            Token::LParen
        } else if caps.name("rp").is_some() {
            Token::RParen
        } else {
            let word = caps.name("word").map_or("", |m| m.as_str());
            match word.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                "NOT" => Token::Not,
                _ => Token::Operand(Operand::Literal(word.to_string())),
            }
        };
        tokens.push((whole.start(), token));
        pos = whole.end();
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<(usize, Token)>,
    index: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ConditionError {
        let offset = self
            .tokens
            .get(self.index)
            .map_or(self.expression.len(), |(offset, _)| *offset);
        ConditionError {
            expression: self.expression.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(_, t)| t.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.index += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.index += 1;
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.index += 1;
                Ok(Condition::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.index += 1;
                let inner = self.parse_or()?;
                if self.next() != Some(Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            _ => self.parse_compare(),
        }
    }

    fn parse_compare(&mut self) -> Result<Condition, ConditionError> {
        let Some(Token::Operand(left)) = self.peek().cloned() else {
            return Err(self.error("expected operand"));
        };
        self.index += 1;

        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.index += 1;
            let Some(Token::Operand(right)) = self.peek().cloned() else {
                return Err(self.error("expected operand after comparison"));
            };
            self.index += 1;
            return Ok(Condition::Compare { left, op, right });
        }
        Ok(Condition::Present(left))
    }
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let tokens = lex(expression)?;
        let mut parser = Parser {
            expression,
            tokens,
            index: 0,
        };
        let condition = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(condition)
    }

    /// Evaluate against interpreted slot values and session attributes
    pub fn evaluate(
        &self,
        slots: &BTreeMap<String, SlotValue>,
        attributes: &BTreeMap<String, String>,
    ) -> bool {
        let resolve = |operand: &Operand| -> Option<String> {
            match operand {
                Operand::Slot(name) => slots.get(name).map(|v| v.interpreted_value.clone()),
                Operand::Attribute(name) => attributes.get(name).cloned(),
                Operand::Literal(value) => Some(value.clone()),
            }
        };

        match self {
            Condition::Present(operand) => resolve(operand).is_some_and(|v| !v.is_empty()),
            Condition::Compare { left, op, right } => {
                let (Some(left), Some(right)) = (resolve(left), resolve(right)) else {
                    return *op == CompareOp::Ne;
                };
                compare(&left, *op, &right)
            }
            Condition::Not(inner) => !inner.evaluate(slots, attributes),
            Condition::And(a, b) => a.evaluate(slots, attributes) && b.evaluate(slots, attributes),
            Condition::Or(a, b) => a.evaluate(slots, attributes) || b.evaluate(slots, attributes),
        }
    }
}

fn compare(left: &str, op: CompareOp, right: &str) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        ordering => {
            let (Ok(l), Ok(r)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) else {
                return false;
            };
            match ordering {
                CompareOp::Gt => l > r,
                CompareOp::Lt => l < r,
                CompareOp::Ge => l >= r,
                _ => l <= r,
            }
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(pairs: &[(&str, &str)]) -> BTreeMap<String, SlotValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), SlotValue::literal(*v)))
            .collect()
    }

    #[test]
    fn test_parse_equality() {
        let condition = Condition::parse(r#"{Confirm} = "Yes""#).unwrap();
        assert_eq!(
            condition,
            Condition::Compare {
                left: Operand::Slot("Confirm".into()),
                op: CompareOp::Eq,
                right: Operand::Literal("Yes".into()),
            }
        );
    }

    #[test]
    fn test_evaluate_boolean_logic() {
        let condition =
            Condition::parse(r#"{Choice} = "change" AND NOT ({Seat} = "aisle" or [vip] = 'true')"#)
                .unwrap();
        let attrs = BTreeMap::new();

        assert!(condition.evaluate(&slots(&[("Choice", "change"), ("Seat", "window")]), &attrs));
        assert!(!condition.evaluate(&slots(&[("Choice", "change"), ("Seat", "aisle")]), &attrs));
        assert!(!condition.evaluate(&slots(&[("Choice", "cancel")]), &attrs));

        let mut vip = BTreeMap::new();
        vip.insert("vip".to_string(), "true".to_string());
        assert!(!condition.evaluate(&slots(&[("Choice", "change")]), &vip));
    }

    #[test]
    fn test_missing_slot_is_unequal() {
        let attrs = BTreeMap::new();
        let empty = BTreeMap::new();
        assert!(!Condition::parse(r#"{A} = "x""#).unwrap().evaluate(&empty, &attrs));
        assert!(Condition::parse(r#"{A} != "x""#).unwrap().evaluate(&empty, &attrs));
        assert!(!Condition::parse("{A}").unwrap().evaluate(&empty, &attrs));
        assert!(Condition::parse("{A}").unwrap().evaluate(&slots(&[("A", "1")]), &attrs));
    }

    #[test]
    fn test_numeric_comparison() {
        let attrs = BTreeMap::new();
        let condition = Condition::parse("{Count} >= 2").unwrap();
        assert!(condition.evaluate(&slots(&[("Count", "3")]), &attrs));
        assert!(!condition.evaluate(&slots(&[("Count", "1")]), &attrs));
        assert!(!condition.evaluate(&slots(&[("Count", "many")]), &attrs));
    }

    #[test]
    fn test_parse_errors() {
        let err = Condition::parse(r#"{A} = "#).unwrap_err();
        assert!(err.message.contains("expected operand"));

        let err = Condition::parse("({A} = 'b'").unwrap_err();
        assert!(err.message.contains("')'"));

        let err = Condition::parse("{A} $ 'b'").unwrap_err();
        assert_eq!(err.offset, 3);

        assert!(Condition::parse("{A} 'b'").is_err());
    }
}
