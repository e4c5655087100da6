use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::{Responder, ResponderOutput};

static PERCENT_OF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s*%\s*of\s*(-?\d+(?:\.\d+)?)").expect("percent-of regex")
});

static ARITHMETIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9.+\-*/%^() ]+").expect("arithmetic run regex"));

/// Deepest parenthesis or exponent nesting the parser will follow.
const MAX_NESTING: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("no arithmetic expression found in {0:?}")]
    NoExpression(String),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("unexpected {0:?} at position {1}")]
    Unexpected(String, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Arithmetic and "X% of Y" evaluation, answered directly.
pub struct CalculatorResponder;

#[async_trait]
impl Responder for CalculatorResponder {
    async fn respond(&self, query: &str) -> ResponderOutput {
        match evaluate(query) {
            Ok(result) => ResponderOutput::text(format!("Calculation: {}", result)),
            Err(e) => {
                debug!("Calculator could not evaluate {:?}: {}", query, e);
                ResponderOutput::text(format!("Calculator error: {}", e))
            }
        }
    }
}

/// Evaluate the arithmetic in `input` and format the result.
pub fn evaluate(input: &str) -> Result<String, CalcError> {
    let text = input.trim().to_lowercase();

    if let Some(caps) = PERCENT_OF.captures(&text) {
        let percent = parse_number(&caps[1])?;
        let base = parse_number(&caps[2])?;
        return format_percentage(percent * base / 100.0);
    }

    let stripped = text.trim_end_matches(|c: char| matches!(c, '=' | '?' | '!' | '.' | ' '));
    match Parser::parse(stripped) {
        Ok(value) => return format_number(value),
        Err(e @ CalcError::TooDeep(_)) => return Err(e),
        Err(_) => {}
    }

    let candidate = ARITHMETIC_RUN
        .find_iter(stripped)
        .map(|m| m.as_str().trim())
        .filter(|run| run.chars().any(|c| c.is_ascii_digit()))
        .fold(None::<&str>, |best, run| match best {
            Some(b) if b.len() >= run.len() => Some(b),
            _ => Some(run),
        })
        .ok_or_else(|| CalcError::NoExpression(input.trim().to_string()))?;

    format_number(Parser::parse(candidate)?)
}

fn parse_number(raw: &str) -> Result<f64, CalcError> {
    raw.parse::<f64>()
        .map_err(|_| CalcError::InvalidNumber(raw.to_string()))
}

fn format_percentage(value: f64) -> Result<String, CalcError> {
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    if value.fract() == 0.0 {
        Ok(format!("{}", value as i64))
    } else {
        Ok(format!("{:.2}", value))
    }
}

fn format_number(value: f64) -> Result<String, CalcError> {
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        // avoids "-0"
        return Ok(format!("{}", value as i64));
    }
    let fixed = format!("{:.4}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    Ok(match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, CalcError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            ' ' | '\t' | '\n' => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                tokens.push((Token::Number(parse_number(&raw)?), start));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::Caret
            }
            '*' | 'x' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(CalcError::Unexpected(other.to_string(), i)),
        };
        tokens.push((token, i));
        i += 1;
    }

    Ok(tokens)
}

/// Recursive-descent evaluator.
///
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/' | '%') unary)*
/// unary   := ('-' | '+')* power
/// power   := primary ('^' unary)?
/// primary := number | '(' expr ')'
///
/// Sign runs are folded iteratively; parentheses and exponents count
/// towards `MAX_NESTING`.
struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn parse(src: &str) -> Result<f64, CalcError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(CalcError::NoExpression(src.to_string()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let value = parser.expr()?;
        if let Some((token, at)) = parser.tokens.get(parser.pos) {
            return Err(CalcError::Unexpected(format!("{:?}", token), *at));
        }
        Ok(value)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let next = self.tokens.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Token::Slash | Token::Percent => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value = if op == Token::Slash { value / rhs } else { value % rhs };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        let mut negate = false;
        loop {
            match self.peek() {
                Some(Token::Minus) => negate = !negate,
                Some(Token::Plus) => {}
                _ => break,
            }
            self.pos += 1;
        }
        let value = self.power()?;
        Ok(if negate { -value } else { value })
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn nested(&mut self, rule: fn(&mut Self) -> Result<f64, CalcError>) -> Result<f64, CalcError> {
        if self.depth >= MAX_NESTING {
            return Err(CalcError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        let value = rule(self);
        self.depth -= 1;
        value
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.advance() {
            Some((Token::Number(n), _)) => Ok(n),
            Some((Token::LParen, _)) => {
                let value = self.nested(Self::expr)?;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(value),
                    Some((token, at)) => Err(CalcError::Unexpected(format!("{:?}", token), at)),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some((token, at)) => Err(CalcError::Unexpected(format!("{:?}", token), at)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}
