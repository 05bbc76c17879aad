/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Recursive descent parser for trigger expressions
//!
//! Precedence from lowest to highest: `or`, `and`, `= <>`, `< <= > >=`,
//! `+ -`, `* /`, `not`, unary minus.

use crate::ast::{BinaryOp, CountFilter, CountOperator, Expr, Function, FunctionCall, ItemRef, UnaryOp};
use crate::error::{ExpressionError, Result};
use crate::history::Window;

/// Parse expression text into a syntax tree
pub fn parse(source: &str) -> Result<Expr> {
    let mut parser = Parser::new(source);
    parser.skip_whitespace();
    if parser.at_end() {
        return Err(ExpressionError::syntax(0, "empty expression"));
    }

    let expr = parser.parse_or()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(ExpressionError::syntax(
            parser.pos,
            format!("unexpected '{}'", parser.chars[parser.pos]),
        ));
    }
    Ok(expr)
}

/// Longest time span a function may look back over
pub const MAX_SPAN_SECONDS: u64 = 730 * 86_400;

/// Parse a period parameter: `#n` or a time span such as `300`, `5m`
pub fn parse_window(param: &str) -> Option<Window> {
    let param = param.trim();
    if let Some(count) = param.strip_prefix('#') {
        return count.parse::<u32>().ok().filter(|n| *n > 0).map(Window::Count);
    }
    parse_seconds(param)
        .filter(|seconds| (1..=MAX_SPAN_SECONDS).contains(seconds))
        .map(Window::Span)
}

/// Parse a time span with an optional `s m h d w` suffix into seconds
pub fn parse_seconds(param: &str) -> Option<u64> {
    let param = param.trim();
    let (digits, multiplier) = match param.chars().last()? {
        's' => (&param[..param.len() - 1], 1),
        'm' => (&param[..param.len() - 1], 60),
        'h' => (&param[..param.len() - 1], 3600),
        'd' => (&param[..param.len() - 1], 86_400),
        'w' => (&param[..param.len() - 1], 604_800),
        _ => (param, 1),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

fn suffix_multiplier(suffix: char) -> Option<f64> {
    match suffix {
        's' => Some(1.0),
        'm' => Some(60.0),
        'h' => Some(3600.0),
        'd' => Some(86_400.0),
        'w' => Some(604_800.0),
        'K' => Some(1024.0),
        'M' => Some(1024.0 * 1024.0),
        'G' => Some(1024.0 * 1024.0 * 1024.0),
        'T' => Some(1024.0 * 1024.0 * 1024.0 * 1024.0),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(ExpressionError::syntax(
                self.pos,
                format!("expected '{}', found '{}'", expected, c),
            )),
            None => Err(ExpressionError::syntax(
                self.pos,
                format!("expected '{}', found end of expression", expected),
            )),
        }
    }

    /// Consume `keyword` when it appears as a whole word
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let len = keyword.chars().count();
        if self.pos + len > self.chars.len() {
            return false;
        }
        let matches = keyword
            .chars()
            .zip(&self.chars[self.pos..self.pos + len])
            .all(|(a, b)| a == *b);
        if !matches || self.chars.get(self.pos + len).is_some_and(|c| is_word_char(*c)) {
            return false;
        }
        self.pos += len;
        true
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            self.skip_whitespace();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('='), _) => {
                    self.pos += 1;
                    BinaryOp::Equal
                }
                (Some('<'), Some('>')) => {
                    self.pos += 2;
                    BinaryOp::NotEqual
                }
                _ => return Ok(left),
            };
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_whitespace();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('<'), Some('>')) => return Ok(left),
                (Some('<'), Some('=')) => {
                    self.pos += 2;
                    BinaryOp::LessOrEqual
                }
                (Some('>'), Some('=')) => {
                    self.pos += 2;
                    BinaryOp::GreaterOrEqual
                }
                (Some('<'), _) => {
                    self.pos += 1;
                    BinaryOp::Less
                }
                (Some('>'), _) => {
                    self.pos += 1;
                    BinaryOp::Greater
                }
                _ => return Ok(left),
            };
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') => BinaryOp::Multiply,
                Some('/') => BinaryOp::Divide,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_not()?;
            left = binary(op, left, right);
        }
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_unary()
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        if self.peek() == Some('-') {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some('"') => self.parse_string().map(Expr::Text),
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() => self.parse_function(),
            Some(c) => Err(ExpressionError::syntax(self.pos, format!("unexpected '{}'", c))),
            None => Err(ExpressionError::syntax(self.pos, "unexpected end of expression")),
        }
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let mut value: f64 = text
            .parse()
            .map_err(|_| ExpressionError::syntax(start, format!("invalid number '{}'", text)))?;

        if let Some(multiplier) = self.peek().and_then(suffix_multiplier) {
            if !self.peek_at(1).is_some_and(is_word_char) {
                self.pos += 1;
                value *= multiplier;
            }
        }

        if self.peek().is_some_and(is_word_char) {
            return Err(ExpressionError::syntax(self.pos, "invalid number suffix"));
        }
        Ok(Expr::Number(value))
    }

    fn parse_string(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(text);
                }
                Some('\\') => {
                    match self.peek_at(1) {
                        Some(c @ ('"' | '\\')) => text.push(c),
                        _ => return Err(ExpressionError::syntax(self.pos, "invalid escape sequence")),
                    }
                    self.pos += 2;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
                None => return Err(ExpressionError::syntax(start, "unterminated string")),
            }
        }
    }

    fn parse_function(&mut self) -> Result<Expr> {
        let start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Err(ExpressionError::syntax(start, format!("unexpected word '{}'", name)));
        }
        self.pos += 1;

        let item = self.parse_item_ref()?;
        let mut params = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                    params.push(self.parse_parameter()?);
                }
                Some(c) => {
                    return Err(ExpressionError::syntax(
                        self.pos,
                        format!("expected ',' or ')', found '{}'", c),
                    ));
                }
                None => return Err(ExpressionError::syntax(self.pos, "unterminated function call")),
            }
        }

        let function = build_function(&name, &params)?;
        Ok(Expr::Function(FunctionCall {
            function,
            item,
            item_id: None,
        }))
    }

    /// `/host/key` where the key may carry bracketed, comma separated parameters
    fn parse_item_ref(&mut self) -> Result<ItemRef> {
        self.skip_whitespace();
        if self.peek() != Some('/') {
            return Err(ExpressionError::syntax(self.pos, "expected item reference '/host/key'"));
        }
        self.pos += 1;

        let host_start = self.pos;
        while matches!(self.peek(), Some(c) if c != '/' && c != ',' && c != ')' && !c.is_whitespace()) {
            self.pos += 1;
        }
        let host: String = self.chars[host_start..self.pos].iter().collect();
        if host.is_empty() {
            return Err(ExpressionError::syntax(host_start, "empty host name"));
        }
        if self.peek() != Some('/') {
            return Err(ExpressionError::syntax(self.pos, "expected '/' after host name"));
        }
        self.pos += 1;

        let key_start = self.pos;
        let mut depth = 0usize;
        let mut quoted = false;
        while let Some(c) = self.peek() {
            match c {
                '"' if depth > 0 => quoted = !quoted,
                '\\' if quoted => self.pos += 1,
                '[' if !quoted => depth += 1,
                ']' if !quoted => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| ExpressionError::syntax(self.pos, "unbalanced ']' in item key"))?;
                }
                ',' | ')' if depth == 0 => break,
                c if c.is_whitespace() && depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        if depth > 0 || quoted {
            return Err(ExpressionError::syntax(key_start, "unterminated item key parameters"));
        }

        let key: String = self.chars[key_start..self.pos.min(self.chars.len())].iter().collect();
        if key.is_empty() {
            return Err(ExpressionError::syntax(key_start, "empty item key"));
        }
        Ok(ItemRef { host, key })
    }

    /// Raw function parameter; a quoted parameter is unquoted
    fn parse_parameter(&mut self) -> Result<String> {
        self.skip_whitespace();
        if self.peek() == Some('"') {
            return self.parse_string();
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c != ',' && c != ')') {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect::<String>().trim().to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn build_function(name: &str, params: &[String]) -> Result<Function> {
    let period = |param: &str| {
        parse_window(param).ok_or_else(|| {
            ExpressionError::invalid_parameters(name, format!("invalid period '{}'", param))
        })
    };
    let arity = |min: usize, max: usize| {
        if params.len() < min || params.len() > max {
            Err(ExpressionError::invalid_parameters(
                name,
                format!("expected {}..={} parameters, found {}", min, max, params.len()),
            ))
        } else {
            Ok(())
        }
    };

    match name {
        "last" => {
            arity(0, 1)?;
            let nth = match params.first().map(|p| p.as_str()) {
                None | Some("") => 1,
                Some(param) => match parse_window(param) {
                    Some(Window::Count(nth)) => nth,
                    _ => {
                        return Err(ExpressionError::invalid_parameters(
                            name,
                            format!("expected '#n', found '{}'", param),
                        ));
                    }
                },
            };
            Ok(Function::Last { nth })
        }
        "avg" | "min" | "max" | "sum" => {
            arity(1, 1)?;
            let window = period(&params[0])?;
            Ok(match name {
                "avg" => Function::Avg(window),
                "min" => Function::Min(window),
                "max" => Function::Max(window),
                _ => Function::Sum(window),
            })
        }
        "count" => {
            if params.len() != 1 && params.len() != 3 {
                return Err(ExpressionError::invalid_parameters(
                    name,
                    "expected 'period' or 'period, operator, pattern'",
                ));
            }
            let window = period(&params[0])?;
            let filter = match params.get(1) {
                Some(operator) => {
                    let operator: CountOperator = operator.parse().map_err(|_| {
                        ExpressionError::invalid_parameters(name, format!("unknown operator '{}'", operator))
                    })?;
                    let pattern = params[2].clone();
                    let number = pattern.trim().parse::<f64>().ok();
                    if operator.requires_number() && number.is_none() {
                        return Err(ExpressionError::invalid_parameters(
                            name,
                            format!("pattern '{}' must be numeric", pattern),
                        ));
                    }
                    Some(CountFilter {
                        operator,
                        pattern,
                        number,
                    })
                }
                None => None,
            };
            Ok(Function::Count { window, filter })
        }
        "change" => {
            arity(0, 0)?;
            Ok(Function::Change)
        }
        "nodata" => {
            arity(1, 1)?;
            match period(&params[0])? {
                Window::Span(seconds) => Ok(Function::NoData { seconds }),
                Window::Count(_) => Err(ExpressionError::invalid_parameters(
                    name,
                    "period must be a time span",
                )),
            }
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}
