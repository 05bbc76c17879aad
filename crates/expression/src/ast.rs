/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Expression syntax tree

use crate::error::{ExpressionError, Result};
use crate::history::{HistoryRequest, ItemId, Window};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Function(FunctionCall),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// Reference to an item as written in an expression: `/host/key`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub host: String,
    pub key: String,
}

impl ItemRef {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, key: K) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.host, self.key)
    }
}

/// History function applied to one item
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub function: Function,
    pub item: ItemRef,
    /// Set once the configuration resolved the item reference
    pub item_id: Option<ItemId>,
}

impl FunctionCall {
    /// History request this call needs, once resolved
    pub fn request(&self) -> Option<HistoryRequest> {
        self.item_id.map(|item_id| HistoryRequest {
            item_id,
            window: self.function.window(),
        })
    }
}

/// Supported history functions
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Last { nth: u32 },
    Avg(Window),
    Min(Window),
    Max(Window),
    Sum(Window),
    Count {
        window: Window,
        filter: Option<CountFilter>,
    },
    Change,
    NoData { seconds: u64 },
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Last { .. } => "last",
            Self::Avg(_) => "avg",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Sum(_) => "sum",
            Self::Count { .. } => "count",
            Self::Change => "change",
            Self::NoData { .. } => "nodata",
        }
    }

    /// History window the function reads
    pub fn window(&self) -> Window {
        match self {
            Self::Last { nth } => Window::Count(*nth),
            Self::Avg(window) | Self::Min(window) | Self::Max(window) | Self::Sum(window) => *window,
            Self::Count { window, .. } => *window,
            Self::Change => Window::Count(2),
            Self::NoData { seconds } => Window::Span(*seconds),
        }
    }
}

/// Optional value filter of `count()`
#[derive(Debug, Clone, PartialEq)]
pub struct CountFilter {
    pub operator: CountOperator,
    pub pattern: String,
    /// Pattern parsed as a number, required by the ordering operators
    pub number: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl FromStr for CountOperator {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "ge" => Ok(Self::Ge),
            "lt" => Ok(Self::Lt),
            "le" => Ok(Self::Le),
            "like" => Ok(Self::Like),
            _ => Err(()),
        }
    }
}

impl CountOperator {
    pub fn requires_number(&self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }
}

/// Parsed trigger expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Self> {
        let root = crate::parser::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Distinct item references in order of appearance
    pub fn item_refs(&self) -> Vec<&ItemRef> {
        let mut refs: Vec<&ItemRef> = Vec::new();
        visit_calls(&self.root, &mut |call| {
            if !refs.contains(&&call.item) {
                refs.push(&call.item);
            }
        });
        refs
    }

    /// Resolve every item reference to an item identifier
    pub fn resolve<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&ItemRef) -> Option<ItemId>,
    {
        let mut missing = None;
        visit_calls_mut(&mut self.root, &mut |call| {
            match lookup(&call.item) {
                Some(item_id) => call.item_id = Some(item_id),
                None => {
                    call.item_id = None;
                    missing.get_or_insert_with(|| call.item.to_string());
                }
            }
        });

        match missing {
            Some(item) => Err(ExpressionError::UnknownItem(item)),
            None => Ok(()),
        }
    }

    /// Distinct resolved item identifiers in order of appearance
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids = Vec::new();
        visit_calls(&self.root, &mut |call| {
            if let Some(item_id) = call.item_id {
                if !ids.contains(&item_id) {
                    ids.push(item_id);
                }
            }
        });
        ids
    }

    /// History requests needed to evaluate the expression
    pub fn requests(&self) -> Vec<HistoryRequest> {
        let mut requests = Vec::new();
        visit_calls(&self.root, &mut |call| {
            if let Some(request) = call.request() {
                if !requests.contains(&request) {
                    requests.push(request);
                }
            }
        });
        requests
    }

    /// Whether the result can change with time alone
    pub fn has_time_functions(&self) -> bool {
        let mut found = false;
        visit_calls(&self.root, &mut |call| {
            found |= call.function.window().is_time_based();
        });
        found
    }
}

fn visit_calls<'a, F: FnMut(&'a FunctionCall)>(expr: &'a Expr, visit: &mut F) {
    match expr {
        Expr::Function(call) => visit(call),
        Expr::Unary { operand, .. } => visit_calls(operand, visit),
        Expr::Binary { left, right, .. } => {
            visit_calls(left, visit);
            visit_calls(right, visit);
        }
        Expr::Number(_) | Expr::Text(_) => {}
    }
}

fn visit_calls_mut<F: FnMut(&mut FunctionCall)>(expr: &mut Expr, visit: &mut F) {
    match expr {
        Expr::Function(call) => visit(call),
        Expr::Unary { operand, .. } => visit_calls_mut(operand, visit),
        Expr::Binary { left, right, .. } => {
            visit_calls_mut(left, visit);
            visit_calls_mut(right, visit);
        }
        Expr::Number(_) | Expr::Text(_) => {}
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expression::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_refs_are_distinct() {
        let expr = Expression::parse("last(/web/cpu) > 5 and avg(/web/cpu,5m) > 3 or last(/db/up) = 0").unwrap();
        let refs = expr.item_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].to_string(), "/web/cpu");
        assert_eq!(refs[1].to_string(), "/db/up");
    }

    #[test]
    fn test_resolve_and_requests() {
        let mut expr = Expression::parse("last(/web/cpu) > 5 and avg(/web/cpu,5m) > 3").unwrap();
        assert!(expr.requests().is_empty());

        expr.resolve(|item| (item.key == "cpu").then_some(ItemId(7))).unwrap();
        assert_eq!(expr.item_ids(), vec![ItemId(7)]);
        assert_eq!(
            expr.requests(),
            vec![
                HistoryRequest { item_id: ItemId(7), window: Window::Count(1) },
                HistoryRequest { item_id: ItemId(7), window: Window::Span(300) },
            ]
        );
        assert!(expr.has_time_functions());
    }

    #[test]
    fn test_resolve_unknown_item() {
        let mut expr = Expression::parse("last(/web/cpu) > 5").unwrap();
        let err = expr.resolve(|_| None).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownItem("/web/cpu".to_string()));
    }

    #[test]
    fn test_serde_as_source_text() {
        let expr = Expression::parse("last(/web/cpu) > 5").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"last(/web/cpu) > 5\"");

        let parsed: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source(), expr.source());
        assert!(serde_json::from_str::<Expression>("\"last(/web/cpu) >\"").is_err());
    }
}
