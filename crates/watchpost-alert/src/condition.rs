//! Restricted comparison grammar for rule success conditions.
//!
//! A condition is one operator out of `==`, `!=`, `>`, `>=`, `<`, `<=`
//! followed by an integer literal, e.g. `">0"` or `"== 3"`. Nothing else is
//! accepted; the clause is never executed as code.

use crate::error::{AlertError, Result};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
}

impl CompareOp {
    /// Two-character operators come first so `>=` is never read as `>`.
    const PARSE_ORDER: [CompareOp; 6] = [
        Self::Equal,
        Self::NotEqual,
        Self::GreaterEqual,
        Self::LessEqual,
        Self::GreaterThan,
        Self::LessThan,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
        }
    }

    fn check(&self, value: i64, operand: i64) -> bool {
        match self {
            Self::Equal => value == operand,
            Self::NotEqual => value != operand,
            Self::GreaterThan => value > operand,
            Self::GreaterEqual => value >= operand,
            Self::LessThan => value < operand,
            Self::LessEqual => value <= operand,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed success condition.
///
/// # Examples
///
/// ```
/// use watchpost_alert::condition::{CompareOp, Condition};
///
/// let cond: Condition = ">= 2".parse().unwrap();
/// assert_eq!(cond.operator, CompareOp::GreaterEqual);
/// assert!(cond.matches(2));
/// assert!(!cond.matches(1));
/// assert_eq!(cond.to_string(), ">=2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub operator: CompareOp,
    pub operand: i64,
}

impl Condition {
    pub fn matches(&self, observation: i64) -> bool {
        self.operator.check(observation, self.operand)
    }
}

impl FromStr for Condition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        let clause = s.trim();
        let (operator, rest) = CompareOp::PARSE_ORDER
            .iter()
            .find_map(|op| clause.strip_prefix(op.symbol()).map(|rest| (*op, rest)))
            .ok_or_else(|| {
                AlertError::Configuration(format!(
                    "condition '{s}' must start with one of ==, !=, >, >=, <, <="
                ))
            })?;

        let literal = rest.trim();
        let operand = literal.parse::<i64>().map_err(|_| {
            AlertError::Configuration(format!(
                "condition '{s}' must compare against an integer, found '{literal}'"
            ))
        })?;

        Ok(Self { operator, operand })
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.operator, self.operand)
    }
}

/// Evaluates `success_condition` against an observed count.
///
/// # Errors
///
/// Returns [`AlertError::Configuration`] when the condition does not follow
/// the grammar.
pub fn evaluate(observation: i64, success_condition: &str) -> Result<bool> {
    Ok(success_condition.parse::<Condition>()?.matches(observation))
}
