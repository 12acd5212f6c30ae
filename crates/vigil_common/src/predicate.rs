//! Filter predicates over service records.
//!
//! A predicate arrives either as a tree:
//!
//! ```json
//! {"type": "and", "clauses": [
//!     {"type": "compare", "metric": "error_count", "op": ">", "value": 200},
//!     {"type": "has_problems"}
//! ]}
//! ```
//!
//! or as condition text: `error_count > 200 and has_problems`,
//! `status == 'critical'`. Text received on the wire is kept as
//! [`Predicate::Condition`] and parsed by [`Predicate::compile`], so a bad
//! condition surfaces as `InvalidPredicate` at execution time rather than as
//! a deserialization failure.
//!
//! Metric names stay unresolved strings until [`Predicate::compile`] so that an
//! unknown name surfaces as `UnknownMetric` at execution time.

use crate::error::QueryError;
use crate::health::HealthStatus;
use crate::metric::Metric;
use crate::model::ServiceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
        }
    }

    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }
}

/// Nesting allowed in condition text; deeper input is rejected, not recursed
pub const MAX_CONDITION_DEPTH: usize = 64;

/// Predicate expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", from = "PredicateInput")]
pub enum Predicate {
    Compare {
        metric: String,
        op: CompareOp,
        value: f64,
    },
    /// Equality against the derived status, never the raw score
    Status { status: HealthStatus },
    HasProblems,
    And { clauses: Vec<Predicate> },
    Or { clauses: Vec<Predicate> },
    Not { clause: Box<Predicate> },
    /// Condition text not yet parsed
    Condition { text: String },
}

/// Accepted wire shapes: condition text or an explicit tree
#[derive(Deserialize)]
#[serde(untagged)]
enum PredicateInput {
    Text(String),
    Tree(PredicateTree),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PredicateTree {
    Compare {
        metric: String,
        op: CompareOp,
        value: f64,
    },
    Status {
        status: HealthStatus,
    },
    HasProblems,
    And {
        clauses: Vec<Predicate>,
    },
    Or {
        clauses: Vec<Predicate>,
    },
    Not {
        clause: Box<Predicate>,
    },
    Condition {
        text: String,
    },
}

impl From<PredicateInput> for Predicate {
    fn from(input: PredicateInput) -> Self {
        match input {
            PredicateInput::Text(text) => Predicate::Condition { text },
            PredicateInput::Tree(tree) => match tree {
                PredicateTree::Compare { metric, op, value } => {
                    Predicate::Compare { metric, op, value }
                }
                PredicateTree::Status { status } => Predicate::Status { status },
                PredicateTree::HasProblems => Predicate::HasProblems,
                PredicateTree::And { clauses } => Predicate::And { clauses },
                PredicateTree::Or { clauses } => Predicate::Or { clauses },
                PredicateTree::Not { clause } => Predicate::Not { clause },
                PredicateTree::Condition { text } => Predicate::Condition { text },
            },
        }
    }
}

impl Predicate {
    pub fn compare(metric: &str, op: CompareOp, value: f64) -> Self {
        Predicate::Compare {
            metric: metric.to_string(),
            op,
            value,
        }
    }

    pub fn status(status: HealthStatus) -> Self {
        Predicate::Status { status }
    }

    /// Unparsed condition text, checked when the predicate is compiled
    pub fn condition(text: &str) -> Self {
        Predicate::Condition {
            text: text.to_string(),
        }
    }

    /// Parse condition text into a predicate tree
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(QueryError::InvalidPredicate("empty condition".to_string()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(QueryError::InvalidPredicate(format!(
                "unexpected '{}' in '{}'",
                token, text
            )));
        }
        Ok(predicate)
    }

    /// Resolve metric names, failing on the first unknown one
    pub fn compile(&self) -> Result<CompiledPredicate, QueryError> {
        Ok(match self {
            Predicate::Compare { metric, op, value } => CompiledPredicate::Compare {
                metric: metric.parse()?,
                op: *op,
                value: *value,
            },
            Predicate::Status { status } => CompiledPredicate::Status(*status),
            Predicate::HasProblems => CompiledPredicate::HasProblems,
            Predicate::And { clauses } => CompiledPredicate::And(
                clauses
                    .iter()
                    .map(Predicate::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Or { clauses } => CompiledPredicate::Or(
                clauses
                    .iter()
                    .map(Predicate::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Not { clause } => CompiledPredicate::Not(Box::new(clause.compile()?)),
            Predicate::Condition { text } => Predicate::parse(text)?.compile()?,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { metric, op, value } => {
                write!(f, "{} {} {}", metric, op.as_str(), value)
            }
            Predicate::Status { status } => write!(f, "status == '{}'", status),
            Predicate::HasProblems => f.write_str("has_problems"),
            Predicate::And { clauses } => write_joined(f, clauses, " and "),
            Predicate::Or { clauses } => write_joined(f, clauses, " or "),
            Predicate::Not { clause } => write!(f, "not ({})", clause),
            Predicate::Condition { text } => f.write_str(text),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, clauses: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", clause)?;
    }
    f.write_str(")")
}

/// Predicate with metric names resolved, ready to evaluate
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledPredicate {
    Compare {
        metric: Metric,
        op: CompareOp,
        value: f64,
    },
    Status(HealthStatus),
    HasProblems,
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
    Not(Box<CompiledPredicate>),
}

impl CompiledPredicate {
    /// A metric comparison on a service without that metric is false
    pub fn matches(&self, record: &ServiceRecord) -> bool {
        match self {
            CompiledPredicate::Compare { metric, op, value } => record
                .metric(*metric)
                .map(|v| op.apply(v, *value))
                .unwrap_or(false),
            CompiledPredicate::Status(status) => record.status == *status,
            CompiledPredicate::HasProblems => record.has_problems(),
            CompiledPredicate::And(clauses) => clauses.iter().all(|c| c.matches(record)),
            CompiledPredicate::Or(clauses) => clauses.iter().any(|c| c.matches(record)),
            CompiledPredicate::Not(clause) => !clause.matches(record),
        }
    }
}

// ============================================================================
// Condition text parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Quoted(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Quoted(s) => write!(f, "'{}'", s),
            Token::Op(op) => f.write_str(op.as_str()),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '>' | '<' | '=' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('>', _) => (CompareOp::Gt, 1),
                    ('<', _) => (CompareOp::Lt, 1),
                    _ => (CompareOp::Eq, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(QueryError::InvalidPredicate(format!(
                        "expected '{}{}'",
                        c, c
                    )));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '\'' | '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == c)
                    .map(|p| start + p)
                    .ok_or_else(|| {
                        QueryError::InvalidPredicate("unterminated string".to_string())
                    })?;
                tokens.push(Token::Quoted(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = raw.parse::<f64>().map_err(|_| {
                    QueryError::InvalidPredicate(format!("bad number '{}'", raw))
                })?;
                // Percent and millisecond suffixes are decoration on the canonical unit
                if chars.get(i) == Some(&'%') {
                    i += 1;
                } else if chars.get(i) == Some(&'m') && chars.get(i + 1) == Some(&'s') {
                    i += 2;
                }
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(QueryError::InvalidPredicate(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open `not` and `(` levels
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Predicate, QueryError> {
        let mut clauses = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            clauses.push(self.parse_and()?);
        }
        Ok(collapse(clauses, |clauses| Predicate::Or { clauses }))
    }

    fn parse_and(&mut self) -> Result<Predicate, QueryError> {
        let mut clauses = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            clauses.push(self.parse_unary()?);
        }
        Ok(collapse(clauses, |clauses| Predicate::And { clauses }))
    }

    fn parse_unary(&mut self) -> Result<Predicate, QueryError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                self.descend()?;
                let clause = self.parse_unary()?;
                self.depth -= 1;
                Ok(Predicate::Not {
                    clause: Box::new(clause),
                })
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(QueryError::InvalidPredicate("missing ')'".to_string())),
                }
            }
            _ => self.parse_atom(),
        }
    }

    fn descend(&mut self) -> Result<(), QueryError> {
        if self.depth >= MAX_CONDITION_DEPTH {
            return Err(QueryError::InvalidPredicate(
                "condition nested too deeply".to_string(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_atom(&mut self) -> Result<Predicate, QueryError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => {
                return Err(QueryError::InvalidPredicate(format!(
                    "expected a metric name, found '{}'",
                    other
                )))
            }
            None => {
                return Err(QueryError::InvalidPredicate(
                    "condition ends early".to_string(),
                ))
            }
        };

        if name.eq_ignore_ascii_case("has_problems") {
            return Ok(Predicate::HasProblems);
        }

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => {
                return Err(QueryError::InvalidPredicate(format!(
                    "expected a comparison after '{}'",
                    name
                )))
            }
        };

        if name.eq_ignore_ascii_case("status") {
            if op != CompareOp::Eq {
                return Err(QueryError::InvalidPredicate(
                    "status only supports '=='".to_string(),
                ));
            }
            let raw = match self.next() {
                Some(Token::Quoted(s)) | Some(Token::Ident(s)) => s,
                _ => {
                    return Err(QueryError::InvalidPredicate(
                        "expected a status value".to_string(),
                    ))
                }
            };
            let status = raw.parse::<HealthStatus>().map_err(QueryError::InvalidPredicate)?;
            return Ok(Predicate::Status { status });
        }

        match self.next() {
            Some(Token::Number(value)) => Ok(Predicate::Compare {
                metric: name,
                op,
                value,
            }),
            _ => Err(QueryError::InvalidPredicate(format!(
                "expected a number after '{} {}'",
                name,
                op.as_str()
            ))),
        }
    }
}

fn collapse(mut clauses: Vec<Predicate>, join: impl FnOnce(Vec<Predicate>) -> Predicate) -> Predicate {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        join(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_nesting_rejected() {
        let text = format!("{}error_count > 1", "not ".repeat(200_000));
        assert_eq!(
            Predicate::parse(&text).unwrap_err(),
            QueryError::InvalidPredicate("condition nested too deeply".to_string())
        );

        let text = format!("{}error_count > 1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(Predicate::parse(&text).is_err());
    }

    #[test]
    fn test_nesting_up_to_limit_accepted() {
        let depth = MAX_CONDITION_DEPTH;
        let text = format!(
            "{}error_count > 1{}",
            "(".repeat(depth / 2),
            ")".repeat(depth / 2)
        );
        let text = format!("{}{}", "not ".repeat(depth - depth / 2), text);
        assert!(Predicate::parse(&text).is_ok());

        let text = format!("not {}", text);
        assert!(Predicate::parse(&text).is_err());
    }

    #[test]
    fn test_condition_text_checked_at_compile() {
        let p: Predicate = serde_json::from_str(r#""error_count >""#).unwrap();
        assert_eq!(p, Predicate::condition("error_count >"));
        assert!(matches!(
            p.compile().unwrap_err(),
            QueryError::InvalidPredicate(_)
        ));

        let p: Predicate = serde_json::from_str(r#""errors > 200 and has_problems""#).unwrap();
        assert_eq!(
            p.compile().unwrap(),
            Predicate::parse("errors > 200 and has_problems")
                .unwrap()
                .compile()
                .unwrap()
        );
    }

    #[test]
    fn test_parse_simple_comparison() {
        let p = Predicate::parse("error_count > 100").unwrap();
        assert_eq!(p, Predicate::compare("error_count", CompareOp::Gt, 100.0));
    }

    #[test]
    fn test_parse_all_operators() {
        for (text, op) in [
            ("failure_rate >= 2", CompareOp::Ge),
            ("failure_rate <= 2", CompareOp::Le),
            ("failure_rate < 2", CompareOp::Lt),
            ("failure_rate == 2", CompareOp::Eq),
        ] {
            assert_eq!(
                Predicate::parse(text).unwrap(),
                Predicate::compare("failure_rate", op, 2.0)
            );
        }
    }

    #[test]
    fn test_parse_status_quoted() {
        let p = Predicate::parse("status == 'critical'").unwrap();
        assert_eq!(p, Predicate::status(HealthStatus::Critical));
        let p = Predicate::parse("status == \"warning\"").unwrap();
        assert_eq!(p, Predicate::status(HealthStatus::Warning));
    }

    #[test]
    fn test_parse_boolean_precedence() {
        let p = Predicate::parse("has_problems or error_count > 5 and failure_rate > 1%").unwrap();
        match p {
            Predicate::Or { clauses } => {
                assert_eq!(clauses[0], Predicate::HasProblems);
                assert!(matches!(clauses[1], Predicate::And { .. }));
            }
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_and_parens() {
        let p = Predicate::parse("not (status == healthy || has_problems)").unwrap();
        assert!(matches!(p, Predicate::Not { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Predicate::parse("").is_err());
        assert!(Predicate::parse("error_count >").is_err());
        assert!(Predicate::parse("status > 'critical'").is_err());
        assert!(Predicate::parse("error_count > 5 extra").is_err());
        assert!(Predicate::parse("status == 'purple'").is_err());
    }

    #[test]
    fn test_compile_unknown_metric() {
        let p = Predicate::parse("latency_p99 > 5").unwrap();
        assert_eq!(
            p.compile().unwrap_err(),
            QueryError::UnknownMetric("latency_p99".to_string())
        );
    }

    #[test]
    fn test_deserialize_text_and_tree() {
        let from_text: Predicate = serde_json::from_str("\"errors > 200\"").unwrap();
        let from_tree: Predicate = serde_json::from_str(
            r#"{"type": "compare", "metric": "errors", "op": ">", "value": 200}"#,
        )
        .unwrap();
        assert_eq!(from_text, from_tree);

        let nested: Predicate = serde_json::from_str(
            r#"{"type": "and", "clauses": ["has_problems", {"type": "status", "status": "critical"}]}"#,
        )
        .unwrap();
        assert_eq!(
            nested,
            Predicate::And {
                clauses: vec![
                    Predicate::HasProblems,
                    Predicate::status(HealthStatus::Critical)
                ]
            }
        );
    }

    #[test]
    fn test_serialize_is_tree() {
        let json = serde_json::to_value(Predicate::HasProblems).unwrap();
        assert_eq!(json, serde_json::json!({"type": "has_problems"}));
    }
}
