//! Intermediate token tree of a compiled query and its text serialization.

use crate::{
    segment::{Connector, Operator, OrderDirection},
    DriverError, Result,
};

/// One node of a compiled query before serialization.
#[derive(Clone, Debug, PartialEq)]
pub enum GrammarToken {
    /// Keyword emitted verbatim (`SELECT`, `FROM`, `WHERE`).
    Statement(&'static str),
    Column(String),
    Table(String),
    Projection(String),
    Operator(Operator),
    Connector(Connector),
    /// Parameter reference by name, emitted as `$name`.
    Parameter(String),
    /// Comma-joined `FROM` list.
    Targets(Vec<GrammarToken>),
    /// Comma-joined projection list; empty emits `*`.
    Projections(Vec<GrammarToken>),
    /// `ORDER BY` followed by comma-joined [`GrammarToken::OrderBy`] children.
    OrderByClauses(Vec<GrammarToken>),
    OrderBy {
        column: String,
        direction: OrderDirection,
    },
    /// Parenthesized nested clause.
    SubQuery(Vec<GrammarToken>),
}

impl GrammarToken {
    /// Stable name of the token kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Statement(_) => "statement",
            Self::Column(_) => "column",
            Self::Table(_) => "table",
            Self::Projection(_) => "projection",
            Self::Operator(_) => "operator",
            Self::Connector(_) => "connector",
            Self::Parameter(_) => "parameter",
            Self::Targets(_) => "targets",
            Self::Projections(_) => "projections",
            Self::OrderByClauses(_) => "order-by-clauses",
            Self::OrderBy { .. } => "order-by",
            Self::SubQuery(_) => "sub-query",
        }
    }
}

/// Drops the leading connector of every sub-query, at any depth.
///
/// Turns `a = $a AND (OR b = $b)` into `a = $a AND (b = $b)`. Tokens outside
/// sub-queries are returned as they are.
pub fn fix_up_grouping(tokens: Vec<GrammarToken>) -> Vec<GrammarToken> {
    tokens
        .into_iter()
        .map(|token| match token {
            GrammarToken::SubQuery(children) => {
                let mut children = fix_up_grouping(children);
                if matches!(children.first(), Some(GrammarToken::Connector(_))) {
                    children.remove(0);
                }
                GrammarToken::SubQuery(children)
            }
            other => other,
        })
        .collect()
}

/// Space-joins the emission of every token.
pub fn serialize(tokens: &[GrammarToken]) -> Result<String> {
    let mut parts = Vec::with_capacity(tokens.len());
    for token in tokens {
        let part = emit(token)?;
        if !part.is_empty() {
            parts.push(part);
        }
    }
    Ok(parts.join(" "))
}

fn emit(token: &GrammarToken) -> Result<String> {
    match token {
        GrammarToken::Statement(keyword) => Ok((*keyword).to_owned()),
        GrammarToken::Column(text) | GrammarToken::Table(text) | GrammarToken::Projection(text) => {
            Ok(text.clone())
        }
        GrammarToken::Operator(operator) => Ok(operator.as_str().to_owned()),
        GrammarToken::Connector(connector) => Ok(connector.as_str().to_owned()),
        GrammarToken::Parameter(name) => Ok(format!("${name}")),
        GrammarToken::SubQuery(children) => Ok(format!("({})", serialize(children)?)),
        GrammarToken::Targets(children) => join_list(children, |child| {
            matches!(child, GrammarToken::Table(_) | GrammarToken::Column(_))
        }),
        GrammarToken::Projections(children) if children.is_empty() => Ok("*".to_owned()),
        GrammarToken::Projections(children) => join_list(children, |child| {
            matches!(child, GrammarToken::Projection(_) | GrammarToken::Column(_))
        }),
        GrammarToken::OrderByClauses(children) if children.is_empty() => Ok(String::new()),
        GrammarToken::OrderByClauses(children) => {
            let clauses = join_list(children, |child| {
                matches!(child, GrammarToken::OrderBy { .. })
            })?;
            Ok(format!("ORDER BY {clauses}"))
        }
        GrammarToken::OrderBy { column, direction } => {
            Ok(format!("{column} {}", direction.as_str()))
        }
    }
}

/// Comma-joins list children, each of which must satisfy `allowed`.
fn join_list(children: &[GrammarToken], allowed: impl Fn(&GrammarToken) -> bool) -> Result<String> {
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        if !allowed(child) {
            return Err(DriverError::UnknownTokenKind(child.kind().to_owned()));
        }
        parts.push(emit(child)?);
    }
    Ok(parts.join(", "))
}
