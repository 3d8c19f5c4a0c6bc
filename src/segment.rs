use std::{collections::HashMap, fmt};

use crate::geo::GeoDistance;

/// Comparison operator between a column and a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Contains,
    ContainsAny,
    ContainsAll,
    ContainsNone,
    Inside,
}

impl Operator {
    /// Operator text as emitted into the query.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::Contains => "CONTAINS",
            Self::ContainsAny => "CONTAINSANY",
            Self::ContainsAll => "CONTAINSALL",
            Self::ContainsNone => "CONTAINSNONE",
            Self::Inside => "INSIDE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean connector joining a segment to the one before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    /// Keyword emitted between clauses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Clause of the statement a segment contributes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementGroup {
    Where,
    Select,
    Order,
}

/// Sort direction of an `ORDER BY` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    /// Keyword emitted in `ORDER BY`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One `ORDER BY` column.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOrder {
    pub column: String,
    pub direction: OrderDirection,
}

/// One projected expression of a `SELECT`.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryProjection {
    pub column: String,
    pub alias: Option<String>,
    pub method: Option<GeoDistance>,
}

impl QueryProjection {
    /// Plain column without an alias.
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: None,
            method: None,
        }
    }

    /// Projection text: the column or function call, then `AS alias`.
    pub fn expression(&self) -> String {
        let base = match &self.method {
            Some(method) => method.function(),
            None => self.column.clone(),
        };
        match &self.alias {
            Some(alias) => format!("{base} AS {alias}"),
            None => base,
        }
    }
}

/// What a segment contributes to the compiled statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentKind {
    /// `column operator $parameter`
    Expression {
        column: String,
        operator: Operator,
        parameter: String,
    },
    /// `column CONTAINSANY $parameter`
    ContainsAny { column: String, parameter: String },
    /// Nested group compiled to a parenthesized clause.
    SubQuery(Vec<QuerySegment>),
    Projection { column: String },
    OrderBy { column: String },
}

impl SegmentKind {
    /// Stable name of the segment kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Expression { .. } => "expression",
            Self::ContainsAny { .. } => "contains-any",
            Self::SubQuery(_) => "sub-query",
            Self::Projection { .. } => "projection",
            Self::OrderBy { .. } => "order-by",
        }
    }
}

/// One ordered contribution recorded by the query builder.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySegment {
    pub connector: Connector,
    pub group: StatementGroup,
    pub kind: SegmentKind,
}

impl QuerySegment {
    /// `column operator $parameter` in the `WHERE` clause.
    pub fn filter(
        column: impl Into<String>,
        operator: Operator,
        parameter: impl Into<String>,
        connector: Connector,
    ) -> Self {
        Self {
            connector,
            group: StatementGroup::Where,
            kind: SegmentKind::Expression {
                column: column.into(),
                operator,
                parameter: parameter.into(),
            },
        }
    }

    /// `column CONTAINSANY $parameter` in the `WHERE` clause.
    pub fn contains_any(
        column: impl Into<String>,
        parameter: impl Into<String>,
        connector: Connector,
    ) -> Self {
        Self {
            connector,
            group: StatementGroup::Where,
            kind: SegmentKind::ContainsAny {
                column: column.into(),
                parameter: parameter.into(),
            },
        }
    }

    /// Nested group compiled to a parenthesized clause.
    pub fn sub_query(segments: Vec<QuerySegment>, connector: Connector) -> Self {
        Self {
            connector,
            group: StatementGroup::Where,
            kind: SegmentKind::SubQuery(segments),
        }
    }

    /// True for segments compiled into the `WHERE` clause.
    pub fn is_filter(&self) -> bool {
        self.group == StatementGroup::Where
    }

    /// Rewrites parameter references found in `renames`, at any depth.
    pub(crate) fn rename_parameters(mut self, renames: &HashMap<String, String>) -> Self {
        self.kind = match self.kind {
            SegmentKind::Expression {
                column,
                operator,
                parameter,
            } => SegmentKind::Expression {
                column,
                operator,
                parameter: renamed(parameter, renames),
            },
            SegmentKind::ContainsAny { column, parameter } => SegmentKind::ContainsAny {
                column,
                parameter: renamed(parameter, renames),
            },
            SegmentKind::SubQuery(children) => SegmentKind::SubQuery(
                children
                    .into_iter()
                    .map(|child| child.rename_parameters(renames))
                    .collect(),
            ),
            other => other,
        };
        self
    }
}

fn renamed(parameter: String, renames: &HashMap<String, String>) -> String {
    renames.get(&parameter).cloned().unwrap_or(parameter)
}
