//! Fluent `SELECT` builder compiled to query text plus a parameter table.
//!
//! Values are never inlined into the compiled text. Every filter value is
//! registered as a parameter named `<column>_<ordinal>` and referenced as
//! `$<column>_<ordinal>`.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::{
    geo::GeoDistance,
    grammar::{fix_up_grouping, serialize, GrammarToken},
    params::QueryParameter,
    segment::{
        Connector, Operator, OrderDirection, QueryOrder, QueryProjection, QuerySegment,
        SegmentKind, StatementGroup,
    },
    DriverError, Result, Thing, Vars,
};

/// Query text and the parameters it references.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub text: String,
    pub vars: Vars,
}

/// Fluent builder for a parameterized `SELECT`.
///
/// Methods consume and return the builder. Filters are joined with `AND`
/// unless the `or_*` variant is used.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuilder {
    targets: Vec<Thing>,
    segments: Vec<QuerySegment>,
    projections: Vec<QueryProjection>,
    orders: Vec<QueryOrder>,
    parameters: Vec<QueryParameter>,
    /// Ordinal of this builder's first parameter; non-zero for groups.
    ordinal_base: usize,
}

impl QueryBuilder {
    /// Empty builder; add a target with [`Self::from`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a query on `target`.
    pub fn table(target: impl Into<Thing>) -> Self {
        Self::new().from(target)
    }

    /// Adds a `FROM` target.
    pub fn from(mut self, target: impl Into<Thing>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Adds several `FROM` targets.
    pub fn from_all<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Thing>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Projects `column`; no projections means `*`.
    pub fn select(self, column: impl Into<String>) -> Self {
        self.push_projection(QueryProjection::column(column))
    }

    /// Projects `column AS alias`.
    pub fn select_as(self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        let mut projection = QueryProjection::column(column);
        projection.alias = Some(alias.into());
        self.push_projection(projection)
    }

    fn push_projection(mut self, projection: QueryProjection) -> Self {
        self.segments.push(QuerySegment {
            connector: Connector::And,
            group: StatementGroup::Select,
            kind: SegmentKind::Projection {
                column: projection.column.clone(),
            },
        });
        self.projections.push(projection);
        self
    }

    /// `column = value`, joined with `AND`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.push_filter(column.into(), Operator::Equal, value.into(), Connector::And)
    }

    /// `column = value`, joined with `OR`.
    pub fn or_where_eq(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.push_filter(column.into(), Operator::Equal, value.into(), Connector::Or)
    }

    /// `column <operator> value`, joined with `AND`.
    pub fn filter(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.push_filter(column.into(), operator, value.into(), Connector::And)
    }

    /// `column <operator> value`, joined with `OR`.
    pub fn or_filter(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.push_filter(column.into(), operator, value.into(), Connector::Or)
    }

    fn push_filter(
        mut self,
        column: String,
        operator: Operator,
        value: JsonValue,
        connector: Connector,
    ) -> Self {
        let parameter = self.add_parameter(&column, value);
        self.segments
            .push(QuerySegment::filter(column, operator, parameter, connector));
        self
    }

    /// `column CONTAINSANY [values]`, joined with `AND`.
    pub fn contains_any<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        self.push_contains(column.into(), values, Connector::And)
    }

    /// `column CONTAINSANY [values]`, joined with `OR`.
    pub fn or_contains_any<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        self.push_contains(column.into(), values, Connector::Or)
    }

    fn push_contains<I, V>(mut self, column: String, values: I, connector: Connector) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        let values = JsonValue::Array(values.into_iter().map(Into::into).collect());
        let parameter = self.add_parameter(&column, values);
        self.segments
            .push(QuerySegment::contains_any(column, parameter, connector));
        self
    }

    /// Adds a parenthesized group, joined with `AND`.
    ///
    /// The group's own first connector is dropped when compiling.
    pub fn group(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_group(build, Connector::And)
    }

    /// Adds a parenthesized group, joined with `OR`.
    pub fn or_group(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_group(build, Connector::Or)
    }

    /// Adds an `AND` group only when `condition` holds.
    pub fn when(self, condition: bool, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        if condition {
            self.push_group(build, Connector::And)
        } else {
            self
        }
    }

    fn push_group(
        mut self,
        build: impl FnOnce(QueryBuilder) -> QueryBuilder,
        connector: Connector,
    ) -> Self {
        let child = build(self.child());

        // The closure may return a builder it made itself, whose ordinals
        // restart at zero, so every value is registered again here.
        let mut renames = HashMap::with_capacity(child.parameters.len());
        for param in child.parameters {
            let stem = param
                .name
                .rsplit_once('_')
                .map_or(param.name.as_str(), |(stem, _)| stem)
                .to_owned();
            let name = self.add_parameter(&stem, param.value);
            renames.insert(param.name, name);
        }

        let segments = child
            .segments
            .into_iter()
            .map(|segment| segment.rename_parameters(&renames))
            .collect();
        self.segments
            .push(QuerySegment::sub_query(segments, connector));
        self
    }

    fn child(&self) -> QueryBuilder {
        QueryBuilder {
            ordinal_base: self.ordinal_base + self.parameters.len(),
            ..QueryBuilder::default()
        }
    }

    /// Projects the distance from `clause.from` to `clause.field`, keeps rows
    /// within `clause.max_distance` and orders by distance descending.
    ///
    /// The filter and ordering use `alias` when given, otherwise the field.
    pub fn geo_distance(self, clause: GeoDistance, alias: Option<&str>) -> Self {
        let column = alias.map_or_else(|| clause.field.clone(), str::to_owned);
        let max_distance = clause.max_distance;
        let projection = QueryProjection {
            column: clause.field.clone(),
            alias: alias.map(str::to_owned),
            method: Some(clause),
        };

        self.push_projection(projection)
            .filter(column.clone(), Operator::LessThanOrEqual, max_distance)
            .order_by_desc(column)
    }

    /// Appends an `ORDER BY` column.
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        let column = column.into();
        self.segments.push(QuerySegment {
            connector: Connector::And,
            group: StatementGroup::Order,
            kind: SegmentKind::OrderBy {
                column: column.clone(),
            },
        });
        self.orders.push(QueryOrder { column, direction });
        self
    }

    /// Shorthand for [`Self::order_by`] ascending.
    pub fn order_by_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, OrderDirection::Ascending)
    }

    /// Shorthand for [`Self::order_by`] descending.
    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, OrderDirection::Descending)
    }

    fn add_parameter(&mut self, column: &str, value: JsonValue) -> String {
        let ordinal = self.ordinal_base + self.parameters.len();
        let name = format!("{}_{ordinal}", parameter_stem(column));
        self.parameters.push(QueryParameter {
            name: name.clone(),
            value,
        });
        name
    }

    /// Recorded segments in call order.
    pub fn segments(&self) -> &[QuerySegment] {
        &self.segments
    }

    /// Registered parameters, including those of groups.
    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    /// Tables or records the query reads from.
    pub fn targets(&self) -> &[Thing] {
        &self.targets
    }

    /// Parameter table sent alongside the query text.
    pub fn vars(&self) -> Vars {
        Vars::from(self.parameters.clone())
    }

    /// Full token sequence of the `SELECT` statement.
    pub fn tokens(&self) -> Result<Vec<GrammarToken>> {
        if self.targets.is_empty() {
            return Err(DriverError::MissingTarget);
        }
        let where_tokens = fix_up_grouping(where_tokens(&self.segments)?);

        let projections = self
            .projections
            .iter()
            .map(|projection| GrammarToken::Projection(projection.expression()))
            .collect();
        let targets = self
            .targets
            .iter()
            .map(|target| GrammarToken::Table(target.to_string()))
            .collect();

        let mut tokens = vec![
            GrammarToken::Statement("SELECT"),
            GrammarToken::Projections(projections),
            GrammarToken::Statement("FROM"),
            GrammarToken::Targets(targets),
            GrammarToken::Statement("WHERE"),
        ];
        tokens.extend(where_tokens);

        if !self.orders.is_empty() {
            tokens.push(GrammarToken::OrderByClauses(
                self.orders
                    .iter()
                    .map(|order| GrammarToken::OrderBy {
                        column: order.column.clone(),
                        direction: order.direction,
                    })
                    .collect(),
            ));
        }

        Ok(tokens)
    }

    /// Compiles to query text plus parameter table.
    pub fn build(&self) -> Result<CompiledQuery> {
        Ok(CompiledQuery {
            text: serialize(&self.tokens()?)?,
            vars: self.vars(),
        })
    }

    /// Query text with parameter values inlined as JSON literals.
    ///
    /// For logging and debugging only; sent queries always use parameters.
    pub fn to_sql(&self) -> Result<String> {
        let text = serialize(&self.tokens()?)?;
        Ok(inline_parameters(&text, &self.parameters))
    }
}

/// Replaces each `$name` reference in one pass, so inlined values are never
/// scanned again.
fn inline_parameters(text: &str, params: &[QueryParameter]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..end];
        match params.iter().find(|param| param.name == name) {
            Some(param) => out.push_str(&param.value.to_string()),
            None => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

/// Compiles the `WHERE`-group segments, inserting connectors between them.
fn where_tokens(segments: &[QuerySegment]) -> Result<Vec<GrammarToken>> {
    let filters: Vec<&QuerySegment> = segments.iter().filter(|s| s.is_filter()).collect();
    if filters.is_empty() {
        return Err(DriverError::EmptyWhereClause);
    }

    let mut tokens = Vec::new();
    for (index, segment) in filters.into_iter().enumerate() {
        if index > 0 {
            tokens.push(GrammarToken::Connector(segment.connector));
        }
        tokens.extend(segment_tokens(segment)?);
    }
    Ok(tokens)
}

fn segment_tokens(segment: &QuerySegment) -> Result<Vec<GrammarToken>> {
    match &segment.kind {
        SegmentKind::Expression {
            column,
            operator,
            parameter,
        } => Ok(vec![
            GrammarToken::Column(column.clone()),
            GrammarToken::Operator(*operator),
            GrammarToken::Parameter(parameter.clone()),
        ]),
        SegmentKind::ContainsAny { column, parameter } => Ok(vec![
            GrammarToken::Column(column.clone()),
            GrammarToken::Operator(Operator::ContainsAny),
            GrammarToken::Parameter(parameter.clone()),
        ]),
        SegmentKind::SubQuery(children) => Ok(vec![GrammarToken::SubQuery(where_tokens(children)?)]),
        other => Err(DriverError::UnknownTokenKind(other.name().to_owned())),
    }
}

/// Parameter names only allow word characters; `a.b` becomes `a_b`.
fn parameter_stem(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::QueryBuilder;
    use crate::{
        geo::{GeoDistance, GeoPoint},
        segment::{Connector, Operator, QuerySegment, SegmentKind, StatementGroup},
        DriverError, GrammarToken, Thing,
    };

    #[test]
    fn single_filter() {
        let query = QueryBuilder::table("user").where_eq("name", "kit").build().expect("build");
        assert_eq!(query.text, "SELECT * FROM user WHERE name = $name_0");
        assert_eq!(query.vars.get("name_0"), Some(&json!("kit")));
    }

    #[test]
    fn connectors_go_between_segments_only() {
        let query = QueryBuilder::table("user")
            .or_where_eq("a", 1)
            .where_eq("b", 2)
            .or_where_eq("c", 3)
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM user WHERE a = $a_0 AND b = $b_1 OR c = $c_2"
        );
        let connectors = query
            .text
            .split(' ')
            .filter(|word| *word == "AND" || *word == "OR")
            .count();
        assert_eq!(connectors, 2);
    }

    #[test]
    fn group_strips_its_leading_connector() {
        let query = QueryBuilder::table("t")
            .where_eq("a", 1)
            .group(|q| q.or_where_eq("b", 2).where_eq("c", 3))
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM t WHERE a = $a_0 AND (b = $b_1 AND c = $c_2)"
        );
        assert_eq!(query.vars.len(), 3);
        assert_eq!(query.vars.get("c_2"), Some(&json!(3)));
    }

    #[test]
    fn nested_groups_continue_ordinals() {
        let query = QueryBuilder::table("t")
            .where_eq("a", 1)
            .or_group(|q| {
                q.where_eq("b", 2)
                    .group(|inner| inner.or_where_eq("c", 3).or_where_eq("d", 4))
            })
            .where_eq("e", 5)
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM t WHERE a = $a_0 OR (b = $b_1 AND (c = $c_2 OR d = $d_3)) AND e = $e_4"
        );
        let names: Vec<&str> = query.vars.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a_0", "b_1", "c_2", "d_3", "e_4"]);
    }

    #[test]
    fn same_column_gets_distinct_parameters() {
        let builder = QueryBuilder::table("t")
            .filter("age", Operator::GreaterThan, 18)
            .filter("age", Operator::LessThan, 65);
        let query = builder.build().expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM t WHERE age > $age_0 AND age < $age_1"
        );
        assert_eq!(builder.parameters().len(), 2);
        assert_eq!(query.vars.len(), 2);
    }

    #[test]
    fn contains_any_registers_array_parameter() {
        let query = QueryBuilder::table("post")
            .where_eq("published", true)
            .or_contains_any("tags", ["rust", "db"])
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM post WHERE published = $published_0 OR tags CONTAINSANY $tags_1"
        );
        assert_eq!(query.vars.get("tags_1"), Some(&json!(["rust", "db"])));
    }

    #[test]
    fn projections_targets_and_order() {
        let query = QueryBuilder::new()
            .from("a")
            .from_all([Thing::record("b", "1")])
            .select("id")
            .select_as("name", "n")
            .where_eq("x", 1)
            .order_by_asc("id")
            .order_by_desc("n")
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT id, name AS n FROM a, b:1 WHERE x = $x_0 ORDER BY id ASC, n DESC"
        );
    }

    #[test]
    fn geo_distance_expands_to_projection_filter_and_order() {
        let query = QueryBuilder::table("venue")
            .geo_distance(
                GeoDistance::new("location", GeoPoint::new(51.5, -0.12)).max(5.0),
                Some("distance"),
            )
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT (geo::distance((-0.12, 51.5), location) * 0.000621371192) AS distance \
             FROM venue WHERE distance <= $distance_0 ORDER BY distance DESC"
        );
        assert_eq!(query.vars.get("distance_0"), Some(&json!(5.0)));
    }

    #[test]
    fn when_false_adds_nothing() {
        let query = QueryBuilder::table("t")
            .where_eq("a", 1)
            .when(false, |q| q.where_eq("b", 2))
            .when(true, |q| q.where_eq("c", 3))
            .build()
            .expect("build");
        assert_eq!(query.text, "SELECT * FROM t WHERE a = $a_0 AND (c = $c_1)");
    }

    #[test]
    fn empty_where_is_rejected() {
        let err = QueryBuilder::table("t").select("id").build().expect_err("must fail");
        assert!(matches!(err, DriverError::EmptyWhereClause));
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = QueryBuilder::new().where_eq("a", 1).build().expect_err("must fail");
        assert!(matches!(err, DriverError::MissingTarget));
    }

    #[test]
    fn segments_record_statement_groups() {
        let builder = QueryBuilder::table("t")
            .select("a")
            .where_eq("a", 1)
            .order_by_asc("a");
        let groups: Vec<StatementGroup> = builder.segments().iter().map(|s| s.group).collect();
        assert_eq!(
            groups,
            [StatementGroup::Select, StatementGroup::Where, StatementGroup::Order]
        );
        assert!(matches!(
            builder.segments()[1],
            QuerySegment {
                connector: Connector::And,
                kind: SegmentKind::Expression { .. },
                ..
            }
        ));
    }

    #[test]
    fn tokens_expose_the_tree() {
        let tokens = QueryBuilder::table("t")
            .where_eq("a", 1)
            .group(|q| q.where_eq("b", 2))
            .tokens()
            .expect("tokens");
        assert_eq!(tokens[0], GrammarToken::Statement("SELECT"));
        assert!(matches!(tokens.last(), Some(GrammarToken::SubQuery(children)) if children.len() == 3));
    }

    #[test]
    fn dotted_columns_produce_word_parameter_names() {
        let query = QueryBuilder::table("t")
            .where_eq("address.city", "Paris")
            .build()
            .expect("build");
        assert_eq!(query.text, "SELECT * FROM t WHERE address.city = $address_city_0");
    }

    #[test]
    fn group_from_a_fresh_builder_keeps_both_values() {
        let query = QueryBuilder::table("t")
            .where_eq("a", 1)
            .group(|_| {
                QueryBuilder::new()
                    .where_eq("a", 2)
                    .or_contains_any("tags", ["x"])
            })
            .build()
            .expect("build");

        assert_eq!(
            query.text,
            "SELECT * FROM t WHERE a = $a_0 AND (a = $a_1 OR tags CONTAINSANY $tags_2)"
        );
        assert_eq!(query.vars.len(), 3);
        assert_eq!(query.vars.get("a_0"), Some(&json!(1)));
        assert_eq!(query.vars.get("a_1"), Some(&json!(2)));
        assert_eq!(query.vars.get("tags_2"), Some(&json!(["x"])));
    }

    #[test]
    fn to_sql_does_not_rescan_inlined_values() {
        let sql = QueryBuilder::table("t")
            .where_eq("a", "$b_1")
            .where_eq("b", 2)
            .to_sql()
            .expect("to_sql");
        assert_eq!(sql, r#"SELECT * FROM t WHERE a = "$b_1" AND b = 2"#);
    }

    #[test]
    fn to_sql_inlines_values() {
        let mut builder = QueryBuilder::table("t");
        for i in 0..11 {
            builder = builder.or_where_eq("a", i);
        }
        let sql = builder.to_sql().expect("to_sql");
        assert!(sql.ends_with("a = 9 OR a = 10"));
        assert!(!sql.contains('$'));
    }
}
