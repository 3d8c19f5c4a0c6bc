use serde_json::{Map, Value as JsonValue};

use crate::{DriverError, Result};

/// One named query parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryParameter {
    /// Name without the `$` prefix.
    pub name: String,
    pub value: JsonValue,
}

/// Named parameter table submitted alongside query text.
///
/// Keeps insertion order; inserting an existing name replaces its value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vars(Vec<QueryParameter>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from name/value pairs.
    ///
    /// Names can be provided with or without the `$` prefix.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<JsonValue>,
    {
        let mut vars = Self::new();
        for (name, value) in pairs {
            vars.insert(name, value);
        }
        vars
    }

    /// Sets `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|param| param.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(QueryParameter { name, value }),
        }
    }

    /// Value bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &QueryParameter> {
        self.0.iter()
    }

    /// Converts into the JSON object sent as the second `query` parameter.
    pub(crate) fn into_map(self) -> Result<Map<String, JsonValue>> {
        self.0
            .into_iter()
            .map(|param| Ok((normalize_var_name(&param.name)?, param.value)))
            .collect()
    }
}

impl From<()> for Vars {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<QueryParameter>> for Vars {
    fn from(params: Vec<QueryParameter>) -> Self {
        let mut vars = Self::new();
        for param in params {
            vars.insert(param.name, param.value);
        }
        vars
    }
}

impl From<Map<String, JsonValue>> for Vars {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self::named(map)
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Vars
where
    K: Into<String>,
    V: Into<JsonValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        Self::named(pairs)
    }
}

fn normalize_var_name(name: &str) -> Result<String> {
    let normalized = name.trim_start_matches('$');
    if normalized.is_empty() {
        return Err(DriverError::Protocol(
            "query parameter name cannot be empty".to_owned(),
        ));
    }
    Ok(normalized.to_owned())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{DriverError, Vars};

    #[test]
    fn named_from_array() {
        let vars: Vars = [("name", json!("kit")), ("age", json!(3))].into();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("age"), Some(&json!(3)));
    }

    #[test]
    fn insert_replaces_existing_name() {
        let mut vars = Vars::new();
        vars.insert("a", 1);
        vars.insert("a", 2);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("a"), Some(&json!(2)));
    }

    #[test]
    fn into_map_strips_dollar_prefix() {
        let map = Vars::named([("$name", "kit")]).into_map().expect("must convert");
        assert_eq!(map.get("name"), Some(&json!("kit")));
    }

    #[test]
    fn into_map_rejects_empty_name() {
        let err = Vars::named([("$", 1)]).into_map().expect_err("must fail");
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
