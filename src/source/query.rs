//! Source query templating
//!
//! The configured SQL may contain:
//! - `:interval`, the lookback in minutes, bound only when present
//! - `{Name}` for each filter dimension, expanded to `:Name_0, :Name_1, …`
//!
//! Only parameter names are ever written into the SQL text. The filter
//! values themselves travel as bound parameters.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::filters::FilterSpec;

/// Named placeholder carrying the lookback window
pub const INTERVAL_PARAMETER: &str = "interval";

fn interval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r":interval\b").expect("static regex"))
}

/// Whether the query text binds the rolling `:interval` parameter
pub fn has_interval_placeholder(query: &str) -> bool {
    interval_pattern().is_match(query)
}

/// Value bound to a named parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Integer(i64),
    Text(String),
}

/// A named parameter, name without the leading colon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub value: ParamValue,
}

impl QueryParam {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Text(value.into()),
        }
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Integer(value),
        }
    }
}

/// SQL with filter placeholders expanded, ready for per-cycle binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    sql: String,
    filter_params: Vec<QueryParam>,
    binds_interval: bool,
}

impl BoundQuery {
    /// Expand every `{Name}` placeholder into per-value parameter names.
    ///
    /// Filters whose placeholder does not appear in the text bind nothing.
    pub fn prepare(template: &str, filters: &FilterSpec) -> Self {
        let mut sql = template.to_string();
        let mut filter_params = Vec::new();

        for filter in filters {
            let token = format!("{{{}}}", filter.name);
            if !sql.contains(&token) {
                debug!("Query has no {} placeholder, not filtering on it", token);
                continue;
            }

            let placeholders = (0..filter.values.len())
                .map(|i| format!(":{}", filter.parameter_name(i)))
                .collect::<Vec<_>>()
                .join(", ");
            sql = sql.replace(&token, &placeholders);

            filter_params.extend(
                filter
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, value)| QueryParam::text(filter.parameter_name(i), value.clone())),
            );
        }

        Self {
            binds_interval: has_interval_placeholder(&sql),
            sql,
            filter_params,
        }
    }

    /// Expanded SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameters for one execution with the given lookback
    pub fn params(&self, interval_minutes: u32) -> Vec<QueryParam> {
        let mut params = Vec::with_capacity(self.filter_params.len() + 1);
        if self.binds_interval {
            params.push(QueryParam::integer(INTERVAL_PARAMETER, i64::from(interval_minutes)));
        }
        params.extend(self.filter_params.iter().cloned());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterDimension;

    fn filters() -> FilterSpec {
        FilterSpec::new(vec![
            FilterDimension::new("Region", ["eu", "us", "apac"]),
            FilterDimension::new("Service", ["api"]),
        ])
    }

    #[test]
    fn test_interval_detection() {
        assert!(has_interval_placeholder("SELECT * FROM t WHERE ts > :interval"));
        assert!(has_interval_placeholder("... - (:interval || ' minutes')"));
        assert!(!has_interval_placeholder("SELECT * FROM t"));
        assert!(!has_interval_placeholder("SELECT :interval_start FROM t"));
    }

    #[test]
    fn test_filter_expansion() {
        let query = BoundQuery::prepare(
            "SELECT ts, region, service, n FROM t WHERE region IN ({Region}) AND service IN ({Service})",
            &filters(),
        );

        assert_eq!(
            query.sql(),
            "SELECT ts, region, service, n FROM t WHERE region IN (:Region_0, :Region_1, :Region_2) AND service IN (:Service_0)"
        );
        assert_eq!(
            query.params(1440),
            vec![
                QueryParam::text("Region_0", "eu"),
                QueryParam::text("Region_1", "us"),
                QueryParam::text("Region_2", "apac"),
                QueryParam::text("Service_0", "api"),
            ]
        );
    }

    #[test]
    fn test_values_never_inlined() {
        let hostile = FilterSpec::new(vec![FilterDimension::new(
            "Region",
            ["eu'); DROP TABLE t; --"],
        )]);
        let query = BoundQuery::prepare("SELECT * FROM t WHERE region IN ({Region})", &hostile);

        assert_eq!(query.sql(), "SELECT * FROM t WHERE region IN (:Region_0)");
        assert!(!query.sql().contains("DROP"));
    }

    #[test]
    fn test_interval_bound_first() {
        let query = BoundQuery::prepare(
            "SELECT * FROM t WHERE ts > :interval AND region IN ({Region})",
            &filters(),
        );

        let params = query.params(1);
        assert_eq!(params[0], QueryParam::integer("interval", 1));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_missing_placeholder_binds_nothing() {
        let query = BoundQuery::prepare("SELECT * FROM t", &filters());
        assert_eq!(query.sql(), "SELECT * FROM t");
        assert!(query.params(5).is_empty());
    }
}
