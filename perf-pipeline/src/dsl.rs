//! Typed Elasticsearch query DSL.
//!
//! Only the parts of the DSL the dashboard's templates use are modelled.
//! Every optional piece is an `Option` or an empty collection so that the
//! query builder can check for a slot instead of probing JSON paths.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete search request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DslQuery {
    #[serde(default)]
    pub query: QueryRoot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceFilter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggs: BTreeMap<String, Aggregation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRoot {
    #[serde(default)]
    pub bool: BoolQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    #[serde(default)]
    pub must: Vec<Clause>,
}

/// One `must` clause. Each variant maps a single field name to its
/// condition, matching the engine's `{"term": {"field": value}}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    Range(BTreeMap<String, RangeBounds>),
    Term(BTreeMap<String, Value>),
    Terms(BTreeMap<String, Vec<Value>>),
}

impl Clause {
    pub fn range(field: &str, gte: i64, lte: i64) -> Self {
        Clause::Range(BTreeMap::from([(
            field.to_string(),
            RangeBounds {
                gte: Some(gte),
                lte: Some(lte),
            },
        )]))
    }

    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Clause::Term(BTreeMap::from([(field.to_string(), value.into())]))
    }

    pub fn terms(field: &str, values: Vec<Value>) -> Self {
        Clause::Terms(BTreeMap::from([(field.to_string(), values)]))
    }

    /// True when this clause is a range on `field`.
    pub fn is_range_on(&self, field: &str) -> bool {
        matches!(self, Clause::Range(map) if map.contains_key(field))
    }

    pub fn is_term_on(&self, field: &str) -> bool {
        matches!(self, Clause::Term(map) if map.contains_key(field))
    }

    pub fn is_terms_on(&self, field: &str) -> bool {
        matches!(self, Clause::Terms(map) if map.contains_key(field))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<i64>,
}

/// `{"field": {"order": "asc"}}`
pub type SortSpec = BTreeMap<String, SortOrder>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub order: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Accepts the engine spelling and the table widget's `ascend`/`descend`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascend" => Some(Direction::Asc),
            "desc" | "descend" => Some(Direction::Desc),
            _ => None,
        }
    }
}

pub fn sort_by(field: &str, order: Direction) -> SortSpec {
    BTreeMap::from([(field.to_string(), SortOrder { order })])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFilter {
    #[serde(default)]
    pub includes: Vec<String>,
}

// ------------------------------------------------------------------ //
//  Aggregations                                                       //
// ------------------------------------------------------------------ //

/// One named aggregation. Exactly one of the kind fields is expected to be
/// set; sub-aggregations hang off `aggs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<TermsAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_hits: Option<TopHitsAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggs: BTreeMap<String, Aggregation>,
}

impl Aggregation {
    pub fn sub(&self, name: &str) -> Option<&Aggregation> {
        self.aggs.get(name)
    }

    pub fn sub_mut(&mut self, name: &str) -> Option<&mut Aggregation> {
        self.aggs.get_mut(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermsAgg {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<BTreeMap<String, Direction>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopHitsAgg {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortSpec>,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceFilter>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAgg {
    #[serde(default)]
    pub field: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clauses_use_engine_shape() {
        let must = vec![
            Clause::range("clock", 1, 2),
            Clause::term("kpiname", "dns_qps"),
            Clause::terms("hostip", vec![json!("10.0.0.1")]),
        ];
        assert_eq!(
            serde_json::to_value(&must).unwrap(),
            json!([
                {"range": {"clock": {"gte": 1, "lte": 2}}},
                {"term": {"kpiname": "dns_qps"}},
                {"terms": {"hostip": ["10.0.0.1"]}}
            ])
        );
    }

    #[test]
    fn aggregation_tree_parses_from_template_json() {
        let q: DslQuery = serde_json::from_value(json!({
            "query": {"bool": {"must": [{"range": {"clock": {"gte": 0, "lte": 0}}}]}},
            "size": 0,
            "aggs": {
                "group_by_hostip": {
                    "terms": {"field": "hostip", "size": 1000, "order": {"_key": "asc"}},
                    "aggs": {
                        "latest_info": {
                            "top_hits": {
                                "sort": [{"clock": {"order": "desc"}}],
                                "_source": {"includes": []},
                                "size": 1
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();

        let root = &q.aggs["group_by_hostip"];
        assert_eq!(root.terms.as_ref().unwrap().field, "hostip");
        let latest = root.sub("latest_info").unwrap().top_hits.as_ref().unwrap();
        assert_eq!(latest.size, 1);
        assert_eq!(latest.sort[0]["clock"].order, Direction::Desc);
        assert!(q.query.bool.must[0].is_range_on("clock"));
    }

    #[test]
    fn empty_optionals_are_not_serialized() {
        let q = DslQuery::default();
        assert_eq!(serde_json::to_value(&q).unwrap(), json!({"query": {"bool": {"must": []}}}));
    }

    #[test]
    fn direction_accepts_widget_spelling() {
        assert_eq!(Direction::parse("descend"), Some(Direction::Desc));
        assert_eq!(Direction::parse("ASC"), Some(Direction::Asc));
        assert_eq!(Direction::parse("sideways"), None);
    }
}
