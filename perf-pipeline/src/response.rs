//! Typed view of a search-engine response.
//!
//! Every field is optional; callers check for presence instead of probing
//! JSON paths. Documents themselves stay as raw JSON because their shape
//! differs per index family.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Option<SearchHits>,
    #[serde(default)]
    pub aggregations: Option<Map<String, Value>>,
}

impl SearchResponse {
    pub fn from_json(body: Value) -> Result<Self> {
        serde_json::from_value(body)
            .map_err(|e| PipelineError::data_shape(format!("unexpected response shape: {e}")))
    }

    /// `hits.total`, or 0 when the engine did not report one.
    pub fn total(&self) -> u64 {
        self.hits.as_ref().map_or(0, SearchHits::total)
    }

    pub fn hit_list(&self) -> &[Hit] {
        self.hits
            .as_ref()
            .map(|h| h.hits.as_slice())
            .unwrap_or_default()
    }

    /// A named top-level aggregation.
    pub fn aggregation(&self, name: &str) -> Option<&Value> {
        self.aggregations.as_ref()?.get(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub total: Option<HitsTotal>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

impl SearchHits {
    pub fn total(&self) -> u64 {
        match self.total {
            Some(HitsTotal::Count(n)) => n,
            Some(HitsTotal::Tracked { value }) => value,
            None => 0,
        }
    }
}

/// Newer engines report `{"value": n, "relation": "eq"}`, older ones a
/// bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HitsTotal {
    Count(u64),
    Tracked { value: u64 },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hit {
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl Hit {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }

    /// A field as text. Numbers are rendered; blank strings count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_accepts_both_shapes() {
        let tracked = SearchResponse::from_json(json!({
            "hits": {"total": {"value": 42, "relation": "eq"}, "hits": []}
        }))
        .unwrap();
        let bare = SearchResponse::from_json(json!({"hits": {"total": 7, "hits": []}})).unwrap();
        assert_eq!(tracked.total(), 42);
        assert_eq!(bare.total(), 7);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let resp = SearchResponse::from_json(json!({"took": 3})).unwrap();
        assert_eq!(resp.total(), 0);
        assert!(resp.hit_list().is_empty());
        assert!(resp.aggregation("group_by_device").is_none());
    }

    #[test]
    fn hit_text_renders_numbers_and_skips_blanks() {
        let resp = SearchResponse::from_json(json!({
            "hits": {"hits": [{"_source": {"source": "zabbix", "itemid": 4711, "hostname": " "}}]}
        }))
        .unwrap();
        let hit = &resp.hit_list()[0];
        assert_eq!(hit.text("source").as_deref(), Some("zabbix"));
        assert_eq!(hit.text("itemid").as_deref(), Some("4711"));
        assert_eq!(hit.text("hostname"), None);
    }

    #[test]
    fn non_object_body_is_a_data_shape_error() {
        let err = SearchResponse::from_json(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, PipelineError::DataShape(_)));
    }
}
